//! `VectorIndex`: upsert (id, vector, metadata, document); cosine-nearest
//! query; get/list/count. Treated per spec.md §1 as an external collaborator
//! with only its interface specified (component 2 of SPEC_FULL.md §2).
//!
//! Grounded on `dashflow-registry/src/search.rs::VectorStore` +
//! `InMemoryVectorStore` (poison-safe `RwLock`, cosine similarity,
//! sort-then-truncate); the optional Qdrant-backed adapter is gated behind
//! the `vector-search` feature, same as the teacher's own `QdrantRegistryStore`.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::RwLock;

#[derive(Clone, Debug)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
    pub document: String,
}

#[derive(Clone, Debug)]
pub struct VectorHit {
    pub id: String,
    /// Cosine distance: lower is better (spec.md §4.4 "candidate score is
    /// the raw distance").
    pub score: f64,
    pub metadata: Value,
    pub document: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Value,
        document: String,
    ) -> Result<()>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>>;

    async fn list(&self) -> Result<Vec<VectorRecord>>;

    async fn count(&self) -> Result<usize>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = (dot / (norm_a * norm_b)) as f64;
    (1.0 - similarity).max(0.0)
}

/// In-process vector index used as the default when the `vector-search`
/// feature (Qdrant) is not enabled, per SPEC_FULL.md §3 "an in-process or
/// Qdrant-backed vector index".
pub struct InMemoryVectorIndex {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Value,
        document: String,
    ) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| r.id != id);
        records.push(VectorRecord {
            id: id.to_string(),
            vector,
            metadata,
            document,
        });
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<VectorHit> = records
            .iter()
            .map(|r| VectorHit {
                id: r.id.clone(),
                score: cosine_distance(vector, &r.vector),
                metadata: r.metadata.clone(),
                document: r.document.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<VectorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().unwrap_or_else(|e| e.into_inner()).len())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn query_orders_by_ascending_distance() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("grep", vec![1.0, 0.0], json!({"name": "grep"}), "grep doc".into())
            .await
            .unwrap();
        index
            .upsert("jq", vec![0.0, 1.0], json!({"name": "jq"}), "jq doc".into())
            .await
            .unwrap();

        let hits = index.query(&[0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].id, "grep");
        assert!(hits[0].score < hits[1].score);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("a", vec![1.0, 0.0], json!({}), "first".into())
            .await
            .unwrap();
        index
            .upsert("a", vec![0.0, 1.0], json!({}), "second".into())
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let record = index.get("a").await.unwrap().unwrap();
        assert_eq!(record.document, "second");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0], json!({}), "x".into()).await.unwrap();
        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_index_returns_no_match() {
        let index = InMemoryVectorIndex::new();
        assert!(index.query(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}

/// Qdrant-backed adapter, mirroring the teacher's `QdrantRegistryStore`.
#[cfg(feature = "vector-search")]
pub mod qdrant_backend {
    use super::*;

    pub struct QdrantVectorIndex {
        client: qdrant_client::Qdrant,
        collection_name: String,
    }

    impl QdrantVectorIndex {
        pub async fn new(url: &str, collection_name: &str, dimension: usize) -> Result<Self> {
            use qdrant_client::qdrant::{CreateCollectionBuilder, Distance, VectorParamsBuilder};

            let client = qdrant_client::Qdrant::from_url(url)
                .build()
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant connect: {e}")))?;

            let collections = client
                .list_collections()
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant list: {e}")))?;
            let exists = collections.collections.iter().any(|c| c.name == collection_name);
            if !exists {
                client
                    .create_collection(CreateCollectionBuilder::new(collection_name).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ))
                    .await
                    .map_err(|e| crate::error::OapError::Upstream(format!("qdrant create: {e}")))?;
            }

            Ok(Self {
                client,
                collection_name: collection_name.to_string(),
            })
        }
    }

    #[async_trait]
    impl VectorIndex for QdrantVectorIndex {
        async fn upsert(
            &self,
            id: &str,
            vector: Vec<f32>,
            metadata: Value,
            document: String,
        ) -> Result<()> {
            use qdrant_client::qdrant::{PointStruct, UpsertPointsBuilder};

            let mut payload_value = metadata;
            if let Value::Object(ref mut map) = payload_value {
                map.insert("document".into(), Value::String(document));
            }
            let payload: qdrant_client::Payload = payload_value
                .try_into()
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant payload: {e}")))?;
            let point = PointStruct::new(id.to_string(), vector, payload);
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection_name, vec![point]).wait(true))
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant upsert: {e}")))?;
            Ok(())
        }

        async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
            use qdrant_client::qdrant::SearchPointsBuilder;

            let results = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&self.collection_name, vector.to_vec(), top_k as u64)
                        .with_payload(true),
                )
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant search: {e}")))?;

            Ok(results
                .result
                .into_iter()
                .filter_map(|point| {
                    let id = point.id.as_ref().and_then(|pid| match &pid.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => {
                            Some(u.clone())
                        }
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            Some(n.to_string())
                        }
                        None => None,
                    })?;
                    let mut metadata = serde_json::Map::new();
                    for (k, v) in point.payload {
                        metadata.insert(k, qdrant_json::qdrant_value_to_json(&v));
                    }
                    let document = metadata
                        .remove("document")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    Some(VectorHit {
                        id,
                        score: 1.0 - point.score as f64,
                        metadata: Value::Object(metadata),
                        document,
                    })
                })
                .collect())
        }

        async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
            use qdrant_client::qdrant::GetPointsBuilder;
            let result = self
                .client
                .get_points(
                    GetPointsBuilder::new(&self.collection_name, vec![id.to_string().into()])
                        .with_payload(true)
                        .with_vectors(true),
                )
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant get: {e}")))?;
            Ok(result.result.into_iter().next().map(|point| {
                let mut metadata = serde_json::Map::new();
                for (k, v) in point.payload {
                    metadata.insert(k, qdrant_json::qdrant_value_to_json(&v));
                }
                let document = metadata
                    .remove("document")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                VectorRecord {
                    id: id.to_string(),
                    vector: Vec::new(),
                    metadata: Value::Object(metadata),
                    document,
                }
            }))
        }

        async fn list(&self) -> Result<Vec<VectorRecord>> {
            Err(crate::error::OapError::Internal(
                "listing all records is not supported by the Qdrant adapter".into(),
            ))
        }

        async fn count(&self) -> Result<usize> {
            let info = self
                .client
                .collection_info(&self.collection_name)
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant info: {e}")))?;
            Ok(info.result.and_then(|r| r.points_count).unwrap_or(0) as usize)
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            use qdrant_client::qdrant::{DeletePointsBuilder, PointsIdsList};
            let result = self
                .client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection_name)
                        .points(PointsIdsList {
                            ids: vec![id.to_string().into()],
                        })
                        .wait(true),
                )
                .await
                .map_err(|e| crate::error::OapError::Upstream(format!("qdrant delete: {e}")))?;
            Ok(result.result.is_some_and(|r| r.status == 2))
        }
    }

    mod qdrant_json {
        pub fn qdrant_value_to_json(value: &qdrant_client::qdrant::Value) -> serde_json::Value {
            use qdrant_client::qdrant::value::Kind;
            match &value.kind {
                Some(Kind::NullValue(_)) => serde_json::Value::Null,
                Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
                Some(Kind::IntegerValue(i)) => serde_json::json!(*i),
                Some(Kind::DoubleValue(d)) => serde_json::json!(*d),
                Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
                Some(Kind::ListValue(list)) => {
                    serde_json::Value::Array(list.values.iter().map(qdrant_value_to_json).collect())
                }
                Some(Kind::StructValue(s)) => {
                    let obj: serde_json::Map<String, serde_json::Value> = s
                        .fields
                        .iter()
                        .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                        .collect();
                    serde_json::Value::Object(obj)
                }
                None => serde_json::Value::Null,
            }
        }
    }
}
