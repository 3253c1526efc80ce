//! `ManifestStore`: domain-keyed persistence of manifests, backed by an
//! in-process map plus a [`VectorIndex`] for semantic candidates.
//!
//! Grounded on `dashflow-registry/src/metadata.rs`'s `MetadataStore` shape
//! (domain-keyed records, last-seen timestamps), replacing its Postgres
//! backing with `DashMap` per DESIGN.md's decision to drop `tokio-postgres`.

use crate::content_hash::ContentHash;
use crate::error::{OapError, Result};
use crate::manifest::Manifest;
use crate::vector_index::VectorIndex;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct ManifestRecord {
    pub domain: String,
    pub manifest: Manifest,
    pub hash: ContentHash,
    pub discovered_at: DateTime<Utc>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// Keyed by domain (per spec.md: one manifest per publishing domain). Holds
/// the manifest records directly and mirrors embeddings into a
/// [`VectorIndex`] so `DiscoveryEngine` can run semantic search over the
/// same store.
pub struct ManifestStore {
    records: DashMap<String, ManifestRecord>,
    vector_index: Arc<dyn VectorIndex>,
}

impl ManifestStore {
    pub fn new(vector_index: Arc<dyn VectorIndex>) -> Self {
        Self {
            records: DashMap::new(),
            vector_index,
        }
    }

    /// Insert or replace the manifest for `domain`, also upserting its
    /// embedding into the vector index keyed by the same domain.
    pub async fn put(&self, domain: &str, manifest: Manifest, embedding: Vec<f32>) -> Result<ContentHash> {
        let hash = manifest.hash()?;
        let document = format!("{}: {}", manifest.name, manifest.description);
        let metadata = json!({
            "domain": domain,
            "name": manifest.name,
            "tags": manifest.tags,
        });
        self.vector_index
            .upsert(domain, embedding, metadata, document)
            .await?;

        self.records.insert(
            domain.to_string(),
            ManifestRecord {
                domain: domain.to_string(),
                manifest,
                hash: hash.clone(),
                discovered_at: Utc::now(),
                last_verified_at: None,
            },
        );
        Ok(hash)
    }

    pub fn get(&self, domain: &str) -> Option<ManifestRecord> {
        self.records.get(domain).map(|r| r.clone())
    }

    pub fn get_or_err(&self, domain: &str) -> Result<ManifestRecord> {
        self.get(domain)
            .ok_or_else(|| OapError::NotFound(format!("no manifest known for domain {domain}")))
    }

    pub fn mark_verified(&self, domain: &str, at: DateTime<Utc>) -> bool {
        if let Some(mut record) = self.records.get_mut(domain) {
            record.last_verified_at = Some(at);
            true
        } else {
            false
        }
    }

    pub fn remove(&self, domain: &str) -> Option<ManifestRecord> {
        self.records.remove(domain).map(|(_, v)| v)
    }

    pub fn list(&self) -> Vec<ManifestRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.records.contains_key(domain)
    }

    pub fn vector_index(&self) -> Arc<dyn VectorIndex> {
        self.vector_index.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Invoke;
    use crate::vector_index::InMemoryVectorIndex;

    fn sample_manifest(name: &str) -> Manifest {
        Manifest::builder(name)
            .description("does a thing")
            .invoke(Invoke {
                method: "GET".into(),
                url: "https://example.com/capability".into(),
                auth: Default::default(),
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = ManifestStore::new(Arc::new(InMemoryVectorIndex::new()));
        let manifest = sample_manifest("grep");
        store
            .put("grep.example.com", manifest.clone(), vec![1.0, 0.0])
            .await
            .unwrap();

        let record = store.get_or_err("grep.example.com").unwrap();
        assert_eq!(record.manifest.name, "grep");
        assert_eq!(record.domain, "grep.example.com");
    }

    #[tokio::test]
    async fn get_or_err_reports_not_found() {
        let store = ManifestStore::new(Arc::new(InMemoryVectorIndex::new()));
        let err = store.get_or_err("missing.example.com").unwrap_err();
        assert!(matches!(err, OapError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_upserts_vector_index_entry() {
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let store = ManifestStore::new(vector_index.clone());
        store
            .put("grep.example.com", sample_manifest("grep"), vec![1.0, 0.0])
            .await
            .unwrap();
        assert_eq!(vector_index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_verified_updates_existing_record() {
        let store = ManifestStore::new(Arc::new(InMemoryVectorIndex::new()));
        store
            .put("grep.example.com", sample_manifest("grep"), vec![1.0])
            .await
            .unwrap();
        let now = Utc::now();
        assert!(store.mark_verified("grep.example.com", now));
        assert_eq!(store.get("grep.example.com").unwrap().last_verified_at, Some(now));
        assert!(!store.mark_verified("missing.example.com", now));
    }

    #[tokio::test]
    async fn remove_deletes_record() {
        let store = ManifestStore::new(Arc::new(InMemoryVectorIndex::new()));
        store
            .put("grep.example.com", sample_manifest("grep"), vec![1.0])
            .await
            .unwrap();
        assert!(store.remove("grep.example.com").is_some());
        assert!(!store.contains("grep.example.com"));
    }
}
