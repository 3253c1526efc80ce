//! Procedural memory: `ExperienceStore` persists records of "this task
//! fingerprint was solved by this tool sequence"; `ExperienceEngine`
//! dispatches a task through the three-path state machine from
//! SPEC_FULL.md §4.8: `cache_hit` (replay a known-good record),
//! `partial_match` (a related record exists but needs re-discovery),
//! `full_discovery` (nothing close enough is on file).
//!
//! Grounded on `dashflow-registry/src/metadata.rs`'s DashMap-backed indexed
//! store shape, replacing its domain-name index with fingerprint/domain/
//! confidence indexes per the experience-record fields SPEC_FULL.md names.

use crate::llm::{extract_json_object, GenerateOptions, LlmProvider};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub id: String,
    /// Dotted hierarchical tag (`verb.category.specific_action`) the
    /// fingerprinter LLM assigned to this task, per SPEC_FULL.md §3.
    pub fingerprint: String,
    /// `broad.narrow` intent classification the fingerprinter returned
    /// alongside the fingerprint; used (via its first two dotted fingerprint
    /// segments) to find same-domain records for the `partial_match` path.
    pub intent_domain: String,
    /// Domain of the manifest this record's invocation was matched to.
    pub domain: String,
    pub task_description: String,
    pub tool_calls: Vec<Value>,
    pub confidence: f64,
    pub use_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

const FINGERPRINT_SYSTEM_PROMPT: &str = "You are tagging a user task with a deterministic intent \
fingerprint. Respond with strict JSON of the form \
{\"fingerprint\": \"verb.category.specific_action\", \"domain\": \"broad.narrow\"} using lowercase \
dotted identifiers. The same task must always produce the same fingerprint and domain.";

/// Result of fingerprinting a task via the LLM, per SPEC_FULL.md §4.8's
/// `fingerprint_intent(task)` step. `None` (an LLM error, or a reply that
/// fails to parse) routes straight to `full_discovery`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFingerprint {
    pub fingerprint: String,
    pub domain: String,
}

impl TaskFingerprint {
    /// First two dotted segments of the fingerprint, used as the `LIKE
    /// prefix%` match for `find_similar`.
    pub fn prefix(&self) -> String {
        self.fingerprint.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
    }
}

#[derive(Deserialize)]
struct FingerprinterReply {
    fingerprint: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

/// Ask the LLM to fingerprint `task_description`, temperature 0, JSON mode,
/// "thinking" suppressed, so the same task always yields the same tag (§3,
/// invariant 9). Any LLM error or unparseable/empty reply is `None`.
pub async fn fingerprint_intent(llm: &dyn LlmProvider, task_description: &str) -> Option<TaskFingerprint> {
    let prompt = format!("{FINGERPRINT_SYSTEM_PROMPT}\n\nTask: {task_description}");
    let opts = GenerateOptions {
        temperature: 0.0,
        json_mode: true,
        suppress_thinking: true,
        timeout: std::time::Duration::from_secs(30),
    };
    let result = llm.generate(&prompt, &opts).await.ok()?;
    let json_slice = extract_json_object(&result.text)?;
    let reply: FingerprinterReply = serde_json::from_str(json_slice).ok()?;
    let fingerprint = reply.fingerprint.filter(|f| !f.is_empty())?;
    let domain = reply.domain.unwrap_or_else(|| "unknown.unknown".to_string());
    Some(TaskFingerprint { fingerprint, domain })
}

pub struct ExperienceStore {
    records: DashMap<String, ExperienceRecord>,
}

impl ExperienceStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// `exp_YYYYMMDD_<hex8>` where `hex8` is the first 8 hex characters of
    /// `sha256("{fingerprint}:{manifest_domain}")`, so two records for the
    /// same `(fingerprint, manifest)` pair on the same UTC day deterministically
    /// collide onto the same id (§3, §5, §9 "Deterministic IDs") — this is
    /// what makes `save` an idempotent create-or-update.
    pub fn next_id(&self, now: DateTime<Utc>, fingerprint: &str, manifest_domain: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{fingerprint}:{manifest_domain}").as_bytes());
        let digest = hasher.finalize();
        format!("exp_{}_{}", now.format("%Y%m%d"), hex::encode(&digest[..4]))
    }

    pub fn save(&self, record: ExperienceRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<ExperienceRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<ExperienceRecord> {
        self.records
            .iter()
            .find(|r| r.fingerprint == fingerprint)
            .map(|r| r.clone())
    }

    /// Records sharing `intent_domain` whose fingerprint starts with
    /// `fingerprint_prefix`, ranked by confidence descending. Used for the
    /// `partial_match` path per SPEC_FULL.md §4.7's `find_similar`.
    pub fn find_similar(&self, intent_domain: &str, fingerprint_prefix: &str) -> Vec<ExperienceRecord> {
        let mut matches: Vec<ExperienceRecord> = self
            .records
            .iter()
            .filter(|r| r.intent_domain == intent_domain && r.fingerprint.starts_with(fingerprint_prefix))
            .map(|r| r.clone())
            .collect();
        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        matches
    }

    pub fn touch(&self, id: &str, at: DateTime<Utc>) -> bool {
        if let Some(mut record) = self.records.get_mut(id) {
            record.use_count += 1;
            record.last_used_at = at;
            true
        } else {
            false
        }
    }

    /// Lower confidence after a replay failed: `confidence *= factor` (default
    /// 0.7, so a 0.90 record drops to 0.63), per SPEC_FULL.md §3's degrade
    /// invariant. Returns the new confidence, or `None` if the id is unknown.
    pub fn degrade_confidence(&self, id: &str, factor: f64) -> Option<f64> {
        self.records.get_mut(id).map(|mut record| {
            record.confidence *= factor;
            record.confidence
        })
    }

    pub fn list_all(&self) -> Vec<ExperienceRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    pub fn delete(&self, id: &str) -> Option<ExperienceRecord> {
        self.records.remove(id).map(|(_, v)| v)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// `confidence_threshold` is reused as the success bar: a record at or
    /// above it is counted as a successful outcome, since confidence only
    /// drops below it via [`Self::degrade_confidence`] on a replay failure.
    pub fn stats(&self, confidence_threshold: f64) -> ExperienceStats {
        let total = self.records.len();
        let avg_confidence = if total == 0 {
            0.0
        } else {
            self.records.iter().map(|r| r.confidence).sum::<f64>() / total as f64
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            self.records.iter().filter(|r| r.confidence >= confidence_threshold).count() as f64 / total as f64
        };

        let mut domain_counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for r in self.records.iter() {
            *domain_counts.entry(r.domain.clone()).or_insert(0) += 1;
        }
        let mut top_domains: Vec<(String, u64)> = domain_counts.into_iter().collect();
        top_domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_domains.truncate(5);

        ExperienceStats {
            total_records: total,
            average_confidence: avg_confidence,
            success_rate,
            // In the current single-domain-per-record model the manifest
            // matched and the domain dispatched to are the same thing.
            top_manifests: top_domains.clone(),
            top_domains,
        }
    }
}

impl Default for ExperienceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExperienceStats {
    #[serde(rename = "total")]
    pub total_records: usize,
    #[serde(rename = "avg_confidence")]
    pub average_confidence: f64,
    pub success_rate: f64,
    pub top_domains: Vec<(String, u64)>,
    pub top_manifests: Vec<(String, u64)>,
}

/// Outcome of dispatching a task through the three-path state machine.
#[derive(Clone)]
pub enum DispatchPath {
    /// Exact fingerprint match above the confidence threshold: replay its
    /// tool_calls verbatim without re-running discovery.
    CacheHit(ExperienceRecord),
    /// No exact match, but a same-domain record exists: reuse the domain
    /// (skip discovery) while re-deriving the concrete tool call.
    PartialMatch(ExperienceRecord),
    /// Nothing usable on file: run discovery from scratch.
    FullDiscovery,
}

pub struct ExperienceEngine {
    store: std::sync::Arc<ExperienceStore>,
    llm: std::sync::Arc<dyn LlmProvider>,
    confidence_threshold: f64,
}

impl ExperienceEngine {
    pub fn new(store: std::sync::Arc<ExperienceStore>, llm: std::sync::Arc<dyn LlmProvider>, confidence_threshold: f64) -> Self {
        Self {
            store,
            llm,
            confidence_threshold,
        }
    }

    pub fn store(&self) -> &std::sync::Arc<ExperienceStore> {
        &self.store
    }

    /// Lower `id`'s confidence by the default 0.7 factor after a cached
    /// replay's tool call errors, per SPEC_FULL.md §4.9 step 5.
    pub fn degrade_confidence(&self, id: &str) -> Option<f64> {
        self.store.degrade_confidence(id, 0.7)
    }

    pub async fn route(&self, task_description: &str) -> DispatchPath {
        self.route_with_threshold(task_description, self.confidence_threshold).await
    }

    /// Same as [`Self::route`] but with a per-call confidence threshold
    /// override, for API callers that want to test against a stricter or
    /// looser bar than the engine's configured default.
    pub async fn route_with_threshold(&self, task_description: &str, confidence_threshold: f64) -> DispatchPath {
        let Some(fp) = fingerprint_intent(self.llm.as_ref(), task_description).await else {
            return DispatchPath::FullDiscovery;
        };

        if let Some(record) = self.store.find_by_fingerprint(&fp.fingerprint) {
            if record.confidence >= confidence_threshold {
                return DispatchPath::CacheHit(record);
            }
        }

        let prefix = fp.prefix();
        if let Some(record) = self.store.find_similar(&fp.domain, &prefix).into_iter().next() {
            return DispatchPath::PartialMatch(record);
        }

        DispatchPath::FullDiscovery
    }

    pub async fn record_success(
        &self,
        task_description: &str,
        domain: &str,
        tool_calls: Vec<Value>,
        now: DateTime<Utc>,
    ) -> ExperienceRecord {
        let fp = fingerprint_intent(self.llm.as_ref(), task_description)
            .await
            .unwrap_or_else(|| TaskFingerprint {
                fingerprint: "unknown.unknown.unknown".to_string(),
                domain: "unknown.unknown".to_string(),
            });
        let record = ExperienceRecord {
            id: self.store.next_id(now, &fp.fingerprint, domain),
            fingerprint: fp.fingerprint,
            intent_domain: fp.domain,
            domain: domain.to_string(),
            task_description: task_description.to_string(),
            tool_calls,
            confidence: 1.0,
            use_count: 1,
            created_at: now,
            last_used_at: now,
        };
        self.store.save(record.clone());
        record
    }
}


impl std::fmt::Debug for DispatchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchPath::CacheHit(r) => write!(f, "CacheHit({})", r.id),
            DispatchPath::PartialMatch(r) => write!(f, "PartialMatch({})", r.id),
            DispatchPath::FullDiscovery => write!(f, "FullDiscovery"),
        }
    }
}
