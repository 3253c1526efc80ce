//! `DiscoveryEngine::discover`: embed the task, pull the top-K nearest
//! manifests from the vector index, then arbitrate with an LLM call
//! (temperature 0, JSON mode) before falling back to the raw top vector hit.
//!
//! Grounded on `dashflow-registry/src/search.rs`'s embed-then-rank pipeline,
//! generalized per SPEC_FULL.md §4.4 with an LLM arbitration step the
//! teacher's package search doesn't have.

use crate::llm::{extract_json_object, GenerateOptions, LlmProvider};
use crate::manifest_store::{ManifestRecord, ManifestStore};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const ARBITER_SYSTEM_PROMPT: &str = "You are selecting the single best capability for a task from a \
list of candidates. Respond with strict JSON of the form \
{\"pick\": \"<domain>\" or null, \"reason\": \"<short reason>\"}. Pick null only if none of the \
candidates can plausibly accomplish the task.";

#[derive(Clone, Debug)]
pub struct DiscoveryCandidate {
    pub domain: String,
    pub record: ManifestRecord,
    /// Cosine distance from the vector index; lower is a closer match.
    pub distance: f64,
}

#[derive(Clone, Debug)]
pub enum DiscoveryOutcome {
    /// The arbiter (or the sole candidate) picked a domain.
    Picked {
        candidate: DiscoveryCandidate,
        arbiter_reason: Option<String>,
    },
    /// No manifest in the index is a plausible match.
    NoMatch,
}

#[derive(Deserialize)]
struct ArbiterReply {
    pick: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct DiscoveryEngine {
    store: Arc<ManifestStore>,
    llm: Arc<dyn LlmProvider>,
    top_k: usize,
    llm_timeout: Duration,
}

impl DiscoveryEngine {
    pub fn new(store: Arc<ManifestStore>, llm: Arc<dyn LlmProvider>, top_k: usize, llm_timeout: Duration) -> Self {
        Self {
            store,
            llm,
            top_k,
            llm_timeout,
        }
    }

    pub async fn discover(&self, task: &str) -> crate::error::Result<DiscoveryOutcome> {
        let candidates = self.gather_candidates(task, self.top_k).await?;
        self.arbitrate_candidates(task, candidates).await
    }

    /// Same as [`Self::discover`] but also returns the full candidate list
    /// considered, for API responses that surface `candidates[]` alongside
    /// the picked match.
    pub async fn discover_with_candidates(
        &self,
        task: &str,
    ) -> crate::error::Result<(DiscoveryOutcome, Vec<DiscoveryCandidate>)> {
        self.discover_with_top_k(task, self.top_k).await
    }

    /// Same as [`Self::discover_with_candidates`] but with a per-request
    /// `top_k` override, for routes that accept a `top_k` field instead of
    /// relying on the engine's constructed default.
    pub async fn discover_with_top_k(
        &self,
        task: &str,
        top_k: usize,
    ) -> crate::error::Result<(DiscoveryOutcome, Vec<DiscoveryCandidate>)> {
        let candidates = self.gather_candidates(task, top_k).await?;
        let outcome = self.arbitrate_candidates(task, candidates.clone()).await?;
        Ok((outcome, candidates))
    }

    async fn gather_candidates(&self, task: &str, top_k: usize) -> crate::error::Result<Vec<DiscoveryCandidate>> {
        let (embedding, _telemetry) = self.llm.embed(task).await?;
        let hits = self.store.vector_index().query(&embedding, top_k).await?;

        let mut candidates = Vec::new();
        for hit in hits {
            if let Some(record) = self.store.get(&hit.id) {
                candidates.push(DiscoveryCandidate {
                    domain: hit.id,
                    record,
                    distance: hit.score,
                });
            }
        }
        Ok(candidates)
    }

    async fn arbitrate_candidates(
        &self,
        task: &str,
        candidates: Vec<DiscoveryCandidate>,
    ) -> crate::error::Result<DiscoveryOutcome> {
        if candidates.is_empty() {
            return Ok(DiscoveryOutcome::NoMatch);
        }
        if candidates.len() == 1 {
            let only = candidates.into_iter().next().unwrap();
            return Ok(DiscoveryOutcome::Picked {
                candidate: only,
                arbiter_reason: None,
            });
        }

        match self.arbitrate(task, &candidates).await {
            ArbiterResult::Picked(domain, reason) => {
                if let Some(candidate) = candidates.iter().find(|c| c.domain == domain) {
                    return Ok(DiscoveryOutcome::Picked {
                        candidate: candidate.clone(),
                        arbiter_reason: reason,
                    });
                }
                // Arbiter named a domain outside the candidate set: fall back
                // to the closest vector match rather than trust it blindly.
                Ok(Self::fallback_to_top_hit(candidates))
            }
            // Explicit `pick: null` from the arbiter: none of the candidates
            // plausibly answer the task. Distinct from `Unavailable` below —
            // this is a considered "no" answer, not a missing one.
            ArbiterResult::NoMatch => Ok(DiscoveryOutcome::NoMatch),
            // LLM call errored or its reply didn't parse: fall back to the
            // raw vector ranking rather than treat silence as "no match".
            ArbiterResult::Unavailable => Ok(Self::fallback_to_top_hit(candidates)),
        }
    }

    /// Used whenever the LLM arbiter errors, fails to parse, or names a
    /// domain outside the candidate set — the reason string must contain
    /// "vector similarity" per SPEC_FULL.md §4.4 / S2.
    fn fallback_to_top_hit(mut candidates: Vec<DiscoveryCandidate>) -> DiscoveryOutcome {
        candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        DiscoveryOutcome::Picked {
            candidate: candidates.remove(0),
            arbiter_reason: Some("Selected by vector similarity (LLM reasoning unavailable)".to_string()),
        }
    }

    async fn arbitrate(&self, task: &str, candidates: &[DiscoveryCandidate]) -> ArbiterResult {
        let listing = candidates
            .iter()
            .map(|c| {
                format!(
                    "- domain: {}\n  name: {}\n  description: {}",
                    c.domain, c.record.manifest.name, c.record.manifest.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "{ARBITER_SYSTEM_PROMPT}\n\nTask: {task}\n\nCandidates:\n{listing}"
        );

        let opts = GenerateOptions {
            temperature: 0.0,
            json_mode: true,
            suppress_thinking: true,
            timeout: self.llm_timeout,
        };

        let result = match self.llm.generate(&prompt, &opts).await {
            Ok(r) => r,
            Err(_) => return ArbiterResult::Unavailable,
        };

        let Some(json_slice) = extract_json_object(&result.text) else {
            return ArbiterResult::Unavailable;
        };
        let reply: ArbiterReply = match serde_json::from_str(json_slice) {
            Ok(r) => r,
            Err(_) => return ArbiterResult::Unavailable,
        };
        match reply.pick {
            Some(pick) => ArbiterResult::Picked(pick, reply.reason),
            None => ArbiterResult::NoMatch,
        }
    }
}

/// Distinguishes an explicit arbiter "no candidate fits" from an LLM call
/// that errored or returned an unparseable reply — only the latter falls
/// back to raw vector ranking (SPEC_FULL.md §4.4 step 5).
enum ArbiterResult {
    Picked(String, Option<String>),
    NoMatch,
    Unavailable,
}
