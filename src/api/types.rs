//! Request/response DTOs for both HTTP APIs, per SPEC_FULL.md §6.
//!
//! Grounded on `dashflow-registry/src/api/types.rs`'s pattern of one request
//! struct and one response struct per route, each independently
//! `Deserialize`/`Serialize` rather than reused model types, so a wire-format
//! change in one route never ripples into another.

use crate::discovery::DiscoveryCandidate;
use crate::experience::ExperienceRecord;
use crate::manifest_store::ManifestRecord;
use crate::tool_executor::ExecutionOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_top_k() -> usize {
    5
}

fn default_confidence_threshold() -> f64 {
    0.85
}

fn default_true() -> bool {
    true
}

fn default_max_rounds() -> usize {
    10
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub task: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct CandidateDto {
    pub domain: String,
    pub name: String,
    pub description: String,
    pub distance: f64,
}

impl From<&DiscoveryCandidate> for CandidateDto {
    fn from(candidate: &DiscoveryCandidate) -> Self {
        Self {
            domain: candidate.domain.clone(),
            name: candidate.record.manifest.name.clone(),
            description: candidate.record.manifest.description.clone(),
            distance: candidate.distance,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchDto {
    pub domain: String,
    pub name: String,
    pub description: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoverMeta {
    pub candidates_considered: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub task: String,
    #[serde(rename = "match")]
    pub matched: Option<MatchDto>,
    pub candidates: Vec<CandidateDto>,
    pub meta: DiscoverMeta,
}

#[derive(Debug, Serialize)]
pub struct ManifestSummaryDto {
    pub domain: String,
    pub name: String,
    pub description: String,
}

impl From<&ManifestRecord> for ManifestSummaryDto {
    fn from(record: &ManifestRecord) -> Self {
        Self {
            domain: record.domain.clone(),
            name: record.manifest.name.clone(),
            description: record.manifest.description.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoveryHealthResponse {
    pub status: &'static str,
    pub llm: &'static str,
    pub index_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ToolsRequest {
    pub task: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct RegistryEntryDto {
    pub domain: String,
    pub manifest_name: String,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<Value>,
    pub registry: BTreeMap<String, RegistryEntryDto>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<crate::llm::ChatMessage>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub oap_discover: bool,
    #[serde(default = "default_top_k")]
    pub oap_top_k: usize,
    #[serde(default = "default_true")]
    pub oap_auto_execute: bool,
    #[serde(default = "default_max_rounds")]
    pub oap_max_rounds: usize,
    #[serde(default)]
    pub oap_debug: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: crate::llm::ChatMessage,
    pub oap_tools_injected: Vec<String>,
    pub oap_round: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oap_experience_cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oap_debug: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExperienceInvokeRequest {
    pub task: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct RouteDto {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionOutcomeDto {
    pub success: bool,
    pub output: String,
    pub summarized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExecutionOutcome> for ExecutionOutcomeDto {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            success: outcome.success,
            output: outcome.output,
            summarized: outcome.summarized,
            error: outcome.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExperienceInvokeResponse {
    pub task: String,
    pub route: RouteDto,
    #[serde(rename = "match")]
    pub matched: Option<MatchDto>,
    pub experience: Option<ExperienceRecord>,
    pub invocation_result: Option<ExecutionOutcomeDto>,
    pub candidates: Vec<CandidateDto>,
}

#[derive(Debug, Deserialize)]
pub struct ExperienceRecordsQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ExperienceRecordsPage {
    pub records: Vec<ExperienceRecord>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

#[derive(Debug, Deserialize)]
pub struct AttestDomainRequest {
    pub domain: String,
    #[serde(default)]
    pub method: ChallengeMethod,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMethod {
    #[default]
    Dns,
    Http,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub domain: String,
    pub token: String,
    pub instructions: String,
    pub layer0_passed: bool,
    pub layer0_errors: Vec<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChallengeStatusResponse {
    pub domain: String,
    pub challenge_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttestCapabilityRequest {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct AttestCapabilityResponse {
    pub passed: bool,
    pub attestation: Option<AttestationDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttestationDto {
    pub domain: String,
    pub layer: u8,
    pub jws: String,
    pub manifest_hash: String,
    pub verification_method: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<&crate::trust::trust_store::Attestation> for AttestationDto {
    fn from(a: &crate::trust::trust_store::Attestation) -> Self {
        Self {
            domain: a.domain.clone(),
            layer: a.layer,
            jws: a.jws.clone(),
            manifest_hash: a.manifest_hash.clone(),
            verification_method: a.verification_method.clone(),
            issued_at: a.issued_at,
            expires_at: a.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttestationsResponse {
    pub domain: String,
    pub attestations: Vec<AttestationDto>,
}

#[derive(Debug, Serialize)]
pub struct TrustHealthResponse {
    pub status: &'static str,
    pub attestation_count: usize,
    pub key_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}
