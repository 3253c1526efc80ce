//! YAML + environment-variable configuration for both binaries.
//!
//! Grounded on `original_source/reference/oap_discovery/oap_discovery/config.py`
//! and `oap_trust/oap_trust/config.py`: a tree of section structs, loaded from
//! an optional YAML file and then overridden field-by-field from
//! `OAP_<SECTION>_<KEY>` environment variables. Unknown YAML keys are ignored
//! (serde's default behavior without `deny_unknown_fields`), matching the
//! reference's permissive config loading.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn parse_bool_env(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Apply a single `OAP_<SECTION>_<KEY>` override if the env var is set.
fn env_override<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_bool_override(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_bool_env(&v))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSectionConfig {
    pub base_url: String,
    pub embed_model: String,
    pub generate_model: String,
    pub timeout_secs: u64,
    pub num_ctx: u32,
    pub keep_alive: String,
}

impl Default for LlmSectionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            embed_model: "nomic-embed-text".into(),
            generate_model: "llama3.1".into(),
            timeout_secs: 60,
            num_ctx: 4096,
            keep_alive: "5m".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSectionConfig {
    pub path: String,
    pub collection: String,
}

impl Default for VectorSectionConfig {
    fn default() -> Self {
        Self {
            path: "./data/vector_index".into(),
            collection: "oap_manifests".into(),
        }
    }
}

/// Carried for a future crawler binary even though this crate builds no
/// crawler (spec.md Non-goals / SPEC_FULL.md §AMBIENT STACK).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSectionConfig {
    pub seeds_file: Option<String>,
    pub seeds_dir: Option<String>,
    pub interval_secs: u64,
    pub concurrency: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for CrawlerSectionConfig {
    fn default() -> Self {
        Self {
            seeds_file: None,
            seeds_dir: None,
            interval_secs: 3600,
            concurrency: 4,
            user_agent: "oap-mesh-crawler/0.1".into(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSectionConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceSectionConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub max_records: usize,
    pub invoke_timeout_secs: u64,
    pub stdio_timeout_secs: u64,
}

impl Default for ExperienceSectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.85,
            max_records: 100_000,
            invoke_timeout_secs: 30,
            stdio_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBridgeSectionConfig {
    pub enabled: bool,
    pub default_top_k: usize,
    pub max_rounds: usize,
    pub llm_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub stdio_timeout_secs: u64,
    pub credentials_file: Option<String>,
    pub max_tool_result: usize,
    pub summarize_threshold: usize,
    pub chunk_size: usize,
}

impl Default for ToolBridgeSectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_top_k: 5,
            max_rounds: 10,
            llm_timeout_secs: 120,
            http_timeout_secs: 30,
            stdio_timeout_secs: 30,
            credentials_file: None,
            max_tool_result: 4000,
            summarize_threshold: 8000,
            chunk_size: 4000,
        }
    }
}

impl Default for ApiSectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Config tree for `discovery_server`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub llm: LlmSectionConfig,
    pub vector: VectorSectionConfig,
    pub crawler: CrawlerSectionConfig,
    pub api: ApiSectionConfig,
    pub experience: ExperienceSectionConfig,
    pub tool_bridge: ToolBridgeSectionConfig,
}

impl DiscoveryConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p).map_err(|e| ConfigError::Read {
                    path: p.display().to_string(),
                    source: e,
                })?;
                serde_yml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("OAP_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env_override("OAP_LLM_EMBED_MODEL") {
            self.llm.embed_model = v;
        }
        if let Some(v) = env_override("OAP_LLM_GENERATE_MODEL") {
            self.llm.generate_model = v;
        }
        if let Some(v) = env_override("OAP_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = v;
        }
        if let Some(v) = env_override("OAP_VECTOR_PATH") {
            self.vector.path = v;
        }
        if let Some(v) = env_override("OAP_VECTOR_COLLECTION") {
            self.vector.collection = v;
        }
        if let Some(v) = env_override("OAP_API_HOST") {
            self.api.host = v;
        }
        if let Some(v) = env_override("OAP_API_PORT") {
            self.api.port = v;
        }
        if let Some(v) = env_bool_override("OAP_EXPERIENCE_ENABLED") {
            self.experience.enabled = v;
        }
        if let Some(v) = env_override("OAP_EXPERIENCE_CONFIDENCE_THRESHOLD") {
            self.experience.confidence_threshold = v;
        }
        if let Some(v) = env_bool_override("OAP_TOOL_BRIDGE_ENABLED") {
            self.tool_bridge.enabled = v;
        }
        if let Some(v) = env_override("OAP_TOOL_BRIDGE_MAX_ROUNDS") {
            self.tool_bridge.max_rounds = v;
        }
        if let Some(v) = env_override("OAP_TOOL_BRIDGE_CREDENTIALS_FILE") {
            self.tool_bridge.credentials_file = Some(v);
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSectionConfig {
    pub path: String,
    pub rotation_days: u32,
}

impl Default for KeysSectionConfig {
    fn default() -> Self {
        Self {
            path: "./data/keys".into(),
            rotation_days: 365,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationSectionConfig {
    pub layer1_expiry_days: i64,
    pub layer2_expiry_days: i64,
    pub challenge_ttl_seconds: i64,
    pub request_timeout_secs: u64,
    pub max_manifest_size: usize,
}

impl Default for AttestationSectionConfig {
    fn default() -> Self {
        Self {
            layer1_expiry_days: 90,
            layer2_expiry_days: 7,
            challenge_ttl_seconds: 3600,
            request_timeout_secs: 10,
            max_manifest_size: 1_048_576,
        }
    }
}

/// Config tree for `trust_server`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub keys: KeysSectionConfig,
    pub attestation: AttestationSectionConfig,
    pub api: ApiSectionConfig,
}

impl TrustConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p).map_err(|e| ConfigError::Read {
                    path: p.display().to_string(),
                    source: e,
                })?;
                serde_yml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("OAP_KEYS_PATH") {
            self.keys.path = v;
        }
        if let Some(v) = env_override("OAP_KEYS_ROTATION_DAYS") {
            self.keys.rotation_days = v;
        }
        if let Some(v) = env_override("OAP_ATTESTATION_LAYER1_EXPIRY_DAYS") {
            self.attestation.layer1_expiry_days = v;
        }
        if let Some(v) = env_override("OAP_ATTESTATION_LAYER2_EXPIRY_DAYS") {
            self.attestation.layer2_expiry_days = v;
        }
        if let Some(v) = env_override("OAP_ATTESTATION_CHALLENGE_TTL_SECONDS") {
            self.attestation.challenge_ttl_seconds = v;
        }
        if let Some(v) = env_override("OAP_API_HOST") {
            self.api.host = v;
        }
        if let Some(v) = env_override("OAP_API_PORT") {
            self.api.port = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_defaults_are_sane() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.experience.confidence_threshold, 0.85);
        assert_eq!(config.tool_bridge.max_rounds, 10);
    }

    #[test]
    fn trust_defaults_match_spec_expiries() {
        let config = TrustConfig::default();
        assert_eq!(config.attestation.layer1_expiry_days, 90);
        assert_eq!(config.attestation.layer2_expiry_days, 7);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = DiscoveryConfig::load(Some(Path::new("/nonexistent/oap.yaml"))).unwrap();
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn load_parses_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.yaml");
        std::fs::write(&path, "api:\n  port: 9090\nexperience:\n  confidence_threshold: 0.5\n")
            .unwrap();
        let config = DiscoveryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.experience.confidence_threshold, 0.5);
    }

    #[test]
    fn env_override_wins_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.yaml");
        std::fs::write(&path, "api:\n  port: 7000\n").unwrap();
        std::env::set_var("OAP_API_PORT", "7500");
        let config = TrustConfig::load(Some(&path)).unwrap();
        std::env::remove_var("OAP_API_PORT");
        assert_eq!(config.api.port, 7500);
    }

    #[test]
    fn bool_env_override_accepts_yes_case_insensitively() {
        std::env::set_var("OAP_EXPERIENCE_ENABLED", "Yes");
        let config = DiscoveryConfig::load(None).unwrap();
        std::env::remove_var("OAP_EXPERIENCE_ENABLED");
        assert!(config.experience.enabled);
    }

    #[test]
    fn unknown_yaml_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.yaml");
        std::fs::write(&path, "totally_unknown_section:\n  foo: bar\n").unwrap();
        assert!(DiscoveryConfig::load(Some(&path)).is_ok());
    }
}
