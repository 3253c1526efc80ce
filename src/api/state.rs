//! Shared state for the discovery and trust axum routers.
//!
//! Grounded on `dashflow-registry/src/api/state.rs`'s `AppState` shape (a
//! plain struct of `Arc`-wrapped services, constructed once by the binary
//! and handed to axum via `State<T>`), split into two states because the
//! discovery and trust services share no runtime dependencies per
//! SPEC_FULL.md §5 ("no module-level global statics").

use crate::chat_proxy::ChatProxy;
use crate::config::{DiscoveryConfig, TrustConfig};
use crate::credentials::CredentialStore;
use crate::discovery::DiscoveryEngine;
use crate::experience::{ExperienceEngine, ExperienceStore};
use crate::invoker::Invoker;
use crate::llm::LlmProvider;
use crate::manifest_store::ManifestStore;
use crate::tool_executor::ToolExecutor;
use crate::trust::{AttestationService, KeyManager, TrustStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct DiscoveryState {
    pub manifest_store: Arc<ManifestStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub discovery: Arc<DiscoveryEngine>,
    pub experience_store: Arc<ExperienceStore>,
    pub experience: Arc<ExperienceEngine>,
    pub chat_proxy: Arc<ChatProxy>,
    pub executor: Arc<ToolExecutor>,
    pub invoker: Arc<Invoker>,
    pub credentials: Arc<CredentialStore>,
    pub config: Arc<DiscoveryConfig>,
    /// Shared secret checked against `X-Backend-Token` when set, per
    /// SPEC_FULL.md §6; `None` disables the backend-auth middleware.
    pub backend_secret: Option<String>,
}

impl DiscoveryState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest_store: Arc<ManifestStore>,
        llm: Arc<dyn LlmProvider>,
        discovery: Arc<DiscoveryEngine>,
        experience_store: Arc<ExperienceStore>,
        experience: Arc<ExperienceEngine>,
        chat_proxy: Arc<ChatProxy>,
        executor: Arc<ToolExecutor>,
        invoker: Arc<Invoker>,
        credentials: Arc<CredentialStore>,
        config: Arc<DiscoveryConfig>,
        backend_secret: Option<String>,
    ) -> Self {
        Self {
            manifest_store,
            llm,
            discovery,
            experience_store,
            experience,
            chat_proxy,
            executor,
            invoker,
            credentials,
            config,
            backend_secret,
        }
    }
}

#[derive(Clone)]
pub struct TrustState {
    pub key_manager: Arc<KeyManager>,
    pub trust_store: Arc<TrustStore>,
    pub attestation_service: Arc<AttestationService>,
    pub config: Arc<TrustConfig>,
}

impl TrustState {
    pub fn new(
        key_manager: Arc<KeyManager>,
        trust_store: Arc<TrustStore>,
        attestation_service: Arc<AttestationService>,
        config: Arc<TrustConfig>,
    ) -> Self {
        Self {
            key_manager,
            trust_store,
            attestation_service,
            config,
        }
    }
}
