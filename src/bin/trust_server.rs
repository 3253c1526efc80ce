//! `trust_server`: binds [`oap_mesh::trust_router`] to the configured
//! address, wiring the key manager, trust store, and attestation service
//! from [`oap_mesh::TrustConfig`].
//!
//! # Environment variables
//! - `OAP_CONFIG_FILE`: optional path to a trust YAML config file.
//! - `OAP_KEYS_PATH` / `OAP_ATTESTATION_*` / `OAP_API_*`: see
//!   [`oap_mesh::TrustConfig`].
//!
//! Grounded on `dashflow-registry/src/bin/registry_server.rs`'s
//! load-config/init-tracing/build-state/serve-with-graceful-shutdown shape
//! and its `ExitCode` based error reporting.

use oap_mesh::api::state::TrustState;
use oap_mesh::{
    trust_router, AttestationService, CapabilityTestRunner, ChallengeVerifier, KeyManager, LogFormat, SsrfConfig,
    TrustConfig, TrustStore, URLGuard,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    oap_mesh::init_tracing(LogFormat::Human);

    let config_path = std::env::var("OAP_CONFIG_FILE").ok();
    let config = match TrustConfig::load(config_path.as_deref().map(std::path::Path::new)) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load trust config");
            return ExitCode::FAILURE;
        }
    };

    info!(host = %config.api.host, port = config.api.port, "trust config loaded");

    let key_path = std::path::Path::new(&config.keys.path).join("signing-key.pem");
    let key_manager = match KeyManager::load_or_generate(&key_path, "trust-key-1") {
        Ok(k) => Arc::new(k),
        Err(e) => {
            error!(error = %e, path = %key_path.display(), "failed to load or generate signing key");
            return ExitCode::FAILURE;
        }
    };

    let trust_store = Arc::new(TrustStore::new());

    let runner = CapabilityTestRunner::new(reqwest::Client::new(), URLGuard::new(SsrfConfig::default()));
    let verifier = ChallengeVerifier::new(reqwest::Client::new(), URLGuard::new(SsrfConfig::default()));
    let attestation_service = Arc::new(AttestationService::with_config(
        runner,
        verifier,
        key_manager.clone(),
        trust_store.clone(),
        config.attestation.layer1_expiry_days,
        config.attestation.layer2_expiry_days,
        config.attestation.challenge_ttl_seconds,
        config.attestation.max_manifest_size,
    ));

    let state = TrustState::new(key_manager, trust_store, attestation_service, config.clone());

    let app = trust_router(state);
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind trust_server");
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "trust_server listening");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "trust_server exited with error");
        return ExitCode::FAILURE;
    }

    info!("trust_server shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("trust_server shutting down");
}
