//! `discovery_server`: binds [`oap_mesh::discovery_router`] to the configured
//! address, wiring the manifest store, discovery engine, experience engine,
//! chat proxy, and tool executor from [`oap_mesh::DiscoveryConfig`].
//!
//! # Environment variables
//! - `OAP_CONFIG_FILE`: optional path to a discovery YAML config file.
//! - `OAP_BACKEND_SECRET`: shared secret checked against `X-Backend-Token`
//!   on every route except `/v1/tools` and `/v1/chat`; unset disables it.
//! - `OAP_API_HOST` / `OAP_API_PORT` / `OAP_LLM_*` / ...: see [`oap_mesh::DiscoveryConfig`].
//!
//! Grounded on `dashflow-registry/src/bin/registry_server.rs`'s
//! load-config/init-tracing/build-state/serve-with-graceful-shutdown shape,
//! including its `ExitCode` based error reporting instead of panicking out
//! of `main`.

use oap_mesh::api::state::DiscoveryState;
use oap_mesh::{
    discovery_router, ChatProxy, ChatProxyConfig, CredentialStore, DiscoveryConfig, DiscoveryEngine, ExperienceEngine,
    ExperienceStore, InMemoryVectorIndex, Invoker, LogFormat, ManifestStore, ScriptedLlm, ToolExecutor, ToolExecutorConfig,
    URLGuard,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    oap_mesh::init_tracing(LogFormat::Human);

    let config_path = std::env::var("OAP_CONFIG_FILE").ok();
    let config = match DiscoveryConfig::load(config_path.as_deref().map(std::path::Path::new)) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load discovery config");
            return ExitCode::FAILURE;
        }
    };

    info!(host = %config.api.host, port = config.api.port, "discovery config loaded");

    // No production LlmProvider adapter is wired yet (see DESIGN.md); the
    // deterministic scripted double stands in so the service is still
    // exercisable end-to-end without a live model endpoint.
    let llm = Arc::new(ScriptedLlm::new(256));
    let vector_index = Arc::new(InMemoryVectorIndex::new());
    let manifest_store = Arc::new(ManifestStore::new(vector_index));

    let discovery = Arc::new(DiscoveryEngine::new(
        manifest_store.clone(),
        llm.clone(),
        config.tool_bridge.default_top_k,
        Duration::from_secs(config.tool_bridge.llm_timeout_secs),
    ));

    let experience_store = Arc::new(ExperienceStore::new());
    let experience = Arc::new(ExperienceEngine::new(
        experience_store.clone(),
        llm.clone(),
        config.experience.confidence_threshold,
    ));

    let url_guard = URLGuard::new(Default::default());
    let invoker = Arc::new(Invoker::new(reqwest::Client::new(), url_guard));
    let executor = Arc::new(ToolExecutor::new(
        invoker.clone(),
        llm.clone(),
        ToolExecutorConfig {
            invoke_timeout: Duration::from_secs(config.tool_bridge.http_timeout_secs),
            max_result_bytes: config.tool_bridge.max_tool_result,
            summarize_threshold: config.tool_bridge.summarize_threshold,
            chunk_size: config.tool_bridge.chunk_size,
        },
    ));

    let credentials = Arc::new(match &config.tool_bridge.credentials_file {
        Some(path) => match CredentialStore::load_from_file(std::path::Path::new(path)) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, path, "failed to load credentials file");
                return ExitCode::FAILURE;
            }
        },
        None => CredentialStore::empty(),
    });

    let chat_proxy = Arc::new(ChatProxy::new(
        manifest_store.clone(),
        experience.clone(),
        discovery.clone(),
        executor.clone(),
        llm.clone(),
        credentials.clone(),
        ChatProxyConfig { max_rounds: config.tool_bridge.max_rounds },
    ));

    let backend_secret = std::env::var("OAP_BACKEND_SECRET").ok();

    let state = DiscoveryState::new(
        manifest_store,
        llm,
        discovery,
        experience_store,
        experience,
        chat_proxy,
        executor,
        invoker,
        credentials,
        config.clone(),
        backend_secret,
    );

    let app = discovery_router(state);
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind discovery_server");
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "discovery_server listening");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "discovery_server exited with error");
        return ExitCode::FAILURE;
    }

    info!("discovery_server shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("discovery_server shutting down");
}
