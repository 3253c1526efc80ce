//! Open Agent Protocol mesh: capability discovery, invocation, and trust
//! attestation for autonomous agents.
//!
//! # Architecture
//!
//! 1. **Capability manifests**: every participating domain serves a
//!    content-hashed [`Manifest`] at `/.well-known/oap.json` describing one
//!    capability and how to invoke it.
//!
//! 2. **Semantic discovery**: [`DiscoveryEngine`] embeds a task description,
//!    ranks candidate manifests via a [`VectorIndex`], and arbitrates between
//!    close candidates with an LLM call before falling back to the raw
//!    nearest vector hit.
//!
//! 3. **Procedural memory**: [`ExperienceEngine`] routes a task through a
//!    three-path state machine (cache hit, partial match, full discovery)
//!    backed by an [`ExperienceStore`] of prior tool-call sequences with
//!    confidence decay.
//!
//! 4. **Safe invocation**: [`Invoker`] executes a manifest's declared
//!    `invoke` spec (HTTP or stdio) behind [`URLGuard`]'s SSRF defenses;
//!    [`ToolExecutor`] wraps it with timeouts, truncation, and summarization.
//!
//! 5. **Trust**: [`trust::AttestationService`] proves domain control (Layer 1,
//!    DNS/HTTP challenge) and optionally live capability behavior (Layer 2),
//!    issuing signed compact JWS attestations other mesh participants can
//!    verify offline via [`trust::KeyManager`]'s JWKS document.
//!
//! # Example
//!
//! ```rust,ignore
//! use oap_mesh::{ContentHash, Manifest};
//!
//! let manifest = Manifest::builder("grep")
//!     .description("search text in files")
//!     .invoke(invoke_spec)
//!     .build()?;
//!
//! let hash = manifest.hash()?;
//! println!("manifest hash: {hash}");
//! ```

pub mod chat_proxy;
pub mod config;
pub mod content_hash;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod experience;
pub mod invoker;
pub mod llm;
pub mod manifest;
pub mod manifest_store;
pub mod observability;
pub mod tool_converter;
pub mod tool_executor;
pub mod trust;
pub mod url_guard;
pub mod vector_index;

#[cfg(feature = "server")]
pub mod api;

pub use chat_proxy::{ChatProxy, ChatProxyConfig, ChatProxyResult};
pub use config::{DiscoveryConfig, TrustConfig};
pub use content_hash::ContentHash;
pub use credentials::CredentialStore;
pub use discovery::{DiscoveryCandidate, DiscoveryEngine, DiscoveryOutcome};
pub use error::{ConfigError, OapError, Result, TrustError};
pub use experience::{DispatchPath, ExperienceEngine, ExperienceRecord, ExperienceStats, ExperienceStore};
pub use invoker::{InvocationResult, InvokeCredential, Invoker};
pub use llm::{ChatMessage, ChatResult, GenerateOptions, GenerateResult, LlmProvider, LlmTelemetry, ScriptedLlm};
pub use manifest::{AuthKind, IoSpec, Invoke, Manifest, ManifestBuilder, ManifestValidator, ValidationReport, OAP_VERSION};
pub use manifest_store::{ManifestRecord, ManifestStore};
pub use observability::{init_tracing, LogFormat};
pub use tool_converter::ToolConverter;
pub use tool_executor::{ExecutionOutcome, ToolExecutor, ToolExecutorConfig};
pub use trust::{
    AttestationService, CapabilityTestRunner, ChallengeKind, ChallengeVerifier, DomainChallenge, KeyManager, TrustStore,
};
pub use url_guard::{SsrfConfig, URLGuard};
pub use vector_index::{InMemoryVectorIndex, VectorHit, VectorIndex, VectorRecord};

#[cfg(feature = "vector-search")]
pub use vector_index::qdrant_backend::QdrantVectorIndex;

#[cfg(feature = "server")]
pub use api::{discovery_router, trust_router, DiscoveryState, TrustState};
