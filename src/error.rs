//! Shared error kinds for the discovery and trust services.
//!
//! Mirrors the seven kinds in the design notes: `InvalidRequest`,
//! `Forbidden`, `NotFound`, `Timeout`, `Upstream`, `Transient`, `Internal`.
//! Policy: `InvalidRequest`/`Forbidden`/`NotFound` surface immediately with
//! an HTTP status and message; `Upstream`/`Transient` are recovered locally
//! by the caller's fallback ladder and only ever reach a client as degraded
//! content, never as a raw error. Credential and key material must never be
//! interpolated into any variant's message.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OapError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OapError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for OapError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OapError::Timeout(e.to_string())
        } else {
            OapError::Upstream(e.to_string())
        }
    }
}

/// Configuration loading failures, kept distinct from [`OapError`] so a
/// misconfigured binary fails fast with a precise message before any
/// server state exists to wrap it in.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("invalid environment override {key}: {message}")]
    EnvOverride { key: String, message: String },
}

/// Trust-specific rejection reasons that must stay distinguishable from a
/// generic signature failure (see SPEC_FULL.md §7: expired-JWS rejection is
/// a programmer-noticeable exception type distinct from signature-mismatch
/// rejection).
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("attestation has expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("no matching key for kid {0}")]
    UnknownKey(String),

    #[error("malformed JWS: {0}")]
    Malformed(String),
}

impl From<TrustError> for OapError {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::Expired | TrustError::InvalidSignature | TrustError::UnknownKey(_) => {
                OapError::Forbidden(e.to_string())
            }
            TrustError::Malformed(_) => OapError::InvalidRequest(e.to_string()),
        }
    }
}
