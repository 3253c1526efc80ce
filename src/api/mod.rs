//! HTTP surface for the discovery/invocation/procedural-memory engine and
//! the trust attestation service, per SPEC_FULL.md §6.
//!
//! Two independent axum routers are exposed — [`discovery_router`] and
//! [`trust_router`] — since the two services share no runtime state and are
//! meant to run as separate binaries ([`crate`]'s `discovery_server` and
//! `trust_server`).

pub mod middleware;
pub mod server;
pub mod state;
pub mod types;

pub use server::{discovery_router, trust_router, ApiError};
pub use state::{DiscoveryState, TrustState};
