//! Trust attestation service: proves a manifest's publisher controls the
//! domain it's served from (Layer 1, DNS/HTTP challenge) and optionally that
//! the capability actually behaves as described (Layer 2, capability test),
//! then issues a signed compact JWS attestation other mesh participants can
//! verify offline against this service's public key.

pub mod attestation_service;
pub mod capability_test;
pub mod challenge;
pub mod key_manager;
pub mod trust_store;

pub use attestation_service::AttestationService;
pub use capability_test::CapabilityTestRunner;
pub use challenge::{ChallengeKind, ChallengeVerifier, DomainChallenge};
pub use key_manager::KeyManager;
pub use trust_store::TrustStore;
