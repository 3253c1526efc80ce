//! `AttestationService`: orchestrates the domain-control and capability
//! attestation flows described in SPEC_FULL.md §4.12, wiring together
//! [`CapabilityTestRunner`], [`ChallengeVerifier`], [`KeyManager`], and
//! [`TrustStore`]. Grounded on `dashflow-registry/src/trust.rs`'s
//! `TrustService::issue`/`verify` orchestration shape, replacing its
//! single-shot signature issuance with the two-layer challenge/probe flow.

use super::capability_test::CapabilityTestRunner;
use super::challenge::{ChallengeKind, ChallengeVerifier, DomainChallenge};
use super::key_manager::KeyManager;
use super::trust_store::{Attestation, TrustStore};
use crate::error::{OapError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AttestationClaims {
    domain: String,
    layer: u8,
    manifest_hash: String,
    verification_method: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct InitiateResult {
    pub domain: String,
    pub token: String,
    pub instructions: String,
    pub layer0_passed: bool,
    pub layer0_errors: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct AttestationService {
    runner: CapabilityTestRunner,
    verifier: ChallengeVerifier,
    keys: Arc<KeyManager>,
    store: Arc<TrustStore>,
    challenge_ttl: ChronoDuration,
    layer1_expiry: ChronoDuration,
    layer2_expiry: ChronoDuration,
    max_manifest_bytes: usize,
}

impl AttestationService {
    pub fn new(
        runner: CapabilityTestRunner,
        verifier: ChallengeVerifier,
        keys: Arc<KeyManager>,
        store: Arc<TrustStore>,
        layer1_expiry_days: i64,
        layer2_expiry_days: i64,
    ) -> Self {
        Self::with_config(runner, verifier, keys, store, layer1_expiry_days, layer2_expiry_days, 3600, 1024 * 1024)
    }

    /// Same as [`Self::new`] but with the challenge TTL and max manifest
    /// size taken from config instead of hardcoded, for callers
    /// (`trust_server`) that expose [`crate::config::TrustConfig`]'s
    /// `challenge_ttl_seconds` / `max_manifest_size` as real knobs.
    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        runner: CapabilityTestRunner,
        verifier: ChallengeVerifier,
        keys: Arc<KeyManager>,
        store: Arc<TrustStore>,
        layer1_expiry_days: i64,
        layer2_expiry_days: i64,
        challenge_ttl_seconds: i64,
        max_manifest_bytes: usize,
    ) -> Self {
        Self {
            runner,
            verifier,
            keys,
            store,
            challenge_ttl: ChronoDuration::seconds(challenge_ttl_seconds),
            layer1_expiry: ChronoDuration::days(layer1_expiry_days),
            layer2_expiry: ChronoDuration::days(layer2_expiry_days),
            max_manifest_bytes,
        }
    }

    /// Step 1 of the domain-attestation flow: fetch the domain's manifest,
    /// run the Layer 0 safety check, and if it passes, mint and persist a
    /// fresh [`DomainChallenge`] the caller must publish before verifying.
    pub async fn initiate_domain_attestation(
        &self,
        domain: &str,
        kind: ChallengeKind,
        now: DateTime<Utc>,
    ) -> Result<InitiateResult> {
        let manifest_bytes = self.runner.fetch_manifest(domain, self.max_manifest_bytes).await?;
        let layer0 = self.runner.check_layer0(&manifest_bytes);

        if !layer0.passed {
            return Ok(InitiateResult {
                domain: domain.to_string(),
                token: String::new(),
                instructions: String::new(),
                layer0_passed: false,
                layer0_errors: layer0.errors,
                expires_at: now,
            });
        }

        let challenge = DomainChallenge::new(domain, kind, self.challenge_ttl, now);
        let instructions = match kind {
            ChallengeKind::DnsTxt => format!(
                "Publish a TXT record at {} with the value {}",
                challenge.dns_record_name(),
                challenge.token
            ),
            ChallengeKind::HttpWellKnown => format!(
                "Serve the plaintext value {} at {}",
                challenge.token,
                challenge.well_known_url()
            ),
        };

        let result = InitiateResult {
            domain: domain.to_string(),
            token: challenge.token.clone(),
            instructions,
            layer0_passed: true,
            layer0_errors: Vec::new(),
            expires_at: challenge.expires_at,
        };
        self.store.put_challenge(challenge);
        Ok(result)
    }

    /// Step 2: verify the outstanding challenge for `domain`, and on
    /// success re-fetch the manifest, sign a Layer 1 attestation over its
    /// current hash, and persist it.
    pub async fn verify_domain_attestation(&self, domain: &str, now: DateTime<Utc>) -> Result<Attestation> {
        let challenge = self
            .store
            .get_challenge(domain)
            .ok_or_else(|| OapError::NotFound(format!("no outstanding challenge for {domain}")))?;

        let verified = self.verifier.verify(&challenge, now).await?;
        if !verified {
            return Err(OapError::Forbidden(format!(
                "domain control challenge for {domain} could not be verified"
            )));
        }

        let manifest_bytes = self.runner.fetch_manifest(domain, self.max_manifest_bytes).await?;
        let layer0 = self.runner.check_layer0(&manifest_bytes);
        let manifest_hash = layer0
            .manifest_hash
            .ok_or_else(|| OapError::Internal(format!("manifest for {domain} failed re-validation at verify time")))?;

        let verification_method = match challenge.kind {
            ChallengeKind::DnsTxt => "dns",
            ChallengeKind::HttpWellKnown => "http",
        };

        let attestation = self.issue(domain, 1, &manifest_hash, verification_method, self.layer1_expiry, now)?;
        self.store.remove_challenge(domain);
        self.store.put_attestation(attestation.clone());
        Ok(attestation)
    }

    /// Layer 2: requires an existing, current Layer 1 attestation. Fetches
    /// the manifest, runs the live capability probe, and only signs a new
    /// attestation if every applicable check passed — never for stdio or
    /// auth-gated invocations, which the probe itself refuses to touch.
    pub async fn attest_capability(&self, domain: &str, now: DateTime<Utc>) -> Result<Attestation> {
        if !self.store.is_attested(domain, now) {
            return Err(OapError::Forbidden(format!(
                "domain {domain} has no current domain-control attestation"
            )));
        }

        let manifest_bytes = self.runner.fetch_manifest(domain, self.max_manifest_bytes).await?;
        let layer0 = self.runner.check_layer0(&manifest_bytes);
        let manifest_hash = layer0
            .manifest_hash
            .ok_or_else(|| OapError::Internal(format!("manifest for {domain} failed re-validation")))?;

        let manifest = crate::manifest::ManifestValidator::parse(&manifest_bytes)?;
        let probe = self.runner.check_layer2(&manifest).await?;
        if !probe.passed {
            let reason = probe
                .skipped_reason
                .or_else(|| probe.errors.first().cloned())
                .unwrap_or_else(|| "capability probe failed".to_string());
            return Err(OapError::Forbidden(format!(
                "capability attestation for {domain} refused: {reason}"
            )));
        }

        let attestation = self.issue(domain, 2, &manifest_hash, "capability_probe", self.layer2_expiry, now)?;
        self.store.put_attestation(attestation.clone());
        Ok(attestation)
    }

    /// Non-expired attestations currently on file for `domain`.
    pub fn get_attestations(&self, domain: &str, now: DateTime<Utc>) -> Vec<Attestation> {
        self.store
            .get_attestation(domain)
            .filter(|a| a.expires_at > now)
            .into_iter()
            .collect()
    }

    fn issue(
        &self,
        domain: &str,
        layer: u8,
        manifest_hash: &str,
        verification_method: &str,
        ttl: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<Attestation> {
        let expires_at = now + ttl;
        let claims = AttestationClaims {
            domain: domain.to_string(),
            layer,
            manifest_hash: manifest_hash.to_string(),
            verification_method: verification_method.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let jws = self.keys.sign(&claims)?;
        Ok(Attestation {
            domain: domain.to_string(),
            layer,
            jws,
            manifest_hash: manifest_hash.to_string(),
            verification_method: verification_method.to_string(),
            issued_at: now,
            expires_at,
        })
    }
}
