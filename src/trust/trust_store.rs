//! `TrustStore`: in-process persistence of open challenges and issued
//! attestations, keyed by domain. Grounded on `dashflow-registry/src/
//! metadata.rs`'s DashMap-backed record store shape, same as
//! [`crate::manifest_store::ManifestStore`] and [`crate::experience::ExperienceStore`].

use crate::trust::challenge::DomainChallenge;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Clone, Debug, serde::Serialize)]
pub struct Attestation {
    pub domain: String,
    /// 1 (domain control only) or 2 (domain control + capability test).
    pub layer: u8,
    pub jws: String,
    /// The manifest's content hash at the moment this attestation was signed.
    pub manifest_hash: String,
    /// How domain control or capability was established, e.g. `"dns"`,
    /// `"http"`, or `"capability_probe"`.
    pub verification_method: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct TrustStore {
    challenges: DashMap<String, DomainChallenge>,
    attestations: DashMap<String, Attestation>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self {
            challenges: DashMap::new(),
            attestations: DashMap::new(),
        }
    }

    pub fn put_challenge(&self, challenge: DomainChallenge) {
        self.challenges.insert(challenge.domain.clone(), challenge);
    }

    pub fn get_challenge(&self, domain: &str) -> Option<DomainChallenge> {
        self.challenges.get(domain).map(|c| c.clone())
    }

    pub fn remove_challenge(&self, domain: &str) -> Option<DomainChallenge> {
        self.challenges.remove(domain).map(|(_, v)| v)
    }

    pub fn put_attestation(&self, attestation: Attestation) {
        self.attestations.insert(attestation.domain.clone(), attestation);
    }

    pub fn get_attestation(&self, domain: &str) -> Option<Attestation> {
        self.attestations.get(domain).map(|a| a.clone())
    }

    /// An attestation is current only if present and not expired.
    pub fn is_attested(&self, domain: &str, now: DateTime<Utc>) -> bool {
        self.get_attestation(domain).is_some_and(|a| a.expires_at > now)
    }

    pub fn remove_attestation(&self, domain: &str) -> Option<Attestation> {
        self.attestations.remove(domain).map(|(_, v)| v)
    }

    pub fn list_attestations(&self) -> Vec<Attestation> {
        self.attestations.iter().map(|a| a.clone()).collect()
    }

    /// Evict every expired challenge and attestation; returns the count
    /// removed, for periodic housekeeping by the trust server binary.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.challenges.len() + self.attestations.len();
        self.challenges.retain(|_, c| !c.is_expired(now));
        self.attestations.retain(|_, a| a.expires_at > now);
        before - (self.challenges.len() + self.attestations.len())
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::challenge::ChallengeKind;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-01-15T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn put_then_get_challenge_round_trips() {
        let store = TrustStore::new();
        let challenge = DomainChallenge::new("example.com", ChallengeKind::DnsTxt, Duration::seconds(60), now());
        store.put_challenge(challenge.clone());
        assert_eq!(store.get_challenge("example.com").unwrap().token, challenge.token);
    }

    #[test]
    fn is_attested_false_when_expired() {
        let store = TrustStore::new();
        store.put_attestation(Attestation {
            domain: "example.com".into(),
            layer: 1,
            jws: "token".into(),
            manifest_hash: "sha256:deadbeef".into(),
            verification_method: "dns".into(),
            issued_at: now() - Duration::days(100),
            expires_at: now() - Duration::days(10),
        });
        assert!(!store.is_attested("example.com", now()));
    }

    #[test]
    fn is_attested_true_when_current() {
        let store = TrustStore::new();
        store.put_attestation(Attestation {
            domain: "example.com".into(),
            layer: 1,
            jws: "token".into(),
            manifest_hash: "sha256:deadbeef".into(),
            verification_method: "dns".into(),
            issued_at: now(),
            expires_at: now() + Duration::days(90),
        });
        assert!(store.is_attested("example.com", now()));
    }

    #[test]
    fn evict_expired_removes_only_stale_entries() {
        let store = TrustStore::new();
        store.put_challenge(DomainChallenge::new("fresh.com", ChallengeKind::DnsTxt, Duration::seconds(3600), now()));
        store.put_challenge(DomainChallenge::new("stale.com", ChallengeKind::DnsTxt, Duration::seconds(-1), now()));
        let removed = store.evict_expired(now());
        assert_eq!(removed, 1);
        assert!(store.get_challenge("fresh.com").is_some());
        assert!(store.get_challenge("stale.com").is_none());
    }
}
