//! `CredentialStore`: per-domain secrets injected into outbound invocations
//! by [`crate::tool_executor::ToolExecutor`] / [`crate::invoker::Invoker`],
//! per SPEC_FULL.md §4.6 and the "one credential map reloaded per chat
//! request" resource note in §5.
//!
//! Grounded on the shape of `manifest_store.rs`'s `DashMap`-backed lookup;
//! the file format (a flat JSON object of `domain -> {key}`) is a fresh
//! design since no example repo loads per-tenant API credentials this way.

use crate::error::{OapError, Result};
use crate::invoker::InvokeCredential;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Deserialize)]
struct CredentialFileEntry {
    key: String,
}

pub struct CredentialStore {
    entries: DashMap<String, InvokeCredential>,
}

impl CredentialStore {
    pub fn empty() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Load a flat `{ "domain": {"key": "secret"}, ... }` JSON map. The
    /// manifest's own `invoke.auth` (`api_key`/`bearer`/...) decides how the
    /// secret is applied; this store only resolves *which* secret a domain
    /// gets, matching SPEC_FULL.md §4.6's "per-domain credential record".
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| OapError::Internal(format!("failed to read credentials file {}: {e}", path.display())))?;
        let raw: HashMap<String, CredentialFileEntry> = serde_json::from_str(&data)
            .map_err(|e| OapError::InvalidRequest(format!("malformed credentials file: {e}")))?;

        let entries = DashMap::new();
        for (domain, entry) in raw {
            entries.insert(domain, InvokeCredential { value: entry.key });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, domain: &str) -> Option<InvokeCredential> {
        self.entries.get(domain).map(|e| e.clone())
    }

    pub fn set(&self, domain: impl Into<String>, credential: InvokeCredential) {
        self.entries.insert(domain.into(), credential);
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_file_parses_domain_keyed_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"grep.example.com": {"key": "secret-123"}}"#).unwrap();

        let store = CredentialStore::load_from_file(&path).unwrap();
        let cred = store.get("grep.example.com").unwrap();
        assert_eq!(cred.value, "secret-123");
        assert!(store.get("unknown.example.com").is_none());
    }

    #[test]
    fn load_from_file_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(CredentialStore::load_from_file(&path).is_err());
    }

    #[test]
    fn empty_store_resolves_nothing() {
        let store = CredentialStore::empty();
        assert!(store.get("anything").is_none());
    }

    #[test]
    fn set_overrides_a_resolved_credential() {
        let store = CredentialStore::empty();
        store.set("grep.example.com", InvokeCredential { value: "v1".into() });
        assert_eq!(store.get("grep.example.com").unwrap().value, "v1");
    }
}
