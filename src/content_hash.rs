//! Content-addressed hashing for capability manifests.
//!
//! `hash(manifest) = sha256:<hex>` over a canonical serialization (sorted
//! keys, stable separators). Used to pin a manifest fetched over HTTP to a
//! specific byte sequence, so an attestation can later assert "this exact
//! manifest was served by this domain" without re-fetching.

use crate::error::{OapError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content hash, displayed as `sha256:<64 hex characters>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash raw bytes directly (callers are expected to pass canonical JSON
    /// for manifest hashing; see [`crate::manifest::canonical_json`]).
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        Self(result.into())
    }

    /// Parse from `sha256:<hex>` or bare `<hex>`.
    pub fn from_string(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let hex_str = s.strip_prefix("sha256:").unwrap_or(s);

        if hex_str.len() != 64 {
            return Err(OapError::InvalidRequest(format!(
                "expected 64 hex characters in content hash, got {}",
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| OapError::InvalidRequest(format!("invalid hex in content hash: {e}")))?;

        let array: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            OapError::InvalidRequest(format!(
                "content hash must be exactly 32 bytes, got {}",
                v.len()
            ))
        })?;

        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify that data hashes to this value (re-serialize-and-rehash check).
    pub fn verify(&self, data: &[u8]) -> bool {
        let computed = Self::from_bytes(data);
        computed == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl std::str::FromStr for ContentHash {
    type Err = OapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_matches_known_sha256() {
        let data = b"hello world";
        let hash = ContentHash::from_bytes(data);

        assert_eq!(
            hash.to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn from_hex_round_trips_with_prefix() {
        let hex = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let hash = ContentHash::from_hex(hex).unwrap();

        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn from_hex_accepts_bare_hex() {
        let hex = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let hash = ContentHash::from_hex(hex).unwrap();

        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn verify_detects_mismatch() {
        let data = b"hello world";
        let hash = ContentHash::from_bytes(data);

        assert!(hash.verify(data));
        assert!(!hash.verify(b"hello worlD"));
        assert!(!hash.verify(b"different"));
    }

    #[test]
    fn from_hex_rejects_malformed_input() {
        assert!(ContentHash::from_hex("not-valid-hex").is_err());
        assert!(ContentHash::from_hex("sha256:abc").is_err());
    }

    #[test]
    fn equality_is_content_based() {
        let hash1 = ContentHash::from_bytes(b"test");
        let hash2 = ContentHash::from_bytes(b"test");
        let hash3 = ContentHash::from_bytes(b"different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn serde_round_trip_preserves_equality() {
        let hash = ContentHash::from_bytes(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        let parsed: ContentHash = serde_json::from_str(&json).unwrap();

        assert_eq!(hash, parsed);
    }

    #[test]
    fn repeated_hash_of_same_manifest_is_stable() {
        let a = ContentHash::from_bytes(b"{\"oap\":\"1.0\"}");
        let b = ContentHash::from_bytes(b"{\"oap\":\"1.0\"}");
        assert_eq!(a, b);
    }
}
