//! Ed25519 keypair lifecycle and compact-JWS sign/verify.
//!
//! Grounded on `dashflow-registry/src/signature.rs`'s `KeyPair::generate`
//! (`SigningKey::generate(&mut OsRng)`) and hex-encoded key persistence;
//! generalized here to sign JWS (EdDSA via `jsonwebtoken`) instead of raw
//! detached signatures, and to export a JWKS document for third parties to
//! verify attestations offline.

use crate::error::{OapError, Result, TrustError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{DecodingKey, EncodingKey, Header};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::path::Path;

pub struct KeyManager {
    signing_key: SigningKey,
    kid: String,
}

impl KeyManager {
    /// Generate a fresh keypair and persist it PEM-encoded at `path` with
    /// owner-only permissions on unix.
    pub fn generate(path: &Path, kid: impl Into<String>) -> Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let manager = Self {
            signing_key,
            kid: kid.into(),
        };
        manager.persist(path)?;
        Ok(manager)
    }

    /// Load an existing PEM-encoded key from `path`, generating and
    /// persisting a new one if none exists yet.
    pub fn load_or_generate(path: &Path, kid: impl Into<String>) -> Result<Self> {
        if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            let signing_key = SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| OapError::Internal(format!("failed to parse key file: {e}")))?;
            Ok(Self {
                signing_key,
                kid: kid.into(),
            })
        } else {
            Self::generate(path, kid)
        }
    }

    fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pem = self
            .signing_key
            .to_pkcs8_pem(Default::default())
            .map_err(|e| OapError::Internal(format!("failed to encode key: {e}")))?;
        std::fs::write(path, pem.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        let public_pem = self
            .signing_key
            .verifying_key()
            .to_public_key_pem(Default::default())
            .map_err(|e| OapError::Internal(format!("failed to encode public key: {e}")))?;
        std::fs::write(Self::public_key_path(path), public_pem.as_bytes())?;

        Ok(())
    }

    /// `private.pem` -> `public.pem`, sibling to the private key file.
    fn public_key_path(private_path: &Path) -> std::path::PathBuf {
        private_path.with_file_name("public.pem")
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `claims` as a compact EdDSA JWS with `kid` in the header.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let mut header = Header::new(jsonwebtoken::Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());

        let der = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| OapError::Internal(format!("failed to DER-encode key: {e}")))?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());
        jsonwebtoken::encode(&header, claims, &encoding_key)
            .map_err(|e| OapError::Internal(format!("JWS signing failed: {e}")))
    }

    /// Verify a compact JWS signed by this key, returning the decoded claims.
    ///
    /// Expiry (`exp` claim in the past) is rejected as [`TrustError::Expired`],
    /// kept distinguishable from a signature mismatch ([`TrustError::InvalidSignature`])
    /// per SPEC_FULL.md §7: "expired-JWS rejection is a programmer-noticeable
    /// exception type distinct from signature-mismatch rejection".
    pub fn verify_claims<T: DeserializeOwned>(&self, token: &str) -> std::result::Result<T, TrustError> {
        let decoding_key = DecodingKey::from_ed_der(self.signing_key.verifying_key().as_bytes());
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::EdDSA);
        validation.required_spec_claims.clear();
        validation.validate_exp = true;

        match jsonwebtoken::decode::<T>(token, &decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TrustError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TrustError::InvalidSignature,
                _ => TrustError::Malformed(e.to_string()),
            }),
        }
    }

    /// Convenience wrapper for callers that only care about [`OapError`].
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        self.verify_claims(token).map_err(OapError::from)
    }

    /// A single-key JWKS document (`OKP`/`Ed25519`) for distribution to
    /// verifiers that don't share this service's process.
    pub fn jwks(&self) -> Value {
        let x = URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().as_bytes());
        json!({
            "keys": [{
                "kty": "OKP",
                "crv": "Ed25519",
                "kid": self.kid,
                "x": x,
                "use": "sig",
                "alg": "EdDSA",
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn generate_persists_key_with_owner_only_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let _manager = KeyManager::generate(&path, "test-key-1").unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn generate_also_writes_sibling_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let _manager = KeyManager::generate(&path, "test-key-1").unwrap();
        let public_path = dir.path().join("public.pem");
        assert!(public_path.exists());
        let pem = std::fs::read_to_string(&public_path).unwrap();
        assert!(pem.contains("PUBLIC KEY"));
    }

    #[test]
    fn load_or_generate_reuses_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let first = KeyManager::generate(&path, "kid-1").unwrap();
        let second = KeyManager::load_or_generate(&path, "kid-1").unwrap();
        assert_eq!(
            first.signing_key.verifying_key().as_bytes(),
            second.signing_key.verifying_key().as_bytes()
        );
    }

    #[test]
    fn sign_then_verify_round_trips_claims() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::generate(&dir.path().join("key.pem"), "kid-1").unwrap();
        let claims = Claims {
            sub: "example.com".into(),
            exp: 9_999_999_999,
        };
        let token = manager.sign(&claims).unwrap();
        let decoded: Claims = manager.verify(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn verify_rejects_tampered_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::generate(&dir.path().join("key.pem"), "kid-1").unwrap();
        let token = manager
            .sign(&Claims { sub: "a".into(), exp: 9_999_999_999 })
            .unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        let err = manager.verify_claims::<Claims>(&tampered).unwrap_err();
        assert!(matches!(err, TrustError::InvalidSignature | TrustError::Malformed(_)));
    }

    #[test]
    fn verify_rejects_expired_token_distinctly_from_bad_signature() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::generate(&dir.path().join("key.pem"), "kid-1").unwrap();
        let expired = manager.sign(&Claims { sub: "a".into(), exp: 1 }).unwrap();
        let err = manager.verify_claims::<Claims>(&expired).unwrap_err();
        assert!(matches!(err, TrustError::Expired));

        let mut tampered = manager
            .sign(&Claims { sub: "a".into(), exp: 9_999_999_999 })
            .unwrap();
        tampered.push('x');
        let other_err = manager.verify_claims::<Claims>(&tampered).unwrap_err();
        assert_ne!(err.to_string(), other_err.to_string());
    }

    #[test]
    fn jwks_exposes_kid_and_ed25519_curve() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::generate(&dir.path().join("key.pem"), "kid-42").unwrap();
        let jwks = manager.jwks();
        assert_eq!(jwks["keys"][0]["kid"], "kid-42");
        assert_eq!(jwks["keys"][0]["crv"], "Ed25519");
    }
}
