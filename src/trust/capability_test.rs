//! Layer 0 manifest-safety checks and the Layer 2 capability probe.
//!
//! Layer 0 is a pure, local re-check of a freshly fetched manifest (scheme,
//! shape, hash) gating whether a domain-attestation flow may even start.
//! Layer 2 is a live network probe of the manifest's declared endpoints,
//! grounded on `dashflow-webscrape`'s SSRF-guarded fetch pattern: every
//! outbound call goes through [`URLGuard`] first, same as [`crate::invoker::Invoker`].

use crate::content_hash::ContentHash;
use crate::error::{OapError, Result};
use crate::manifest::{AuthKind, Manifest, ManifestValidator};
use crate::url_guard::URLGuard;
use reqwest::Client;
use serde::Serialize;

/// Result of the Layer 0 manifest-safety check, run before any domain
/// challenge is issued (SPEC_FULL.md §4.12 `initiate_domain_attestation`).
#[derive(Clone, Debug, Serialize)]
pub struct Layer0Result {
    pub passed: bool,
    pub errors: Vec<String>,
    pub manifest_hash: Option<String>,
}

/// Result of the Layer 2 live capability probe (SPEC_FULL.md §4.12
/// `attest_capability`).
#[derive(Clone, Debug, Serialize)]
pub struct Layer2Result {
    pub passed: bool,
    pub live: bool,
    pub health_ok: Option<bool>,
    pub example_ok: Option<bool>,
    pub skipped_reason: Option<String>,
    pub errors: Vec<String>,
}

pub struct CapabilityTestRunner {
    client: Client,
    url_guard: URLGuard,
}

impl CapabilityTestRunner {
    pub fn new(client: Client, url_guard: URLGuard) -> Self {
        Self { client, url_guard }
    }

    /// Layer 0: the manifest must be well-formed OAP v1.0, and its declared
    /// hash (if present in `extra`) must match its own canonical hash.
    /// Doesn't touch the network; `raw_bytes` is the exact bytes fetched from
    /// `/.well-known/oap.json` so the hash is computed over what was
    /// actually served, not a re-serialization.
    pub fn check_layer0(&self, raw_bytes: &[u8]) -> Layer0Result {
        let manifest = match ManifestValidator::parse(raw_bytes) {
            Ok(m) => m,
            Err(e) => {
                return Layer0Result {
                    passed: false,
                    errors: vec![e.to_string()],
                    manifest_hash: None,
                }
            }
        };

        let hash = match manifest.hash() {
            Ok(h) => h,
            Err(e) => {
                return Layer0Result {
                    passed: false,
                    errors: vec![e.to_string()],
                    manifest_hash: None,
                }
            }
        };

        Layer0Result {
            passed: true,
            errors: Vec::new(),
            manifest_hash: Some(hash.to_string()),
        }
    }

    /// Fetch `https://<domain>/.well-known/oap.json`, SSRF-guarded, size
    /// capped at `max_bytes`, and require the response is JSON.
    pub async fn fetch_manifest(&self, domain: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let url = url::Url::parse(&format!("https://{domain}/.well-known/oap.json"))
            .map_err(|e| OapError::InvalidRequest(format!("invalid domain {domain}: {e}")))?;
        self.url_guard.validate(&url).await?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(OapError::Upstream(format!(
                "manifest fetch for {domain} returned status {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.len() > max_bytes {
            return Err(OapError::InvalidRequest(format!(
                "manifest for {domain} exceeds {max_bytes} byte cap"
            )));
        }
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .map_err(|e| OapError::InvalidRequest(format!("manifest for {domain} is not valid JSON: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Layer 2: probe the manifest's live endpoints. Never issued for stdio
    /// invocations (can't be tested remotely) or for endpoints requiring
    /// auth this service doesn't hold, per SPEC_FULL.md §4.12 and
    /// testable property 8.
    pub async fn check_layer2(&self, manifest: &Manifest) -> Result<Layer2Result> {
        if manifest.invoke.method.eq_ignore_ascii_case("stdio") {
            return Ok(Layer2Result {
                passed: false,
                live: false,
                health_ok: None,
                example_ok: None,
                skipped_reason: Some("cannot test a stdio invocation remotely".into()),
                errors: Vec::new(),
            });
        }
        if manifest.invoke.auth != AuthKind::None {
            return Ok(Layer2Result {
                passed: false,
                live: false,
                health_ok: None,
                example_ok: None,
                skipped_reason: Some("auth-gated endpoints are not probed".into()),
                errors: Vec::new(),
            });
        }

        let mut errors = Vec::new();
        let invoke_url = url::Url::parse(&manifest.invoke.url)
            .map_err(|e| OapError::InvalidRequest(format!("invalid invoke url: {e}")))?;
        self.url_guard.validate(&invoke_url).await?;

        let live = match self.client.head(invoke_url.clone()).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(_) => match self.client.get(invoke_url.clone()).send().await {
                Ok(resp) => resp.status().as_u16() < 500,
                Err(e) => {
                    errors.push(format!("invoke endpoint unreachable: {e}"));
                    false
                }
            },
        };

        let health_ok = if let Some(health) = &manifest.health {
            match url::Url::parse(health) {
                Ok(health_url) => {
                    self.url_guard.validate(&health_url).await?;
                    match self.client.get(health_url).send().await {
                        Ok(resp) => Some(resp.status().as_u16() < 400),
                        Err(e) => {
                            errors.push(format!("health probe failed: {e}"));
                            Some(false)
                        }
                    }
                }
                Err(e) => {
                    errors.push(format!("invalid health url: {e}"));
                    Some(false)
                }
            }
        } else {
            None
        };

        let example_ok = self.probe_example(manifest, &invoke_url, &mut errors).await;

        let passed = live
            && health_ok.unwrap_or(true)
            && example_ok.unwrap_or(true)
            && errors.is_empty();

        Ok(Layer2Result {
            passed,
            live,
            health_ok,
            example_ok,
            skipped_reason: None,
            errors,
        })
    }

    /// Send `examples[0].input` against the invoke URL (only for a `POST`
    /// method) and loosely match the response `Content-Type` against the
    /// manifest's declared `output.format`. Per SPEC_FULL.md §9's open
    /// question, this does leak example payloads to the network as
    /// specified rather than substituting a synthetic probe.
    async fn probe_example(
        &self,
        manifest: &Manifest,
        invoke_url: &url::Url,
        errors: &mut Vec<String>,
    ) -> Option<bool> {
        if !manifest.invoke.method.eq_ignore_ascii_case("POST") {
            return None;
        }
        let example = manifest.examples.first()?;
        let input = example.get("input")?;

        let format = manifest
            .input
            .as_ref()
            .map(|spec| spec.format.as_str())
            .unwrap_or("application/json");

        let request = if format.contains("json") {
            self.client.post(invoke_url.clone()).json(input)
        } else {
            self.client
                .post(invoke_url.clone())
                .body(input.as_str().unwrap_or_default().to_string())
        };

        match request.send().await {
            Ok(response) => {
                let Some(expected) = manifest.output.as_ref().map(|o| o.format.as_str()) else {
                    return Some(response.status().is_success());
                };
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let expected_family = expected.split('/').next().unwrap_or(expected);
                let matches = content_type.contains(expected_family) || content_type.contains(expected);
                Some(response.status().is_success() && matches)
            }
            Err(e) => {
                errors.push(format!("example probe failed: {e}"));
                Some(false)
            }
        }
    }
}

/// Content hash for a Layer 0 pass re-verified against the stored manifest,
/// used by [`super::attestation_service::AttestationService`] to confirm the
/// manifest hasn't drifted between issuance and re-verification.
pub fn hash_matches(raw_bytes: &[u8], expected: &ContentHash) -> bool {
    expected.verify(raw_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Invoke;

    fn manifest_json(method: &str, auth: &str) -> Vec<u8> {
        format!(
            r#"{{"oap":"1.0","name":"demo","description":"does a thing",
            "invoke":{{"method":"{method}","url":"https://example.com/invoke","auth":"{auth}"}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn layer0_accepts_well_formed_manifest() {
        let runner = CapabilityTestRunner::new(Client::new(), URLGuard::new(Default::default()));
        let result = runner.check_layer0(&manifest_json("GET", "none"));
        assert!(result.passed);
        assert!(result.manifest_hash.is_some());
    }

    #[test]
    fn layer0_rejects_malformed_manifest() {
        let runner = CapabilityTestRunner::new(Client::new(), URLGuard::new(Default::default()));
        let result = runner.check_layer0(br#"{"oap":"2.0"}"#);
        assert!(!result.passed);
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn layer2_skips_stdio_manifests() {
        let runner = CapabilityTestRunner::new(Client::new(), URLGuard::new(Default::default()));
        let manifest = Manifest::builder("shell-grep")
            .description("search text")
            .invoke(Invoke {
                method: "stdio".into(),
                url: "/usr/bin/grep".into(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap();
        let result = runner.check_layer2(&manifest).await.unwrap();
        assert!(!result.passed);
        assert!(result.skipped_reason.unwrap().contains("stdio"));
    }

    #[tokio::test]
    async fn layer2_skips_auth_gated_endpoints() {
        let runner = CapabilityTestRunner::new(Client::new(), URLGuard::new(Default::default()));
        let manifest = Manifest::builder("secure-api")
            .description("needs a key")
            .invoke(Invoke {
                method: "GET".into(),
                url: "https://example.com/invoke".into(),
                auth: AuthKind::ApiKey,
                auth_name: Some("X-API-Key".into()),
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap();
        let result = runner.check_layer2(&manifest).await.unwrap();
        assert!(!result.passed);
        assert!(result.skipped_reason.unwrap().contains("auth"));
    }

    #[tokio::test]
    async fn layer2_blocks_ssrf_invoke_url() {
        let runner = CapabilityTestRunner::new(Client::new(), URLGuard::new(Default::default()));
        let manifest = Manifest::builder("evil")
            .description("targets localhost")
            .invoke(Invoke {
                method: "GET".into(),
                url: "http://127.0.0.1:80/admin".into(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap();
        let err = runner.check_layer2(&manifest).await.unwrap_err();
        assert!(matches!(err, OapError::Forbidden(_)));
    }

    #[test]
    fn hash_matches_detects_tampering() {
        let bytes = manifest_json("GET", "none");
        let hash = ContentHash::from_bytes(&bytes);
        assert!(hash_matches(&bytes, &hash));
        assert!(!hash_matches(b"different", &hash));
    }
}
