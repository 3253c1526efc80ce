//! OAP v1.0 capability manifests: the document a publisher serves at
//! `https://<domain>/.well-known/oap.json` describing one capability and
//! how to invoke it.

use crate::content_hash::ContentHash;
use crate::error::{OapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const OAP_VERSION: &str = "1.0";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    ApiKey,
    Bearer,
    #[serde(other)]
    Other,
}

impl Default for AuthKind {
    fn default() -> Self {
        AuthKind::None
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invoke {
    /// HTTP verb (`GET`/`POST`/...) or the literal `stdio`.
    pub method: String,
    /// URL for HTTP invocation, or a command name/path for stdio.
    pub url: String,
    #[serde(default)]
    pub auth: AuthKind,
    /// Header name to carry the credential in, e.g. `X-API-Key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_in: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IoSpec {
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Structured `{name: {type, description, required?}}` parameter
    /// definitions a publisher supplies verbatim, read by `ToolConverter`
    /// ahead of any description-heuristic derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    /// Must be exactly [`OAP_VERSION`] for a v1.0-conformant manifest.
    pub oap: String,
    pub name: String,
    pub description: String,
    pub invoke: Invoke,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<IoSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<IoSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,

    /// Unrecognized top-level fields, preserved verbatim so hashing over
    /// the canonical JSON is unaffected by fields this crate doesn't model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn builder(name: impl Into<String>) -> ManifestBuilder {
        ManifestBuilder::new(name)
    }

    /// `hash(manifest) = sha256:<hex>` over the canonical serialization.
    pub fn hash(&self) -> Result<ContentHash> {
        let canon = canonical_json(self)?;
        Ok(ContentHash::from_bytes(canon.as_bytes()))
    }
}

/// Serialize `value` to JSON with keys sorted at every object level and
/// `(",", ":")` separators, matching the Python reference's
/// `json.dumps(data, sort_keys=True, separators=(",", ":"))`.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_value(v);
    serde_json::to_string(&sorted).map_err(OapError::from)
}

fn sort_value(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, val)| (k, sort_value(val))).collect();
            let mut out = Map::new();
            for (k, val) in sorted {
                out.insert(k, val);
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_value).collect()),
        other => other,
    }
}

pub struct ManifestBuilder {
    oap: String,
    name: String,
    description: String,
    invoke: Option<Invoke>,
    input: Option<IoSpec>,
    output: Option<IoSpec>,
    publisher: Option<String>,
    examples: Vec<Value>,
    tags: Vec<String>,
    health: Option<String>,
    docs: Option<String>,
    version: Option<String>,
    updated: Option<String>,
}

impl ManifestBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            oap: OAP_VERSION.to_string(),
            name: name.into(),
            description: String::new(),
            invoke: None,
            input: None,
            output: None,
            publisher: None,
            examples: Vec::new(),
            tags: Vec::new(),
            health: None,
            docs: None,
            version: None,
            updated: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn invoke(mut self, invoke: Invoke) -> Self {
        self.invoke = Some(invoke);
        self
    }

    pub fn input(mut self, input: IoSpec) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: IoSpec) -> Self {
        self.output = Some(output);
        self
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn build(self) -> Result<Manifest> {
        let invoke = self
            .invoke
            .ok_or_else(|| OapError::InvalidRequest("manifest missing invoke".into()))?;
        Ok(Manifest {
            oap: self.oap,
            name: self.name,
            description: self.description,
            invoke,
            input: self.input,
            output: self.output,
            publisher: self.publisher,
            examples: self.examples,
            tags: self.tags,
            health: self.health,
            docs: self.docs,
            version: self.version,
            updated: self.updated,
            extra: Map::new(),
        })
    }
}

/// Result of [`ManifestValidator::validate`].
#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ManifestValidator;

impl ManifestValidator {
    /// Validate a manifest already deserialized from JSON.
    pub fn validate(manifest: &Manifest) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if manifest.oap != OAP_VERSION {
            errors.push(format!(
                "unsupported oap version: {} (expected {OAP_VERSION})",
                manifest.oap
            ));
        }
        if manifest.name.trim().is_empty() {
            errors.push("missing required field: name".into());
        }
        if manifest.description.trim().is_empty() {
            errors.push("missing required field: description".into());
        }
        if manifest.invoke.method.trim().is_empty() {
            errors.push("missing required field: invoke.method".into());
        }
        if manifest.invoke.url.trim().is_empty() {
            errors.push("missing required field: invoke.url".into());
        }

        if manifest.input.is_none() {
            warnings.push("manifest has no input spec".into());
        }
        if manifest.output.is_none() {
            warnings.push("manifest has no output spec".into());
        }
        if manifest.description.len() > 1000 {
            warnings.push("description exceeds 1000 characters".into());
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Parse raw JSON bytes into a [`Manifest`], failing with
    /// [`OapError::InvalidRequest`] if the manifest doesn't validate.
    pub fn parse(data: &[u8]) -> Result<Manifest> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| OapError::InvalidRequest(format!("malformed manifest JSON: {e}")))?;
        let report = Self::validate(&manifest);
        if !report.valid {
            return Err(OapError::InvalidRequest(format!(
                "manifest validation failed: {}",
                report.errors.join("; ")
            )));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invoke() -> Invoke {
        Invoke {
            method: "GET".into(),
            url: "https://example.com/capability".into(),
            auth: AuthKind::None,
            auth_name: None,
            auth_in: None,
            headers: BTreeMap::new(),
            streaming: None,
        }
    }

    #[test]
    fn hash_is_stable_across_reserialization() {
        let manifest = Manifest::builder("Demo Capability")
            .description("does a thing")
            .invoke(sample_invoke())
            .build()
            .unwrap();

        let h1 = manifest.hash().unwrap();
        let reparsed: Manifest =
            serde_json::from_str(&canonical_json(&manifest).unwrap()).unwrap();
        let h2 = reparsed.hash().unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let manifest = Manifest::builder("Z Capability")
            .description("desc")
            .invoke(sample_invoke())
            .build()
            .unwrap();
        let json = canonical_json(&manifest).unwrap();
        // "description" must appear before "invoke" before "name" before "oap"
        // once keys are sorted alphabetically.
        let pos_description = json.find("\"description\"").unwrap();
        let pos_name = json.find("\"name\"").unwrap();
        assert!(pos_description < pos_name);
    }

    #[test]
    fn validate_flags_missing_required_fields() {
        let manifest = Manifest {
            oap: "2.0".into(),
            name: String::new(),
            description: String::new(),
            invoke: Invoke {
                method: String::new(),
                url: String::new(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: BTreeMap::new(),
                streaming: None,
            },
            input: None,
            output: None,
            publisher: None,
            examples: Vec::new(),
            tags: Vec::new(),
            health: None,
            docs: None,
            version: None,
            updated: None,
            extra: Map::new(),
        };

        let report = ManifestValidator::validate(&manifest);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("oap version")));
        assert!(report.errors.iter().any(|e| e.contains("name")));
        assert!(report.errors.iter().any(|e| e.contains("invoke.method")));
    }

    #[test]
    fn validate_warns_on_missing_io_specs() {
        let manifest = Manifest::builder("grep")
            .description("search text")
            .invoke(sample_invoke())
            .build()
            .unwrap();
        let report = ManifestValidator::validate(&manifest);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn parse_rejects_invalid_manifest() {
        let bad = br#"{"oap":"1.0","name":"x","description":"y","invoke":{"method":"","url":""}}"#;
        assert!(ManifestValidator::parse(bad).is_err());
    }

    #[test]
    fn extra_fields_round_trip_through_flatten() {
        let json = br#"{"oap":"1.0","name":"n","description":"d",
            "invoke":{"method":"GET","url":"https://x/y"},"future_field":"kept"}"#;
        let manifest: Manifest = serde_json::from_slice(json).unwrap();
        assert_eq!(
            manifest.extra.get("future_field").and_then(|v| v.as_str()),
            Some("kept")
        );
        let back = canonical_json(&manifest).unwrap();
        assert!(back.contains("future_field"));
    }
}
