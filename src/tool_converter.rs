//! `ToolConverter`: turns a [`Manifest`] into an LLM tool-call schema
//! (`{"type":"function","function":{...}}`), per SPEC_FULL.md §4.5.
//!
//! Grounded on `dashflow-registry/src/search.rs`'s JSON-schema-shaping
//! helpers for the parameter-schema derivation ladder; the quoted-field-name
//! extraction regex mirrors the teacher's lightweight text-pattern
//! extraction style rather than a full NLP pass.

use crate::manifest::Manifest;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

fn quoted_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[`"']([a-zA-Z_][a-zA-Z0-9_]*)[`"']"#).unwrap())
}

pub struct ToolConverter;

impl ToolConverter {
    /// `oap_<slug(name)>`, the stable tool name addressed by `ToolExecutor`.
    pub fn tool_name(manifest: &Manifest) -> String {
        format!("oap_{}", slugify(&manifest.name))
    }

    /// Build the `{"type":"function","function":{name,description,parameters}}`
    /// tool-call schema an `LLMProvider::chat` call can be handed directly.
    pub fn to_tool_schema(manifest: &Manifest) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": Self::tool_name(manifest),
                "description": manifest.description,
                "parameters": Self::parameter_schema(manifest),
            }
        })
    }

    /// Parameter schema derivation ladder (SPEC_FULL.md §4.5):
    /// 1. `invoke.method == stdio`: a `{stdin, args}` pair, splitting
    ///    `input.description` at the sentence mentioning "standard input"
    ///    (checked first, independent of whether `input` is present).
    /// 2. No `input` spec at all: a single required `input` string param.
    /// 3. `input.parameters` as a structured `{name: {type, description,
    ///    required?}}` map if present, folding in any extra keys seen in
    ///    `examples[*].input` dicts as optional `string` params.
    /// 4. `input.format` containing `json`: quoted field names in
    ///    `input.description` become required `string` params; if none are
    ///    found, a single required `data` string param.
    /// 5. Any other format: a single required `input` string param carrying
    ///    the manifest's description.
    fn parameter_schema(manifest: &Manifest) -> Value {
        if manifest.invoke.method.eq_ignore_ascii_case("stdio") {
            return stdio_schema(manifest.input.as_ref().and_then(|i| i.description.as_deref()));
        }

        let Some(input) = &manifest.input else {
            return json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": format!("Input for {}", manifest.name)}
                },
                "required": ["input"],
            });
        };

        let description = input.description.clone().unwrap_or_default();

        if let Some(parameters) = input.parameters.as_ref().filter(|p| p.is_object()) {
            return Self::fold_example_keys(
                Self::schema_from_parameters(parameters),
                &manifest.examples,
            );
        }

        if input.format.contains("json") {
            let fields = extract_quoted_fields(&description);
            if !fields.is_empty() {
                let mut properties = serde_json::Map::new();
                for field in &fields {
                    properties.insert(
                        field.clone(),
                        json!({"type": "string", "description": format!("The '{field}' value")}),
                    );
                }
                return json!({
                    "type": "object",
                    "properties": properties,
                    "required": fields,
                });
            }

            return json!({
                "type": "object",
                "properties": {
                    "data": {"type": "string", "description": description}
                },
                "required": ["data"],
            });
        }

        json!({
            "type": "object",
            "properties": {
                "input": {"type": "string", "description": description}
            },
            "required": ["input"],
        })
    }

    /// `{name: {type, description, required?}}` → a JSON-schema object;
    /// `required` defaults to `true` when absent, matching the reference's
    /// `_build_parameters_from_spec`.
    fn schema_from_parameters(parameters: &Value) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        if let Some(map) = parameters.as_object() {
            for (name, field_schema) in map {
                let param_type = field_schema.get("type").and_then(|t| t.as_str()).unwrap_or("string");
                let param_desc = field_schema.get("description").and_then(|d| d.as_str()).unwrap_or("");
                properties.insert(name.clone(), json!({"type": param_type, "description": param_desc}));
                let is_required = field_schema.get("required").and_then(|r| r.as_bool()).unwrap_or(true);
                if is_required {
                    required.push(name.clone());
                }
            }
        }
        json!({"type": "object", "properties": properties, "required": required})
    }

    /// Extra keys seen under `examples[*].input` objects that aren't already
    /// declared properties become optional `string` params.
    fn fold_example_keys(mut schema: Value, examples: &[Value]) -> Value {
        let mut extra_keys: Vec<String> = Vec::new();
        for example in examples {
            if let Some(input) = example.get("input").and_then(|v| v.as_object()) {
                for key in input.keys() {
                    let already_declared = schema["properties"].get(key).is_some();
                    if !already_declared && !extra_keys.contains(key) {
                        extra_keys.push(key.clone());
                    }
                }
            }
        }
        if extra_keys.is_empty() {
            return schema;
        }
        if schema["properties"].is_null() {
            schema["properties"] = json!({});
        }
        for key in extra_keys {
            schema["properties"][key] = json!({"type": "string", "description": format!("The '{key}' value (see examples)")});
        }
        schema
    }
}

/// `invoke.method = stdio` schema: both fields optional, descriptions split
/// from the manifest's `input.description` at the sentence that mentions
/// "standard input" (assigned to `stdin`), the rest to `args`.
fn stdio_schema(description: Option<&str>) -> Value {
    let (stdin_desc, args_desc) = split_stdio_description(description);
    json!({
        "type": "object",
        "properties": {
            "stdin": {"type": "string", "description": stdin_desc},
            "args": {"type": "string", "description": args_desc},
        },
        "required": [],
    })
}

fn split_stdio_description(description: Option<&str>) -> (String, String) {
    const DEFAULT_STDIN: &str = "piped input";
    const DEFAULT_ARGS: &str = "flags and arguments";

    let Some(description) = description else {
        return (DEFAULT_STDIN.to_string(), DEFAULT_ARGS.to_string());
    };

    let sentences: Vec<&str> = description
        .split(|c| c == '.' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut stdin_sentences = Vec::new();
    let mut other_sentences = Vec::new();
    for sentence in sentences {
        if sentence.to_ascii_lowercase().contains("standard input") {
            stdin_sentences.push(sentence);
        } else {
            other_sentences.push(sentence);
        }
    }

    let stdin_desc = if stdin_sentences.is_empty() {
        DEFAULT_STDIN.to_string()
    } else {
        stdin_sentences.join(". ")
    };
    let args_desc = if other_sentences.is_empty() {
        DEFAULT_ARGS.to_string()
    } else {
        other_sentences.join(". ")
    };
    (stdin_desc, args_desc)
}

fn extract_quoted_fields(description: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    quoted_field_regex()
        .captures_iter(description)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|field| seen.insert(field.clone()))
        .collect()
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('_');
            last_was_dash = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
