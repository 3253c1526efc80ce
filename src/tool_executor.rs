//! `ToolExecutor::execute`: run a tool call named by [`ToolConverter`]
//! against the manifest it was derived from, injecting credentials and
//! summarizing oversized results.
//!
//! Grounded on `dashflow-shell-tool`'s argument-mapping conventions for the
//! stdio branch and on SPEC_FULL.md §4.7 for the map-reduce summarization
//! ladder, which is deliberately sequential rather than parallelized so a
//! later chunk can be summarized in the context of the prior chunk's digest.

use crate::invoker::{InvokeCredential, Invoker};
use crate::llm::{GenerateOptions, LlmProvider};
use crate::manifest::Manifest;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const SUMMARIZE_SYSTEM_PROMPT: &str =
    "Summarize the following tool output, preserving concrete facts, numbers, and identifiers. \
Be concise.";

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub summarized: bool,
    pub error: Option<String>,
}

pub struct ToolExecutorConfig {
    pub invoke_timeout: Duration,
    pub max_result_bytes: usize,
    pub summarize_threshold: usize,
    pub chunk_size: usize,
}

pub struct ToolExecutor {
    invoker: Arc<Invoker>,
    llm: Arc<dyn LlmProvider>,
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(invoker: Arc<Invoker>, llm: Arc<dyn LlmProvider>, config: ToolExecutorConfig) -> Self {
        Self { invoker, llm, config }
    }

    pub async fn execute(
        &self,
        manifest: &Manifest,
        args: &IndexMap<String, Value>,
        credential: Option<&InvokeCredential>,
    ) -> crate::error::Result<ExecutionOutcome> {
        let (params, stdin_text) = map_arguments(manifest, args);
        let result = self
            .invoker
            .invoke(&manifest.invoke, &params, stdin_text.as_deref(), credential, self.config.invoke_timeout)
            .await?;

        if !result.success {
            return Ok(ExecutionOutcome {
                success: false,
                output: result.body,
                summarized: false,
                error: result.error,
            });
        }

        if result.body.len() <= self.config.summarize_threshold {
            return Ok(ExecutionOutcome {
                success: true,
                output: result.body,
                summarized: false,
                error: None,
            });
        }

        match self.summarize(&result.body).await {
            Ok(summary) => Ok(ExecutionOutcome {
                success: true,
                output: summary,
                summarized: true,
                error: None,
            }),
            Err(_) => Ok(ExecutionOutcome {
                success: true,
                output: format!("{}...(truncated)", hard_truncate(&result.body, self.config.max_result_bytes)),
                summarized: true,
                error: None,
            }),
        }
    }

    /// Map-reduce over fixed-size, newline-boundary-aligned chunks: each
    /// chunk is summarized in sequence, carrying the running digest forward
    /// as context for the next chunk, then the per-chunk summaries are
    /// joined into the final result.
    async fn summarize(&self, text: &str) -> crate::error::Result<String> {
        let chunks = chunk_by_newline_boundary(text, self.config.chunk_size);
        let opts = GenerateOptions {
            temperature: 0.0,
            json_mode: false,
            suppress_thinking: true,
            timeout: Duration::from_secs(60),
        };

        let mut running_digest = String::new();
        for chunk in chunks {
            let prompt = if running_digest.is_empty() {
                format!("{SUMMARIZE_SYSTEM_PROMPT}\n\n{chunk}")
            } else {
                format!(
                    "{SUMMARIZE_SYSTEM_PROMPT}\n\nPrior summary so far:\n{running_digest}\n\nNew content:\n{chunk}"
                )
            };
            let result = self.llm.generate(&prompt, &opts).await?;
            running_digest = result.text;
        }
        Ok(running_digest)
    }
}

/// Argument-mapping ladder (SPEC_FULL.md §4.6), branching on how the
/// manifest expects its input delivered:
/// - `invoke.method == stdio`: `args["stdin"]` (if present) becomes piped
///   stdin; `args["args"]` (a shell-style argument string) or, absent that,
///   the first non-stdin string-valued argument, is split on whitespace into
///   positional `arg0`, `arg1`, ... params.
/// - `input.format` containing `json`: arguments forwarded to the invoker
///   unchanged.
/// - otherwise: the first available value is wrapped as `{"input": ...}`
///   and duplicated as stdin text, so a plain HTTP POST and a bare stdio
///   command both receive the same payload.
fn map_arguments(manifest: &Manifest, args: &IndexMap<String, Value>) -> (IndexMap<String, Value>, Option<String>) {
    if manifest.invoke.method.eq_ignore_ascii_case("stdio") {
        let stdin_text = args.get("stdin").and_then(|v| v.as_str()).map(str::to_string);
        let args_str = args
            .get("args")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                args.iter()
                    .find(|(k, _)| k.as_str() != "stdin" && k.as_str() != "args")
                    .and_then(|(_, v)| v.as_str())
                    .map(str::to_string)
            });

        let mut positional = IndexMap::new();
        if let Some(args_str) = args_str {
            for (i, token) in args_str.split_whitespace().enumerate() {
                positional.insert(format!("arg{i}"), Value::String(token.to_string()));
            }
        }
        return (positional, stdin_text);
    }

    let is_json = manifest
        .input
        .as_ref()
        .map(|i| i.format.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    if is_json {
        return (args.clone(), None);
    }

    let value = args
        .get("input")
        .cloned()
        .or_else(|| args.values().next().cloned())
        .unwrap_or(Value::Null);
    let stdin_text = value.as_str().map(str::to_string);
    let mut wrapped = IndexMap::new();
    wrapped.insert("input".to_string(), value);
    (wrapped, stdin_text)
}

fn chunk_by_newline_boundary(text: &str, chunk_size: usize) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    while start < bytes.len() {
        let mut end = (start + chunk_size).min(bytes.len());
        if end < bytes.len() {
            if let Some(newline_offset) = text[start..end].rfind('\n') {
                end = start + newline_offset + 1;
            }
        }
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            end = (start + chunk_size).min(bytes.len());
            while end > start && !text.is_char_boundary(end) {
                end -= 1;
            }
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

fn hard_truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
