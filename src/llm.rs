//! `LLMProvider`: embedding + chat/generate trait, treated per spec.md §1 as
//! an external collaborator with only its interface specified.
//!
//! Trait shape generalizes `dashflow-registry/src/search.rs::Embedder` to
//! also cover chat/generate (component 1 of SPEC_FULL.md §2); the
//! deterministic test double mirrors `search.rs::MockEmbedder`'s hash-based
//! pseudo-embedding so discovery/fingerprinting tests are reproducible
//! without a live model.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Telemetry reported alongside any LLM call, per SPEC_FULL.md component 1.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LlmTelemetry {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
}

/// Options for a generate/chat call.
#[derive(Clone, Debug)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub json_mode: bool,
    /// Suppress chain-of-thought / "thinking" output some models emit.
    pub suppress_thinking: bool,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            json_mode: false,
            suppress_thinking: false,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenerateResult {
    pub text: String,
    pub telemetry: LlmTelemetry,
}

/// One turn in a chat-style request.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ChatResult {
    pub message: ChatMessage,
    pub telemetry: LlmTelemetry,
}

/// Embed text; generate/chat with optional JSON-mode, "thinking" suppression,
/// temperature, timeout; expose telemetry (tokens, ms). See SPEC_FULL.md §2
/// component 1.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<(Vec<f32>, LlmTelemetry)>;

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<GenerateResult>;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        opts: &GenerateOptions,
    ) -> Result<ChatResult>;
}

/// Deterministic in-memory double for tests: `embed` derives a stable
/// pseudo-random unit vector from a text hash (same recipe as the teacher's
/// `MockEmbedder`); `generate`/`chat` replay a scripted queue of responses so
/// discovery-arbitration and fingerprinting tests are reproducible.
pub struct ScriptedLlm {
    dimension: usize,
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    /// Structured `chat()` replies (with real `tool_calls`), queued
    /// separately from `responses` since a scripted tool call can't be
    /// expressed as plain generated text.
    chat_messages: std::sync::Mutex<std::collections::VecDeque<ChatMessage>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl ScriptedLlm {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            chat_messages: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response.into());
    }

    /// Queue a structured `chat()` reply (e.g. one carrying `tool_calls`)
    /// ahead of any plain `push_response` text. `chat()` drains this queue
    /// first so tests can script an assistant turn that calls a tool.
    pub fn push_chat_message(&self, message: ChatMessage) {
        self.chat_messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
    }

    pub fn fail_next_call(&self) {
        self.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let val = ((hash.wrapping_mul(i as u64 + 1)) % 1000) as f32 / 1000.0;
            embedding.push(val * 2.0 - 1.0);
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn embed(&self, text: &str) -> Result<(Vec<f32>, LlmTelemetry)> {
        Ok((
            self.pseudo_embed(text),
            LlmTelemetry {
                prompt_tokens: text.split_whitespace().count() as u64,
                completion_tokens: 0,
                latency_ms: 1,
            },
        ))
    }

    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<GenerateResult> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::OapError::Upstream(
                "scripted LLM failure".into(),
            ));
        }
        let text = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default();
        Ok(GenerateResult {
            telemetry: LlmTelemetry {
                prompt_tokens: prompt.split_whitespace().count() as u64,
                completion_tokens: text.split_whitespace().count() as u64,
                latency_ms: 1,
            },
            text,
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[Value],
        opts: &GenerateOptions,
    ) -> Result<ChatResult> {
        if let Some(message) = self.chat_messages.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Ok(ChatResult {
                message,
                telemetry: LlmTelemetry::default(),
            });
        }

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let result = self.generate(prompt, opts).await?;
        Ok(ChatResult {
            message: ChatMessage {
                role: "assistant".into(),
                content: result.text,
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            telemetry: result.telemetry,
        })
    }
}

/// Strip a leading `<think>...</think>` block, then locate the first
/// top-level `{...}` JSON object. Used by `DiscoveryEngine`/`ExperienceEngine`
/// to parse arbiter/fingerprinter replies per SPEC_FULL.md §4.4 step 4.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let stripped = strip_think_block(raw);
    let start = stripped.find('{')?;
    let bytes = stripped.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&stripped[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_think_block(raw: &str) -> &str {
    if let Some(open) = raw.find("<think>") {
        if let Some(close) = raw.find("</think>") {
            if close > open {
                let after = close + "</think>".len();
                return raw[after..].trim();
            }
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_embed_is_deterministic() {
        let llm = ScriptedLlm::new(16);
        let (a, _) = llm.embed("hello").await.unwrap();
        let (b, _) = llm.embed("hello").await.unwrap();
        assert_eq!(a, b);
        let (c, _) = llm.embed("different").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn scripted_generate_replays_queue() {
        let llm = ScriptedLlm::new(4);
        llm.push_response(r#"{"pick":"grep"}"#);
        let result = llm.generate("task", &GenerateOptions::default()).await.unwrap();
        assert_eq!(result.text, r#"{"pick":"grep"}"#);
    }

    #[tokio::test]
    async fn scripted_generate_can_be_made_to_fail() {
        let llm = ScriptedLlm::new(4);
        llm.fail_next_call();
        let result = llm.generate("task", &GenerateOptions::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn extract_json_object_strips_think_block() {
        let raw = "<think>reasoning here</think>\n{\"pick\":\"grep\",\"reason\":\"ok\"}";
        let json = extract_json_object(raw).unwrap();
        assert_eq!(json, r#"{"pick":"grep","reason":"ok"}"#);
    }

    #[test]
    fn extract_json_object_finds_first_brace_block_without_think() {
        let raw = "sure thing: {\"pick\":null} trailing text";
        assert_eq!(extract_json_object(raw).unwrap(), r#"{"pick":null}"#);
    }

    #[test]
    fn extract_json_object_none_when_unbalanced() {
        assert!(extract_json_object("no braces here").is_none());
    }
}
