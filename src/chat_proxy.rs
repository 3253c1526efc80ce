//! `ChatProxy`: the tool-augmented chat loop from SPEC_FULL.md §4.9. Checks
//! the experience cache, merges discovered/known tools into the chat's tool
//! registry, and runs a bounded round loop, degrading and retrying a stale
//! cache hit rather than failing the whole turn.
//!
//! Grounded on the teacher's request-handling style in
//! `dashflow-registry/src/api/server.rs` (one orchestration object wiring
//! together the store, the LLM, and a bounded retry loop) rather than any
//! single module, since no example repo runs a tool-calling chat loop.

use crate::credentials::CredentialStore;
use crate::discovery::DiscoveryEngine;
use crate::error::{OapError, Result};
use crate::experience::{DispatchPath, ExperienceEngine};
use crate::llm::{ChatMessage, GenerateOptions, LlmProvider};
use crate::manifest::Manifest;
use crate::manifest_store::ManifestStore;
use crate::tool_converter::ToolConverter;
use crate::tool_executor::ToolExecutor;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

pub struct ChatProxyConfig {
    pub max_rounds: usize,
}

pub struct ChatProxy {
    manifest_store: Arc<ManifestStore>,
    experience: Arc<ExperienceEngine>,
    discovery: Arc<DiscoveryEngine>,
    executor: Arc<ToolExecutor>,
    llm: Arc<dyn LlmProvider>,
    credentials: Arc<CredentialStore>,
    config: ChatProxyConfig,
}

#[derive(Clone, Debug)]
pub struct ChatProxyResult {
    pub reply: String,
    pub rounds_used: usize,
    pub path_taken: String,
    /// Whether any tool call in this attempt's round loop returned an
    /// `Error:`-prefixed result, per SPEC_FULL.md §4.9's `tools_had_errors`.
    pub tool_error: bool,
    /// Tool names injected into this attempt's LLM calls (the oap-owned
    /// registry, not including merged client-supplied tools).
    pub tools_injected: Vec<String>,
    /// Domain of the first oap-registry tool actually called this attempt,
    /// if any — the experience record saved on success names this domain,
    /// not an arbitrary first candidate (SPEC_FULL.md §4.9 step 6).
    called_domain: Option<String>,
}

/// The set of oap-owned tools a round loop may call, keyed by tool name so
/// an incoming tool call can be mapped back to the domain/manifest that
/// produced it. Built from a single cache/partial-match domain or from every
/// full-discovery candidate, per SPEC_FULL.md §4.9 step 2.
struct ToolRegistry {
    entries: IndexMap<String, (String, Manifest)>,
}

impl ToolRegistry {
    fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    fn insert(&mut self, domain: &str, manifest: Manifest) {
        let name = ToolConverter::tool_name(&manifest);
        self.entries.insert(name, (domain.to_string(), manifest));
    }

    fn tool_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn schemas(&self) -> Vec<Value> {
        self.entries.values().map(|(_, manifest)| ToolConverter::to_tool_schema(manifest)).collect()
    }

    fn get(&self, tool_name: &str) -> Option<&(String, Manifest)> {
        self.entries.get(tool_name)
    }
}

impl ChatProxy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest_store: Arc<ManifestStore>,
        experience: Arc<ExperienceEngine>,
        discovery: Arc<DiscoveryEngine>,
        executor: Arc<ToolExecutor>,
        llm: Arc<dyn LlmProvider>,
        credentials: Arc<CredentialStore>,
        config: ChatProxyConfig,
    ) -> Self {
        Self {
            manifest_store,
            experience,
            discovery,
            executor,
            llm,
            credentials,
            config,
        }
    }

    /// `client_tools` are merged into every LLM call alongside the oap
    /// registry (step 3); `top_k` bounds full-discovery candidate gathering;
    /// the effective round cap is `min(max_rounds, config.max_rounds)`
    /// (step 4).
    pub async fn run(
        &self,
        task: &str,
        client_tools: &[Value],
        top_k: usize,
        max_rounds: usize,
    ) -> Result<ChatProxyResult> {
        let max_rounds = max_rounds.min(self.config.max_rounds).max(1);
        match self.experience.route(task).await {
            DispatchPath::CacheHit(record) => {
                let registry = self.single_domain_registry(&record.domain)?;
                match self.run_rounds(task, &registry, client_tools, max_rounds, "cache_hit").await {
                    Ok(result) if !result.tool_error => {
                        self.experience.store().touch(&record.id, Utc::now());
                        Ok(result)
                    }
                    Ok(_) | Err(_) => {
                        // A cached manifest either errored or failed outright: per
                        // SPEC_FULL.md §4.9 step 5, degrade the record's confidence
                        // and retry once with full discovery rather than failing
                        // the whole turn.
                        self.experience.degrade_confidence(&record.id);
                        let mut retried = self.full_discovery(task, client_tools, top_k, max_rounds, "full_discovery").await?;
                        retried.path_taken = "degraded".to_string();
                        Ok(retried)
                    }
                }
            }
            DispatchPath::PartialMatch(record) => {
                // Skip re-discovery but still run the live chat round so
                // parameters are derived fresh rather than replayed verbatim.
                let registry = self.single_domain_registry(&record.domain)?;
                self.run_rounds(task, &registry, client_tools, max_rounds, "partial_match")
                    .await
                    .map(|mut result| {
                        result.path_taken = "partial_match".to_string();
                        result
                    })
            }
            DispatchPath::FullDiscovery => {
                self.full_discovery(task, client_tools, top_k, max_rounds, "full_discovery").await
            }
        }
    }

    fn single_domain_registry(&self, domain: &str) -> Result<ToolRegistry> {
        let record = self.manifest_store.get_or_err(domain)?;
        let mut registry = ToolRegistry::new();
        registry.insert(domain, record.manifest.clone());
        Ok(registry)
    }

    async fn full_discovery(
        &self,
        task: &str,
        client_tools: &[Value],
        top_k: usize,
        max_rounds: usize,
        path_label: &str,
    ) -> Result<ChatProxyResult> {
        let (_, candidates) = self.discovery.discover_with_top_k(task, top_k).await?;
        if candidates.is_empty() {
            return Err(OapError::NotFound(format!("no capability found for task: {task}")));
        }

        let mut registry = ToolRegistry::new();
        for candidate in &candidates {
            registry.insert(&candidate.domain, candidate.record.manifest.clone());
        }

        let mut result = self.run_rounds(task, &registry, client_tools, max_rounds, path_label).await?;
        if !result.tool_error {
            if let Some(domain) = result.called_domain.clone() {
                self.experience.record_success(task, &domain, vec![], Utc::now()).await;
            }
        }
        result.path_taken = path_label.to_string();
        Ok(result)
    }

    /// Runs the bounded round loop (step 4): each round calls the LLM with
    /// the merged oap-registry + client tool schemas, and every tool call
    /// the reply carries is executed (not just the first).
    async fn run_rounds(
        &self,
        task: &str,
        registry: &ToolRegistry,
        client_tools: &[Value],
        max_rounds: usize,
        path_label: &str,
    ) -> Result<ChatProxyResult> {
        let mut schemas = registry.schemas();
        schemas.extend_from_slice(client_tools);

        let mut conversation = vec![ChatMessage {
            role: "user".into(),
            content: task.to_string(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }];

        let mut rounds = 0;
        let mut tool_error = false;
        let mut called_domain: Option<String> = None;

        loop {
            rounds += 1;
            if rounds > max_rounds {
                return Err(OapError::Transient("chat loop exceeded max rounds".into()));
            }

            let chat_result = self.llm.chat(&conversation, &schemas, &GenerateOptions::default()).await?;

            let tool_calls = chat_result.message.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                return Ok(ChatProxyResult {
                    reply: chat_result.message.content,
                    rounds_used: rounds,
                    path_taken: path_label.to_string(),
                    tool_error,
                    tools_injected: registry.tool_names(),
                    called_domain,
                });
            }

            conversation.push(chat_result.message.clone());

            for call in &tool_calls {
                let tool_name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();

                let Some((domain, manifest)) = registry.get(tool_name) else {
                    // A client-supplied tool, not one of ours: we don't
                    // execute it on the caller's behalf, but still answer in
                    // the round so the loop can terminate instead of
                    // spinning on an unanswered tool call.
                    conversation.push(ChatMessage {
                        role: "tool".into(),
                        content: format!("Error: tool {tool_name} is not auto-executable by this proxy"),
                        tool_calls: None,
                        tool_call_id: call.get("id").and_then(|v| v.as_str()).map(str::to_string),
                        name: Some(tool_name.to_string()),
                    });
                    continue;
                };

                let args = parse_tool_arguments(call);
                let credential = self.credentials.get(domain);
                let outcome = self.executor.execute(manifest, &args, credential.as_ref()).await?;
                tool_error = tool_error || !outcome.success;
                if called_domain.is_none() {
                    called_domain = Some(domain.clone());
                }

                conversation.push(ChatMessage {
                    role: "tool".into(),
                    content: outcome.output,
                    tool_calls: None,
                    tool_call_id: call.get("id").and_then(|v| v.as_str()).map(str::to_string),
                    name: Some(tool_name.to_string()),
                });
            }
        }
    }
}

fn parse_tool_arguments(call: &Value) -> IndexMap<String, Value> {
    call.get("function")
        .and_then(|f| f.get("arguments"))
        .and_then(|a| match a {
            Value::String(s) => serde_json::from_str::<Value>(s).ok(),
            other => Some(other.clone()),
        })
        .and_then(|v| v.as_object().cloned())
        .map(|obj| obj.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experience::ExperienceStore;
    use crate::invoker::Invoker;
    use crate::llm::ScriptedLlm;
    use crate::manifest::{AuthKind, Invoke, Manifest};
    use crate::tool_executor::ToolExecutorConfig;
    use crate::url_guard::URLGuard;
    use std::time::Duration;

    fn manifest(name: &str) -> Manifest {
        Manifest::builder(name)
            .description(format!("{name} capability"))
            .invoke(Invoke {
                method: "stdio".into(),
                url: "/usr/bin/true".into(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap()
    }

    async fn build_proxy() -> (ChatProxy, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new(8));
        let vector_index = Arc::new(crate::vector_index::InMemoryVectorIndex::new());
        let manifest_store = Arc::new(ManifestStore::new(vector_index));
        let (embedding, _) = llm.embed("grep").await.unwrap();
        manifest_store.put("grep.example.com", manifest("grep"), embedding).await.unwrap();

        let experience_store = Arc::new(ExperienceStore::new());
        let experience = Arc::new(ExperienceEngine::new(experience_store, llm.clone(), 0.8));
        let discovery = Arc::new(DiscoveryEngine::new(manifest_store.clone(), llm.clone(), 5, Duration::from_secs(1)));
        let invoker = Arc::new(Invoker::new(reqwest::Client::new(), URLGuard::new(Default::default())));
        let executor = Arc::new(ToolExecutor::new(
            invoker,
            llm.clone(),
            ToolExecutorConfig {
                invoke_timeout: Duration::from_secs(5),
                max_result_bytes: 4000,
                summarize_threshold: 8000,
                chunk_size: 4000,
            },
        ));

        let proxy = ChatProxy::new(
            manifest_store,
            experience,
            discovery,
            executor,
            llm.clone(),
            Arc::new(crate::credentials::CredentialStore::empty()),
            ChatProxyConfig { max_rounds: 10 },
        );
        (proxy, llm)
    }

    #[tokio::test]
    async fn full_discovery_path_returns_final_reply_without_tool_call() {
        let (proxy, llm) = build_proxy().await;
        // First generate() call is the experience engine's fingerprinter;
        // an unparseable reply sends routing to full_discovery, same as a
        // cold cache. The second is the chat round's final reply.
        llm.push_response("not json");
        llm.push_response("here is your answer");
        let result = proxy.run("search for a pattern", &[], 5, 10).await.unwrap();
        assert_eq!(result.reply, "here is your answer");
        assert_eq!(result.path_taken, "full_discovery");
        assert!(result.tools_injected.iter().any(|n| n == "oap_grep"));
    }

    #[tokio::test]
    async fn no_match_surfaces_not_found() {
        let llm = Arc::new(ScriptedLlm::new(8));
        let manifest_store = Arc::new(ManifestStore::new(Arc::new(crate::vector_index::InMemoryVectorIndex::new())));
        let experience = Arc::new(ExperienceEngine::new(Arc::new(ExperienceStore::new()), llm.clone(), 0.8));
        let discovery = Arc::new(DiscoveryEngine::new(manifest_store.clone(), llm.clone(), 5, Duration::from_secs(1)));
        let invoker = Arc::new(Invoker::new(reqwest::Client::new(), URLGuard::new(Default::default())));
        let executor = Arc::new(ToolExecutor::new(
            invoker,
            llm.clone(),
            ToolExecutorConfig {
                invoke_timeout: Duration::from_secs(5),
                max_result_bytes: 4000,
                summarize_threshold: 8000,
                chunk_size: 4000,
            },
        ));
        let proxy = ChatProxy::new(
            manifest_store,
            experience,
            discovery,
            executor,
            llm,
            Arc::new(crate::credentials::CredentialStore::empty()),
            ChatProxyConfig { max_rounds: 10 },
        );

        let err = proxy.run("do something impossible", &[], 5, 10).await.unwrap_err();
        assert!(matches!(err, OapError::NotFound(_)));
    }

    #[tokio::test]
    async fn cache_hit_tool_error_degrades_confidence_and_retries_with_full_discovery() {
        let llm = Arc::new(ScriptedLlm::new(8));
        let vector_index = Arc::new(crate::vector_index::InMemoryVectorIndex::new());
        let manifest_store = Arc::new(ManifestStore::new(vector_index));
        let failing_manifest = Manifest::builder("grep")
            .description("grep capability")
            .invoke(Invoke {
                method: "stdio".into(),
                url: "/usr/bin/false".into(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap();
        let (embedding, _) = llm.embed("grep").await.unwrap();
        manifest_store.put("grep.example.com", failing_manifest, embedding).await.unwrap();

        let experience_store = Arc::new(ExperienceStore::new());
        let experience = Arc::new(ExperienceEngine::new(experience_store, llm.clone(), 0.8));
        let discovery = Arc::new(DiscoveryEngine::new(manifest_store.clone(), llm.clone(), 5, Duration::from_secs(1)));
        let invoker = Arc::new(Invoker::new(reqwest::Client::new(), URLGuard::new(Default::default())));
        let executor = Arc::new(ToolExecutor::new(
            invoker,
            llm.clone(),
            ToolExecutorConfig {
                invoke_timeout: Duration::from_secs(5),
                max_result_bytes: 4000,
                summarize_threshold: 8000,
                chunk_size: 4000,
            },
        ));
        let proxy = ChatProxy::new(
            manifest_store,
            experience,
            discovery,
            executor,
            llm.clone(),
            Arc::new(crate::credentials::CredentialStore::empty()),
            ChatProxyConfig { max_rounds: 10 },
        );

        // Seed a cache-eligible record for this exact task (consumes one
        // fingerprinter call).
        llm.push_response(r#"{"fingerprint":"run.shell.check","domain":"run.shell"}"#);
        let record = proxy
            .experience
            .record_success("run the shell check", "grep.example.com", vec![], Utc::now())
            .await;
        assert_eq!(record.confidence, 1.0);

        // In consumption order: route()'s fingerprinter call; the cache-hit
        // round's tool-calling turn (forces a nonzero stdio exit); the
        // cache-hit round's follow-up turn that ends the loop; the
        // full-discovery retry's final reply.
        llm.push_response(r#"{"fingerprint":"run.shell.check","domain":"run.shell"}"#);
        llm.push_chat_message(ChatMessage {
            role: "assistant".into(),
            content: String::new(),
            tool_calls: Some(vec![serde_json::json!({
                "id": "1",
                "function": {"name": "oap_grep", "arguments": "{\"args\":\"--bogus-flag\"}"}
            })]),
            tool_call_id: None,
            name: None,
        });
        llm.push_response("tool failed, giving up this round");
        llm.push_response("recovered via full discovery");

        let result = proxy.run("run the shell check", &[], 5, 10).await.unwrap();
        assert_eq!(result.path_taken, "degraded");
        assert_eq!(result.reply, "recovered via full discovery");
        let degraded = proxy.experience.store().get(&record.id).unwrap();
        assert!(degraded.confidence < record.confidence);
    }

    #[tokio::test]
    async fn multiple_tool_calls_in_one_round_are_all_executed() {
        let llm = Arc::new(ScriptedLlm::new(8));
        let vector_index = Arc::new(crate::vector_index::InMemoryVectorIndex::new());
        let manifest_store = Arc::new(ManifestStore::new(vector_index));
        let (embedding_grep, _) = llm.embed("grep").await.unwrap();
        manifest_store.put("grep.example.com", manifest("grep"), embedding_grep).await.unwrap();
        let jq_manifest = Manifest::builder("jq")
            .description("jq capability")
            .invoke(Invoke {
                method: "stdio".into(),
                url: "/usr/bin/true".into(),
                auth: AuthKind::None,
                auth_name: None,
                auth_in: None,
                headers: Default::default(),
                streaming: None,
            })
            .build()
            .unwrap();
        let (embedding_jq, _) = llm.embed("jq").await.unwrap();
        manifest_store.put("jq.example.com", jq_manifest, embedding_jq).await.unwrap();

        let experience_store = Arc::new(ExperienceStore::new());
        let experience = Arc::new(ExperienceEngine::new(experience_store, llm.clone(), 0.8));
        let discovery = Arc::new(DiscoveryEngine::new(manifest_store.clone(), llm.clone(), 5, Duration::from_secs(1)));
        let invoker = Arc::new(Invoker::new(reqwest::Client::new(), URLGuard::new(Default::default())));
        let executor = Arc::new(ToolExecutor::new(
            invoker,
            llm.clone(),
            ToolExecutorConfig {
                invoke_timeout: Duration::from_secs(5),
                max_result_bytes: 4000,
                summarize_threshold: 8000,
                chunk_size: 4000,
            },
        ));
        let proxy = ChatProxy::new(
            manifest_store,
            experience,
            discovery,
            executor,
            llm.clone(),
            Arc::new(crate::credentials::CredentialStore::empty()),
            ChatProxyConfig { max_rounds: 10 },
        );

        llm.push_response("not json"); // fingerprinter miss -> full_discovery
        llm.push_chat_message(ChatMessage {
            role: "assistant".into(),
            content: String::new(),
            tool_calls: Some(vec![
                serde_json::json!({"id": "1", "function": {"name": "oap_grep", "arguments": "{\"args\":\"x\"}"}}),
                serde_json::json!({"id": "2", "function": {"name": "oap_jq", "arguments": "{\"args\":\"y\"}"}}),
            ]),
            tool_call_id: None,
            name: None,
        });
        llm.push_response("both tools ran");

        let result = proxy.run("search and parse", &[], 5, 10).await.unwrap();
        assert_eq!(result.reply, "both tools ran");
        assert!(!result.tool_error);
    }
}
