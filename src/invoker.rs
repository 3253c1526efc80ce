//! `Invoker`: single entry point that dials a manifest's `invoke` block,
//! branching on `method` into the stdio path or the HTTP path.
//!
//! Stdio subprocess handling (piped stdio, concurrent reader tasks, timeout
//! + kill) is grounded on `dashflow-shell-tool/src/lib.rs`. The HTTP redirect
//! loop re-validates every hop through [`URLGuard`], since a manifest's
//! `invoke.url` passing SSRF checks says nothing about where its server
//! might redirect to.

use crate::error::{OapError, Result};
use crate::manifest::{AuthKind, Invoke};
use crate::url_guard::URLGuard;
use indexmap::IndexMap;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Command directories a stdio invocation may launch from, per
/// SPEC_FULL.md §4.6's fixed allowlist.
const ALLOWED_STDIO_PREFIXES: &[&str] = &["/usr/bin", "/usr/local/bin", "/bin", "/opt/homebrew/bin"];

const MAX_REDIRECTS: u8 = 5;
const TRUNCATE_BYTES: usize = 10 * 1024;

/// Resolve a manifest's `invoke.url` stdio target to an allow-listed
/// absolute path, per SPEC_FULL.md §4.3: either it's already an absolute
/// path under one of [`ALLOWED_STDIO_PREFIXES`], or it's a bare name that a
/// `PATH` lookup resolves to one. Anything else — including an absolute path
/// outside the allowlist — returns `None` before any subprocess is spawned.
fn resolve_stdio_command(url: &str) -> Option<std::path::PathBuf> {
    let candidate = Path::new(url);
    if candidate.is_absolute() {
        return ALLOWED_STDIO_PREFIXES
            .iter()
            .any(|prefix| candidate.starts_with(prefix))
            .then(|| candidate.to_path_buf());
    }

    for prefix in ALLOWED_STDIO_PREFIXES {
        let joined = Path::new(prefix).join(url);
        if joined.is_file() {
            return Some(joined);
        }
    }
    None
}

#[derive(Clone, Debug)]
pub struct InvokeCredential {
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct InvocationResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub body: String,
    pub truncated: bool,
    pub error: Option<String>,
}

pub struct Invoker {
    client: Client,
    url_guard: URLGuard,
}

impl Invoker {
    pub fn new(client: Client, url_guard: URLGuard) -> Self {
        Self { client, url_guard }
    }

    pub async fn invoke(
        &self,
        invoke: &Invoke,
        params: &IndexMap<String, Value>,
        stdin_text: Option<&str>,
        credential: Option<&InvokeCredential>,
        timeout: Duration,
    ) -> Result<InvocationResult> {
        if invoke.method.eq_ignore_ascii_case("stdio") {
            self.invoke_stdio(invoke, params, stdin_text, timeout).await
        } else {
            self.invoke_http(invoke, params, credential, timeout).await
        }
    }

    async fn invoke_stdio(
        &self,
        invoke: &Invoke,
        params: &IndexMap<String, Value>,
        stdin_text: Option<&str>,
        timeout: Duration,
    ) -> Result<InvocationResult> {
        let resolved = resolve_stdio_command(&invoke.url).ok_or_else(|| {
            OapError::Forbidden(format!(
                "stdio command {} does not resolve to an allowed path prefix",
                invoke.url
            ))
        })?;

        let mut command = Command::new(&resolved);
        for value in params.values() {
            command.arg(value_to_arg(value));
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            OapError::Upstream(format!("failed to spawn stdio command {}: {e}", invoke.url))
        })?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let stdin_text = stdin_text.map(str::to_string);
        let stdin_task = tokio::spawn(async move {
            if let Some(text) = stdin_text {
                let _ = stdin.write_all(text.as_bytes()).await;
            }
            // Drop `stdin` here to close the write end so readers relying on
            // EOF (e.g. `grep`, `cat`) don't block forever.
        });
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let wait_result = tokio::time::timeout(timeout, child.wait()).await;

        let status = match wait_result {
            Ok(status) => status.map_err(|e| OapError::Upstream(format!("stdio wait failed: {e}")))?,
            Err(_) => {
                let _ = child.kill().await;
                return Ok(InvocationResult {
                    success: false,
                    status_code: None,
                    body: String::new(),
                    truncated: false,
                    error: Some(format!("stdio command timed out after {timeout:?}")),
                });
            }
        };

        let _ = stdin_task.await;
        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        let (body, truncated) = truncate_utf8(if status.success() { &stdout_bytes } else { &stderr_bytes });

        Ok(InvocationResult {
            success: status.success(),
            status_code: status.code().map(|c| c as u16),
            body,
            truncated,
            error: if status.success() {
                None
            } else {
                Some(format!("command exited with status {:?}", status.code()))
            },
        })
    }

    async fn invoke_http(
        &self,
        invoke: &Invoke,
        params: &IndexMap<String, Value>,
        credential: Option<&InvokeCredential>,
        timeout: Duration,
    ) -> Result<InvocationResult> {
        let method = match invoke.method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => {
                return Ok(InvocationResult {
                    success: false,
                    status_code: None,
                    body: String::new(),
                    truncated: false,
                    error: Some(format!("Unsupported invoke method: {other}")),
                });
            }
        };
        let mut url = url::Url::parse(&invoke.url)
            .map_err(|e| OapError::InvalidRequest(format!("invalid invoke url: {e}")))?;

        if method == Method::GET {
            for (key, value) in params {
                url.query_pairs_mut().append_pair(key, &value_to_query_string(value));
            }
        }

        let mut hops_remaining = MAX_REDIRECTS;
        loop {
            self.url_guard.validate(&url).await?;

            let mut request = self.client.request(method.clone(), url.clone());
            for (name, value) in &invoke.headers {
                request = request.header(name, value);
            }
            if let Some(cred) = credential {
                request = apply_auth(request, invoke, cred);
            }
            if method != Method::GET {
                request = request.json(params);
            }

            let response = match tokio::time::timeout(timeout, request.send()).await {
                Ok(sent) => sent.map_err(|e| OapError::Upstream(format!("http request failed: {e}")))?,
                Err(_) => {
                    return Ok(InvocationResult {
                        success: false,
                        status_code: None,
                        body: String::new(),
                        truncated: false,
                        error: Some(format!("HTTP timeout after {}s", timeout.as_secs())),
                    });
                }
            };

            let status = response.status();
            if status.is_redirection() {
                if hops_remaining == 0 {
                    return Err(OapError::Upstream("too many redirects".into()));
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| OapError::Upstream("redirect response missing Location header".into()))?;
                url = url
                    .join(location)
                    .map_err(|e| OapError::Upstream(format!("invalid redirect location: {e}")))?;
                hops_remaining -= 1;
                continue;
            }

            let success = status.is_success();
            let body_bytes = response
                .bytes()
                .await
                .map_err(|e| OapError::Upstream(format!("failed to read response body: {e}")))?;
            let (body, truncated) = truncate_utf8(&body_bytes);

            return Ok(InvocationResult {
                success,
                status_code: Some(status.as_u16()),
                body,
                truncated,
                error: if success { None } else { Some(error_message_for(status)) },
            });
        }
    }
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    invoke: &Invoke,
    credential: &InvokeCredential,
) -> reqwest::RequestBuilder {
    match invoke.auth {
        AuthKind::Bearer => request.bearer_auth(&credential.value),
        AuthKind::ApiKey => {
            let header = invoke.auth_name.as_deref().unwrap_or("X-API-Key");
            request.header(header, &credential.value)
        }
        AuthKind::None | AuthKind::Other => request,
    }
}

fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn error_message_for(status: StatusCode) -> String {
    format!("upstream returned status {status}")
}

fn truncate_utf8(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= TRUNCATE_BYTES {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    let mut end = TRUNCATE_BYTES;
    while end > 0 && !bytes.is_char_boundary(end) {
        end -= 1;
    }
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), true)
}
