//! Axum router assembly and route handlers for both HTTP APIs described in
//! SPEC_FULL.md §6: `discovery_router` fronts the discovery/invocation/
//! procedural-memory engine, `trust_router` fronts the attestation service.
//!
//! Grounded on `dashflow-registry/src/api/server.rs`'s router-assembly shape
//! (one handler function per route, `TraceLayer` + a request-id stamp on
//! every router, state threaded in via `axum::extract::State`).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;

use crate::api::middleware;
use crate::api::state::{DiscoveryState, TrustState};
use crate::api::types::*;
use crate::discovery::DiscoveryOutcome;
use crate::error::OapError;
use crate::experience::DispatchPath;
use crate::llm::ChatMessage;
use crate::tool_converter::ToolConverter;
use crate::trust::ChallengeKind;

/// Wraps [`OapError`] in axum's `IntoResponse`, mapping each kind to the
/// HTTP status SPEC_FULL.md §6 assigns it. `Upstream`/`Transient`/`Internal`
/// and the wrapper variants all fall back to a 5xx, since none of them are
/// meant to reach a client except as a last resort.
pub struct ApiError(OapError);

impl From<OapError> for ApiError {
    fn from(e: OapError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OapError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OapError::Forbidden(_) => StatusCode::FORBIDDEN,
            OapError::NotFound(_) => StatusCode::NOT_FOUND,
            OapError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OapError::Upstream(_) => StatusCode::BAD_GATEWAY,
            OapError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ApiErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Clamp a request-level `top_k` to the `[1, 20]` range SPEC_FULL.md §6
/// documents for `/v1/discover` and `/v1/tools`.
fn clamp_top_k(top_k: usize) -> usize {
    top_k.clamp(1, 20)
}

/// Map a tool-call JSON schema's first required parameter to the raw task
/// text. There is no live LLM-driven argument extraction at this layer
/// (that only happens inside [`crate::chat_proxy::ChatProxy`]'s round loop),
/// so this is a documented simplification for direct `/v1/experience/invoke`
/// callers: the whole task string becomes the first declared argument.
fn derive_params_from_schema(schema: &Value, task: &str) -> IndexMap<String, Value> {
    let mut args = IndexMap::new();
    let first_required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .and_then(|fields| fields.first())
        .and_then(|v| v.as_str());

    let key = first_required.unwrap_or("input");
    args.insert(key.to_string(), Value::String(task.to_string()));
    args
}

pub fn discovery_router(state: DiscoveryState) -> Router {
    Router::new()
        .route("/v1/discover", post(discover_handler))
        .route("/v1/manifests", get(list_manifests_handler))
        .route("/v1/manifests/:domain", get(get_manifest_handler))
        .route("/health", get(discovery_health_handler))
        .route("/v1/tools", post(tools_handler))
        .route("/v1/chat", post(chat_handler))
        .route("/v1/experience/invoke", post(experience_invoke_handler))
        .route("/v1/experience/records", get(experience_records_handler))
        .route(
            "/v1/experience/records/:id",
            get(get_experience_record_handler).delete(delete_experience_record_handler),
        )
        .route("/v1/experience/stats", get(experience_stats_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::require_backend_token))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn trust_router(state: TrustState) -> Router {
    Router::new()
        .route("/v1/attest/domain", post(attest_domain_handler))
        .route("/v1/attest/domain/:domain/status", get(attest_domain_status_handler))
        .route("/v1/attest/capability", post(attest_capability_handler))
        .route("/v1/attestations/:domain", get(list_attestations_handler))
        .route("/v1/keys", get(keys_handler))
        .route("/health", get(trust_health_handler))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn discover_handler(
    State(state): State<DiscoveryState>,
    Json(body): Json<DiscoverRequest>,
) -> ApiResult<Json<DiscoverResponse>> {
    let top_k = clamp_top_k(body.top_k);
    let (outcome, candidates) = state.discovery.discover_with_top_k(&body.task, top_k).await?;

    let matched = match &outcome {
        DiscoveryOutcome::Picked { candidate, arbiter_reason } => Some(MatchDto {
            domain: candidate.domain.clone(),
            name: candidate.record.manifest.name.clone(),
            description: candidate.record.manifest.description.clone(),
            reason: arbiter_reason.clone(),
        }),
        DiscoveryOutcome::NoMatch => None,
    };

    Ok(Json(DiscoverResponse {
        task: body.task,
        matched,
        meta: DiscoverMeta { candidates_considered: candidates.len() },
        candidates: candidates.iter().map(CandidateDto::from).collect(),
    }))
}

async fn list_manifests_handler(State(state): State<DiscoveryState>) -> Json<Vec<ManifestSummaryDto>> {
    Json(state.manifest_store.list().iter().map(ManifestSummaryDto::from).collect())
}

async fn get_manifest_handler(
    State(state): State<DiscoveryState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<ManifestSummaryDto>> {
    let record = state.manifest_store.get_or_err(&domain)?;
    Ok(Json(ManifestSummaryDto::from(&record)))
}

async fn discovery_health_handler(State(state): State<DiscoveryState>) -> ApiResult<Json<DiscoveryHealthResponse>> {
    let index_count = state.manifest_store.vector_index().count().await?;
    Ok(Json(DiscoveryHealthResponse {
        status: "ok",
        llm: "configured",
        index_count,
    }))
}

async fn tools_handler(
    State(state): State<DiscoveryState>,
    Json(body): Json<ToolsRequest>,
) -> ApiResult<Json<ToolsResponse>> {
    let top_k = clamp_top_k(body.top_k);
    let (_, candidates) = state.discovery.discover_with_top_k(&body.task, top_k).await?;

    let mut tools = Vec::new();
    let mut registry = BTreeMap::new();
    for candidate in &candidates {
        let manifest = &candidate.record.manifest;
        tools.push(ToolConverter::to_tool_schema(manifest));
        registry.insert(
            ToolConverter::tool_name(manifest),
            RegistryEntryDto {
                domain: candidate.domain.clone(),
                manifest_name: manifest.name.clone(),
            },
        );
    }

    Ok(Json(ToolsResponse { tools, registry }))
}

async fn chat_handler(
    State(state): State<DiscoveryState>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let task = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let client_tools = body.tools.clone().unwrap_or_default();
    let top_k = clamp_top_k(body.oap_top_k);
    let max_rounds = body.oap_max_rounds.max(1);

    let result = state.chat_proxy.run(&task, &client_tools, top_k, max_rounds).await?;
    let oap_tools_injected = result.tools_injected.clone();
    let message = ChatMessage {
        role: "assistant".into(),
        content: result.reply,
        tool_calls: None,
        tool_call_id: None,
        name: None,
    };

    let oap_debug = body
        .oap_debug
        .then(|| serde_json::json!({"rounds_used": result.rounds_used, "path_taken": result.path_taken}));

    Ok(Json(ChatResponse {
        message,
        oap_tools_injected,
        oap_round: result.rounds_used,
        oap_experience_cache: Some(result.path_taken),
        oap_debug,
    }))
}

async fn experience_invoke_handler(
    State(state): State<DiscoveryState>,
    Json(body): Json<ExperienceInvokeRequest>,
) -> ApiResult<Json<ExperienceInvokeResponse>> {
    let top_k = clamp_top_k(body.top_k);
    let now = Utc::now();

    let (route, matched_domain, experience_record, candidates) =
        match state.experience.route_with_threshold(&body.task, body.confidence_threshold).await {
            DispatchPath::CacheHit(record) => {
                let route = RouteDto {
                    path: "cache_hit".into(),
                    cache_confidence: Some(record.confidence),
                    experience_id: Some(record.id.clone()),
                };
                let domain = record.domain.clone();
                (route, Some(domain), Some(record), Vec::new())
            }
            DispatchPath::PartialMatch(record) => {
                let route = RouteDto {
                    path: "partial_match".into(),
                    cache_confidence: Some(record.confidence),
                    experience_id: Some(record.id.clone()),
                };
                let domain = record.domain.clone();
                (route, Some(domain), Some(record), Vec::new())
            }
            DispatchPath::FullDiscovery => {
                let (outcome, candidates) = state.discovery.discover_with_top_k(&body.task, top_k).await?;
                let route = RouteDto {
                    path: "full_discovery".into(),
                    cache_confidence: None,
                    experience_id: None,
                };
                match outcome {
                    DiscoveryOutcome::Picked { candidate, .. } => (route, Some(candidate.domain), None, candidates),
                    DiscoveryOutcome::NoMatch => (route, None, None, candidates),
                }
            }
        };

    let Some(domain) = matched_domain else {
        return Ok(Json(ExperienceInvokeResponse {
            task: body.task,
            route,
            matched: None,
            experience: experience_record,
            invocation_result: None,
            candidates: candidates.iter().map(CandidateDto::from).collect(),
        }));
    };

    let record = state.manifest_store.get_or_err(&domain)?;
    let matched = MatchDto {
        domain: domain.clone(),
        name: record.manifest.name.clone(),
        description: record.manifest.description.clone(),
        reason: None,
    };

    let schema = ToolConverter::to_tool_schema(&record.manifest);
    let args = derive_params_from_schema(&schema["function"]["parameters"], &body.task);
    let credential = state.credentials.get(&domain);
    let outcome = state.executor.execute(&record.manifest, &args, credential.as_ref()).await?;

    if route.path == "full_discovery" && outcome.success {
        state.experience.record_success(&body.task, &domain, Vec::new(), now).await;
    }

    Ok(Json(ExperienceInvokeResponse {
        task: body.task,
        route,
        matched: Some(matched),
        experience: experience_record,
        invocation_result: Some(outcome.into()),
        candidates: candidates.iter().map(CandidateDto::from).collect(),
    }))
}

async fn experience_records_handler(
    State(state): State<DiscoveryState>,
    Query(query): Query<ExperienceRecordsQuery>,
) -> Json<ExperienceRecordsPage> {
    let mut records = state.experience_store.list_all();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = records.len();

    let page = query.page.max(1);
    let limit = query.limit.max(1);
    let start = (page - 1) * limit;
    let page_records = records.into_iter().skip(start).take(limit).collect();

    Json(ExperienceRecordsPage {
        records: page_records,
        page,
        limit,
        total,
    })
}

async fn get_experience_record_handler(
    State(state): State<DiscoveryState>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::experience::ExperienceRecord>> {
    state
        .experience_store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError(OapError::NotFound(format!("no experience record {id}"))))
}

async fn delete_experience_record_handler(
    State(state): State<DiscoveryState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    state
        .experience_store
        .delete(&id)
        .ok_or_else(|| OapError::NotFound(format!("no experience record {id}")))?;
    Ok(Json(DeleteResponse { deleted: id }))
}

async fn experience_stats_handler(State(state): State<DiscoveryState>) -> Json<crate::experience::ExperienceStats> {
    Json(state.experience_store.stats(state.config.experience.confidence_threshold))
}

async fn attest_domain_handler(
    State(state): State<TrustState>,
    Json(body): Json<AttestDomainRequest>,
) -> ApiResult<Json<ChallengeResponse>> {
    let kind = match body.method {
        ChallengeMethod::Dns => ChallengeKind::DnsTxt,
        ChallengeMethod::Http => ChallengeKind::HttpWellKnown,
    };
    let result = state
        .attestation_service
        .initiate_domain_attestation(&body.domain, kind, Utc::now())
        .await?;

    Ok(Json(ChallengeResponse {
        domain: result.domain,
        token: result.token,
        instructions: result.instructions,
        layer0_passed: result.layer0_passed,
        layer0_errors: result.layer0_errors,
        expires_at: result.expires_at,
    }))
}

/// Unlike most handlers this never surfaces an `OapError` as an HTTP error:
/// an unverified challenge is a normal, expected outcome of polling this
/// route before DNS/HTTP propagation completes, per SPEC_FULL.md §6's
/// testable property ("after DNS is satisfied, GET status returns
/// challenge_verified=true and attestation.jws").
async fn attest_domain_status_handler(
    State(state): State<TrustState>,
    Path(domain): Path<String>,
) -> Json<ChallengeStatusResponse> {
    match state.attestation_service.verify_domain_attestation(&domain, Utc::now()).await {
        Ok(attestation) => Json(ChallengeStatusResponse {
            domain,
            challenge_verified: true,
            attestation: Some(AttestationDto::from(&attestation)),
            error: None,
        }),
        Err(e) => Json(ChallengeStatusResponse {
            domain,
            challenge_verified: false,
            attestation: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn attest_capability_handler(
    State(state): State<TrustState>,
    Json(body): Json<AttestCapabilityRequest>,
) -> Json<AttestCapabilityResponse> {
    match state.attestation_service.attest_capability(&body.domain, Utc::now()).await {
        Ok(attestation) => Json(AttestCapabilityResponse {
            passed: true,
            attestation: Some(AttestationDto::from(&attestation)),
            error: None,
        }),
        Err(e) => Json(AttestCapabilityResponse {
            passed: false,
            attestation: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn list_attestations_handler(State(state): State<TrustState>, Path(domain): Path<String>) -> Json<AttestationsResponse> {
    let attestations = state
        .attestation_service
        .get_attestations(&domain, Utc::now())
        .iter()
        .map(AttestationDto::from)
        .collect();
    Json(AttestationsResponse { domain, attestations })
}

async fn keys_handler(State(state): State<TrustState>) -> Json<Value> {
    Json(state.key_manager.jwks())
}

async fn trust_health_handler(State(state): State<TrustState>) -> Json<TrustHealthResponse> {
    Json(TrustHealthResponse {
        status: "ok",
        attestation_count: state.trust_store.list_attestations().len(),
        key_loaded: true,
    })
}
