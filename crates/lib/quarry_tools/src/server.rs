//! HTTP surface of the tool server: one JSON-RPC endpoint plus liveness.
//!
//! Requests bearing the internal trust token have their principal read from
//! the gateway-set headers and skip credential verification; anything else
//! falls through to normal bearer authentication in the pipeline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use quarry_core::authz::AuthzEngine;
use quarry_core::cache::ResultCache;
use quarry_core::config::Config;
use quarry_core::credentials::CredentialService;
use quarry_core::kv::KVStore;
use quarry_core::observer::Observer;
use quarry_core::principal::{RequestContext, UserPrincipal};
use quarry_core::ratelimit::RateLimiter;
use quarry_core::retriever::RetrieverFactory;
use quarry_core::Error;

use crate::dispatch::DispatchCore;
use crate::middleware::{Pipeline, PipelineDeps};
use crate::rpc::{self, JsonRpcResponse};
use crate::tools::ToolRegistry;

/// Shared services the tool server is wired from.
pub struct ToolServices {
    pub credentials: Arc<CredentialService>,
    pub engine: Arc<AuthzEngine>,
    pub limiter: Arc<RateLimiter>,
    pub observer: Arc<dyn Observer>,
    pub factory: RetrieverFactory,
    pub kv: Arc<dyn KVStore>,
}

#[derive(Clone)]
pub struct ToolServerState {
    pipeline: Arc<Pipeline>,
    dispatch: Arc<DispatchCore>,
    config: Arc<Config>,
    factory: RetrieverFactory,
}

/// Build the tool-server router: pipeline and dispatch core are assembled
/// once here, per the configured profile.
pub fn router(config: Arc<Config>, services: ToolServices) -> Router {
    let cache = if config.flags.enable_cache {
        Some(Arc::new(ResultCache::new(
            services.kv.clone(),
            services.observer.clone(),
        )))
    } else {
        None
    };

    let dispatch = Arc::new(DispatchCore::new(
        ToolRegistry::builtin(),
        services.engine.clone(),
        services.factory.clone(),
        cache,
        config.cache_ttl,
    ));

    let deps = PipelineDeps {
        credentials: services.credentials,
        engine: services.engine,
        limiter: services.limiter,
        observer: services.observer,
    };
    let pipeline = Arc::new(Pipeline::build(&config, &deps));
    tracing::info!(stages = ?pipeline.stage_names(), "tool server pipeline assembled");

    let state = ToolServerState {
        pipeline,
        dispatch,
        config,
        factory: services.factory,
    };

    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn rpc_handler(
    State(state): State<ToolServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match rpc::parse_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(Value::Null, &e, "unparsed"),
    };

    let rpc_id = request.id.clone();
    let mut ctx = RequestContext::new(request.method, request.params, request.id);
    attach_transport(&mut ctx, &headers, &state.config);

    match state.pipeline.execute(&mut ctx, &state.dispatch).await {
        Ok(result) => {
            Json(JsonRpcResponse::success(rpc_id, result)).into_response()
        }
        Err(e) => error_response(rpc_id, &e, &ctx.request_id),
    }
}

/// Populate the context from transport headers.
fn attach_transport(ctx: &mut RequestContext, headers: &HeaderMap, config: &Config) {
    if let Some(request_id) = header_str(headers, "x-request-id") {
        ctx.request_id = request_id;
    }
    ctx.trace_context = header_str(headers, "traceparent");
    ctx.client_addr = header_str(headers, "x-forwarded-for")
        .map(|v| v.split(',').next().unwrap_or("").trim().to_string());
    if let Some(ms) = header_str(headers, "x-deadline-ms").and_then(|v| v.parse::<u64>().ok()) {
        ctx.deadline =
            Some(tokio::time::Instant::now() + std::time::Duration::from_millis(ms));
    }

    let bearer = header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));

    let trust_token = &config.security.internal_trust_token;
    if config.flags.enable_auth
        && !trust_token.is_empty()
        && bearer.as_deref() == Some(trust_token.as_str())
    {
        if let Some(principal) = principal_from_headers(headers) {
            ctx.trusted_principal = Some(principal);
            return;
        }
        // Trust token without principal headers: fall through to normal
        // authentication, which will reject it.
    }
    ctx.bearer = bearer;
}

/// Principal carried by `X-Principal-Id` / `X-Principal-Roles`.
fn principal_from_headers(headers: &HeaderMap) -> Option<UserPrincipal> {
    let id = header_str(headers, "x-principal-id")?;
    if id.is_empty() {
        return None;
    }
    let roles = header_str(headers, "x-principal-roles")
        .map(|v| {
            v.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Some(UserPrincipal {
        id,
        email: header_str(headers, "x-principal-email"),
        roles,
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_response(rpc_id: Value, error: &Error, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = JsonRpcResponse::error(rpc_id, rpc::error_object(error, request_id));
    (status, Json(body)).into_response()
}

async fn health_handler(State(state): State<ToolServerState>) -> Json<Value> {
    let mut retrievers = serde_json::Map::new();
    for kind in state.factory.kinds().collect::<Vec<_>>() {
        if let Ok(retriever) = state.factory.get(kind) {
            let health = retriever.health().await;
            retrievers.insert(
                kind.as_str().to_string(),
                serde_json::to_value(&health).unwrap_or(Value::Null),
            );
        }
    }
    Json(json!({
        "status": "ok",
        "version": quarry_core::version(),
        "retrievers": Value::Object(retrievers),
    }))
}
