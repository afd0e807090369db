//! Tool-call proxy: forwards JSON-RPC bodies to the tool server under
//! internal trust.
//!
//! The verified principal travels as structured headers; the shared trust
//! token proves the request originated here. Responses stream back
//! transparently. Upstream connection failures surface as a gateway error
//! that never names the upstream address.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tracing::warn;

use quarry_core::Error;

use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;
use crate::AppState;

/// `POST /tools/rpc` — proxied JSON-RPC entry point.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = format!(
        "{}/rpc",
        state.config.tool_server_url.trim_end_matches('/')
    );
    let request_id = quarry_core::uuid::uuidv7().to_string();

    let mut upstream = state
        .http
        .post(&url)
        .header("content-type", "application/json")
        .header(
            "authorization",
            format!("Bearer {}", state.config.security.internal_trust_token),
        )
        .header("x-principal-id", &principal.id)
        .header("x-principal-roles", principal.roles.join(","))
        .header("x-request-id", &request_id);

    if let Some(email) = &principal.email {
        upstream = upstream.header("x-principal-email", email);
    }
    if let Some(trace) = headers.get("traceparent").and_then(|v| v.to_str().ok()) {
        upstream = upstream.header("traceparent", trace);
    }

    let response = upstream.body(body).send().await.map_err(|e| {
        warn!(request_id = %request_id, error = %e, "tool server unreachable");
        AppError(Error::Gateway)
    })?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for name in ["content-type", "transfer-encoding", "retry-after"] {
        if let Some(value) = response.headers().get(name) {
            builder = builder.header(name, value);
        }
    }
    builder = builder.header("x-request-id", &request_id);

    let stream = response.bytes_stream();
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| {
            warn!(request_id = %request_id, error = %e, "proxy response build failed");
            AppError(Error::Internal(e.to_string()))
        })
        .map(IntoResponse::into_response)
}
