//! Authentication request handlers.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::services::auth::{self, LogoutResponse, TokenResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

/// `POST /auth/register` — create a new user account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::register(&state, &body.email, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /auth/login` — authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(&state, &body.email, &body.password, body.device.as_deref()).await?;
    Ok(Json(resp))
}

/// `POST /auth/refresh` — exchange a refresh credential for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::refresh(&state, &body.refresh_token).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout` — revoke the refresh credential carried in the body
/// or in the `Authorization` header.
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Json<LogoutResponse>> {
    let from_body = serde_json::from_slice::<LogoutRequest>(&body)
        .ok()
        .and_then(|b| b.refresh_token);
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));
    let token = from_body.or(from_header);
    let resp = auth::logout(&state, token.as_deref()).await?;
    Ok(Json(resp))
}

/// `GET /auth/me` — principal summary for the presented access credential.
pub async fn me_handler(
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
) -> Json<MeResponse> {
    Json(MeResponse {
        id: principal.id,
        email: principal.email,
        roles: principal.roles,
    })
}

/// `GET /health` — liveness; no auth.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok", "version": quarry_core::version()}))
}
