//! Admin surface: users, sessions, and permission grants.
//!
//! All routes sit behind `require_admin`. Mutations are idempotent where
//! possible: revoking an absent session or grant is a zero-count success.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use quarry_core::authz::{Action, Grant, ResourcePattern, ResourceType, Subject};
use quarry_core::session::SessionRecord;
use quarry_core::users::User;
use quarry_core::Error;

use crate::error::AppResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /admin/users` — list or search users.
pub async fn list_users_handler(
    State(state): State<AppState>,
    Query(params): Query<UserListQuery>,
) -> AppResult<Json<Value>> {
    let users = state
        .directory
        .search(
            params.query.as_deref().unwrap_or(""),
            params.limit.min(500),
            params.offset,
        )
        .await?;
    let total = state.directory.count().await?;
    Ok(Json(json!({"users": users, "total": total})))
}

/// `GET /admin/users/{id}` — one user.
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<User>> {
    let user = state
        .directory
        .find_by_id(&user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct SetRolesRequest {
    pub roles: Vec<String>,
}

/// `PUT /admin/users/{id}/roles` — replace a user's role set.
///
/// Existing access credentials keep their minted roles until they expire;
/// the decision cache for the user is flushed immediately.
pub async fn set_user_roles_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SetRolesRequest>,
) -> AppResult<Json<Value>> {
    if body.roles.is_empty() {
        return Err(Error::Validation("roles must be non-empty".into()).into());
    }
    state.directory.set_roles(&user_id, body.roles.clone()).await?;
    state.engine.invalidate_user(&user_id);
    Ok(Json(json!({"id": user_id, "roles": body.roles})))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// `PUT /admin/users/{id}/active` — activate or soft-delete a user.
/// Deactivation also revokes every session the user holds.
pub async fn set_user_active_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> AppResult<Json<Value>> {
    state.directory.set_active(&user_id, body.active).await?;
    let revoked = if body.active {
        0
    } else {
        state.credentials.revoke_all(&user_id).await?
    };
    Ok(Json(json!({"id": user_id, "active": body.active, "revoked_sessions": revoked})))
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionPageResponse {
    pub sessions: Vec<SessionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `GET /admin/sessions` — enumerate active sessions.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Query(params): Query<SessionListQuery>,
) -> AppResult<Json<SessionPageResponse>> {
    let page = state
        .sessions
        .list_active(params.limit.min(500), params.cursor)
        .await?;
    Ok(Json(SessionPageResponse {
        sessions: page.records,
        next_cursor: page.next_cursor,
    }))
}

/// `GET /admin/users/{id}/sessions` — sessions of one user.
pub async fn list_user_sessions_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    let sessions = state.sessions.list_by_user(&user_id).await?;
    Ok(Json(json!({"sessions": sessions})))
}

/// `DELETE /admin/sessions/{jti}` — revoke one session.
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    Path(jti): Path<String>,
) -> AppResult<Json<Value>> {
    let removed = state.sessions.delete(&jti).await?;
    Ok(Json(json!({"revoked": u64::from(removed)})))
}

/// `DELETE /admin/users/{id}/sessions` — revoke every session of a user.
pub async fn revoke_user_sessions_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    let revoked = state.credentials.revoke_all(&user_id).await?;
    Ok(Json(json!({"revoked": revoked})))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub subject: SubjectBody,
    pub resource_type: ResourceType,
    pub resource_pattern: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SubjectBody {
    pub kind: String,
    pub name: String,
}

impl SubjectBody {
    fn into_subject(self) -> Result<Subject, Error> {
        match self.kind.as_str() {
            "role" => Ok(Subject::Role(self.name)),
            "user" => Ok(Subject::User(self.name)),
            other => Err(Error::Validation(format!(
                "subject kind must be 'role' or 'user', got '{other}'"
            ))),
        }
    }
}

/// `GET /admin/permissions` — all stored grants.
pub async fn list_permissions_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let grants = state.engine.list_permissions().await;
    Ok(Json(json!({"grants": grants})))
}

/// `POST /admin/permissions` — insert or replace a grant. The pattern is
/// validated here; invalid patterns never reach evaluation.
pub async fn grant_permission_handler(
    State(state): State<AppState>,
    Json(body): Json<GrantRequest>,
) -> AppResult<Json<Value>> {
    if body.actions.is_empty() {
        return Err(Error::Validation("actions must be non-empty".into()).into());
    }
    let pattern = ResourcePattern::parse(&body.resource_pattern)?;
    let subject = body.subject.into_subject()?;
    let mut grant = Grant::new(subject, body.resource_type, pattern, body.actions);
    grant.expires_at = body.expires_at;
    let replaced = state.engine.grant_permission(grant).await?;
    Ok(Json(json!({"replaced": replaced})))
}

#[derive(Debug, Deserialize)]
pub struct RevokeGrantRequest {
    pub subject: SubjectBody,
    pub resource_type: ResourceType,
    pub resource_pattern: String,
}

/// `DELETE /admin/permissions` — remove a grant; absent grants are a
/// zero-count success.
pub async fn revoke_permission_handler(
    State(state): State<AppState>,
    Json(body): Json<RevokeGrantRequest>,
) -> AppResult<Json<Value>> {
    let subject = body.subject.into_subject()?;
    let removed = state
        .engine
        .revoke_permission(&subject, body.resource_type, &body.resource_pattern)
        .await?;
    Ok(Json(json!({"revoked": u64::from(removed)})))
}
