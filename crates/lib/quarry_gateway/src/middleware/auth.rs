//! Authentication middleware — Bearer token extraction and verification.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use quarry_core::error::DenyReason;
use quarry_core::principal::UserPrincipal;
use quarry_core::Error;

use crate::error::AppError;
use crate::AppState;

/// Key used to store the verified principal in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserPrincipal);

fn verify_bearer(state: &AppState, request: &Request) -> Result<UserPrincipal, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError(Error::Authentication))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError(Error::Authentication))?;
    state
        .credentials
        .verify_access(token)
        .map_err(AppError::from)
}

/// Axum middleware: verifies the access credential and injects
/// `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = verify_bearer(&state, &request)?;
    request.extensions_mut().insert(AuthenticatedUser(principal));
    Ok(next.run(request).await)
}

/// Like [`require_auth`], but also requires the `admin` role.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = verify_bearer(&state, &request)?;
    if !principal.roles.iter().any(|r| r == "admin") {
        return Err(AppError(Error::Authorization(DenyReason::RoleInsufficient)));
    }
    request.extensions_mut().insert(AuthenticatedUser(principal));
    Ok(next.run(request).await)
}
