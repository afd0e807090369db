//! Authentication service — login, registration, refresh, and logout flows.

use serde::{Deserialize, Serialize};
use tracing::debug;

use quarry_core::users::User;
use quarry_core::Error;

use crate::error::AppResult;
use crate::AppState;

/// Token pair response for login, registration, and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access credential lifetime in seconds.
    pub expires_in: i64,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
    /// How many sessions were revoked (zero when the credential was already
    /// gone; logout is idempotent).
    pub revoked: u64,
}

async fn mint_response(state: &AppState, user: &User, device: Option<&str>) -> AppResult<TokenResponse> {
    let pair = state.credentials.mint_pair(user, device).await?;
    Ok(TokenResponse {
        access_token: pair.access.token,
        refresh_token: pair.refresh.token,
        token_type: "bearer".into(),
        expires_in: state.credentials.access_ttl().num_seconds(),
        user: AuthUser::from(user),
    })
}

/// Authenticate with email + password. Failures are indistinguishable
/// whether the email exists or not.
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    device: Option<&str>,
) -> AppResult<TokenResponse> {
    let user = state.directory.authenticate(email, password).await?;
    mint_response(state, &user, device).await
}

/// Register a new account and sign it in.
pub async fn register(state: &AppState, email: &str, password: &str) -> AppResult<TokenResponse> {
    let user = state.directory.register(email, password).await?;
    mint_response(state, &user, None).await
}

/// Exchange a refresh credential for a new pair; the old one is invalidated.
/// Roles are re-derived from the directory so role changes take effect here.
pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<TokenResponse> {
    let record = state.credentials.verify_refresh(refresh_token).await?;
    let user = state
        .directory
        .find_by_id(&record.user_id)
        .await?
        .filter(|u| u.active)
        .ok_or(Error::Authentication)?;

    let pair = state.credentials.rotate(refresh_token, &user).await?;
    Ok(TokenResponse {
        access_token: pair.access.token,
        refresh_token: pair.refresh.token,
        token_type: "bearer".into(),
        expires_in: state.credentials.access_ttl().num_seconds(),
        user: AuthUser::from(&user),
    })
}

/// Revoke the session behind a refresh credential. Idempotent: an invalid or
/// already-revoked credential is a zero-count no-op, not an error.
pub async fn logout(state: &AppState, refresh_token: Option<&str>) -> AppResult<LogoutResponse> {
    let Some(token) = refresh_token else {
        return Ok(LogoutResponse {
            success: true,
            revoked: 0,
        });
    };
    match state.credentials.verify_refresh(token).await {
        Ok(record) => {
            state.credentials.revoke(&record.jti).await?;
            Ok(LogoutResponse {
                success: true,
                revoked: 1,
            })
        }
        Err(_) => {
            debug!("logout with dead refresh credential is a no-op");
            Ok(LogoutResponse {
                success: true,
                revoked: 0,
            })
        }
    }
}
