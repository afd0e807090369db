//! # quarry_gateway
//!
//! Client-facing HTTP tier: credential issuance endpoints, the role-gated
//! admin surface, and the trusted proxy to the tool server.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use quarry_core::authz::AuthzEngine;
use quarry_core::config::Config;
use quarry_core::credentials::CredentialService;
use quarry_core::session::SessionStore;
use quarry_core::users::UserDirectory;

use crate::handlers::{admin, auth, tools};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<dyn UserDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<CredentialService>,
    pub engine: Arc<AuthzEngine>,
    pub http: reqwest::Client,
}

/// Builds the gateway router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]));

    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(auth::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (require a valid access credential)
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/tools/rpc", post(tools::proxy_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Admin routes (require the admin role)
    let admin_routes = Router::new()
        .route("/admin/users", get(admin::list_users_handler))
        .route("/admin/users/{id}", get(admin::get_user_handler))
        .route("/admin/users/{id}/roles", put(admin::set_user_roles_handler))
        .route(
            "/admin/users/{id}/active",
            put(admin::set_user_active_handler),
        )
        .route(
            "/admin/users/{id}/sessions",
            get(admin::list_user_sessions_handler).delete(admin::revoke_user_sessions_handler),
        )
        .route("/admin/sessions", get(admin::list_sessions_handler))
        .route(
            "/admin/sessions/{jti}",
            delete(admin::revoke_session_handler),
        )
        .route(
            "/admin/permissions",
            get(admin::list_permissions_handler)
                .post(admin::grant_permission_handler)
                .delete(admin::revoke_permission_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin_routes)
        .layer(cors)
        .with_state(state)
}
