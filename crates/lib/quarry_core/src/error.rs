//! Error taxonomy shared by both tiers.
//!
//! Every error carries a stable kind; user-visible messages are stable
//! strings without internal detail. Internal causes go to `tracing` at the
//! point of failure, never into the response.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an authorization decision denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownTool,
    Unauthenticated,
    RoleInsufficient,
    ResourceForbidden,
}

impl DenyReason {
    /// Stable kind string surfaced in error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::UnknownTool => "unknown_tool",
            DenyReason::Unauthenticated => "unauthenticated",
            DenyReason::RoleInsufficient => "role_insufficient",
            DenyReason::ResourceForbidden => "resource_forbidden",
        }
    }
}

/// Application-level errors with JSON-RPC and HTTP status mapping.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid credentials")]
    Authentication,

    #[error("permission denied: {}", .0.as_str())]
    Authorization(DenyReason),

    #[error("rate limit exceeded")]
    RateLimit { retry_after: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("retriever failure: {0}")]
    Retriever(String),

    #[error("upstream unavailable")]
    Gateway,

    #[error("service unavailable")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal(String),
}

impl Error {
    /// Stable error-kind string (also used as the JSON body `error` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Authentication => "authentication_error",
            Error::Authorization(_) => "authorization_error",
            Error::RateLimit { .. } => "rate_limit_error",
            Error::NotFound(_) => "not_found",
            Error::Retriever(_) => "retriever_error",
            Error::Gateway => "gateway_error",
            Error::ServiceUnavailable(_) => "service_unavailable",
            Error::Internal(_) => "internal_error",
        }
    }

    /// JSON-RPC error code for this kind.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Error::Validation(_) => -32602,
            Error::Authentication => -32040,
            Error::Authorization(_) => -32041,
            Error::RateLimit { .. } => -32045,
            Error::NotFound(_) => -32601,
            Error::Retriever(_) => -32603,
            Error::Gateway => -32603,
            Error::ServiceUnavailable(_) => -32000,
            Error::Internal(_) => -32603,
        }
    }

    /// Transport (HTTP) status code for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Authentication => 401,
            Error::Authorization(_) => 403,
            Error::RateLimit { .. } => 429,
            Error::NotFound(_) => 404,
            Error::Retriever(_) => 502,
            Error::Gateway => 502,
            Error::ServiceUnavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::ServiceUnavailable(e.to_string())
            }
            _ => Error::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(Error::Validation("x".into()).json_rpc_code(), -32602);
        assert_eq!(Error::Authentication.json_rpc_code(), -32040);
        assert_eq!(
            Error::Authorization(DenyReason::ResourceForbidden).json_rpc_code(),
            -32041
        );
        assert_eq!(
            Error::RateLimit {
                retry_after: Duration::from_secs(1)
            }
            .json_rpc_code(),
            -32045
        );
        assert_eq!(Error::NotFound("t".into()).json_rpc_code(), -32601);
        assert_eq!(Error::ServiceUnavailable("s".into()).json_rpc_code(), -32000);
    }

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(Error::Authentication.http_status(), 401);
        assert_eq!(
            Error::Authorization(DenyReason::RoleInsufficient).http_status(),
            403
        );
        assert_eq!(
            Error::RateLimit {
                retry_after: Duration::from_secs(1)
            }
            .http_status(),
            429
        );
        assert_eq!(Error::Gateway.http_status(), 502);
        assert_eq!(Error::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn internal_error_message_is_generic() {
        let e = Error::Internal("secret cause".into());
        assert_eq!(e.to_string(), "internal server error");
    }

    #[test]
    fn deny_reason_kind_strings() {
        assert_eq!(DenyReason::ResourceForbidden.as_str(), "resource_forbidden");
        assert_eq!(DenyReason::RoleInsufficient.as_str(), "role_insufficient");
    }
}
