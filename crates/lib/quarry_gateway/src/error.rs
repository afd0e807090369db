//! Gateway error responses.
//!
//! Wraps the core taxonomy and maps it onto HTTP statuses; bodies carry the
//! stable kind and message, never internal causes.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use quarry_core::Error;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Newtype so the core error can implement `IntoResponse` here.
#[derive(Debug)]
pub struct AppError(pub Error);

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = match &self.0 {
            Error::RateLimit { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let body = Json(ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            retry_after,
        });
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::error::DenyReason;
    use std::time::Duration;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Authentication, StatusCode::UNAUTHORIZED),
            (
                Error::Authorization(DenyReason::ResourceForbidden),
                StatusCode::FORBIDDEN,
            ),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Gateway, StatusCode::BAD_GATEWAY),
            (
                Error::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(AppError(error).into_response().status(), status);
        }
    }

    #[test]
    fn rate_limit_sets_retry_after_header() {
        let response = AppError(Error::RateLimit {
            retry_after: Duration::from_secs(30),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
