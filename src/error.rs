//! HTTP-facing error kinds and their status mapping.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl maps each kind onto
//! the documented status code and a JSON `detail` body. Internal errors never leak their
//! message to the client; the details go to the structured log instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error kinds surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed payload, inactive model, invalid HEX color, unknown vote type.
    #[error("{0}")]
    Validation(String),
    /// Missing model, job, collection, token, user, or history id.
    #[error("{0}")]
    NotFound(String),
    /// Missing header, bad scheme, unknown token, inactive user, expired token.
    #[error("{0}")]
    Auth(String),
    /// Daily request counter reached for the authenticated token.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Daily allowance configured for the token.
        limit: i64,
    },
    /// Vector-store or embedding-provider failure.
    #[error("{0}")]
    Upstream(String),
    /// Anything unexpected; details are logged, the body stays generic.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Convenience constructor for internal errors carrying context.
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            Self::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Auth(detail) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "detail": detail }))).into_response()
            }
            Self::RateLimited { limit } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "detail": "Daily rate limit exceeded" })),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", limit.into());
                headers.insert("x-ratelimit-remaining", 0.into());
                headers.insert("retry-after", 86400.into());
                response
            }
            Self::Upstream(detail) => {
                tracing::error!(error = %detail, "Upstream dependency failed");
                (StatusCode::BAD_GATEWAY, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Internal(err) => {
                tracing::error!(error = ?err, "Unhandled error during request processing");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<crate::chroma::ChromaError> for ApiError {
    fn from(err: crate::chroma::ChromaError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<crate::embedding::EmbeddingError> for ApiError {
    fn from(err: crate::embedding::EmbeddingError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<crate::db::DbError> for ApiError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::InvalidInput(detail) => Self::Validation(detail),
            other => Self::Internal(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_response_carries_retry_headers() {
        let response = ApiError::RateLimited { limit: 100 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "86400");
        assert_eq!(response.headers()["X-RateLimit-Limit"], "100");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
    }

    #[test]
    fn internal_error_body_stays_generic() {
        let response = ApiError::internal(std::io::Error::other("disk gone")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
