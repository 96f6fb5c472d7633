//! Error type for HTTP handlers and pipeline middlewares.
//!
//! Every variant renders as a JSON object with an `error` message; validation
//! failures add `details`. Internal errors are logged and surfaced as a generic 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{message}")]
    Validation {
        message: &'static str,
        details: Vec<String>,
    },
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(message) | Self::Unauthorized(message) | Self::Conflict(message) => {
                json!({ "error": message })
            }
            Self::Validation { message, details } => json!({
                "error": message,
                "details": details,
            }),
            Self::TooManyRequests => json!({ "error": TOO_MANY_REQUESTS }),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                json!({ "error": INTERNAL_SERVER_ERROR })
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    #[tokio::test]
    async fn bad_request_carries_message() {
        let (status, body) = body_json(ApiError::BadRequest("Email and password are required")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Email and password are required" }));
    }

    #[tokio::test]
    async fn validation_includes_details() {
        let (status, body) = body_json(ApiError::Validation {
            message: "Validation error",
            details: vec!["page: must be a number".to_string()],
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0], "page: must be a number");
    }

    #[tokio::test]
    async fn rate_limited_is_generic() {
        let (status, body) = body_json(ApiError::TooManyRequests).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let (status, body) = body_json(ApiError::from(anyhow::anyhow!("db exploded"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Internal server error" }));
    }
}
