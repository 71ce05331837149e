use aircal_core::PipelineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;

pub const INVALID_JSON: &str = "Invalid JSON format in request body";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    /// A bearer token that failed verification; reported under `error`.
    TokenRejected(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(_) => ApiError::Internal(err.to_string()),
            AuthError::Expired | AuthError::Invalid => ApiError::TokenRejected(err.to_string()),
            AuthError::MissingHeader | AuthError::BadCredentials => {
                ApiError::Unauthorized(err.to_string())
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        if err.is_validation() {
            return ApiError::BadRequest(err.to_string());
        }
        match err {
            PipelineError::ModelNotFound(_) => ApiError::NotFound(err.to_string()),
            PipelineError::UpstreamUnavailable(_) | PipelineError::Store(_) => {
                ApiError::Upstream(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "message": message })),
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "message": message }))
            }
            ApiError::TokenRejected(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": message }))
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "message": message })),
            ApiError::Upstream(message) => {
                error!(%message, "storage or upstream failure");
                (StatusCode::BAD_GATEWAY, json!({ "error": message }))
            }
            ApiError::Internal(message) => {
                error!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}
