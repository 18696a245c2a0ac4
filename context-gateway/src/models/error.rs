use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use context_memory::ContextError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Invalid AI name: {0}")]
    InvalidAiName(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::InvalidPath { .. } => ApiError::InvalidPath(err.to_string()),
            ContextError::InvalidAiName(reason) => ApiError::InvalidAiName(reason),
            ContextError::StorageUnavailable(reason) => ApiError::ServiceUnavailable(reason),
            ContextError::CorruptRecord { .. } | ContextError::Config(_) => {
                ApiError::Internal(err.to_string())
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, param, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None, None),
            ApiError::InvalidPath(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                Some("project_path"),
                Some("invalid_path"),
            ),
            ApiError::InvalidAiName(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                Some("ai"),
                Some("invalid_ai_name"),
            ),
            ApiError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                None,
                Some("storage_unavailable"),
            ),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None, None),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                param: param.map(String::from),
                code: code.map(String::from),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
