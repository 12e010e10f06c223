//! Error type shared by the upload services and the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::StoreError;
use crate::models::upload::FieldError;
use crate::services::reclaimer::SweepError;
use crate::services::storage::StorageError;

/// JSON body returned for every error.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input, rejected before anything was written.
    #[error("validation failed: {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// The request carried no usable owner id.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state; the client may retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("object store error: {0}")]
    Gateway(#[from] StorageError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Gateway(_) => "object_store_error",
            Self::Store(_) => "infrastructure_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SweepError> for AppError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::AlreadyRunning => Self::Conflict(err.to_string()),
            SweepError::Store(e) => Self::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let (message, errors) = match self {
            Self::Validation(errors) => ("request validation failed".to_string(), errors),
            // Infrastructure details stay in the logs.
            Self::Store(_) => ("internal error".to_string(), Vec::new()),
            other => (other.to_string(), Vec::new()),
        };

        let body = ErrorResponse {
            code,
            message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}
