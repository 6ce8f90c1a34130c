use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ErrorKind, QueryError};
use crate::services::ErrorClassifier;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Query text is empty")]
    EmptyQuery,

    #[error("Forbidden operation: {0}")]
    ForbiddenOperation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    /// Raw backend text. Must go through `ErrorClassifier` before reaching a caller.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Classified(QueryError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// HTTP status used for a classified failure.
pub fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::EmptyQuery | ErrorKind::ForbiddenOperation | ErrorKind::ValidationError => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::ConfigurationError => StatusCode::NOT_FOUND,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::MissingTable
        | ErrorKind::MissingColumn
        | ErrorKind::SyntaxError
        | ErrorKind::PermissionDenied => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorDetail::new("NOT_FOUND", msg)),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            other => {
                // Backend text is classified and redacted before it leaves the process.
                let classified = ErrorClassifier::from_app_error(&other);
                let detail = match classified.kind {
                    ErrorKind::MissingTable | ErrorKind::MissingColumn => {
                        ErrorDetail::new(classified.kind.as_str(), classified.message)
                            .with_details("Try refreshing the schema listing or check the name.")
                    }
                    ErrorKind::Timeout => ErrorDetail::new(classified.kind.as_str(), classified.message)
                        .with_details("Consider narrowing the query or adding a LIMIT."),
                    _ => ErrorDetail::new(classified.kind.as_str(), classified.message),
                };
                (status_for_kind(classified.kind), detail)
            }
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Internal(format!("profile store: {}", err))
    }
}
