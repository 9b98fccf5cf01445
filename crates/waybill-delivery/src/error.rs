//! Error type for delivery use cases and its HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use waybill_core::CoreError;
use waybill_engine::EngineError;

/// Result type alias for delivery use cases.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failures of the request and webhook use cases.
///
/// Only `Validation` is the caller's fault and maps to HTTP 400; everything
/// else is HTTP 500. Both render as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input failed a validation rule. The message names the field path.
    #[error("{0}")]
    Validation(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// A call to the 3PL or core collaborator failed.
    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] EngineError),

    /// A referenced shipment does not exist.
    #[error("shipment not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Collaborator(_) | Self::NotFound(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
