//! Error type for courier intake and its HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use waybill_core::CoreError;

/// Result type alias for intake.
pub type Result<T> = std::result::Result<T, IntakeError>;

/// Failures of the intake endpoint.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Body is missing a required field or could not be parsed.
    #[error("{0}")]
    Malformed(String),

    /// The upsert failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

impl IntakeError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
