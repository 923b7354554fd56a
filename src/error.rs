//! Error taxonomy shared by the pipeline and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the gateway, extractor, orchestrator and renderer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Caller-supplied input missing or empty. Lists every missing field.
    #[error("missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    /// The model-service call failed, timed out or returned no content.
    #[error("upstream model error: {0}")]
    Upstream(String),

    /// The model answered but its output could not be parsed.
    #[error("malformed upstream output: {0}")]
    MalformedUpstreamOutput(String),

    /// Document generation failed.
    #[error("render error: {0}")]
    Render(String),

    /// Writing a rendered document to the output directory failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn missing(fields: Vec<&'static str>) -> Self {
        Self::Validation { missing: fields }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream(_)
            | Self::MalformedUpstreamOutput(_)
            | Self::Render(_)
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An [`AppError`] paired with the user-facing message of the operation that failed.
///
/// Validation failures ignore the message and name the missing fields instead.
#[derive(Debug)]
pub struct ApiError {
    pub message: &'static str,
    pub source: AppError,
}

impl ApiError {
    pub fn new(message: &'static str, source: AppError) -> Self {
        Self { message, source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.source.status();
        let body = match &self.source {
            AppError::Validation { missing } => json!({
                "status": "error",
                "error": format!("Campos requeridos faltantes: {}", missing.join(", ")),
                "missingFields": missing,
            }),
            other => json!({
                "status": "error",
                "error": self.message,
                "details": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
