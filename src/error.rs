//! Error types for the gateway.
//!
//! Backend inference failures are *not* represented here: they travel as
//! data inside `InferenceResponse` so the scheduler worker never unwinds.
//! `ServerError` covers the HTTP boundary and startup paths.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Unparseable configuration file. Surfaced at startup only.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse config {path}: {detail}")]
pub struct ConfigError {
    pub path: String,
    pub detail: String,
}

impl ConfigError {
    pub fn new(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { path: path.into(), detail: detail.into() }
    }
}

/// Errors a request handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Artifact unreadable, malformed, or rejected by the runtime.
    #[error("Failed to load model '{name}'")]
    ModelLoad { name: String, detail: String },

    /// Unknown model name.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Malformed JSON or a request that fails validation.
    #[error("{message}")]
    BadRequest { message: String, detail: Option<String> },

    /// Anything a handler could not recover from.
    #[error("{message}")]
    Internal { message: String, detail: Option<String> },
}

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), detail: None }
    }

    pub fn bad_request_with(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), detail: Some(detail.into()) }
    }

    pub fn internal(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), detail: Some(detail.into()) }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::ModelLoad { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            ServerError::ModelLoad { detail, .. } => Some(detail),
            ServerError::BadRequest { detail, .. } => detail.as_deref(),
            ServerError::Internal { detail, .. } => detail.as_deref(),
            ServerError::ModelNotFound(_) => None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        });
        if let Some(detail) = self.detail() {
            error["detail"] = json!(detail);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ServerError::ModelNotFound("m".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ServerError::bad_request("nope").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServerError::internal("boom", "why").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_message_names_the_model() {
        let err = ServerError::ModelNotFound("nope".into());
        assert!(err.to_string().contains("nope"));
    }
}
