//! Error types for the deployment bot

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::deployment::Stage;

/// Main error type for the deployment bot
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Diagnosis error: {0}")]
    DiagnosisError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AgentError {
    fn status_code(&self) -> StatusCode {
        match self {
            AgentError::ValidationError(_) | AgentError::UrlError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Failure of a single pipeline stage.
///
/// Any of these aborts the remaining stages of a deployment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("fetch failed: {0}")]
    FetchError(String),

    #[error("install failed: {0}")]
    InstallError(String),

    #[error("start failed: {0}")]
    StartError(String),

    #[error("port {port} not listening after {attempts} attempts")]
    VerifyTimeoutError { port: u16, attempts: u32 },

    /// The bot shut down while the stage was pending or running
    #[error("{stage} aborted: deploybot is shutting down")]
    Aborted { stage: Stage },
}

impl StageError {
    /// The pipeline stage that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            StageError::FetchError(_) => Stage::Fetch,
            StageError::InstallError(_) => Stage::Install,
            StageError::StartError(_) => Stage::Start,
            StageError::VerifyTimeoutError { .. } => Stage::Verify,
            StageError::Aborted { stage } => *stage,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, StageError::Aborted { .. })
    }
}
