//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AgentError;
use crate::models::deployment::{DeploymentOutcome, DeploymentRequest};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deploybot".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Run a deployment and answer with its outcome.
///
/// 200 when every stage passed, 500 when a stage failed, 400 for an
/// invalid request.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentOutcome>), AgentError> {
    let outcome = state.orchestrator.run(request).await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(outcome)))
}

/// Fire-and-forget deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDeployRequest {
    pub app_name: String,
    pub repo_url: String,
    pub port: u16,
}

/// Answer to a fire-and-forget deployment
#[derive(Debug, Serialize, Deserialize)]
pub struct DeployAcceptedResponse {
    pub task_id: String,
    pub message: String,
    pub tips: String,
}

/// Start a deployment in the background and return its task id at once
pub async fn deploy_web_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<WebDeployRequest>,
) -> Result<(StatusCode, Json<DeployAcceptedResponse>), AgentError> {
    let job = state.orchestrator.prepare(&DeploymentRequest {
        app_name: Some(request.app_name),
        repo_url: request.repo_url,
        port: request.port,
        ..Default::default()
    })?;

    let task_id = job.task_id.clone();
    let tips = match state.orchestrator.public_host() {
        Some(host) => format!(
            "Wait for the push notification, or check http://{}:{} later",
            host, job.port
        ),
        None => format!(
            "Wait for the push notification, or check port {} later",
            job.port
        ),
    };

    info!(task_id = %task_id, "Deployment accepted");
    state.background.spawn(job);

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAcceptedResponse {
            task_id,
            message: "Deployment task started".to_string(),
            tips,
        }),
    ))
}
