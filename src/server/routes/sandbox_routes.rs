//! Direct access to a project's sandbox
//!
//! Handles: GET /api/sandbox-files, POST /api/run-command,
//! POST /api/install-packages (SSE)

use crate::apply::SandboxOpError;
use crate::events::EVENT_INSTALL_PROGRESS;
use crate::server::events::sse_response;
use crate::server::ServerAppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{success, ApiError, ProjectId};

impl From<SandboxOpError> for ApiError {
    fn from(error: SandboxOpError) -> Self {
        let status = match &error {
            SandboxOpError::Store(e) => return ApiError::from(e.clone()),
            SandboxOpError::NoSandbox(_) => StatusCode::NOT_FOUND,
            SandboxOpError::Sandbox(_) => StatusCode::BAD_GATEWAY,
            SandboxOpError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesQuery {
    /// Directory to list, relative to the sandbox root
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<String>,
}

pub async fn list_files_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Value>, ApiError> {
    let files = state
        .engine
        .list_files(project_id.as_str(), &query.path)
        .await?;
    Ok(success(json!({
        "files": files,
        "count": files.len(),
    })))
}

pub async fn run_command_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(request): Json<RunCommandRequest>,
) -> Result<Json<Value>, ApiError> {
    log::info!("[{}] Running command: {}", project_id.as_str(), request.command);
    let output = state
        .engine
        .run_command(project_id.as_str(), &request.command)
        .await?;
    Ok(success(json!({ "output": output })))
}

pub async fn install_packages_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(request): Json<InstallRequest>,
) -> Result<Response, ApiError> {
    if request.packages.is_empty() {
        return Err(ApiError::bad_request("No packages given"));
    }

    log::info!(
        "[{}] Installing {} package(s)",
        project_id.as_str(),
        request.packages.len()
    );
    let events = state
        .engine
        .install_packages(project_id.as_str(), &request.packages);
    Ok(sse_response(EVENT_INSTALL_PROGRESS, events).into_response())
}
