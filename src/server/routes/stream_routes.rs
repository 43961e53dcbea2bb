//! Streamed operations over Server-Sent Events
//!
//! Handles: POST /api/apply-ai-code-stream, POST /api/generate-ai-code-stream

use crate::apply::GenerateRequest;
use crate::events::{EVENT_APPLY_PROGRESS, EVENT_GENERATE_PROGRESS};
use crate::server::events::sse_response;
use crate::server::ServerAppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::parse_routes::requested_packages;
use super::{ApiError, ProjectId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    /// Raw AI response text
    pub response: String,
    /// Packages to install in addition to the ones the response names
    #[serde(default)]
    pub packages: Vec<String>,
}

pub async fn apply_stream_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(request): Json<ApplyRequest>,
) -> Result<Response, ApiError> {
    // An empty response is rejected before any stream is opened
    let mut parsed = state
        .engine
        .parse(&request.response)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    parsed.packages.extend(requested_packages(&request.packages));

    log::info!(
        "[{}] Applying {} file(s), {} package(s), {} command(s)",
        project_id.as_str(),
        parsed.files.len(),
        parsed.packages.len(),
        parsed.commands.len()
    );
    let events = state.engine.apply(parsed, project_id.as_str());
    Ok(sse_response(EVENT_APPLY_PROGRESS, events).into_response())
}

pub async fn generate_stream_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("Prompt must not be empty"));
    }

    log::info!("[{}] Generating code", project_id.as_str());
    let events = state.engine.generate(project_id.as_str(), request);
    Ok(sse_response(EVENT_GENERATE_PROGRESS, events).into_response())
}
