//! Conversation state and project teardown
//!
//! Handles: GET|POST|DELETE /api/conversation-state, GET /api/activity,
//! GET|DELETE /api/projects

use crate::models::StatePatch;
use crate::server::ServerAppState;
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{success, ApiError, ProjectId};

/// Body of `POST /api/conversation-state`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StateAction {
    /// Discard history, keep the project
    Reset,
    /// Trim history with the configured retention limits
    ClearOld,
    /// Merge topic and preferences
    Update {
        #[serde(default)]
        data: StatePatch,
    },
}

pub async fn get_state_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
) -> Result<Json<Value>, ApiError> {
    let conversation = state.engine.get_state(project_id.as_str()).await?;
    Ok(success(json!({ "state": conversation })))
}

pub async fn post_state_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(action): Json<StateAction>,
) -> Result<Json<Value>, ApiError> {
    let id = project_id.as_str();
    match action {
        StateAction::Reset => {
            state.engine.reset_state(id).await?;
            Ok(success(json!({ "message": "Conversation state reset" })))
        }
        StateAction::ClearOld => {
            let report = state.engine.clear_old(id).await?;
            let conversation = state.engine.get_state(id).await?;
            Ok(success(json!({
                "message": "Old conversation data cleared",
                "removed": report,
                "state": conversation,
            })))
        }
        StateAction::Update { data } => {
            let conversation = state.engine.update_state(id, data).await?;
            Ok(success(json!({ "state": conversation })))
        }
    }
}

/// Forget the conversation; the project's sandbox stays
pub async fn delete_state_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
) -> Result<Json<Value>, ApiError> {
    let removed = state.engine.store().delete(project_id.as_str()).await?;
    Ok(success(json!({
        "message": "Conversation state cleared",
        "existed": removed.is_some(),
    })))
}

pub async fn activity_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
) -> Result<Json<Value>, ApiError> {
    let activity = match state.engine.store().get(project_id.as_str()).await {
        Some(context) => context.activity(),
        None => Vec::new(),
    };
    Ok(success(json!({ "activity": activity })))
}

pub async fn list_projects_handler(State(state): State<ServerAppState>) -> Json<Value> {
    let projects = state.engine.store().project_ids().await;
    success(json!({ "projects": projects }))
}

/// Remove the project and terminate its sandbox
pub async fn delete_project_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
) -> Result<Json<Value>, ApiError> {
    let existed = state.engine.delete_state(project_id.as_str()).await?;
    log::info!(
        "[{}] Project torn down (existed: {})",
        project_id.as_str(),
        existed
    );
    Ok(success(json!({ "existed": existed })))
}
