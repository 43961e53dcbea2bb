//! Parsing and package detection
//!
//! Handles: POST /api/parse, POST /api/detect-packages

use crate::models::FileOp;
use crate::parsers::imports::normalize_package_request;
use crate::server::ServerAppState;
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::{success, ApiError, ProjectId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub response: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectRequest {
    #[serde(default)]
    pub files: Vec<FileOp>,
    /// Explicitly requested packages
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Normalize explicitly requested package names, dropping unusable ones
pub fn requested_packages(names: &[String]) -> BTreeSet<String> {
    names
        .iter()
        .filter_map(|name| normalize_package_request(name))
        .collect()
}

pub async fn parse_handler(
    State(state): State<ServerAppState>,
    Json(request): Json<ParseRequest>,
) -> Result<Json<Value>, ApiError> {
    let parsed = state
        .engine
        .parse(&request.response)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(success(json!({ "parsed": parsed })))
}

pub async fn detect_packages_handler(
    State(state): State<ServerAppState>,
    project_id: ProjectId,
    Json(request): Json<DetectRequest>,
) -> Result<Json<Value>, ApiError> {
    let explicit = requested_packages(&request.packages);
    let detection = state
        .engine
        .detect_for_project(project_id.as_str(), &request.files, &explicit)
        .await?;

    let classification = &detection.classification;
    log::info!(
        "[{}] Detected {} package(s) to install",
        project_id.as_str(),
        classification.to_install.len()
    );
    Ok(success(json!({
        "packagesToInstall": classification.to_install,
        "alreadyInstalled": classification.already_installed,
        "builtin": classification.builtin,
        "detected": detection.detected,
        "warnings": detection.warnings,
    })))
}
