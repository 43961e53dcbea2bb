//! HTTP route handlers
//!
//! - parse_routes: parsing and package detection
//! - stream_routes: SSE streams for apply and generate
//! - state_routes: conversation state and project teardown
//! - sandbox_routes: file listing, commands and package installs
//!
//! Every handler resolves its project from the `X-Project-Id` header and
//! reports errors as `{"success": false, "error": "..."}`.

pub mod parse_routes;
pub mod sandbox_routes;
pub mod state_routes;
pub mod stream_routes;

use crate::projects::StoreError;
use crate::utils::{validate_project_id, DEFAULT_PROJECT_ID};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Header naming the project a request belongs to
pub const PROJECT_ID_HEADER: &str = "x-project-id";

/// Error returned by handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let status = match error {
            StoreError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::InvalidProjectId(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::warn!("Request failed: {}", self.message);
        }
        let body = json!({ "success": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Project identifier taken from the `X-Project-Id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ProjectId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let project_id = match parts.headers.get(PROJECT_ID_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| ApiError::bad_request("X-Project-Id header is not valid text"))?
                .trim()
                .to_string(),
            None => DEFAULT_PROJECT_ID.to_string(),
        };
        validate_project_id(&project_id).map_err(ApiError::bad_request)?;
        Ok(ProjectId(project_id))
    }
}

/// Wrap a serializable payload in a success envelope
pub fn success(payload: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = json!({ "success": true });
    if let (Some(target), serde_json::Value::Object(fields)) = (body.as_object_mut(), payload) {
        target.extend(fields);
    }
    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_merges_fields() {
        let Json(body) = success(json!({ "state": { "projectId": "p1" } }));
        assert_eq!(body["success"], true);
        assert_eq!(body["state"]["projectId"], "p1");
    }

    #[test]
    fn test_store_error_status() {
        assert_eq!(
            ApiError::from(StoreError::Closed).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(StoreError::InvalidProjectId("../x".to_string())).status,
            StatusCode::BAD_REQUEST
        );
    }
}
