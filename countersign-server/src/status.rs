//! Health and status endpoints.
//!
//! `/status` shows every open workflow action, as the Administrator would
//! see them. It is protected by the STATUS_AUTH_TOKEN bearer token.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::action::{ActionStatus, ActionVisibility, WorkflowActionRecord};
use crate::{AppState, ADMINISTRATOR};

/// Summary statistics for the status page.
#[derive(Debug, Default, Serialize)]
pub struct StatusSummary {
    pub total_actions: usize,
    pub open: usize,
    pub completed: usize,
}

/// An open action entry for display on the status page.
#[derive(Debug, Serialize)]
pub struct OpenActionEntry {
    pub id: String,
    pub reference_doctype: String,
    pub reference_name: String,
    pub workflow_state: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub open_actions: Vec<OpenActionEntry>,
}

impl StatusData {
    pub fn from_records(records: Vec<WorkflowActionRecord>, version: String) -> Self {
        let mut summary = StatusSummary {
            total_actions: records.len(),
            ..Default::default()
        };
        let mut open_actions = Vec::new();

        for record in records {
            match record.status {
                ActionStatus::Completed => summary.completed += 1,
                ActionStatus::Open => {
                    summary.open += 1;
                    open_actions.push(OpenActionEntry {
                        id: record.id,
                        reference_doctype: record.reference_doctype,
                        reference_name: record.reference_name,
                        workflow_state: record.workflow_state,
                        user: record.user,
                        created_at: record.created_at,
                    });
                }
            }
        }

        Self {
            version,
            summary,
            open_actions,
        }
    }
}

/// Validate the authorization header against the status auth token.
///
/// Returns `Ok(())` if authorized, or an error response if not.
#[allow(clippy::result_large_err)] // Response is large but this is idiomatic in Axum handlers
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    // If no auth token is configured, the endpoint is disabled
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Status endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided_token) if provided_token == expected_token => Ok(()),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format. Expected: Bearer <token>",
            )
                .into_response()),
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

/// Handler: GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": countersign_core::get_version(),
    }))
}

/// Handler: GET /status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusData>, Response> {
    validate_auth(&headers, &state.status_auth_token)?;

    let records = state
        .actions
        .list(&ActionVisibility::for_user(ADMINISTRATOR), None)
        .await
        .map_err(|e| {
            error!("Failed to list workflow actions: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    Ok(Json(StatusData::from_records(
        records,
        countersign_core::get_version(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ReconcileKey;
    use axum::http::HeaderValue;
    use countersign_core::DocumentRef;

    #[test]
    fn test_validate_auth_success() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-token-123"),
        );
        let auth_token = Some("test-token-123".to_string());

        assert!(validate_auth(&headers, &auth_token).is_ok());
    }

    #[test]
    fn test_validate_auth_wrong_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong-token"),
        );
        let auth_token = Some("test-token-123".to_string());

        assert!(validate_auth(&headers, &auth_token).is_err());
    }

    #[test]
    fn test_validate_auth_disabled() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-token"),
        );

        let err = validate_auth(&headers, &None).unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validate_auth_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        let auth_token = Some("test-token-123".to_string());

        assert!(validate_auth(&headers, &auth_token).is_err());
    }

    #[test]
    fn test_status_data_counts_and_lists_open_only() {
        let key = ReconcileKey::new(DocumentRef::new("Leave Application", "LA-1"), "Pending");
        let open = WorkflowActionRecord::open(&key, "mona");
        let mut done = WorkflowActionRecord::open(&key, "max");
        done.status = ActionStatus::Completed;

        let data = StatusData::from_records(vec![open, done], "abc123".to_string());

        assert_eq!(data.summary.total_actions, 2);
        assert_eq!(data.summary.open, 1);
        assert_eq!(data.summary.completed, 1);
        assert_eq!(data.open_actions.len(), 1);
        assert_eq!(data.open_actions[0].user, "mona");
    }
}
