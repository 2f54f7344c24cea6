//! Approval webhook

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spikehound_core::ApprovalDecision;
use tracing::{instrument, warn};

use crate::routes::AppState;
use crate::{ErrorResponse, SuccessResponse};

/// Decided-by label when the request names nobody
pub const UNKNOWN_USER: &str = "unknown-user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// `approve_remediation`, `reject_remediation` or `investigate_more`
    pub action_id: String,
    pub investigation_id: String,
    /// Either a plain name or an object with `username` / `name` / `id`
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Best display name for the deciding user
pub fn user_label(user: Option<&Value>) -> String {
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match user {
        Some(Value::String(name)) => Some(name.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Object(map)) => text(map.get("username"))
            .or_else(|| text(map.get("name")))
            .or_else(|| text(map.get("id"))),
        _ => None,
    }
    .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

/// POST /webhooks/approval
#[instrument(skip_all, fields(investigation_id = %request.investigation_id, action_id = %request.action_id))]
pub async fn receive_approval(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApprovalRequest>,
) -> Response {
    let Some(decision) = ApprovalDecision::from_action_id(&request.action_id) else {
        warn!("Unknown approval action");
        let body = ErrorResponse::new(
            "INVALID_ACTION",
            format!("Unsupported action_id '{}'", request.action_id),
        );
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    };

    let investigation_id = request.investigation_id.trim();
    if investigation_id.is_empty() {
        let body = ErrorResponse::new("INVALID_REQUEST", "investigation_id is required");
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let decided_by = user_label(request.user.as_ref());
    let outcome = state
        .approvals
        .record_decision(investigation_id, decision, &decided_by, request.reason)
        .await;

    (StatusCode::ACCEPTED, Json(SuccessResponse::new(outcome))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_label() {
        assert_eq!(user_label(Some(&json!({"username": "ops", "name": "Ops"}))), "ops");
        assert_eq!(user_label(Some(&json!({"name": " Ops ", "id": "U1"}))), "Ops");
        assert_eq!(user_label(Some(&json!({"id": "U1"}))), "U1");
        assert_eq!(user_label(Some(&json!("carol"))), "carol");
        assert_eq!(user_label(Some(&json!({}))), UNKNOWN_USER);
        assert_eq!(user_label(None), UNKNOWN_USER);
    }
}
