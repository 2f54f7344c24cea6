//! Investigation query endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use spikehound_core::{ApprovalRecord, ExecutionOutcome};

use crate::routes::AppState;
use crate::{ErrorResponse, SuccessResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomesResponse {
    pub investigation_id: String,
    pub approval: Option<ApprovalRecord>,
    pub outcomes: Vec<ExecutionOutcome>,
}

fn not_found(investigation_id: &str) -> Response {
    let body = ErrorResponse::new(
        "NOT_FOUND",
        format!("No investigation '{investigation_id}'"),
    );
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// GET /api/v1/investigations/:id
pub async fn get_investigation(
    State(state): State<Arc<AppState>>,
    Path(investigation_id): Path<String>,
) -> Response {
    match state.investigations.report(&investigation_id).await {
        Some(report) => (StatusCode::OK, Json(SuccessResponse::new(report))).into_response(),
        None => not_found(&investigation_id),
    }
}

/// GET /api/v1/investigations/:id/outcomes
pub async fn get_outcomes(
    State(state): State<Arc<AppState>>,
    Path(investigation_id): Path<String>,
) -> Response {
    let investigations = &state.investigations;
    let approval = investigations.approval(&investigation_id).await;
    let outcomes = investigations.outcomes(&investigation_id).await;
    let known = investigations.report(&investigation_id).await.is_some();

    if !known && approval.is_none() && outcomes.is_none() {
        return not_found(&investigation_id);
    }

    let body = OutcomesResponse {
        investigation_id,
        approval,
        outcomes: outcomes.unwrap_or_default(),
    };
    (StatusCode::OK, Json(SuccessResponse::new(body))).into_response()
}
