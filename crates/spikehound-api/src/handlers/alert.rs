//! Alert webhook

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value;
use tracing::{info, instrument};

use crate::routes::AppState;

/// POST /webhooks/alert
///
/// Runs (or replays from cache) the investigation and returns the report
/// itself, without the response envelope.
#[instrument(skip_all)]
pub async fn receive_alert(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let report = state.ingress.handle_alert(payload).await;
    info!(
        investigation_id = %report.investigation_id(),
        diagnosis = %report.diagnosis_result.status,
        "Alert handled"
    );
    (StatusCode::OK, Json(report))
}
