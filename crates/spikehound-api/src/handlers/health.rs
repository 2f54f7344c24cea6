use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::routes::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cached_reports: usize,
    pub eviction_running: bool,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        cached_reports: state.investigations.cache().len(),
        eviction_running: state.ingress.is_running(),
    };
    (StatusCode::OK, Json(body))
}
