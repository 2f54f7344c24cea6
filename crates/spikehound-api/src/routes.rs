//! API route definitions
//!
//! - `GET /health`
//! - `POST /webhooks/alert` - investigate an alert
//! - `POST /webhooks/approval` - record a decision on a remediation plan
//! - `GET /api/v1/investigations/:id` - latest report
//! - `GET /api/v1/investigations/:id/outcomes` - approval and execution outcomes

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::approval::ApprovalWorkflow;
use crate::handlers::{
    get_investigation, get_outcomes, health, receive_alert, receive_approval,
};
use crate::ingress::IngressService;
use crate::middleware::request_id_middleware;
use crate::state::InvestigationState;
use crate::ApiConfig;

/// Shared handler state
#[derive(Debug)]
pub struct AppState {
    pub ingress: Arc<IngressService>,
    pub approvals: Arc<ApprovalWorkflow>,
    pub investigations: Arc<InvestigationState>,
    pub version: String,
}

pub fn create_router(config: &ApiConfig, state: Arc<AppState>) -> Router {
    let api_v1 = Router::new()
        .route("/investigations/:id", get(get_investigation))
        .route("/investigations/:id/outcomes", get(get_outcomes));

    let webhooks = Router::new()
        .route("/alert", post(receive_alert))
        .route("/approval", post(receive_approval));

    Router::new()
        .route("/health", get(health))
        .nest("/webhooks", webhooks)
        .nest("/api/v1", api_v1)
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
