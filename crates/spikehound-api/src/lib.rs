//! # Spikehound API
//!
//! HTTP surface of the service:
//! - Alert ingress with per-alert idempotency and transient-error retry
//! - Human approval of remediation plans and gated execution
//! - Webhook notifications for reports and execution follow-ups
//! - Query endpoints over the latest reports and execution outcomes

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod approval;
pub mod handlers;
pub mod ingress;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub use approval::{ApprovalWorkflow, QueueExecutionResult};
pub use ingress::{Clock, IngressService, SystemClock};
pub use notify::WebhookNotificationSink;
pub use routes::{create_router, AppState};
pub use state::InvestigationState;

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], spikehound_core::config::DEFAULT_PORT)),
            timeout_secs: spikehound_core::config::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Envelope for successful responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Envelope for error responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::approval::{ApprovalWorkflow, QueueExecutionResult};
    pub use crate::ingress::IngressService;
    pub use crate::notify::WebhookNotificationSink;
    pub use crate::routes::{create_router, AppState};
    pub use crate::state::InvestigationState;
    pub use crate::{ApiConfig, ErrorResponse, SuccessResponse};
}
