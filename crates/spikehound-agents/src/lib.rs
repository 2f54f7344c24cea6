//! # Spikehound Agents
//!
//! The investigation pipeline:
//! - [`runner::TaskRunner`]: timeout and failure boundary around one agent call
//! - [`agents`]: cost, resource and history investigators
//! - [`diagnosis`] and [`remediation`]: reasoning-first stages with rule fallbacks
//! - [`coordinator::Coordinator`]: parallel investigation, merge, diagnosis, remediation
//! - [`execution::ExecutionGate`]: approval-gated remediation execution

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod agents;
pub mod coordinator;
pub mod diagnosis;
pub mod execution;
pub mod reasoning;
pub mod remediation;
pub mod runner;

pub use agents::AlertPayload;
pub use coordinator::{
    Coordinator, NoopNotificationSink, NotificationSink, PipelineAgents, PipelineBackends,
    PipelineStage,
};
pub use diagnosis::{fallback_diagnosis, DiagnosisAgent};
pub use execution::{ActionExecutor, ExecutionGate, NoopActionExecutor};
pub use reasoning::{HttpReasoningClient, NoopReasoningClient, ReasoningClient};
pub use remediation::{rules_plan, RemediationAgent};
pub use runner::{AgentRunner, TaskRunner};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agents::{
        AlertPayload, CostInvestigator, CostQueryClient, HistoryInvestigator, ResourceInvestigator,
        ResourceQueryClient,
    };
    pub use crate::coordinator::{Coordinator, NotificationSink, PipelineAgents, PipelineBackends};
    pub use crate::execution::{ActionExecutor, ExecutionGate};
    pub use crate::reasoning::ReasoningClient;
    pub use crate::runner::{AgentRunner, TaskRunner};
}
