//! Spikehound core
//!
//! Shared model for the investigation pipeline: the per-stage
//! [`AgentResult`], alert normalization, findings and their deterministic
//! merge, diagnosis and remediation types, configuration and the idempotency
//! cache.

pub mod agent;
pub mod alert;
pub mod cache;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod findings;
pub mod remediation;

pub use agent::{AgentHints, AgentIdentity, AgentResult, AgentStatus};
pub use alert::AlertSummary;
pub use cache::IdempotencyCache;
pub use config::Config;
pub use diagnosis::{Diagnosis, Hypothesis};
pub use error::{Error, Result};
pub use findings::{
    AgentData, CostFinding, HistoryFindings, InvestigationFindings, InvestigationReport,
    ResourceChange, ResourceConfig, ResourceFindings, SimilarIncident, UnifiedFindings,
};
pub use remediation::{
    ApprovalDecision, ApprovalRecord, ExecutionOutcome, ExecutionStatus, HumanApprovalRequired,
    RemediationAction, RemediationActionType, RemediationPlan, RiskLevel,
};
