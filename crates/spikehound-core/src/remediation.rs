//! Remediation plans, approvals and execution outcomes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Target used when neither findings nor alert name a resource
pub const UNKNOWN_RESOURCE: &str = "unknown-resource";

/// Kind of remediation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationActionType {
    StopVm,
    ResizeVm,
    AddAutoShutdown,
    NotifyOwner,
    OpenTicket,
}

impl RemediationActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopVm => "stop_vm",
            Self::ResizeVm => "resize_vm",
            Self::AddAutoShutdown => "add_auto_shutdown",
            Self::NotifyOwner => "notify_owner",
            Self::OpenTicket => "open_ticket",
        }
    }
}

impl fmt::Display for RemediationActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Marker that a human must approve an action.
///
/// Always serializes as `true`; decoding `false` fails, so no plan can
/// opt out of approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HumanApprovalRequired;

impl HumanApprovalRequired {
    pub fn value(&self) -> bool {
        true
    }
}

impl Serialize for HumanApprovalRequired {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for HumanApprovalRequired {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(Self)
        } else {
            Err(de::Error::invalid_value(
                Unexpected::Bool(false),
                &"human_approval_required = true",
            ))
        }
    }
}

/// One proposed remediation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAction {
    #[serde(rename = "type")]
    pub action_type: RemediationActionType,
    pub target_resource_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub human_approval_required: HumanApprovalRequired,
}

impl RemediationAction {
    pub fn new(
        action_type: RemediationActionType,
        target_resource_id: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            action_type,
            target_resource_id: target_resource_id.into(),
            parameters: BTreeMap::new(),
            risk_level,
            human_approval_required: HumanApprovalRequired,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Ordered list of proposed actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub summary: String,
    pub actions: Vec<RemediationAction>,
    #[serde(default)]
    pub rollback_notes: String,
}

impl RemediationPlan {
    /// Build a plan; a plan without actions is rejected
    pub fn new(
        summary: impl Into<String>,
        actions: Vec<RemediationAction>,
        rollback_notes: impl Into<String>,
    ) -> Result<Self> {
        let plan = Self {
            summary: summary.into(),
            actions,
            rollback_notes: rollback_notes.into(),
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Check structural constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(Error::invalid_response("remediation plan has no actions"));
        }
        if self.summary.trim().is_empty() {
            return Err(Error::invalid_response("remediation plan has an empty summary"));
        }
        if self
            .actions
            .iter()
            .any(|action| action.target_resource_id.trim().is_empty())
        {
            return Err(Error::invalid_response("remediation action has an empty target"));
        }
        Ok(())
    }
}

// =============================================================================
// Approval
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Investigate,
}

impl ApprovalDecision {
    /// Map an interactive button id to a decision
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id.trim() {
            "approve_remediation" => Some(Self::Approve),
            "reject_remediation" => Some(Self::Reject),
            "investigate_more" => Some(Self::Investigate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Investigate => "investigate",
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human decision on a remediation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub investigation_id: String,
    pub decision: ApprovalDecision,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// Execution
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Degraded,
    Error,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing (or skipping) one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub action: RemediationActionType,
    pub target_resource_id: String,
    pub status: ExecutionStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// Outcome for `action` that started at `started_at` and finished now
    pub fn finish(
        action: &RemediationAction,
        status: ExecutionStatus,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.action_type,
            target_resource_id: action.target_resource_id.clone(),
            status,
            message: message.into(),
            started_at,
            finished_at: Utc::now().max(started_at),
        }
    }
}
