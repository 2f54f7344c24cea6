//! Approval workflow
//!
//! Records human decisions on remediation plans. An approval queues the
//! cached plan for execution through the [`ExecutionGate`] in the
//! background; the outcomes are stored and sent to the notification sinks
//! as a follow-up message.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spikehound_agents::execution::EXECUTION_DISABLED_MESSAGE;
use spikehound_agents::{Coordinator, ExecutionGate};
use spikehound_core::{ApprovalDecision, ApprovalRecord, ExecutionOutcome};
use tracing::{info, instrument, warn};

use crate::ingress::Clock;
use crate::state::InvestigationState;

/// Reason recorded for an "investigate more" decision without one
pub const INVESTIGATE_REASON: &str = "Requested additional investigation";

/// Label for the channel decisions arrive through
pub const DEFAULT_APPROVAL_SOURCE: &str = "webhook";

/// What happened to the execution request behind a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueExecutionResult {
    Queued,
    Disabled,
    AlreadyQueued,
    NoPlan,
    /// The decision does not request execution
    Ignored,
    QueueFailed,
}

impl QueueExecutionResult {
    /// User-facing explanation
    pub fn message(&self, investigation_id: &str) -> String {
        match self {
            Self::Queued => format!("Remediation execution queued for `{investigation_id}`."),
            Self::Disabled => EXECUTION_DISABLED_MESSAGE.to_string(),
            Self::AlreadyQueued => {
                format!("Remediation execution for `{investigation_id}` is already queued.")
            }
            Self::NoPlan => format!(
                "No cached remediation plan for `{investigation_id}`. Re-run the investigation before approving."
            ),
            Self::Ignored => format!("Decision recorded for `{investigation_id}`."),
            Self::QueueFailed => {
                format!("Unable to queue remediation execution for `{investigation_id}`.")
            }
        }
    }
}

/// Result of [`ApprovalWorkflow::record_decision`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub record: ApprovalRecord,
    pub execution: QueueExecutionResult,
    pub message: String,
}

pub struct ApprovalWorkflow {
    state: Arc<InvestigationState>,
    gate: Arc<ExecutionGate>,
    coordinator: Arc<Coordinator>,
    clock: Arc<dyn Clock>,
    source: String,
}

impl std::fmt::Debug for ApprovalWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalWorkflow")
            .field("gate", &self.gate)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ApprovalWorkflow {
    pub fn new(
        state: Arc<InvestigationState>,
        gate: Arc<ExecutionGate>,
        coordinator: Arc<Coordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            gate,
            coordinator,
            clock,
            source: DEFAULT_APPROVAL_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[instrument(skip_all, fields(investigation_id = %investigation_id, decision = %decision))]
    pub async fn record_decision(
        &self,
        investigation_id: &str,
        decision: ApprovalDecision,
        decided_by: &str,
        reason: Option<String>,
    ) -> DecisionOutcome {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .or_else(|| (decision == ApprovalDecision::Investigate).then(|| INVESTIGATE_REASON.to_string()));
        let record = ApprovalRecord {
            investigation_id: investigation_id.to_string(),
            decision,
            decided_by: decided_by.to_string(),
            decided_at: self.clock.now(),
            reason,
        };
        self.state.record_approval(record.clone()).await;
        info!(investigation_id, decided_by, "Approval decision recorded");

        let execution = self.queue_execution(&record).await;
        DecisionOutcome {
            message: execution.message(investigation_id),
            record,
            execution,
        }
    }

    async fn queue_execution(&self, record: &ApprovalRecord) -> QueueExecutionResult {
        let id = record.investigation_id.as_str();
        let Some(plan) = self.state.plan(id).await else {
            return match record.decision {
                ApprovalDecision::Approve => QueueExecutionResult::NoPlan,
                _ => QueueExecutionResult::Ignored,
            };
        };

        match record.decision {
            ApprovalDecision::Investigate => QueueExecutionResult::Ignored,
            ApprovalDecision::Reject => {
                // Every action is skipped; the executor is never reached
                let outcomes = self.gate.execute(&plan, Some(record)).await;
                self.state.record_outcomes(id, outcomes).await;
                QueueExecutionResult::Ignored
            }
            ApprovalDecision::Approve if !self.gate.is_enabled() => {
                let outcomes = self.gate.execute(&plan, Some(record)).await;
                self.state.record_outcomes(id, outcomes).await;
                QueueExecutionResult::Disabled
            }
            ApprovalDecision::Approve => {
                if !self.state.try_mark_queued(id).await {
                    return QueueExecutionResult::AlreadyQueued;
                }
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!(investigation_id = id, "No runtime to queue execution on");
                    self.state.release_queued(id).await;
                    return QueueExecutionResult::QueueFailed;
                };

                let state = self.state.clone();
                let gate = self.gate.clone();
                let coordinator = self.coordinator.clone();
                let record = record.clone();
                let source = self.source.clone();
                runtime.spawn(async move {
                    let outcomes = gate.execute(&plan, Some(&record)).await;
                    let text = followup_message(&record, &source, &outcomes);
                    state.record_outcomes(&record.investigation_id, outcomes).await;
                    coordinator.notify_followup(&text).await;
                    info!(investigation_id = %record.investigation_id, "Remediation execution finished");
                });
                QueueExecutionResult::Queued
            }
        }
    }
}

/// Follow-up text listing each action's outcome
pub fn followup_message(record: &ApprovalRecord, source: &str, outcomes: &[ExecutionOutcome]) -> String {
    let mut text = format!(
        "Remediation follow-up for `{}` ({source} approval by `{}`):",
        record.investigation_id, record.decided_by
    );
    for outcome in outcomes {
        let _ = write!(text, "\n- {}: {} ({})", outcome.action, outcome.status, outcome.message);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use spikehound_agents::{NoopActionExecutor, PipelineAgents, TaskRunner};
    use spikehound_core::{
        AgentIdentity, AgentResult, Config, Diagnosis, ExecutionStatus, InvestigationReport,
        RemediationAction, RemediationActionType, RemediationPlan, RiskLevel, UnifiedFindings,
    };

    use crate::ingress::SystemClock;

    #[test]
    fn test_followup_message() {
        let record = ApprovalRecord {
            investigation_id: "alert-1".into(),
            decision: ApprovalDecision::Approve,
            decided_by: "alice".into(),
            decided_at: Utc::now(),
            reason: None,
        };
        let action = RemediationAction::new(
            RemediationActionType::StopVm,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm",
            RiskLevel::Medium,
        );
        let outcome = ExecutionOutcome::finish(&action, ExecutionStatus::Ok, "Stopped VM 'vm' in resource group 'rg'.", Utc::now());

        assert_eq!(
            followup_message(&record, "webhook", &[outcome]),
            "Remediation follow-up for `alert-1` (webhook approval by `alice`):\n\
             - stop_vm: ok (Stopped VM 'vm' in resource group 'rg'.)"
        );
    }

    #[test]
    fn test_queue_messages() {
        assert_eq!(QueueExecutionResult::Disabled.message("x"), EXECUTION_DISABLED_MESSAGE);
        assert!(QueueExecutionResult::NoPlan.message("x").contains("`x`"));
        assert_eq!(
            serde_json::to_value(QueueExecutionResult::AlreadyQueued).unwrap(),
            serde_json::json!("already_queued")
        );
    }

    #[test]
    fn test_queue_failure_releases_marker() {
        let now = Utc::now();
        let action = RemediationAction::new(
            RemediationActionType::StopVm,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm",
            RiskLevel::Medium,
        );
        let plan = RemediationPlan::new("Stop the VM", vec![action], "Start it again").unwrap();
        let mut findings = UnifiedFindings::merge(Vec::new(), None);
        findings.alert_id = "alert-1".into();
        let report = InvestigationReport {
            unified_findings: findings,
            diagnosis_result: AgentResult::<Diagnosis>::error(AgentIdentity::Diagnosis, now, now, "n/a"),
            remediation_result: AgentResult::ok(AgentIdentity::Remediation, now, plan),
        };

        let state = Arc::new(InvestigationState::default());
        let agents = PipelineAgents::offline(&Config::default()).unwrap();
        let coordinator = Arc::new(Coordinator::new(agents, TaskRunner::default()));
        let gate = Arc::new(ExecutionGate::new(Arc::new(NoopActionExecutor), true));
        let workflow = ApprovalWorkflow::new(state.clone(), gate, coordinator, Arc::new(SystemClock));

        // Outside a tokio runtime there is nothing to spawn the execution on
        futures::executor::block_on(async {
            state.record_report(&report).await;
            let outcome = workflow
                .record_decision("alert-1", ApprovalDecision::Approve, "alice", None)
                .await;
            assert_eq!(outcome.execution, QueueExecutionResult::QueueFailed);
            assert!(state.try_mark_queued("alert-1").await);
        });
    }
}
