//! Execution gate
//!
//! Applies an approved remediation plan through an [`ActionExecutor`]. Nothing
//! reaches the executor unless the approval decision is `approve` and
//! execution is enabled; one failing action never stops the others.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use spikehound_core::{
    ApprovalDecision, ApprovalRecord, Error, ExecutionOutcome, ExecutionStatus, RemediationAction,
    RemediationActionType, RemediationPlan, Result,
};
use tracing::{info, instrument, warn};

use crate::runner::panic_message;

const DEFAULT_SHUTDOWN_SCHEDULE_UTC: &str = "22:00";
const DEFAULT_SHUTDOWN_TIMEZONE: &str = "UTC";

/// Message attached to every action while the kill switch is off
pub const EXECUTION_DISABLED_MESSAGE: &str =
    "Execution disabled. Set SPIKEHOUND_EXECUTION_ENABLED=true to execute approved actions.";

/// Side effects on the cloud provider
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn stop_vm(&self, resource_group: &str, vm_name: &str) -> Result<()>;

    /// Returns a human-readable status message
    async fn add_auto_shutdown(
        &self,
        resource_group: &str,
        vm_name: &str,
        schedule_utc: &str,
        timezone: &str,
    ) -> Result<String>;
}

/// Executor for deployments without cloud credentials; every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActionExecutor;

#[async_trait]
impl ActionExecutor for NoopActionExecutor {
    async fn stop_vm(&self, _resource_group: &str, _vm_name: &str) -> Result<()> {
        Err(Error::unavailable("no remediation executor is configured"))
    }

    async fn add_auto_shutdown(
        &self,
        _resource_group: &str,
        _vm_name: &str,
        _schedule_utc: &str,
        _timezone: &str,
    ) -> Result<String> {
        Err(Error::unavailable("no remediation executor is configured"))
    }
}

/// Resource group and VM name parsed from an ARM resource id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmTarget {
    pub resource_group: String,
    pub vm_name: String,
}

/// Parse `.../resourceGroups/<rg>/.../virtualMachines/<name>`; segment names
/// match case-insensitively and empty segments are ignored.
pub fn parse_vm_target(resource_id: &str) -> Result<VmTarget> {
    let parts: Vec<&str> = resource_id.split('/').filter(|s| !s.is_empty()).collect();
    let value_after = |segment: &str| {
        parts
            .iter()
            .position(|p| p.eq_ignore_ascii_case(segment))
            .and_then(|i| parts.get(i + 1))
            .map(|s| s.to_string())
    };

    match (value_after("resourcegroups"), value_after("virtualmachines")) {
        (Some(resource_group), Some(vm_name)) => Ok(VmTarget {
            resource_group,
            vm_name,
        }),
        _ => Err(Error::malformed_target(
            resource_id,
            "expected resourceGroups and virtualMachines segments",
        )),
    }
}

/// Gate between approvals and the executor
pub struct ExecutionGate {
    executor: Arc<dyn ActionExecutor>,
    enabled: bool,
}

impl std::fmt::Debug for ExecutionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ExecutionGate {
    pub fn new(executor: Arc<dyn ActionExecutor>, enabled: bool) -> Self {
        Self { executor, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One outcome per plan action, in plan order
    #[instrument(skip_all, fields(actions = plan.actions.len()))]
    pub async fn execute(
        &self,
        plan: &RemediationPlan,
        approval: Option<&ApprovalRecord>,
    ) -> Vec<ExecutionOutcome> {
        let decision = approval.map(|a| a.decision);
        if decision != Some(ApprovalDecision::Approve) {
            let label = decision.map_or("missing", |d| d.as_str());
            info!(decision = label, "Remediation execution skipped");
            let message =
                format!("Remediation execution skipped because approval decision is '{label}'.");
            return skip_all(plan, &message);
        }

        if !self.enabled {
            warn!("Remediation approved but execution is disabled");
            return skip_all(plan, EXECUTION_DISABLED_MESSAGE);
        }

        let mut outcomes = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let started_at = Utc::now();
            let attempt = AssertUnwindSafe(self.execute_action(action))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(Error::execution(format!("executor panicked: {}", panic_message(panic))))
                });
            let outcome = match attempt {
                Ok((status, message)) => ExecutionOutcome::finish(action, status, message, started_at),
                Err(err) => {
                    warn!(action = %action.action_type, target = %action.target_resource_id, error = %err, "Remediation action failed");
                    ExecutionOutcome::finish(
                        action,
                        ExecutionStatus::Error,
                        format!("Execution failed: {err}"),
                        started_at,
                    )
                }
            };
            info!(action = %outcome.action, status = %outcome.status, "Remediation action finished");
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn execute_action(&self, action: &RemediationAction) -> Result<(ExecutionStatus, String)> {
        match action.action_type {
            RemediationActionType::StopVm => {
                let target = parse_vm_target(&action.target_resource_id)?;
                self.executor.stop_vm(&target.resource_group, &target.vm_name).await?;
                Ok((
                    ExecutionStatus::Ok,
                    format!(
                        "Stopped VM '{}' in resource group '{}'.",
                        target.vm_name, target.resource_group
                    ),
                ))
            }
            RemediationActionType::AddAutoShutdown => {
                let target = parse_vm_target(&action.target_resource_id)?;
                let schedule = parameter(action, "schedule_utc", DEFAULT_SHUTDOWN_SCHEDULE_UTC);
                let timezone = parameter(action, "timezone", DEFAULT_SHUTDOWN_TIMEZONE);
                let message = self
                    .executor
                    .add_auto_shutdown(&target.resource_group, &target.vm_name, schedule, timezone)
                    .await?;
                Ok((ExecutionStatus::Degraded, message))
            }
            other => Ok((
                ExecutionStatus::Skipped,
                format!("Remediation action '{other}' is not implemented for execution."),
            )),
        }
    }
}

fn parameter<'a>(action: &'a RemediationAction, key: &str, default: &'a str) -> &'a str {
    action
        .parameters
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn skip_all(plan: &RemediationPlan, message: &str) -> Vec<ExecutionOutcome> {
    let now = Utc::now();
    plan.actions
        .iter()
        .map(|action| ExecutionOutcome {
            action: action.action_type,
            target_resource_id: action.target_resource_id.clone(),
            status: ExecutionStatus::Skipped,
            message: message.to_string(),
            started_at: now,
            finished_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikehound_core::RiskLevel;
    use std::sync::Mutex;

    const VM: &str = "/subscriptions/s/resourceGroups/rg-ml/providers/Microsoft.Compute/virtualMachines/vm-gpu";

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
        fail_stop: bool,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn stop_vm(&self, resource_group: &str, vm_name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("stop {resource_group}/{vm_name}"));
            if self.fail_stop {
                return Err(Error::external("compute API returned 409"));
            }
            Ok(())
        }

        async fn add_auto_shutdown(
            &self,
            resource_group: &str,
            vm_name: &str,
            schedule_utc: &str,
            timezone: &str,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("shutdown {resource_group}/{vm_name} {schedule_utc} {timezone}"));
            Ok("Auto-shutdown schedule requested; verify in portal.".to_string())
        }
    }

    /// Executor whose stop call panics
    struct PanickingExecutor;

    #[async_trait]
    impl ActionExecutor for PanickingExecutor {
        async fn stop_vm(&self, _resource_group: &str, _vm_name: &str) -> Result<()> {
            panic!("compute client poisoned");
        }

        async fn add_auto_shutdown(
            &self,
            _resource_group: &str,
            _vm_name: &str,
            _schedule_utc: &str,
            _timezone: &str,
        ) -> Result<String> {
            Ok("requested".to_string())
        }
    }

    fn plan(actions: Vec<RemediationAction>) -> RemediationPlan {
        RemediationPlan::new("summary", actions, "rollback").unwrap()
    }

    fn approval(decision: ApprovalDecision) -> ApprovalRecord {
        ApprovalRecord {
            investigation_id: "alert-1".into(),
            decision,
            decided_by: "oncall".into(),
            decided_at: Utc::now(),
            reason: None,
        }
    }

    fn full_plan() -> RemediationPlan {
        plan(vec![
            RemediationAction::new(RemediationActionType::AddAutoShutdown, VM, RiskLevel::Low)
                .with_parameter("schedule_utc", "21:30"),
            RemediationAction::new(RemediationActionType::StopVm, VM, RiskLevel::Medium),
            RemediationAction::new(RemediationActionType::NotifyOwner, VM, RiskLevel::Low),
        ])
    }

    #[test]
    fn test_parse_vm_target() {
        let target = parse_vm_target(VM).unwrap();
        assert_eq!(target.resource_group, "rg-ml");
        assert_eq!(target.vm_name, "vm-gpu");

        let target = parse_vm_target("//SUBSCRIPTIONS/s//RESOURCEGROUPS/rg/VIRTUALMACHINES/vm1/").unwrap();
        assert_eq!(target, VmTarget { resource_group: "rg".into(), vm_name: "vm1".into() });

        assert!(matches!(
            parse_vm_target("/subscriptions/s/resourceGroups/rg"),
            Err(Error::MalformedTarget { .. })
        ));
        assert!(parse_vm_target("/resourceGroups/rg/virtualMachines").is_err());
    }

    #[tokio::test]
    async fn test_reject_skips_without_calling_executor() {
        let executor = Arc::new(RecordingExecutor::default());
        let gate = ExecutionGate::new(executor.clone(), true);

        let outcomes = gate.execute(&full_plan(), Some(&approval(ApprovalDecision::Reject))).await;
        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert_eq!(outcome.status, ExecutionStatus::Skipped);
            assert_eq!(
                outcome.message,
                "Remediation execution skipped because approval decision is 'reject'."
            );
        }
        assert!(executor.calls().is_empty());

        let outcomes = gate.execute(&full_plan(), None).await;
        assert!(outcomes[0].message.contains("'missing'"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_gate_skips_approved_plan() {
        let executor = Arc::new(RecordingExecutor::default());
        let gate = ExecutionGate::new(executor.clone(), false);

        let outcomes = gate.execute(&full_plan(), Some(&approval(ApprovalDecision::Approve))).await;
        assert!(outcomes.iter().all(|o| o.status == ExecutionStatus::Skipped));
        assert!(outcomes.iter().all(|o| o.message == EXECUTION_DISABLED_MESSAGE));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_approve_runs_actions_in_order() {
        let executor = Arc::new(RecordingExecutor::default());
        let gate = ExecutionGate::new(executor.clone(), true);

        let outcomes = gate.execute(&full_plan(), Some(&approval(ApprovalDecision::Approve))).await;
        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![ExecutionStatus::Degraded, ExecutionStatus::Ok, ExecutionStatus::Skipped]
        );
        assert_eq!(outcomes[1].message, "Stopped VM 'vm-gpu' in resource group 'rg-ml'.");
        assert_eq!(
            outcomes[2].message,
            "Remediation action 'notify_owner' is not implemented for execution."
        );
        assert_eq!(
            executor.calls(),
            vec!["shutdown rg-ml/vm-gpu 21:30 UTC", "stop rg-ml/vm-gpu"]
        );
    }

    #[tokio::test]
    async fn test_failures_are_per_action() {
        let executor = Arc::new(RecordingExecutor {
            fail_stop: true,
            ..Default::default()
        });
        let gate = ExecutionGate::new(executor.clone(), true);
        let plan = plan(vec![
            RemediationAction::new(RemediationActionType::StopVm, "/not/a/vm", RiskLevel::Medium),
            RemediationAction::new(RemediationActionType::StopVm, VM, RiskLevel::Medium),
            RemediationAction::new(RemediationActionType::AddAutoShutdown, VM, RiskLevel::Low),
        ]);

        let outcomes = gate.execute(&plan, Some(&approval(ApprovalDecision::Approve))).await;
        assert_eq!(outcomes[0].status, ExecutionStatus::Error);
        assert!(outcomes[0].message.starts_with("Execution failed: malformed target resource id '/not/a/vm'"));
        assert_eq!(outcomes[1].status, ExecutionStatus::Error);
        assert_eq!(outcomes[1].message, "Execution failed: compute API returned 409");
        assert_eq!(outcomes[2].status, ExecutionStatus::Degraded);
        assert_eq!(outcomes[2].target_resource_id, VM);
    }

    #[tokio::test]
    async fn test_executor_panic_becomes_action_error() {
        let gate = ExecutionGate::new(Arc::new(PanickingExecutor), true);
        let outcomes = gate
            .execute(&full_plan(), Some(&approval(ApprovalDecision::Approve)))
            .await;

        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [ExecutionStatus::Degraded, ExecutionStatus::Error, ExecutionStatus::Skipped]
        );
        assert!(outcomes[1].message.contains("compute client poisoned"));
    }
}
