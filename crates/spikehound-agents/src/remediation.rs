//! Remediation stage
//!
//! Turns a diagnosis into an ordered remediation plan. Every action requires
//! human approval. With a configured reasoning service the plan is requested
//! from it first; the deterministic rules are the fallback and the default.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use spikehound_core::remediation::UNKNOWN_RESOURCE;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, Diagnosis, Error, RemediationAction,
    RemediationActionType, RemediationPlan, Result, RiskLevel, UnifiedFindings,
};
use tracing::{info, instrument, warn};

use crate::reasoning::ReasoningClient;
use crate::runner::AgentRunner;

/// Reported when the reasoning service was configured but could not produce a plan
pub const REASONING_FALLBACK_ERROR: &str = "Remediation reasoning unavailable; used rules fallback.";

const ROLLBACK_NOTES: &str = "If an approved action causes disruption, restore prior VM state \
or schedule and notify stakeholders in the incident channel.";

const SYSTEM_PROMPT: &str = "You generate safe remediation plans for cloud cost anomalies. \
Return JSON only matching the RemediationPlan schema: \
{\"summary\":\"string\",\"actions\":[{\"type\":\"stop_vm|resize_vm|add_auto_shutdown|notify_owner|open_ticket\",\
\"target_resource_id\":\"string\",\"parameters\":{\"key\":\"string\"},\"risk_level\":\"low|medium|high\",\
\"human_approval_required\":true}],\"rollback_notes\":\"string\"}. \
Always keep human_approval_required=true for every action.";

const NO_SHUTDOWN_PHRASES: [&str; 5] = [
    "no shutdown",
    "without auto-shutdown",
    "missing auto-shutdown",
    "shutdown missing",
    "shutdown disabled",
];
const RUNNING_UNEXPECTEDLY_PHRASES: [&str; 3] =
    ["running unexpectedly", "left running", "running longer than intended"];

/// Remediation agent; expects the diagnosis in [`AgentHints::diagnosis`]
pub struct RemediationAgent {
    reasoning: Arc<dyn ReasoningClient>,
}

impl std::fmt::Debug for RemediationAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationAgent")
            .field("reasoning_configured", &self.reasoning.is_configured())
            .finish()
    }
}

impl RemediationAgent {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoning }
    }

    async fn reason(
        &self,
        findings: &UnifiedFindings,
        diagnosis: Option<&Diagnosis>,
        target: &str,
    ) -> Result<RemediationPlan> {
        let diagnosis_json = serde_json::to_string(&diagnosis)?;
        let findings_json = serde_json::to_string(findings)?;
        let user_prompt = format!(
            "Create remediation actions for the following diagnosis and findings.\n\
             Diagnosis: {diagnosis_json}\n\
             Unified findings: {findings_json}\n\
             Primary target resource: {target}\n\
             Prefer low-risk actions first."
        );

        let value = self.reasoning.complete_json(SYSTEM_PROMPT, &user_prompt).await?;
        let plan: RemediationPlan = serde_json::from_value(value)
            .map_err(|e| Error::invalid_response(format!("remediation plan schema mismatch: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }
}

#[async_trait]
impl AgentRunner<UnifiedFindings> for RemediationAgent {
    type Output = RemediationPlan;

    #[instrument(skip_all, fields(alert_id = %findings.alert_id))]
    async fn run(&self, findings: UnifiedFindings, hints: AgentHints) -> Result<AgentResult<RemediationPlan>> {
        let started_at = Utc::now();
        let target = resolve_target_resource_id(&findings);
        let diagnosis = hints.diagnosis.as_ref();

        let mut errors = Vec::new();
        if self.reasoning.is_configured() {
            match self.reason(&findings, diagnosis, &target).await {
                Ok(plan) => {
                    info!(actions = plan.actions.len(), "Remediation plan from reasoning service");
                    return Ok(AgentResult::ok(AgentIdentity::Remediation, started_at, plan));
                }
                Err(err) => {
                    warn!(error = %err, "Remediation reasoning failed, using rules");
                    errors.push(REASONING_FALLBACK_ERROR.to_string());
                }
            }
        }

        let plan = rules_plan(diagnosis, &target);
        info!(actions = plan.actions.len(), summary = %plan.summary, "Rule-based remediation plan");
        Ok(AgentResult::from_errors(AgentIdentity::Remediation, started_at, plan, errors))
    }
}

/// First cost finding with a resource id, then the alert's resource id
pub fn resolve_target_resource_id(findings: &UnifiedFindings) -> String {
    findings
        .first_cost_resource_id()
        .or_else(|| {
            findings
                .alert_summary
                .as_ref()
                .and_then(|s| s.resource_id.as_deref())
                .map(str::trim)
                .filter(|id| !id.is_empty())
        })
        .unwrap_or(UNKNOWN_RESOURCE)
        .to_string()
}

/// Deterministic plan from the diagnosis text. Never empty.
pub fn rules_plan(diagnosis: Option<&Diagnosis>, target: &str) -> RemediationPlan {
    let text = diagnosis.map(Diagnosis::searchable_text).unwrap_or_default();

    let mentions_gpu_vm = text.contains("gpu vm") || (text.contains("gpu") && text.contains("vm"));
    let mentions_no_shutdown = NO_SHUTDOWN_PHRASES.iter().any(|p| text.contains(p));
    let running_unexpectedly = RUNNING_UNEXPECTEDLY_PHRASES.iter().any(|p| text.contains(p));

    let mut actions = Vec::new();
    let mut reasons = Vec::new();

    if mentions_gpu_vm && mentions_no_shutdown {
        actions.push(
            RemediationAction::new(RemediationActionType::AddAutoShutdown, target, RiskLevel::Low)
                .with_parameter("schedule_utc", "22:00")
                .with_parameter("timezone", "UTC")
                .with_parameter("reason", "Prevent overnight idle GPU spend"),
        );
        reasons.push("Detected GPU VM without shutdown automation");
    }

    if running_unexpectedly {
        actions.push(
            RemediationAction::new(RemediationActionType::StopVm, target, RiskLevel::Medium)
                .with_parameter("mode", "deallocate")
                .with_parameter("reason", "Unexpected runtime outside planned usage"),
        );
        reasons.push("VM appears to be running unexpectedly");
    }

    if actions.is_empty() {
        actions.push(
            RemediationAction::new(RemediationActionType::NotifyOwner, target, RiskLevel::Low)
                .with_parameter("channel", "incident-war-room")
                .with_parameter("message", "Review diagnosis and approve a remediation action."),
        );
        reasons.push("No deterministic infrastructure action matched");
    }

    RemediationPlan {
        summary: reasons.join("; "),
        actions,
        rollback_notes: ROLLBACK_NOTES.to_string(),
    }
}
