//! Diagnosis stage
//!
//! Asks the reasoning service for a root-cause hypothesis over the merged
//! findings. When the service is unavailable or answers with something that
//! does not validate, a deterministic rule engine produces the diagnosis and
//! the stage reports DEGRADED with the reasoning error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, CostFinding, Diagnosis, Error, Result,
    ResourceFindings, SimilarIncident, UnifiedFindings,
};
use tracing::{debug, info, instrument, warn};

use crate::reasoning::ReasoningClient;
use crate::runner::AgentRunner;

const SYSTEM_PROMPT: &str = "You are a diagnosis agent for Azure cost anomalies. \
Synthesize findings into a single actionable root-cause hypothesis. \
Return only valid JSON with this schema: \
{\"hypothesis\":{\"title\":\"string\",\"explanation\":\"string\",\"evidence\":[\"string\"]},\
\"confidence\":0,\"alternatives\":[\"string\"],\"risks\":[\"string\"]}. \
Use confidence as an integer between 0 and 100. \
Provide 3-6 evidence items, at least 2 alternatives, and at least 1 risk.";

const MIN_EVIDENCE: usize = 3;
const MAX_EVIDENCE: usize = 6;
const EVIDENCE_FILLER: &str = "- Additional telemetry required for stronger attribution";

const ALTERNATIVES: [&str; 3] = [
    "Legitimate workload spike",
    "Misconfigured schedule or automation policy",
    "Resource leak causing sustained compute usage",
];
const RISKS: [&str; 1] = ["Stopping VM may disrupt active jobs"];

const INTENTIONAL_OPERATIONS: [&str; 7] =
    ["deploy", "write", "create", "update", "start", "scale", "restart"];

/// Diagnosis agent
pub struct DiagnosisAgent {
    reasoning: Arc<dyn ReasoningClient>,
}

impl std::fmt::Debug for DiagnosisAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosisAgent")
            .field("reasoning_configured", &self.reasoning.is_configured())
            .finish()
    }
}

impl DiagnosisAgent {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoning }
    }

    async fn reason(&self, findings: &UnifiedFindings) -> Result<Diagnosis> {
        let value = self
            .reasoning
            .complete_json(SYSTEM_PROMPT, &user_prompt(findings))
            .await?;
        let diagnosis: Diagnosis = serde_json::from_value(value)
            .map_err(|e| Error::invalid_response(format!("diagnosis schema mismatch: {e}")))?;
        diagnosis.validate()?;
        Ok(diagnosis)
    }
}

#[async_trait]
impl AgentRunner<UnifiedFindings> for DiagnosisAgent {
    type Output = Diagnosis;

    #[instrument(skip_all, fields(alert_id = %findings.alert_id))]
    async fn run(&self, findings: UnifiedFindings, _hints: AgentHints) -> Result<AgentResult<Diagnosis>> {
        let started_at = Utc::now();

        match self.reason(&findings).await {
            Ok(diagnosis) => {
                info!(confidence = diagnosis.confidence, "Diagnosis from reasoning service");
                Ok(AgentResult::ok(AgentIdentity::Diagnosis, started_at, diagnosis))
            }
            Err(err) => {
                warn!(error = %err, "Reasoning unavailable, using rule-based diagnosis");
                let diagnosis = fallback_diagnosis(&findings);
                Ok(AgentResult::degraded(
                    AgentIdentity::Diagnosis,
                    started_at,
                    diagnosis,
                    vec![err.to_string()],
                ))
            }
        }
    }
}

// =============================================================================
// Rule-based fallback
// =============================================================================

/// Inferred power state of the alerted resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Signals the rules are evaluated over
#[derive(Debug)]
struct Signals<'a> {
    top_driver: Option<TopDriver<'a>>,
    looks_like_vm: bool,
    power_state: PowerState,
    shutdown_indicator: Option<String>,
    has_intentional_change: bool,
    history_match: Option<&'a SimilarIncident>,
}

#[derive(Debug)]
struct TopDriver<'a> {
    resource_id: &'a str,
    cost: f64,
    currency: &'a str,
}

/// Deterministic diagnosis used when the reasoning service is unavailable
pub fn fallback_diagnosis(findings: &UnifiedFindings) -> Diagnosis {
    let resource = findings
        .resource_findings
        .as_ref()
        .and_then(|r| serde_json::to_value(r).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));

    let top_driver = top_cost_driver(&findings.cost_findings);
    let signals = Signals {
        looks_like_vm: looks_like_vm(top_driver.as_ref(), findings.resource_findings.as_ref()),
        power_state: infer_power_state(&resource),
        shutdown_indicator: missing_shutdown_indicator(&resource),
        has_intentional_change: has_intentional_change(findings.resource_findings.as_ref()),
        history_match: findings.history_findings.as_ref().and_then(|h| h.matches.first()),
        top_driver,
    };
    let running = signals.power_state == PowerState::Running;

    let (title, confidence, explanation) = match &signals.top_driver {
        None => (
            "Unattributed cost increase",
            40,
            "The findings do not include a reliable top cost-driving resource id, so cost attribution is incomplete. \
Resource and history signals were reviewed, but none can be tied to a confirmed primary cost source. \
This incident is treated as a general compute cost increase until richer attribution data is available."
                .to_string(),
        ),
        Some(driver) if signals.looks_like_vm && running && signals.shutdown_indicator.is_some() => (
            "GPU VM left running without auto-shutdown",
            80,
            format!(
                "The top cost driver is {} and it appears to still be running. \
A shutdown policy signal indicates missing or disabled automation ({}). \
This pattern strongly matches runaway spend caused by a GPU VM left on outside intended windows.",
                driver.resource_id,
                signals.shutdown_indicator.as_deref().unwrap_or_default(),
            ),
        ),
        Some(driver) if signals.looks_like_vm && running && !signals.has_intentional_change => (
            "VM running longer than intended",
            60,
            format!(
                "The top cost driver is {} and runtime indicators show it is running. \
Recent resource-change history does not show a clear deployment or maintenance window that explains prolonged uptime. \
The most likely cause is extended VM runtime beyond the intended schedule.",
                driver.resource_id
            ),
        ),
        Some(_) if signals.history_match.is_some() => (
            "Recurring cost anomaly similar to past incident",
            55,
            format!(
                "A prior incident ({}) closely resembles this anomaly. \
The current findings align with a previously seen pattern and include a known resolution reference. \
This suggests recurrence of an earlier operational issue rather than a novel failure mode.",
                signals.history_match.map(incident_label).unwrap_or_default()
            ),
        ),
        Some(_) => (
            "Compute usage increase",
            40,
            "Cost findings show elevated compute spend, but no single deterministic misconfiguration is confirmed. \
Resource state and change history provide partial context without a definitive root-cause signature. \
Treating this as a broader compute usage increase is the most reliable interim diagnosis."
                .to_string(),
        ),
    };

    debug!(title, confidence, power_state = signals.power_state.as_str(), "Fallback diagnosis");

    Diagnosis::new(title, explanation, build_evidence(findings, &signals), confidence)
        .with_alternatives(ALTERNATIVES.iter().map(|s| s.to_string()).collect())
        .with_risks(RISKS.iter().map(|s| s.to_string()).collect())
}

/// Highest-cost finding; the first one wins ties. `None` without a resource id.
fn top_cost_driver(cost_findings: &[CostFinding]) -> Option<TopDriver<'_>> {
    let mut best: Option<&CostFinding> = None;
    for finding in cost_findings {
        if best.map_or(true, |b| finding.cost > b.cost) {
            best = Some(finding);
        }
    }

    let best = best?;
    let resource_id = best.resource_id.trim();
    if resource_id.is_empty() {
        return None;
    }
    let currency = best.currency.trim();
    Some(TopDriver {
        resource_id,
        cost: best.cost,
        currency: if currency.is_empty() { "USD" } else { currency },
    })
}

fn looks_like_vm(top_driver: Option<&TopDriver<'_>>, resource: Option<&ResourceFindings>) -> bool {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(driver) = top_driver {
        candidates.push(driver.resource_id);
    }
    if let Some(config) = resource.and_then(|r| r.config.as_ref()) {
        candidates.push(&config.resource_type);
        candidates.push(&config.name);
    }

    let combined = candidates.join(" ").to_lowercase();
    combined.contains("virtualmachines") || format!(" {combined}").contains(" vm")
}

fn infer_power_state(resource: &Value) -> PowerState {
    let mut fragments = Vec::new();
    collect_text_fragments(resource, &mut fragments);
    if let Some(properties) = resource.pointer("/config/properties") {
        collect_text_fragments(properties, &mut fragments);
    }

    let text = fragments.join(" ").to_lowercase();
    if text.contains("powerstate/running") || format!(" {text}").contains(" running") {
        PowerState::Running
    } else if text.contains("deallocated") || text.contains("powerstate/stopped") || text.contains("stopped") {
        PowerState::Stopped
    } else {
        PowerState::Unknown
    }
}

/// Keys and scalar values, depth first
fn collect_text_fragments(value: &Value, fragments: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                fragments.push(key.clone());
                collect_text_fragments(child, fragments);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text_fragments(item, fragments);
            }
        }
        Value::Null => {}
        Value::String(text) => fragments.push(text.clone()),
        other => fragments.push(other.to_string()),
    }
}

fn missing_shutdown_indicator(resource: &Value) -> Option<String> {
    let mut leaves = Vec::new();
    walk_key_values(resource, String::new(), &mut leaves);

    for (path, value) in leaves {
        let key = path.to_lowercase();
        if !["shutdown", "schedule", "auto"].iter().any(|term| key.contains(term)) {
            continue;
        }
        if value == &Value::Bool(false) {
            return Some(format!("{path}=false"));
        }

        let text = match value {
            Value::Null => "none".to_string(),
            Value::String(s) => s.trim().to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        if text.is_empty() {
            continue;
        }
        if ["missing", "disabled", "false", "none"].iter().any(|term| text.contains(term)) {
            return Some(format!("{path}={text}"));
        }
    }

    let notes = resource.get("notes").and_then(Value::as_str).unwrap_or_default();
    let lower = notes.to_lowercase();
    let mentions_policy = ["auto-shutdown", "shutdown", "schedule"].iter().any(|t| lower.contains(t));
    let mentions_gap = ["missing", "disabled"].iter().any(|t| lower.contains(t));
    (mentions_policy && mentions_gap).then(|| notes.trim().to_string())
}

/// Leaf values with their `a.b[0].c` paths
fn walk_key_values<'a>(value: &'a Value, prefix: String, leaves: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                walk_key_values(child, path, leaves);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                walk_key_values(child, format!("{prefix}[{index}]"), leaves);
            }
        }
        leaf => {
            let path = if prefix.is_empty() { "value".to_string() } else { prefix };
            leaves.push((path, leaf));
        }
    }
}

fn has_intentional_change(resource: Option<&ResourceFindings>) -> bool {
    resource.is_some_and(|r| {
        r.recent_changes.iter().any(|change| {
            let operation = change.operation.to_lowercase();
            INTENTIONAL_OPERATIONS.iter().any(|kw| operation.contains(kw))
        })
    })
}

fn incident_label(incident: &SimilarIncident) -> String {
    if incident.title.trim().is_empty() {
        incident.id.clone()
    } else {
        incident.title.clone()
    }
}

fn build_evidence(findings: &UnifiedFindings, signals: &Signals<'_>) -> Vec<String> {
    let mut evidence = Vec::new();

    match &signals.top_driver {
        Some(driver) => evidence.push(format!(
            "- Top cost driver: {} (~{:.2} {})",
            driver.resource_id, driver.cost, driver.currency
        )),
        None => evidence.push("- Top cost driver was unavailable in UnifiedFindings cost section".to_string()),
    }

    evidence.push(format!("- Inferred resource power state: {}", signals.power_state.as_str()));

    if let Some(indicator) = &signals.shutdown_indicator {
        evidence.push(format!("- Missing/disabled shutdown indicator: {indicator}"));
    }

    if signals.power_state == PowerState::Running && !signals.has_intentional_change {
        evidence.push(
            "- No recent deployment/change window indicates intentional extended runtime".to_string(),
        );
    }

    if let Some(incident) = signals.history_match {
        let resolution = incident
            .resolution
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("no resolution captured");
        evidence.push(format!(
            "- Similar incident match: {}; prior resolution: {resolution}",
            incident_label(incident)
        ));
    }

    evidence.push(format!("- Alert id: {}", findings.alert_id));

    let mut deduped: Vec<String> = Vec::new();
    for line in evidence {
        let line = line.trim().to_string();
        if !line.is_empty() && !deduped.contains(&line) {
            deduped.push(line);
        }
    }
    while deduped.len() < MIN_EVIDENCE {
        deduped.push(EVIDENCE_FILLER.to_string());
    }
    deduped.truncate(MAX_EVIDENCE);
    deduped
}

// =============================================================================
// Prompt
// =============================================================================

fn user_prompt(findings: &UnifiedFindings) -> String {
    let mut lines = vec!["Investigation findings:".to_string(), String::new(), "Top cost drivers:".to_string()];
    lines.extend(format_top_cost_drivers(findings));
    lines.push(String::new());
    lines.push("Key resource changes:".to_string());
    lines.extend(format_resource_changes(findings));
    lines.push(String::new());
    lines.push("Similar incidents and resolutions:".to_string());
    lines.extend(format_history_matches(findings));
    lines.push(String::new());
    lines.push("Return diagnosis JSON only.".to_string());
    lines.join("\n")
}

fn format_top_cost_drivers(findings: &UnifiedFindings) -> Vec<String> {
    if findings.cost_findings.is_empty() {
        return vec!["- none".to_string()];
    }
    let mut sorted: Vec<&CostFinding> = findings.cost_findings.iter().collect();
    sorted.sort_by(|a, b| b.cost.total_cmp(&a.cost));
    sorted
        .into_iter()
        .take(3)
        .map(|f| {
            let id = if f.resource_id.is_empty() { "unknown-resource" } else { &f.resource_id };
            let currency = if f.currency.is_empty() { "USD" } else { &f.currency };
            format!("- {id}: {:.2} {currency}", f.cost)
        })
        .collect()
}

fn format_resource_changes(findings: &UnifiedFindings) -> Vec<String> {
    let Some(resource) = &findings.resource_findings else {
        return vec!["- none".to_string()];
    };
    if resource.recent_changes.is_empty() {
        return match resource.notes.as_deref().map(str::trim) {
            Some(notes) if !notes.is_empty() => vec![format!("- notes: {notes}")],
            _ => vec!["- none".to_string()],
        };
    }
    resource
        .recent_changes
        .iter()
        .take(3)
        .map(|c| {
            format!(
                "- {}: {} ({}) by {}",
                c.timestamp.as_deref().unwrap_or("unknown-time"),
                if c.operation.is_empty() { "unknown-operation" } else { &c.operation },
                c.status.as_deref().unwrap_or("unknown-status"),
                c.caller.as_deref().unwrap_or("unknown-caller"),
            )
        })
        .collect()
}

fn format_history_matches(findings: &UnifiedFindings) -> Vec<String> {
    let matches = findings
        .history_findings
        .as_ref()
        .map(|h| h.matches.as_slice())
        .unwrap_or_default();
    if matches.is_empty() {
        return vec!["- none".to_string()];
    }
    matches
        .iter()
        .take(3)
        .map(|m| {
            let resolution = m
                .resolution
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or("resolution not provided");
            match m.score {
                Some(score) => format!("- {} (score={score}): {resolution}", incident_label(m)),
                None => format!("- {}: {resolution}", incident_label(m)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::NoopReasoningClient;
    use serde_json::json;
    use spikehound_core::{
        AgentData, AgentStatus, HistoryFindings, InvestigationFindings, ResourceChange,
        ResourceConfig,
    };

    const VM_ID: &str =
        "/subscriptions/s/resourceGroups/rg-ml/providers/Microsoft.Compute/virtualMachines/vm-gpu";

    fn cost(resource_id: &str, amount: f64) -> AgentResult<AgentData> {
        AgentResult::ok(
            AgentIdentity::Cost,
            Utc::now(),
            InvestigationFindings {
                alert_id: "alert-1".into(),
                received_at: Utc::now(),
                cost_findings: vec![CostFinding::new(resource_id, amount, "USD")],
                notes: None,
            }
            .into(),
        )
    }

    fn resource(findings: ResourceFindings) -> AgentResult<AgentData> {
        AgentResult::ok(AgentIdentity::Resource, Utc::now(), findings.into())
    }

    fn running_vm(extra: Value) -> ResourceFindings {
        let mut properties = serde_json::Map::new();
        properties.insert(
            "extended".into(),
            json!({"instanceView": {"powerState": {"code": "PowerState/running"}}}),
        );
        ResourceFindings {
            target_resource_id: Some(VM_ID.into()),
            config: Some(ResourceConfig {
                resource_id: VM_ID.into(),
                name: "vm-gpu".into(),
                resource_type: "Microsoft.Compute/virtualMachines".into(),
                properties,
                ..Default::default()
            }),
            extra: extra.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_gpu_vm_without_shutdown() {
        let findings = UnifiedFindings::merge(
            vec![cost(VM_ID, 500.0), resource(running_vm(json!({"auto_shutdown_enabled": false})))],
            None,
        );

        let diagnosis = fallback_diagnosis(&findings);
        assert_eq!(diagnosis.hypothesis.title, "GPU VM left running without auto-shutdown");
        assert_eq!(diagnosis.confidence, 80);
        assert_eq!(diagnosis.hypothesis.evidence[0], format!("- Top cost driver: {VM_ID} (~500.00 USD)"));
        assert!(diagnosis
            .hypothesis
            .evidence
            .contains(&"- Missing/disabled shutdown indicator: auto_shutdown_enabled=false".to_string()));
        assert_eq!(diagnosis.alternatives.len(), 3);
        assert_eq!(diagnosis.risks, vec!["Stopping VM may disrupt active jobs"]);
    }

    #[test]
    fn test_vm_running_longer_than_intended() {
        let findings = UnifiedFindings::merge(
            vec![cost(VM_ID, 120.0), resource(running_vm(json!({})))],
            None,
        );
        let diagnosis = fallback_diagnosis(&findings);
        assert_eq!(diagnosis.hypothesis.title, "VM running longer than intended");
        assert_eq!(diagnosis.confidence, 60);
        assert!(diagnosis.hypothesis.evidence.contains(
            &"- No recent deployment/change window indicates intentional extended runtime".to_string()
        ));
    }

    #[test]
    fn test_intentional_change_falls_through() {
        let mut vm = running_vm(json!({}));
        vm.recent_changes.push(ResourceChange {
            operation: "Microsoft.Compute/virtualMachines/write".into(),
            ..Default::default()
        });
        let findings = UnifiedFindings::merge(vec![cost(VM_ID, 120.0), resource(vm)], None);

        let diagnosis = fallback_diagnosis(&findings);
        assert_eq!(diagnosis.hypothesis.title, "Compute usage increase");
        assert_eq!(diagnosis.confidence, 40);
    }

    #[test]
    fn test_history_match() {
        let history = HistoryFindings {
            query: "q".into(),
            matches: vec![SimilarIncident {
                id: "inc-9".into(),
                title: "Storage spike".into(),
                summary: String::new(),
                resolution: None,
                score: Some(0.5),
            }],
            notes: None,
        };
        let findings = UnifiedFindings::merge(
            vec![
                cost("/subscriptions/s/storageAccounts/logs", 50.0),
                AgentResult::ok(AgentIdentity::History, Utc::now(), history.into()),
            ],
            None,
        );

        let diagnosis = fallback_diagnosis(&findings);
        assert_eq!(diagnosis.hypothesis.title, "Recurring cost anomaly similar to past incident");
        assert_eq!(diagnosis.confidence, 55);
        assert!(diagnosis.hypothesis.evidence.contains(
            &"- Similar incident match: Storage spike; prior resolution: no resolution captured".to_string()
        ));
    }

    #[test]
    fn test_unattributed_pads_evidence() {
        let findings = UnifiedFindings::merge(vec![], None);
        let diagnosis = fallback_diagnosis(&findings);

        assert_eq!(diagnosis.hypothesis.title, "Unattributed cost increase");
        assert_eq!(diagnosis.confidence, 40);
        assert_eq!(
            diagnosis.hypothesis.evidence,
            vec![
                "- Top cost driver was unavailable in UnifiedFindings cost section",
                "- Inferred resource power state: unknown",
                "- Alert id: unknown-alert",
            ]
        );
    }

    #[test]
    fn test_power_state_and_shutdown_helpers() {
        assert_eq!(infer_power_state(&json!({"status": "VM deallocated"})), PowerState::Stopped);
        assert_eq!(infer_power_state(&json!({"status": "Running"})), PowerState::Running);
        assert_eq!(infer_power_state(&json!({"status": "unknown"})), PowerState::Unknown);

        assert_eq!(
            missing_shutdown_indicator(&json!({"schedules": [{"state": "Disabled"}]})).as_deref(),
            Some("schedules[0].state=disabled")
        );
        assert_eq!(
            missing_shutdown_indicator(&json!({"notes": "Auto-shutdown schedule missing"})).as_deref(),
            Some("Auto-shutdown schedule missing")
        );
        assert_eq!(missing_shutdown_indicator(&json!({"autoShutdown": "enabled"})), None);
    }

    #[test]
    fn test_shutdown_indicator_follows_document_order() {
        let resource: Value = serde_json::from_str(
            r#"{"config": {"shutdownSchedule": "missing", "autoShutdownEnabled": false}}"#,
        )
        .unwrap();
        assert_eq!(
            missing_shutdown_indicator(&resource).as_deref(),
            Some("config.shutdownSchedule=missing")
        );
    }

    #[tokio::test]
    async fn test_agent_degrades_without_reasoning() {
        let agent = DiagnosisAgent::new(Arc::new(NoopReasoningClient));
        let findings = UnifiedFindings::merge(vec![cost(VM_ID, 10.0)], None);

        let result = agent.run(findings, AgentHints::default()).await.unwrap();
        assert_eq!(result.status, AgentStatus::Degraded);
        assert_eq!(result.errors, vec!["Reasoning service is not configured"]);
        assert!(result.data.is_some());
    }

    struct CannedReasoning(Value);

    #[async_trait]
    impl ReasoningClient for CannedReasoning {
        async fn complete_json(&self, _system: &str, user: &str) -> Result<Value> {
            assert!(user.starts_with("Investigation findings:"));
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_agent_uses_valid_reasoning_output() {
        let agent = DiagnosisAgent::new(Arc::new(CannedReasoning(json!({
            "hypothesis": {"title": "Batch job", "explanation": "Nightly batch", "evidence": ["a"]},
            "confidence": 70,
            "alternatives": ["x", "y"],
            "risks": ["z"]
        }))));
        let result = agent
            .run(UnifiedFindings::merge(vec![], None), AgentHints::default())
            .await
            .unwrap();
        assert_eq!(result.status, AgentStatus::Ok);
        assert_eq!(result.data.unwrap().hypothesis.title, "Batch job");
    }

    #[tokio::test]
    async fn test_agent_rejects_invalid_reasoning_output() {
        let agent = DiagnosisAgent::new(Arc::new(CannedReasoning(json!({"confidence": "high"}))));
        let result = agent
            .run(UnifiedFindings::merge(vec![], None), AgentHints::default())
            .await
            .unwrap();
        assert_eq!(result.status, AgentStatus::Degraded);
        assert!(result.errors[0].starts_with("invalid response: diagnosis schema mismatch"));
        assert_eq!(result.data.unwrap().hypothesis.title, "Unattributed cost increase");
    }
}
