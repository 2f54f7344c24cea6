//! Investigator payloads and the merged view the later stages consume.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::{AgentIdentity, AgentResult, AgentStatus};
use crate::alert::{AlertSummary, UNKNOWN_ALERT};
use crate::diagnosis::Diagnosis;
use crate::remediation::RemediationPlan;

// =============================================================================
// Investigator payloads
// =============================================================================

/// One resource contributing to the anomalous spend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostFinding {
    pub resource_id: String,
    /// Never negative
    pub cost: f64,
    pub currency: String,
}

impl CostFinding {
    pub fn new(resource_id: impl Into<String>, cost: f64, currency: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            cost: if cost.is_finite() { cost.max(0.0) } else { 0.0 },
            currency: currency.into(),
        }
    }
}

/// Cost investigator payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationFindings {
    pub alert_id: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub cost_findings: Vec<CostFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Current configuration of the alerted resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Activity-log entry for the alerted resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(default)]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Resource investigator payload.
///
/// Fields the investigator does not model are kept in `extra` so the
/// diagnosis heuristics can still scan them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceFindings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ResourceConfig>,
    #[serde(default)]
    pub recent_changes: Vec<ResourceChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Past incident returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIncident {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// History investigator payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFindings {
    pub query: String,
    #[serde(default)]
    pub matches: Vec<SimilarIncident>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payload of any stage, as stored in [`UnifiedFindings::results`].
///
/// Serialized without a tag so each result's `data` has the shape of the
/// stage's own payload. `Resource` is last on decode since it accepts any
/// object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentData {
    Cost(InvestigationFindings),
    History(HistoryFindings),
    Diagnosis(Diagnosis),
    Remediation(RemediationPlan),
    Resource(ResourceFindings),
}

impl From<InvestigationFindings> for AgentData {
    fn from(value: InvestigationFindings) -> Self {
        Self::Cost(value)
    }
}

impl From<ResourceFindings> for AgentData {
    fn from(value: ResourceFindings) -> Self {
        Self::Resource(value)
    }
}

impl From<HistoryFindings> for AgentData {
    fn from(value: HistoryFindings) -> Self {
        Self::History(value)
    }
}

impl From<Diagnosis> for AgentData {
    fn from(value: Diagnosis) -> Self {
        Self::Diagnosis(value)
    }
}

impl From<RemediationPlan> for AgentData {
    fn from(value: RemediationPlan) -> Self {
        Self::Remediation(value)
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Investigator results folded into one order-independent view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedFindings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_summary: Option<AlertSummary>,
    pub results: BTreeMap<AgentIdentity, AgentResult<AgentData>>,
    pub alert_id: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub cost_findings: Vec<CostFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_findings: Option<ResourceFindings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_findings: Option<HistoryFindings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl UnifiedFindings {
    /// Merge per-stage results.
    ///
    /// Results are ordered by a total key before folding, so any permutation
    /// of the same input produces the same value. When two results share an
    /// identity the one sorting last wins.
    pub fn merge(
        results: impl IntoIterator<Item = AgentResult<AgentData>>,
        alert_summary: Option<AlertSummary>,
    ) -> Self {
        let mut keyed: Vec<(MergeKey, AgentResult<AgentData>)> = results
            .into_iter()
            .map(|result| (MergeKey::of(&result), result))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut by_identity = BTreeMap::new();
        for (_, result) in keyed {
            by_identity.insert(result.agent, result);
        }

        let (alert_id, received_at) = match &alert_summary {
            Some(summary) => (summary.alert_id.clone(), summary.received_at),
            None => (UNKNOWN_ALERT.to_string(), DateTime::<Utc>::UNIX_EPOCH),
        };

        let mut unified = Self {
            alert_summary,
            results: BTreeMap::new(),
            alert_id,
            received_at,
            cost_findings: Vec::new(),
            resource_findings: None,
            history_findings: None,
            notes: None,
        };

        for result in by_identity.values() {
            match &result.data {
                Some(AgentData::Cost(cost)) => {
                    if !cost.alert_id.trim().is_empty() && cost.alert_id != UNKNOWN_ALERT {
                        unified.alert_id = cost.alert_id.clone();
                    }
                    unified.received_at = cost.received_at;
                    unified.cost_findings = cost.cost_findings.clone();
                    unified.notes = cost.notes.clone();
                }
                Some(AgentData::Resource(resource)) => {
                    unified.resource_findings = Some(resource.clone());
                }
                Some(AgentData::History(history)) => {
                    unified.history_findings = Some(history.clone());
                }
                _ => {}
            }
        }

        unified.results = by_identity;
        unified
    }

    /// Result recorded for `agent`, if any
    pub fn result(&self, agent: AgentIdentity) -> Option<&AgentResult<AgentData>> {
        self.results.get(&agent)
    }

    /// Resource id of the first cost finding that has one
    pub fn first_cost_resource_id(&self) -> Option<&str> {
        self.cost_findings
            .iter()
            .map(|f| f.resource_id.trim())
            .find(|id| !id.is_empty())
    }
}

/// Total order over results: identity, finish, start, status, data, errors
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MergeKey {
    agent: AgentIdentity,
    finished_at: String,
    started_at: String,
    status: &'static str,
    data: String,
    errors: String,
}

impl MergeKey {
    fn of(result: &AgentResult<AgentData>) -> Self {
        Self {
            agent: result.agent,
            finished_at: result.finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            started_at: result.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            status: result.status.as_str(),
            data: serde_json::to_string(&result.data).unwrap_or_default(),
            errors: serde_json::to_string(&result.errors).unwrap_or_default(),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Complete output of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub unified_findings: UnifiedFindings,
    pub diagnosis_result: AgentResult<Diagnosis>,
    pub remediation_result: AgentResult<RemediationPlan>,
}

impl InvestigationReport {
    /// Investigation id, which is the alert id
    pub fn investigation_id(&self) -> &str {
        &self.unified_findings.alert_id
    }

    /// Error strings of every stage that ended with [`AgentStatus::Error`]
    pub fn error_messages(&self) -> Vec<&str> {
        let investigators = self
            .unified_findings
            .results
            .values()
            .filter(|r| r.status == AgentStatus::Error)
            .flat_map(|r| r.errors.iter());
        let diagnosis = (self.diagnosis_result.status == AgentStatus::Error)
            .then_some(&self.diagnosis_result.errors)
            .into_iter()
            .flatten();
        let remediation = (self.remediation_result.status == AgentStatus::Error)
            .then_some(&self.remediation_result.errors)
            .into_iter()
            .flatten();

        investigators
            .chain(diagnosis)
            .chain(remediation)
            .map(String::as_str)
            .collect()
    }
}
