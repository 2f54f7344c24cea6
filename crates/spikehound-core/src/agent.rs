//! Agent protocol: identities, statuses and the generic per-stage result.
//!
//! Every stage of an investigation (the three investigators, diagnosis and
//! remediation) reports through an [`AgentResult`]. Failures are values, not
//! errors: a timed-out or crashed stage is an `AgentResult` with
//! [`AgentStatus::Error`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertSummary;
use crate::diagnosis::Diagnosis;

/// Stable identity of a pipeline stage, used as the merge key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentIdentity {
    Cost,
    Resource,
    History,
    Diagnosis,
    Remediation,
}

impl AgentIdentity {
    /// The three independent investigators, in launch order
    pub const INVESTIGATORS: [AgentIdentity; 3] = [Self::Cost, Self::Resource, Self::History];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cost => "cost",
            Self::Resource => "resource",
            Self::History => "history",
            Self::Diagnosis => "diagnosis",
            Self::Remediation => "remediation",
        }
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome class of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Completed with full data
    Ok,
    /// Completed with reduced confidence or partial data
    Degraded,
    /// Failed; data is absent or a degraded placeholder
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage, parameterized by its payload type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult<T> {
    pub agent: AgentIdentity,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl<T> AgentResult<T> {
    /// Build a result, clamping `finished_at` so it never precedes `started_at`
    pub fn new(
        agent: AgentIdentity,
        status: AgentStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        data: Option<T>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            agent,
            status,
            started_at,
            finished_at: finished_at.max(started_at),
            data,
            errors,
        }
    }

    /// Successful result finished now
    pub fn ok(agent: AgentIdentity, started_at: DateTime<Utc>, data: T) -> Self {
        Self::new(agent, AgentStatus::Ok, started_at, Utc::now(), Some(data), Vec::new())
    }

    /// Degraded result finished now
    pub fn degraded(
        agent: AgentIdentity,
        started_at: DateTime<Utc>,
        data: T,
        errors: Vec<String>,
    ) -> Self {
        Self::new(agent, AgentStatus::Degraded, started_at, Utc::now(), Some(data), errors)
    }

    /// Failed result without data
    pub fn error(
        agent: AgentIdentity,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            agent,
            AgentStatus::Error,
            started_at,
            finished_at,
            None,
            vec![message.into()],
        )
    }

    /// Pick OK or DEGRADED depending on whether any errors were collected
    pub fn from_errors(
        agent: AgentIdentity,
        started_at: DateTime<Utc>,
        data: T,
        errors: Vec<String>,
    ) -> Self {
        if errors.is_empty() {
            Self::ok(agent, started_at, data)
        } else {
            Self::degraded(agent, started_at, data, errors)
        }
    }

    /// Convert the payload, keeping every other field
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> AgentResult<U> {
        AgentResult {
            agent: self.agent,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            data: self.data.map(f),
            errors: self.errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AgentStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == AgentStatus::Error
    }
}

/// Side inputs handed to an agent next to its main payload.
///
/// Agents that have no use for hints ignore them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHints {
    /// Normalized alert, given to the history investigator to enrich its query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_summary: Option<AlertSummary>,
    /// Diagnosis data, given to the remediation stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

impl AgentHints {
    pub fn with_alert_summary(mut self, summary: AlertSummary) -> Self {
        self.alert_summary = Some(summary);
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: Option<Diagnosis>) -> Self {
        self.diagnosis = diagnosis;
        self
    }
}
