//! Coordinator
//!
//! Drives one investigation through its fixed stages:
//!
//! ```text
//! Started -> Investigating -> Merged -> Diagnosing -> Remediating -> Complete
//! ```
//!
//! No stage is skipped and a failing stage never aborts the run; failures
//! travel inside the stage's [`AgentResult`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spikehound_core::{
    AgentData, AgentHints, AgentIdentity, AlertSummary, Config, Diagnosis, HistoryFindings,
    InvestigationFindings, InvestigationReport, RemediationPlan, ResourceFindings, Result,
    UnifiedFindings,
};
use tracing::{debug, info, instrument, warn};

use crate::agents::{
    AlertPayload, CostInvestigator, CostQueryClient, HistoryBackendFactory, HistoryInvestigator,
    HistoryOverrides, ResourceInvestigator, ResourceQueryClient,
};
use crate::diagnosis::DiagnosisAgent;
use crate::reasoning;
use crate::remediation::RemediationAgent;
use crate::runner::{AgentRunner, TaskRunner};

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Started,
    Investigating,
    Merged,
    Diagnosing,
    Remediating,
    Complete,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Investigating => "investigating",
            Self::Merged => "merged",
            Self::Diagnosing => "diagnosing",
            Self::Remediating => "remediating",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Notification sinks
// =============================================================================

/// Receives finished reports and execution follow-ups
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_report(&self, report: &InvestigationReport) -> Result<()>;

    async fn notify_followup(&self, text: &str) -> Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify_report(&self, _report: &InvestigationReport) -> Result<()> {
        Ok(())
    }

    async fn notify_followup(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Agents
// =============================================================================

/// The five stage agents
#[derive(Clone)]
pub struct PipelineAgents {
    pub cost: Arc<dyn AgentRunner<AlertPayload, Output = InvestigationFindings>>,
    pub resource: Arc<dyn AgentRunner<AlertPayload, Output = ResourceFindings>>,
    pub history: Arc<dyn AgentRunner<AlertPayload, Output = HistoryFindings>>,
    pub diagnosis: Arc<dyn AgentRunner<UnifiedFindings, Output = Diagnosis>>,
    pub remediation: Arc<dyn AgentRunner<UnifiedFindings, Output = RemediationPlan>>,
}

impl std::fmt::Debug for PipelineAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineAgents").finish_non_exhaustive()
    }
}

/// Data-source backends for the default agents; anything left out degrades
#[derive(Default)]
pub struct PipelineBackends {
    pub cost: Option<Arc<dyn CostQueryClient>>,
    pub resource: Option<Arc<dyn ResourceQueryClient>>,
    pub history: HistoryOverrides,
    pub history_factory: Option<Arc<dyn HistoryBackendFactory>>,
}

impl std::fmt::Debug for PipelineBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBackends")
            .field("cost", &self.cost.is_some())
            .field("resource", &self.resource.is_some())
            .field("history", &self.history)
            .field("history_factory", &self.history_factory.is_some())
            .finish()
    }
}

impl PipelineAgents {
    /// Default agents over the given backends
    pub fn from_config(config: &Config, backends: PipelineBackends) -> Result<Self> {
        let reasoning = reasoning::from_config(&config.reasoning)?;
        let history = HistoryInvestigator::new(
            &config.history,
            backends.history,
            backends.history_factory.as_deref(),
        );

        Ok(Self {
            cost: Arc::new(CostInvestigator::new(backends.cost)),
            resource: Arc::new(ResourceInvestigator::new(backends.resource)),
            history: Arc::new(history),
            diagnosis: Arc::new(DiagnosisAgent::new(reasoning.clone())),
            remediation: Arc::new(RemediationAgent::new(reasoning)),
        })
    }

    /// Default agents with no data-source backends
    pub fn offline(config: &Config) -> Result<Self> {
        Self::from_config(config, PipelineBackends::default())
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs the investigation pipeline
pub struct Coordinator {
    agents: PipelineAgents,
    runner: TaskRunner,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("runner", &self.runner)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Coordinator {
    pub fn new(agents: PipelineAgents, runner: TaskRunner) -> Self {
        Self {
            agents,
            runner,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(&self) -> &[Arc<dyn NotificationSink>] {
        &self.sinks
    }

    /// Investigate one alert and publish the report. Never fails.
    pub async fn investigate(&self, payload: AlertPayload, summary: AlertSummary) -> InvestigationReport {
        let report = self.run(payload, summary).await;
        self.publish(&report).await;
        report
    }

    /// Run the pipeline once without notifying sinks
    #[instrument(skip_all, fields(alert_id = %summary.alert_id))]
    pub async fn run(&self, payload: AlertPayload, summary: AlertSummary) -> InvestigationReport {
        let mut stage = PipelineStage::Started;
        debug!(%stage, "Investigation started");

        stage = PipelineStage::Investigating;
        debug!(%stage, "Running investigators");
        let summary_hints = AgentHints::default().with_alert_summary(summary.clone());
        let (cost, resource, history) = tokio::join!(
            self.runner.run(
                AgentIdentity::Cost,
                self.agents.cost.clone(),
                payload.clone(),
                AgentHints::default(),
            ),
            self.runner.run(
                AgentIdentity::Resource,
                self.agents.resource.clone(),
                payload.clone(),
                summary_hints.clone(),
            ),
            self.runner.run(
                AgentIdentity::History,
                self.agents.history.clone(),
                payload,
                summary_hints,
            ),
        );

        stage = PipelineStage::Merged;
        let unified = UnifiedFindings::merge(
            [
                cost.map_data(AgentData::from),
                resource.map_data(AgentData::from),
                history.map_data(AgentData::from),
            ],
            Some(summary),
        );
        debug!(%stage, cost_findings = unified.cost_findings.len(), "Findings merged");

        stage = PipelineStage::Diagnosing;
        debug!(%stage, "Running diagnosis");
        let diagnosis_result = self
            .runner
            .run(
                AgentIdentity::Diagnosis,
                self.agents.diagnosis.clone(),
                unified.clone(),
                AgentHints::default(),
            )
            .await;

        stage = PipelineStage::Remediating;
        debug!(%stage, "Running remediation");
        let remediation_hints = AgentHints::default().with_diagnosis(diagnosis_result.data.clone());
        let remediation_result = self
            .runner
            .run(
                AgentIdentity::Remediation,
                self.agents.remediation.clone(),
                unified.clone(),
                remediation_hints,
            )
            .await;

        let report = InvestigationReport {
            unified_findings: unified,
            diagnosis_result,
            remediation_result,
        };

        stage = PipelineStage::Complete;
        info!(
            %stage,
            diagnosis = %report.diagnosis_result.status,
            remediation = %report.remediation_result.status,
            "Investigation complete"
        );
        report
    }

    /// Hand the report to every sink; failures are logged only
    pub async fn publish(&self, report: &InvestigationReport) {
        let timeout = self.runner.timeout();
        for sink in &self.sinks {
            match tokio::time::timeout(timeout, sink.notify_report(report)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Notification sink failed"),
                Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "Notification sink timed out"),
            }
        }
    }

    /// Send a follow-up message to every sink; failures are logged only
    pub async fn notify_followup(&self, text: &str) {
        let timeout = self.runner.timeout().max(Duration::from_secs(1));
        for sink in &self.sinks {
            match tokio::time::timeout(timeout, sink.notify_followup(text)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Follow-up notification failed"),
                Err(_) => warn!("Follow-up notification timed out"),
            }
        }
    }
}
