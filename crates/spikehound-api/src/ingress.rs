//! Alert ingress
//!
//! Normalizes the payload, deduplicates deliveries per alert id and retries
//! the whole pipeline once more when a run fails for a transient reason.
//! Deliveries of the same alert are serialized: a duplicate that arrives
//! while the first run is in flight waits for it, then gets the cached report.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use spikehound_agents::Coordinator;
use spikehound_core::alert::UNKNOWN_ALERT;
use spikehound_core::config::{PipelineConfig, DEFAULT_EVICTION_INTERVAL_SECS, DEFAULT_MAX_AGENT_RETRIES};
use spikehound_core::{AgentIdentity, AgentResult, AlertSummary, InvestigationReport, UnifiedFindings};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::state::InvestigationState;

/// Error fragments that mark a failure as worth retrying
pub const TRANSIENT_MARKERS: [&str; 7] = [
    "timeout",
    "timed out",
    "network",
    "connection",
    "temporarily unavailable",
    "temporary failure",
    "reset by peer",
];

/// Time source for cache bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// True when an ERROR-status stage failed with a transient-looking message
pub fn is_transient_failure(report: &InvestigationReport) -> bool {
    report.error_messages().iter().any(|message| {
        let lower = message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
    })
}

/// Everything one delivery needs; cloned into the task that runs it
#[derive(Clone)]
struct AlertPipeline {
    coordinator: Arc<Coordinator>,
    state: Arc<InvestigationState>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl AlertPipeline {
    async fn handle(self, payload: Arc<Value>, summary: AlertSummary) -> InvestigationReport {
        let alert_id = summary.alert_id.clone();

        // Without an id there is nothing to deduplicate on
        if alert_id == UNKNOWN_ALERT {
            warn!("Alert has no id, skipping idempotency");
            let report = self.run_with_retry(payload, summary).await;
            self.state.record_report(&report).await;
            self.coordinator.publish(&report).await;
            return report;
        }

        let report = {
            let lock = self.state.alert_lock(&alert_id).await;
            let _guard = lock.lock().await;

            if let Some(cached) = self.state.cache().get(&alert_id, self.clock.now()) {
                info!(alert_id = %alert_id, "Duplicate alert, returning cached report");
                return cached;
            }

            let report = self.run_with_retry(payload, summary).await;
            self.state.cache().insert(alert_id.clone(), report.clone(), self.clock.now());
            self.state.record_report(&report).await;
            report
        };

        // Duplicates only wait for the cache entry, not for the sinks
        self.coordinator.publish(&report).await;
        report
    }

    async fn run_with_retry(&self, payload: Arc<Value>, summary: AlertSummary) -> InvestigationReport {
        let mut attempt = 0;
        loop {
            let report = self.coordinator.run(payload.clone(), summary.clone()).await;
            if attempt >= self.max_retries || !is_transient_failure(&report) {
                return report;
            }
            attempt += 1;
            warn!(
                alert_id = %summary.alert_id,
                attempt,
                errors = ?report.error_messages(),
                "Transient pipeline failure, retrying"
            );
        }
    }
}

/// Report returned when the pipeline task itself died
fn aborted_report(summary: AlertSummary, message: String) -> InvestigationReport {
    let now = Utc::now();
    InvestigationReport {
        unified_findings: UnifiedFindings::merge(Vec::new(), Some(summary)),
        diagnosis_result: AgentResult::error(AgentIdentity::Diagnosis, now, now, message.clone()),
        remediation_result: AgentResult::error(AgentIdentity::Remediation, now, now, message),
    }
}

pub struct IngressService {
    pipeline: AlertPipeline,
    eviction_interval: Duration,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IngressService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressService")
            .field("coordinator", &self.pipeline.coordinator)
            .field("max_retries", &self.pipeline.max_retries)
            .field("eviction_interval", &self.eviction_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl IngressService {
    pub fn new(coordinator: Arc<Coordinator>, state: Arc<InvestigationState>) -> Self {
        Self {
            pipeline: AlertPipeline {
                coordinator,
                state,
                clock: Arc::new(SystemClock),
                max_retries: DEFAULT_MAX_AGENT_RETRIES,
            },
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    pub fn with_pipeline_config(mut self, config: &PipelineConfig) -> Self {
        self.pipeline.max_retries = config.max_agent_retries;
        self.eviction_interval = Duration::from_secs(config.eviction_interval_secs);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pipeline.clock = clock;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.pipeline.max_retries = max_retries;
        self
    }

    pub fn state(&self) -> &Arc<InvestigationState> {
        &self.pipeline.state
    }

    /// Investigate `payload`, or return the cached report of an earlier delivery.
    ///
    /// The run happens on its own task: dropping this future (a client
    /// disconnect or an HTTP timeout) does not stop the report from being
    /// cached, recorded and published.
    #[instrument(skip_all)]
    pub async fn handle_alert(&self, payload: Value) -> InvestigationReport {
        let summary = AlertSummary::from_payload(&payload, self.pipeline.clock.now());
        let task = tokio::spawn(
            self.pipeline
                .clone()
                .handle(Arc::new(payload), summary.clone())
                .in_current_span(),
        );

        match task.await {
            Ok(report) => report,
            Err(err) => {
                error!(alert_id = %summary.alert_id, error = %err, "Investigation task failed");
                aborted_report(summary, format!("investigation task failed: {err}"))
            }
        }
    }

    /// Start the eviction sweep; calling it again is a no-op
    pub fn start(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let state = self.pipeline.state.clone();
        let clock = self.pipeline.clock.clone();
        let period = self.eviction_interval.max(Duration::from_secs(1));
        info!(interval_secs = period.as_secs(), "Starting idempotency eviction sweep");

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = state.cache().prune(clock.now());
                let idle_locks = state.prune_idle_locks().await;
                debug!(evicted, idle_locks, "Eviction sweep");
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the sweep and drop cached and in-flight state
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.pipeline.state.clear_transient().await;
        info!("Ingress stopped");
    }
}
