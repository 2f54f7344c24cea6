//! Process-wide investigation state
//!
//! Everything the service remembers between requests lives here: the
//! idempotency cache, per-alert in-flight locks, the latest report per
//! investigation, approval records and execution outcomes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use spikehound_core::config::DEFAULT_IDEMPOTENCY_TTL_SECS;
use spikehound_core::{
    ApprovalRecord, ExecutionOutcome, IdempotencyCache, InvestigationReport, RemediationPlan,
};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
pub struct InvestigationState {
    cache: IdempotencyCache<InvestigationReport>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reports: RwLock<HashMap<String, InvestigationReport>>,
    approvals: RwLock<HashMap<String, ApprovalRecord>>,
    outcomes: RwLock<HashMap<String, Vec<ExecutionOutcome>>>,
    queued: Mutex<HashSet<String>>,
}

impl Default for InvestigationState {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS))
    }
}

impl InvestigationState {
    pub fn new(idempotency_ttl: Duration) -> Self {
        Self {
            cache: IdempotencyCache::new(idempotency_ttl),
            in_flight: Mutex::default(),
            reports: RwLock::default(),
            approvals: RwLock::default(),
            outcomes: RwLock::default(),
            queued: Mutex::default(),
        }
    }

    pub fn cache(&self) -> &IdempotencyCache<InvestigationReport> {
        &self.cache
    }

    /// Lock serializing deliveries of `alert_id`
    pub async fn alert_lock(&self, alert_id: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry(alert_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop locks nobody holds or waits on
    pub async fn prune_idle_locks(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        let before = in_flight.len();
        in_flight.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - in_flight.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn record_report(&self, report: &InvestigationReport) {
        self.reports
            .write()
            .await
            .insert(report.investigation_id().to_string(), report.clone());
    }

    pub async fn report(&self, investigation_id: &str) -> Option<InvestigationReport> {
        self.reports.read().await.get(investigation_id).cloned()
    }

    /// Remediation plan of the latest report, if it produced one
    pub async fn plan(&self, investigation_id: &str) -> Option<RemediationPlan> {
        self.reports
            .read()
            .await
            .get(investigation_id)
            .and_then(|report| report.remediation_result.data.clone())
    }

    pub async fn record_approval(&self, record: ApprovalRecord) {
        self.approvals
            .write()
            .await
            .insert(record.investigation_id.clone(), record);
    }

    pub async fn approval(&self, investigation_id: &str) -> Option<ApprovalRecord> {
        self.approvals.read().await.get(investigation_id).cloned()
    }

    pub async fn record_outcomes(&self, investigation_id: &str, outcomes: Vec<ExecutionOutcome>) {
        self.outcomes
            .write()
            .await
            .insert(investigation_id.to_string(), outcomes);
    }

    pub async fn outcomes(&self, investigation_id: &str) -> Option<Vec<ExecutionOutcome>> {
        self.outcomes.read().await.get(investigation_id).cloned()
    }

    /// Mark `investigation_id` as queued for execution; false if it already was
    pub async fn try_mark_queued(&self, investigation_id: &str) -> bool {
        self.queued.lock().await.insert(investigation_id.to_string())
    }

    /// Undo [`Self::try_mark_queued`] when the execution never started
    pub async fn release_queued(&self, investigation_id: &str) {
        self.queued.lock().await.remove(investigation_id);
    }

    /// Forget transient state; reports, approvals and outcomes are kept
    pub async fn clear_transient(&self) {
        self.cache.clear();
        self.in_flight.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_lock_is_shared_per_id() {
        let state = InvestigationState::default();
        let a = state.alert_lock("a").await;
        let again = state.alert_lock("a").await;
        let b = state.alert_lock("b").await;

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(state.in_flight_len().await, 2);

        drop(again);
        drop(b);
        assert_eq!(state.prune_idle_locks().await, 1);
        assert_eq!(state.in_flight_len().await, 1);
    }

    #[tokio::test]
    async fn test_queue_marker() {
        let state = InvestigationState::default();
        assert!(state.try_mark_queued("inv-1").await);
        assert!(!state.try_mark_queued("inv-1").await);
        assert!(state.try_mark_queued("inv-2").await);

        state.release_queued("inv-1").await;
        assert!(state.try_mark_queued("inv-1").await);
    }
}
