//! End-to-end pipeline tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use spikehound_agents::agents::{ActivityLogRow, CostRow, HistoryBackendFactory};
use spikehound_agents::prelude::*;
use spikehound_agents::PipelineStage;
use spikehound_core::config::HistoryBackendConfig;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, AgentStatus, AlertSummary, Config, Error,
    InvestigationFindings, InvestigationReport, RemediationActionType, Result, UnifiedFindings,
};
use spikehound_storage::prelude::*;

const VM_ID: &str =
    "/subscriptions/s/resourceGroups/rg-ml/providers/Microsoft.Compute/virtualMachines/vm-gpu";

struct GpuCosts;

#[async_trait]
impl CostQueryClient for GpuCosts {
    async fn query_costs(&self, _lookback_days: u32) -> Result<Vec<CostRow>> {
        Ok(vec![
            CostRow {
                resource_id: Some("/subscriptions/s/resourceGroups/rg-ml/providers/Microsoft.Storage/storageAccounts/logs".into()),
                total_cost: 12.5,
                currency: Some("USD".into()),
            },
            CostRow {
                resource_id: Some(VM_ID.into()),
                total_cost: 500.0,
                currency: Some("USD".into()),
            },
        ])
    }
}

struct GpuInventory;

#[async_trait]
impl ResourceQueryClient for GpuInventory {
    async fn resource_config(&self, resource_id: &str) -> Result<Option<Map<String, Value>>> {
        let row = json!({
            "id": resource_id,
            "name": "vm-gpu",
            "type": "microsoft.compute/virtualmachines",
            "location": "eastus",
            "properties": {
                "autoShutdown": {"enabled": false},
                "extended": {"instanceView": {"powerState": {"code": "PowerState/running"}}}
            }
        });
        Ok(row.as_object().cloned())
    }

    async fn recent_changes(&self, _resource_id: &str, _lookback_days: u32) -> Result<Vec<ActivityLogRow>> {
        Ok(Vec::new())
    }
}

/// Never answers
struct HangingCost;

#[async_trait]
impl AgentRunner<AlertPayload> for HangingCost {
    type Output = InvestigationFindings;

    async fn run(&self, _payload: AlertPayload, _hints: AgentHints) -> Result<AgentResult<InvestigationFindings>> {
        std::future::pending().await
    }
}

/// Finishes well after any sane timeout, then flags that it did
struct SlowCost {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl AgentRunner<AlertPayload> for SlowCost {
    type Output = InvestigationFindings;

    async fn run(&self, payload: AlertPayload, _hints: AgentHints) -> Result<AgentResult<InvestigationFindings>> {
        let started = Utc::now();
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(AgentResult::ok(
            AgentIdentity::Cost,
            started,
            InvestigationFindings {
                alert_id: payload["alert_id"].as_str().unwrap_or_default().to_string(),
                received_at: started,
                cost_findings: Vec::new(),
                notes: Some("late".into()),
            },
        ))
    }
}

/// Hands out a pre-seeded store as the remote backend
struct SeededBackend {
    store: Arc<MemoryIncidentStore>,
}

impl HistoryBackendFactory for SeededBackend {
    fn build(
        &self,
        config: &HistoryBackendConfig,
    ) -> Result<(Arc<dyn IncidentStore>, Arc<dyn IncidentSearch>)> {
        let store: Arc<dyn IncidentStore> = self.store.clone();
        let search = Arc::new(LocalIncidentSearch::new(store.clone(), config.candidate_limit));
        Ok((store, search))
    }
}

/// Records the hints it was given, then defers to an inner agent
struct HintRecorder<A> {
    inner: A,
    seen: Mutex<Vec<AgentHints>>,
}

#[async_trait]
impl<A> AgentRunner<UnifiedFindings> for HintRecorder<A>
where
    A: AgentRunner<UnifiedFindings> + 'static,
{
    type Output = A::Output;

    async fn run(&self, payload: UnifiedFindings, hints: AgentHints) -> Result<AgentResult<A::Output>> {
        self.seen.lock().unwrap().push(hints.clone());
        self.inner.run(payload, hints).await
    }
}

#[derive(Default)]
struct CountingSink {
    reports: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn notify_report(&self, _report: &InvestigationReport) -> Result<()> {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_followup(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify_report(&self, _report: &InvestigationReport) -> Result<()> {
        Err(Error::unavailable("webhook returned 503"))
    }

    async fn notify_followup(&self, _text: &str) -> Result<()> {
        Err(Error::unavailable("webhook returned 503"))
    }
}

fn gpu_agents() -> PipelineAgents {
    let backends = PipelineBackends {
        cost: Some(Arc::new(GpuCosts)),
        resource: Some(Arc::new(GpuInventory)),
        ..Default::default()
    };
    PipelineAgents::from_config(&Config::default(), backends).unwrap()
}

fn gpu_alert() -> (AlertPayload, AlertSummary) {
    let payload = json!({
        "alert_id": "alert-gpu",
        "summary": "GPU spend spike",
        "resource_id": VM_ID,
    });
    let summary = AlertSummary::from_payload(&payload, Utc::now());
    (Arc::new(payload), summary)
}

#[tokio::test]
async fn test_gpu_vm_scenario_end_to_end() {
    let coordinator = Coordinator::new(gpu_agents(), TaskRunner::default());
    let (payload, summary) = gpu_alert();

    let report = coordinator.investigate(payload, summary).await;

    let unified = &report.unified_findings;
    assert_eq!(unified.alert_id, "alert-gpu");
    assert_eq!(unified.cost_findings[0].resource_id, VM_ID);
    assert_eq!(unified.results.len(), 3);
    assert_eq!(unified.result(AgentIdentity::Cost).unwrap().status, AgentStatus::Ok);
    assert_eq!(unified.result(AgentIdentity::Resource).unwrap().status, AgentStatus::Ok);
    // in-memory history fallback
    assert_eq!(unified.result(AgentIdentity::History).unwrap().status, AgentStatus::Degraded);

    assert_eq!(report.diagnosis_result.status, AgentStatus::Degraded);
    let diagnosis = report.diagnosis_result.data.as_ref().unwrap();
    assert_eq!(diagnosis.hypothesis.title, "GPU VM left running without auto-shutdown");
    assert_eq!(diagnosis.confidence, 80);

    assert_eq!(report.remediation_result.status, AgentStatus::Ok);
    let plan = report.remediation_result.data.as_ref().unwrap();
    assert_eq!(plan.actions[0].action_type, RemediationActionType::AddAutoShutdown);
    assert_eq!(plan.actions[0].target_resource_id, VM_ID);

    let body = serde_json::to_value(&report).unwrap();
    assert_eq!(body["remediation_result"]["data"]["actions"][0]["human_approval_required"], json!(true));
}

#[tokio::test]
async fn test_remediation_receives_diagnosis_hints() {
    let base = gpu_agents();
    let recorder = Arc::new(HintRecorder {
        inner: spikehound_agents::RemediationAgent::new(Arc::new(spikehound_agents::NoopReasoningClient)),
        seen: Mutex::new(Vec::new()),
    });
    let agents = PipelineAgents {
        remediation: recorder.clone(),
        ..base
    };
    let coordinator = Coordinator::new(agents, TaskRunner::default());
    let (payload, summary) = gpu_alert();

    let report = coordinator.investigate(payload, summary).await;

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].diagnosis.as_ref(), report.diagnosis_result.data.as_ref());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_investigator_times_out_without_blocking_pipeline() {
    let base = gpu_agents();
    let agents = PipelineAgents {
        cost: Arc::new(HangingCost),
        ..base
    };
    let coordinator = Coordinator::new(agents, TaskRunner::new(Duration::from_secs(20)));
    let (payload, summary) = gpu_alert();

    let started = tokio::time::Instant::now();
    let report = coordinator.investigate(payload, summary).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(20));
    assert!(elapsed < Duration::from_secs(21));

    let cost = report.unified_findings.result(AgentIdentity::Cost).unwrap();
    assert_eq!(cost.status, AgentStatus::Error);
    assert_eq!(cost.errors, vec!["cost agent timed out after 20s"]);
    assert!(report.unified_findings.cost_findings.is_empty());
    assert_eq!(report.unified_findings.alert_id, "alert-gpu");

    let diagnosis = report.diagnosis_result.data.as_ref().unwrap();
    assert_eq!(diagnosis.hypothesis.title, "Unattributed cost increase");
    assert!(report.remediation_result.data.is_some());
    assert!(report.error_messages().contains(&"cost agent timed out after 20s"));
}

#[tokio::test(start_paused = true)]
async fn test_late_investigator_result_is_discarded() {
    let finished = Arc::new(AtomicBool::new(false));
    let agents = PipelineAgents {
        cost: Arc::new(SlowCost {
            finished: finished.clone(),
        }),
        ..gpu_agents()
    };
    let coordinator = Coordinator::new(agents, TaskRunner::new(Duration::from_secs(20)));
    let (payload, summary) = gpu_alert();

    let report = coordinator.investigate(payload, summary).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(!finished.load(Ordering::SeqCst));
    let cost = report.unified_findings.result(AgentIdentity::Cost).unwrap();
    assert_eq!(cost.status, AgentStatus::Error);
    assert_eq!(cost.errors, vec!["cost agent timed out after 20s"]);
    assert!(cost.data.is_none());
    assert!(report.unified_findings.notes.is_none());
}

#[tokio::test]
async fn test_remote_history_backend_supplies_matches() {
    let store = Arc::new(MemoryIncidentStore::new());
    let mut past = IncidentRecord::new("inc-42", Utc::now(), "GPU spend spike on vm-gpu");
    past.root_cause = "Auto-shutdown schedule was disabled".into();
    store.put(past).await.unwrap();

    let mut config = Config::default();
    for slot in [
        &mut config.history.cosmos_endpoint,
        &mut config.history.cosmos_key,
        &mut config.history.cosmos_database,
        &mut config.history.cosmos_container,
        &mut config.history.search_endpoint,
        &mut config.history.search_api_key,
        &mut config.history.search_index,
    ] {
        *slot = Some("configured".into());
    }
    let backends = PipelineBackends {
        history_factory: Some(Arc::new(SeededBackend { store: store.clone() })),
        ..Default::default()
    };
    let coordinator = Coordinator::new(
        PipelineAgents::from_config(&config, backends).unwrap(),
        TaskRunner::default(),
    );

    let payload = json!({"alert_id": "a-7", "summary": "GPU spend spike on vm-gpu"});
    let summary = AlertSummary::from_payload(&payload, Utc::now());
    let report = coordinator.investigate(Arc::new(payload), summary).await;

    let history = report.unified_findings.result(AgentIdentity::History).unwrap();
    assert_eq!(history.status, AgentStatus::Ok);
    let matches = &report.unified_findings.history_findings.as_ref().unwrap().matches;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "inc-42");
    assert!(store.get("a-7").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sink_failures_are_tolerated() {
    let counting = Arc::new(CountingSink::default());
    let coordinator = Coordinator::new(gpu_agents(), TaskRunner::default())
        .with_sink(Arc::new(FailingSink))
        .with_sink(counting.clone());
    let (payload, summary) = gpu_alert();

    let report = coordinator.investigate(payload, summary).await;

    assert_eq!(report.investigation_id(), "alert-gpu");
    assert_eq!(counting.reports.load(Ordering::SeqCst), 1);
    coordinator.notify_followup("follow-up").await;
}

#[tokio::test]
async fn test_repeated_alerts_find_past_incident() {
    let coordinator = Coordinator::new(
        PipelineAgents::from_config(
            &Config::default(),
            PipelineBackends {
                history: spikehound_agents::agents::HistoryOverrides {
                    store: Some(Arc::new(spikehound_storage::MemoryIncidentStore::new())),
                    search: None,
                },
                ..Default::default()
            },
        )
        .unwrap(),
        TaskRunner::default(),
    );

    let first = json!({"alert_id": "a-1", "summary": "GPU spend spike on vm-gpu"});
    let second = json!({"alert_id": "a-2", "summary": "GPU spend spike on vm-gpu"});
    for payload in [first, second] {
        let summary = AlertSummary::from_payload(&payload, Utc::now());
        let report = coordinator.investigate(Arc::new(payload), summary).await;
        let history = report.unified_findings.history_findings.unwrap();
        if report.unified_findings.alert_id == "a-2" {
            assert_eq!(history.matches.len(), 1);
            assert_eq!(history.matches[0].id, "a-1");
        } else {
            assert!(history.matches.is_empty());
        }
    }
}

#[test]
fn test_stage_order() {
    let stages = [
        PipelineStage::Started,
        PipelineStage::Investigating,
        PipelineStage::Merged,
        PipelineStage::Diagnosing,
        PipelineStage::Remediating,
        PipelineStage::Complete,
    ];
    let names: Vec<_> = stages.iter().map(|s| s.as_str()).collect();
    assert_eq!(names, ["started", "investigating", "merged", "diagnosing", "remediating", "complete"]);
}
