//! Cost investigator

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spikehound_core::alert::UNKNOWN_ALERT;
use spikehound_core::remediation::UNKNOWN_RESOURCE;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, AgentStatus, CostFinding, InvestigationFindings, Result,
};
use tracing::{info, instrument, warn};

use super::{payload_text, AlertPayload};
use crate::runner::AgentRunner;

/// Default number of top spenders reported
pub const DEFAULT_TOP_N: usize = 5;
/// Default cost lookback window in days
pub const DEFAULT_COST_LOOKBACK_DAYS: u32 = 7;

/// One aggregated cost row, as returned by the cost query backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRow {
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Cost backend seam
#[async_trait]
pub trait CostQueryClient: Send + Sync {
    /// Spend per resource over the last `lookback_days`
    async fn query_costs(&self, lookback_days: u32) -> Result<Vec<CostRow>>;
}

/// Reports the top spenders
pub struct CostInvestigator {
    client: Option<Arc<dyn CostQueryClient>>,
    top_n: usize,
    lookback_days: u32,
}

impl std::fmt::Debug for CostInvestigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostInvestigator")
            .field("configured", &self.client.is_some())
            .field("top_n", &self.top_n)
            .field("lookback_days", &self.lookback_days)
            .finish()
    }
}

impl CostInvestigator {
    pub fn new(client: Option<Arc<dyn CostQueryClient>>) -> Self {
        Self {
            client,
            top_n: DEFAULT_TOP_N,
            lookback_days: DEFAULT_COST_LOOKBACK_DAYS,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    fn to_findings(&self, mut rows: Vec<CostRow>) -> Vec<CostFinding> {
        rows.sort_by(|a, b| sanitize(b.total_cost).total_cmp(&sanitize(a.total_cost)));
        rows.into_iter()
            .take(self.top_n)
            .map(|row| {
                CostFinding::new(
                    row.resource_id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_RESOURCE.to_string()),
                    row.total_cost,
                    row.currency
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            })
            .collect()
    }
}

fn sanitize(cost: f64) -> f64 {
    if cost.is_finite() {
        cost.max(0.0)
    } else {
        0.0
    }
}

#[async_trait]
impl AgentRunner<AlertPayload> for CostInvestigator {
    type Output = InvestigationFindings;

    #[instrument(skip_all, fields(agent = "cost"))]
    async fn run(&self, payload: AlertPayload, _hints: AgentHints) -> Result<AgentResult<InvestigationFindings>> {
        let started_at = Utc::now();
        let alert_id = payload_text(&payload, "alert_id")
            .or_else(|| payload_text(&payload, "id"))
            .unwrap_or_else(|| UNKNOWN_ALERT.to_string());

        let findings = |cost_findings: Vec<CostFinding>, notes: Option<String>| InvestigationFindings {
            alert_id: alert_id.clone(),
            received_at: started_at,
            cost_findings,
            notes,
        };

        let Some(client) = &self.client else {
            let note = "Cost query client is not configured".to_string();
            return Ok(AgentResult::degraded(
                AgentIdentity::Cost,
                started_at,
                findings(Vec::new(), Some(note.clone())),
                vec![note],
            ));
        };

        match client.query_costs(self.lookback_days).await {
            Ok(rows) => {
                let cost_findings = self.to_findings(rows);
                info!(findings = cost_findings.len(), "Cost query complete");
                Ok(AgentResult::ok(AgentIdentity::Cost, started_at, findings(cost_findings, None)))
            }
            Err(err) => {
                let note = format!("Unable to query Azure Cost Management: {err}");
                warn!(error = %err, "Cost query failed");
                Ok(AgentResult::new(
                    AgentIdentity::Cost,
                    AgentStatus::Error,
                    started_at,
                    Utc::now(),
                    Some(findings(Vec::new(), Some(note.clone()))),
                    vec![note],
                ))
            }
        }
    }
}
