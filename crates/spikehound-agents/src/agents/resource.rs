//! Resource investigator

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spikehound_core::alert::scan_resource_id;
use spikehound_core::remediation::UNKNOWN_RESOURCE;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, AgentStatus, ResourceChange, ResourceConfig,
    ResourceFindings, Result,
};
use tracing::{debug, instrument, warn};

use super::AlertPayload;
use crate::runner::AgentRunner;

/// Default activity-log lookback in days
pub const DEFAULT_CHANGE_LOOKBACK_DAYS: u32 = 7;

const UNKNOWN: &str = "unknown";

/// Raw activity-log row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogRow {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Resource inventory backend seam
#[async_trait]
pub trait ResourceQueryClient: Send + Sync {
    /// Inventory row for `resource_id`, or `None` when nothing matches
    async fn resource_config(&self, resource_id: &str) -> Result<Option<Map<String, Value>>>;

    /// Activity-log entries for `resource_id` over the last `lookback_days`
    async fn recent_changes(&self, resource_id: &str, lookback_days: u32) -> Result<Vec<ActivityLogRow>>;
}

/// Reports configuration and recent changes of the alerted resource
pub struct ResourceInvestigator {
    client: Option<Arc<dyn ResourceQueryClient>>,
    lookback_days: u32,
}

impl std::fmt::Debug for ResourceInvestigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInvestigator")
            .field("configured", &self.client.is_some())
            .field("lookback_days", &self.lookback_days)
            .finish()
    }
}

impl ResourceInvestigator {
    pub fn new(client: Option<Arc<dyn ResourceQueryClient>>) -> Self {
        Self {
            client,
            lookback_days: DEFAULT_CHANGE_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }
}

/// Hints first, then anything resembling a resource id in the payload
fn target_resource_id(payload: &Value, hints: &AgentHints) -> Option<String> {
    hints
        .alert_summary
        .as_ref()
        .and_then(|summary| summary.resource_id.clone())
        .filter(|id| !id.trim().is_empty())
        .or_else(|| scan_resource_id(payload))
}

fn row_text(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn to_config(resource_id: &str, row: Map<String, Value>) -> ResourceConfig {
    let tags = match row.get("tags") {
        Some(Value::Object(tags)) => tags
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    let properties = match row.get("properties") {
        Some(Value::Object(props)) => props.clone(),
        _ => Map::new(),
    };

    ResourceConfig {
        resource_id: row_text(&row, "id").unwrap_or_else(|| resource_id.to_string()),
        name: row_text(&row, "name").unwrap_or_else(|| UNKNOWN_RESOURCE.to_string()),
        resource_type: row_text(&row, "type").unwrap_or_else(|| "unknown-type".to_string()),
        location: Some(row_text(&row, "location").unwrap_or_else(|| "unknown-location".to_string())),
        tags,
        properties,
    }
}

/// RFC 3339 in UTC; unparseable timestamps collapse to the epoch
fn normalize_timestamp(raw: Option<&str>) -> String {
    raw.and_then(|ts| DateTime::parse_from_rfc3339(ts.trim()).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339()
}

fn to_change(row: ActivityLogRow) -> ResourceChange {
    let or_unknown = |v: Option<String>| {
        v.filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    ResourceChange {
        timestamp: Some(normalize_timestamp(row.timestamp.as_deref())),
        caller: Some(or_unknown(row.caller)),
        operation: or_unknown(row.operation),
        status: Some(or_unknown(row.status)),
    }
}

#[async_trait]
impl AgentRunner<AlertPayload> for ResourceInvestigator {
    type Output = ResourceFindings;

    #[instrument(skip_all, fields(agent = "resource"))]
    async fn run(&self, payload: AlertPayload, hints: AgentHints) -> Result<AgentResult<ResourceFindings>> {
        let started_at = Utc::now();

        let Some(resource_id) = target_resource_id(&payload, &hints) else {
            let note = "Unable to determine target resource_id from alert payload.".to_string();
            let findings = ResourceFindings {
                target_resource_id: Some(UNKNOWN_RESOURCE.to_string()),
                notes: Some(note.clone()),
                ..Default::default()
            };
            return Ok(AgentResult::degraded(AgentIdentity::Resource, started_at, findings, vec![note]));
        };

        let mut findings = ResourceFindings {
            target_resource_id: Some(resource_id.clone()),
            ..Default::default()
        };

        let Some(client) = &self.client else {
            let note = "Resource query client is not configured".to_string();
            findings.notes = Some(note.clone());
            return Ok(AgentResult::degraded(AgentIdentity::Resource, started_at, findings, vec![note]));
        };

        let queried = async {
            let config = client.resource_config(&resource_id).await?;
            let changes = client.recent_changes(&resource_id, self.lookback_days).await?;
            Ok::<_, spikehound_core::Error>((config, changes))
        }
        .await;

        match queried {
            Ok((config, changes)) => {
                findings.recent_changes = changes.into_iter().map(to_change).collect();
                debug!(resource_id = %resource_id, changes = findings.recent_changes.len(), "Resource query complete");

                let mut notes = Vec::new();
                match config {
                    Some(row) => findings.config = Some(to_config(&resource_id, row)),
                    None => notes.push("Resource Graph returned no matching resource configuration.".to_string()),
                }
                if !notes.is_empty() {
                    findings.notes = Some(notes.join(" "));
                }
                Ok(AgentResult::from_errors(AgentIdentity::Resource, started_at, findings, notes))
            }
            Err(err) => {
                let note = format!("Resource investigation failed: {err}");
                warn!(resource_id = %resource_id, error = %err, "Resource query failed");
                findings.notes = Some(note.clone());
                Ok(AgentResult::new(
                    AgentIdentity::Resource,
                    AgentStatus::Error,
                    started_at,
                    Utc::now(),
                    Some(findings),
                    vec![note],
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spikehound_core::{AlertSummary, Error};

    const VM_ID: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/gpu-1";

    struct StaticInventory {
        config: Option<Map<String, Value>>,
        fail: bool,
    }

    #[async_trait]
    impl ResourceQueryClient for StaticInventory {
        async fn resource_config(&self, _resource_id: &str) -> Result<Option<Map<String, Value>>> {
            if self.fail {
                return Err(Error::unavailable("Resource Graph throttled"));
            }
            Ok(self.config.clone())
        }

        async fn recent_changes(&self, _resource_id: &str, _lookback_days: u32) -> Result<Vec<ActivityLogRow>> {
            Ok(vec![ActivityLogRow {
                timestamp: Some("2024-05-01T10:00:00+02:00".into()),
                caller: None,
                operation: Some("Microsoft.Compute/virtualMachines/write".into()),
                status: Some("Succeeded".into()),
            }])
        }
    }

    fn vm_row() -> Map<String, Value> {
        match json!({
            "id": VM_ID,
            "name": "gpu-1",
            "type": "microsoft.compute/virtualmachines",
            "tags": {"owner": "ml", "cost-center": 42},
            "properties": {"hardwareProfile": {"vmSize": "Standard_NC6"}}
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_collects_config_and_changes() {
        let agent = ResourceInvestigator::new(Some(Arc::new(StaticInventory {
            config: Some(vm_row()),
            fail: false,
        })));
        let result = agent
            .run(Arc::new(json!({"resource_id": VM_ID})), AgentHints::default())
            .await
            .unwrap();

        assert_eq!(result.status, AgentStatus::Ok);
        let data = result.data.unwrap();
        let config = data.config.unwrap();
        assert_eq!(config.name, "gpu-1");
        assert_eq!(config.location.as_deref(), Some("unknown-location"));
        assert_eq!(config.tags.get("cost-center").map(String::as_str), Some("42"));

        let change = &data.recent_changes[0];
        assert_eq!(change.timestamp.as_deref(), Some("2024-05-01T08:00:00+00:00"));
        assert_eq!(change.caller.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_hint_resource_id_wins() {
        let summary = AlertSummary::from_payload(&json!({"resource_id": VM_ID}), Utc::now());
        let hints = AgentHints::default().with_alert_summary(summary);
        let agent = ResourceInvestigator::new(Some(Arc::new(StaticInventory {
            config: Some(vm_row()),
            fail: false,
        })));
        let result = agent
            .run(Arc::new(json!({"resourceId": "/subscriptions/other"})), hints)
            .await
            .unwrap();
        assert_eq!(result.data.unwrap().target_resource_id.as_deref(), Some(VM_ID));
    }

    #[tokio::test]
    async fn test_missing_target_is_degraded() {
        let agent = ResourceInvestigator::new(None);
        let result = agent.run(Arc::new(json!({"summary": "spend"})), AgentHints::default()).await.unwrap();

        assert_eq!(result.status, AgentStatus::Degraded);
        let data = result.data.unwrap();
        assert_eq!(data.target_resource_id.as_deref(), Some(UNKNOWN_RESOURCE));
        assert_eq!(
            data.notes.as_deref(),
            Some("Unable to determine target resource_id from alert payload.")
        );
    }

    #[tokio::test]
    async fn test_no_config_is_degraded() {
        let agent = ResourceInvestigator::new(Some(Arc::new(StaticInventory { config: None, fail: false })));
        let result = agent
            .run(Arc::new(json!({"resource_id": VM_ID})), AgentHints::default())
            .await
            .unwrap();
        assert_eq!(result.status, AgentStatus::Degraded);
        assert_eq!(result.errors, vec!["Resource Graph returned no matching resource configuration."]);
        assert_eq!(result.data.unwrap().recent_changes.len(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_is_error() {
        let agent = ResourceInvestigator::new(Some(Arc::new(StaticInventory { config: None, fail: true })));
        let result = agent
            .run(Arc::new(json!({"resource_id": VM_ID})), AgentHints::default())
            .await
            .unwrap();
        assert_eq!(result.status, AgentStatus::Error);
        assert_eq!(result.errors, vec!["Resource investigation failed: Resource Graph throttled"]);
        assert!(result.data.is_some());
    }

    #[test]
    fn test_bad_timestamp_is_epoch() {
        assert_eq!(normalize_timestamp(Some("yesterday")), "1970-01-01T00:00:00+00:00");
        assert_eq!(normalize_timestamp(None), "1970-01-01T00:00:00+00:00");
    }
}
