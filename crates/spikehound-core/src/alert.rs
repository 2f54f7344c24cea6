//! Alert normalization.
//!
//! Two payload shapes reach the ingress: a flat shape carrying
//! `alert_id` / `summary` / `resource_id`, and the Azure Monitor common alert
//! schema with `data.essentials` and `data.alertContext`. Both are reduced to
//! an [`AlertSummary`] once, at ingress, and never mutated afterwards.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alert id used when the payload carries none
pub const UNKNOWN_ALERT: &str = "unknown-alert";
/// Rule name used when the payload carries none
pub const UNKNOWN_RULE: &str = "unknown-rule";
/// Severity used when the payload carries none
pub const UNKNOWN_SEVERITY: &str = "unknown";
/// Summary used when neither a rule name nor a summary is present
pub const DEFAULT_SUMMARY: &str = "Alert received";

const RESOURCE_ID_KEYS: [&str; 3] = ["resource_id", "resourceid", "resourceuri"];

/// Normalized subset of an incoming alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alert_id: String,
    pub received_at: DateTime<Utc>,
    pub rule_name: String,
    pub severity: String,
    pub fired_date_time: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AlertSummary {
    /// Normalize a raw alert payload received at `received_at`
    pub fn from_payload(payload: &Value, received_at: DateTime<Utc>) -> Self {
        let empty = Map::new();
        let root = payload.as_object().unwrap_or(&empty);
        let data = object_at(root, "data");
        let essentials = data.map(|d| object_at(d, "essentials")).unwrap_or(None);
        let alert_context = data.map(|d| object_at(d, "alertContext")).unwrap_or(None);

        let from_root = |key: &str| root.get(key);

        let alert_id = first_non_empty([
            from_root("alert_id"),
            from_root("id"),
            from(essentials, "alertId"),
            from(essentials, "originAlertId"),
        ]);
        let rule_name = first_non_empty([
            from_root("rule_name"),
            from_root("ruleName"),
            from(essentials, "alertRule"),
            from_root("summary"),
            from_root("title"),
        ]);
        let severity = first_non_empty([
            from_root("severity"),
            from(essentials, "severity"),
            from(alert_context, "severity"),
        ]);
        let fired_date_time = first_non_empty([
            from_root("fired_date_time"),
            from_root("firedDateTime"),
            from(essentials, "firedDateTime"),
            from_root("timestamp"),
        ]);
        let resource_id = first_non_empty([from_root("resource_id"), from_root("resourceId")])
            .or_else(|| first_string_in_array(from(essentials, "alertTargetIDs")))
            .or_else(|| first_non_empty([from(alert_context, "resourceId")]))
            .or_else(|| scan_resource_id(payload));

        Self {
            alert_id: alert_id.unwrap_or_else(|| UNKNOWN_ALERT.to_string()),
            received_at,
            summary: rule_name.clone().unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
            rule_name: rule_name.unwrap_or_else(|| UNKNOWN_RULE.to_string()),
            severity: severity.unwrap_or_else(|| UNKNOWN_SEVERITY.to_string()),
            fired_date_time: fired_date_time
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
            resource_id,
            resource_name: loose_string(from_root("resource_name")),
            resource_type: loose_string(from_root("resource_type")),
            anomaly_type: loose_string(from_root("anomaly_type")),
            title: loose_string(from_root("title")),
        }
    }

    /// Non-empty descriptive fields, in the order used to build search queries
    pub fn descriptive_terms(&self) -> Vec<&str> {
        [
            Some(self.summary.as_str()),
            self.resource_id.as_deref(),
            self.resource_name.as_deref(),
            self.resource_type.as_deref(),
            self.anomaly_type.as_deref(),
            self.title.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .collect()
    }
}

/// Last-resort resource id lookup: any `resource_id` / `resourceId` /
/// `resourceUri` string, or an `id` string starting with `/subscriptions/`,
/// anywhere in the payload.
pub fn scan_resource_id(payload: &Value) -> Option<String> {
    let mut candidates = Vec::new();
    collect_resource_id_candidates(payload, &mut candidates);
    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn collect_resource_id_candidates<'a>(value: &'a Value, candidates: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = key.to_ascii_lowercase();
                if let Value::String(text) = child {
                    if RESOURCE_ID_KEYS.contains(&key.as_str()) {
                        candidates.push(text);
                    } else if key == "id" && text.to_ascii_lowercase().starts_with("/subscriptions/") {
                        candidates.push(text);
                    }
                }
                if child.is_object() || child.is_array() {
                    collect_resource_id_candidates(child, candidates);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_resource_id_candidates(item, candidates);
            }
        }
        _ => {}
    }
}

fn from<'m>(map: Option<&'m Map<String, Value>>, key: &str) -> Option<&'m Value> {
    map.and_then(|m| m.get(key))
}

fn object_at<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

fn first_non_empty<'a, const N: usize>(values: [Option<&'a Value>; N]) -> Option<String> {
    values
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_string_in_array(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_array)
        .and_then(|items| first_non_empty_iter(items.iter()))
}

fn first_non_empty_iter<'a>(values: impl Iterator<Item = &'a Value>) -> Option<String> {
    values
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings are kept as-is, other non-null scalars are rendered as JSON text
fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_payload() {
        let payload = json!({
            "alert_id": "alert-123",
            "summary": "GPU spend spike",
            "resource_id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-gpu",
            "anomaly_type": "cost_spike"
        });

        let summary = AlertSummary::from_payload(&payload, Utc::now());
        assert_eq!(summary.alert_id, "alert-123");
        assert_eq!(summary.rule_name, "GPU spend spike");
        assert_eq!(summary.summary, "GPU spend spike");
        assert_eq!(summary.severity, UNKNOWN_SEVERITY);
        assert_eq!(summary.anomaly_type.as_deref(), Some("cost_spike"));
        assert!(summary.resource_id.unwrap().ends_with("vm-gpu"));
    }

    #[test]
    fn test_common_alert_schema_payload() {
        let payload = json!({
            "schemaId": "azureMonitorCommonAlertSchema",
            "data": {
                "essentials": {
                    "alertId": "/subscriptions/s/providers/Microsoft.AlertsManagement/alerts/abc",
                    "alertRule": "daily-cost-budget",
                    "severity": "Sev2",
                    "firedDateTime": "2026-02-11T01:00:00Z",
                    "alertTargetIDs": ["  ", "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-1"]
                },
                "alertContext": { "severity": "Sev3" }
            }
        });

        let summary = AlertSummary::from_payload(&payload, Utc::now());
        assert_eq!(summary.alert_id, "/subscriptions/s/providers/Microsoft.AlertsManagement/alerts/abc");
        assert_eq!(summary.rule_name, "daily-cost-budget");
        assert_eq!(summary.severity, "Sev2");
        assert_eq!(summary.fired_date_time, "2026-02-11T01:00:00Z");
        assert!(summary.resource_id.unwrap().ends_with("virtualMachines/vm-1"));
    }

    #[test]
    fn test_missing_fields_use_sentinels() {
        let summary = AlertSummary::from_payload(&json!({}), Utc::now());
        assert_eq!(summary.alert_id, UNKNOWN_ALERT);
        assert_eq!(summary.rule_name, UNKNOWN_RULE);
        assert_eq!(summary.summary, DEFAULT_SUMMARY);
        assert!(summary.resource_id.is_none());
        assert!(DateTime::parse_from_rfc3339(&summary.fired_date_time).is_ok());
    }

    #[test]
    fn test_recursive_resource_scan() {
        let payload = json!({
            "alert_id": "a-1",
            "data": {
                "alertContext": {
                    "condition": {
                        "allOf": [{ "dimensions": [{ "id": "/SUBSCRIPTIONS/s/resourceGroups/rg/vm" }] }]
                    }
                }
            }
        });

        assert_eq!(
            scan_resource_id(&payload).as_deref(),
            Some("/SUBSCRIPTIONS/s/resourceGroups/rg/vm")
        );
        assert_eq!(scan_resource_id(&json!({ "id": "not-a-resource" })), None);
    }

    #[test]
    fn test_resource_scan_follows_document_order() {
        let payload: Value = serde_json::from_str(
            r#"{"resourceUri": "/subscriptions/first", "nested": {"resourceId": "/subscriptions/second"}}"#,
        )
        .unwrap();
        assert_eq!(scan_resource_id(&payload).as_deref(), Some("/subscriptions/first"));

        let payload: Value = serde_json::from_str(
            r#"{"zone": {"id": "/subscriptions/z"}, "alpha": {"resource_id": "/subscriptions/a"}}"#,
        )
        .unwrap();
        assert_eq!(scan_resource_id(&payload).as_deref(), Some("/subscriptions/z"));
    }
}
