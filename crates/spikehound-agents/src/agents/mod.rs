//! Investigators
//!
//! The three independent data-gathering agents. Each receives the raw alert
//! payload and reports through the common [`AgentRunner`](crate::runner::AgentRunner)
//! signature:
//!
//! - **CostInvestigator**: top resources by spend over the lookback window
//! - **ResourceInvestigator**: configuration and recent activity of the alerted resource
//! - **HistoryInvestigator**: records the incident and finds similar past incidents

pub mod cost;
pub mod history;
pub mod resource;

use std::sync::Arc;

use serde_json::Value;

pub use cost::{CostInvestigator, CostQueryClient, CostRow};
pub use history::{
    resolve_history_dependencies, HistoryBackendFactory, HistoryDependencies, HistoryInvestigator,
    HistoryOverrides,
};
pub use resource::{ActivityLogRow, ResourceInvestigator, ResourceQueryClient};

/// Raw alert payload shared by the investigators
pub type AlertPayload = Arc<Value>;

/// Top-level field as text: strings trimmed, other scalars rendered, blanks dropped
pub(crate) fn payload_text(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_text() {
        let payload = json!({"a": " x ", "b": 42, "c": "", "d": null, "e": false});
        assert_eq!(payload_text(&payload, "a").as_deref(), Some("x"));
        assert_eq!(payload_text(&payload, "b").as_deref(), Some("42"));
        assert_eq!(payload_text(&payload, "c"), None);
        assert_eq!(payload_text(&payload, "d"), None);
        assert_eq!(payload_text(&payload, "e"), None);
        assert_eq!(payload_text(&payload, "missing"), None);
    }
}
