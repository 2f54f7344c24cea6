//! Webhook notifications
//!
//! Posts `{"text": ...}` to every configured URL, the body shape accepted by
//! most chat incoming-webhook integrations.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use spikehound_agents::NotificationSink;
use spikehound_core::config::NotificationConfig;
use spikehound_core::{Error, InvestigationReport, Result};
use tracing::{debug, instrument, warn};

/// Timeout for one webhook post
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct WebhookNotificationSink {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl WebhookNotificationSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {e}")))?;
        Ok(Self { urls, client })
    }

    /// Sink for the configured URLs, or `None` when there are none
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        let urls: Vec<String> = config
            .webhook_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Ok(None);
        }
        Self::new(urls, Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS)).map(Some)
    }

    /// Post to every URL; the first failure is returned after all were tried
    #[instrument(skip_all, fields(urls = self.urls.len()))]
    async fn post_text(&self, text: &str) -> Result<()> {
        let body = json!({ "text": text });
        let mut first_error = None;

        for url in &self.urls {
            let result = match self.client.post(url).json(&body).send().await {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(Error::external(format!(
                    "webhook returned status {}",
                    response.status()
                ))),
                Err(e) => Err(Error::unavailable(format!("webhook request failed: {e}"))),
            };
            match result {
                Ok(()) => debug!("Webhook delivered"),
                Err(err) => {
                    warn!(error = %err, "Webhook delivery failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify_report(&self, report: &InvestigationReport) -> Result<()> {
        self.post_text(&render_report(report)).await
    }

    async fn notify_followup(&self, text: &str) -> Result<()> {
        self.post_text(text).await
    }
}

/// Plain-text summary of a report
pub fn render_report(report: &InvestigationReport) -> String {
    let findings = &report.unified_findings;
    let mut text = format!("Cost anomaly investigation `{}`", report.investigation_id());
    if let Some(summary) = &findings.alert_summary {
        let _ = write!(text, " ({}): {}", summary.severity, summary.summary);
    }

    match &report.diagnosis_result.data {
        Some(diagnosis) => {
            let _ = write!(
                text,
                "\nDiagnosis: {} (confidence {}%)",
                diagnosis.hypothesis.title, diagnosis.confidence
            );
            for line in &diagnosis.hypothesis.evidence {
                let _ = write!(text, "\n{line}");
            }
        }
        None => text.push_str("\nDiagnosis: unavailable"),
    }

    match &report.remediation_result.data {
        Some(plan) => {
            let _ = write!(text, "\nProposed remediation: {}", plan.summary);
            for action in &plan.actions {
                let _ = write!(
                    text,
                    "\n- {} on `{}` (risk {})",
                    action.action_type,
                    action.target_resource_id,
                    action.risk_level.as_str()
                );
            }
            text.push_str("\nReply with approve_remediation, reject_remediation or investigate_more.");
        }
        None => text.push_str("\nProposed remediation: none"),
    }

    let errors = report.error_messages();
    if !errors.is_empty() {
        text.push_str("\nErrors:");
        for error in errors {
            let _ = write!(text, "\n- {error}");
        }
    }
    text
}
