//! Service configuration.
//!
//! Loaded from an optional YAML file, then overridden from the environment,
//! then validated. Every field has a default so an empty file (or none at all)
//! yields a working offline configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default HTTP bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;
/// Default HTTP request timeout in seconds; must exceed [`Config::alert_budget_secs`]
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 150;
/// Default per-agent timeout in seconds
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 20;
/// Default idempotency window in seconds
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 600;
/// Default number of extra pipeline runs on transient failure
pub const DEFAULT_MAX_AGENT_RETRIES: u32 = 1;
/// Default interval of the idempotency eviction sweep in seconds
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 60;
/// Default number of similar incidents to return
pub const DEFAULT_HISTORY_TOP_K: usize = 5;
/// Default number of recent incidents scanned by the local search
pub const DEFAULT_HISTORY_CANDIDATE_LIMIT: usize = 200;
/// Default reasoning model
pub const DEFAULT_REASONING_MODEL: &str = "gpt-4o-mini";
/// Default reasoning request timeout in seconds
pub const DEFAULT_REASONING_TIMEOUT_SECS: u64 = 15;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub history: HistoryBackendConfig,
    pub reasoning: ReasoningConfig,
    pub remediation: RemediationConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Pipeline timing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub agent_timeout_secs: u64,
    pub idempotency_ttl_secs: u64,
    pub max_agent_retries: u32,
    pub eviction_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            max_agent_retries: DEFAULT_MAX_AGENT_RETRIES,
            eviction_interval_secs: DEFAULT_EVICTION_INTERVAL_SECS,
        }
    }
}

/// History backend selection, resolved once at startup.
///
/// The remote backend is used only when every remote key is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryBackendConfig {
    pub top_k: usize,
    pub candidate_limit: usize,
    pub cosmos_endpoint: Option<String>,
    pub cosmos_key: Option<String>,
    pub cosmos_database: Option<String>,
    pub cosmos_container: Option<String>,
    pub search_endpoint: Option<String>,
    pub search_api_key: Option<String>,
    pub search_index: Option<String>,
}

impl Default for HistoryBackendConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_HISTORY_TOP_K,
            candidate_limit: DEFAULT_HISTORY_CANDIDATE_LIMIT,
            cosmos_endpoint: None,
            cosmos_key: None,
            cosmos_database: None,
            cosmos_container: None,
            search_endpoint: None,
            search_api_key: None,
            search_index: None,
        }
    }
}

impl HistoryBackendConfig {
    /// Environment names of the remote keys that are unset or blank
    pub fn missing_remote_keys(&self) -> Vec<&'static str> {
        [
            ("COSMOS_ENDPOINT", &self.cosmos_endpoint),
            ("COSMOS_KEY", &self.cosmos_key),
            ("COSMOS_DATABASE", &self.cosmos_database),
            ("COSMOS_CONTAINER", &self.cosmos_container),
            ("AZURE_SEARCH_ENDPOINT", &self.search_endpoint),
            ("AZURE_SEARCH_API_KEY", &self.search_api_key),
            ("AZURE_SEARCH_INDEX", &self.search_index),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn remote_configured(&self) -> bool {
        self.missing_remote_keys().is_empty()
    }
}

/// External reasoning service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: DEFAULT_REASONING_MODEL.to_string(),
            timeout_secs: DEFAULT_REASONING_TIMEOUT_SECS,
        }
    }
}

impl ReasoningConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Kill switch for side effects; off unless explicitly enabled
    pub execution_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_urls: Vec<String>,
}

impl Config {
    /// Load from `path` when it exists, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                let text = std::fs::read_to_string(path)?;
                Self::from_yaml(&text)?
            }
            Some(path) => {
                debug!(path = %path.display(), "Configuration file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| Error::config(format!("invalid YAML: {e}")))
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("SPIKEHOUND_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("SPIKEHOUND_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = var("SPIKEHOUND_AGENT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.pipeline.agent_timeout_secs = v;
        }
        if let Some(v) = var("SPIKEHOUND_IDEMPOTENCY_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.pipeline.idempotency_ttl_secs = v;
        }
        if let Some(v) = var("SPIKEHOUND_MAX_AGENT_RETRIES").and_then(|v| v.parse().ok()) {
            self.pipeline.max_agent_retries = v;
        }
        if let Some(v) = var("SPIKEHOUND_HISTORY_TOP_K").and_then(|v| v.parse().ok()) {
            self.history.top_k = v;
        }
        if let Some(v) = var("SPIKEHOUND_EXECUTION_ENABLED") {
            self.remediation.execution_enabled = v == "true" || v == "1";
        }
        if let Some(v) = var("SPIKEHOUND_REASONING_ENDPOINT") {
            self.reasoning.endpoint = Some(v);
        }
        if let Some(v) = var("SPIKEHOUND_REASONING_API_KEY") {
            self.reasoning.api_key = Some(v);
        }
        if let Some(v) = var("SPIKEHOUND_REASONING_MODEL") {
            self.reasoning.model = v;
        }
        if let Some(v) = var("SPIKEHOUND_WEBHOOK_URLS") {
            self.notifications.webhook_urls = v
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }

        let history = &mut self.history;
        for (name, slot) in [
            ("COSMOS_ENDPOINT", &mut history.cosmos_endpoint),
            ("COSMOS_KEY", &mut history.cosmos_key),
            ("COSMOS_DATABASE", &mut history.cosmos_database),
            ("COSMOS_CONTAINER", &mut history.cosmos_container),
            ("AZURE_SEARCH_ENDPOINT", &mut history.search_endpoint),
            ("AZURE_SEARCH_API_KEY", &mut history.search_api_key),
            ("AZURE_SEARCH_INDEX", &mut history.search_index),
        ] {
            if let Some(v) = var(name) {
                *slot = Some(v);
            }
        }
    }

    /// Longest an alert delivery can take: three sequential stages per
    /// attempt, every retry, then one agent timeout for the notification sink.
    pub fn alert_budget_secs(&self) -> u64 {
        let timeout = self.pipeline.agent_timeout_secs;
        let attempts = u64::from(self.pipeline.max_agent_retries) + 1;
        let sinks = if self.notifications.webhook_urls.is_empty() { 0 } else { timeout };
        timeout.saturating_mul(3).saturating_mul(attempts).saturating_add(sinks)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("server.port must be non-zero"));
        }
        let budget = self.alert_budget_secs();
        if self.server.request_timeout_secs <= budget {
            return Err(Error::config(format!(
                "server.request_timeout_secs ({}) must exceed the alert pipeline budget of {budget}s",
                self.server.request_timeout_secs
            )));
        }
        if self.pipeline.agent_timeout_secs == 0 {
            return Err(Error::config("pipeline.agent_timeout_secs must be positive"));
        }
        if self.pipeline.idempotency_ttl_secs == 0 {
            return Err(Error::config("pipeline.idempotency_ttl_secs must be positive"));
        }
        if self.pipeline.eviction_interval_secs == 0 {
            return Err(Error::config("pipeline.eviction_interval_secs must be positive"));
        }
        if self.history.top_k == 0 {
            return Err(Error::config("history.top_k must be positive"));
        }
        if self.history.candidate_limit < self.history.top_k {
            return Err(Error::config("history.candidate_limit must be at least history.top_k"));
        }
        Ok(())
    }
}
