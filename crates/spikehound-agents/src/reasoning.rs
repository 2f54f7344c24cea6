//! Reasoning service client
//!
//! Diagnosis and remediation first ask an external reasoning service for a
//! structured answer and fall back to deterministic rules when it is not
//! configured or misbehaves. The service is an OpenAI-compatible
//! chat-completions endpoint asked to answer in JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use spikehound_core::config::ReasoningConfig;
use spikehound_core::{Error, Result};
use tracing::{debug, info, instrument, warn};

const MAX_TOKENS: u32 = 800;

/// Prompt in, validated-later JSON out
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// False when calls are known to fail with "not configured"
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete_json(&self, system_prompt: &str, user_prompt: &str) -> Result<Value>;
}

/// Client used when no reasoning endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReasoningClient;

#[async_trait]
impl ReasoningClient for NoopReasoningClient {
    fn is_configured(&self) -> bool {
        false
    }

    async fn complete_json(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Value> {
        Err(Error::unavailable("Reasoning service is not configured"))
    }
}

/// Build the client described by `config`
pub fn from_config(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningClient>> {
    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => {
            let client = HttpReasoningClient::new(
                endpoint,
                config.api_key.clone(),
                &config.model,
                Duration::from_secs(config.timeout_secs),
            )?;
            info!(endpoint, model = %config.model, "Reasoning service configured");
            Ok(Arc::new(client))
        }
        _ => {
            info!("Reasoning service not configured, using rule-based fallbacks");
            Ok(Arc::new(NoopReasoningClient))
        }
    }
}

/// Chat-completions client over HTTP
#[derive(Debug, Clone)]
pub struct HttpReasoningClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpReasoningClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| Error::config(format!("failed to build reasoning client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.to_string(),
            client,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, json_mode: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete_json(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);

        // JSON mode first; some deployments reject `response_format` with a 400
        for json_mode in [true, false] {
            let mut request = self
                .client
                .post(&url)
                .json(&self.request_body(system_prompt, user_prompt, json_mode));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::unavailable(format!("Reasoning request timed out: {e}"))
                } else {
                    Error::unavailable(format!("Reasoning request failed: {e}"))
                }
            })?;

            let status = response.status();
            if status.as_u16() == 400 && json_mode {
                debug!("Reasoning service rejected JSON mode, retrying with prompt only");
                continue;
            }
            if !status.is_success() {
                warn!(status = %status, "Reasoning service returned an error status");
                return Err(Error::unavailable(format!(
                    "Reasoning service returned status {status}"
                )));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| Error::invalid_response(format!("unreadable reasoning body: {e}")))?;
            return parse_completion(&body);
        }

        Err(Error::invalid_response("reasoning response format attempts exhausted"))
    }
}

/// Extract and parse the JSON document in the first choice
pub fn parse_completion(body: &Value) -> Result<Value> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_response("reasoning response has no message content"))?;

    let trimmed = strip_code_fence(content.trim());
    let parsed: Value = serde_json::from_str(trimmed)
        .map_err(|e| Error::invalid_response(format!("reasoning content is not JSON: {e}")))?;
    if !parsed.is_object() {
        return Err(Error::invalid_response("reasoning content is not a JSON object"));
    }
    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
