//! Task Runner
//!
//! Wraps one agent call in a timeout and a failure boundary. Whatever the
//! agent does (returns, errors, panics, hangs) the caller gets an
//! [`AgentResult`] back within the timeout.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use spikehound_core::config::DEFAULT_AGENT_TIMEOUT_SECS;
use spikehound_core::{AgentHints, AgentIdentity, AgentResult, Result};
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Uniform agent signature: one payload plus side hints in, one result out
#[async_trait]
pub trait AgentRunner<P>: Send + Sync
where
    P: Send + 'static,
{
    type Output: Send + 'static;

    async fn run(&self, payload: P, hints: AgentHints) -> Result<AgentResult<Self::Output>>;
}

/// Runs agents with a per-task timeout
#[derive(Debug, Clone, Copy)]
pub struct TaskRunner {
    timeout: Duration,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS))
    }
}

impl TaskRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `agent` as `identity`.
    ///
    /// The agent is spawned so the timeout holds even if it blocks; on timeout
    /// the task is aborted and whatever it produces later is dropped.
    pub async fn run<P, T>(
        &self,
        identity: AgentIdentity,
        agent: Arc<dyn AgentRunner<P, Output = T>>,
        payload: P,
        hints: AgentHints,
    ) -> AgentResult<T>
    where
        P: Send + 'static,
        T: Send + 'static,
    {
        let started_at = Utc::now();
        debug!(agent = %identity, "Agent task started");

        let mut handle = tokio::spawn(async move { agent.run(payload, hints).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                let message = format!(
                    "{identity} agent timed out after {}s",
                    format_seconds(self.timeout)
                );
                warn!(agent = %identity, timeout_ms = self.timeout.as_millis() as u64, "Agent timed out");
                return AgentResult::error(identity, started_at, Utc::now(), message);
            }
        };

        let failure = match outcome {
            Ok(Ok(result)) if result.agent == identity => {
                debug!(agent = %identity, status = %result.status, "Agent task finished");
                return AgentResult::new(
                    identity,
                    result.status,
                    started_at,
                    Utc::now(),
                    result.data,
                    result.errors,
                );
            }
            Ok(Ok(result)) => {
                format!("{identity} agent returned unexpected agent id {}", result.agent)
            }
            Ok(Err(err)) => format!("{identity} agent failed: {err}"),
            Err(join_err) => format!("{identity} agent failed: {}", join_error_message(join_err)),
        };

        warn!(agent = %identity, error = %failure, "Agent task failed");
        AgentResult::error(identity, started_at, Utc::now(), failure)
    }
}

/// Whole seconds print without a fraction, sub-second timeouts keep millis
fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        let text = format!("{:.3}", duration.as_secs_f64());
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "agent task panicked".to_string()
    }
}
