//! Error types shared by every Spikehound crate.
//!
//! Investigation failures are normally captured inside an
//! [`AgentResult`](crate::agent::AgentResult) rather than propagated; this
//! enum is what agents and collaborators return before that capture happens.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Spikehound error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// A task exceeded its time bound
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A dependency is not configured or cannot be reached
    #[error("{0}")]
    Unavailable(String),

    /// The reasoning service returned output that does not fit the schema
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A remediation side effect failed
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    /// A resource id could not be parsed into resource group and VM name
    #[error("malformed target resource id '{resource_id}': {reason}")]
    MalformedTarget { resource_id: String, reason: String },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything an external collaborator reports that fits no other bucket
    #[error("{0}")]
    External(String),
}

impl Error {
    /// Create an unavailable-dependency error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid-response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an execution failure
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionFailure(msg.into())
    }

    /// Create a malformed-target error
    pub fn malformed_target(resource_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTarget {
            resource_id: resource_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an error for an external collaborator failure
    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }
}
