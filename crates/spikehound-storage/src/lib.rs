//! # Spikehound Storage
//!
//! Incident history used by the history investigator.
//!
//! This crate provides:
//! - The [`IncidentStore`] and [`IncidentSearch`] seams
//! - An in-memory store, used when no remote backend is configured
//! - A token-overlap search over any store

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod memory;
pub mod search;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spikehound_core::Result;

pub use memory::MemoryIncidentStore;
pub use search::LocalIncidentSearch;

/// Persisted incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl IncidentRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at,
            title: title.into(),
            summary: String::new(),
            root_cause: String::new(),
            resolution: String::new(),
            tags: Vec::new(),
            raw: Map::new(),
        }
    }
}

/// Similarity search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

/// Incident persistence
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert or replace a record by id
    async fn put(&self, record: IncidentRecord) -> Result<()>;

    async fn get(&self, incident_id: &str) -> Result<Option<IncidentRecord>>;

    /// Most recent records first, ties broken by id descending
    async fn list_recent(&self, limit: usize) -> Result<Vec<IncidentRecord>>;
}

/// Similar-incident lookup
#[async_trait]
pub trait IncidentSearch: Send + Sync {
    async fn search_similar(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::memory::MemoryIncidentStore;
    pub use crate::search::LocalIncidentSearch;
    pub use crate::{IncidentRecord, IncidentSearch, IncidentStore, SearchHit};
}
