//! History investigator
//!
//! Persists the current alert as an incident record, then looks for similar
//! past incidents. Backends are resolved once at construction:
//!
//! 1. explicit store and search overrides are used as given
//! 2. a store alone gets a [`LocalIncidentSearch`] over it
//! 3. a search alone gets a fresh in-memory store
//! 4. otherwise the remote backend is built through a [`HistoryBackendFactory`]
//!    when every remote key is configured; any gap falls back to memory and
//!    skips the search, reporting why.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use spikehound_core::config::HistoryBackendConfig;
use spikehound_core::{
    AgentHints, AgentIdentity, AgentResult, HistoryFindings, Result, SimilarIncident,
};
use spikehound_storage::prelude::*;
use tracing::{debug, info, instrument, warn};

use super::{payload_text, AlertPayload};
use crate::runner::AgentRunner;

/// Query used when neither the payload nor the hints carry descriptive text
pub const DEFAULT_HISTORY_QUERY: &str = "cost anomaly incident";

const QUERY_FIELDS: [&str; 6] = [
    "summary",
    "resource_id",
    "resource_name",
    "resource_type",
    "anomaly_type",
    "title",
];

// =============================================================================
// Backend resolution
// =============================================================================

/// Builds the remote store and search pair
pub trait HistoryBackendFactory: Send + Sync {
    fn build(
        &self,
        config: &HistoryBackendConfig,
    ) -> Result<(Arc<dyn IncidentStore>, Arc<dyn IncidentSearch>)>;
}

/// Explicitly injected backends
#[derive(Default)]
pub struct HistoryOverrides {
    pub store: Option<Arc<dyn IncidentStore>>,
    pub search: Option<Arc<dyn IncidentSearch>>,
}

impl std::fmt::Debug for HistoryOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryOverrides")
            .field("store", &self.store.is_some())
            .field("search", &self.search.is_some())
            .finish()
    }
}

/// Resolved backends plus the issues reported on every run
pub struct HistoryDependencies {
    pub store: Arc<dyn IncidentStore>,
    pub search: Arc<dyn IncidentSearch>,
    pub issues: Vec<String>,
    /// Skip the similarity search and report no matches
    pub return_empty: bool,
}

impl std::fmt::Debug for HistoryDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryDependencies")
            .field("issues", &self.issues)
            .field("return_empty", &self.return_empty)
            .finish_non_exhaustive()
    }
}

impl HistoryDependencies {
    fn memory_fallback(candidate_limit: usize, issue: String) -> Self {
        let store: Arc<dyn IncidentStore> = Arc::new(MemoryIncidentStore::new());
        let search = Arc::new(LocalIncidentSearch::new(store.clone(), candidate_limit));
        Self {
            store,
            search,
            issues: vec![issue],
            return_empty: true,
        }
    }
}

pub fn resolve_history_dependencies(
    config: &HistoryBackendConfig,
    overrides: HistoryOverrides,
    factory: Option<&dyn HistoryBackendFactory>,
) -> HistoryDependencies {
    let limit = config.candidate_limit;
    match (overrides.store, overrides.search) {
        (Some(store), Some(search)) => HistoryDependencies {
            store,
            search,
            issues: Vec::new(),
            return_empty: false,
        },
        (Some(store), None) => HistoryDependencies {
            search: Arc::new(LocalIncidentSearch::new(store.clone(), limit)),
            store,
            issues: Vec::new(),
            return_empty: false,
        },
        (None, Some(search)) => HistoryDependencies {
            store: Arc::new(MemoryIncidentStore::new()),
            search,
            issues: Vec::new(),
            return_empty: false,
        },
        (None, None) => {
            let missing = config.missing_remote_keys();
            if !missing.is_empty() {
                return HistoryDependencies::memory_fallback(
                    limit,
                    format!("Azure history backends not configured: {}", missing.join(", ")),
                );
            }
            let Some(factory) = factory else {
                return HistoryDependencies::memory_fallback(
                    limit,
                    "Remote history backends are configured but no backend factory is installed"
                        .to_string(),
                );
            };
            match factory.build(config) {
                Ok((store, search)) => HistoryDependencies {
                    store,
                    search,
                    issues: Vec::new(),
                    return_empty: false,
                },
                Err(err) => HistoryDependencies::memory_fallback(
                    limit,
                    format!("Azure history backends unavailable: {err}"),
                ),
            }
        }
    }
}

// =============================================================================
// Investigator
// =============================================================================

/// Records the alert and reports similar past incidents
#[derive(Debug)]
pub struct HistoryInvestigator {
    deps: HistoryDependencies,
    top_k: usize,
}

impl HistoryInvestigator {
    pub fn new(
        config: &HistoryBackendConfig,
        overrides: HistoryOverrides,
        factory: Option<&dyn HistoryBackendFactory>,
    ) -> Self {
        let deps = resolve_history_dependencies(config, overrides, factory);
        if deps.issues.is_empty() {
            info!("History backends resolved");
        } else {
            warn!(issues = ?deps.issues, "History backends degraded");
        }
        Self::from_dependencies(deps, config.top_k)
    }

    pub fn from_dependencies(deps: HistoryDependencies, top_k: usize) -> Self {
        Self { deps, top_k }
    }

    async fn similar_incidents(&self, query: &str, own_id: &str) -> Result<Vec<SimilarIncident>> {
        // One extra hit so the record just persisted can be dropped
        let hits = self.deps.search.search_similar(query, self.top_k + 1).await?;
        let mut matches = Vec::new();
        for hit in hits.into_iter().filter(|hit| hit.id != own_id).take(self.top_k) {
            let incident = match self.deps.store.get(&hit.id).await? {
                Some(record) => SimilarIncident {
                    id: record.id,
                    title: record.title,
                    summary: record.summary,
                    resolution: Some(record.resolution).filter(|r| !r.is_empty()),
                    score: Some(hit.score),
                },
                None => SimilarIncident {
                    id: hit.id.clone(),
                    title: hit.id,
                    summary: String::new(),
                    resolution: None,
                    score: Some(hit.score),
                },
            };
            matches.push(incident);
        }
        Ok(matches)
    }
}

/// Payload fields plus hint terms, deduplicated in first-seen order
pub fn build_query(payload: &Value, hints: &AgentHints) -> String {
    let mut terms: Vec<String> = Vec::new();
    let from_payload = QUERY_FIELDS.iter().filter_map(|key| payload_text(payload, key));
    let from_hints = hints
        .alert_summary
        .iter()
        .flat_map(|summary| summary.descriptive_terms())
        .map(str::to_string);

    for term in from_payload.chain(from_hints) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    if terms.is_empty() {
        DEFAULT_HISTORY_QUERY.to_string()
    } else {
        terms.join(" ")
    }
}

/// Incident record for the current alert
pub fn build_record(
    payload: &Value,
    hints: &AgentHints,
    query: &str,
    now: DateTime<Utc>,
) -> IncidentRecord {
    let id = payload_text(payload, "alert_id")
        .or_else(|| payload_text(payload, "id"))
        .or_else(|| {
            hints
                .alert_summary
                .as_ref()
                .map(|summary| summary.alert_id.clone())
                .filter(|id| id != spikehound_core::alert::UNKNOWN_ALERT)
        })
        .unwrap_or_else(|| format!("incident-{}", now.timestamp()));

    let title = payload_text(payload, "title")
        .or_else(|| payload_text(payload, "summary"))
        .unwrap_or_else(|| id.clone());

    let mut tags = Vec::new();
    for tag in ["anomaly_type", "resource_type"]
        .iter()
        .filter_map(|key| payload_text(payload, key))
    {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let mut record = IncidentRecord::new(id, now, title);
    record.summary = payload_text(payload, "summary").unwrap_or_else(|| query.to_string());
    record.resolution = payload_text(payload, "resolution").unwrap_or_default();
    record.tags = tags;
    record.raw = match payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    record
}

#[async_trait]
impl AgentRunner<AlertPayload> for HistoryInvestigator {
    type Output = HistoryFindings;

    #[instrument(skip_all, fields(agent = "history"))]
    async fn run(&self, payload: AlertPayload, hints: AgentHints) -> Result<AgentResult<HistoryFindings>> {
        let started_at = Utc::now();
        let mut errors = self.deps.issues.clone();

        let query = build_query(&payload, &hints);
        let record = build_record(&payload, &hints, &query, started_at);
        let record_id = record.id.clone();

        if let Err(err) = self.deps.store.put(record).await {
            warn!(incident_id = %record_id, error = %err, "Incident persistence failed");
            errors.push(format!("Incident persistence unavailable: {err}"));
        }

        let mut matches = Vec::new();
        if !self.deps.return_empty {
            match self.similar_incidents(&query, &record_id).await {
                Ok(found) => matches = found,
                Err(err) => {
                    warn!(error = %err, "Incident search failed");
                    errors.push(format!("Incident search unavailable: {err}"));
                }
            }
        }
        debug!(query = %query, matches = matches.len(), "History lookup complete");

        let mut unique: Vec<String> = Vec::new();
        for err in errors {
            if !unique.contains(&err) {
                unique.push(err);
            }
        }
        let notes = (!unique.is_empty()).then(|| unique.join("; "));

        let findings = HistoryFindings { query, matches, notes };
        Ok(AgentResult::from_errors(AgentIdentity::History, started_at, findings, unique))
    }
}
