//! Token-overlap incident search.
//!
//! Scores each recent record by the share of query tokens found in its title,
//! summary, root cause, resolution and tags. No embeddings involved.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use spikehound_core::config::DEFAULT_HISTORY_CANDIDATE_LIMIT;
use spikehound_core::Result;
use tracing::debug;

use crate::{IncidentRecord, IncidentSearch, IncidentStore, SearchHit};

/// Search over the most recent records of a store
pub struct LocalIncidentSearch {
    store: Arc<dyn IncidentStore>,
    candidate_limit: usize,
}

impl std::fmt::Debug for LocalIncidentSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIncidentSearch")
            .field("candidate_limit", &self.candidate_limit)
            .finish()
    }
}

impl LocalIncidentSearch {
    pub fn new(store: Arc<dyn IncidentStore>, candidate_limit: usize) -> Self {
        Self {
            store,
            candidate_limit,
        }
    }

    pub fn with_defaults(store: Arc<dyn IncidentStore>) -> Self {
        Self::new(store, DEFAULT_HISTORY_CANDIDATE_LIMIT)
    }
}

#[async_trait]
impl IncidentSearch for LocalIncidentSearch {
    async fn search_similar(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.store.list_recent(self.candidate_limit.max(k)).await?;
        let mut hits: Vec<SearchHit> = candidates
            .iter()
            .filter_map(|record| {
                let score = score(&query_terms, record);
                (score > 0.0).then(|| SearchHit {
                    id: record.id.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        debug!(candidates = candidates.len(), hits = hits.len(), "Local incident search");
        Ok(hits)
    }
}

fn score(query_terms: &HashSet<String>, record: &IncidentRecord) -> f64 {
    let text = [
        record.title.as_str(),
        &record.summary,
        &record.root_cause,
        &record.resolution,
        &record.tags.join(" "),
    ]
    .join(" ");
    let candidate_terms = tokenize(&text);

    let overlap = query_terms.intersection(&candidate_terms).count();
    if overlap == 0 {
        return 0.0;
    }
    let ratio = overlap as f64 / query_terms.len() as f64;
    (ratio * 1_000_000.0).round() / 1_000_000.0
}

/// Lowercase `[a-z0-9]+` tokens
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryIncidentStore;
    use chrono::Utc;

    async fn seeded() -> Arc<dyn IncidentStore> {
        let store = Arc::new(MemoryIncidentStore::new());
        let mut gpu = IncidentRecord::new("inc-2", Utc::now(), "GPU VM left running");
        gpu.resolution = "Added auto-shutdown schedule".into();
        gpu.tags = vec!["gpu".into(), "cost".into()];
        store.put(gpu).await.unwrap();

        let mut gpu_twin = IncidentRecord::new("inc-1", Utc::now(), "GPU VM left running");
        gpu_twin.tags = vec!["gpu".into(), "cost".into()];
        store.put(gpu_twin).await.unwrap();

        store
            .put(IncidentRecord::new("inc-3", Utc::now(), "Storage egress spike"))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("GPU-VM /subscriptions/ABC_123 costs!");
        for expected in ["gpu", "vm", "subscriptions", "abc", "123", "costs"] {
            assert!(tokens.contains(expected), "missing {expected}");
        }
        assert_eq!(tokens.len(), 6);
    }

    #[tokio::test]
    async fn test_scores_and_tie_break() {
        let search = LocalIncidentSearch::with_defaults(seeded().await);
        let hits = search.search_similar("gpu vm idle", 5).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "inc-1");
        assert_eq!(hits[1].id, "inc-2");
        assert_eq!(hits[0].score, 0.666667);
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_k() {
        let search = LocalIncidentSearch::with_defaults(seeded().await);
        assert!(search.search_similar("!!!", 5).await.unwrap().is_empty());
        assert!(search.search_similar("gpu", 0).await.unwrap().is_empty());
        assert_eq!(search.search_similar("gpu", 1).await.unwrap().len(), 1);
    }
}
