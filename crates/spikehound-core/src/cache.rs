//! Idempotency cache
//!
//! Memory-resident, keyed by alert id. An entry expires once
//! `now - cached_at > ttl`; callers pass `now` so the clock can be injected.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::DEFAULT_IDEMPOTENCY_TTL_SECS;
use crate::findings::InvestigationReport;

/// Cached value with its insertion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyCacheEntry<V> {
    /// Unix epoch seconds
    pub cached_at: i64,
    pub report: V,
}

impl<V> IdempotencyCacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.timestamp() - self.cached_at > ttl.as_secs() as i64
    }
}

/// TTL cache of pipeline reports
#[derive(Debug)]
pub struct IdempotencyCache<V = InvestigationReport> {
    entries: RwLock<HashMap<String, IdempotencyCacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> IdempotencyCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Unexpired value for `alert_id`
    pub fn get(&self, alert_id: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(alert_id) {
            Some(entry) if !entry.is_expired(now, self.ttl) => {
                trace!(alert_id, "Idempotency cache hit");
                Some(entry.report.clone())
            }
            Some(_) => {
                trace!(alert_id, "Idempotency cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, alert_id: impl Into<String>, report: V, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            alert_id.into(),
            IdempotencyCacheEntry {
                cached_at: now.timestamp(),
                report,
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Pruned idempotency cache");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
