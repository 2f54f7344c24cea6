//! In-memory incident store

use std::collections::HashMap;

use async_trait::async_trait;
use spikehound_core::Result;
use tokio::sync::RwLock;

use crate::{IncidentRecord, IncidentStore};

/// Process-local store; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    records: RwLock<HashMap<String, IncidentRecord>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn put(&self, record: IncidentRecord) -> Result<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, incident_id: &str) -> Result<Option<IncidentRecord>> {
        Ok(self.records.read().await.get(incident_id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<IncidentRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut sorted: Vec<&IncidentRecord> = records.values().collect();
        sorted.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(sorted.into_iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, secs: i64) -> IncidentRecord {
        IncidentRecord::new(id, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(), "title")
    }

    #[tokio::test]
    async fn test_put_replaces_by_id() {
        let store = MemoryIncidentStore::new();
        store.put(record("a", 0)).await.unwrap();
        let mut updated = record("a", 0);
        updated.resolution = "stopped vm".into();
        store.put(updated).await.unwrap();

        assert_eq!(store.len().await, 1);
        let fetched = store.get("a").await.unwrap().unwrap();
        assert_eq!(fetched.resolution, "stopped vm");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recent_order_and_limit() {
        let store = MemoryIncidentStore::new();
        store.put(record("a", 10)).await.unwrap();
        store.put(record("b", 10)).await.unwrap();
        store.put(record("c", 5)).await.unwrap();

        let ids: Vec<String> = store
            .list_recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(store.list_recent(0).await.unwrap().is_empty());
    }
}
