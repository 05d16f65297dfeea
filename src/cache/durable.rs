use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use crate::cache::entry::{CacheEntry, DataKey};
use crate::error::{Error, Result};

/// Long-retention store of every fetched entry, used for recomputation and audit.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Commits one entry completely or not at all.
    async fn append(&self, entry: &CacheEntry) -> Result<()>;

    /// Entries for `key` fetched within `[from, to]`, oldest first.
    async fn range(
        &self,
        key: &DataKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>>;

    async fn latest(&self, key: &DataKey) -> Result<Option<CacheEntry>>;

    /// Keeps only the newest `keep_last` entries for `key` and returns how
    /// many were dropped.
    async fn compact(&self, key: &DataKey, keep_last: usize) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}

/// In-process store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryDurableStore {
    entries: DashMap<DataKey, Vec<CacheEntry>>,
    unavailable: AtomicBool,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every call fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored entry, for audits.
    pub fn all_entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().flat_map(|e| e.value().clone()).collect()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn append(&self, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.entry(entry.key().clone()).or_default();
        // keep fetch order even if appends race
        let pos = entries.partition_point(|e| e.fetched_at() <= entry.fetched_at());
        entries.insert(pos, entry.clone());
        Ok(())
    }

    async fn range(
        &self,
        key: &DataKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>> {
        self.check()?;
        Ok(self.entries.get(key)
            .map(|entries| {
                entries.iter()
                    .filter(|e| e.fetched_at() >= from && e.fetched_at() <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, key: &DataKey) -> Result<Option<CacheEntry>> {
        self.check()?;
        Ok(self.entries.get(key).and_then(|entries| entries.last().cloned()))
    }

    async fn compact(&self, key: &DataKey, keep_last: usize) -> Result<usize> {
        self.check()?;
        let Some(mut entries) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let dropped = entries.len().saturating_sub(keep_last);
        entries.drain(..dropped);
        Ok(dropped)
    }

    async fn health_check(&self) -> Result<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::sources::Resolved;
    use crate::types::ids::{SourceId, Symbol};
    use crate::types::observation::{Observation, Payload};

    fn entry_at(fetched_at: DateTime<Utc>) -> CacheEntry {
        let obs = Observation::new(Symbol::from("AAA"), fetched_at, 10.0, SourceId::from("p1")).unwrap();
        CacheEntry::from_resolved(
            Symbol::from("AAA"),
            Resolved::fixture(Payload::Quote(obs), "p1", fetched_at),
            std::time::Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn range_and_latest_follow_fetch_time() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let old = entry_at(now - ChronoDuration::days(3));
        let new = entry_at(now);
        let key = new.key().clone();

        store.append(&new).await.unwrap();
        store.append(&old).await.unwrap();

        assert_eq!(store.latest(&key).await.unwrap().unwrap().fetched_at(), now);
        let recent = store.range(&key, now - ChronoDuration::days(1), now).await.unwrap();
        assert_eq!(recent.len(), 1);
        let all = store.range(&key, now - ChronoDuration::days(7), now).await.unwrap();
        assert!(all[0].fetched_at() < all[1].fetched_at());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = MemoryDurableStore::new();
        let e = entry_at(Utc::now());
        store.set_available(false);

        assert!(matches!(store.append(&e).await, Err(Error::StoreUnavailable(_))));
        assert!(store.latest(e.key()).await.is_err());
        assert!(store.health_check().await.is_err());

        store.set_available(true);
        store.append(&e).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
