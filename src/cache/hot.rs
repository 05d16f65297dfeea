use std::time::Duration;
use dashmap::DashMap;
use tokio::time::Instant;
use crate::cache::entry::{CacheEntry, DataKey};

struct HotEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// Short-lived most-recent values, bounded in size.
pub struct HotCache {
    entries: DashMap<DataKey, HotEntry>,
    capacity: usize,
}

impl HotCache {
    pub fn new(capacity: usize) -> Self {
        HotCache {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &DataKey) -> Option<CacheEntry> {
        let now = Instant::now();
        if let Some(hot) = self.entries.get(key) {
            if hot.expires_at > now {
                return Some(hot.entry.clone());
            }
        }
        self.entries.remove_if(key, |_, hot| hot.expires_at <= now);
        None
    }

    /// Keeps `entry` for `ttl`. A zero ttl is not cached at all.
    pub fn insert(&self, entry: CacheEntry, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let key = entry.key().clone();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_soonest_expiry();
            }
        }

        self.entries.insert(key, HotEntry {
            entry,
            expires_at: Instant::now() + ttl,
        });
    }

    pub fn invalidate(&self, key: &DataKey) {
        self.entries.remove(key);
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, hot| hot.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn evict_soonest_expiry(&self) {
        let victim = self.entries.iter()
            .min_by_key(|hot| hot.expires_at)
            .map(|hot| hot.key().clone());

        if let Some(key) = victim {
            tracing::debug!("Evicting {} from hot cache", key);
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::sources::Resolved;
    use crate::types::ids::{SourceId, Symbol};
    use crate::types::observation::{Observation, Payload};

    fn entry(symbol: &str) -> CacheEntry {
        let obs = Observation::new(Symbol::from(symbol), Utc::now(), 10.0, SourceId::from("p1")).unwrap();
        CacheEntry::from_resolved(
            Symbol::from(symbol),
            Resolved::fixture(Payload::Quote(obs), "p1", Utc::now()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = HotCache::new(8);
        let e = entry("AAA");
        let key = e.key().clone();

        cache.insert(e, Duration::from_secs(30));
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_soonest_expiry() {
        let cache = HotCache::new(2);
        let (a, b, c) = (entry("AAA"), entry("BBB"), entry("CCC"));
        let (ka, kb, kc) = (a.key().clone(), b.key().clone(), c.key().clone());

        cache.insert(a, Duration::from_secs(10));
        cache.insert(b, Duration::from_secs(100));
        cache.insert(c, Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ka).is_none());
        assert!(cache.get(&kb).is_some());
        assert!(cache.get(&kc).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_counts_removed() {
        let cache = HotCache::new(8);
        cache.insert(entry("AAA"), Duration::from_secs(5));
        cache.insert(entry("BBB"), Duration::from_secs(500));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_cached() {
        let cache = HotCache::new(8);
        cache.insert(entry("AAA"), Duration::ZERO);
        assert!(cache.is_empty());
    }
}
