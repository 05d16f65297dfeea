//! Read-through cache over the fallback resolver.
//!
//! Reads go hot → durable (within a per-type staleness bound) → upstream.
//! Upstream results are written to the durable store first and then to the
//! hot cache; a durable write failure leaves both untouched. Concurrent reads
//! of the same key share one upstream call.

pub mod durable;
pub mod entry;
pub mod file_store;
pub mod hot;

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::observability::metrics::CACHE_LOOKUPS;
use crate::sources::{Resolved, Resolver};
use crate::types::ids::Symbol;
use crate::types::instrument::{DataType, Instrument};

pub use durable::{DurableStore, MemoryDurableStore};
pub use entry::{CacheEntry, CacheLookup, CacheOrigin, DataKey};
pub use file_store::FileDurableStore;
pub use hot::HotCache;

type InFlight = DashMap<DataKey, Shared<BoxFuture<'static, Result<CacheEntry>>>>;

pub struct CacheLayer {
    resolver: Arc<Resolver>,
    durable: Arc<dyn DurableStore>,
    hot: Arc<HotCache>,
    in_flight: Arc<InFlight>,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(resolver: Arc<Resolver>, durable: Arc<dyn DurableStore>, config: CacheConfig) -> Self {
        CacheLayer {
            resolver,
            durable,
            hot: Arc::new(HotCache::new(config.hot_capacity)),
            in_flight: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn hot(&self) -> &HotCache {
        &self.hot
    }

    pub async fn get(&self, instrument: &Instrument, data_type: DataType) -> Result<CacheLookup> {
        let key = DataKey::new(instrument.symbol.clone(), data_type);

        if let Some(entry) = self.hot.get(&key) {
            return Ok(self.lookup(entry, CacheOrigin::Hot));
        }

        if let Some(entry) = self.durable.latest(&key).await? {
            let now = Utc::now();
            let age = entry.age(now);
            if age <= self.config.max_durable_age(data_type) {
                self.hot.insert(entry.clone(), entry.remaining_ttl(now));
                return Ok(self.lookup(entry, CacheOrigin::Durable { age }));
            }
            tracing::debug!("Durable {} is {:?} old, refetching", key, age);
        }

        self.fetch_coalesced(instrument, key).await
    }

    /// Write-through of a freshly resolved value. `ttl` defaults to the
    /// configured lifetime for the payload's data type.
    pub async fn put(&self, symbol: Symbol, resolved: Resolved, ttl: Option<Duration>) -> Result<CacheEntry> {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl(resolved.payload().data_type()));
        let entry = CacheEntry::from_resolved(symbol, resolved, ttl);
        write_through(self.durable.as_ref(), &self.hot, entry).await
    }

    /// Durable entries for `key` fetched within `[from, to]`, oldest first.
    pub async fn get_durable(
        &self,
        key: &DataKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>> {
        self.durable.range(key, from, to).await
    }

    /// Trims the durable log for `key` to the configured retention.
    pub async fn compact_durable(&self, key: &DataKey) -> Result<usize> {
        self.durable.compact(key, self.config.durable_retention.max(1)).await
    }

    fn lookup(&self, entry: CacheEntry, origin: CacheOrigin) -> CacheLookup {
        CACHE_LOOKUPS.with_label_values(&[origin.as_str()]).inc();
        CacheLookup { entry, origin }
    }

    async fn fetch_coalesced(&self, instrument: &Instrument, key: DataKey) -> Result<CacheLookup> {
        let ttl = self.config.ttl(key.data_type);
        let (fetch, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) => (running.get().clone(), false),
            Entry::Vacant(slot) => {
                let fetch = fetch_upstream(
                    self.resolver.clone(),
                    self.durable.clone(),
                    self.hot.clone(),
                    self.in_flight.clone(),
                    instrument.clone(),
                    key,
                    ttl,
                )
                .boxed()
                .shared();
                slot.insert(fetch.clone());
                (fetch, true)
            }
        };

        let entry = fetch.await?;
        let origin = if leader { CacheOrigin::Upstream } else { CacheOrigin::Coalesced };
        Ok(self.lookup(entry, origin))
    }
}

async fn fetch_upstream(
    resolver: Arc<Resolver>,
    durable: Arc<dyn DurableStore>,
    hot: Arc<HotCache>,
    in_flight: Arc<InFlight>,
    instrument: Instrument,
    key: DataKey,
    ttl: Duration,
) -> Result<CacheEntry> {
    let result = match resolver.resolve(&instrument, key.data_type).await {
        Ok(resolved) => {
            let entry = CacheEntry::from_resolved(instrument.symbol.clone(), resolved, ttl);
            write_through(durable.as_ref(), &hot, entry).await
        }
        Err(e) => Err(e),
    };

    in_flight.remove(&key);
    result
}

async fn write_through(durable: &dyn DurableStore, hot: &HotCache, entry: CacheEntry) -> Result<CacheEntry> {
    durable.append(&entry).await.inspect_err(|e| {
        tracing::error!("Durable write failed for {}: {}", entry.key(), e);
    })?;
    hot.insert(entry.clone(), entry.ttl());
    Ok(entry)
}
