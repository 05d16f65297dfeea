use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::sources::Resolved;
use crate::types::ids::{SourceId, Symbol};
use crate::types::instrument::DataType;
use crate::types::observation::Payload;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataKey {
    pub symbol: Symbol,
    pub data_type: DataType,
}

impl DataKey {
    pub fn new(symbol: Symbol, data_type: DataType) -> Self {
        DataKey { symbol, data_type }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.data_type)
    }
}

/// A fetched value with its true fetch time and attribution.
///
/// The only constructor takes a [`Resolved`], which only the resolver can
/// produce after a provider call succeeded, so an entry always traces back to
/// a real fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    key: DataKey,
    payload: Payload,
    source: SourceId,
    fetched_at: DateTime<Utc>,
    ttl_secs: u64,
    latency_ms: u64,
}

impl CacheEntry {
    pub fn from_resolved(symbol: Symbol, resolved: Resolved, ttl: Duration) -> Self {
        let (payload, source, fetched_at, latency) = resolved.into_parts();
        CacheEntry {
            key: DataKey::new(symbol, payload.data_type()),
            payload,
            source,
            fetched_at,
            ttl_secs: ttl.as_secs(),
            latency_ms: latency.as_millis() as u64,
        }
    }

    pub fn key(&self) -> &DataKey {
        &self.key
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Hot lifetime left, measured from the real fetch time.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        self.ttl().saturating_sub(self.age(now))
    }
}

/// Which layer answered a cache read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOrigin {
    Hot,
    Durable { age: Duration },
    Upstream,
    /// Joined a fetch another caller had already started.
    Coalesced,
}

impl CacheOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOrigin::Hot => "hot",
            CacheOrigin::Durable { .. } => "durable",
            CacheOrigin::Upstream => "upstream",
            CacheOrigin::Coalesced => "coalesced",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheLookup {
    pub entry: CacheEntry,
    pub origin: CacheOrigin,
}
