use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::Instrument as _;
use crate::error::{AttemptOutcome, Error, Result, SourceAttempt};
use crate::observability::metrics::PROVIDER_FETCHES;
use crate::observability::tracing::resolve_span;
use crate::sources::adapter::{AdapterRegistry, HistoryRange, SourceAdapter};
use crate::sources::{HealthBoard, RateLimiter, ResolverConfig, RouteConfig};
use crate::types::ids::{SourceId, Symbol};
use crate::types::instrument::{AssetClass, DataType, Instrument};
use crate::types::observation::Payload;

/// A value produced by a real provider fetch. Only the resolver constructs
/// these, and only a `Resolved` can become a cache entry.
#[derive(Clone, Debug)]
pub struct Resolved {
    payload: Payload,
    source: SourceId,
    fetched_at: DateTime<Utc>,
    latency: Duration,
}

impl Resolved {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub(crate) fn into_parts(self) -> (Payload, SourceId, DateTime<Utc>, Duration) {
        (self.payload, self.source, self.fetched_at, self.latency)
    }

    #[cfg(test)]
    pub(crate) fn fixture(payload: Payload, source: &str, fetched_at: DateTime<Utc>) -> Self {
        Resolved {
            payload,
            source: SourceId::from(source),
            fetched_at,
            latency: Duration::from_millis(5),
        }
    }
}

/// Audit record of one successful fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRecord {
    pub symbol: Symbol,
    pub data_type: DataType,
    pub source: SourceId,
    pub fetched_at: DateTime<Utc>,
}

/// Append-only log of successful fetches, bounded to the most recent
/// `capacity` records. Evictions are counted so an audit can tell a missing
/// record from one that aged out.
pub struct FetchLedger {
    records: Mutex<VecDeque<FetchRecord>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl FetchLedger {
    pub fn new(capacity: usize) -> Self {
        FetchLedger {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    fn record(&self, record: FetchRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.capacity {
            records.pop_front();
            if self.evicted.fetch_add(1, Ordering::Relaxed) == 0 {
                tracing::warn!("Fetch ledger full at {} records, evicting oldest", self.capacity);
            }
        }
        records.push_back(record);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn contains(&self, symbol: &Symbol, data_type: DataType, source: &SourceId, fetched_at: DateTime<Utc>) -> bool {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().any(|r| {
            &r.symbol == symbol
                && r.data_type == data_type
                && &r.source == source
                && r.fetched_at == fetched_at
        })
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tries providers in static priority order until one succeeds.
pub struct Resolver {
    registry: AdapterRegistry,
    routes: HashMap<(AssetClass, DataType), Vec<SourceId>>,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthBoard>,
    attempt_timeout: Duration,
    history_years: u32,
    ledger: FetchLedger,
}

impl Resolver {
    pub fn new(
        registry: AdapterRegistry,
        routes: &[RouteConfig],
        limiter: Arc<RateLimiter>,
        health: Arc<HealthBoard>,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let mut table: HashMap<(AssetClass, DataType), Vec<SourceId>> = HashMap::new();

        for route in routes {
            let mut ordered = Vec::with_capacity(route.sources.len());
            for source in &route.sources {
                let Some(adapter) = registry.get(source) else {
                    tracing::warn!(
                        "Route {} {} skips unregistered provider {}",
                        route.asset_class, route.data_type, source
                    );
                    continue;
                };
                if !adapter.capabilities().supports(route.asset_class, route.data_type) {
                    return Err(Error::ConfigError(format!(
                        "provider {} cannot serve {} {}",
                        source, route.asset_class, route.data_type
                    )));
                }
                if !ordered.contains(source) {
                    ordered.push(source.clone());
                }
            }
            table.entry((route.asset_class, route.data_type))
                .or_default()
                .extend(ordered);
        }

        Ok(Resolver {
            registry,
            routes: table,
            limiter,
            health,
            attempt_timeout: config.attempt_timeout(),
            history_years: config.history_years,
            ledger: FetchLedger::new(config.ledger_capacity),
        })
    }

    /// Providers consulted for this asset class and data type, highest priority first.
    pub fn candidates(&self, asset_class: AssetClass, data_type: DataType) -> &[SourceId] {
        self.routes.get(&(asset_class, data_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn ledger(&self) -> &FetchLedger {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<HealthBoard> {
        &self.health
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// First success wins. Rate-limited or cooling-down providers are skipped,
    /// never waited on. Exhaustion is an error, never a substitute value.
    pub async fn resolve(&self, instrument: &Instrument, data_type: DataType) -> Result<Resolved> {
        self.resolve_inner(instrument, data_type)
            .instrument(resolve_span(&instrument.symbol, data_type))
            .await
    }

    async fn resolve_inner(&self, instrument: &Instrument, data_type: DataType) -> Result<Resolved> {
        let candidates = self.candidates(instrument.asset_class, data_type);
        if candidates.is_empty() {
            return Err(Error::NoSourcesConfigured {
                asset_class: instrument.asset_class,
                data_type,
            });
        }

        let mut attempts = Vec::new();

        for source_id in candidates {
            let Some(adapter) = self.registry.get(source_id) else {
                continue;
            };

            if !self.health.is_available(source_id) {
                tracing::debug!("Skipping {}: cooling down", source_id);
                PROVIDER_FETCHES.with_label_values(&[source_id.as_str(), "cooling_down"]).inc();
                attempts.push(SourceAttempt {
                    source_id: source_id.clone(),
                    outcome: AttemptOutcome::CoolingDown,
                });
                continue;
            }

            if !self.limiter.try_acquire(source_id) {
                tracing::debug!("Skipping {}: rate limit window full", source_id);
                PROVIDER_FETCHES.with_label_values(&[source_id.as_str(), "rate_limited"]).inc();
                attempts.push(SourceAttempt {
                    source_id: source_id.clone(),
                    outcome: AttemptOutcome::RateLimited,
                });
                continue;
            }

            let started = Instant::now();
            match self.attempt(adapter.as_ref(), instrument, data_type).await {
                Ok(mut payload) => {
                    let latency = started.elapsed();
                    let latency_ms = latency.as_millis() as u64;
                    payload.stamp_latency(latency_ms);
                    let fetched_at = Utc::now();

                    self.health.record_success(source_id);
                    self.ledger.record(FetchRecord {
                        symbol: instrument.symbol.clone(),
                        data_type,
                        source: source_id.clone(),
                        fetched_at,
                    });
                    PROVIDER_FETCHES.with_label_values(&[source_id.as_str(), "success"]).inc();
                    tracing::debug!(
                        "Resolved {} {} from {} in {}ms",
                        instrument.symbol, data_type, source_id, latency_ms
                    );

                    return Ok(Resolved {
                        payload,
                        source: source_id.clone(),
                        fetched_at,
                        latency,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Provider {} failed for {} {}: {}",
                        source_id, instrument.symbol, data_type, e
                    );
                    if e.is_provider_failure() {
                        self.health.record_failure(source_id, &e.to_string());
                    }
                    PROVIDER_FETCHES.with_label_values(&[source_id.as_str(), "failure"]).inc();
                    attempts.push(SourceAttempt {
                        source_id: source_id.clone(),
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        tracing::warn!(
            "All sources exhausted for {} {} after {} attempts",
            instrument.symbol, data_type, attempts.len()
        );
        Err(Error::AllSourcesExhausted {
            symbol: instrument.symbol.clone(),
            data_type,
            attempts,
        })
    }

    /// One bounded provider call. A hang becomes `UpstreamUnavailable`.
    async fn attempt(
        &self,
        adapter: &dyn SourceAdapter,
        instrument: &Instrument,
        data_type: DataType,
    ) -> Result<Payload> {
        let call = async {
            match data_type {
                DataType::Quote => adapter.fetch_quote(instrument).await.map(Payload::Quote),
                DataType::History => {
                    let range = HistoryRange::years_back(Utc::now().date_naive(), self.history_years);
                    adapter.fetch_history(instrument, range).await.map(Payload::History)
                }
                DataType::Positioning => adapter.fetch_report(instrument).await.map(Payload::Positioning),
            }
        };

        let payload = tokio::time::timeout(self.attempt_timeout, call)
            .await
            .map_err(|_| Error::UpstreamUnavailable(format!(
                "{} timed out after {:?}",
                adapter.source_id(), self.attempt_timeout
            )))??;

        if payload.is_empty() {
            return Err(Error::MalformedPayload(format!(
                "{} returned no {} for {}",
                adapter.source_id(), data_type, instrument.symbol
            )));
        }

        Ok(payload)
    }
}
