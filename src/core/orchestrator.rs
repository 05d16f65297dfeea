use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use im::Vector;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::Instrument as _;
use crate::cache::{CacheEntry, CacheLayer, DataKey, DurableStore};
use crate::config::AppConfig;
use crate::core::cycle::{Cycle, FetchSummary, Stage, SymbolReport, TierOutcome, TierOutcomes};
use crate::core::publisher::ArtifactWriter;
use crate::core::status::{PipelineStatus, ProviderStatus};
use crate::error::{Error, Result};
use crate::observability::metrics::{CYCLES, CYCLE_DURATION, OPPORTUNITIES_PUBLISHED};
use crate::observability::tracing::cycle_span;
use crate::signals::{
    ConfluenceScore, ConfluenceScorer, OpportunitySelector, PositioningAnalyzer,
    PositioningReading, SeasonalityAnalyzer, SeasonalityProfile, SymbolState,
};
use crate::sources::{AdapterRegistry, HealthBoard, RateLimiter, Resolver};
use crate::types::ids::{CycleId, RunId};
use crate::types::instrument::{DataType, Instrument};
use crate::types::observation::{Observation, Payload, PositioningRecord};

/// Everything the orchestrator owns between cycles.
struct PipelineState {
    phase: Stage,
    next_id: CycleId,
    running: Option<CycleId>,
    latest: Option<Arc<Cycle>>,
    history: Vector<Arc<Cycle>>,
    cycle_count: u64,
    published_count: u64,
    last_cycle_failed: bool,
    failed_tier: Option<Stage>,
    last_error: Option<String>,
    last_outcomes: TierOutcomes,
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState {
            phase: Stage::Idle,
            next_id: CycleId(1),
            running: None,
            latest: None,
            history: Vector::new(),
            cycle_count: 0,
            published_count: 0,
            last_cycle_failed: false,
            failed_tier: None,
            last_error: None,
            last_outcomes: TierOutcomes::default(),
        }
    }
}

/// A cycle aborted in `stage`.
struct StageFailure {
    stage: Stage,
    error: Error,
}

fn failed_in(stage: Stage) -> impl Fn(Error) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Runs the fetch phase and the four tiers, and owns the published history.
///
/// At most one cycle runs at a time. A cycle either publishes completely or
/// leaves the previously published cycle in place.
pub struct Orchestrator {
    instruments: Vec<Instrument>,
    cache: Arc<CacheLayer>,
    positioning: PositioningAnalyzer,
    seasonality: SeasonalityAnalyzer,
    scorer: ConfluenceScorer,
    selector: OpportunitySelector,
    fetch_concurrency: usize,
    retention: usize,
    artifacts: Option<ArtifactWriter>,
    state: RwLock<PipelineState>,
    run_lock: Mutex<()>,
    trigger: Notify,
    shutdown: watch::Receiver<bool>,
    started_at: Instant,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, cache: Arc<CacheLayer>, shutdown: watch::Receiver<bool>) -> Self {
        let mut instruments = config.instruments.clone();
        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        instruments.dedup_by(|a, b| a.symbol == b.symbol);

        let scorer = ConfluenceScorer::new(config.confluence.clone());
        let selector = OpportunitySelector::new(scorer.floor(), config.selection.clone());

        Orchestrator {
            instruments,
            cache,
            positioning: PositioningAnalyzer::new(config.positioning.clone()),
            seasonality: SeasonalityAnalyzer::new(config.seasonality.clone()),
            scorer,
            selector,
            fetch_concurrency: config.scheduler.fetch_concurrency.max(1),
            retention: config.artifacts.history_retention.max(1),
            artifacts: None,
            state: RwLock::new(PipelineState::default()),
            run_lock: Mutex::new(()),
            trigger: Notify::new(),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Wires adapters, limiter, health board, resolver and cache from config.
    pub fn from_config(
        config: &AppConfig,
        registry: AdapterRegistry,
        durable: Arc<dyn DurableStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(
            config.enabled_providers().map(|p| (p.id.clone(), p.rate_limit)),
        ));
        let health = Arc::new(HealthBoard::new(
            registry.ids().cloned().collect::<Vec<_>>(),
            config.resolver.failure_threshold,
            config.resolver.cooldown(),
        ));
        let resolver = Arc::new(Resolver::new(registry, &config.routes, limiter, health, &config.resolver)?);
        let cache = Arc::new(CacheLayer::new(resolver, durable, config.cache.clone()));

        Ok(Self::new(config, cache, shutdown))
    }

    pub fn with_artifacts(mut self, writer: ArtifactWriter) -> Self {
        self.artifacts = Some(writer);
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn artifacts(&self) -> Option<&ArtifactWriter> {
        self.artifacts.as_ref()
    }

    /// Adopts a previously published cycle, e.g. the artifact on disk at startup.
    pub async fn restore(&self, cycle: Cycle) {
        let mut state = self.state.write().await;
        state.next_id = state.next_id.max(cycle.id.next());

        let cycle = Arc::new(cycle);
        state.history.push_back(cycle.clone());
        while state.history.len() > self.retention {
            state.history.pop_front();
        }
        tracing::info!("Restored published cycle {}", cycle.id);
        state.latest = Some(cycle);
    }

    pub async fn get_latest_cycle(&self) -> Result<Arc<Cycle>> {
        self.state.read().await.latest.clone().ok_or(Error::NoPublishedCycle)
    }

    /// A retained cycle from memory, else its artifact on disk if one was
    /// kept longer than the in-memory history.
    pub async fn get_cycle(&self, id: CycleId) -> Result<Option<Arc<Cycle>>> {
        if let Some(cycle) = self.state.read().await.history.iter().find(|c| c.id == id) {
            return Ok(Some(cycle.clone()));
        }
        match &self.artifacts {
            Some(writer) => Ok(writer.load_cycle(id).await?.map(Arc::new)),
            None => Ok(None),
        }
    }

    /// Ids of retained published cycles, oldest first.
    pub async fn history_ids(&self) -> Vec<CycleId> {
        self.state.read().await.history.iter().map(|c| c.id).collect()
    }

    pub async fn status(&self) -> PipelineStatus {
        let state = self.state.read().await;
        let resolver = self.cache.resolver();

        PipelineStatus {
            cycle_count: state.cycle_count,
            published_count: state.published_count,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            phase: state.phase,
            running_cycle: state.running,
            last_success_id: state.latest.as_ref().map(|c| c.id),
            last_success_time: state.latest.as_ref().map(|c| c.finished_at),
            last_cycle_failed: state.last_cycle_failed,
            failed_tier: state.failed_tier.map(|stage| stage.to_string()),
            last_error: state.last_error.clone(),
            tier_outcomes: state.last_outcomes.clone(),
            providers: ProviderStatus::collect(resolver.health(), resolver.limiter()),
            ledger_records: resolver.ledger().len(),
            ledger_evicted: resolver.ledger().evicted(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    #[cfg(test)]
    pub(crate) fn hold_run_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.run_lock.try_lock().unwrap()
    }

    /// Asks the scheduler for an immediate cycle. Requests made while one is
    /// pending collapse into a single run.
    pub fn request_run(&self) {
        self.trigger.notify_one();
    }

    pub async fn run_requested(&self) {
        self.trigger.notified().await;
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn run_cycle(&self) -> Result<Arc<Cycle>> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle with tier outputs evaluated as of `as_of`.
    pub async fn run_cycle_at(&self, as_of: DateTime<Utc>) -> Result<Arc<Cycle>> {
        let _running = self.run_lock.try_lock().map_err(|_| Error::CycleInProgress)?;
        if self.shutdown_requested() {
            return Err(Error::ShutdownRequested);
        }

        let run_id = RunId::new();
        let cycle_id = {
            let mut state = self.state.write().await;
            let id = state.next_id;
            state.next_id = id.next();
            state.running = Some(id);
            state.cycle_count += 1;
            state.last_outcomes = TierOutcomes::default();
            id
        };

        let started = Instant::now();
        let result = self.execute(cycle_id, run_id, as_of)
            .instrument(cycle_span(cycle_id, run_id))
            .await;
        CYCLE_DURATION.observe(started.elapsed().as_secs_f64());

        match result {
            Ok(cycle) => {
                let cycle = self.commit(cycle).await;
                self.compact_durable().await;
                Ok(cycle)
            }
            Err(failure) => Err(self.abandon(cycle_id, failure).await),
        }
    }

    /// Runs under the run lock, so no tier is reading the logs it trims.
    /// Failures only cost disk space and are logged.
    async fn compact_durable(&self) {
        let mut dropped = 0;
        for instrument in &self.instruments {
            for data_type in instrument.data_types() {
                let key = DataKey::new(instrument.symbol.clone(), data_type);
                match self.cache.compact_durable(&key).await {
                    Ok(n) => dropped += n,
                    Err(e) => tracing::warn!("Durable compaction of {} failed: {}", key, e),
                }
            }
        }
        if dropped > 0 {
            tracing::debug!("Compacted {} durable entries", dropped);
        }
    }

    async fn execute(
        &self,
        cycle_id: CycleId,
        run_id: RunId,
        as_of: DateTime<Utc>,
    ) -> std::result::Result<Cycle, StageFailure> {
        let started_at = Utc::now();
        tracing::info!("Cycle {} started, {} instruments, as of {}", cycle_id, self.instruments.len(), as_of);

        self.enter(Stage::FetchingData).await;
        let fetch = self.fetch_all().await.map_err(failed_in(Stage::FetchingData))?;
        tracing::info!(
            "Fetched {}/{} keys ({} failed)",
            fetch.succeeded, fetch.requested, fetch.failed
        );
        self.checkpoint(Stage::FetchingData)?;

        self.enter(Stage::Tier1).await;
        let positioning = self.run_tier1(as_of.date_naive()).await.map_err(failed_in(Stage::Tier1))?;
        let tier1 = TierOutcome::tally(&positioning);
        self.record_outcomes(|o| o.tier1 = tier1).await;
        self.checkpoint(Stage::Tier1)?;

        self.enter(Stage::Tier2).await;
        let seasonality = self.run_tier2(as_of).await.map_err(failed_in(Stage::Tier2))?;
        let tier2 = TierOutcome::tally(&seasonality);
        self.record_outcomes(|o| o.tier2 = tier2).await;
        self.checkpoint(Stage::Tier2)?;

        self.enter(Stage::Tier3).await;
        let confluence: Vec<SymbolState<ConfluenceScore>> = self.instruments.iter()
            .zip(positioning.iter().zip(seasonality.iter()))
            .map(|(instrument, (pos, season))| self.scorer.score(&instrument.symbol, pos, season, as_of))
            .collect();
        let tier3 = TierOutcome::tally(&confluence);
        self.record_outcomes(|o| o.tier3 = tier3).await;
        self.checkpoint(Stage::Tier3)?;

        self.enter(Stage::Tier4).await;
        let opportunities = self.selector.select(
            cycle_id,
            confluence.iter().filter_map(SymbolState::valid),
        );
        let selected = opportunities.len();
        self.record_outcomes(|o| o.tier4_selected = selected).await;
        self.checkpoint(Stage::Tier4)?;

        let outcomes = self.state.read().await.last_outcomes.clone();
        let symbols = self.instruments.iter()
            .zip(positioning.into_iter().zip(seasonality).zip(confluence))
            .map(|(instrument, ((positioning, seasonality), confluence))| SymbolReport {
                symbol: instrument.symbol.clone(),
                positioning,
                seasonality,
                confluence,
            })
            .collect();

        let cycle = Cycle {
            id: cycle_id,
            run_id,
            as_of,
            started_at,
            finished_at: Utc::now(),
            fetch,
            outcomes,
            symbols,
            opportunities,
            checksum: String::new(),
        }
        .seal();

        self.enter(Stage::Published).await;
        if let Some(writer) = &self.artifacts {
            writer.publish(&cycle).await.map_err(failed_in(Stage::Published))?;
        }

        Ok(cycle)
    }

    async fn commit(&self, cycle: Cycle) -> Arc<Cycle> {
        let cycle = Arc::new(cycle);
        let mut state = self.state.write().await;

        state.latest = Some(cycle.clone());
        state.history.push_back(cycle.clone());
        while state.history.len() > self.retention {
            state.history.pop_front();
        }
        state.published_count += 1;
        state.running = None;
        state.last_cycle_failed = false;
        state.failed_tier = None;
        state.last_error = None;
        state.phase = Stage::Idle;

        CYCLES.with_label_values(&["published"]).inc();
        OPPORTUNITIES_PUBLISHED.set(cycle.opportunities.len() as i64);
        tracing::info!(
            "Published cycle {} with {} opportunities",
            cycle.id, cycle.opportunities.len()
        );
        cycle
    }

    async fn abandon(&self, cycle_id: CycleId, failure: StageFailure) -> Error {
        let mut state = self.state.write().await;
        state.running = None;

        if matches!(failure.error, Error::ShutdownRequested) {
            state.phase = Stage::Idle;
            CYCLES.with_label_values(&["abandoned"]).inc();
            tracing::info!("Cycle {} abandoned after {} for shutdown", cycle_id, failure.stage);
            return Error::ShutdownRequested;
        }

        let reason = failure.error.to_string();
        state.phase = Stage::Failed;
        state.last_cycle_failed = true;
        state.failed_tier = Some(failure.stage);
        state.last_error = Some(reason.clone());

        CYCLES.with_label_values(&["failed"]).inc();
        tracing::error!(
            "Cycle {} failed in {}: {}; cycle {} remains published",
            cycle_id,
            failure.stage,
            reason,
            state.latest.as_ref().map(|c| c.id.to_string()).unwrap_or_else(|| "none".to_string())
        );

        Error::CycleFailed {
            cycle_id,
            stage: failure.stage.to_string(),
            reason,
        }
    }

    async fn enter(&self, next: Stage) {
        let mut state = self.state.write().await;
        if !state.phase.can_transition_to(next) {
            tracing::warn!("Unexpected phase change {} -> {}", state.phase, next);
        }
        tracing::debug!("Entering {}", next);
        state.phase = next;
    }

    async fn record_outcomes(&self, update: impl FnOnce(&mut TierOutcomes)) {
        update(&mut self.state.write().await.last_outcomes);
    }

    /// In-flight work of a phase is allowed to finish; the next phase is not started.
    fn checkpoint(&self, completed: Stage) -> std::result::Result<(), StageFailure> {
        if self.shutdown_requested() {
            return Err(StageFailure {
                stage: completed,
                error: Error::ShutdownRequested,
            });
        }
        Ok(())
    }

    async fn fetch_all(&self) -> Result<FetchSummary> {
        let requests: Vec<(&Instrument, DataType)> = self.instruments.iter()
            .flat_map(|instrument| {
                instrument.data_types().into_iter().map(move |data_type| (instrument, data_type))
            })
            .collect();

        let mut summary = FetchSummary {
            requested: requests.len(),
            ..FetchSummary::default()
        };

        let fetches: Vec<_> = requests.into_iter()
            .map(|(instrument, data_type)| async move {
                let result = self.cache.get(instrument, data_type).await;
                (instrument, data_type, result)
            })
            .collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        for (instrument, data_type, result) in results {
            match result {
                Ok(lookup) => {
                    summary.succeeded += 1;
                    *summary.by_origin.entry(lookup.origin.as_str().to_string()).or_default() += 1;
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("No fresh {} for {}: {}", data_type, instrument.symbol, e);
                }
            }
        }

        Ok(summary)
    }

    async fn run_tier1(&self, as_of: NaiveDate) -> Result<Vec<SymbolState<PositioningReading>>> {
        let lookups: Vec<_> = self.instruments.iter()
            .map(|instrument| self.positioning_for(instrument, as_of))
            .collect();
        stream::iter(lookups)
            .buffered(self.fetch_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }

    async fn positioning_for(
        &self,
        instrument: &Instrument,
        as_of: NaiveDate,
    ) -> Result<SymbolState<PositioningReading>> {
        if instrument.report_code.is_none() {
            return Ok(SymbolState::Indeterminate {
                reason: "no positioning report configured".to_string(),
            });
        }

        let mut by_date: BTreeMap<NaiveDate, PositioningRecord> = BTreeMap::new();
        for entry in self.durable_history(instrument, DataType::Positioning).await? {
            if let Payload::Positioning(reports) = entry.payload() {
                for report in reports {
                    by_date.insert(report.report_date, report.clone());
                }
            }
        }

        let reports: Vec<PositioningRecord> = by_date.into_values().collect();
        Ok(self.positioning.analyze(&instrument.symbol, &reports, as_of))
    }

    async fn run_tier2(&self, as_of: DateTime<Utc>) -> Result<Vec<SymbolState<SeasonalityProfile>>> {
        let lookups: Vec<_> = self.instruments.iter()
            .map(|instrument| self.seasonality_for(instrument, as_of))
            .collect();
        stream::iter(lookups)
            .buffered(self.fetch_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }

    async fn seasonality_for(
        &self,
        instrument: &Instrument,
        as_of: DateTime<Utc>,
    ) -> Result<SymbolState<SeasonalityProfile>> {
        let mut by_time: BTreeMap<DateTime<Utc>, Observation> = BTreeMap::new();
        for entry in self.durable_history(instrument, DataType::History).await? {
            if let Payload::History(bars) = entry.payload() {
                for bar in bars {
                    by_time.insert(bar.timestamp, bar.clone());
                }
            }
        }

        let history: Vec<Observation> = by_time.into_values().collect();
        Ok(self.seasonality.analyze(&instrument.symbol, &history, as_of))
    }

    /// Every durable entry for the key, oldest fetch first so later fetches
    /// win when merged.
    async fn durable_history(&self, instrument: &Instrument, data_type: DataType) -> Result<Vec<CacheEntry>> {
        let key = DataKey::new(instrument.symbol.clone(), data_type);
        self.cache.get_durable(&key, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await
    }
}
