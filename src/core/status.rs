use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::core::cycle::{Stage, TierOutcomes};
use crate::sources::{ProviderHealth, RateLimiter, HealthBoard};
use crate::types::ids::{CycleId, SourceId};

/// Point-in-time view of the pipeline served to operators.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    /// Cycles started since boot, published or not.
    pub cycle_count: u64,
    pub published_count: u64,
    pub uptime_seconds: u64,
    pub phase: Stage,
    pub running_cycle: Option<CycleId>,
    pub last_success_id: Option<CycleId>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_cycle_failed: bool,
    pub failed_tier: Option<String>,
    pub last_error: Option<String>,
    /// Outcomes of the most recent attempt, filled tier by tier.
    pub tier_outcomes: TierOutcomes,
    pub providers: Vec<ProviderStatus>,
    /// Fetch audit records held, and how many aged out past capacity.
    pub ledger_records: usize,
    pub ledger_evicted: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatus {
    pub id: SourceId,
    pub health: ProviderHealth,
    pub cooling_down: bool,
    pub remaining_calls: u32,
}

impl ProviderStatus {
    pub fn collect(health: &HealthBoard, limiter: &RateLimiter) -> Vec<ProviderStatus> {
        health.snapshot()
            .into_iter()
            .map(|(id, health, cooling_down)| ProviderStatus {
                remaining_calls: limiter.remaining(&id),
                id,
                health,
                cooling_down,
            })
            .collect()
    }
}
