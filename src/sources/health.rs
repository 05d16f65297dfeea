use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use crate::types::ids::SourceId;

/// Health of one provider as mutated by the resolver.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProviderHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    #[serde(skip)]
    cooldown_until: Option<Instant>,
}

impl ProviderHealth {
    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Per-provider health records. Never reorders providers, only gates them
/// for a cool-down after repeated failures.
pub struct HealthBoard {
    providers: DashMap<SourceId, ProviderHealth>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl HealthBoard {
    pub fn new(
        sources: impl IntoIterator<Item = SourceId>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        HealthBoard {
            providers: sources.into_iter()
                .map(|id| (id, ProviderHealth::default()))
                .collect(),
            failure_threshold,
            cooldown,
        }
    }

    pub fn is_available(&self, source_id: &SourceId) -> bool {
        self.providers.get(source_id)
            .map(|h| !h.is_cooling_down(Instant::now()))
            .unwrap_or(true)
    }

    pub fn record_success(&self, source_id: &SourceId) {
        let mut health = self.providers.entry(source_id.clone()).or_default();
        health.last_success = Some(Utc::now());
        health.consecutive_failures = 0;
        health.total_successes += 1;
        health.cooldown_until = None;
    }

    pub fn record_failure(&self, source_id: &SourceId, reason: &str) {
        let mut health = self.providers.entry(source_id.clone()).or_default();
        health.last_failure = Some(Utc::now());
        health.last_error = Some(reason.to_string());
        health.consecutive_failures += 1;
        health.total_failures += 1;

        if self.failure_threshold > 0 && health.consecutive_failures >= self.failure_threshold {
            health.cooldown_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                "Provider {} cooling down for {:?} after {} consecutive failures",
                source_id, self.cooldown, health.consecutive_failures
            );
        }
    }

    pub fn get(&self, source_id: &SourceId) -> Option<ProviderHealth> {
        self.providers.get(source_id).map(|h| h.clone())
    }

    pub fn snapshot(&self) -> Vec<(SourceId, ProviderHealth, bool)> {
        let now = Instant::now();
        let mut all: Vec<_> = self.providers.iter()
            .map(|entry| {
                let cooling = entry.value().is_cooling_down(now);
                (entry.key().clone(), entry.value().clone(), cooling)
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cooldown_after_threshold_then_recovers() {
        let p1 = SourceId::from("p1");
        let board = HealthBoard::new([p1.clone()], 2, Duration::from_secs(30));

        board.record_failure(&p1, "HTTP 500");
        assert!(board.is_available(&p1));
        board.record_failure(&p1, "HTTP 500");
        assert!(!board.is_available(&p1));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(board.is_available(&p1));
        assert_eq!(board.get(&p1).unwrap().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let p1 = SourceId::from("p1");
        let board = HealthBoard::new([p1.clone()], 3, Duration::from_secs(30));

        board.record_failure(&p1, "timeout");
        board.record_success(&p1);

        let health = board.get(&p1).unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.total_failures, 1);
        assert_eq!(health.total_successes, 1);
        assert!(health.last_success.is_some());
    }
}
