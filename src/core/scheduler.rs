use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use crate::config::SchedulerConfig;
use crate::core::orchestrator::Orchestrator;
use crate::error::Error;
use crate::utils::helper::next_aligned_run;

/// Fires cycles on a wall-clock grid (`anchor + k * interval`) and on
/// manual request, until shutdown is signalled.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    anchor: DateTime<Utc>,
    interval: Duration,
    run_on_start: bool,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &SchedulerConfig) -> Self {
        Scheduler {
            orchestrator,
            anchor: config.anchor,
            interval: config.interval(),
            run_on_start: config.run_on_start,
        }
    }

    pub async fn run(self) {
        let mut shutdown = self.orchestrator.shutdown_signal();

        if self.run_on_start && !*shutdown.borrow() {
            self.run_once("startup").await;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let next = next_aligned_run(self.anchor, self.interval, now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!("Next scheduled cycle at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => self.run_once("schedule").await,
                _ = self.orchestrator.run_requested() => self.run_once("manual trigger").await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    async fn run_once(&self, reason: &str) {
        match self.orchestrator.run_cycle().await {
            Ok(cycle) => tracing::info!("Cycle {} ({}) published", cycle.id, reason),
            Err(Error::CycleInProgress) => tracing::debug!("Skipping {} run: cycle in progress", reason),
            Err(Error::ShutdownRequested) => tracing::info!("Skipping {} run: shutting down", reason),
            Err(e) => tracing::warn!("Cycle ({}) did not publish: {}", reason, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orchestrator::tests::orchestrator;
    use crate::types::ids::CycleId;

    #[tokio::test]
    async fn manual_trigger_runs_and_shutdown_stops() {
        let fixtures = tempfile::tempdir().unwrap();
        let (orchestrator, tx) = orchestrator(fixtures.path());
        let orchestrator = Arc::new(orchestrator);

        let config = SchedulerConfig {
            anchor: Utc::now() + chrono::Duration::hours(1),
            interval_secs: 24 * 3600,
            run_on_start: false,
            ..SchedulerConfig::default()
        };
        let handle = tokio::spawn(Scheduler::new(orchestrator.clone(), &config).run());

        orchestrator.request_run();
        let mut published = None;
        for _ in 0..200 {
            if let Ok(cycle) = orchestrator.get_latest_cycle().await {
                published = Some(cycle.id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(published, Some(CycleId(1)));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
