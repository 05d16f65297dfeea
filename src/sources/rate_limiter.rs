use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use crate::error::{Error, Result};
use crate::observability::metrics::RATE_LIMIT_DENIALS;
use crate::sources::RateLimitPolicy;
use crate::types::ids::SourceId;

/// Sliding-window call budget for one provider.
struct Window {
    max_calls: usize,
    interval: Duration,
    timestamps: VecDeque<Instant>,
}

impl Window {
    fn new(policy: RateLimitPolicy) -> Self {
        Window {
            max_calls: policy.max_calls as usize,
            interval: policy.window(),
            timestamps: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= self.interval {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_room(&mut self, now: Instant) -> bool {
        self.evict(now);
        self.timestamps.len() < self.max_calls
    }

    /// Time until the oldest call leaves the window.
    fn wait_time(&self, now: Instant) -> Duration {
        self.timestamps.front()
            .map(|&front| self.interval.saturating_sub(now.duration_since(front)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-provider call budgets. Each provider has its own lock so a busy
/// provider never contends with another.
pub struct RateLimiter {
    windows: HashMap<SourceId, Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(policies: impl IntoIterator<Item = (SourceId, RateLimitPolicy)>) -> Self {
        RateLimiter {
            windows: policies.into_iter()
                .map(|(id, policy)| (id, Mutex::new(Window::new(policy))))
                .collect(),
        }
    }

    fn window(&self, source_id: &SourceId) -> Option<MutexGuard<'_, Window>> {
        self.windows.get(source_id)
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether a call to `source_id` would fit in its window right now.
    /// Unknown providers have no budget and are always denied.
    pub fn allow(&self, source_id: &SourceId) -> bool {
        match self.window(source_id) {
            Some(mut window) => window.has_room(Instant::now()),
            None => false,
        }
    }

    pub fn record_call(&self, source_id: &SourceId) {
        if let Some(mut window) = self.window(source_id) {
            let now = Instant::now();
            window.evict(now);
            window.timestamps.push_back(now);
        }
    }

    /// Checks and records under one lock so simultaneous callers cannot
    /// both take the last slot.
    pub fn try_acquire(&self, source_id: &SourceId) -> bool {
        let Some(mut window) = self.window(source_id) else {
            return false;
        };

        let now = Instant::now();
        if !window.has_room(now) {
            drop(window);
            RATE_LIMIT_DENIALS.with_label_values(&[source_id.as_str()]).inc();
            return false;
        }

        window.timestamps.push_back(now);
        true
    }

    /// Bounded-wait mode: waits for a slot if one frees up within `max_wait`.
    pub async fn acquire_within(&self, source_id: &SourceId, max_wait: Duration) -> Result<()> {
        let deadline = Instant::now() + max_wait;

        loop {
            let wait = {
                let mut window = self.window(source_id)
                    .ok_or_else(|| Error::RateLimited(source_id.clone()))?;
                let now = Instant::now();
                if window.has_room(now) {
                    window.timestamps.push_back(now);
                    return Ok(());
                }
                window.wait_time(now)
            };

            if Instant::now() + wait > deadline {
                RATE_LIMIT_DENIALS.with_label_values(&[source_id.as_str()]).inc();
                return Err(Error::RateLimited(source_id.clone()));
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls still available in the current window.
    pub fn remaining(&self, source_id: &SourceId) -> u32 {
        match self.window(source_id) {
            Some(mut window) => {
                window.evict(Instant::now());
                window.max_calls.saturating_sub(window.timestamps.len()) as u32
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter(max_calls: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new([(
            SourceId::from("p1"),
            RateLimitPolicy { max_calls, window_secs },
        )])
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_call_in_window_is_denied_then_allowed_after_window() {
        let limiter = limiter(5, 60);
        let p1 = SourceId::from("p1");

        for i in 0..5 {
            assert!(limiter.try_acquire(&p1), "call {} should be allowed", i + 1);
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert!(!limiter.allow(&p1));
        assert!(!limiter.try_acquire(&p1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow(&p1));
        assert!(limiter.try_acquire(&p1));
    }

    #[tokio::test(start_paused = true)]
    async fn allow_does_not_consume_budget() {
        let limiter = limiter(1, 60);
        let p1 = SourceId::from("p1");

        assert!(limiter.allow(&p1));
        assert!(limiter.allow(&p1));
        limiter.record_call(&p1);
        assert!(!limiter.allow(&p1));
        assert_eq!(limiter.remaining(&p1), 0);
    }

    #[tokio::test]
    async fn unknown_provider_is_denied() {
        let limiter = limiter(5, 60);
        assert!(!limiter.allow(&SourceId::from("ghost")));
        assert!(!limiter.try_acquire(&SourceId::from("ghost")));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_acquires_when_slot_frees_in_time() {
        let limiter = limiter(1, 10);
        let p1 = SourceId::from("p1");

        assert!(limiter.try_acquire(&p1));
        limiter.acquire_within(&p1, Duration::from_secs(15)).await.unwrap();
        assert_eq!(limiter.remaining(&p1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_gives_up_past_deadline() {
        let limiter = limiter(1, 60);
        let p1 = SourceId::from("p1");

        assert!(limiter.try_acquire(&p1));
        let err = limiter.acquire_within(&p1, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn concurrent_callers_never_exceed_budget() {
        let limiter = std::sync::Arc::new(limiter(7, 3600));
        let p1 = SourceId::from("p1");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                let p1 = p1.clone();
                tokio::spawn(async move { limiter.try_acquire(&p1) })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 7);
    }

    proptest! {
        #[test]
        fn max_calls_plus_one_denies_the_last(max_calls in 1u32..50) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            rt.block_on(async {
                let limiter = limiter(max_calls, 60);
                let p1 = SourceId::from("p1");
                for _ in 0..max_calls {
                    assert!(limiter.try_acquire(&p1));
                }
                assert!(!limiter.try_acquire(&p1));

                tokio::time::advance(Duration::from_secs(60)).await;
                assert!(limiter.try_acquire(&p1));
            });
        }
    }
}
