use std::collections::BTreeMap;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use crate::config::SeasonalityConfig;
use crate::signals::{round2, Direction, SymbolState};
use crate::types::ids::Symbol;
use crate::types::observation::Observation;

/// Tier 2 output: statistics of the calendar month containing `as_of`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityProfile {
    pub symbol: Symbol,
    pub month: u32,
    pub mean_return: f64,
    pub win_rate: f64,
    pub sample_size: usize,
    /// 50 is neutral; above favours long, below favours short.
    pub score: f64,
    /// Unsigned strength of the seasonal tendency, 0–100.
    pub alignment: f64,
    pub direction: Direction,
}

pub struct SeasonalityAnalyzer {
    config: SeasonalityConfig,
}

impl SeasonalityAnalyzer {
    pub fn new(config: SeasonalityConfig) -> Self {
        SeasonalityAnalyzer { config }
    }

    pub fn analyze(
        &self,
        symbol: &Symbol,
        history: &[Observation],
        as_of: DateTime<Utc>,
    ) -> SymbolState<SeasonalityProfile> {
        let today = as_of.date_naive();
        let known: Vec<&Observation> = history.iter()
            .filter(|obs| obs.timestamp <= as_of)
            .collect();

        let Some(last_date) = known.iter().map(|obs| obs.date()).max() else {
            return SymbolState::InsufficientHistory {
                available: 0,
                required: self.config.min_samples,
            };
        };

        let age_days = (today - last_date).num_days();
        if age_days > self.config.max_history_age_days {
            return SymbolState::Stale {
                last_observed: last_date,
                overdue_days: age_days - self.config.max_history_age_days,
            };
        }

        let target = today.month();
        let samples: Vec<f64> = self.monthly_returns(&known, (today.year(), target))
            .into_iter()
            .filter(|((_, month), _)| *month == target)
            .map(|(_, ret)| ret)
            .collect();

        if samples.len() < self.config.min_samples {
            return SymbolState::InsufficientHistory {
                available: samples.len(),
                required: self.config.min_samples,
            };
        }

        let n = samples.len() as f64;
        let mean_return = samples.iter().sum::<f64>() / n;
        let ups = samples.iter().filter(|r| **r > 0.0).count();
        let downs = samples.iter().filter(|r| **r < 0.0).count();
        let win_rate = ups as f64 / n;

        let direction = if ups > downs {
            Direction::Long
        } else if downs > ups {
            Direction::Short
        } else if mean_return > 0.0 {
            Direction::Long
        } else if mean_return < 0.0 {
            Direction::Short
        } else {
            Direction::None
        };

        let magnitude = if self.config.return_scale > 0.0 {
            (mean_return.abs() / self.config.return_scale).min(1.0)
        } else {
            0.0
        };
        let consistency = ups.abs_diff(downs) as f64 / n;
        let strength = 0.5 * consistency + 0.5 * magnitude;

        SymbolState::Valid(SeasonalityProfile {
            symbol: symbol.clone(),
            month: target,
            mean_return: (mean_return * 10_000.0).round() / 10_000.0,
            win_rate: round2(win_rate),
            sample_size: samples.len(),
            score: round2(50.0 + 50.0 * strength * direction.sign()),
            alignment: round2(strength * 100.0),
            direction,
        })
    }

    /// First-to-last close return of every completed month before `current`
    /// that has enough closes to count.
    fn monthly_returns(&self, history: &[&Observation], current: (i32, u32)) -> BTreeMap<(i32, u32), f64> {
        let mut months: BTreeMap<(i32, u32), Vec<&Observation>> = BTreeMap::new();
        for obs in history {
            let date = obs.date();
            let bucket = (date.year(), date.month());
            if bucket < current {
                months.entry(bucket).or_default().push(obs);
            }
        }

        months.into_iter()
            .filter(|(_, closes)| closes.len() >= self.config.min_closes_per_month.max(2))
            .filter_map(|(bucket, mut closes)| {
                closes.sort_by_key(|obs| obs.timestamp);
                let first = closes.first()?.price;
                let last = closes.last()?.price;
                Some((bucket, last / first - 1.0))
            })
            .collect()
    }
}
