use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use crate::config::{PositioningConfig, PositioningMode};
use crate::signals::{round2, Direction, SymbolState};
use crate::types::ids::Symbol;
use crate::types::observation::PositioningRecord;

/// A percentile needs at least one other report to rank against.
const MIN_RANKED_REPORTS: usize = 2;

/// Tier 1 output for one symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositioningReading {
    pub symbol: Symbol,
    pub report_date: NaiveDate,
    pub net_position: f64,
    /// Percentile rank of the latest net position within the window, 0–100.
    pub index: f64,
    /// Distance of the index from neutral, 0–100.
    pub extremity: f64,
    pub bias: Direction,
    pub window_len: usize,
}

pub struct PositioningAnalyzer {
    config: PositioningConfig,
}

impl PositioningAnalyzer {
    pub fn new(config: PositioningConfig) -> Self {
        PositioningAnalyzer { config }
    }

    fn required(&self) -> usize {
        self.config.min_periods.max(MIN_RANKED_REPORTS)
    }

    pub fn analyze(
        &self,
        symbol: &Symbol,
        reports: &[PositioningRecord],
        as_of: NaiveDate,
    ) -> SymbolState<PositioningReading> {
        let mut known: Vec<&PositioningRecord> = reports.iter()
            .filter(|r| r.report_date <= as_of)
            .collect();
        known.sort_by_key(|r| r.report_date);
        // a re-published report replaces the earlier copy
        known.dedup_by(|later, earlier| {
            if later.report_date == earlier.report_date {
                *earlier = *later;
                true
            } else {
                false
            }
        });

        let required = self.required();
        if known.len() < required {
            return SymbolState::InsufficientHistory {
                available: known.len(),
                required,
            };
        }

        let Some(latest) = known.last() else {
            return SymbolState::InsufficientHistory { available: 0, required };
        };

        let due = latest.report_date + Duration::days(self.config.report_cadence_days);
        let deadline = due + Duration::days(self.config.overdue_grace_days);
        if as_of > deadline {
            return SymbolState::Stale {
                last_observed: latest.report_date,
                overdue_days: (as_of - due).num_days(),
            };
        }

        let start = known.len().saturating_sub(self.config.window.max(required));
        let window: Vec<f64> = known[start..].iter().map(|r| r.net_position()).collect();
        let current = latest.net_position();
        let index = percentile_rank(&window, current);
        let extremity = (index - 50.0).abs() * 2.0;

        SymbolState::Valid(PositioningReading {
            symbol: symbol.clone(),
            report_date: latest.report_date,
            net_position: current,
            index: round2(index),
            extremity: round2(extremity),
            bias: self.bias(index),
            window_len: window.len(),
        })
    }

    fn bias(&self, index: f64) -> Direction {
        let deviation = index - 50.0;
        if deviation.abs() <= self.config.neutral_band {
            return Direction::None;
        }

        let crowd = if deviation > 0.0 { Direction::Long } else { Direction::Short };
        match (self.config.mode, crowd) {
            (PositioningMode::Confirming, crowd) => crowd,
            (PositioningMode::Contrarian, Direction::Long) => Direction::Short,
            (PositioningMode::Contrarian, _) => Direction::Long,
        }
    }
}

/// Mid-rank percentile of `value` within `window`: 0 when it is the unique
/// minimum, 100 when it is the unique maximum.
pub fn percentile_rank(window: &[f64], value: f64) -> f64 {
    if window.len() < 2 {
        return 50.0;
    }
    let below = window.iter().filter(|v| **v < value).count() as f64;
    let equal = window.iter().filter(|v| **v == value).count() as f64;
    let ties_excluding_self = (equal - 1.0).max(0.0);

    ((below + 0.5 * ties_excluding_self) / (window.len() as f64 - 1.0) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::SourceId;

    fn weekly(count: usize, last: NaiveDate, net: impl Fn(usize) -> f64) -> Vec<PositioningRecord> {
        (0..count)
            .map(|i| {
                let date = last - Duration::weeks((count - 1 - i) as i64);
                let n = net(i);
                let (long, short) = if n >= 0.0 { (n + 1000.0, 1000.0) } else { (1000.0, 1000.0 - n) };
                PositioningRecord::new(Symbol::from("GOLD"), date, long, short, SourceId::from("cftc")).unwrap()
            })
            .collect()
    }

    fn analyzer() -> PositioningAnalyzer {
        PositioningAnalyzer::new(PositioningConfig::default())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn ten_of_twenty_six_is_insufficient() {
        let last = date(2024, 3, 5);
        let reports = weekly(10, last, |i| i as f64);

        let state = analyzer().analyze(&Symbol::from("GOLD"), &reports, last);
        assert_eq!(state, SymbolState::InsufficientHistory { available: 10, required: 26 });
    }

    #[test]
    fn single_report_is_never_ranked() {
        let config = PositioningConfig { window: 1, min_periods: 1, ..PositioningConfig::default() };
        let last = date(2024, 3, 5);
        let reports = weekly(1, last, |_| 500.0);

        let state = PositioningAnalyzer::new(config).analyze(&Symbol::from("GOLD"), &reports, last);
        assert_eq!(state, SymbolState::InsufficientHistory { available: 1, required: 2 });
    }

    #[test]
    fn record_high_reads_as_contrarian_short() {
        let last = date(2024, 3, 5);
        let reports = weekly(30, last, |i| i as f64 * 100.0);

        let state = analyzer().analyze(&Symbol::from("GOLD"), &reports, last + Duration::days(3));
        let reading = state.valid().unwrap();
        assert_eq!(reading.index, 100.0);
        assert_eq!(reading.extremity, 100.0);
        assert_eq!(reading.bias, Direction::Short);
        assert_eq!(reading.window_len, 26);
    }

    #[test]
    fn confirming_mode_follows_the_crowd() {
        let last = date(2024, 3, 5);
        let reports = weekly(26, last, |i| -(i as f64) * 100.0);
        let config = PositioningConfig {
            mode: PositioningMode::Confirming,
            ..PositioningConfig::default()
        };

        let state = PositioningAnalyzer::new(config).analyze(&Symbol::from("GOLD"), &reports, last);
        let reading = state.valid().unwrap();
        assert_eq!(reading.index, 0.0);
        assert_eq!(reading.bias, Direction::Short);
    }

    #[test]
    fn overdue_report_is_stale_not_reused() {
        let last = date(2024, 3, 5);
        let reports = weekly(30, last, |i| i as f64);

        // due 03-12, grace to 03-16
        let state = analyzer().analyze(&Symbol::from("GOLD"), &reports, date(2024, 3, 20));
        assert_eq!(state, SymbolState::Stale { last_observed: last, overdue_days: 8 });

        let on_time = analyzer().analyze(&Symbol::from("GOLD"), &reports, date(2024, 3, 16));
        assert!(on_time.is_valid());
    }

    #[test]
    fn future_reports_are_ignored() {
        let last = date(2024, 3, 5);
        let reports = weekly(40, last, |i| i as f64);

        let state = analyzer().analyze(&Symbol::from("GOLD"), &reports, date(2024, 2, 1));
        assert_eq!(state.valid().unwrap().report_date, date(2024, 1, 30));
    }

    #[test]
    fn mid_window_value_is_neutral() {
        let window: Vec<f64> = (0..=10).map(f64::from).collect();
        assert_eq!(percentile_rank(&window, 5.0), 50.0);
        assert_eq!(percentile_rank(&[3.0, 3.0, 3.0], 3.0), 50.0);
        assert_eq!(percentile_rank(&[1.0], 1.0), 50.0);
    }
}
