use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::config::ConfluenceConfig;
use crate::signals::{round2, Direction, PositioningReading, SeasonalityProfile, SymbolState};
use crate::types::ids::Symbol;

/// Tier 3 output: both components combined into one confidence and direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceScore {
    pub symbol: Symbol,
    pub computed_at: DateTime<Utc>,
    pub positioning_component: f64,
    pub seasonality_component: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub positioning: PositioningReading,
    pub seasonality: SeasonalityProfile,
}

impl ConfluenceScore {
    /// Both components point the same non-neutral way.
    pub fn components_agree(&self) -> bool {
        self.positioning.bias != Direction::None && self.positioning.bias == self.seasonality.direction
    }
}

pub struct ConfluenceScorer {
    config: ConfluenceConfig,
}

impl ConfluenceScorer {
    pub fn new(config: ConfluenceConfig) -> Self {
        ConfluenceScorer { config }
    }

    pub fn floor(&self) -> f64 {
        self.config.confidence_floor
    }

    /// Partial inputs are never combined: anything short of two valid
    /// components is `Indeterminate`.
    pub fn score(
        &self,
        symbol: &Symbol,
        positioning: &SymbolState<PositioningReading>,
        seasonality: &SymbolState<SeasonalityProfile>,
        computed_at: DateTime<Utc>,
    ) -> SymbolState<ConfluenceScore> {
        let (pos, season) = match (positioning.valid(), seasonality.valid()) {
            (Some(pos), Some(season)) => (pos, season),
            _ => {
                return SymbolState::Indeterminate {
                    reason: format!(
                        "positioning {}, seasonality {}",
                        positioning.label(),
                        seasonality.label()
                    ),
                };
            }
        };

        let (w_pos, w_season) = self.config.normalized_weights();
        let confidence = round2(w_pos * pos.extremity + w_season * season.alignment);

        let agreed = if pos.bias != Direction::None && pos.bias == season.direction {
            pos.bias
        } else {
            Direction::None
        };
        let direction = if confidence >= self.config.confidence_floor {
            agreed
        } else {
            Direction::None
        };

        SymbolState::Valid(ConfluenceScore {
            symbol: symbol.clone(),
            computed_at,
            positioning_component: pos.extremity,
            seasonality_component: season.alignment,
            confidence,
            direction,
            positioning: pos.clone(),
            seasonality: season.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    pub(crate) fn reading(symbol: &str, extremity: f64, bias: Direction) -> PositioningReading {
        PositioningReading {
            symbol: Symbol::from(symbol),
            report_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            net_position: 1000.0,
            index: 50.0 + extremity / 2.0 * bias.sign(),
            extremity,
            bias,
            window_len: 26,
        }
    }

    pub(crate) fn profile(symbol: &str, alignment: f64, direction: Direction) -> SeasonalityProfile {
        SeasonalityProfile {
            symbol: Symbol::from(symbol),
            month: 3,
            mean_return: 0.02 * direction.sign(),
            win_rate: 0.8,
            sample_size: 9,
            score: 50.0 + alignment / 2.0 * direction.sign(),
            alignment,
            direction,
        }
    }

    fn scorer() -> ConfluenceScorer {
        ConfluenceScorer::new(ConfluenceConfig::default())
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_709_935_200, 0).unwrap()
    }

    #[test]
    fn agreeing_components_above_floor_keep_direction() {
        let score = scorer().score(
            &Symbol::from("GOLD"),
            &SymbolState::Valid(reading("GOLD", 90.0, Direction::Short)),
            &SymbolState::Valid(profile("GOLD", 70.0, Direction::Short)),
            now(),
        );
        let score = score.valid().unwrap();
        assert_eq!(score.confidence, 82.0);
        assert_eq!(score.direction, Direction::Short);
        assert!(score.components_agree());
    }

    #[test]
    fn conflicting_components_have_no_direction() {
        let score = scorer().score(
            &Symbol::from("GOLD"),
            &SymbolState::Valid(reading("GOLD", 90.0, Direction::Short)),
            &SymbolState::Valid(profile("GOLD", 70.0, Direction::Long)),
            now(),
        );
        assert_eq!(score.valid().unwrap().direction, Direction::None);
    }

    #[test]
    fn below_floor_forces_none() {
        let score = scorer().score(
            &Symbol::from("GOLD"),
            &SymbolState::Valid(reading("GOLD", 50.0, Direction::Long)),
            &SymbolState::Valid(profile("GOLD", 40.0, Direction::Long)),
            now(),
        );
        let score = score.valid().unwrap();
        assert_eq!(score.confidence, 46.0);
        assert_eq!(score.direction, Direction::None);
    }

    #[test]
    fn insufficient_positioning_is_indeterminate() {
        let score = scorer().score(
            &Symbol::from("GOLD"),
            &SymbolState::InsufficientHistory { available: 10, required: 26 },
            &SymbolState::Valid(profile("GOLD", 70.0, Direction::Long)),
            now(),
        );
        assert!(matches!(score, SymbolState::Indeterminate { .. }));
    }

    fn non_valid<T: std::fmt::Debug + Clone + 'static>() -> impl Strategy<Value = SymbolState<T>> {
        prop_oneof![
            (0usize..26).prop_map(|available| SymbolState::InsufficientHistory { available, required: 26 }),
            (1i64..30).prop_map(|overdue_days| SymbolState::Stale {
                last_observed: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                overdue_days,
            }),
            Just(SymbolState::Indeterminate { reason: "no data".to_string() }),
        ]
    }

    proptest! {
        #[test]
        fn partial_inputs_never_become_numbers(
            extremity in 0.0f64..=100.0,
            alignment in 0.0f64..=100.0,
            bad_pos in non_valid::<PositioningReading>(),
            bad_season in non_valid::<SeasonalityProfile>(),
        ) {
            let s = scorer();
            let sym = Symbol::from("XYZ");
            let good_pos = SymbolState::Valid(reading("XYZ", extremity, Direction::Long));
            let good_season = SymbolState::Valid(profile("XYZ", alignment, Direction::Long));

            let only_season = s.score(&sym, &bad_pos, &good_season, now());
            let only_pos = s.score(&sym, &good_pos, &bad_season, now());
            let neither = s.score(&sym, &bad_pos, &bad_season, now());
            prop_assert!(matches!(only_season, SymbolState::Indeterminate { .. }), "positioning-only input produced a number");
            prop_assert!(matches!(only_pos, SymbolState::Indeterminate { .. }), "seasonality-only input produced a number");
            prop_assert!(matches!(neither, SymbolState::Indeterminate { .. }), "no valid input produced a number");
        }
    }
}
