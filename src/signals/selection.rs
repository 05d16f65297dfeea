use std::fmt;
use serde::{Deserialize, Serialize};
use crate::config::SelectionConfig;
use crate::signals::{ConfluenceScore, Direction};
use crate::types::ids::{CycleId, Symbol};

/// Extremity at or above which positioning is called extreme.
const EXTREME_POSITIONING: f64 = 80.0;
/// Win rate at or beyond which (or its mirror) a season is called strong.
const STRONG_SEASON_WIN_RATE: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

/// One contributing reason behind an opportunity. Rendering is fixed so the
/// same inputs always give the same rationale text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum Factor {
    Positioning { index: f64, bias: Direction },
    ExtremePositioning { extremity: f64 },
    Seasonality { month: u32, win_rate: f64, samples: usize },
    StrongSeasonality { mean_return: f64 },
    ComponentsAligned { direction: Direction },
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factor::Positioning { index, bias } => {
                write!(f, "positioning index {:.1} favours {}", index, bias)
            }
            Factor::ExtremePositioning { extremity } => {
                write!(f, "extreme positioning ({:.1})", extremity)
            }
            Factor::Seasonality { month, win_rate, samples } => write!(
                f,
                "month {} rose in {:.0}% of {} years",
                month, win_rate * 100.0, samples
            ),
            Factor::StrongSeasonality { mean_return } => {
                write!(f, "strong seasonal mean {:+.2}%", mean_return * 100.0)
            }
            Factor::ComponentsAligned { direction } => {
                write!(f, "positioning and seasonality agree on {}", direction)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: Symbol,
    pub direction: Direction,
    pub confidence: f64,
    pub risk_tier: RiskTier,
    pub factors: Vec<Factor>,
    pub rationale: String,
    pub cycle_id: CycleId,
}

pub struct OpportunitySelector {
    floor: f64,
    config: SelectionConfig,
}

impl OpportunitySelector {
    pub fn new(floor: f64, config: SelectionConfig) -> Self {
        OpportunitySelector { floor, config }
    }

    /// Keeps directional scores at or above the floor, highest confidence
    /// first with ties broken by symbol.
    pub fn select<'a>(
        &self,
        cycle_id: CycleId,
        scores: impl IntoIterator<Item = &'a ConfluenceScore>,
    ) -> Vec<Opportunity> {
        let mut candidates: Vec<&ConfluenceScore> = scores.into_iter()
            .filter(|s| s.direction != Direction::None && s.confidence >= self.floor)
            .collect();

        candidates.sort_by(|a, b| {
            b.confidence.total_cmp(&a.confidence)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.direction.cmp(&b.direction))
        });

        let limit = self.config.max_opportunities.unwrap_or(usize::MAX);
        candidates.into_iter()
            .take(limit)
            .map(|score| self.opportunity(cycle_id, score))
            .collect()
    }

    pub fn risk_tier(&self, confidence: f64) -> RiskTier {
        let headroom = 100.0 - self.floor;
        let distance = if headroom > 0.0 {
            ((confidence - self.floor) / headroom).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if distance >= 2.0 / 3.0 {
            RiskTier::Low
        } else if distance >= 1.0 / 3.0 {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }

    fn opportunity(&self, cycle_id: CycleId, score: &ConfluenceScore) -> Opportunity {
        let factors = factors(score);
        let rationale = factors.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        Opportunity {
            symbol: score.symbol.clone(),
            direction: score.direction,
            confidence: score.confidence,
            risk_tier: self.risk_tier(score.confidence),
            factors,
            rationale,
            cycle_id,
        }
    }
}

fn factors(score: &ConfluenceScore) -> Vec<Factor> {
    let pos = &score.positioning;
    let season = &score.seasonality;

    let mut factors = vec![Factor::Positioning { index: pos.index, bias: pos.bias }];
    if pos.extremity >= EXTREME_POSITIONING {
        factors.push(Factor::ExtremePositioning { extremity: pos.extremity });
    }
    factors.push(Factor::Seasonality {
        month: season.month,
        win_rate: season.win_rate,
        samples: season.sample_size,
    });
    if season.win_rate >= STRONG_SEASON_WIN_RATE || season.win_rate <= 1.0 - STRONG_SEASON_WIN_RATE {
        factors.push(Factor::StrongSeasonality { mean_return: season.mean_return });
    }
    if score.components_agree() {
        factors.push(Factor::ComponentsAligned { direction: score.direction });
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;
    use crate::signals::confluence::tests::{profile, reading};

    fn score(symbol: &str, confidence: f64, direction: Direction) -> ConfluenceScore {
        ConfluenceScore {
            symbol: Symbol::from(symbol),
            computed_at: DateTime::from_timestamp(1_709_935_200, 0).unwrap(),
            positioning_component: confidence,
            seasonality_component: confidence,
            confidence,
            direction,
            positioning: reading(symbol, confidence, direction),
            seasonality: profile(symbol, confidence, direction),
        }
    }

    fn selector() -> OpportunitySelector {
        OpportunitySelector::new(60.0, SelectionConfig::default())
    }

    #[test]
    fn orders_by_confidence_then_symbol() {
        let scores = vec![
            score("BBB", 75.0, Direction::Long),
            score("AAA", 75.0, Direction::Short),
            score("CCC", 90.0, Direction::Long),
            score("DDD", 95.0, Direction::None),
            score("EEE", 59.99, Direction::Long),
        ];

        let picked = selector().select(CycleId(7), &scores);
        let symbols: Vec<_> = picked.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CCC", "AAA", "BBB"]);
        assert!(picked.iter().all(|o| o.cycle_id == CycleId(7)));
    }

    #[test]
    fn risk_tier_shrinks_with_distance_above_floor() {
        let s = selector();
        assert_eq!(s.risk_tier(60.0), RiskTier::High);
        assert_eq!(s.risk_tier(75.0), RiskTier::Medium);
        assert_eq!(s.risk_tier(95.0), RiskTier::Low);
    }

    #[test]
    fn rationale_is_built_from_factors() {
        let picked = selector().select(CycleId(1), &[score("GOLD", 90.0, Direction::Short)]);
        let opp = &picked[0];

        assert_eq!(
            opp.rationale,
            "positioning index 5.0 favours short; extreme positioning (90.0); \
             month 3 rose in 80% of 9 years; strong seasonal mean -2.00%; \
             positioning and seasonality agree on short"
        );
    }

    #[test]
    fn cap_applies_after_ordering() {
        let config = SelectionConfig { max_opportunities: Some(1) };
        let scores = vec![score("AAA", 70.0, Direction::Long), score("BBB", 80.0, Direction::Long)];

        let picked = OpportunitySelector::new(60.0, config).select(CycleId(1), &scores);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].symbol.as_str(), "BBB");
    }

    fn arb_score() -> impl Strategy<Value = ConfluenceScore> {
        (
            "[A-E]{1,3}",
            0.0f64..=100.0,
            prop_oneof![Just(Direction::Long), Just(Direction::Short), Just(Direction::None)],
        )
            .prop_map(|(symbol, confidence, direction)| score(&symbol, confidence, direction))
    }

    proptest! {
        #[test]
        fn nothing_below_floor_is_selected(
            floor in 0.0f64..=100.0,
            scores in proptest::collection::vec(arb_score(), 0..40),
        ) {
            let picked = OpportunitySelector::new(floor, SelectionConfig::default())
                .select(CycleId(1), &scores);
            for opp in &picked {
                prop_assert!(opp.confidence >= floor);
                prop_assert!(opp.direction != Direction::None);
            }
        }

        #[test]
        fn selection_is_order_independent(scores in proptest::collection::vec(arb_score(), 0..40)) {
            let mut reversed = scores.clone();
            reversed.reverse();

            let a = serde_json::to_string(&selector().select(CycleId(3), &scores)).unwrap();
            let b = serde_json::to_string(&selector().select(CycleId(3), &reversed)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
