//! The four-tier signal pipeline.
//!
//! Every tier returns a terminal [`SymbolState`] per symbol. States other than
//! `Valid` are not errors and never carry a number, so "not computable yet"
//! cannot be mistaken for a neutral reading.

pub mod confluence;
pub mod positioning;
pub mod seasonality;
pub mod selection;

use std::fmt;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use confluence::{ConfluenceScore, ConfluenceScorer};
pub use positioning::{PositioningAnalyzer, PositioningReading};
pub use seasonality::{SeasonalityAnalyzer, SeasonalityProfile};
pub use selection::{Factor, Opportunity, OpportunitySelector, RiskTier};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SymbolState<T> {
    Valid(T),
    InsufficientHistory {
        available: usize,
        required: usize,
    },
    /// The expected upstream refresh did not arrive in time.
    Stale {
        last_observed: NaiveDate,
        overdue_days: i64,
    },
    Indeterminate {
        reason: String,
    },
}

impl<T> SymbolState<T> {
    pub fn valid(&self) -> Option<&T> {
        match self {
            SymbolState::Valid(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, SymbolState::Valid(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SymbolState::Valid(_) => "valid",
            SymbolState::InsufficientHistory { .. } => "insufficient_history",
            SymbolState::Stale { .. } => "stale",
            SymbolState::Indeterminate { .. } => "indeterminate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::None => 0.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::None => "none",
        };
        f.write_str(name)
    }
}

/// Rounds to two decimals so published values are stable across platforms.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_valid_states_serialize_without_a_value() {
        let state: SymbolState<f64> = SymbolState::InsufficientHistory { available: 10, required: 26 };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "insufficient_history");
        assert_eq!(json["available"], 10);
        assert!(state.valid().is_none());
    }
}
