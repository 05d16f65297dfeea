use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositioningMode {
    /// Extreme net-long positioning reads as a short signal.
    Contrarian,
    /// Extreme net-long positioning reads as a long signal.
    Confirming,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PositioningConfig {
    pub window: usize,
    pub min_periods: usize,
    pub report_cadence_days: i64,
    pub overdue_grace_days: i64,
    pub mode: PositioningMode,
    /// Half-width around 50 inside which the index carries no bias.
    pub neutral_band: f64,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        PositioningConfig {
            window: 26,
            min_periods: 26,
            report_cadence_days: 7,
            overdue_grace_days: 4,
            mode: PositioningMode::Contrarian,
            neutral_band: 10.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SeasonalityConfig {
    pub min_samples: usize,
    /// Minimum closes inside a month for that month to count as a sample.
    pub min_closes_per_month: usize,
    /// Monthly return magnitude treated as full strength.
    pub return_scale: f64,
    pub max_history_age_days: i64,
}

impl Default for SeasonalityConfig {
    fn default() -> Self {
        SeasonalityConfig {
            min_samples: 5,
            min_closes_per_month: 10,
            return_scale: 0.05,  // 5% monthly move
            max_history_age_days: 7,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub positioning_weight: f64,
    pub seasonality_weight: f64,
    pub confidence_floor: f64,
}

impl ConfluenceConfig {
    /// Weights scaled to sum to one.
    pub fn normalized_weights(&self) -> (f64, f64) {
        let total = self.positioning_weight + self.seasonality_weight;
        (self.positioning_weight / total, self.seasonality_weight / total)
    }
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        ConfluenceConfig {
            positioning_weight: 0.6,
            seasonality_weight: 0.4,
            confidence_floor: 60.0,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectionConfig {
    #[serde(default)]
    pub max_opportunities: Option<usize>,
}
