use std::collections::BTreeMap;
use std::fmt;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::signals::{
    ConfluenceScore, Opportunity, PositioningReading, SeasonalityProfile, SymbolState,
};
use crate::types::ids::{CycleId, RunId, Symbol};

/// Phase of the pipeline. A cycle walks
/// `Idle → FetchingData → Tier1 → Tier2 → Tier3 → Tier4 → Published → Idle`
/// or drops to `Failed` from any working phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    FetchingData,
    Tier1,
    Tier2,
    Tier3,
    Tier4,
    Published,
    Failed,
}

impl Stage {
    pub fn can_transition_to(&self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Idle | Published | Failed, FetchingData)
                | (FetchingData, Tier1)
                | (Tier1, Tier2)
                | (Tier2, Tier3)
                | (Tier3, Tier4)
                | (Tier4, Published)
                | (Published, Idle)
                | (FetchingData | Tier1 | Tier2 | Tier3 | Tier4 | Published, Failed)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "Idle",
            Stage::FetchingData => "FetchingData",
            Stage::Tier1 => "Tier1",
            Stage::Tier2 => "Tier2",
            Stage::Tier3 => "Tier3",
            Stage::Tier4 => "Tier4",
            Stage::Published => "Published",
            Stage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Terminal per-symbol states reached by one tier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOutcome {
    pub valid: usize,
    pub insufficient_history: usize,
    pub stale: usize,
    pub indeterminate: usize,
}

impl TierOutcome {
    pub fn tally<'a, T: 'a>(states: impl IntoIterator<Item = &'a SymbolState<T>>) -> Self {
        let mut outcome = TierOutcome::default();
        for state in states {
            match state {
                SymbolState::Valid(_) => outcome.valid += 1,
                SymbolState::InsufficientHistory { .. } => outcome.insufficient_history += 1,
                SymbolState::Stale { .. } => outcome.stale += 1,
                SymbolState::Indeterminate { .. } => outcome.indeterminate += 1,
            }
        }
        outcome
    }

    pub fn total(&self) -> usize {
        self.valid + self.insufficient_history + self.stale + self.indeterminate
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOutcomes {
    pub tier1: TierOutcome,
    pub tier2: TierOutcome,
    pub tier3: TierOutcome,
    /// Opportunities that passed selection.
    pub tier4_selected: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successful reads by the cache layer that answered.
    pub by_origin: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: Symbol,
    pub positioning: SymbolState<PositioningReading>,
    pub seasonality: SymbolState<SeasonalityProfile>,
    pub confluence: SymbolState<ConfluenceScore>,
}

/// One published run of the pipeline. Never mutated after publishing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    pub run_id: RunId,
    pub as_of: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetch: FetchSummary,
    pub outcomes: TierOutcomes,
    pub symbols: Vec<SymbolReport>,
    pub opportunities: Vec<Opportunity>,
    pub checksum: String,
}

impl Cycle {
    pub fn seal(mut self) -> Self {
        self.checksum = self.calculate_checksum();
        self
    }

    /// Hashes identity and every published decision. Numbers go through fixed
    /// precision formatting so the checksum survives a JSON round trip.
    fn calculate_checksum(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.id.0.to_le_bytes());
        hasher.update(self.run_id.to_string());
        hasher.update(self.as_of.to_rfc3339_opts(SecondsFormat::Secs, true));

        for report in &self.symbols {
            hasher.update(report.symbol.as_str());
            hasher.update(report.positioning.label());
            hasher.update(report.seasonality.label());
            hasher.update(report.confluence.label());
        }

        for opp in &self.opportunities {
            hasher.update(opp.symbol.as_str());
            hasher.update(opp.direction.to_string());
            hasher.update(format!("{:.4}", opp.confidence));
            hasher.update(format!("{:?}", opp.risk_tier));
            hasher.update(&opp.rationale);
        }

        hex::encode(hasher.finalize())
    }

    pub fn verify_checksum(&self) -> bool {
        self.calculate_checksum() == self.checksum
    }
}
