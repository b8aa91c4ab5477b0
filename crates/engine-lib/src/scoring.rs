//! Node health scoring
//!
//! A node's usage snapshot is folded into one weighted score in the same
//! units as the input percentages, then discretized into a 1-5 level.
//! One formula is used per deployment, selected by configuration.

use crate::models::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper-exclusive bounds of levels 1 through 4; anything above is level 5.
pub const LEVEL_BREAKPOINTS: [f64; 4] = [25.0, 45.0, 65.0, 85.0];

/// Severity band of a node score, 1 (idle) to 5 (saturated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(u8);

impl Level {
    pub const MIN: Level = Level(1);
    pub const MAX: Level = Level(5);

    /// Discretize a score. Boundary values belong to the higher band and
    /// anything that is not below 85 (including NaN) is level 5.
    pub fn from_score(score: f64) -> Self {
        if score < LEVEL_BREAKPOINTS[0] {
            Level(1)
        } else if score < LEVEL_BREAKPOINTS[1] {
            Level(2)
        } else if score < LEVEL_BREAKPOINTS[2] {
            Level(3)
        } else if score < LEVEL_BREAKPOINTS[3] {
            Level(4)
        } else {
            Level(5)
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shorthand for [`Level::from_score`]
pub fn level(score: f64) -> Level {
    Level::from_score(score)
}

/// Scoring formula selected for a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFormula {
    /// CPU 0.5, memory 0.3, storage 0.2
    #[default]
    Canonical,
    /// CPU 30, memory 30, storage 20, network 1, normalized by 81
    NetworkInclusive,
}

impl ScoringFormula {
    pub fn weights(self) -> ScoreWeights {
        match self {
            ScoringFormula::Canonical => ScoreWeights {
                cpu: 0.5,
                memory: 0.3,
                storage: 0.2,
                network: 0.0,
            },
            ScoringFormula::NetworkInclusive => ScoreWeights {
                cpu: 30.0,
                memory: 30.0,
                storage: 20.0,
                network: 1.0,
            },
        }
    }
}

/// Per-dimension weights. Dimensions with zero weight are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.cpu + self.memory + self.storage + self.network
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoringFormula::Canonical.weights()
    }
}

/// Weighted, weight-normalized score of a snapshot.
///
/// Returns `None` when a dimension with non-zero weight is unknown: a
/// partial sum would read as a healthier node than it is.
pub fn score(snapshot: &UsageSnapshot, weights: &ScoreWeights) -> Option<f64> {
    let dimensions = [
        (weights.cpu, snapshot.cpu_percent),
        (weights.memory, snapshot.memory_percent),
        (weights.storage, snapshot.storage_percent),
        (weights.network, snapshot.network_percent),
    ];

    let total = weights.total();
    if total <= 0.0 {
        return None;
    }

    let mut sum = 0.0;
    for (weight, value) in dimensions {
        if weight == 0.0 {
            continue;
        }
        sum += weight * value?;
    }

    Some(sum / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(cpu: f64, memory: f64, storage: f64) -> UsageSnapshot {
        UsageSnapshot {
            cpu_percent: Some(cpu),
            memory_percent: Some(memory),
            storage_percent: Some(storage),
            network_percent: None,
            network_tx_rate: None,
            network_rx_rate: None,
            collected_at: Utc::now(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_level_boundaries_go_to_higher_band() {
        assert_eq!(level(24.999).value(), 1);
        assert_eq!(level(25.0).value(), 2);
        assert_eq!(level(45.0).value(), 3);
        assert_eq!(level(65.0).value(), 4);
        assert_eq!(level(85.0).value(), 5);
    }

    #[test]
    fn test_level_is_total_and_monotonic() {
        let samples = [
            f64::MIN,
            -10.0,
            0.0,
            12.5,
            25.0,
            44.9,
            45.0,
            64.99,
            65.0,
            84.0,
            85.0,
            100.0,
            250.0,
            f64::MAX,
        ];

        for pair in samples.windows(2) {
            assert!(level(pair[0]) <= level(pair[1]), "{:?}", pair);
        }
        assert_eq!(level(f64::MIN), Level::MIN);
        assert_eq!(level(250.0), Level::MAX);
    }

    #[test]
    fn test_canonical_full_utilization_scores_100() {
        let weights = ScoringFormula::Canonical.weights();
        let value = score(&snapshot(100.0, 100.0, 100.0), &weights).unwrap();
        assert!(approx(value, 100.0));
    }

    #[test]
    fn test_canonical_weighting() {
        let weights = ScoreWeights::default();
        // 0.5 * 90 + 0.3 * 10 + 0.2 * 10
        let busy = score(&snapshot(90.0, 10.0, 10.0), &weights).unwrap();
        assert!(approx(busy, 50.0));
        assert_eq!(level(busy).value(), 3);
        assert!(approx(score(&snapshot(20.0, 20.0, 20.0), &weights).unwrap(), 20.0));
        assert!(approx(score(&snapshot(90.0, 10.0, 0.0), &weights).unwrap(), 48.0));
    }

    #[test]
    fn test_score_can_exceed_100() {
        let weights = ScoreWeights::default();
        let value = score(&snapshot(130.0, 100.0, 100.0), &weights).unwrap();
        assert!(value > 100.0);
        assert_eq!(level(value), Level::MAX);
    }

    #[test]
    fn test_unknown_weighted_dimension_yields_no_score() {
        let weights = ScoreWeights::default();
        let mut snap = snapshot(90.0, 10.0, 10.0);
        snap.memory_percent = None;
        assert_eq!(score(&snap, &weights), None);
    }

    #[test]
    fn test_unweighted_dimension_may_be_unknown() {
        // canonical weights ignore network
        let snap = snapshot(50.0, 50.0, 50.0);
        assert!(snap.network_percent.is_none());
        assert!(score(&snap, &ScoreWeights::default()).is_some());
    }

    #[test]
    fn test_network_inclusive_normalizes_by_weight_sum() {
        let weights = ScoringFormula::NetworkInclusive.weights();
        assert!(approx(weights.total(), 81.0));

        let mut snap = snapshot(81.0, 81.0, 81.0);
        snap.network_percent = Some(81.0);
        assert!(approx(score(&snap, &weights).unwrap(), 81.0));

        snap.network_percent = None;
        assert_eq!(score(&snap, &weights), None);
    }

    #[test]
    fn test_formula_deserializes_from_snake_case() {
        let formula: ScoringFormula = serde_json::from_str("\"network_inclusive\"").unwrap();
        assert_eq!(formula, ScoringFormula::NetworkInclusive);
        assert!(serde_json::from_str::<ScoringFormula>("\"weighted\"").is_err());
    }
}
