use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDirection {
    /// The spec changed after the implementation was recorded
    Forward,
    /// An implementation file changed after it was recorded
    Reverse,
}

/// Which direction wins when both sides of a unit changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPrecedence {
    #[default]
    ForwardFirst,
    ReverseFirst,
}

/// A detected mismatch for one unit. Recomputed on every detection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEntry {
    pub flow_key: String,
    pub flow_name: String,
    pub domain_id: String,
    pub spec_path: String,
    /// File whose hash changed: the spec for forward drift, the first
    /// differing implementation file for reverse drift
    pub changed_path: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub implemented_at: String,
    pub detected_at: String,
    pub direction: DriftDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScore {
    pub total: usize,
    pub implemented: usize,
    pub stale: usize,
    pub pending: usize,
    /// Percentage of units implemented and in sync
    pub score: u32,
}

impl SyncScore {
    /// Compute the score from the project population.
    ///
    /// # Arguments
    /// * `total` - Number of units in the project
    /// * `recorded` - Number of project units that have a mapping record
    /// * `stale` - Number of distinct units with an active drift entry
    pub fn compute(total: usize, recorded: usize, stale: usize) -> Self {
        let recorded = recorded.min(total);
        let stale = stale.min(recorded);
        let implemented = recorded - stale;
        let pending = total - implemented - stale;
        let score = if total == 0 {
            0
        } else {
            ((implemented as f64 / total as f64) * 100.0).round() as u32
        };

        Self {
            total,
            implemented,
            stale,
            pending,
            score,
        }
    }
}

/// Drift list and the score computed from it, published together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub entries: Vec<DriftEntry>,
    pub score: SyncScore,
    /// Units skipped this pass because their spec could not be hashed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indeterminate: Vec<String>,
}

impl DriftSnapshot {
    pub fn entry(&self, flow_key: &str) -> Option<&DriftEntry> {
        self.entries.iter().find(|d| d.flow_key == flow_key)
    }

    pub fn stale_keys(&self) -> HashSet<&str> {
        self.entries.iter().map(|d| d.flow_key.as_str()).collect()
    }

    /// Keep only matching entries and recompute the score from what remains.
    /// A removed entry's unit counts as implemented again.
    pub fn retain<F: FnMut(&DriftEntry) -> bool>(&mut self, keep: F) {
        let recorded = self.score.implemented + self.score.stale;
        self.entries.retain(keep);
        let stale = self.stale_keys().len();
        self.score = SyncScore::compute(self.score.total, recorded, stale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_project_scores_zero() {
        let score = SyncScore::compute(0, 0, 0);
        assert_eq!(score, SyncScore::default());
    }

    #[test]
    fn score_rounds_to_nearest_percent() {
        // 2 of 3 implemented -> 66.67 -> 67
        let score = SyncScore::compute(3, 3, 1);
        assert_eq!(score.implemented, 2);
        assert_eq!(score.stale, 1);
        assert_eq!(score.pending, 0);
        assert_eq!(score.score, 67);
    }

    #[test]
    fn pending_counts_units_without_records() {
        let score = SyncScore::compute(5, 2, 0);
        assert_eq!(score.implemented, 2);
        assert_eq!(score.pending, 3);
        assert_eq!(score.score, 40);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn score_partitions_population(
            total in 0usize..200,
            recorded in 0usize..250,
            stale in 0usize..250
        ) {
            let s = SyncScore::compute(total, recorded, stale);
            prop_assert_eq!(s.implemented + s.stale + s.pending, s.total);
            prop_assert!(s.score <= 100);
            if total == 0 {
                prop_assert_eq!(s.score, 0);
            }
        }
    }
}
