//! # Reputation Tracker
//!
//! Per-validator accuracy, consistency and reliability derived from the
//! submission history.
//!
//! ```text
//! overall = 0.4 * accuracy + 0.4 * consistency + 0.2 * reliability
//! ```
//!
//! | Score | Definition |
//! |-------|------------|
//! | accuracy | 1 - deviations / submissions |
//! | consistency | EMA of 1 - min(magnitude, 1) over submissions |
//! | reliability | submissions / epochs observed while active |
//!
//! Status only moves towards stricter states. Reinstatement is an operator
//! action outside this crate.

use navis_core::ValidatorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

const ACCURACY_WEIGHT: f64 = 0.4;
const CONSISTENCY_WEIGHT: f64 = 0.4;
const RELIABILITY_WEIGHT: f64 = 0.2;

/// Validator standing, ordered from most to least trusted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    #[default]
    Active,
    Warning,
    Probation,
    Suspended,
    Slashed,
}

impl ValidatorStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Warning => "Warning",
            Self::Probation => "Probation",
            Self::Suspended => "Suspended",
            Self::Slashed => "Slashed",
        }
    }
}

/// Reputation tracker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Overall score under which an active validator is moved to Warning
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,

    /// Smoothing factor for the consistency moving average
    #[serde(default = "default_consistency_alpha")]
    pub consistency_alpha: f64,
}

fn default_warning_threshold() -> f64 {
    0.5
}

fn default_consistency_alpha() -> f64 {
    0.1
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            consistency_alpha: default_consistency_alpha(),
        }
    }
}

/// Validator reputation record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorReputation {
    pub validator_id: ValidatorId,
    pub accuracy_score: f64,
    pub consistency_score: f64,
    pub reliability_score: f64,
    pub overall_score: f64,
    pub total_submissions: u64,
    pub deviation_count: u64,
    pub slash_count: u64,
    /// Epochs closed while the validator was active
    pub epochs_observed: u64,
    pub status: ValidatorStatus,
}

impl ValidatorReputation {
    pub fn new(validator_id: ValidatorId) -> Self {
        Self {
            validator_id,
            accuracy_score: 1.0,
            consistency_score: 1.0,
            reliability_score: 1.0,
            overall_score: 1.0,
            total_submissions: 0,
            deviation_count: 0,
            slash_count: 0,
            epochs_observed: 0,
            status: ValidatorStatus::Active,
        }
    }

    fn recompute(&mut self) {
        self.accuracy_score = if self.total_submissions == 0 {
            1.0
        } else {
            1.0 - self.deviation_count as f64 / self.total_submissions as f64
        };

        self.reliability_score = if self.epochs_observed == 0 {
            1.0
        } else {
            (self.total_submissions as f64 / self.epochs_observed as f64).min(1.0)
        };

        self.overall_score = (ACCURACY_WEIGHT * self.accuracy_score
            + CONSISTENCY_WEIGHT * self.consistency_score
            + RELIABILITY_WEIGHT * self.reliability_score)
            .clamp(0.0, 1.0);
    }

    /// Move to `status` if it is stricter than the current one
    pub fn escalate(&mut self, status: ValidatorStatus) -> bool {
        if status > self.status {
            self.status = status;
            true
        } else {
            false
        }
    }
}

/// Reputation tracker
#[derive(Clone, Debug, Default)]
pub struct ReputationTracker {
    records: BTreeMap<ValidatorId, ValidatorReputation>,
    config: ReputationConfig,
}

impl ReputationTracker {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            records: BTreeMap::new(),
            config,
        }
    }

    /// Restore a tracker from a snapshot
    pub fn restore(config: ReputationConfig, records: Vec<ValidatorReputation>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.validator_id.clone(), r))
            .collect();
        Self { records, config }
    }

    fn entry(&mut self, validator_id: &ValidatorId) -> &mut ValidatorReputation {
        self.records
            .entry(validator_id.clone())
            .or_insert_with(|| ValidatorReputation::new(validator_id.clone()))
    }

    /// Record one epoch submission and its distance from consensus
    pub fn record_submission(&mut self, validator_id: &ValidatorId, magnitude: f64, deviated: bool) {
        let alpha = self.config.consistency_alpha;
        let threshold = self.config.warning_threshold;
        let record = self.entry(validator_id);

        record.total_submissions += 1;
        record.epochs_observed += 1;
        if deviated {
            record.deviation_count += 1;
        }

        let sample = 1.0 - magnitude.clamp(0.0, 1.0);
        record.consistency_score = (1.0 - alpha) * record.consistency_score + alpha * sample;
        record.recompute();

        if record.overall_score < threshold && record.escalate(ValidatorStatus::Warning) {
            warn!(
                validator = %validator_id.short(),
                score = record.overall_score,
                "Reputation below warning threshold"
            );
        }
    }

    /// Record an epoch in which an active validator did not submit
    pub fn record_missed(&mut self, validator_id: &ValidatorId) {
        let threshold = self.config.warning_threshold;
        let record = self.entry(validator_id);

        record.epochs_observed += 1;
        record.recompute();

        if record.overall_score < threshold && record.escalate(ValidatorStatus::Warning) {
            warn!(
                validator = %validator_id.short(),
                score = record.overall_score,
                "Reputation below warning threshold after missed epoch"
            );
        }
    }

    /// Record an executed slash and demote the validator
    pub fn record_slash(&mut self, validator_id: &ValidatorId, demote_to: ValidatorStatus) -> ValidatorStatus {
        let record = self.entry(validator_id);
        record.slash_count += 1;
        record.recompute();
        record.escalate(demote_to);
        record.status
    }

    /// Current status; validators without history are Active
    pub fn status(&self, validator_id: &ValidatorId) -> ValidatorStatus {
        self.records
            .get(validator_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn slash_count(&self, validator_id: &ValidatorId) -> u64 {
        self.records.get(validator_id).map(|r| r.slash_count).unwrap_or(0)
    }

    pub fn get(&self, validator_id: &ValidatorId) -> Option<&ValidatorReputation> {
        self.records.get(validator_id)
    }

    /// Snapshot of every record, ordered by validator id
    pub fn records(&self) -> Vec<ValidatorReputation> {
        self.records.values().cloned().collect()
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validator_starts_clean() {
        let tracker = ReputationTracker::default();
        let id = ValidatorId::new("v1");
        assert_eq!(tracker.status(&id), ValidatorStatus::Active);
        assert_eq!(tracker.slash_count(&id), 0);
    }

    #[test]
    fn test_overall_score_weights() {
        let mut tracker = ReputationTracker::new(ReputationConfig {
            warning_threshold: 0.0,
            consistency_alpha: 1.0,
        });
        let id = ValidatorId::new("v1");

        tracker.record_submission(&id, 0.0, false);
        tracker.record_submission(&id, 0.5, true);

        let record = tracker.get(&id).unwrap();
        assert_eq!(record.accuracy_score, 0.5);
        assert_eq!(record.consistency_score, 0.5);
        assert_eq!(record.reliability_score, 1.0);
        assert!((record.overall_score - (0.4 * 0.5 + 0.4 * 0.5 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_missed_epochs_reduce_reliability() {
        let mut tracker = ReputationTracker::default();
        let id = ValidatorId::new("v1");

        tracker.record_submission(&id, 0.0, false);
        tracker.record_missed(&id);
        tracker.record_missed(&id);
        tracker.record_missed(&id);

        let record = tracker.get(&id).unwrap();
        assert_eq!(record.reliability_score, 0.25);
        assert_eq!(record.status, ValidatorStatus::Active);
    }

    #[test]
    fn test_low_score_escalates_to_warning() {
        let mut tracker = ReputationTracker::new(ReputationConfig {
            warning_threshold: 0.7,
            consistency_alpha: 1.0,
        });
        let id = ValidatorId::new("v1");

        tracker.record_submission(&id, 1.0, true);

        assert_eq!(tracker.status(&id), ValidatorStatus::Warning);
    }

    #[test]
    fn test_status_never_relaxes() {
        let mut tracker = ReputationTracker::default();
        let id = ValidatorId::new("v1");

        assert_eq!(tracker.record_slash(&id, ValidatorStatus::Probation), ValidatorStatus::Probation);
        assert_eq!(tracker.record_slash(&id, ValidatorStatus::Warning), ValidatorStatus::Probation);
        assert_eq!(tracker.slash_count(&id), 2);
    }
}
