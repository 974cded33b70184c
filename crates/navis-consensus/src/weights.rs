//! # Weight Consensus Engine
//!
//! Collects one weight vector per validator per epoch and reduces the
//! eligible vectors to an element-wise median.
//!
//! ## Deviation
//!
//! ```text
//! magnitude = Σ|s_i − c_i| / (Σs_i + Σc_i)        ∈ [0, 2]
//! ```
//!
//! A record is emitted only when the magnitude exceeds the deviation
//! threshold. The median tolerates a minority of outliers without the
//! distortion a mean would carry.

use navis_core::constants::DAY_SECS;
use navis_core::{
    DeviationRecord, DeviationSeverity, EpochId, NavisError, Result, Timestamp, ValidatorId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Consensus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Length of every weight vector (number of ranked entities)
    #[serde(default = "default_entity_count")]
    pub entity_count: usize,

    /// Minimum eligible submissions for a consensus
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Magnitude above which a deviation is recorded
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold: f64,

    /// Magnitude separating medium from high severity
    #[serde(default = "default_severe_threshold")]
    pub severe_threshold: f64,

    /// How long deviation records are kept
    #[serde(default = "default_retention")]
    pub retention_secs: i64,
}

fn default_entity_count() -> usize {
    256
}

fn default_min_participants() -> usize {
    3
}

fn default_deviation_threshold() -> f64 {
    0.05
}

fn default_severe_threshold() -> f64 {
    0.15
}

fn default_retention() -> i64 {
    DAY_SECS
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            entity_count: default_entity_count(),
            min_participants: default_min_participants(),
            deviation_threshold: default_deviation_threshold(),
            severe_threshold: default_severe_threshold(),
            retention_secs: default_retention(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entity_count == 0 {
            return Err(NavisError::Config("entity_count must be positive".into()));
        }
        if self.min_participants == 0 {
            return Err(NavisError::Config("min_participants must be positive".into()));
        }
        if !(self.deviation_threshold > 0.0 && self.deviation_threshold < self.severe_threshold) {
            return Err(NavisError::Config(format!(
                "deviation_threshold {} must be positive and below severe_threshold {}",
                self.deviation_threshold, self.severe_threshold
            )));
        }
        if self.retention_secs <= 0 {
            return Err(NavisError::Config("retention_secs must be positive".into()));
        }
        Ok(())
    }
}

/// One validator's weight vector for one epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightSubmission {
    pub validator_id: ValidatorId,
    pub epoch_id: EpochId,
    pub weights: Vec<f64>,
}

/// Output of deviation detection for one epoch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviationReport {
    /// Magnitude for every submitter, eligible or not
    pub magnitudes: BTreeMap<ValidatorId, f64>,
    /// Records for submitters above the threshold
    pub records: Vec<DeviationRecord>,
}

impl DeviationReport {
    pub fn deviated(&self, validator_id: &ValidatorId) -> bool {
        self.records.iter().any(|r| &r.validator_id == validator_id)
    }
}

/// Map a magnitude onto its severity bucket; `None` at or below the threshold
pub fn severity_for(magnitude: f64, config: &ConsensusConfig) -> Option<DeviationSeverity> {
    let t = config.deviation_threshold;
    let s = config.severe_threshold;
    if magnitude <= t {
        None
    } else if magnitude <= 2.0 * t {
        Some(DeviationSeverity::Low)
    } else if magnitude <= s {
        Some(DeviationSeverity::Medium)
    } else if magnitude <= 2.0 * s {
        Some(DeviationSeverity::High)
    } else {
        Some(DeviationSeverity::Extreme)
    }
}

/// Normalized L1 distance between a submission and the consensus
pub fn deviation_magnitude(submitted: &[f64], consensus: &[f64]) -> f64 {
    let distance: f64 = submitted
        .iter()
        .zip(consensus)
        .map(|(s, c)| (s - c).abs())
        .sum();
    let mass: f64 = submitted.iter().sum::<f64>() + consensus.iter().sum::<f64>();
    if mass <= 0.0 {
        0.0
    } else {
        distance / mass
    }
}

/// Element-wise median; even counts average the two middle values
pub fn element_wise_median(vectors: &[&[f64]], length: usize) -> Vec<f64> {
    let mut column = Vec::with_capacity(vectors.len());
    (0..length)
        .map(|i| {
            column.clear();
            column.extend(vectors.iter().map(|v| v[i]));
            column.sort_by(|a, b| a.total_cmp(b));
            let mid = column.len() / 2;
            if column.is_empty() {
                0.0
            } else if column.len() % 2 == 1 {
                column[mid]
            } else {
                (column[mid - 1] + column[mid]) / 2.0
            }
        })
        .collect()
}

/// Weight consensus engine
#[derive(Clone, Debug, Default)]
pub struct WeightConsensusEngine {
    config: ConsensusConfig,

    /// Live submissions, one per validator per epoch
    submissions: BTreeMap<EpochId, BTreeMap<ValidatorId, WeightSubmission>>,

    /// Computed consensus vectors
    consensus: BTreeMap<EpochId, Vec<f64>>,
}

impl WeightConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Store a submission, replacing the validator's prior one for the epoch
    pub fn submit(&mut self, validator_id: ValidatorId, epoch_id: EpochId, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.config.entity_count {
            return Err(NavisError::InvalidVectorLength {
                expected: self.config.entity_count,
                actual: weights.len(),
            });
        }
        if let Some(index) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(NavisError::InvalidWeightValue { index });
        }

        let replaced = self
            .submissions
            .entry(epoch_id)
            .or_default()
            .insert(
                validator_id.clone(),
                WeightSubmission {
                    validator_id: validator_id.clone(),
                    epoch_id,
                    weights,
                },
            )
            .is_some();

        debug!(validator = %validator_id.short(), epoch = epoch_id.0, replaced, "Weight submission stored");
        Ok(())
    }

    /// Element-wise median over the eligible submissions
    pub fn compute_consensus<F>(&mut self, epoch_id: EpochId, is_eligible: F) -> Result<Vec<f64>>
    where
        F: Fn(&ValidatorId) -> bool,
    {
        let vectors: Vec<&[f64]> = self
            .submissions
            .get(&epoch_id)
            .map(|table| {
                table
                    .values()
                    .filter(|s| is_eligible(&s.validator_id))
                    .map(|s| s.weights.as_slice())
                    .collect()
            })
            .unwrap_or_default();

        if vectors.len() < self.config.min_participants {
            warn!(
                epoch = epoch_id.0,
                eligible = vectors.len(),
                required = self.config.min_participants,
                "Not enough eligible submissions for consensus"
            );
            return Err(NavisError::InsufficientParticipants {
                required: self.config.min_participants,
                available: vectors.len(),
            });
        }

        let median = element_wise_median(&vectors, self.config.entity_count);
        info!(epoch = epoch_id.0, participants = vectors.len(), "Consensus computed");

        self.consensus.insert(epoch_id, median.clone());
        Ok(median)
    }

    /// Measure every submitter against the epoch's consensus
    pub fn detect_deviations(&self, epoch_id: EpochId, now: Timestamp) -> Result<DeviationReport> {
        let consensus = self.consensus.get(&epoch_id).ok_or_else(|| {
            NavisError::InvalidInput(format!("no consensus computed for epoch {}", epoch_id.0))
        })?;

        let mut report = DeviationReport::default();
        for submission in self.submissions.get(&epoch_id).into_iter().flat_map(|t| t.values()) {
            let magnitude = deviation_magnitude(&submission.weights, consensus);
            report.magnitudes.insert(submission.validator_id.clone(), magnitude);

            if let Some(severity) = severity_for(magnitude, &self.config) {
                debug!(
                    validator = %submission.validator_id.short(),
                    magnitude,
                    severity = ?severity,
                    "Deviation detected"
                );
                report.records.push(DeviationRecord {
                    validator_id: submission.validator_id.clone(),
                    epoch_id,
                    timestamp: now,
                    magnitude,
                    severity,
                });
            }
        }

        Ok(report)
    }

    /// Drop submissions and consensus for this epoch and any before it
    pub fn clear_epoch(&mut self, epoch_id: EpochId) {
        self.submissions.retain(|epoch, _| *epoch > epoch_id);
        self.consensus.retain(|epoch, _| *epoch > epoch_id);
    }

    pub fn submission(&self, epoch_id: EpochId, validator_id: &ValidatorId) -> Option<&WeightSubmission> {
        self.submissions.get(&epoch_id)?.get(validator_id)
    }

    pub fn submission_count(&self, epoch_id: EpochId) -> usize {
        self.submissions.get(&epoch_id).map_or(0, |t| t.len())
    }

    pub fn submitters(&self, epoch_id: EpochId) -> Vec<ValidatorId> {
        self.submissions
            .get(&epoch_id)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn consensus(&self, epoch_id: EpochId) -> Option<&[f64]> {
        self.consensus.get(&epoch_id).map(|v| v.as_slice())
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engine(entity_count: usize) -> WeightConsensusEngine {
        WeightConsensusEngine::new(ConsensusConfig {
            entity_count,
            ..Default::default()
        })
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_three_validator_scenario() {
        let mut engine = engine(4);
        let epoch = EpochId(1);
        engine.submit("v1".into(), epoch, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        engine.submit("v2".into(), epoch, vec![0.12, 0.18, 0.32, 0.38]).unwrap();
        engine.submit("v3".into(), epoch, vec![0.5, 0.1, 0.1, 0.3]).unwrap();

        let consensus = engine.compute_consensus(epoch, |_| true).unwrap();
        assert_close(&consensus, &[0.12, 0.18, 0.3, 0.38]);

        let report = engine.detect_deviations(epoch, 100).unwrap();
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.validator_id, ValidatorId::new("v3"));
        assert!(record.severity_score() >= 0.5);
        assert_eq!(record.severity, DeviationSeverity::Extreme);
        assert_eq!(record.timestamp, 100);
        assert_eq!(report.magnitudes.len(), 3);
    }

    #[test]
    fn test_resubmission_replaces() {
        let mut engine = engine(2);
        engine.submit("v1".into(), EpochId(1), vec![1.0, 0.0]).unwrap();
        engine.submit("v1".into(), EpochId(1), vec![0.0, 1.0]).unwrap();

        assert_eq!(engine.submission_count(EpochId(1)), 1);
        let stored = engine.submission(EpochId(1), &"v1".into()).unwrap();
        assert_eq!(stored.weights, vec![0.0, 1.0]);
    }

    #[test]
    fn test_invalid_submissions_rejected() {
        let mut engine = engine(3);
        let result = engine.submit("v1".into(), EpochId(1), vec![0.5, 0.5]);
        assert_eq!(result, Err(NavisError::InvalidVectorLength { expected: 3, actual: 2 }));

        let result = engine.submit("v1".into(), EpochId(1), vec![0.5, -0.1, 0.6]);
        assert_eq!(result, Err(NavisError::InvalidWeightValue { index: 1 }));

        let result = engine.submit("v1".into(), EpochId(1), vec![0.5, 0.1, f64::NAN]);
        assert_eq!(result, Err(NavisError::InvalidWeightValue { index: 2 }));

        engine.submit("v2".into(), EpochId(1), vec![0.2, 0.3, 0.5]).unwrap();
        assert_eq!(engine.submission_count(EpochId(1)), 1);
    }

    #[test]
    fn test_insufficient_eligible_participants() {
        let mut engine = engine(2);
        for id in ["v1", "v2", "v3"] {
            engine.submit(id.into(), EpochId(1), vec![0.5, 0.5]).unwrap();
        }

        let result = engine.compute_consensus(EpochId(1), |id| id.as_str() != "v3");

        assert_eq!(result, Err(NavisError::InsufficientParticipants { required: 3, available: 2 }));
        assert!(engine.consensus(EpochId(1)).is_none());
    }

    #[test]
    fn test_ineligible_submitters_still_measured() {
        let mut engine = engine(2);
        for id in ["v1", "v2", "v3"] {
            engine.submit(id.into(), EpochId(1), vec![0.5, 0.5]).unwrap();
        }
        engine.submit("rogue".into(), EpochId(1), vec![1.0, 0.0]).unwrap();

        let consensus = engine.compute_consensus(EpochId(1), |id| id.as_str() != "rogue").unwrap();
        assert_close(&consensus, &[0.5, 0.5]);

        let report = engine.detect_deviations(EpochId(1), 0).unwrap();
        assert!(report.deviated(&"rogue".into()));
        assert!((report.magnitudes[&ValidatorId::new("rogue")] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_even_count_averages_middle() {
        let a = [1.0, 4.0];
        let b = [2.0, 3.0];
        let c = [3.0, 2.0];
        let d = [4.0, 1.0];
        let median = element_wise_median(&[&a, &b, &c, &d], 2);
        assert_close(&median, &[2.5, 2.5]);
    }

    #[test]
    fn test_severity_boundaries() {
        let config = ConsensusConfig::default();
        assert_eq!(severity_for(0.05, &config), None);
        assert_eq!(severity_for(0.0500001, &config), Some(DeviationSeverity::Low));
        assert_eq!(severity_for(0.10, &config), Some(DeviationSeverity::Low));
        assert_eq!(severity_for(0.12, &config), Some(DeviationSeverity::Medium));
        assert_eq!(severity_for(0.15, &config), Some(DeviationSeverity::Medium));
        assert_eq!(severity_for(0.30, &config), Some(DeviationSeverity::High));
        assert_eq!(severity_for(0.31, &config), Some(DeviationSeverity::Extreme));
    }

    #[test]
    fn test_clear_epoch() {
        let mut engine = engine(1);
        engine.submit("v1".into(), EpochId(1), vec![1.0]).unwrap();
        engine.submit("v1".into(), EpochId(2), vec![1.0]).unwrap();

        engine.clear_epoch(EpochId(1));

        assert_eq!(engine.submission_count(EpochId(1)), 0);
        assert_eq!(engine.submission_count(EpochId(2)), 1);
    }

    #[test]
    fn test_detect_without_consensus_fails() {
        let engine = engine(1);
        assert!(engine.detect_deviations(EpochId(9), 0).is_err());
    }

    #[test]
    fn test_zero_mass_has_zero_magnitude() {
        assert_eq!(deviation_magnitude(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    proptest! {
        #[test]
        fn prop_median_is_order_independent(
            vectors in prop::collection::vec(prop::collection::vec(0.0f64..1.0, 5), 3..9),
            rotation in 0usize..9,
        ) {
            let mut forward = engine(5);
            let mut rotated = engine(5);
            let n = vectors.len();
            for (i, v) in vectors.iter().enumerate() {
                forward.submit(ValidatorId::new(format!("v{}", i)), EpochId(1), v.clone()).unwrap();
            }
            for k in 0..n {
                let i = (k + rotation) % n;
                // Ids are assigned by arrival, so each vector lands under a different validator.
                rotated
                    .submit(ValidatorId::new(format!("v{}", k)), EpochId(1), vectors[i].clone())
                    .unwrap();
            }

            let a = forward.compute_consensus(EpochId(1), |_| true).unwrap();
            let b = rotated.compute_consensus(EpochId(1), |_| true).unwrap();
            prop_assert_eq!(a.clone(), b);

            for (i, value) in a.iter().enumerate() {
                let mut column: Vec<f64> = vectors.iter().map(|v| v[i]).collect();
                column.sort_by(|x, y| x.total_cmp(y));
                let below = column.iter().filter(|x| *x < value).count();
                let above = column.iter().filter(|x| *x > value).count();
                prop_assert!(below <= n / 2 && above <= n / 2);
            }
        }

        #[test]
        fn prop_records_match_threshold(
            shift in 0.0f64..0.5,
        ) {
            let mut engine = engine(2);
            for id in ["a", "b", "c"] {
                engine.submit(id.into(), EpochId(1), vec![0.5, 0.5]).unwrap();
            }
            engine.submit("d".into(), EpochId(1), vec![0.5 + shift, 0.5 - shift]).unwrap();
            engine.compute_consensus(EpochId(1), |id| id.as_str() != "d").unwrap();

            let report = engine.detect_deviations(EpochId(1), 0).unwrap();
            let magnitude = report.magnitudes[&ValidatorId::new("d")];
            let expected = usize::from(magnitude > engine.config().deviation_threshold);
            prop_assert_eq!(report.records.len(), expected);
            if let Some(record) = report.records.first() {
                prop_assert_eq!(Some(record.severity), severity_for(magnitude, engine.config()));
            }
        }
    }
}
