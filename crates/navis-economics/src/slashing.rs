//! # Slashing System
//!
//! Graduated penalties for validators whose weight submissions diverge from
//! consensus.
//!
//! ## Severity Tiers
//!
//! | Tier | Rate | Trigger | Resulting status |
//! |------|------|---------|------------------|
//! | Minor | 1% | max severity >= 0.25 or >= 3 deviations | Warning |
//! | Moderate | 5% | max severity >= 0.50 or >= 5 deviations | Warning |
//! | Severe | 15% | max severity >= 0.75, or repeat offender | Probation |
//! | Critical | 50% | explicit misbehavior report only | Suspended |
//!
//! Rates apply to the validator's available stake. Executed events are
//! append-only and never reversed here.

use crate::reputation::{ReputationTracker, ValidatorStatus};
use crate::staking::StakeRegistry;
use navis_core::constants::{BPS_DENOMINATOR, HOUR_SECS};
use navis_core::{
    DeviationRecord, EpochId, EventId, NavisError, Result, StakeAmount, Timestamp, ValidatorId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Slash severity tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlashSeverity {
    Minor,
    Moderate,
    Severe,
    Critical,
}

impl SlashSeverity {
    /// Slash rate in basis points
    pub fn rate_bps(&self, config: &SlashingConfig) -> u128 {
        let bps = match self {
            Self::Minor => config.minor_rate_bps,
            Self::Moderate => config.moderate_rate_bps,
            Self::Severe => config.severe_rate_bps,
            Self::Critical => config.critical_rate_bps,
        };
        u128::from(bps)
    }

    /// Status the validator is demoted to once the slash executes
    pub fn resulting_status(&self) -> ValidatorStatus {
        match self {
            Self::Critical => ValidatorStatus::Suspended,
            Self::Severe => ValidatorStatus::Probation,
            Self::Moderate | Self::Minor => ValidatorStatus::Warning,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
        }
    }
}

/// Why a slash was issued
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlashReason {
    /// Weight submissions diverged from consensus
    ConsensusDeviation,
    /// Deviations too mild on their own, but the validator has a slash history
    RepeatOffender,
    /// Externally reported malicious behavior
    MaliciousBehavior,
}

/// Slashing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlashingConfig {
    /// Trailing window of deviation records considered per evaluation
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,

    #[serde(default = "default_minor_rate")]
    pub minor_rate_bps: u64,

    #[serde(default = "default_moderate_rate")]
    pub moderate_rate_bps: u64,

    #[serde(default = "default_severe_rate")]
    pub severe_rate_bps: u64,

    #[serde(default = "default_critical_rate")]
    pub critical_rate_bps: u64,

    /// Deviation count that alone triggers a minor slash
    #[serde(default = "default_minor_count")]
    pub minor_count_trigger: usize,

    /// Deviation count that alone triggers a moderate slash
    #[serde(default = "default_moderate_count")]
    pub moderate_count_trigger: usize,

    /// Prior slashes after which any deviation escalates to severe
    #[serde(default = "default_repeat_offender")]
    pub repeat_offender_slashes: u64,
}

fn default_lookback_secs() -> i64 {
    HOUR_SECS
}

fn default_minor_rate() -> u64 {
    100
}

fn default_moderate_rate() -> u64 {
    500
}

fn default_severe_rate() -> u64 {
    1_500
}

fn default_critical_rate() -> u64 {
    5_000
}

fn default_minor_count() -> usize {
    3
}

fn default_moderate_count() -> usize {
    5
}

fn default_repeat_offender() -> u64 {
    3
}

impl Default for SlashingConfig {
    fn default() -> Self {
        Self {
            lookback_secs: default_lookback_secs(),
            minor_rate_bps: default_minor_rate(),
            moderate_rate_bps: default_moderate_rate(),
            severe_rate_bps: default_severe_rate(),
            critical_rate_bps: default_critical_rate(),
            minor_count_trigger: default_minor_count(),
            moderate_count_trigger: default_moderate_count(),
            repeat_offender_slashes: default_repeat_offender(),
        }
    }
}

/// A validator selected for slashing by `evaluate_candidates`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlashCandidate {
    pub validator_id: ValidatorId,
    pub max_severity: f64,
    pub record_count: usize,
    pub prior_slashes: u64,
    pub severity: SlashSeverity,
    pub reason: SlashReason,
}

/// Externally sourced finding of malicious behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MisbehaviorReport {
    pub validator_id: ValidatorId,
    pub evidence: String,
    pub reported_at: Timestamp,
}

/// Slash event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlashEvent {
    pub id: EventId,
    pub validator_id: ValidatorId,
    pub epoch_id: EpochId,
    pub timestamp: Timestamp,
    pub reason: SlashReason,
    pub severity: SlashSeverity,
    pub slash_amount: StakeAmount,
    /// Percent of available stake targeted by the tier
    pub slash_percentage: f64,
    /// Available stake after execution
    pub remaining_stake: StakeAmount,
    pub evidence: String,
    pub executed: bool,
    /// Amount was clipped to the available stake
    pub partial: bool,
}

/// Choose a tier from the deviation summary and slash history
pub fn classify(
    max_severity: f64,
    record_count: usize,
    prior_slashes: u64,
    config: &SlashingConfig,
) -> Option<(SlashSeverity, SlashReason)> {
    if max_severity >= 0.75 {
        Some((SlashSeverity::Severe, SlashReason::ConsensusDeviation))
    } else if max_severity >= 0.5 || record_count >= config.moderate_count_trigger {
        Some((SlashSeverity::Moderate, SlashReason::ConsensusDeviation))
    } else if max_severity >= 0.25 || record_count >= config.minor_count_trigger {
        Some((SlashSeverity::Minor, SlashReason::ConsensusDeviation))
    } else if prior_slashes >= config.repeat_offender_slashes {
        Some((SlashSeverity::Severe, SlashReason::RepeatOffender))
    } else {
        None
    }
}

/// Slashing engine
#[derive(Clone, Debug, Default)]
pub struct SlashingEngine {
    config: SlashingConfig,

    /// Executed events, append-only
    log: Vec<SlashEvent>,

    /// Timestamp of each validator's most recent executed slash
    last_slashed: BTreeMap<ValidatorId, Timestamp>,

    /// Total amount slashed since start
    total_slashed: StakeAmount,
}

impl SlashingEngine {
    pub fn new(config: SlashingConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Restore an engine from its persisted log
    pub fn restore(config: SlashingConfig, log: Vec<SlashEvent>) -> Self {
        let mut engine = Self::new(config);
        for event in log {
            engine.remember(event);
        }
        engine
    }

    fn remember(&mut self, event: SlashEvent) {
        let last = self.last_slashed.entry(event.validator_id.clone()).or_insert(event.timestamp);
        *last = (*last).max(event.timestamp);
        self.total_slashed += event.slash_amount;
        self.log.push(event);
    }

    /// Scan the trailing window for validators that warrant a slash
    ///
    /// Records at or before a validator's last executed slash have already
    /// been punished and are skipped.
    pub fn evaluate_candidates(
        &self,
        records: &[DeviationRecord],
        reputation: &ReputationTracker,
        now: Timestamp,
    ) -> Vec<SlashCandidate> {
        let window_start = now - self.config.lookback_secs;
        let mut summary: BTreeMap<&ValidatorId, (f64, usize)> = BTreeMap::new();

        for record in records {
            if record.timestamp <= window_start || record.timestamp > now {
                continue;
            }
            if let Some(&last) = self.last_slashed.get(&record.validator_id) {
                if record.timestamp <= last {
                    continue;
                }
            }

            let entry = summary.entry(&record.validator_id).or_insert((0.0, 0));
            entry.0 = entry.0.max(record.severity_score());
            entry.1 += 1;
        }

        summary
            .into_iter()
            .filter_map(|(validator_id, (max_severity, record_count))| {
                let prior_slashes = reputation.slash_count(validator_id);
                classify(max_severity, record_count, prior_slashes, &self.config).map(
                    |(severity, reason)| SlashCandidate {
                        validator_id: validator_id.clone(),
                        max_severity,
                        record_count,
                        prior_slashes,
                        severity,
                        reason,
                    },
                )
            })
            .collect()
    }

    /// Build an unexecuted event sized against the current available stake
    pub fn propose(
        &self,
        candidate: &SlashCandidate,
        registry: &StakeRegistry,
        epoch_id: EpochId,
        now: Timestamp,
    ) -> SlashEvent {
        let evidence = format!(
            "max_severity={:.2} deviations={} prior_slashes={} epoch={}",
            candidate.max_severity, candidate.record_count, candidate.prior_slashes, epoch_id.0
        );
        self.build_event(
            &candidate.validator_id,
            candidate.severity,
            candidate.reason,
            evidence,
            registry,
            epoch_id,
            now,
        )
    }

    /// Build a critical event from an external misbehavior report
    pub fn report_misbehavior(
        &self,
        report: &MisbehaviorReport,
        registry: &StakeRegistry,
        epoch_id: EpochId,
    ) -> SlashEvent {
        warn!(
            validator = %report.validator_id.short(),
            evidence = %report.evidence,
            "Misbehavior reported"
        );
        self.build_event(
            &report.validator_id,
            SlashSeverity::Critical,
            SlashReason::MaliciousBehavior,
            report.evidence.clone(),
            registry,
            epoch_id,
            report.reported_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_event(
        &self,
        validator_id: &ValidatorId,
        severity: SlashSeverity,
        reason: SlashReason,
        evidence: String,
        registry: &StakeRegistry,
        epoch_id: EpochId,
        now: Timestamp,
    ) -> SlashEvent {
        let available = registry.available(validator_id);
        let rate = severity.rate_bps(&self.config);
        let slash_amount = available * rate / BPS_DENOMINATOR;

        let id = EventId::derive(&[
            validator_id.as_str().as_bytes(),
            &now.to_le_bytes(),
            &epoch_id.0.to_le_bytes(),
            severity.name().as_bytes(),
            &(self.log.len() as u64).to_le_bytes(),
        ]);

        SlashEvent {
            id,
            validator_id: validator_id.clone(),
            epoch_id,
            timestamp: now,
            reason,
            severity,
            slash_amount,
            slash_percentage: rate as f64 / 100.0,
            remaining_stake: available,
            evidence,
            executed: false,
            partial: false,
        }
    }

    /// Debit the stake, update reputation and append to the log
    ///
    /// An amount above the available stake is clipped and the event marked
    /// partial; the stake never goes negative.
    pub fn execute_slash(
        &mut self,
        mut event: SlashEvent,
        registry: &mut StakeRegistry,
        reputation: &mut ReputationTracker,
    ) -> Result<SlashEvent> {
        if event.executed {
            return Err(NavisError::InvalidInput(format!(
                "slash {} already executed",
                event.id
            )));
        }

        let remaining = match registry.debit(&event.validator_id, event.slash_amount, event.timestamp) {
            Ok(remaining) => remaining,
            Err(NavisError::InsufficientStake { requested, available }) => {
                warn!(
                    validator = %event.validator_id.short(),
                    requested,
                    available,
                    "Slash exceeds available stake, applying partial slash"
                );
                event.slash_amount = available;
                event.partial = true;
                registry.debit(&event.validator_id, available, event.timestamp)?
            }
            Err(e) => return Err(e),
        };

        event.remaining_stake = remaining;
        event.executed = true;

        let mut demote_to = event.severity.resulting_status();
        if remaining == 0 {
            demote_to = ValidatorStatus::Slashed;
        }
        let status = reputation.record_slash(&event.validator_id, demote_to);

        info!(
            validator = %event.validator_id.short(),
            severity = event.severity.name(),
            amount = event.slash_amount,
            remaining = remaining,
            status = status.name(),
            epoch = event.epoch_id.0,
            "Slash executed"
        );

        self.remember(event.clone());
        Ok(event)
    }

    /// Evaluate and execute every candidate for one epoch
    ///
    /// A failure for one validator is logged and does not stop the others.
    pub fn run_epoch(
        &mut self,
        epoch_id: EpochId,
        records: &[DeviationRecord],
        registry: &mut StakeRegistry,
        reputation: &mut ReputationTracker,
        now: Timestamp,
    ) -> Vec<SlashEvent> {
        let candidates = self.evaluate_candidates(records, reputation, now);
        let mut executed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let event = self.propose(&candidate, registry, epoch_id, now);
            if event.slash_amount == 0 {
                debug!(validator = %candidate.validator_id.short(), "No available stake to slash");
                continue;
            }
            match self.execute_slash(event, registry, reputation) {
                Ok(event) => executed.push(event),
                Err(e) => warn!(
                    validator = %candidate.validator_id.short(),
                    error = %e,
                    "Slash execution failed"
                ),
            }
        }

        executed
    }

    /// Executed events, oldest first
    pub fn log(&self) -> &[SlashEvent] {
        &self.log
    }

    /// Total slashed amount for a validator
    pub fn slashed_for(&self, validator_id: &ValidatorId) -> StakeAmount {
        self.log
            .iter()
            .filter(|e| &e.validator_id == validator_id)
            .map(|e| e.slash_amount)
            .sum()
    }

    pub fn total_slashed(&self) -> StakeAmount {
        self.total_slashed
    }

    pub fn config(&self) -> &SlashingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationConfig;
    use crate::staking::StakeConfig;
    use navis_core::DeviationSeverity;

    fn record(id: &str, severity: DeviationSeverity, timestamp: Timestamp) -> DeviationRecord {
        DeviationRecord {
            validator_id: ValidatorId::new(id),
            epoch_id: EpochId(1),
            timestamp,
            magnitude: 0.1,
            severity,
        }
    }

    fn setup() -> (SlashingEngine, StakeRegistry, ReputationTracker) {
        let mut registry = StakeRegistry::new(StakeConfig { minimum_required: 5_000 });
        registry.sync_stake(&ValidatorId::new("v1"), 10_000, 0);
        registry.sync_stake(&ValidatorId::new("v2"), 10_000, 0);
        (
            SlashingEngine::default(),
            registry,
            ReputationTracker::new(ReputationConfig::default()),
        )
    }

    #[test]
    fn test_classification_precedence() {
        let config = SlashingConfig::default();
        assert_eq!(classify(1.0, 1, 0, &config), Some((SlashSeverity::Severe, SlashReason::ConsensusDeviation)));
        assert_eq!(classify(0.75, 1, 0, &config).map(|c| c.0), Some(SlashSeverity::Severe));
        assert_eq!(classify(0.5, 1, 0, &config).map(|c| c.0), Some(SlashSeverity::Moderate));
        assert_eq!(classify(0.0, 5, 0, &config).map(|c| c.0), Some(SlashSeverity::Moderate));
        assert_eq!(classify(0.25, 1, 0, &config).map(|c| c.0), Some(SlashSeverity::Minor));
        assert_eq!(classify(0.0, 3, 0, &config).map(|c| c.0), Some(SlashSeverity::Minor));
        assert_eq!(classify(0.0, 2, 3, &config), Some((SlashSeverity::Severe, SlashReason::RepeatOffender)));
        assert_eq!(classify(0.0, 2, 2, &config), None);
    }

    #[test]
    fn test_rates() {
        let config = SlashingConfig::default();
        assert_eq!(SlashSeverity::Minor.rate_bps(&config), 100);
        assert_eq!(SlashSeverity::Moderate.rate_bps(&config), 500);
        assert_eq!(SlashSeverity::Severe.rate_bps(&config), 1_500);
        assert_eq!(SlashSeverity::Critical.rate_bps(&config), 5_000);
    }

    #[test]
    fn test_evaluate_uses_trailing_hour_only() {
        let (engine, _, reputation) = setup();
        let now = 10_000;
        let records = vec![
            record("v1", DeviationSeverity::Extreme, now - 4_000),
            record("v1", DeviationSeverity::Low, now - 100),
            record("v2", DeviationSeverity::Medium, now - 10),
        ];

        let candidates = engine.evaluate_candidates(&records, &reputation, now);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].validator_id, ValidatorId::new("v1"));
        assert_eq!(candidates[0].severity, SlashSeverity::Minor);
        assert_eq!(candidates[0].record_count, 1);
        assert_eq!(candidates[1].severity, SlashSeverity::Moderate);
    }

    #[test]
    fn test_execute_slash_updates_stake_and_reputation() {
        let (mut engine, mut registry, mut reputation) = setup();
        let now = 1_000;
        let records = vec![record("v1", DeviationSeverity::High, now)];

        let events = engine.run_epoch(EpochId(1), &records, &mut registry, &mut reputation, now);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.executed);
        assert_eq!(event.severity, SlashSeverity::Severe);
        assert_eq!(event.slash_amount, 1_500);
        assert_eq!(event.remaining_stake, 8_500);
        assert_eq!(event.slash_percentage, 15.0);
        assert_eq!(registry.available(&ValidatorId::new("v1")), 8_500);
        assert_eq!(reputation.status(&ValidatorId::new("v1")), ValidatorStatus::Probation);
        assert_eq!(reputation.slash_count(&ValidatorId::new("v1")), 1);
        assert_eq!(engine.total_slashed(), 1_500);
    }

    #[test]
    fn test_records_not_counted_twice() {
        let (mut engine, mut registry, mut reputation) = setup();
        let records = vec![record("v1", DeviationSeverity::Low, 1_000)];

        let first = engine.run_epoch(EpochId(1), &records, &mut registry, &mut reputation, 1_000);
        let second = engine.run_epoch(EpochId(2), &records, &mut registry, &mut reputation, 1_100);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_oversized_slash_is_clipped() {
        let (mut engine, mut registry, mut reputation) = setup();
        let id = ValidatorId::new("v1");
        let candidate = SlashCandidate {
            validator_id: id.clone(),
            max_severity: 1.0,
            record_count: 1,
            prior_slashes: 0,
            severity: SlashSeverity::Severe,
            reason: SlashReason::ConsensusDeviation,
        };
        let mut event = engine.propose(&candidate, &registry, EpochId(1), 5);
        event.slash_amount = 50_000;

        let event = engine.execute_slash(event, &mut registry, &mut reputation).unwrap();

        assert!(event.partial);
        assert_eq!(event.slash_amount, 10_000);
        assert_eq!(event.remaining_stake, 0);
        assert_eq!(registry.available(&id), 0);
        assert_eq!(reputation.status(&id), ValidatorStatus::Slashed);
    }

    #[test]
    fn test_critical_report_suspends() {
        let (mut engine, mut registry, mut reputation) = setup();
        let id = ValidatorId::new("v2");
        let report = MisbehaviorReport {
            validator_id: id.clone(),
            evidence: "double publication".to_string(),
            reported_at: 42,
        };

        let event = engine.report_misbehavior(&report, &registry, EpochId(3));
        assert_eq!(event.severity, SlashSeverity::Critical);
        assert_eq!(event.slash_amount, 5_000);

        engine.execute_slash(event, &mut registry, &mut reputation).unwrap();
        assert_eq!(reputation.status(&id), ValidatorStatus::Suspended);
        assert_eq!(registry.available(&id), 5_000);
        assert_eq!(engine.slashed_for(&id), 5_000);
    }

    #[test]
    fn test_executed_event_cannot_replay() {
        let (mut engine, mut registry, mut reputation) = setup();
        let records = vec![record("v1", DeviationSeverity::Low, 10)];
        let events = engine.run_epoch(EpochId(1), &records, &mut registry, &mut reputation, 10);

        let replay = engine.execute_slash(events[0].clone(), &mut registry, &mut reputation);

        assert!(matches!(replay, Err(NavisError::InvalidInput(_))));
        assert_eq!(engine.log().len(), 1);
    }
}
