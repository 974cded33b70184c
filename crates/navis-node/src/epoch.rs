//! # Epoch Manager
//!
//! Owns every validator-local table and runs the per-epoch pipeline.
//!
//! ```text
//!  Collecting ──► Consensing ──► Slashing ──► Rewarding ──► Archived
//!      ▲                                                       │
//!      └──────────────────────── next epoch ───────────────────┘
//! ```
//!
//! Phases run strictly in order. A phase that fails is recorded as skipped
//! in the [`EpochReport`] and the epoch still advances.

use crate::archive::StateSnapshot;
use crate::config::NodeConfig;
use navis_consensus::{DeviationReport, DeviationWindow, WeightConsensusEngine};
use navis_core::{
    DeviationRecord, EpochId, NavisError, Result, StakeAmount, Timestamp, ValidatorId,
};
use navis_economics::{
    EpochRewardDistribution, MinerTransaction, MisbehaviorReport, RawMinerEvent, ReputationTracker,
    RewardAllocator, SlashEvent, SlashingEngine, StakeRegistry, ValidatorStatus, VolumeLedger,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Epoch phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpochPhase {
    #[default]
    Collecting,
    Consensing,
    Slashing,
    Rewarding,
    Archived,
}

impl EpochPhase {
    /// The only phase this one may move to
    pub fn successor(&self) -> Self {
        match self {
            Self::Collecting => Self::Consensing,
            Self::Consensing => Self::Slashing,
            Self::Slashing => Self::Rewarding,
            Self::Rewarding => Self::Archived,
            Self::Archived => Self::Collecting,
        }
    }

    /// Validate a move to `to`
    pub fn transition(self, to: EpochPhase) -> Result<EpochPhase> {
        if self.successor() == to {
            Ok(to)
        } else {
            Err(NavisError::InvalidPhaseTransition {
                from: self.name().to_string(),
                to: to.name().to_string(),
            })
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Consensing => "consensing",
            Self::Slashing => "slashing",
            Self::Rewarding => "rewarding",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed,
    Skipped { reason: String },
}

impl PhaseOutcome {
    pub fn skipped(reason: impl ToString) -> Self {
        Self::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Archived record of one closed epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch_id: EpochId,
    pub closed_at: Timestamp,
    pub consensus: PhaseOutcome,
    pub slashing: PhaseOutcome,
    pub rewarding: PhaseOutcome,
    /// Submissions received for the epoch
    pub submissions: usize,
    /// Eligible submissions that formed the median
    pub participants: usize,
    pub consensus_vector: Option<Vec<f64>>,
    pub deviations: Vec<DeviationRecord>,
    pub slashes: Vec<SlashEvent>,
    pub distribution: Option<EpochRewardDistribution>,
}

impl EpochReport {
    /// Phases that did not complete, with their reasons
    pub fn skipped_phases(&self) -> Vec<(EpochPhase, &str)> {
        [
            (EpochPhase::Consensing, &self.consensus),
            (EpochPhase::Slashing, &self.slashing),
            (EpochPhase::Rewarding, &self.rewarding),
        ]
        .into_iter()
        .filter_map(|(phase, outcome)| match outcome {
            PhaseOutcome::Skipped { reason } => Some((phase, reason.as_str())),
            PhaseOutcome::Completed => None,
        })
        .collect()
    }
}

/// Single owner of the per-validator tables
pub struct EpochManager {
    validator_id: ValidatorId,
    current: EpochId,
    phase: EpochPhase,
    emissions_per_epoch: f64,

    registry: StakeRegistry,
    reputation: ReputationTracker,
    consensus: WeightConsensusEngine,
    deviations: DeviationWindow,
    slashing: SlashingEngine,
    volume: VolumeLedger,
    allocator: RewardAllocator,
}

impl EpochManager {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            validator_id: config.validator_id(),
            current: EpochId(1),
            phase: EpochPhase::Collecting,
            emissions_per_epoch: config.rewards.emissions_per_epoch,
            registry: StakeRegistry::new(config.stake.clone()),
            reputation: ReputationTracker::new(config.reputation.clone()),
            consensus: WeightConsensusEngine::new(config.consensus.clone()),
            deviations: DeviationWindow::new(config.consensus.retention_secs),
            slashing: SlashingEngine::new(config.slashing.clone()),
            volume: VolumeLedger::new(config.volume.clone()),
            allocator: RewardAllocator::new(config.scoring.clone(), config.rewards.clone()),
        }
    }

    /// Resume from a persisted snapshot
    pub fn restore(config: &NodeConfig, snapshot: StateSnapshot) -> Self {
        let mut manager = Self::new(config);
        manager.current = snapshot.next_epoch;
        manager.registry = StakeRegistry::restore(config.stake.clone(), snapshot.stakes);
        manager.reputation = ReputationTracker::restore(config.reputation.clone(), snapshot.reputation);
        manager.deviations = DeviationWindow::restore(config.consensus.retention_secs, snapshot.deviations);
        manager.slashing = SlashingEngine::restore(config.slashing.clone(), snapshot.slash_log);
        info!(
            epoch = manager.current.0,
            validators = manager.registry.len(),
            "State restored from snapshot"
        );
        manager
    }

    /// Persistable view of the carried-forward state
    pub fn snapshot(&self, saved_at: Timestamp) -> StateSnapshot {
        StateSnapshot {
            next_epoch: self.current,
            saved_at,
            stakes: self.registry.stakes(),
            reputation: self.reputation.records(),
            deviations: self.deviations.records(),
            slash_log: self.slashing.log().to_vec(),
        }
    }

    fn advance(&mut self, to: EpochPhase) -> Result<()> {
        self.phase = self.phase.transition(to)?;
        debug!(epoch = self.current.0, phase = %self.phase, "Phase entered");
        Ok(())
    }

    // ========================================================================
    // Collecting
    // ========================================================================

    /// Accept a weight submission for the current or a future epoch
    pub fn submit_weights(&mut self, validator_id: ValidatorId, epoch_id: EpochId, weights: Vec<f64>) -> Result<()> {
        if epoch_id < self.current {
            return Err(NavisError::InvalidInput(format!(
                "submission for closed epoch {} (current {})",
                epoch_id.0, self.current.0
            )));
        }
        self.consensus.submit(validator_id, epoch_id, weights)
    }

    /// Validate a raw feed event and add it to the volume ledger
    pub fn record_transaction(&mut self, event: RawMinerEvent, now: Timestamp) -> Result<()> {
        let tx = MinerTransaction::try_from(event)?;
        self.volume.record(&tx, now)
    }

    /// Apply the ledger's stake for one validator
    pub fn sync_stake(&mut self, validator_id: &ValidatorId, stake: StakeAmount, now: Timestamp) {
        self.registry.sync_stake(validator_id, stake, now);
    }

    /// Deactivate validators that left the ledger's active set
    pub fn retain_active(&mut self, active_set: &[ValidatorId], now: Timestamp) -> usize {
        self.registry.retain_active(active_set, now)
    }

    /// Execute a critical slash from an external finding
    pub fn report_misbehavior(&mut self, report: &MisbehaviorReport) -> Result<SlashEvent> {
        if self.registry.get(&report.validator_id).is_none() {
            return Err(NavisError::UnknownValidator(report.validator_id.clone()));
        }
        let event = self.slashing.report_misbehavior(report, &self.registry, self.current);
        self.slashing
            .execute_slash(event, &mut self.registry, &mut self.reputation)
    }

    /// Eligible to count toward consensus
    pub fn is_eligible(&self, validator_id: &ValidatorId) -> bool {
        Self::eligible(&self.registry, &self.reputation, validator_id)
    }

    fn eligible(registry: &StakeRegistry, reputation: &ReputationTracker, validator_id: &ValidatorId) -> bool {
        registry.meets_minimum(validator_id) && reputation.status(validator_id) == ValidatorStatus::Active
    }

    pub fn eligible_count(&self) -> usize {
        self.registry
            .active_validators()
            .iter()
            .filter(|s| self.is_eligible(&s.validator_id))
            .count()
    }

    /// Whether the validator already has a live submission this epoch
    pub fn has_submitted(&self, validator_id: &ValidatorId) -> bool {
        self.consensus.submission(self.current, validator_id).is_some()
    }

    /// Current-epoch submissions from eligible validators
    pub fn eligible_submissions(&self) -> usize {
        self.consensus
            .submitters(self.current)
            .iter()
            .filter(|id| self.is_eligible(id))
            .count()
    }

    /// This validator's own weight vector from the volume seen so far
    pub fn preview_weights(&self, now: Timestamp) -> Vec<f64> {
        let records = self.volume.epoch_records();
        let preview = self
            .allocator
            .distribute(self.current, &records, self.emissions_per_epoch, now);
        RewardAllocator::weight_vector(&preview, self.consensus.config().entity_count)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Run Consensing through Archived for the current epoch
    ///
    /// `peer_fault` carries the reason peer collection failed (quorum
    /// timeout, directory unreachable); the consensus phase is skipped.
    pub fn close_epoch(&mut self, now: Timestamp, peer_fault: Option<String>) -> Result<EpochReport> {
        let epoch_id = self.current;
        info!(epoch = epoch_id.0, "Closing epoch");

        self.advance(EpochPhase::Consensing)?;
        let submissions = self.consensus.submission_count(epoch_id);
        let (consensus, participants, consensus_vector, deviations) = match peer_fault {
            Some(reason) => {
                warn!(epoch = epoch_id.0, reason = %reason, "Consensus phase skipped");
                (PhaseOutcome::skipped(reason), 0, None, Vec::new())
            }
            None => self.run_consensus(epoch_id, now),
        };

        self.advance(EpochPhase::Slashing)?;
        self.deviations.purge(now);
        let slashes = self.slashing.run_epoch(
            epoch_id,
            &self.deviations.records(),
            &mut self.registry,
            &mut self.reputation,
            now,
        );

        self.advance(EpochPhase::Rewarding)?;
        let records = self.volume.epoch_records();
        let (rewarding, distribution) = if records.is_empty() {
            (PhaseOutcome::skipped("no miner volume this epoch"), None)
        } else {
            let distribution = self
                .allocator
                .distribute(epoch_id, &records, self.emissions_per_epoch, now);
            if distribution.miner_profiles.is_empty() {
                (PhaseOutcome::skipped("no miner above minimum volume"), None)
            } else {
                info!(
                    epoch = epoch_id.0,
                    miners = distribution.miner_profiles.len(),
                    gini = distribution.gini_coefficient,
                    top10 = distribution.top10_concentration,
                    "Rewards allocated"
                );
                (PhaseOutcome::Completed, Some(distribution))
            }
        };

        self.advance(EpochPhase::Archived)?;
        self.volume.reset_epoch();
        self.consensus.clear_epoch(epoch_id);

        let report = EpochReport {
            epoch_id,
            closed_at: now,
            consensus,
            slashing: PhaseOutcome::Completed,
            rewarding,
            submissions,
            participants,
            consensus_vector,
            deviations,
            slashes,
            distribution,
        };

        self.advance(EpochPhase::Collecting)?;
        self.current = epoch_id.next();
        Ok(report)
    }

    #[allow(clippy::type_complexity)]
    fn run_consensus(
        &mut self,
        epoch_id: EpochId,
        now: Timestamp,
    ) -> (PhaseOutcome, usize, Option<Vec<f64>>, Vec<DeviationRecord>) {
        let registry = &self.registry;
        let reputation = &self.reputation;
        let participants = self
            .consensus
            .submitters(epoch_id)
            .iter()
            .filter(|id| Self::eligible(registry, reputation, id))
            .count();

        let vector = match self
            .consensus
            .compute_consensus(epoch_id, |id| Self::eligible(registry, reputation, id))
        {
            Ok(vector) => vector,
            Err(e) => {
                warn!(epoch = epoch_id.0, error = %e, "Consensus phase skipped");
                return (PhaseOutcome::skipped(e), participants, None, Vec::new());
            }
        };

        let report = match self.consensus.detect_deviations(epoch_id, now) {
            Ok(report) => report,
            Err(e) => return (PhaseOutcome::skipped(e), participants, Some(vector), Vec::new()),
        };

        self.apply_reputation(&report);
        self.deviations.extend(report.records.iter().cloned());

        (PhaseOutcome::Completed, participants, Some(vector), report.records)
    }

    fn apply_reputation(&mut self, report: &DeviationReport) {
        for (validator_id, magnitude) in &report.magnitudes {
            self.reputation
                .record_submission(validator_id, *magnitude, report.deviated(validator_id));
        }

        let missed: Vec<ValidatorId> = self
            .registry
            .active_validators()
            .iter()
            .map(|s| s.validator_id.clone())
            .filter(|id| !report.magnitudes.contains_key(id))
            .collect();
        for validator_id in &missed {
            self.reputation.record_missed(validator_id);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn validator_id(&self) -> &ValidatorId {
        &self.validator_id
    }

    pub fn current_epoch(&self) -> EpochId {
        self.current
    }

    pub fn phase(&self) -> EpochPhase {
        self.phase
    }

    pub fn registry(&self) -> &StakeRegistry {
        &self.registry
    }

    pub fn reputation(&self) -> &ReputationTracker {
        &self.reputation
    }

    pub fn slashing(&self) -> &SlashingEngine {
        &self.slashing
    }

    pub fn volume(&self) -> &VolumeLedger {
        &self.volume
    }

    pub fn deviation_window(&self) -> &DeviationWindow {
        &self.deviations
    }

    pub fn entity_count(&self) -> usize {
        self.consensus.config().entity_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navis_economics::RewardTier;

    const STAKE: StakeAmount = 10_000;

    fn config(entity_count: usize) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.validator_id = "v1".into();
        config.consensus.entity_count = entity_count;
        config.stake.minimum_required = 1_000;
        config
    }

    fn manager_with(validators: &[&str], entity_count: usize) -> EpochManager {
        let mut manager = EpochManager::new(&config(entity_count));
        for id in validators {
            manager.sync_stake(&ValidatorId::new(*id), STAKE, 0);
        }
        manager
    }

    fn creation(miner_id: u16, amount: f64, timestamp: Timestamp) -> RawMinerEvent {
        RawMinerEvent {
            miner_id,
            amount,
            is_creation: true,
            timestamp,
        }
    }

    #[test]
    fn test_phase_order_is_strict() {
        assert_eq!(
            EpochPhase::Collecting.transition(EpochPhase::Consensing),
            Ok(EpochPhase::Consensing)
        );
        assert!(matches!(
            EpochPhase::Collecting.transition(EpochPhase::Rewarding),
            Err(NavisError::InvalidPhaseTransition { .. })
        ));
        assert!(EpochPhase::Archived.transition(EpochPhase::Collecting).is_ok());
        assert!(EpochPhase::Slashing.transition(EpochPhase::Consensing).is_err());
    }

    #[test]
    fn test_full_pipeline_scenario() {
        let mut manager = manager_with(&["v1", "v2", "v3"], 4);
        let epoch = manager.current_epoch();
        manager.submit_weights("v1".into(), epoch, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        manager.submit_weights("v2".into(), epoch, vec![0.12, 0.18, 0.32, 0.38]).unwrap();
        manager.submit_weights("v3".into(), epoch, vec![0.5, 0.1, 0.1, 0.3]).unwrap();
        manager.record_transaction(creation(2, 100.0, 100), 100).unwrap();

        let report = manager.close_epoch(100, None).unwrap();

        assert!(report.consensus.is_completed());
        assert_eq!(report.participants, 3);
        assert_eq!(report.deviations.len(), 1);
        assert_eq!(report.slashes.len(), 1);
        let slash = &report.slashes[0];
        assert_eq!(slash.validator_id, ValidatorId::new("v3"));
        assert_eq!(slash.slash_amount, 1_500);
        assert_eq!(manager.registry().available(&"v3".into()), 8_500);
        assert!(!manager.is_eligible(&"v3".into()));
        assert!(manager.is_eligible(&"v1".into()));

        let distribution = report.distribution.unwrap();
        assert_eq!(distribution.miner_profiles[0].tier, RewardTier::Diamond);
        assert_eq!(manager.current_epoch(), epoch.next());
        assert_eq!(manager.phase(), EpochPhase::Collecting);
        assert_eq!(manager.volume().get(&navis_core::MinerId(2)).unwrap().epoch_volume(), 0.0);
    }

    #[test]
    fn test_insufficient_participants_skips_only_consensus() {
        let mut manager = manager_with(&["v1", "v2"], 2);
        let epoch = manager.current_epoch();
        manager.submit_weights("v1".into(), epoch, vec![0.5, 0.5]).unwrap();
        manager.record_transaction(creation(1, 10.0, 0), 0).unwrap();

        let report = manager.close_epoch(0, None).unwrap();

        assert!(matches!(report.consensus, PhaseOutcome::Skipped { .. }));
        assert!(report.slashing.is_completed());
        assert!(report.rewarding.is_completed());
        assert_eq!(report.skipped_phases().len(), 1);
        assert_eq!(manager.current_epoch(), epoch.next());
    }

    #[test]
    fn test_peer_fault_skips_consensus() {
        let mut manager = manager_with(&["v1", "v2", "v3"], 1);
        let epoch = manager.current_epoch();
        for id in ["v1", "v2", "v3"] {
            manager.submit_weights(id.into(), epoch, vec![1.0]).unwrap();
        }

        let report = manager.close_epoch(0, Some("quorum timeout".into())).unwrap();

        assert_eq!(
            report.consensus,
            PhaseOutcome::Skipped {
                reason: "quorum timeout".into()
            }
        );
        assert!(report.consensus_vector.is_none());
        assert!(matches!(report.rewarding, PhaseOutcome::Skipped { .. }));
    }

    #[test]
    fn test_closed_epoch_submission_rejected() {
        let mut manager = manager_with(&["v1"], 1);
        manager.close_epoch(0, None).unwrap();

        let result = manager.submit_weights("v1".into(), EpochId(1), vec![1.0]);
        assert!(matches!(result, Err(NavisError::InvalidInput(_))));
        manager.submit_weights("v1".into(), EpochId(2), vec![1.0]).unwrap();
    }

    #[test]
    fn test_missed_submission_lowers_reliability() {
        let mut manager = manager_with(&["v1", "v2", "v3", "v4"], 1);
        let epoch = manager.current_epoch();
        for id in ["v1", "v2", "v3"] {
            manager.submit_weights(id.into(), epoch, vec![1.0]).unwrap();
        }

        manager.close_epoch(0, None).unwrap();

        let missed = manager.reputation().get(&"v4".into()).unwrap();
        assert_eq!(missed.total_submissions, 0);
        assert_eq!(missed.epochs_observed, 1);
        assert_eq!(missed.reliability_score, 0.0);
        let present = manager.reputation().get(&"v1".into()).unwrap();
        assert_eq!(present.reliability_score, 1.0);
    }

    #[test]
    fn test_critical_report() {
        let mut manager = manager_with(&["v1", "v2"], 1);
        let report = MisbehaviorReport {
            validator_id: "v2".into(),
            evidence: "equivocation".into(),
            reported_at: 50,
        };

        let event = manager.report_misbehavior(&report).unwrap();

        assert_eq!(event.slash_amount, STAKE / 2);
        assert_eq!(manager.reputation().status(&"v2".into()), ValidatorStatus::Suspended);

        let unknown = MisbehaviorReport {
            validator_id: "ghost".into(),
            ..report
        };
        assert!(matches!(
            manager.report_misbehavior(&unknown),
            Err(NavisError::UnknownValidator(_))
        ));
    }

    #[test]
    fn test_preview_weights_follow_volume() {
        let mut manager = manager_with(&["v1"], 4);
        manager.record_transaction(creation(1, 30.0, 0), 0).unwrap();
        manager.record_transaction(creation(3, 10.0, 0), 0).unwrap();

        let weights = manager.preview_weights(0);

        assert_eq!(weights.len(), 4);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights[1] > weights[3]);
        assert_eq!(weights[0], 0.0);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut manager = manager_with(&["v1", "v2"], 1);
        manager
            .report_misbehavior(&MisbehaviorReport {
                validator_id: "v2".into(),
                evidence: "double sign".into(),
                reported_at: 5,
            })
            .unwrap();
        manager.close_epoch(10, None).unwrap();

        let snapshot = manager.snapshot(10);
        let restored = EpochManager::restore(&config(1), snapshot);

        assert_eq!(restored.current_epoch(), EpochId(2));
        assert_eq!(restored.registry().available(&"v2".into()), STAKE / 2);
        assert_eq!(restored.slashing().log().len(), 1);
        assert_eq!(restored.reputation().status(&"v2".into()), ValidatorStatus::Suspended);
    }
}
