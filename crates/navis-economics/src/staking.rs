//! # Stake Registry
//!
//! Local, advisory copy of every validator's stake as last reported by the
//! ledger, minus the slashes this validator has applied since.
//!
//! ## Accounting
//!
//! ```text
//! available = total - slashed - locked        (never negative)
//! ```
//!
//! | Mutation | Source | Effect |
//! |----------|--------|--------|
//! | `sync_stake` | ledger | total := ledger value, slashed := 0 |
//! | `debit` | slashing engine | slashed += amount |
//! | `lock` / `unlock` | operator | locked ± amount |
//!
//! Entries are never removed; a validator that leaves the active set is
//! deactivated and keeps its record.

use navis_core::constants::ONE_TOKEN;
use navis_core::{NavisError, Result, StakeAmount, Timestamp, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Stake registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeConfig {
    /// Minimum available stake for consensus eligibility
    #[serde(default = "default_minimum_required")]
    pub minimum_required: u64,
}

fn default_minimum_required() -> u64 {
    1_000 * ONE_TOKEN as u64
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            minimum_required: default_minimum_required(),
        }
    }
}

/// Validator stake information
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorStake {
    /// Validator ID
    pub validator_id: ValidatorId,

    /// Total stake reported by the ledger
    pub total_stake: StakeAmount,

    /// Locked amount (not slashable, not counted as available)
    pub locked_stake: StakeAmount,

    /// Slashed locally since the last ledger sync
    pub slashed_stake: StakeAmount,

    /// total - slashed - locked
    pub available_stake: StakeAmount,

    /// Minimum available stake for eligibility
    pub minimum_required: StakeAmount,

    /// Last mutation timestamp
    pub last_updated: Timestamp,

    /// Member of the ledger's active validator set
    pub is_active: bool,
}

impl ValidatorStake {
    /// Create new validator stake
    pub fn new(
        validator_id: ValidatorId,
        total_stake: StakeAmount,
        minimum_required: StakeAmount,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            validator_id,
            total_stake,
            locked_stake: 0,
            slashed_stake: 0,
            available_stake: total_stake,
            minimum_required,
            last_updated: timestamp,
            is_active: true,
        }
    }

    fn recompute(&mut self) {
        self.available_stake = self
            .total_stake
            .saturating_sub(self.slashed_stake)
            .saturating_sub(self.locked_stake);
    }

    /// Check if available stake meets the minimum requirement
    pub fn meets_minimum(&self) -> bool {
        self.available_stake >= self.minimum_required
    }

    /// Debit a slash from the available stake
    pub fn apply_slash(&mut self, amount: StakeAmount, timestamp: Timestamp) -> Result<StakeAmount> {
        if amount > self.available_stake {
            return Err(NavisError::InsufficientStake {
                requested: amount,
                available: self.available_stake,
            });
        }

        self.slashed_stake += amount;
        self.recompute();
        self.last_updated = timestamp;

        Ok(self.available_stake)
    }
}

/// Stake registry
#[derive(Clone, Debug, Default)]
pub struct StakeRegistry {
    validators: BTreeMap<ValidatorId, ValidatorStake>,
    config: StakeConfig,
}

impl StakeRegistry {
    /// Create new stake registry
    pub fn new(config: StakeConfig) -> Self {
        Self {
            validators: BTreeMap::new(),
            config,
        }
    }

    /// Restore a registry from a snapshot
    pub fn restore(config: StakeConfig, stakes: Vec<ValidatorStake>) -> Self {
        let validators = stakes
            .into_iter()
            .map(|s| (s.validator_id.clone(), s))
            .collect();
        Self { validators, config }
    }

    /// Apply the ledger's view of a validator's stake
    ///
    /// The ledger is authoritative: locally applied slashes are cleared and
    /// the validator becomes eligible again if the new total allows it.
    pub fn sync_stake(&mut self, validator_id: &ValidatorId, ledger_stake: StakeAmount, timestamp: Timestamp) {
        let minimum = StakeAmount::from(self.config.minimum_required);
        match self.validators.get_mut(validator_id) {
            Some(stake) => {
                stake.total_stake = ledger_stake;
                stake.slashed_stake = 0;
                stake.locked_stake = stake.locked_stake.min(ledger_stake);
                stake.minimum_required = minimum;
                stake.is_active = true;
                stake.last_updated = timestamp;
                stake.recompute();
            }
            None => {
                info!(validator = %validator_id.short(), stake = ledger_stake, "Validator registered");
                self.validators.insert(
                    validator_id.clone(),
                    ValidatorStake::new(validator_id.clone(), ledger_stake, minimum, timestamp),
                );
            }
        }
    }

    /// Deactivate every validator missing from the ledger's active set
    pub fn retain_active(&mut self, active_set: &[ValidatorId], timestamp: Timestamp) -> usize {
        let active: BTreeSet<&ValidatorId> = active_set.iter().collect();
        let mut deactivated = 0;

        for stake in self.validators.values_mut() {
            if stake.is_active && !active.contains(&stake.validator_id) {
                stake.is_active = false;
                stake.last_updated = timestamp;
                deactivated += 1;
                debug!(validator = %stake.validator_id.short(), "Validator left active set");
            }
        }

        deactivated
    }

    /// Get validator stake
    pub fn get(&self, validator_id: &ValidatorId) -> Option<&ValidatorStake> {
        self.validators.get(validator_id)
    }

    /// Available stake, zero for unknown validators
    pub fn available(&self, validator_id: &ValidatorId) -> StakeAmount {
        self.get(validator_id).map(|s| s.available_stake).unwrap_or(0)
    }

    /// Active and above the minimum available stake
    pub fn meets_minimum(&self, validator_id: &ValidatorId) -> bool {
        self.get(validator_id)
            .map(|s| s.is_active && s.meets_minimum())
            .unwrap_or(false)
    }

    /// Debit a slash; fails without mutating if the amount exceeds available stake
    pub fn debit(&mut self, validator_id: &ValidatorId, amount: StakeAmount, timestamp: Timestamp) -> Result<StakeAmount> {
        self.validators
            .get_mut(validator_id)
            .ok_or_else(|| NavisError::UnknownValidator(validator_id.clone()))?
            .apply_slash(amount, timestamp)
    }

    /// Move available stake into the locked bucket
    pub fn lock(&mut self, validator_id: &ValidatorId, amount: StakeAmount, timestamp: Timestamp) -> Result<()> {
        let stake = self
            .validators
            .get_mut(validator_id)
            .ok_or_else(|| NavisError::UnknownValidator(validator_id.clone()))?;

        if amount > stake.available_stake {
            return Err(NavisError::InsufficientStake {
                requested: amount,
                available: stake.available_stake,
            });
        }

        stake.locked_stake += amount;
        stake.last_updated = timestamp;
        stake.recompute();
        Ok(())
    }

    /// Release locked stake back to available
    pub fn unlock(&mut self, validator_id: &ValidatorId, amount: StakeAmount, timestamp: Timestamp) -> Result<()> {
        let stake = self
            .validators
            .get_mut(validator_id)
            .ok_or_else(|| NavisError::UnknownValidator(validator_id.clone()))?;

        stake.locked_stake = stake.locked_stake.saturating_sub(amount);
        stake.last_updated = timestamp;
        stake.recompute();
        Ok(())
    }

    /// Validators currently in the ledger's active set
    pub fn active_validators(&self) -> Vec<&ValidatorStake> {
        self.validators.values().filter(|s| s.is_active).collect()
    }

    /// Total available stake across active validators
    pub fn total_available(&self) -> StakeAmount {
        self.active_validators().iter().map(|s| s.available_stake).sum()
    }

    /// Snapshot of every record, ordered by validator id
    pub fn stakes(&self) -> Vec<ValidatorStake> {
        self.validators.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn config(&self) -> &StakeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StakeRegistry {
        StakeRegistry::new(StakeConfig {
            minimum_required: 100,
        })
    }

    #[test]
    fn test_sync_registers_validator() {
        let mut registry = registry();
        let id = ValidatorId::new("v1");

        registry.sync_stake(&id, 1_000, 10);

        let stake = registry.get(&id).unwrap();
        assert_eq!(stake.total_stake, 1_000);
        assert_eq!(stake.available_stake, 1_000);
        assert_eq!(stake.minimum_required, 100);
        assert!(registry.meets_minimum(&id));
    }

    #[test]
    fn test_debit_keeps_invariant() {
        let mut registry = registry();
        let id = ValidatorId::new("v1");
        registry.sync_stake(&id, 1_000, 0);
        registry.lock(&id, 200, 1).unwrap();

        let remaining = registry.debit(&id, 300, 2).unwrap();

        let stake = registry.get(&id).unwrap();
        assert_eq!(remaining, 500);
        assert_eq!(
            stake.available_stake,
            stake.total_stake - stake.slashed_stake - stake.locked_stake
        );
    }

    #[test]
    fn test_debit_beyond_available_rejected() {
        let mut registry = registry();
        let id = ValidatorId::new("v1");
        registry.sync_stake(&id, 50, 0);

        let result = registry.debit(&id, 51, 1);

        assert_eq!(
            result,
            Err(NavisError::InsufficientStake { requested: 51, available: 50 })
        );
        assert_eq!(registry.available(&id), 50);
    }

    #[test]
    fn test_resync_clears_local_slashes() {
        let mut registry = registry();
        let id = ValidatorId::new("v1");
        registry.sync_stake(&id, 150, 0);
        registry.debit(&id, 100, 1).unwrap();
        assert!(!registry.meets_minimum(&id));

        registry.sync_stake(&id, 140, 2);

        let stake = registry.get(&id).unwrap();
        assert_eq!(stake.slashed_stake, 0);
        assert_eq!(stake.available_stake, 140);
        assert!(registry.meets_minimum(&id));
    }

    #[test]
    fn test_retain_active_deactivates_without_removing() {
        let mut registry = registry();
        let a = ValidatorId::new("a");
        let b = ValidatorId::new("b");
        registry.sync_stake(&a, 500, 0);
        registry.sync_stake(&b, 500, 0);

        let deactivated = registry.retain_active(&[a.clone()], 5);

        assert_eq!(deactivated, 1);
        assert_eq!(registry.len(), 2);
        assert!(!registry.meets_minimum(&b));
        assert_eq!(registry.active_validators().len(), 1);
        assert_eq!(registry.total_available(), 500);
    }

    #[test]
    fn test_lock_beyond_available_rejected() {
        let mut registry = registry();
        let id = ValidatorId::new("v1");
        registry.sync_stake(&id, 100, 0);

        assert!(registry.lock(&id, 101, 1).is_err());
        registry.lock(&id, 60, 1).unwrap();
        registry.unlock(&id, 20, 2).unwrap();
        assert_eq!(registry.available(&id), 60);
    }

    #[test]
    fn test_unknown_validator() {
        let mut registry = registry();
        let id = ValidatorId::new("ghost");
        assert!(matches!(
            registry.debit(&id, 1, 0),
            Err(NavisError::UnknownValidator(_))
        ));
    }
}
