//! # Reward Allocation
//!
//! Turns ranked miner volume into a bounded, tier-bonused payout vector.
//!
//! ## Emission Split
//!
//! 1. **Base pool** (70%): proportional to weighted score across all ranked miners
//! 2. **Tier bonus pool** (25%): fixed slices per tier, see below
//! 3. **Validator pool** (5%): reported, not paid to miners
//!
//! ## Tiers
//!
//! | Tier | Ranks | Bonus slice |
//! |------|-------|-------------|
//! | Diamond | 1 | 40% |
//! | Platinum | 2 | 25% |
//! | Gold | 3-5 | 20% |
//! | Silver | 6-10 | 10% |
//! | Bronze | 11-20 | 5% |
//! | Base | 21+ | - |
//!
//! Slices of unoccupied tiers roll into the base pool, so miner payouts
//! always sum to base pool + tier bonus pool.

use crate::fairness;
use crate::volume::VolumeRecord;
use navis_core::{EpochId, MinerId, NavisError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Reward tier by rank bracket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RewardTier {
    Diamond,
    Platinum,
    Gold,
    Silver,
    Bronze,
    Base,
}

impl RewardTier {
    /// Tiers that receive a bonus slice, highest first
    pub const BONUS_TIERS: [RewardTier; 5] = [
        RewardTier::Diamond,
        RewardTier::Platinum,
        RewardTier::Gold,
        RewardTier::Silver,
        RewardTier::Bronze,
    ];

    /// Get tier from 1-based rank
    pub fn from_rank(rank: usize) -> Self {
        match rank {
            0 | 1 => Self::Diamond,
            2 => Self::Platinum,
            3..=5 => Self::Gold,
            6..=10 => Self::Silver,
            11..=20 => Self::Bronze,
            _ => Self::Base,
        }
    }

    /// Fraction of the tier bonus pool reserved for this tier
    pub fn bonus_share(&self) -> f64 {
        match self {
            Self::Diamond => 0.40,
            Self::Platinum => 0.25,
            Self::Gold => 0.20,
            Self::Silver => 0.10,
            Self::Bronze => 0.05,
            Self::Base => 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Diamond => "Diamond",
            Self::Platinum => "Platinum",
            Self::Gold => "Gold",
            Self::Silver => "Silver",
            Self::Bronze => "Bronze",
            Self::Base => "Base",
        }
    }
}

/// Volume scoring parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Multiplier on creation volume
    #[serde(default = "default_mint_multiplier")]
    pub mint_multiplier: f64,

    /// Multiplier on redemption volume
    #[serde(default = "default_redeem_multiplier")]
    pub redeem_multiplier: f64,

    /// Miners below this epoch volume are not ranked
    #[serde(default = "default_min_volume")]
    pub min_volume: f64,

    /// Extra weight for miners active in most observed epochs (0 disables)
    #[serde(default)]
    pub consistency_bonus: f64,

    /// Extra weight for frequent transactors (0 disables)
    #[serde(default)]
    pub frequency_bonus: f64,

    /// Transaction count at which the frequency bonus saturates
    #[serde(default = "default_frequency_cap")]
    pub frequency_cap: u64,
}

fn default_mint_multiplier() -> f64 {
    1.10
}

fn default_redeem_multiplier() -> f64 {
    1.00
}

fn default_min_volume() -> f64 {
    1.0
}

fn default_frequency_cap() -> u64 {
    50
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mint_multiplier: default_mint_multiplier(),
            redeem_multiplier: default_redeem_multiplier(),
            min_volume: default_min_volume(),
            consistency_bonus: 0.0,
            frequency_bonus: 0.0,
            frequency_cap: default_frequency_cap(),
        }
    }
}

/// Emission split and allocation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_base_pool")]
    pub base_pool_fraction: f64,

    #[serde(default = "default_tier_pool")]
    pub tier_bonus_pool_fraction: f64,

    #[serde(default = "default_validator_pool")]
    pub validator_pool_fraction: f64,

    /// Emissions distributed per epoch
    #[serde(default = "default_emissions")]
    pub emissions_per_epoch: f64,

    /// Relative drift above which renormalization is reported as an anomaly
    #[serde(default = "default_drift_epsilon")]
    pub drift_epsilon: f64,
}

fn default_base_pool() -> f64 {
    0.70
}

fn default_tier_pool() -> f64 {
    0.25
}

fn default_validator_pool() -> f64 {
    0.05
}

fn default_emissions() -> f64 {
    1_000.0
}

fn default_drift_epsilon() -> f64 {
    1e-9
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_pool_fraction: default_base_pool(),
            tier_bonus_pool_fraction: default_tier_pool(),
            validator_pool_fraction: default_validator_pool(),
            emissions_per_epoch: default_emissions(),
            drift_epsilon: default_drift_epsilon(),
        }
    }
}

impl RewardConfig {
    /// Pool fractions must be non-negative and sum to one
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            self.base_pool_fraction,
            self.tier_bonus_pool_fraction,
            self.validator_pool_fraction,
        ];
        if fractions.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(NavisError::Config("pool fractions must be non-negative".into()));
        }
        let sum: f64 = fractions.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(NavisError::Config(format!("pool fractions sum to {}, expected 1", sum)));
        }
        if !self.emissions_per_epoch.is_finite() || self.emissions_per_epoch < 0.0 {
            return Err(NavisError::Config("emissions_per_epoch must be non-negative".into()));
        }
        Ok(())
    }
}

/// Pools carved out of one epoch's emissions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSplit {
    pub base_pool: f64,
    pub tier_bonus_pool: f64,
    pub validator_pool: f64,
}

impl PoolSplit {
    pub fn from_emissions(total_emissions: f64, config: &RewardConfig) -> Self {
        Self {
            base_pool: total_emissions * config.base_pool_fraction,
            tier_bonus_pool: total_emissions * config.tier_bonus_pool_fraction,
            validator_pool: total_emissions * config.validator_pool_fraction,
        }
    }

    /// Amount paid out to miners
    pub fn miner_total(&self) -> f64 {
        self.base_pool + self.tier_bonus_pool
    }
}

/// Per-miner scoring and payout for one epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinerVolumeProfile {
    pub miner_id: MinerId,
    pub mint_volume: f64,
    pub redeem_volume: f64,
    pub total_volume: f64,
    pub weighted_score: f64,
    /// 1-based rank
    pub rank: usize,
    pub tier: RewardTier,
    pub base_reward_share: f64,
    pub tier_bonus_share: f64,
    pub total_reward_share: f64,
}

/// Archived outcome of one epoch's reward allocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRewardDistribution {
    pub epoch_number: EpochId,
    pub timestamp: Timestamp,
    pub reward_pool: f64,
    pub pools: PoolSplit,
    pub miner_profiles: Vec<MinerVolumeProfile>,
    pub gini_coefficient: f64,
    pub top10_concentration: f64,
    pub total_volume_rewarded: f64,
}

impl EpochRewardDistribution {
    /// Payout map handed to the settlement layer
    pub fn shares(&self) -> BTreeMap<MinerId, f64> {
        self.miner_profiles
            .iter()
            .map(|p| (p.miner_id, p.total_reward_share))
            .collect()
    }

    pub fn total_rewarded(&self) -> f64 {
        self.miner_profiles.iter().map(|p| p.total_reward_share).sum()
    }
}

/// Reward allocator
#[derive(Clone, Debug, Default)]
pub struct RewardAllocator {
    scoring: ScoringConfig,
    rewards: RewardConfig,
}

impl RewardAllocator {
    pub fn new(scoring: ScoringConfig, rewards: RewardConfig) -> Self {
        Self { scoring, rewards }
    }

    /// Weighted score for one miner's epoch volume
    pub fn weighted_score(&self, record: &VolumeRecord) -> f64 {
        let base = self.scoring.mint_multiplier * record.mint_volume
            + self.scoring.redeem_multiplier * record.redeem_volume;

        let consistency = 1.0 + self.scoring.consistency_bonus * record.activity_ratio.clamp(0.0, 1.0);

        let frequency = if self.scoring.frequency_cap == 0 {
            1.0
        } else {
            let saturation = record.tx_count.min(self.scoring.frequency_cap) as f64
                / self.scoring.frequency_cap as f64;
            1.0 + self.scoring.frequency_bonus * saturation
        };

        base * consistency * frequency
    }

    /// Score, filter and rank miners; ties break on miner id
    pub fn score_and_rank(&self, records: &[VolumeRecord]) -> Vec<MinerVolumeProfile> {
        let mut profiles: Vec<MinerVolumeProfile> = records
            .iter()
            .filter(|r| {
                let keep = r.total_volume() > 0.0 && r.total_volume() >= self.scoring.min_volume;
                if !keep {
                    debug!(miner = %r.miner_id, volume = r.total_volume(), "Below minimum volume");
                }
                keep
            })
            .map(|r| MinerVolumeProfile {
                miner_id: r.miner_id,
                mint_volume: r.mint_volume,
                redeem_volume: r.redeem_volume,
                total_volume: r.total_volume(),
                weighted_score: self.weighted_score(r),
                rank: 0,
                tier: RewardTier::Base,
                base_reward_share: 0.0,
                tier_bonus_share: 0.0,
                total_reward_share: 0.0,
            })
            .collect();

        profiles.sort_by(|a, b| {
            b.weighted_score
                .partial_cmp(&a.weighted_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.miner_id.cmp(&b.miner_id))
        });

        for (i, profile) in profiles.iter_mut().enumerate() {
            profile.rank = i + 1;
            profile.tier = RewardTier::from_rank(profile.rank);
        }

        profiles
    }

    /// Split emissions across ranked miners
    ///
    /// Uses each profile's `tier` as given. The result sums to the base
    /// plus tier bonus pools for any non-empty input.
    ///
    /// Bonus slices of tiers nobody occupies are folded into the base
    /// payout, so a lone Base-tier miner receives 950 of 1000 emitted
    /// rather than only the 700 base pool.
    pub fn allocate(&self, mut ranked: Vec<MinerVolumeProfile>, total_emissions: f64) -> Vec<MinerVolumeProfile> {
        if ranked.is_empty() {
            return ranked;
        }

        let pools = PoolSplit::from_emissions(total_emissions, &self.rewards);

        let unclaimed: f64 = RewardTier::BONUS_TIERS
            .iter()
            .filter(|tier| !ranked.iter().any(|p| p.tier == **tier))
            .map(|tier| tier.bonus_share() * pools.tier_bonus_pool)
            .sum();
        let base_pool = pools.base_pool + unclaimed;

        split_proportionally(&mut ranked, base_pool, |p, share| p.base_reward_share = share);

        for tier in RewardTier::BONUS_TIERS {
            let slice = tier.bonus_share() * pools.tier_bonus_pool;
            let mut members: Vec<&mut MinerVolumeProfile> =
                ranked.iter_mut().filter(|p| p.tier == tier).collect();
            if members.is_empty() {
                continue;
            }
            let total_score: f64 = members.iter().map(|p| p.weighted_score).sum();
            let count = members.len() as f64;
            for member in members.iter_mut() {
                member.tier_bonus_share = if total_score > 0.0 {
                    slice * member.weighted_score / total_score
                } else {
                    slice / count
                };
            }
        }

        for profile in ranked.iter_mut() {
            if profile.tier == RewardTier::Base {
                profile.tier_bonus_share = 0.0;
            }
            profile.total_reward_share = profile.base_reward_share + profile.tier_bonus_share;
        }

        self.renormalize(&mut ranked, pools.miner_total());
        ranked
    }

    /// Absorb floating-point drift so the payout hits the target exactly
    fn renormalize(&self, profiles: &mut [MinerVolumeProfile], target: f64) {
        let sum: f64 = profiles.iter().map(|p| p.total_reward_share).sum();
        let drift = target - sum;
        if drift == 0.0 {
            return;
        }

        if drift.abs() > self.rewards.drift_epsilon * target.abs().max(1.0) {
            warn!(drift, target, "Reward drift above epsilon, rescaling payout");
            if sum > 0.0 {
                let scale = target / sum;
                for profile in profiles.iter_mut() {
                    profile.base_reward_share *= scale;
                    profile.tier_bonus_share *= scale;
                    profile.total_reward_share = profile.base_reward_share + profile.tier_bonus_share;
                }
            }
            return;
        }

        if let Some(largest) = profiles.iter_mut().max_by(|a, b| {
            a.total_reward_share
                .partial_cmp(&b.total_reward_share)
                .unwrap_or(Ordering::Equal)
        }) {
            largest.base_reward_share += drift;
            largest.total_reward_share = largest.base_reward_share + largest.tier_bonus_share;
        }
    }

    /// Score, rank, allocate and attach diagnostics for one epoch
    pub fn distribute(
        &self,
        epoch_number: EpochId,
        records: &[VolumeRecord],
        total_emissions: f64,
        timestamp: Timestamp,
    ) -> EpochRewardDistribution {
        let ranked = self.score_and_rank(records);
        let profiles = self.allocate(ranked, total_emissions);
        let shares: Vec<f64> = profiles.iter().map(|p| p.total_reward_share).collect();

        EpochRewardDistribution {
            epoch_number,
            timestamp,
            reward_pool: total_emissions,
            pools: PoolSplit::from_emissions(total_emissions, &self.rewards),
            gini_coefficient: fairness::gini(&shares),
            top10_concentration: fairness::top_concentration(&shares, 10),
            total_volume_rewarded: profiles.iter().map(|p| p.total_volume).sum(),
            miner_profiles: profiles,
        }
    }

    /// Project a distribution onto an `entity_count`-slot weight vector summing to 1
    pub fn weight_vector(distribution: &EpochRewardDistribution, entity_count: usize) -> Vec<f64> {
        let mut weights = vec![0.0; entity_count];
        for profile in &distribution.miner_profiles {
            match weights.get_mut(profile.miner_id.index()) {
                Some(slot) => *slot = profile.total_reward_share,
                None => warn!(miner = %profile.miner_id, entity_count, "Miner outside weight vector"),
            }
        }

        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            for w in weights.iter_mut() {
                *w /= total;
            }
        }
        weights
    }

    pub fn reward_config(&self) -> &RewardConfig {
        &self.rewards
    }

    pub fn scoring_config(&self) -> &ScoringConfig {
        &self.scoring
    }
}

fn split_proportionally<F>(profiles: &mut [MinerVolumeProfile], pool: f64, mut assign: F)
where
    F: FnMut(&mut MinerVolumeProfile, f64),
{
    let total_score: f64 = profiles.iter().map(|p| p.weighted_score).sum();
    let count = profiles.len() as f64;
    for profile in profiles.iter_mut() {
        let share = if total_score > 0.0 {
            pool * profile.weighted_score / total_score
        } else {
            pool / count
        };
        assign(profile, share);
    }
}
