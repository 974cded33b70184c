//! # Navis Economics - Stake, Reputation, Slashing & Miner Rewards
//!
//! Economic state owned by a validator node.
//!
//! ## Components
//!
//! - **Stake Registry**: ledger-synced stake per validator, locked and slashed amounts
//! - **Reputation Tracker**: accuracy/consistency/reliability scores and status
//! - **Slashing Engine**: graduated penalties from accumulated deviation records
//! - **Volume Ledger**: per-miner creation and redemption volume
//! - **Reward Allocator**: weighted scoring, ranking and tiered payout
//!
//! ## Slash Severities
//!
//! | Severity | Rate | Trigger |
//! |----------|------|---------|
//! | Minor | 1% | 3+ deviations in the lookback window |
//! | Moderate | 5% | 5+ deviations, or max severity >= 0.5 |
//! | Severe | 15% | max severity >= 0.75, or repeat offender |
//! | Critical | 50% | reported misbehavior |
//!
//! ## Emission Split
//!
//! ```text
//! ┌───────────────────────────── epoch emissions ─────────────────────────────┐
//! │  base pool 70%  (score-proportional)  │ tier bonus 25% │ validators 5%    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod fairness;
pub mod reputation;
pub mod rewards;
pub mod slashing;
pub mod staking;
pub mod volume;

// Re-exports
pub use fairness::{gini, top_concentration};
pub use reputation::{ReputationConfig, ReputationTracker, ValidatorReputation, ValidatorStatus};
pub use rewards::{
    EpochRewardDistribution, MinerVolumeProfile, PoolSplit, RewardAllocator, RewardConfig, RewardTier,
    ScoringConfig,
};
pub use slashing::{
    classify, MisbehaviorReport, SlashCandidate, SlashEvent, SlashReason, SlashSeverity, SlashingConfig,
    SlashingEngine,
};
pub use staking::{StakeConfig, StakeRegistry, ValidatorStake};
pub use volume::{
    MinerTransaction, MinerVolume, OperationKind, RawMinerEvent, VolumeConfig, VolumeLedger, VolumeRecord,
};
