//! # External Interfaces
//!
//! Everything the node consumes from or produces to the outside world goes
//! through one of these traits, so the pipeline runs without a live ledger.
//!
//! | Port | Direction | Calls |
//! |------|-----------|-------|
//! | [`LedgerClient`] | both | stake, active set, weights, slash requests, payouts |
//! | [`PeerDirectory`] | in | other validators' published weight vectors |
//! | [`TransactionFeed`] | in | raw miner creation/redemption events |

use async_trait::async_trait;
use navis_core::{EpochId, MinerId, Result, StakeAmount, ValidatorId};
use navis_economics::{RawMinerEvent, SlashEvent};
use std::collections::BTreeMap;

/// Ledger / metagraph collaborator
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Stake currently bonded to the validator
    async fn validator_stake(&self, validator_id: &ValidatorId) -> Result<StakeAmount>;

    /// Validators currently in the active set
    async fn active_validator_set(&self) -> Result<Vec<ValidatorId>>;

    /// Publish this validator's weight vector for the epoch
    async fn submit_weights(&self, validator_id: &ValidatorId, epoch_id: EpochId, weights: &[f64]) -> Result<()>;

    /// Ask the ledger to debit a validator's stake; `Ok(false)` when rejected
    async fn request_slash(&self, event: &SlashEvent) -> Result<bool>;

    /// Hand the final payout vector to the settlement layer
    async fn publish_distribution(&self, epoch_id: EpochId, shares: &BTreeMap<MinerId, f64>) -> Result<()>;
}

/// Peer discovery collaborator
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// A peer's published weight vector, `None` if it has not submitted
    async fn peer_submission(&self, validator_id: &ValidatorId, epoch_id: EpochId) -> Result<Option<Vec<f64>>>;
}

/// Miner event feed collaborator
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Drain events observed since the previous poll
    async fn poll(&self) -> Result<Vec<RawMinerEvent>>;
}
