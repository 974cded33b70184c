//! In-memory implementations of the external ports, used by tests and
//! `navis simulate`.

use crate::ports::{LedgerClient, PeerDirectory, TransactionFeed};
use async_trait::async_trait;
use navis_core::{EpochId, MinerId, NavisError, Result, StakeAmount, ValidatorId};
use navis_economics::{RawMinerEvent, SlashEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

/// Ledger state held in memory
///
/// Published weights double as the peer directory, the way validators read
/// each other's submissions back from the chain.
#[derive(Default)]
pub struct InMemoryLedger {
    stakes: RwLock<BTreeMap<ValidatorId, StakeAmount>>,
    active: RwLock<BTreeSet<ValidatorId>>,
    weights: RwLock<BTreeMap<(EpochId, ValidatorId), Vec<f64>>>,
    slash_requests: RwLock<Vec<SlashEvent>>,
    distributions: RwLock<BTreeMap<EpochId, BTreeMap<MinerId, f64>>>,
    reject_slashes: RwLock<bool>,
    unavailable: RwLock<bool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bond stake and add the validator to the active set
    pub fn set_stake(&self, validator_id: ValidatorId, stake: StakeAmount) {
        self.active.write().insert(validator_id.clone());
        self.stakes.write().insert(validator_id, stake);
    }

    pub fn deactivate(&self, validator_id: &ValidatorId) {
        self.active.write().remove(validator_id);
    }

    /// Publish a weight vector on behalf of any validator
    pub fn publish_weights(&self, validator_id: ValidatorId, epoch_id: EpochId, weights: Vec<f64>) {
        self.weights.write().insert((epoch_id, validator_id), weights);
    }

    /// Make every call fail with `External`
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    /// Answer slash requests with a rejection
    pub fn set_reject_slashes(&self, reject: bool) {
        *self.reject_slashes.write() = reject;
    }

    pub fn published_weights(&self, validator_id: &ValidatorId, epoch_id: EpochId) -> Option<Vec<f64>> {
        self.weights.read().get(&(epoch_id, validator_id.clone())).cloned()
    }

    pub fn slash_requests(&self) -> Vec<SlashEvent> {
        self.slash_requests.read().clone()
    }

    pub fn distribution(&self, epoch_id: EpochId) -> Option<BTreeMap<MinerId, f64>> {
        self.distributions.read().get(&epoch_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.read() {
            return Err(NavisError::External("ledger unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn validator_stake(&self, validator_id: &ValidatorId) -> Result<StakeAmount> {
        self.check_available()?;
        self.stakes
            .read()
            .get(validator_id)
            .copied()
            .ok_or_else(|| NavisError::UnknownValidator(validator_id.clone()))
    }

    async fn active_validator_set(&self) -> Result<Vec<ValidatorId>> {
        self.check_available()?;
        Ok(self.active.read().iter().cloned().collect())
    }

    async fn submit_weights(&self, validator_id: &ValidatorId, epoch_id: EpochId, weights: &[f64]) -> Result<()> {
        self.check_available()?;
        self.publish_weights(validator_id.clone(), epoch_id, weights.to_vec());
        Ok(())
    }

    async fn request_slash(&self, event: &SlashEvent) -> Result<bool> {
        self.check_available()?;
        self.slash_requests.write().push(event.clone());
        Ok(!*self.reject_slashes.read())
    }

    async fn publish_distribution(&self, epoch_id: EpochId, shares: &BTreeMap<MinerId, f64>) -> Result<()> {
        self.check_available()?;
        self.distributions.write().insert(epoch_id, shares.clone());
        Ok(())
    }
}

#[async_trait]
impl PeerDirectory for InMemoryLedger {
    async fn peer_submission(&self, validator_id: &ValidatorId, epoch_id: EpochId) -> Result<Option<Vec<f64>>> {
        self.check_available()?;
        Ok(self.published_weights(validator_id, epoch_id))
    }
}

/// Fixed peer vectors, optionally answered after a delay
#[derive(Default)]
pub struct StaticPeerDirectory {
    submissions: RwLock<BTreeMap<ValidatorId, Vec<f64>>>,
    delays: RwLock<BTreeMap<ValidatorId, Duration>>,
    delay: Option<Duration>,
}

impl StaticPeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lookup sleeps for `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Slow down lookups for one validator only
    pub fn set_delay(&self, validator_id: ValidatorId, delay: Duration) {
        self.delays.write().insert(validator_id, delay);
    }

    /// Vector returned for the validator in every epoch
    pub fn insert(&self, validator_id: ValidatorId, weights: Vec<f64>) {
        self.submissions.write().insert(validator_id, weights);
    }
}

#[async_trait]
impl PeerDirectory for StaticPeerDirectory {
    async fn peer_submission(&self, validator_id: &ValidatorId, _epoch_id: EpochId) -> Result<Option<Vec<f64>>> {
        let delay = self.delays.read().get(validator_id).copied().or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.submissions.read().get(validator_id).cloned())
    }
}

/// FIFO of raw events drained on each poll
#[derive(Default)]
pub struct QueuedTransactionFeed {
    queue: Mutex<VecDeque<RawMinerEvent>>,
}

impl QueuedTransactionFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: RawMinerEvent) {
        self.queue.lock().push_back(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = RawMinerEvent>) {
        self.queue.lock().extend(events);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl TransactionFeed for QueuedTransactionFeed {
    async fn poll(&self) -> Result<Vec<RawMinerEvent>> {
        Ok(self.queue.lock().drain(..).collect())
    }
}
