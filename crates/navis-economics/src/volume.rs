//! # Volume Ledger
//!
//! Per-miner creation and redemption volume, cumulative and per epoch.
//!
//! Raw feed events are validated at the boundary into tagged
//! [`MinerTransaction`]s. Inputs outside the freshness window are rejected
//! with `StaleData` rather than counted as zero.

use navis_core::constants::HOUR_SECS;
use navis_core::{MinerId, NavisError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Kind of operation a miner performed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Underlying assets converted into index tokens
    Creation,
    /// Index tokens converted back into underlying assets
    Redemption,
}

/// Event as delivered by the transaction feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMinerEvent {
    pub miner_id: u16,
    pub amount: f64,
    pub is_creation: bool,
    pub timestamp: Timestamp,
}

/// Validated miner transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinerTransaction {
    pub miner_id: MinerId,
    pub amount: f64,
    pub kind: OperationKind,
    pub timestamp: Timestamp,
}

impl TryFrom<RawMinerEvent> for MinerTransaction {
    type Error = NavisError;

    fn try_from(raw: RawMinerEvent) -> Result<Self> {
        if !raw.amount.is_finite() || raw.amount <= 0.0 {
            return Err(NavisError::InvalidInput(format!(
                "transaction amount {} for miner {} must be positive",
                raw.amount, raw.miner_id
            )));
        }

        Ok(Self {
            miner_id: MinerId(raw.miner_id),
            amount: raw.amount,
            kind: if raw.is_creation {
                OperationKind::Creation
            } else {
                OperationKind::Redemption
            },
            timestamp: raw.timestamp,
        })
    }
}

/// Volume ledger configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Maximum age of a transaction when it is recorded
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: i64,
}

fn default_freshness_window() -> i64 {
    HOUR_SECS
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window(),
        }
    }
}

/// Running totals for one miner
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerVolume {
    pub miner_id: MinerId,
    pub cumulative_mint: f64,
    pub cumulative_redeem: f64,
    pub epoch_mint: f64,
    pub epoch_redeem: f64,
    /// Transactions in the current epoch
    pub epoch_tx_count: u64,
    /// Closed epochs in which the miner had volume
    pub active_epochs: u64,
    pub last_seen: Timestamp,
}

impl MinerVolume {
    pub fn epoch_volume(&self) -> f64 {
        self.epoch_mint + self.epoch_redeem
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.cumulative_mint + self.cumulative_redeem
    }
}

/// Per-epoch input to scoring
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub miner_id: MinerId,
    pub mint_volume: f64,
    pub redeem_volume: f64,
    pub tx_count: u64,
    /// Fraction of observed epochs in which the miner was active
    pub activity_ratio: f64,
}

impl VolumeRecord {
    pub fn new(miner_id: MinerId, mint_volume: f64, redeem_volume: f64) -> Self {
        Self {
            miner_id,
            mint_volume,
            redeem_volume,
            tx_count: 0,
            activity_ratio: 0.0,
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.mint_volume + self.redeem_volume
    }
}

/// Volume ledger
#[derive(Clone, Debug, Default)]
pub struct VolumeLedger {
    miners: BTreeMap<MinerId, MinerVolume>,
    config: VolumeConfig,
    epochs_closed: u64,
    stale_rejected: u64,
}

impl VolumeLedger {
    pub fn new(config: VolumeConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Add a transaction to the miner's running totals
    pub fn record(&mut self, tx: &MinerTransaction, now: Timestamp) -> Result<()> {
        // Feed timestamps are untrusted; extreme values saturate into stale
        let age = now.saturating_sub(tx.timestamp);
        let window = self.config.freshness_window_secs;
        if age > window || age < -window {
            self.stale_rejected += 1;
            return Err(NavisError::StaleData {
                age_secs: age,
                window_secs: window,
            });
        }

        let entry = self.miners.entry(tx.miner_id).or_insert_with(|| MinerVolume {
            miner_id: tx.miner_id,
            ..Default::default()
        });

        match tx.kind {
            OperationKind::Creation => {
                entry.epoch_mint += tx.amount;
                entry.cumulative_mint += tx.amount;
            }
            OperationKind::Redemption => {
                entry.epoch_redeem += tx.amount;
                entry.cumulative_redeem += tx.amount;
            }
        }
        entry.epoch_tx_count += 1;
        entry.last_seen = entry.last_seen.max(tx.timestamp);

        Ok(())
    }

    /// Current epoch's volume for every miner that traded in it
    pub fn epoch_records(&self) -> Vec<VolumeRecord> {
        let observed = self.epochs_closed + 1;
        self.miners
            .values()
            .filter(|m| m.epoch_volume() > 0.0)
            .map(|m| VolumeRecord {
                miner_id: m.miner_id,
                mint_volume: m.epoch_mint,
                redeem_volume: m.epoch_redeem,
                tx_count: m.epoch_tx_count,
                activity_ratio: (m.active_epochs + 1) as f64 / observed as f64,
            })
            .collect()
    }

    /// Zero per-epoch counters; cumulative totals carry forward
    pub fn reset_epoch(&mut self) {
        for miner in self.miners.values_mut() {
            if miner.epoch_volume() > 0.0 {
                miner.active_epochs += 1;
            }
            miner.epoch_mint = 0.0;
            miner.epoch_redeem = 0.0;
            miner.epoch_tx_count = 0;
        }
        self.epochs_closed += 1;
        debug!(epochs_closed = self.epochs_closed, "Volume ledger epoch reset");
    }

    pub fn get(&self, miner_id: &MinerId) -> Option<&MinerVolume> {
        self.miners.get(miner_id)
    }

    pub fn miner_count(&self) -> usize {
        self.miners.len()
    }

    pub fn stale_rejected(&self) -> u64 {
        self.stale_rejected
    }

    pub fn epochs_closed(&self) -> u64 {
        self.epochs_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(miner: u16, amount: f64, kind: OperationKind, timestamp: Timestamp) -> MinerTransaction {
        MinerTransaction {
            miner_id: MinerId(miner),
            amount,
            kind,
            timestamp,
        }
    }

    #[test]
    fn test_raw_event_validation() {
        let raw = RawMinerEvent {
            miner_id: 4,
            amount: 12.5,
            is_creation: false,
            timestamp: 100,
        };
        let tx = MinerTransaction::try_from(raw.clone()).unwrap();
        assert_eq!(tx.kind, OperationKind::Redemption);
        assert_eq!(tx.miner_id, MinerId(4));

        let bad = RawMinerEvent { amount: f64::NAN, ..raw.clone() };
        assert!(MinerTransaction::try_from(bad).is_err());
        let bad = RawMinerEvent { amount: -1.0, ..raw };
        assert!(MinerTransaction::try_from(bad).is_err());
    }

    #[test]
    fn test_split_by_operation_kind() {
        let mut ledger = VolumeLedger::default();
        ledger.record(&tx(1, 100.0, OperationKind::Creation, 10), 10).unwrap();
        ledger.record(&tx(1, 40.0, OperationKind::Redemption, 11), 11).unwrap();

        let miner = ledger.get(&MinerId(1)).unwrap();
        assert_eq!(miner.epoch_mint, 100.0);
        assert_eq!(miner.epoch_redeem, 40.0);
        assert_eq!(miner.epoch_tx_count, 2);
    }

    #[test]
    fn test_stale_transaction_excluded() {
        let mut ledger = VolumeLedger::new(VolumeConfig { freshness_window_secs: 60 });
        let result = ledger.record(&tx(1, 5.0, OperationKind::Creation, 0), 61);

        assert!(matches!(result, Err(NavisError::StaleData { age_secs: 61, .. })));
        assert!(ledger.get(&MinerId(1)).is_none());
        assert_eq!(ledger.stale_rejected(), 1);
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let mut ledger = VolumeLedger::default();
        let now = 1_700_000_000;

        let result = ledger.record(&tx(1, 5.0, OperationKind::Creation, i64::MIN), now);
        assert!(matches!(result, Err(NavisError::StaleData { age_secs: i64::MAX, .. })));
        let result = ledger.record(&tx(1, 5.0, OperationKind::Creation, i64::MAX), now);
        assert!(matches!(result, Err(NavisError::StaleData { .. })));

        ledger.record(&tx(1, 5.0, OperationKind::Creation, now), now).unwrap();
        assert_eq!(ledger.stale_rejected(), 2);
        assert_eq!(ledger.miner_count(), 1);
    }

    #[test]
    fn test_reset_keeps_cumulative() {
        let mut ledger = VolumeLedger::default();
        ledger.record(&tx(2, 50.0, OperationKind::Creation, 0), 0).unwrap();
        assert_eq!(ledger.epoch_records().len(), 1);

        ledger.reset_epoch();

        let miner = ledger.get(&MinerId(2)).unwrap();
        assert_eq!(miner.epoch_volume(), 0.0);
        assert_eq!(miner.cumulative_volume(), 50.0);
        assert_eq!(miner.active_epochs, 1);
        assert!(ledger.epoch_records().is_empty());
    }

    #[test]
    fn test_activity_ratio() {
        let mut ledger = VolumeLedger::default();
        ledger.record(&tx(3, 1.0, OperationKind::Creation, 0), 0).unwrap();
        ledger.reset_epoch();
        ledger.reset_epoch();
        ledger.record(&tx(3, 1.0, OperationKind::Creation, 0), 0).unwrap();

        let records = ledger.epoch_records();
        assert!((records[0].activity_ratio - 2.0 / 3.0).abs() < 1e-12);
    }
}
