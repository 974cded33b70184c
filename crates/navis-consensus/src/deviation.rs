//! Rolling window of deviation records.

use navis_core::{DeviationRecord, Timestamp, ValidatorId};
use std::collections::VecDeque;
use tracing::debug;

/// Deviation records retained for the configured period, oldest first
#[derive(Clone, Debug)]
pub struct DeviationWindow {
    retention_secs: i64,
    records: VecDeque<DeviationRecord>,
}

impl DeviationWindow {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            retention_secs,
            records: VecDeque::new(),
        }
    }

    /// Rebuild from persisted records
    pub fn restore(retention_secs: i64, mut records: Vec<DeviationRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            retention_secs,
            records: records.into(),
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = DeviationRecord>) {
        for record in records {
            // Keep ordering when a late record arrives
            let at = self
                .records
                .partition_point(|r| r.timestamp <= record.timestamp);
            self.records.insert(at, record);
        }
    }

    /// Drop records older than the retention period
    pub fn purge(&mut self, now: Timestamp) -> usize {
        let cutoff = now - self.retention_secs;
        let before = self.records.len();
        while self.records.front().is_some_and(|r| r.timestamp < cutoff) {
            self.records.pop_front();
        }
        let purged = before - self.records.len();
        if purged > 0 {
            debug!(purged, remaining = self.records.len(), "Deviation records purged");
        }
        purged
    }

    /// Contiguous copy of the window, oldest first
    pub fn records(&self) -> Vec<DeviationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn for_validator<'a>(&'a self, validator_id: &'a ValidatorId) -> impl Iterator<Item = &'a DeviationRecord> + 'a {
        self.records.iter().filter(move |r| &r.validator_id == validator_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navis_core::{DeviationSeverity, EpochId};

    fn record(id: &str, timestamp: Timestamp) -> DeviationRecord {
        DeviationRecord {
            validator_id: id.into(),
            epoch_id: EpochId(1),
            timestamp,
            magnitude: 0.2,
            severity: DeviationSeverity::High,
        }
    }

    #[test]
    fn test_purge_after_retention() {
        let mut window = DeviationWindow::new(100);
        window.extend([record("v1", 0), record("v1", 50), record("v2", 150)]);

        assert_eq!(window.purge(160), 1);
        assert_eq!(window.len(), 2);
        assert_eq!(window.purge(160), 0);
        assert_eq!(window.for_validator(&"v1".into()).count(), 1);
    }

    #[test]
    fn test_out_of_order_insert() {
        let mut window = DeviationWindow::new(1_000);
        window.extend([record("v1", 30), record("v2", 10), record("v3", 20)]);

        let order: Vec<Timestamp> = window.records().iter().map(|r| r.timestamp).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn test_restore_sorts() {
        let window = DeviationWindow::restore(1_000, vec![record("a", 9), record("b", 3)]);
        assert_eq!(window.records()[0].timestamp, 3);
        assert_eq!(window.retention_secs(), 1_000);
    }
}
