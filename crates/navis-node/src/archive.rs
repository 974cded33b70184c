//! # Epoch Archive
//!
//! Append-only history of closed epochs plus a snapshot of the state that
//! carries across epochs.
//!
//! ## File Layout
//!
//! - `epochs.jsonl` - one [`EpochReport`] per line, never rewritten
//! - `state.json` - latest [`StateSnapshot`], replaced atomically

use crate::epoch::EpochReport;
use navis_core::{DeviationRecord, EpochId, NavisError, Result, Timestamp};
use navis_economics::{SlashEvent, ValidatorReputation, ValidatorStake};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const EPOCHS_FILE: &str = "epochs.jsonl";
const STATE_FILE: &str = "state.json";

/// State carried from one epoch to the next
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Epoch the node resumes collecting for
    pub next_epoch: EpochId,
    pub saved_at: Timestamp,
    pub stakes: Vec<ValidatorStake>,
    pub reputation: Vec<ValidatorReputation>,
    pub deviations: Vec<DeviationRecord>,
    pub slash_log: Vec<SlashEvent>,
}

/// Persistence for epoch reports and the state snapshot
pub trait ArchiveStore: Send + Sync {
    /// Append one closed epoch
    fn append_epoch(&self, report: &EpochReport) -> Result<()>;

    /// Every archived epoch, oldest first
    fn epochs(&self) -> Result<Vec<EpochReport>>;

    /// Replace the state snapshot
    fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Latest snapshot, if one was saved
    fn load_snapshot(&self) -> Result<Option<StateSnapshot>>;
}

fn serialization(e: serde_json::Error) -> NavisError {
    NavisError::Serialization(e.to_string())
}

/// JSON files under a data directory
pub struct FileArchive {
    dir: PathBuf,
}

impl FileArchive {
    /// Open the archive, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn epochs_path(&self) -> PathBuf {
        self.dir.join(EPOCHS_FILE)
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }
}

impl ArchiveStore for FileArchive {
    fn append_epoch(&self, report: &EpochReport) -> Result<()> {
        let mut line = serde_json::to_string(report).map_err(serialization)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.epochs_path())?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        debug!(epoch = report.epoch_id.0, "Epoch archived");
        Ok(())
    }

    fn epochs(&self) -> Result<Vec<EpochReport>> {
        let path = self.epochs_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut reports = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            reports.push(serde_json::from_str(&line).map_err(serialization)?);
        }
        Ok(reports)
    }

    fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(serialization)?;
        let tmp = self.dir.join(format!("{}.tmp", STATE_FILE));

        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, self.state_path())?;

        debug!(next_epoch = snapshot.next_epoch.0, "State snapshot written");
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<StateSnapshot>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map(Some).map_err(serialization)
    }
}

/// In-memory archive for tests and simulation
#[derive(Default)]
pub struct MemoryArchive {
    epochs: RwLock<Vec<EpochReport>>,
    snapshot: RwLock<Option<StateSnapshot>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArchiveStore for MemoryArchive {
    fn append_epoch(&self, report: &EpochReport) -> Result<()> {
        self.epochs.write().push(report.clone());
        Ok(())
    }

    fn epochs(&self) -> Result<Vec<EpochReport>> {
        Ok(self.epochs.read().clone())
    }

    fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<StateSnapshot>> {
        Ok(self.snapshot.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::PhaseOutcome;
    use navis_core::ValidatorId;
    use tempfile::TempDir;

    fn report(epoch: u64) -> EpochReport {
        EpochReport {
            epoch_id: EpochId(epoch),
            closed_at: epoch as i64 * 360,
            consensus: PhaseOutcome::skipped("insufficient participants"),
            slashing: PhaseOutcome::Completed,
            rewarding: PhaseOutcome::skipped("no miner volume this epoch"),
            submissions: 1,
            participants: 1,
            consensus_vector: None,
            deviations: Vec::new(),
            slashes: Vec::new(),
            distribution: None,
        }
    }

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            next_epoch: EpochId(4),
            saved_at: 1_000,
            stakes: vec![ValidatorStake::new(ValidatorId::new("v1"), 5_000, 1_000, 0)],
            reputation: Vec::new(),
            deviations: Vec::new(),
            slash_log: Vec::new(),
        }
    }

    #[test]
    fn test_file_archive_appends() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::open(dir.path()).unwrap();
        assert!(archive.epochs().unwrap().is_empty());

        archive.append_epoch(&report(1)).unwrap();
        archive.append_epoch(&report(2)).unwrap();

        let reopened = FileArchive::open(dir.path()).unwrap();
        let epochs = reopened.epochs().unwrap();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[1], report(2));
    }

    #[test]
    fn test_file_snapshot_replaced() {
        let dir = TempDir::new().unwrap();
        let archive = FileArchive::open(dir.path().join("nested")).unwrap();
        assert_eq!(archive.load_snapshot().unwrap(), None);

        archive.save_snapshot(&snapshot()).unwrap();
        let mut newer = snapshot();
        newer.next_epoch = EpochId(5);
        archive.save_snapshot(&newer).unwrap();

        assert_eq!(archive.load_snapshot().unwrap(), Some(newer));
        assert!(!archive.dir().join("state.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), b"{not json").unwrap();
        let archive = FileArchive::open(dir.path()).unwrap();

        assert!(matches!(archive.load_snapshot(), Err(NavisError::Serialization(_))));
    }

    #[test]
    fn test_memory_archive() {
        let archive = MemoryArchive::new();
        archive.append_epoch(&report(1)).unwrap();
        archive.save_snapshot(&snapshot()).unwrap();

        assert_eq!(archive.epochs().unwrap().len(), 1);
        assert_eq!(archive.load_snapshot().unwrap().unwrap().next_epoch, EpochId(4));
    }
}
