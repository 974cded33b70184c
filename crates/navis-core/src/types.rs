//! Core type definitions for Navis
//!
//! Identifiers shared by every component plus the deviation record that
//! links the consensus engine to the slashing engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Stake amounts are kept in the ledger's smallest unit
pub type StakeAmount = u128;

/// ValidatorId - the validator's hotkey address on the ledger
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", self.short())
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// MinerId - the miner's UID slot on the subnet
///
/// The UID doubles as the miner's index in every weight vector.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerId(pub u16);

impl MinerId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for MinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MinerId({})", self.0)
    }
}

impl fmt::Display for MinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid{}", self.0)
    }
}

/// EpochId - monotonically increasing epoch number
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(pub u64);

impl EpochId {
    pub const GENESIS: Self = Self(0);

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// EventId - BLAKE3 digest identifying an immutable log entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Derive an id from the concatenated parts
    pub fn derive(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Deviation severity bucket
///
/// | Bucket | Score | Magnitude range |
/// |--------|-------|-----------------|
/// | Low | 0.25 | (t, 2t] |
/// | Medium | 0.50 | (2t, s] |
/// | High | 0.75 | (s, 2s] |
/// | Extreme | 1.00 | > 2s |
///
/// `t` is the deviation threshold, `s` the severe threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviationSeverity {
    Low,
    Medium,
    High,
    Extreme,
}

impl DeviationSeverity {
    pub fn score(&self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::Extreme => 1.0,
        }
    }
}

/// A submission that diverged from consensus by more than the threshold
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviationRecord {
    pub validator_id: ValidatorId,
    pub epoch_id: EpochId,
    pub timestamp: Timestamp,
    /// Normalized L1 distance from the consensus vector
    pub magnitude: f64,
    pub severity: DeviationSeverity,
}

impl DeviationRecord {
    pub fn severity_score(&self) -> f64 {
        self.severity.score()
    }
}

/// Current wall-clock time as a unix timestamp
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_id_short() {
        let id = ValidatorId::new("5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX");
        assert_eq!(id.short(), "5F3sa2TJAWMq");
        assert_eq!(ValidatorId::new("v1").short(), "v1");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(DeviationSeverity::Extreme > DeviationSeverity::High);
        assert!(DeviationSeverity::Low < DeviationSeverity::Medium);
        assert_eq!(DeviationSeverity::High.score(), 0.75);
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let a = EventId::derive(&[b"v1", &10i64.to_le_bytes()]);
        let b = EventId::derive(&[b"v1", &10i64.to_le_bytes()]);
        let c = EventId::derive(&[b"v2", &10i64.to_le_bytes()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ValidatorId::new("hk")).unwrap();
        assert_eq!(json, "\"hk\"");
        let json = serde_json::to_string(&MinerId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
