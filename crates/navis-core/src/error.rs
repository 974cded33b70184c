//! Error types for Navis operations

use crate::types::ValidatorId;
use thiserror::Error;

/// Result type alias for Navis operations
pub type Result<T> = std::result::Result<T, NavisError>;

/// Errors that can occur anywhere in the coordination pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavisError {
    // === Consensus ===
    /// Not enough eligible submissions to compute a consensus vector
    #[error("Insufficient participants: need {required}, have {available}")]
    InsufficientParticipants { required: usize, available: usize },

    /// Submitted weight vector has the wrong number of entries
    #[error("Invalid vector length: expected {expected}, got {actual}")]
    InvalidVectorLength { expected: usize, actual: usize },

    /// Submitted weight is negative or not finite
    #[error("Invalid weight value at index {index}")]
    InvalidWeightValue { index: usize },

    // === Stake ===
    /// Requested debit exceeds the available stake
    #[error("Insufficient stake: requested {requested}, available {available}")]
    InsufficientStake { requested: u128, available: u128 },

    /// Validator is not present in the registry
    #[error("Unknown validator: {0}")]
    UnknownValidator(ValidatorId),

    // === Volume ===
    /// Input is older than the freshness window
    #[error("Stale data: {age_secs}s old, freshness window is {window_secs}s")]
    StaleData { age_secs: i64, window_secs: i64 },

    // === Epoch ===
    /// Epoch phases must advance strictly in order
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: String, to: String },

    // === Boundaries ===
    /// Malformed input rejected at the boundary
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External ledger or peer call failed
    #[error("External call failed: {0}")]
    External(String),

    /// Persistent storage unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NavisError {
    /// Stable numeric code for structured logs
    pub fn code(&self) -> u32 {
        match self {
            Self::InsufficientParticipants { .. } => 1001,
            Self::InvalidVectorLength { .. } | Self::InvalidWeightValue { .. } => 1002,
            Self::InsufficientStake { .. } => 1003,
            Self::StaleData { .. } => 1004,
            Self::UnknownValidator(_) => 1005,
            Self::InvalidPhaseTransition { .. } => 1006,
            Self::External(_) => 2001,
            Self::Storage(_) => 3001,
            Self::Config(_) => 3002,
            _ => 9999,
        }
    }

    /// Recoverable errors degrade a single phase or input; the rest abort the process
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Config(_))
    }
}

impl From<std::io::Error> for NavisError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
