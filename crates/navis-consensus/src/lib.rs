//! # Navis Weight Consensus
//!
//! Off-chain agreement on the miner weight vector.
//!
//! ## Flow
//!
//! 1. Submission - each validator publishes one vector per epoch
//! 2. Consensus - element-wise median over stake-eligible submitters
//! 3. Deviation - every submitter measured against the median
//! 4. Window - deviation records kept for 24h for the slashing engine

pub mod deviation;
pub mod weights;

// Re-exports
pub use deviation::DeviationWindow;
pub use weights::{
    deviation_magnitude, element_wise_median, severity_for, ConsensusConfig, DeviationReport,
    WeightConsensusEngine, WeightSubmission,
};
