//! # Navis Core
//!
//! Shared building blocks for the Navis validator coordination layer:
//! identifiers, the deviation record exchanged between consensus and
//! slashing, unit constants and the crate-wide error type.
//!
//! ```text
//!   Stake Registry ──► Weight Consensus ──► Slashing Engine
//!         │                  │                    │
//!         └──► Reputation ◄──┴────────────────────┘
//!
//!   Volume Ledger ──► Reward Allocator
//!
//!   Epoch Manager drives all of the above once per epoch
//! ```

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Unit constants
pub mod constants {
    /// Smallest stake units per whole token
    pub const ONE_TOKEN: u128 = 1_000_000_000;

    /// Basis points in one whole
    pub const BPS_DENOMINATOR: u128 = 10_000;

    /// Seconds in one hour
    pub const HOUR_SECS: i64 = 3600;

    /// Seconds in one day
    pub const DAY_SECS: i64 = 24 * HOUR_SECS;
}

pub use constants::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::constants::*;
    pub use crate::error::{NavisError, Result};
    pub use crate::types::*;
}
