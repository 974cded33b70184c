//! # Navis Node
//!
//! Validator node runtime: configuration, the epoch pipeline, persistence,
//! metrics and the single-owner service that schedules it all.
//!
//! ## Components
//!
//! - `config` - layered TOML + environment configuration
//! - `ports` - ledger, peer directory and transaction feed interfaces
//! - `in_memory` - port implementations without a live ledger
//! - `epoch` - Collecting → Consensing → Slashing → Rewarding → Archived
//! - `archive` - append-only epoch log and state snapshot
//! - `metrics` - Prometheus registry
//! - `service` - timers and commands over one `select!` loop

pub mod archive;
pub mod config;
pub mod epoch;
pub mod in_memory;
pub mod metrics;
pub mod ports;
pub mod service;

pub use archive::{ArchiveStore, FileArchive, MemoryArchive, StateSnapshot};
pub use config::{LogFormat, NodeConfig};
pub use epoch::{EpochManager, EpochPhase, EpochReport, PhaseOutcome};
pub use in_memory::{InMemoryLedger, QueuedTransactionFeed, StaticPeerDirectory};
pub use metrics::NodeMetrics;
pub use ports::{LedgerClient, PeerDirectory, TransactionFeed};
pub use service::{NodeCommand, NodeStatus, ServiceEvent, ServiceHandle, ValidatorService};
