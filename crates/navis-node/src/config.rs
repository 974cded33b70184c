//! Node configuration types

use navis_consensus::ConsensusConfig;
use navis_core::{NavisError, Result, ValidatorId};
use navis_economics::{
    ReputationConfig, RewardConfig, ScoringConfig, SlashingConfig, StakeConfig, VolumeConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `NAVIS__EPOCH__LENGTH_SECS=60`
pub const ENV_PREFIX: &str = "NAVIS";

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity and storage
    #[serde(default)]
    pub node: NodeSettings,

    /// Scheduler intervals
    #[serde(default)]
    pub epoch: EpochSettings,

    /// Weight consensus parameters
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Stake registry
    #[serde(default)]
    pub stake: StakeConfig,

    /// Reputation tracker
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Slashing engine
    #[serde(default)]
    pub slashing: SlashingConfig,

    /// Volume ledger
    #[serde(default)]
    pub volume: VolumeConfig,

    /// Miner scoring
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Emission split
    #[serde(default)]
    pub rewards: RewardConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    /// Load from an optional TOML file layered under `NAVIS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: NodeConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| NavisError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.node.validator_id.trim().is_empty() {
            return Err(NavisError::Config("node.validator_id must be set".into()));
        }
        self.epoch.validate()?;
        self.consensus.validate()?;
        self.rewards.validate()?;

        if self.volume.freshness_window_secs <= 0 {
            return Err(NavisError::Config("volume.freshness_window_secs must be positive".into()));
        }
        if self.slashing.lookback_secs <= 0 {
            return Err(NavisError::Config("slashing.lookback_secs must be positive".into()));
        }
        if self.slashing.minor_count_trigger > self.slashing.moderate_count_trigger {
            return Err(NavisError::Config(
                "slashing.minor_count_trigger must not exceed moderate_count_trigger".into(),
            ));
        }
        let rates = [
            self.slashing.minor_rate_bps,
            self.slashing.moderate_rate_bps,
            self.slashing.severe_rate_bps,
            self.slashing.critical_rate_bps,
        ];
        if rates.windows(2).any(|w| w[0] > w[1]) || rates[3] > 10_000 {
            return Err(NavisError::Config(
                "slashing rates must be ascending and at most 10000 bps".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reputation.consistency_alpha) {
            return Err(NavisError::Config("reputation.consistency_alpha must be in [0, 1]".into()));
        }
        if self.scoring.mint_multiplier < 0.0 || self.scoring.redeem_multiplier < 0.0 {
            return Err(NavisError::Config("scoring multipliers must be non-negative".into()));
        }
        Ok(())
    }

    pub fn validator_id(&self) -> ValidatorId {
        ValidatorId::new(self.node.validator_id.clone())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NavisError::Serialization(e.to_string()))
    }
}

/// Basic node settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Hotkey of the validator this node runs as
    #[serde(default = "default_validator_id")]
    pub validator_id: String,

    /// Data directory for the epoch archive and state snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_validator_id() -> String {
    "navis-validator".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            validator_id: default_validator_id(),
            data_dir: default_data_dir(),
        }
    }
}

/// Scheduler timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochSettings {
    /// Epoch tick
    #[serde(default = "default_epoch_length")]
    pub length_secs: u64,

    /// Ledger stake and active-set refresh
    #[serde(default = "default_ledger_sync")]
    pub ledger_sync_secs: u64,

    /// Transaction feed poll
    #[serde(default = "default_feed_poll")]
    pub feed_poll_secs: u64,

    /// Outbox flush to the ledger
    #[serde(default = "default_publish")]
    pub publish_secs: u64,

    /// Upper bound on collecting peer submissions before consensus
    #[serde(default = "default_quorum_timeout")]
    pub quorum_timeout_secs: u64,
}

fn default_epoch_length() -> u64 {
    360
}

fn default_ledger_sync() -> u64 {
    60
}

fn default_feed_poll() -> u64 {
    12
}

fn default_publish() -> u64 {
    30
}

fn default_quorum_timeout() -> u64 {
    20
}

impl Default for EpochSettings {
    fn default() -> Self {
        Self {
            length_secs: default_epoch_length(),
            ledger_sync_secs: default_ledger_sync(),
            feed_poll_secs: default_feed_poll(),
            publish_secs: default_publish(),
            quorum_timeout_secs: default_quorum_timeout(),
        }
    }
}

impl EpochSettings {
    fn validate(&self) -> Result<()> {
        let intervals = [
            ("epoch.length_secs", self.length_secs),
            ("epoch.ledger_sync_secs", self.ledger_sync_secs),
            ("epoch.feed_poll_secs", self.feed_poll_secs),
            ("epoch.publish_secs", self.publish_secs),
            ("epoch.quorum_timeout_secs", self.quorum_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(NavisError::Config(format!("{} must be positive", name)));
        }
        if self.quorum_timeout_secs >= self.length_secs {
            return Err(NavisError::Config(
                "epoch.quorum_timeout_secs must be shorter than the epoch".into(),
            ));
        }
        Ok(())
    }

    pub fn epoch_length(&self) -> Duration {
        Duration::from_secs(self.length_secs)
    }

    pub fn ledger_sync(&self) -> Duration {
        Duration::from_secs(self.ledger_sync_secs)
    }

    pub fn feed_poll(&self) -> Duration {
        Duration::from_secs(self.feed_poll_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    pub fn quorum_timeout(&self) -> Duration {
        Duration::from_secs(self.quorum_timeout_secs)
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Collect metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metric name prefix
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "navis".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_namespace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let config = NodeConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[consensus]"));

        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.consensus.entity_count, config.consensus.entity_count);
        assert_eq!(parsed.stake.minimum_required, config.stake.minimum_required);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[node]\nvalidator_id = \"5Fhk\"\n\n[consensus]\nentity_count = 8").unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.node.validator_id, "5Fhk");
        assert_eq!(config.consensus.entity_count, 8);
        assert_eq!(config.consensus.min_participants, 3);
        assert_eq!(config.epoch.length_secs, 360);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = NodeConfig::load(Some(Path::new("/nonexistent/navis.toml")));
        assert!(matches!(result, Err(NavisError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = NodeConfig::default();
        config.consensus.entity_count = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.rewards.validator_pool_fraction = 0.10;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.epoch.quorum_timeout_secs = config.epoch.length_secs;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.slashing.minor_rate_bps = 600;
        assert!(config.validate().is_err());
    }
}
