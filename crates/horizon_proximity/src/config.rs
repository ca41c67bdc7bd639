//! Proximity Configuration Management
//!
//! Configuration structures for the proximity coordinator, the replication
//! client and logging. Every struct deserializes with defaults for missing
//! fields so a host can embed it in its own configuration file.

use crate::error::ConfigValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which [`QueryIndex`](crate::QueryIndex) implementation backs a query set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Evaluates every query against every cached entity.
    BruteForce,
    /// Prunes candidates with an R*-tree before the exact test.
    RTree,
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::RTree
    }
}

/// Complete proximity service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityServiceConfig {
    /// Query evaluation and result dispatch
    pub proximity: ProximityConfig,
    /// Replicated index mirroring
    pub replication: ReplicationConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Settings for the proximity coordinator's worker loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Maximum additions plus removals carried by one result message
    pub max_results_per_message: usize,
    /// Cadence of server-query pushes to peers (milliseconds)
    pub server_query_push_interval_ms: u64,
    /// Cadence of query index ticks (milliseconds)
    pub index_tick_interval_ms: u64,
    /// Cadence of event harvesting (milliseconds)
    pub event_interval_ms: u64,
    /// Cadence of result delivery retries (milliseconds)
    pub delivery_interval_ms: u64,
    /// Delay before peers are refreshed after the minimum object query
    /// angle grows. Decreases are always pushed on the next cycle.
    pub threshold_raise_delay_ms: u64,
    /// Index used for server queries
    pub server_index: IndexKind,
    /// Index used for object queries
    pub object_index: IndexKind,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            max_results_per_message: 10,
            server_query_push_interval_ms: 100,
            index_tick_interval_ms: 100,
            event_interval_ms: 100,
            delivery_interval_ms: 100,
            threshold_raise_delay_ms: 0,
            server_index: IndexKind::RTree,
            object_index: IndexKind::RTree,
        }
    }
}

/// Settings for the replication client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// How long a node may stay unobserved before it is coarsened (milliseconds)
    pub unobserved_timeout_ms: u64,
    /// How long an orphaned location update is retained (milliseconds)
    pub orphan_timeout_ms: u64,
    /// Cadence of the pending-orphan tree sweep (milliseconds)
    pub orphan_sweep_interval_ms: u64,
    /// Cadence of orphan update expiry checks (milliseconds)
    pub orphan_expiry_interval_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            unobserved_timeout_ms: 15_000,
            orphan_timeout_ms: 10_000,
            orphan_sweep_interval_ms: 60_000,
            orphan_expiry_interval_ms: 1_000,
        }
    }
}

impl ReplicationConfig {
    pub fn unobserved_timeout(&self) -> Duration {
        Duration::from_millis(self.unobserved_timeout_ms)
    }

    pub fn orphan_timeout(&self) -> Duration {
        Duration::from_millis(self.orphan_timeout_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration builder for easier setup
pub struct ProximityConfigBuilder {
    config: ProximityServiceConfig,
}

impl ProximityConfigBuilder {
    /// Creates a new configuration builder with default values
    pub fn new() -> Self {
        Self {
            config: ProximityServiceConfig::default(),
        }
    }

    /// Sets the per-message result batch size
    pub fn with_max_results_per_message(mut self, max: usize) -> Self {
        self.config.proximity.max_results_per_message = max;
        self
    }

    /// Sets every periodic duty of the proximity worker to the same cadence
    pub fn with_tick_interval(mut self, interval_ms: u64) -> Self {
        let proximity = &mut self.config.proximity;
        proximity.server_query_push_interval_ms = interval_ms;
        proximity.index_tick_interval_ms = interval_ms;
        proximity.event_interval_ms = interval_ms;
        proximity.delivery_interval_ms = interval_ms;
        self
    }

    /// Sets the delay applied to refreshes caused by a growing threshold
    pub fn with_threshold_raise_delay(mut self, delay_ms: u64) -> Self {
        self.config.proximity.threshold_raise_delay_ms = delay_ms;
        self
    }

    /// Selects the index implementations for server and object queries
    pub fn with_indexes(mut self, server: IndexKind, object: IndexKind) -> Self {
        self.config.proximity.server_index = server;
        self.config.proximity.object_index = object;
        self
    }

    /// Sets the unobserved-node coarsen timeout
    pub fn with_unobserved_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.replication.unobserved_timeout_ms = timeout_ms;
        self
    }

    /// Sets orphan retention and sweep cadence
    pub fn with_orphan_timing(mut self, timeout_ms: u64, sweep_interval_ms: u64) -> Self {
        self.config.replication.orphan_timeout_ms = timeout_ms;
        self.config.replication.orphan_sweep_interval_ms = sweep_interval_ms;
        self
    }

    /// Sets log level and format
    pub fn with_logging(mut self, level: &str, json_format: bool) -> Self {
        self.config.logging.level = level.to_string();
        self.config.logging.json_format = json_format;
        self
    }

    /// Builds the final configuration
    pub fn build(self) -> ProximityServiceConfig {
        self.config
    }
}

impl Default for ProximityConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validation
impl ProximityServiceConfig {
    /// Validates the configuration and returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.proximity.validate()?;
        self.replication.validate()?;

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigValidationError::InvalidValue(format!(
                "logging.level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }

        Ok(())
    }
}

impl ProximityConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_results_per_message == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_results_per_message must be > 0".to_string(),
            ));
        }

        let intervals = [
            ("server_query_push_interval_ms", self.server_query_push_interval_ms),
            ("index_tick_interval_ms", self.index_tick_interval_ms),
            ("event_interval_ms", self.event_interval_ms),
            ("delivery_interval_ms", self.delivery_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigValidationError::InvalidValue(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let durations = [
            ("unobserved_timeout_ms", self.unobserved_timeout_ms),
            ("orphan_timeout_ms", self.orphan_timeout_ms),
            ("orphan_sweep_interval_ms", self.orphan_sweep_interval_ms),
            ("orphan_expiry_interval_ms", self.orphan_expiry_interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigValidationError::InvalidValue(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = ProximityServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proximity.max_results_per_message, 10);
        assert_eq!(config.replication.unobserved_timeout_ms, 15_000);
        assert_eq!(config.replication.orphan_timeout_ms, 10_000);
    }

    #[test]
    fn test_config_builder() {
        let config = ProximityConfigBuilder::new()
            .with_max_results_per_message(5)
            .with_tick_interval(20)
            .with_indexes(IndexKind::BruteForce, IndexKind::RTree)
            .with_logging("debug", true)
            .build();

        assert_eq!(config.proximity.max_results_per_message, 5);
        assert_eq!(config.proximity.event_interval_ms, 20);
        assert_eq!(config.proximity.server_index, IndexKind::BruteForce);
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ProximityConfigBuilder::new().with_max_results_per_message(0).build();
        assert!(config.validate().is_err());

        let config = ProximityConfigBuilder::new().with_unobserved_timeout(0).build();
        assert!(config.validate().is_err());

        let config = ProximityConfigBuilder::new().with_logging("loud", false).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_embeds_in_toml_with_defaults() {
        let text = r#"
            [proximity]
            max_results_per_message = 25
            object_index = "brute_force"

            [replication]
            unobserved_timeout_ms = 5000
        "#;
        let config: ProximityServiceConfig = toml::from_str(text).unwrap();
        assert_eq!(config.proximity.max_results_per_message, 25);
        assert_eq!(config.proximity.object_index, IndexKind::BruteForce);
        assert_eq!(config.proximity.server_index, IndexKind::RTree);
        assert_eq!(config.replication.unobserved_timeout_ms, 5000);
        assert_eq!(config.replication.orphan_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }
}
