//! Synchronizer configuration.
//!
//! Environment variables read by [`SyncConfig::from_env`]:
//!
//! - `SGRID_NODE_ADDRESS`: this node's registry address (required)
//! - `SGRID_POLL_INTERVAL_MS`: delay between full polls, measured from
//!   the end of the previous poll (default: 600000)
//! - `SGRID_SHARD_COUNT`: fleet shard count (default: 1)
//! - `SGRID_SHARD_INDEX`: this node's shard index (default: 0)

use std::time::Duration;

use thiserror::Error;

use sgrid_common::sharding::{ShardingError, ShardingParams};

/// Default inter-poll delay: 10 minutes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 600_000;

// ════════════════════════════════════════════════════════════════════════════
// CONFIG ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    /// An environment variable holds an unparseable value.
    #[error("{name} invalid: '{value}'")]
    Invalid { name: &'static str, value: String },

    /// Shard count/index combination is invalid.
    #[error("invalid sharding parameters: {0}")]
    Sharding(#[from] ShardingError),
}

// ════════════════════════════════════════════════════════════════════════════
// SYNC CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Configuration for one [`crate::AssignmentSynchronizer`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Registry address identifying this storage node.
    pub node_address: String,
    /// Delay between full polls, measured from the end of the previous
    /// poll so polls never overlap.
    pub poll_interval: Duration,
    /// Fleet-partitioning parameters. Single-shard by default.
    pub sharding: ShardingParams,
}

impl SyncConfig {
    /// Build a config with default interval and single-shard mode.
    pub fn new(node_address: impl Into<String>) -> Self {
        Self {
            node_address: node_address.into(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            sharding: ShardingParams::single(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sharding(mut self, sharding: ShardingParams) -> Self {
        self.sharding = sharding;
        self
    }

    /// Read configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `SGRID_NODE_ADDRESS` is missing, a numeric
    /// value fails to parse, or the shard parameters are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_address = std::env::var("SGRID_NODE_ADDRESS")
            .map_err(|_| ConfigError::Missing("SGRID_NODE_ADDRESS"))?;

        let poll_interval_ms = match std::env::var("SGRID_POLL_INTERVAL_MS") {
            Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "SGRID_POLL_INTERVAL_MS",
                value: val,
            })?,
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };

        let shard_count = match std::env::var("SGRID_SHARD_COUNT") {
            Ok(val) => val.parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "SGRID_SHARD_COUNT",
                value: val,
            })?,
            Err(_) => 1,
        };

        let shard_index = match std::env::var("SGRID_SHARD_INDEX") {
            Ok(val) => val.parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "SGRID_SHARD_INDEX",
                value: val,
            })?,
            Err(_) => 0,
        };

        Ok(Self {
            node_address,
            poll_interval: Duration::from_millis(poll_interval_ms),
            sharding: ShardingParams::new(shard_count, shard_index)?,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
