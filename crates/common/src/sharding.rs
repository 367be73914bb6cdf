//! Fleet sharding filter.
//!
//! When a StreamGrid fleet runs more than one storage node against the
//! same registry assignment, the unit space is statically partitioned:
//! each node keeps only the units whose stable hash lands on its shard.
//! The filter is a pure function over [`UnitKey`] so the reconciliation
//! algorithm stays untouched by fleet topology.
//!
//! The hash is the first 8 big-endian bytes of
//! `SHA-256("{stream_id}/{partition}")`, the same stable-hash
//! construction used for consistent placement elsewhere in the system.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::registry::UnitKey;

// ════════════════════════════════════════════════════════════════════════════
// SHARDING ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Invalid sharding parameter combinations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShardingError {
    /// `shard_count` must be at least 1.
    #[error("shard count must be positive")]
    ZeroShardCount,

    /// `shard_index` must lie in `[0, shard_count)`.
    #[error("shard index {index} out of range for {count} shards")]
    IndexOutOfRange { index: u32, count: u32 },
}

// ════════════════════════════════════════════════════════════════════════════
// SHARDING PARAMS
// ════════════════════════════════════════════════════════════════════════════

/// Static fleet-partitioning parameters for one node.
///
/// Validated at construction; once built, `is_local` can never fail.
/// `shard_count == 1` is the single-node mode in which every unit is in
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardingParams {
    shard_count: u32,
    shard_index: u32,
}

impl ShardingParams {
    /// Build validated sharding parameters.
    pub fn new(shard_count: u32, shard_index: u32) -> Result<Self, ShardingError> {
        if shard_count == 0 {
            return Err(ShardingError::ZeroShardCount);
        }
        if shard_index >= shard_count {
            return Err(ShardingError::IndexOutOfRange {
                index: shard_index,
                count: shard_count,
            });
        }
        Ok(Self {
            shard_count,
            shard_index,
        })
    }

    /// Single-node mode: one shard, every unit in scope.
    pub fn single() -> Self {
        Self {
            shard_count: 1,
            shard_index: 0,
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Whether a unit falls on this node's shard.
    ///
    /// Pure and deterministic: the same key always maps to the same
    /// shard for a given `shard_count`.
    pub fn is_local(&self, key: &UnitKey) -> bool {
        if self.shard_count == 1 {
            return true;
        }
        shard_hash(key) % u64::from(self.shard_count) == u64::from(self.shard_index)
    }
}

impl Default for ShardingParams {
    fn default() -> Self {
        Self::single()
    }
}

/// Stable u64 hash of a unit key.
fn shard_hash(key: &UnitKey) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.stream_id.as_bytes());
    hasher.update(b"/");
    hasher.update(key.partition.to_be_bytes());
    let sum = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&sum[0..8]);
    u64::from_be_bytes(prefix)
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
