//! StreamGrid Storage Node
//!
//! Assignment-synchronization core for a StreamGrid storage node. The
//! node keeps its local view of assigned stream partitions continuously
//! reconciled against the on-chain stream registry.
//!
//! ## Modules
//!
//! | Module              | Purpose                                           |
//! |---------------------|---------------------------------------------------|
//! | `assignment_bridge` | Registry event feed -> resolved assignment events |
//! | `assignment_sync`   | Authoritative unit set, poll + event reconcile    |
//! | `config`            | Synchronizer configuration, env-var loading       |
//! | `metrics`           | Reconciliation activity counters                  |
//!
//! ## Typical Wiring
//!
//! ```ignore
//! use std::sync::Arc;
//! use sgrid_node::{AssignmentSynchronizer, SyncConfig};
//!
//! let config = SyncConfig::from_env()?;
//! let sync = AssignmentSynchronizer::new(registry, config, listener);
//! sync.start().await?;
//! // ... serve traffic for sync.get_assigned_units() ...
//! sync.destroy().await;
//! ```

pub mod assignment_bridge;
pub mod assignment_sync;
pub mod config;
pub mod metrics;

pub use assignment_bridge::{AssignmentEventBridge, BridgeEventCallback};
pub use assignment_sync::{AssignmentListener, AssignmentSynchronizer, SyncError};
pub use config::{ConfigError, SyncConfig, DEFAULT_POLL_INTERVAL_MS};
pub use metrics::{AssignmentMetrics, MetricsSnapshot};
