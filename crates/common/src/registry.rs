//! Stream Registry Abstraction
//!
//! This module defines the `StreamRegistry` trait as the abstraction
//! contract for the on-chain stream registry in the StreamGrid system.
//! The trait lets a storage node interact with different registry
//! backends uniformly without being tied to a specific implementation.
//!
//! ## Two Sources of Truth
//!
//! The registry exposes the same assignment information through two
//! independent channels:
//!
//! - **Full-state poll**: [`StreamRegistry::fetch_assigned_units`]
//!   returns the complete assignment snapshot for a node address.
//! - **Push events**: [`StreamRegistry::on`] / [`StreamRegistry::off`]
//!   subscribe to incremental [`AssignmentEvent`]s as they are observed
//!   on chain.
//!
//! Both channels are eventually consistent with each other. The poll is
//! the authoritative recovery path; events are the low-latency path.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════
// UNIT KEY
// ════════════════════════════════════════════════════════════════════════════

/// Identifier of a single stream partition.
///
/// A `UnitKey` is the unit of storage responsibility: a storage node is
/// assigned a set of these and must persist and serve exactly the
/// messages published to them.
///
/// ## Ordering
///
/// Derives `Ord` with field order `(stream_id, partition)`, so a
/// `BTreeSet<UnitKey>` iterates in the deterministic order required for
/// reproducible diff application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    /// Opaque stream identifier as registered on chain.
    pub stream_id: String,
    /// Zero-based partition index within the stream.
    pub partition: u32,
}

impl UnitKey {
    pub fn new(stream_id: impl Into<String>, partition: u32) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_id, self.partition)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STREAM METADATA
// ════════════════════════════════════════════════════════════════════════════

/// Resolved descriptor of a registered stream.
///
/// Produced by resolving a stream id through the registry lookup.
/// `partition_count` is positive for any stream the registry returns;
/// a deleted stream resolves to [`RegistryError::StreamNotFound`]
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Stream identifier this descriptor was resolved from.
    pub stream_id: String,
    /// Number of partitions the stream is split into.
    pub partition_count: u32,
}

impl StreamMetadata {
    pub fn new(stream_id: impl Into<String>, partition_count: u32) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition_count,
        }
    }

    /// Expand this stream into its full set of unit keys.
    ///
    /// Yields one [`UnitKey`] per partition index in
    /// `0..partition_count`, in ascending partition order.
    pub fn unit_keys(&self) -> impl Iterator<Item = UnitKey> + '_ {
        (0..self.partition_count).map(move |p| UnitKey::new(self.stream_id.clone(), p))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT EVENTS
// ════════════════════════════════════════════════════════════════════════════

/// Direction of an assignment transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentChange {
    /// The stream was assigned to the target node.
    Added,
    /// The stream was unassigned from the target node.
    Removed,
}

/// Raw assignment event as observed on the registry event feed.
///
/// Events are addressed: `node_address` names the storage node the
/// transition applies to. Every node on the fleet shares one event bus
/// and filters by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    /// Stream the transition applies to.
    pub stream_id: String,
    /// Address of the storage node the transition targets.
    pub node_address: String,
    /// Whether the stream was added to or removed from the node.
    pub change: AssignmentChange,
    /// Source freshness marker (block number). Monotonically
    /// non-decreasing across the feed.
    pub watermark: u64,
}

/// Event types a subscriber can register for.
///
/// Exactly two kinds exist; subscriptions are modeled as two fixed
/// slots, not a dynamic dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentEventKind {
    UnitAdded,
    UnitRemoved,
}

/// Handler invoked synchronously by the registry's event dispatch.
///
/// Handlers must be cheap: anything slow (lookups, IO) belongs on a
/// task the handler hands off to.
pub type AssignmentEventHandler = Arc<dyn Fn(AssignmentEvent) + Send + Sync>;

/// Opaque handle identifying one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// ════════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════

/// Result of a full assignment poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSnapshot {
    /// Every stream currently assigned to the polled node.
    pub streams: Vec<StreamMetadata>,
    /// Freshness marker of the registry state the snapshot reflects.
    pub watermark: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by registry operations.
///
/// All variants are transient from the node's perspective: a failed
/// fetch is retried on the next poll tick and a failed lookup is
/// recovered by the next successful poll.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Full-state fetch failed (network, chain client, decoding).
    #[error("assignment fetch failed: {0}")]
    Fetch(String),

    /// The stream does not exist in the registry (deleted or never
    /// created).
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Metadata lookup failed for a reason other than absence.
    #[error("stream lookup failed: {0}")]
    Lookup(String),
}

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Abstraction over the on-chain stream registry.
///
/// Implementations are expected to be cheap to share (`Arc<dyn
/// StreamRegistry>`) and safe to call from concurrent tasks.
///
/// ## Contract
///
/// - `fetch_assigned_units` returns the complete current assignment for
///   the address, never a partial view.
/// - `on` registers a handler for one event kind and returns an id that
///   `off` accepts; handlers registered for a kind receive every event
///   of that kind dispatched after registration, regardless of the
///   event's target address (addressing is the subscriber's concern).
/// - `off` with an unknown id is a no-op.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    /// Fetch the full set of streams assigned to `node_address`,
    /// together with the watermark of the observed registry state.
    async fn fetch_assigned_units(
        &self,
        node_address: &str,
    ) -> Result<AssignmentSnapshot, RegistryError>;

    /// Resolve a stream id into its metadata.
    async fn get_stream_metadata(&self, stream_id: &str) -> Result<StreamMetadata, RegistryError>;

    /// Register a handler for one event kind.
    fn on(&self, kind: AssignmentEventKind, handler: AssignmentEventHandler) -> SubscriptionId;

    /// Unregister a previously registered handler.
    fn off(&self, kind: AssignmentEventKind, id: SubscriptionId);
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
