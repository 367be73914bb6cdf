//! Mock Registry Implementation for Testing
//!
//! This module provides an in-memory [`StreamRegistry`] implementation
//! for testing. MockRegistry performs no network calls and is fully
//! deterministic.
//!
//! # Features
//!
//! - Programmable assignment snapshots and stream catalog
//! - Failure injection for fetch and lookup paths
//! - Configurable latency simulation (async, non-blocking) so tests can
//!   hold an operation in flight across a lifecycle transition
//! - Synchronous event emission into registered handlers
//! - Observation counters (fetch calls, handler registrations and
//!   unregistrations) for asserting lifecycle bounds
//!
//! # Example
//!
//! ```ignore
//! use sgrid_common::{MockRegistry, StreamMetadata};
//!
//! let registry = MockRegistry::new();
//! registry.put_stream(StreamMetadata::new("stream-1", 2));
//! registry.set_assigned(vec![StreamMetadata::new("stream-1", 2)], 10);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::registry::{
    AssignmentEvent, AssignmentEventHandler, AssignmentEventKind, AssignmentSnapshot,
    RegistryError, StreamMetadata, StreamRegistry, SubscriptionId,
};

// ════════════════════════════════════════════════════════════════════════════
// MOCK REGISTRY
// ════════════════════════════════════════════════════════════════════════════

/// In-memory stream registry for unit and integration tests.
///
/// All state lives behind `RwLock`s and atomics; the mock is safe to
/// share as `Arc<MockRegistry>` across tasks. Event emission is
/// synchronous: `emit` invokes every handler registered for the event's
/// kind before returning.
pub struct MockRegistry {
    /// Stream catalog: stream id -> metadata.
    streams: RwLock<HashMap<String, StreamMetadata>>,
    /// Current full-poll answer.
    snapshot: RwLock<AssignmentSnapshot>,
    /// When set, `fetch_assigned_units` fails.
    fail_fetch: AtomicBool,
    /// When set, `get_stream_metadata` fails for every stream.
    fail_lookup: AtomicBool,
    /// Simulated latency in milliseconds for the async operations.
    latency_ms: AtomicU64,
    /// Registered handlers: id -> (kind, handler).
    handlers: RwLock<HashMap<u64, (AssignmentEventKind, AssignmentEventHandler)>>,
    next_subscription: AtomicU64,
    /// Total `fetch_assigned_units` calls observed.
    fetch_calls: AtomicU64,
    /// Total `get_stream_metadata` calls observed.
    lookup_calls: AtomicU64,
    /// Total `on` calls observed.
    registrations: AtomicU64,
    /// Total `off` calls that removed a live handler.
    unregistrations: AtomicU64,
}

impl MockRegistry {
    /// Create an empty mock registry.
    ///
    /// Initial state: no streams, empty snapshot at watermark 0, no
    /// failure injection, no handlers.
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(AssignmentSnapshot {
                streams: Vec::new(),
                watermark: 0,
            }),
            fail_fetch: AtomicBool::new(false),
            fail_lookup: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            handlers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            fetch_calls: AtomicU64::new(0),
            lookup_calls: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            unregistrations: AtomicU64::new(0),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST SETUP HELPERS
    // ════════════════════════════════════════════════════════════════════════

    /// Insert or replace a stream in the catalog.
    pub fn put_stream(&self, meta: StreamMetadata) {
        self.streams.write().insert(meta.stream_id.clone(), meta);
    }

    /// Remove a stream from the catalog. Subsequent lookups return
    /// [`RegistryError::StreamNotFound`].
    pub fn remove_stream(&self, stream_id: &str) {
        self.streams.write().remove(stream_id);
    }

    /// Replace the full-poll answer.
    pub fn set_assigned(&self, streams: Vec<StreamMetadata>, watermark: u64) {
        *self.snapshot.write() = AssignmentSnapshot { streams, watermark };
    }

    /// Toggle fetch failure injection.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Toggle lookup failure injection.
    pub fn set_fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    /// Set simulated latency for `fetch_assigned_units` and
    /// `get_stream_metadata`. Zero (the default) disables the delay.
    ///
    /// Takes effect for operations that start after the call; an
    /// operation already sleeping keeps its original delay.
    pub fn set_latency(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Simulate latency if configured (async, non-blocking).
    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }

    /// Dispatch an event synchronously to every handler registered for
    /// its kind.
    ///
    /// Handlers run on the calling thread; when this returns, every
    /// handler has observed the event.
    pub fn emit(&self, kind: AssignmentEventKind, event: AssignmentEvent) {
        let handlers: Vec<AssignmentEventHandler> = self
            .handlers
            .read()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| h.clone())
            .collect();

        debug!(
            stream_id = %event.stream_id,
            ?kind,
            handler_count = handlers.len(),
            "MockRegistry: emitting event"
        );

        for handler in handlers {
            handler(event.clone());
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // OBSERVATION COUNTERS
    // ════════════════════════════════════════════════════════════════════════

    /// Number of `fetch_assigned_units` calls made so far.
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_stream_metadata` calls made so far.
    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Number of `on` calls made so far.
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Number of `off` calls that removed a live handler.
    pub fn unregistrations(&self) -> u64 {
        self.unregistrations.load(Ordering::SeqCst)
    }

    /// Number of currently registered handlers.
    pub fn active_handlers(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRegistry")
            .field("streams", &self.streams.read().len())
            .field("active_handlers", &self.handlers.read().len())
            .field("fetch_calls", &self.fetch_calls.load(Ordering::SeqCst))
            .field("fail_fetch", &self.fail_fetch.load(Ordering::SeqCst))
            .field("fail_lookup", &self.fail_lookup.load(Ordering::SeqCst))
            .field("latency_ms", &self.latency_ms.load(Ordering::SeqCst))
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STREAM REGISTRY IMPL
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl StreamRegistry for MockRegistry {
    async fn fetch_assigned_units(
        &self,
        _node_address: &str,
    ) -> Result<AssignmentSnapshot, RegistryError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(RegistryError::Fetch("injected fetch failure".to_string()));
        }
        Ok(self.snapshot.read().clone())
    }

    async fn get_stream_metadata(&self, stream_id: &str) -> Result<StreamMetadata, RegistryError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(RegistryError::Lookup("injected lookup failure".to_string()));
        }
        self.streams
            .read()
            .get(stream_id)
            .cloned()
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))
    }

    fn on(&self, kind: AssignmentEventKind, handler: AssignmentEventHandler) -> SubscriptionId {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.handlers.write().insert(id, (kind, handler));
        SubscriptionId(id)
    }

    fn off(&self, _kind: AssignmentEventKind, id: SubscriptionId) {
        if self.handlers.write().remove(&id.0).is_some() {
            self.unregistrations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use crate::registry::AssignmentChange;

    fn added_event(stream_id: &str, node: &str, watermark: u64) -> AssignmentEvent {
        AssignmentEvent {
            stream_id: stream_id.to_string(),
            node_address: node.to_string(),
            change: AssignmentChange::Added,
            watermark,
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_programmed_snapshot() {
        let registry = MockRegistry::new();
        registry.set_assigned(vec![StreamMetadata::new("stream-1", 2)], 42);

        let snapshot = registry.fetch_assigned_units("node-a").await.unwrap();
        assert_eq!(snapshot.watermark, 42);
        assert_eq!(snapshot.streams.len(), 1);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let registry = MockRegistry::new();
        registry.set_fail_fetch(true);

        let result = registry.fetch_assigned_units("node-a").await;
        assert!(matches!(result, Err(RegistryError::Fetch(_))));
        assert_eq!(registry.fetch_calls(), 1);

        registry.set_fail_fetch(false);
        assert!(registry.fetch_assigned_units("node-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_latency_delays_async_operations() {
        let registry = MockRegistry::new();
        registry.put_stream(StreamMetadata::new("stream-1", 1));
        registry.set_latency(50);

        let started = tokio::time::Instant::now();
        registry.get_stream_metadata("stream-1").await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));

        registry.set_latency(0);
        let started = tokio::time::Instant::now();
        registry.fetch_assigned_units("node-a").await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_lookup_unknown_stream() {
        let registry = MockRegistry::new();
        let result = registry.get_stream_metadata("nope").await;
        assert_eq!(
            result,
            Err(RegistryError::StreamNotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_lookup_after_put_and_remove() {
        let registry = MockRegistry::new();
        registry.put_stream(StreamMetadata::new("stream-1", 3));

        let meta = registry.get_stream_metadata("stream-1").await.unwrap();
        assert_eq!(meta.partition_count, 3);

        registry.remove_stream("stream-1");
        assert!(registry.get_stream_metadata("stream-1").await.is_err());
    }

    #[test]
    fn test_emit_reaches_only_matching_kind() {
        let registry = MockRegistry::new();
        let added_seen = Arc::new(AtomicUsize::new(0));
        let removed_seen = Arc::new(AtomicUsize::new(0));

        let counter = added_seen.clone();
        registry.on(
            AssignmentEventKind::UnitAdded,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = removed_seen.clone();
        registry.on(
            AssignmentEventKind::UnitRemoved,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.emit(
            AssignmentEventKind::UnitAdded,
            added_event("stream-1", "node-a", 1),
        );

        assert_eq!(added_seen.load(Ordering::SeqCst), 1);
        assert_eq!(removed_seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_handler_and_counts() {
        let registry = MockRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let id = registry.on(
            AssignmentEventKind::UnitAdded,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(registry.registrations(), 1);
        assert_eq!(registry.active_handlers(), 1);

        registry.off(AssignmentEventKind::UnitAdded, id);
        assert_eq!(registry.unregistrations(), 1);
        assert_eq!(registry.active_handlers(), 0);

        // Second off with the same id is a no-op.
        registry.off(AssignmentEventKind::UnitAdded, id);
        assert_eq!(registry.unregistrations(), 1);

        registry.emit(
            AssignmentEventKind::UnitAdded,
            added_event("stream-1", "node-a", 1),
        );
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
