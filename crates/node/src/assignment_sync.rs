//! Assignment Synchronizer
//!
//! This module provides the `AssignmentSynchronizer` component for
//! StreamGrid storage nodes. The synchronizer owns the authoritative
//! local set of assigned (stream, partition) units and keeps it
//! continuously reconciled against the registry.
//!
//! ## Two Sources, One Set
//!
//! ```text
//! Registry poll ──▶ full snapshot ──┐
//!                                   ├──▶ critical section ──▶ BTreeSet<UnitKey>
//! Registry events ─▶ bridge ────────┘          │
//!                                              ▼
//!                            on_unit_added / on_unit_removed
//! ```
//!
//! - **Poll path**: a periodic full-state fetch; the local set is
//!   diffed against the snapshot and only the delta is applied.
//! - **Event path**: the [`AssignmentEventBridge`] resolves push events
//!   and feeds them through the same critical section.
//!
//! Both paths serialize on one `tokio::sync::Mutex`, so a poll result
//! and a concurrent event can never interleave on the set or produce
//! duplicate callbacks. Watermarks are recorded but deliberately not
//! used for conflict resolution: if the feed delivers an event with an
//! older watermark after a poll already reflects newer state, the set
//! may transiently lag truth until the next poll self-heals it. This is
//! an accepted eventual-consistency window.
//!
//! ## Callback Contract
//!
//! `on_unit_added` / `on_unit_removed` fire exactly once per effective
//! set transition, inside the critical section, in ascending
//! `(stream_id, partition)` order. Callbacks must not block for long or
//! they stall subsequent reconciliation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sgrid_common::registry::{AssignmentChange, StreamMetadata, StreamRegistry, UnitKey};

use crate::assignment_bridge::{AssignmentEventBridge, BridgeEventCallback};
use crate::config::SyncConfig;
use crate::metrics::AssignmentMetrics;

// ════════════════════════════════════════════════════════════════════════════
// SYNC ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by synchronizer lifecycle operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// `start` was called while a previous lifecycle is still running.
    #[error("assignment synchronizer already running")]
    AlreadyRunning,
}

// ════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT LISTENER
// ════════════════════════════════════════════════════════════════════════════

/// Downstream consumer of effective assignment transitions.
///
/// Implementations are invoked synchronously from within the
/// reconciliation critical section. The unit set already reflects the
/// transition when the callback fires.
pub trait AssignmentListener: Send + Sync {
    /// A unit entered the local assignment set.
    fn on_unit_added(&self, unit: &UnitKey);

    /// A unit left the local assignment set.
    fn on_unit_removed(&self, unit: &UnitKey);
}

// ════════════════════════════════════════════════════════════════════════════
// SYNC CORE
// ════════════════════════════════════════════════════════════════════════════

/// State and reconciliation logic shared by the poll task and the
/// bridge callback.
struct SyncCore {
    registry: Arc<dyn StreamRegistry>,
    config: SyncConfig,
    listener: Arc<dyn AssignmentListener>,
    metrics: Arc<AssignmentMetrics>,
    /// The authoritative local set. Readable at any time; mutated only
    /// inside the reconcile critical section.
    units: RwLock<BTreeSet<UnitKey>>,
    /// Critical section serializing poll and event application.
    reconcile: tokio::sync::Mutex<()>,
    /// Highest watermark observed from either source.
    last_watermark: AtomicU64,
}

impl SyncCore {
    /// Expand a stream into the unit keys this node is responsible for.
    fn local_keys(&self, meta: &StreamMetadata) -> Vec<UnitKey> {
        meta.unit_keys()
            .filter(|key| self.config.sharding.is_local(key))
            .collect()
    }

    fn record_watermark(&self, watermark: u64) {
        self.last_watermark.fetch_max(watermark, Ordering::SeqCst);
    }

    /// One poll tick: fetch the full snapshot and apply the delta.
    ///
    /// Fetch errors are logged and skipped; the timer continues and the
    /// next tick retries with no extra backoff.
    async fn run_poll(&self) {
        let snapshot = match self
            .registry
            .fetch_assigned_units(&self.config.node_address)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_poll_failure();
                warn!(error = %e, "assignment poll failed, retrying next interval");
                return;
            }
        };

        let mut target = BTreeSet::new();
        for meta in &snapshot.streams {
            target.extend(self.local_keys(meta));
        }

        let _guard = self.reconcile.lock().await;

        let current = self.units.read().clone();
        // BTreeSet differences iterate ascending by (stream_id, partition).
        let to_remove: Vec<UnitKey> = current.difference(&target).cloned().collect();
        let to_add: Vec<UnitKey> = target.difference(&current).cloned().collect();

        if !to_remove.is_empty() || !to_add.is_empty() {
            let mut units = self.units.write();
            for key in &to_remove {
                units.remove(key);
            }
            for key in &to_add {
                units.insert(key.clone());
            }
        }

        // Removals first, then additions, both in ascending order.
        for key in &to_remove {
            self.metrics.record_unit_removed();
            self.listener.on_unit_removed(key);
        }
        for key in &to_add {
            self.metrics.record_unit_added();
            self.listener.on_unit_added(key);
        }

        self.record_watermark(snapshot.watermark);
        self.metrics.record_poll_completed();
        debug!(
            watermark = snapshot.watermark,
            added = to_add.len(),
            removed = to_remove.len(),
            total = self.units.read().len(),
            "assignment poll applied"
        );
    }

    /// Apply one resolved bridge event.
    ///
    /// Only the transition implied by `change` is applied: adds skip
    /// keys already present, removes skip keys already absent, and no
    /// callback fires for a skipped key.
    async fn apply_event(&self, meta: StreamMetadata, change: AssignmentChange, watermark: u64) {
        let keys = self.local_keys(&meta);

        let _guard = self.reconcile.lock().await;
        self.metrics.record_event_accepted();

        let changed: Vec<UnitKey> = {
            let mut units = self.units.write();
            match change {
                AssignmentChange::Added => keys
                    .into_iter()
                    .filter(|key| units.insert(key.clone()))
                    .collect(),
                AssignmentChange::Removed => {
                    keys.into_iter().filter(|key| units.remove(key)).collect()
                }
            }
        };

        for key in &changed {
            match change {
                AssignmentChange::Added => {
                    self.metrics.record_unit_added();
                    self.listener.on_unit_added(key);
                }
                AssignmentChange::Removed => {
                    self.metrics.record_unit_removed();
                    self.listener.on_unit_removed(key);
                }
            }
        }

        self.record_watermark(watermark);
        debug!(
            stream_id = %meta.stream_id,
            ?change,
            watermark,
            effective = changed.len(),
            "assignment event applied"
        );
    }

    /// Poll loop body: the initial poll, then sleep-and-poll until
    /// shutdown. Shutdown wins over a pending tick.
    ///
    /// Every poll runs on this one task, so the inter-poll delay is
    /// measured from the end of the previous poll and two fetches can
    /// never be in flight at once, even when a fetch outlasts the
    /// configured interval.
    async fn poll_loop(
        self: Arc<Self>,
        shutdown: Arc<Notify>,
        first_poll_done: oneshot::Sender<()>,
    ) {
        self.run_poll().await;
        let _ = first_poll_done.send(());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            self.run_poll().await;
        }
        debug!("assignment poll loop stopped");
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT SYNCHRONIZER
// ════════════════════════════════════════════════════════════════════════════

/// Task handles for one started lifecycle.
struct SyncRuntime {
    bridge: Arc<AssignmentEventBridge>,
    poll_task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Owns the authoritative set of units assigned to this storage node.
///
/// ## Lifecycle
///
/// 1. Create with [`AssignmentSynchronizer::new`]; the set starts
///    empty and nothing touches the registry.
/// 2. `start().await` subscribes the bridge, runs the first poll to
///    completion, and schedules the periodic poll.
/// 3. `destroy().await` cancels the poll timer, tears down the bridge,
///    and waits for in-flight work; afterwards the set is frozen and no
///    further callback fires.
///
/// Precondition: `destroy` must not race a still-resolving `start`, and
/// `start` must not be called again before a matching `destroy` has
/// resolved.
pub struct AssignmentSynchronizer {
    core: Arc<SyncCore>,
    runtime: Mutex<Option<SyncRuntime>>,
}

impl AssignmentSynchronizer {
    /// Create a synchronizer. Performs no IO and spawns no tasks.
    pub fn new(
        registry: Arc<dyn StreamRegistry>,
        config: SyncConfig,
        listener: Arc<dyn AssignmentListener>,
    ) -> Self {
        Self {
            core: Arc::new(SyncCore {
                registry,
                config,
                listener,
                metrics: Arc::new(AssignmentMetrics::new()),
                units: RwLock::new(BTreeSet::new()),
                reconcile: tokio::sync::Mutex::new(()),
                last_watermark: AtomicU64::new(0),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Synchronous snapshot of the assigned unit set.
    ///
    /// Empty before `start` and frozen after `destroy`.
    pub fn get_assigned_units(&self) -> BTreeSet<UnitKey> {
        self.core.units.read().clone()
    }

    /// Number of currently assigned units.
    pub fn unit_count(&self) -> usize {
        self.core.units.read().len()
    }

    /// Whether a started lifecycle is active.
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Highest watermark observed from either source. Zero before the
    /// first successful poll or event.
    pub fn last_watermark(&self) -> u64 {
        self.core.last_watermark.load(Ordering::SeqCst)
    }

    /// Reconciliation activity counters for this instance.
    pub fn metrics(&self) -> Arc<AssignmentMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Start the bridge and the periodic poll.
    ///
    /// The first poll runs to completion before `start` returns, so a
    /// caller observes the initial assignment as soon as `start`
    /// resolves. Every poll runs on one task: subsequent polls fire
    /// after each `poll_interval` measured from the end of the previous
    /// poll, so polls never overlap.
    pub async fn start(&self) -> Result<(), SyncError> {
        let first_poll_done = {
            let mut runtime = self.runtime.lock();
            if runtime.is_some() {
                return Err(SyncError::AlreadyRunning);
            }

            let core = Arc::clone(&self.core);
            let on_event: BridgeEventCallback = Arc::new(move |meta, change, watermark| {
                let core = Arc::clone(&core);
                Box::pin(async move {
                    core.apply_event(meta, change, watermark).await;
                })
            });
            let bridge = Arc::new(AssignmentEventBridge::new(
                Arc::clone(&self.core.registry),
                self.core.config.node_address.clone(),
                on_event,
                Arc::clone(&self.core.metrics),
            ));
            bridge.start();

            let shutdown = Arc::new(Notify::new());
            let (first_done_tx, first_done_rx) = oneshot::channel();
            let poll_task = tokio::spawn(Arc::clone(&self.core).poll_loop(
                Arc::clone(&shutdown),
                first_done_tx,
            ));

            *runtime = Some(SyncRuntime {
                bridge,
                poll_task,
                shutdown,
            });
            first_done_rx
        };

        // Resolve only once the poll task has applied the initial poll.
        let _ = first_poll_done.await;
        debug!(
            node_address = %self.core.config.node_address,
            units = self.unit_count(),
            "assignment synchronizer started"
        );
        Ok(())
    }

    /// Stop polling, tear down the bridge, and wait for in-flight work.
    ///
    /// After `destroy` resolves: zero further fetches, zero further
    /// callbacks, no further mutation of the unit set. Safe to call if
    /// `start` never ran (no-op).
    pub async fn destroy(&self) {
        let runtime = self.runtime.lock().take();
        let Some(rt) = runtime else {
            return;
        };

        rt.shutdown.notify_one();
        if rt.poll_task.await.is_err() {
            warn!("assignment poll task terminated abnormally");
        }
        rt.bridge.destroy().await;

        debug!(
            node_address = %self.core.config.node_address,
            units = self.unit_count(),
            "assignment synchronizer destroyed"
        );
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use sgrid_common::registry::{
        AssignmentEventHandler, AssignmentEventKind, AssignmentSnapshot, RegistryError,
        SubscriptionId,
    };
    use sgrid_common::sharding::ShardingParams;
    use sgrid_common::{MockRegistry, StreamMetadata};

    const NODE: &str = "0xnode-under-test";

    /// Delegating registry that tracks how many fetches run at once.
    struct OverlapTrackingRegistry {
        inner: Arc<MockRegistry>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl OverlapTrackingRegistry {
        fn new(inner: Arc<MockRegistry>) -> Self {
            Self {
                inner,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamRegistry for OverlapTrackingRegistry {
        async fn fetch_assigned_units(
            &self,
            node_address: &str,
        ) -> Result<AssignmentSnapshot, RegistryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = self.inner.fetch_assigned_units(node_address).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn get_stream_metadata(
            &self,
            stream_id: &str,
        ) -> Result<StreamMetadata, RegistryError> {
            self.inner.get_stream_metadata(stream_id).await
        }

        fn on(&self, kind: AssignmentEventKind, handler: AssignmentEventHandler) -> SubscriptionId {
            self.inner.on(kind, handler)
        }

        fn off(&self, kind: AssignmentEventKind, id: SubscriptionId) {
            self.inner.off(kind, id)
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<UnitKey>>,
        removed: Mutex<Vec<UnitKey>>,
    }

    impl RecordingListener {
        fn added(&self) -> Vec<UnitKey> {
            self.added.lock().clone()
        }

        fn removed(&self) -> Vec<UnitKey> {
            self.removed.lock().clone()
        }
    }

    impl AssignmentListener for RecordingListener {
        fn on_unit_added(&self, unit: &UnitKey) {
            self.added.lock().push(unit.clone());
        }

        fn on_unit_removed(&self, unit: &UnitKey) {
            self.removed.lock().push(unit.clone());
        }
    }

    fn make_sync(
        registry: &Arc<MockRegistry>,
        config: SyncConfig,
    ) -> (AssignmentSynchronizer, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let sync = AssignmentSynchronizer::new(
            registry.clone() as Arc<dyn StreamRegistry>,
            config,
            listener.clone() as Arc<dyn AssignmentListener>,
        );
        (sync, listener)
    }

    fn long_interval(node: &str) -> SyncConfig {
        // Long enough that only the initial poll runs during a test.
        SyncConfig::new(node).with_poll_interval(Duration::from_secs(3600))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn test_empty_before_start() {
        let registry = Arc::new(MockRegistry::new());
        let (sync, listener) = make_sync(&registry, long_interval(NODE));

        assert!(sync.get_assigned_units().is_empty());
        assert!(!sync.is_running());
        assert_eq!(registry.fetch_calls(), 0);
        assert!(listener.added().is_empty());
    }

    #[tokio::test]
    async fn test_initial_poll_populates_set() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_assigned(
            vec![
                StreamMetadata::new("stream-1", 2),
                StreamMetadata::new("stream-2", 4),
            ],
            100,
        );
        let (sync, listener) = make_sync(&registry, long_interval(NODE));

        sync.start().await.unwrap();

        assert_eq!(sync.unit_count(), 6);
        assert_eq!(listener.added().len(), 6);
        assert!(listener.removed().is_empty());
        assert_eq!(sync.last_watermark(), 100);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_additions_fire_in_ascending_order() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_assigned(
            vec![
                StreamMetadata::new("stream-b", 2),
                StreamMetadata::new("stream-a", 2),
            ],
            1,
        );
        let (sync, listener) = make_sync(&registry, long_interval(NODE));

        sync.start().await.unwrap();

        assert_eq!(
            listener.added(),
            vec![
                UnitKey::new("stream-a", 0),
                UnitKey::new("stream-a", 1),
                UnitKey::new("stream-b", 0),
                UnitKey::new("stream-b", 1),
            ]
        );

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_repeated_poll_is_idempotent() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_assigned(vec![StreamMetadata::new("stream-1", 2)], 1);
        let config = SyncConfig::new(NODE).with_poll_interval(Duration::from_millis(20));
        let (sync, listener) = make_sync(&registry, config);

        sync.start().await.unwrap();
        wait_until(|| registry.fetch_calls() >= 3).await;

        assert_eq!(listener.added().len(), 2);
        assert!(listener.removed().is_empty());
        assert_eq!(sync.unit_count(), 2);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_poll_diff_applies_removals_then_additions() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_assigned(vec![StreamMetadata::new("stream-old", 2)], 1);
        let config = SyncConfig::new(NODE).with_poll_interval(Duration::from_millis(20));
        let (sync, listener) = make_sync(&registry, config);

        sync.start().await.unwrap();
        assert_eq!(sync.unit_count(), 2);

        registry.set_assigned(vec![StreamMetadata::new("stream-new", 1)], 2);
        wait_until(|| sync.get_assigned_units().contains(&UnitKey::new("stream-new", 0))).await;

        assert_eq!(
            listener.removed(),
            vec![UnitKey::new("stream-old", 0), UnitKey::new("stream-old", 1)]
        );
        assert_eq!(sync.unit_count(), 1);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_tick_and_recovers() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_fail_fetch(true);
        registry.set_assigned(vec![StreamMetadata::new("stream-1", 1)], 5);
        let config = SyncConfig::new(NODE).with_poll_interval(Duration::from_millis(20));
        let (sync, listener) = make_sync(&registry, config);

        sync.start().await.unwrap();
        assert_eq!(sync.unit_count(), 0);
        assert_eq!(sync.metrics().snapshot().poll_failures, 1);
        assert!(listener.added().is_empty());

        registry.set_fail_fetch(false);
        wait_until(|| sync.unit_count() == 1).await;
        assert_eq!(listener.added(), vec![UnitKey::new("stream-1", 0)]);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_polls_never_overlap_when_fetch_outlasts_interval() {
        let mock = Arc::new(MockRegistry::new());
        mock.set_assigned(vec![StreamMetadata::new("stream-1", 1)], 1);
        // Each fetch takes three times the poll interval.
        mock.set_latency(60);
        let registry = Arc::new(OverlapTrackingRegistry::new(Arc::clone(&mock)));

        let listener = Arc::new(RecordingListener::default());
        let sync = AssignmentSynchronizer::new(
            registry.clone() as Arc<dyn StreamRegistry>,
            SyncConfig::new(NODE).with_poll_interval(Duration::from_millis(20)),
            listener as Arc<dyn AssignmentListener>,
        );

        sync.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        sync.destroy().await;

        assert!(mock.fetch_calls() >= 2);
        assert_eq!(registry.max_in_flight(), 1);
        assert_eq!(sync.unit_count(), 1);
    }

    #[tokio::test]
    async fn test_sharding_filters_poll_expansion() {
        let registry = Arc::new(MockRegistry::new());
        let streams = vec![
            StreamMetadata::new("stream-1", 8),
            StreamMetadata::new("stream-2", 8),
        ];
        registry.set_assigned(streams.clone(), 1);

        let sharding = ShardingParams::new(2, 0).unwrap();
        let config = long_interval(NODE).with_sharding(sharding);
        let (sync, _listener) = make_sync(&registry, config);

        sync.start().await.unwrap();

        let expected: BTreeSet<UnitKey> = streams
            .iter()
            .flat_map(|meta| meta.unit_keys())
            .filter(|key| sharding.is_local(key))
            .collect();
        assert_eq!(sync.get_assigned_units(), expected);
        assert!(expected.len() < 16);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let registry = Arc::new(MockRegistry::new());
        let (sync, _listener) = make_sync(&registry, long_interval(NODE));

        sync.start().await.unwrap();
        assert_eq!(sync.start().await, Err(SyncError::AlreadyRunning));
        // The rejected call must not have touched the registry again.
        assert_eq!(registry.registrations(), 2);

        sync.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_without_start_is_noop() {
        let registry = Arc::new(MockRegistry::new());
        let (sync, listener) = make_sync(&registry, long_interval(NODE));

        sync.destroy().await;

        assert_eq!(registry.fetch_calls(), 0);
        assert_eq!(registry.registrations(), 0);
        assert!(listener.added().is_empty());
    }

    #[tokio::test]
    async fn test_watermark_tracks_maximum() {
        let registry = Arc::new(MockRegistry::new());
        registry.set_assigned(Vec::new(), 50);
        registry.put_stream(StreamMetadata::new("stream-1", 1));
        let (sync, _listener) = make_sync(&registry, long_interval(NODE));

        sync.start().await.unwrap();
        assert_eq!(sync.last_watermark(), 50);

        // An event with an older watermark must not regress it.
        registry.emit(
            sgrid_common::AssignmentEventKind::UnitAdded,
            sgrid_common::AssignmentEvent {
                stream_id: "stream-1".to_string(),
                node_address: NODE.to_string(),
                change: AssignmentChange::Added,
                watermark: 40,
            },
        );
        wait_until(|| sync.unit_count() == 1).await;
        assert_eq!(sync.last_watermark(), 50);

        sync.destroy().await;
    }
}
