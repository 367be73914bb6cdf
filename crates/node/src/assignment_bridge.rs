//! Assignment Event Bridge
//!
//! This module provides the `AssignmentEventBridge` component for
//! StreamGrid storage nodes. The bridge is the translation layer between
//! the registry's raw push-event feed and the unit-level notifications
//! the synchronizer consumes. It holds no assignment state of its own.
//!
//! ## Role
//!
//! - Owns the two registry subscription slots (`UnitAdded`,
//!   `UnitRemoved`) for one node lifecycle.
//! - Filters out events addressed to other nodes on the shared fleet
//!   event bus. Foreign events are discarded silently; they are routine
//!   traffic, not an error.
//! - Resolves each accepted event's stream id into full
//!   [`StreamMetadata`] via the async registry lookup, then forwards a
//!   normalized `(metadata, change, watermark)` tuple to the owner
//!   callback.
//!
//! ## Event Loss
//!
//! A failed lookup drops the event after a warning. The bridge never
//! retries: the owning synchronizer's next full poll is the recovery
//! path, which is why polling stays the source of truth.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sgrid_common::registry::{
    AssignmentChange, AssignmentEvent, AssignmentEventKind, StreamMetadata, StreamRegistry,
    SubscriptionId,
};

use crate::metrics::AssignmentMetrics;

// ════════════════════════════════════════════════════════════════════════════
// OWNER CALLBACK
// ════════════════════════════════════════════════════════════════════════════

/// Callback the bridge's owner supplies at construction.
///
/// Invoked once per accepted, successfully resolved event. The bridge
/// awaits the returned future before taking the next event, so the
/// owner can serialize its state mutation inside it.
pub type BridgeEventCallback =
    Arc<dyn Fn(StreamMetadata, AssignmentChange, u64) -> BoxFuture<'static, ()> + Send + Sync>;

// ════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT EVENT BRIDGE
// ════════════════════════════════════════════════════════════════════════════

/// Subscription bookkeeping for one started lifecycle.
struct BridgeRuntime {
    added_subscription: SubscriptionId,
    removed_subscription: SubscriptionId,
    shutdown: Arc<Notify>,
    worker: JoinHandle<()>,
}

/// Translates raw registry push events into resolved unit notifications
/// addressed to this node.
///
/// ## Lifecycle
///
/// 1. Create with [`AssignmentEventBridge::new`].
/// 2. Call [`start`](AssignmentEventBridge::start) at most once per
///    lifecycle — it registers exactly two handlers on the registry.
/// 3. Call [`destroy`](AssignmentEventBridge::destroy) to unregister
///    both handlers and wait for any in-flight lookup or callback to
///    finish. Safe to call without a prior `start` (no-op).
pub struct AssignmentEventBridge {
    registry: Arc<dyn StreamRegistry>,
    node_address: String,
    on_event: BridgeEventCallback,
    metrics: Arc<AssignmentMetrics>,
    runtime: Mutex<Option<BridgeRuntime>>,
}

impl AssignmentEventBridge {
    /// Create a bridge. Does not subscribe and does not spawn tasks.
    pub fn new(
        registry: Arc<dyn StreamRegistry>,
        node_address: String,
        on_event: BridgeEventCallback,
        metrics: Arc<AssignmentMetrics>,
    ) -> Self {
        Self {
            registry,
            node_address,
            on_event,
            metrics,
            runtime: Mutex::new(None),
        }
    }

    /// Whether the bridge currently holds live subscriptions.
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Register the two event handlers and spawn the resolver worker.
    ///
    /// Precondition: at most one `start` per lifecycle. A second call
    /// before `destroy` is ignored with a warning.
    pub fn start(&self) {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            warn!("AssignmentEventBridge already started, ignoring");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel::<AssignmentEvent>();

        // The registry dispatches every event on the bus; addressing is
        // checked here so foreign events never reach the worker.
        let added_subscription = {
            let tx = tx.clone();
            let node_address = self.node_address.clone();
            self.registry.on(
                AssignmentEventKind::UnitAdded,
                Arc::new(move |event| {
                    if event.node_address == node_address {
                        let _ = tx.send(event);
                    }
                }),
            )
        };
        let removed_subscription = {
            let node_address = self.node_address.clone();
            self.registry.on(
                AssignmentEventKind::UnitRemoved,
                Arc::new(move |event| {
                    if event.node_address == node_address {
                        let _ = tx.send(event);
                    }
                }),
            )
        };

        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(Self::worker_loop(
            Arc::clone(&self.registry),
            self.node_address.clone(),
            Arc::clone(&self.on_event),
            Arc::clone(&self.metrics),
            rx,
            Arc::clone(&shutdown),
        ));

        debug!(node_address = %self.node_address, "AssignmentEventBridge started");

        *runtime = Some(BridgeRuntime {
            added_subscription,
            removed_subscription,
            shutdown,
            worker,
        });
    }

    /// Resolver worker: one accepted event at a time, lookup then owner
    /// callback. Shutdown wins over queued events.
    async fn worker_loop(
        registry: Arc<dyn StreamRegistry>,
        node_address: String,
        on_event: BridgeEventCallback,
        metrics: Arc<AssignmentMetrics>,
        mut rx: mpsc::UnboundedReceiver<AssignmentEvent>,
        shutdown: Arc<Notify>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    match registry.get_stream_metadata(&event.stream_id).await {
                        Ok(metadata) => {
                            (on_event)(metadata, event.change, event.watermark).await;
                        }
                        Err(e) => {
                            metrics.record_lookup_failure();
                            warn!(
                                stream_id = %event.stream_id,
                                change = ?event.change,
                                error = %e,
                                "dropping assignment event after failed metadata lookup"
                            );
                        }
                    }
                }
            }
        }
        debug!(node_address = %node_address, "AssignmentEventBridge worker stopped");
    }

    /// Unregister both handlers and wait for the worker to finish its
    /// current event.
    ///
    /// After `destroy` returns, no further owner callback is invoked.
    /// Events still queued at shutdown are dropped. Calling `destroy`
    /// without a prior `start` performs zero unregistrations.
    pub async fn destroy(&self) {
        let runtime = self.runtime.lock().take();
        let Some(rt) = runtime else {
            return;
        };

        self.registry
            .off(AssignmentEventKind::UnitAdded, rt.added_subscription);
        self.registry
            .off(AssignmentEventKind::UnitRemoved, rt.removed_subscription);
        rt.shutdown.notify_one();

        if rt.worker.await.is_err() {
            warn!("AssignmentEventBridge worker terminated abnormally");
        }
        debug!(node_address = %self.node_address, "AssignmentEventBridge destroyed");
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
