//! Assignment Metrics Module
//!
//! Lock-free, thread-safe counters for the assignment-synchronization
//! core.
//!
//! ## Metrics Tracked
//!
//! | Metric            | Description                                    |
//! |-------------------|------------------------------------------------|
//! | polls_completed   | Full-state polls applied successfully          |
//! | poll_failures     | Full-state polls skipped due to fetch errors   |
//! | events_accepted   | Registry events resolved and applied           |
//! | lookup_failures   | Events dropped after a failed metadata lookup  |
//! | units_added       | `on_unit_added` callbacks fired                |
//! | units_removed     | `on_unit_removed` callbacks fired              |
//!
//! All fields are `AtomicU64`; the struct is `Send + Sync` by
//! construction and safe to share across the poll and event tasks.

use std::sync::atomic::{AtomicU64, Ordering};

// ════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT METRICS
// ════════════════════════════════════════════════════════════════════════════

/// Counters for assignment reconciliation activity.
///
/// Increments use `Ordering::Relaxed` (monotonic counters); snapshot
/// reads use `Ordering::SeqCst`.
#[derive(Debug, Default)]
pub struct AssignmentMetrics {
    pub polls_completed: AtomicU64,
    pub poll_failures: AtomicU64,
    pub events_accepted: AtomicU64,
    pub lookup_failures: AtomicU64,
    pub units_added: AtomicU64,
    pub units_removed: AtomicU64,
}

impl AssignmentMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll_completed(&self) {
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_added(&self) {
        self.units_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_removed(&self) {
        self.units_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_completed: self.polls_completed.load(Ordering::SeqCst),
            poll_failures: self.poll_failures.load(Ordering::SeqCst),
            events_accepted: self.events_accepted.load(Ordering::SeqCst),
            lookup_failures: self.lookup_failures.load(Ordering::SeqCst),
            units_added: self.units_added.load(Ordering::SeqCst),
            units_removed: self.units_removed.load(Ordering::SeqCst),
        }
    }

    /// Render all counters in Prometheus exposition format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            "# TYPE sgrid_assignment_polls_completed counter\n\
             sgrid_assignment_polls_completed {}\n\
             # TYPE sgrid_assignment_poll_failures counter\n\
             sgrid_assignment_poll_failures {}\n\
             # TYPE sgrid_assignment_events_accepted counter\n\
             sgrid_assignment_events_accepted {}\n\
             # TYPE sgrid_assignment_lookup_failures counter\n\
             sgrid_assignment_lookup_failures {}\n\
             # TYPE sgrid_assignment_units_added counter\n\
             sgrid_assignment_units_added {}\n\
             # TYPE sgrid_assignment_units_removed counter\n\
             sgrid_assignment_units_removed {}\n",
            s.polls_completed,
            s.poll_failures,
            s.events_accepted,
            s.lookup_failures,
            s.units_added,
            s.units_removed,
        )
    }
}

/// Plain-value copy of [`AssignmentMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub polls_completed: u64,
    pub poll_failures: u64,
    pub events_accepted: u64,
    pub lookup_failures: u64,
    pub units_added: u64,
    pub units_removed: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = AssignmentMetrics::new();
        let s = metrics.snapshot();
        assert_eq!(s.polls_completed, 0);
        assert_eq!(s.poll_failures, 0);
        assert_eq!(s.events_accepted, 0);
        assert_eq!(s.lookup_failures, 0);
        assert_eq!(s.units_added, 0);
        assert_eq!(s.units_removed, 0);
    }

    #[test]
    fn test_increments_are_independent() {
        let metrics = AssignmentMetrics::new();
        metrics.record_poll_completed();
        metrics.record_poll_completed();
        metrics.record_unit_added();
        metrics.record_lookup_failure();

        let s = metrics.snapshot();
        assert_eq!(s.polls_completed, 2);
        assert_eq!(s.units_added, 1);
        assert_eq!(s.lookup_failures, 1);
        assert_eq!(s.poll_failures, 0);
    }

    #[test]
    fn test_prometheus_output_contains_all_counters() {
        let metrics = AssignmentMetrics::new();
        metrics.record_event_accepted();

        let out = metrics.to_prometheus();
        assert!(out.contains("sgrid_assignment_events_accepted 1"));
        assert!(out.contains("sgrid_assignment_polls_completed 0"));
        assert!(out.contains("# TYPE sgrid_assignment_units_removed counter"));
    }
}
