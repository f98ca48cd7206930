use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    /// Actions accepted by the scheduler (each repeating registration counts once).
    pub scheduled: u64,
    /// Action invocations, including every firing of a repeating action.
    pub executed: u64,
    /// Invocations dropped because the handle was disposed first.
    pub skipped: u64,
    /// Actions refused by a torn-down scheduler, or dropped unrun when it
    /// was torn down.
    pub rejected: u64,
}

/// Lock-free counters shared between a scheduler and its workers.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    scheduled: AtomicU64,
    executed: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
