//! Scheduler that confines work to a designated (UI/main) thread.
//!
//! Calls made on the designated thread run inline before `schedule`
//! returns. Calls from other threads are appended to a pending queue and a
//! single drain request is posted to the thread's [`MainRunLoop`].
//!
//! Ordering: anything enqueued from a background thread before a
//! designated-thread call runs ahead of it, because the inline path drains
//! the pending queue first.

mod run_loop;
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use cadence_core::disposable::{self, Disposable, DisposableRef, SimpleDisposable};
use cadence_core::scheduler::{Action, Scheduler};

use crate::metrics::{MetricsRecorder, SchedulerMetrics};

pub use self::run_loop::{Job, MainRunLoop, ThreadRunLoop};

struct Pending {
    action: Action,
    handle: Arc<SimpleDisposable>,
}

struct Shared {
    run_loop: Arc<dyn MainRunLoop>,
    queue: Mutex<VecDeque<Pending>>,
    /// Set while a drain request is posted but has not started yet.
    drain_posted: AtomicBool,
    /// Set once the run loop refused a post; nothing queued can ever run.
    closed: AtomicBool,
    metrics: MetricsRecorder,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run queued actions until the queue is empty. Only ever called on the
    /// designated thread. Each action is popped under the lock and run
    /// outside it, so actions may schedule more work.
    fn drain(&self) {
        loop {
            let next = self.queue().pop_front();
            let Some(pending) = next else {
                return;
            };
            if pending.handle.is_disposed() {
                self.metrics.record_skipped();
                trace!("main-thread action disposed before it ran");
                continue;
            }
            self.metrics.record_executed();
            (pending.action)();
        }
    }

    /// Reject everything still queued after the run loop went away.
    fn abandon(&self) {
        self.closed.store(true, Ordering::Release);
        let abandoned: Vec<Pending> = self.queue().drain(..).collect();
        for pending in abandoned {
            pending.handle.dispose();
            self.metrics.record_rejected();
        }
    }
}

/// Runs actions on the thread designated by a [`MainRunLoop`].
#[derive(Clone)]
pub struct MainThreadScheduler {
    shared: Arc<Shared>,
}

impl MainThreadScheduler {
    pub fn new(run_loop: Arc<dyn MainRunLoop>) -> Self {
        Self {
            shared: Arc::new(Shared {
                run_loop,
                queue: Mutex::new(VecDeque::new()),
                drain_posted: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                metrics: MetricsRecorder::default(),
            }),
        }
    }

    /// Whether the caller is on the designated thread.
    pub fn is_main_thread(&self) -> bool {
        self.shared.run_loop.is_current()
    }

    /// Number of actions waiting for the designated thread.
    pub fn pending_count(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared.metrics.snapshot()
    }

    /// Post a drain unless one is already waiting to start.
    fn request_drain(&self) {
        if self.shared.drain_posted.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let posted = self.shared.run_loop.post(Box::new(move || {
            // Clear first: anything enqueued after this point either gets
            // picked up by the drain below or posts a fresh request.
            shared.drain_posted.store(false, Ordering::Release);
            shared.drain();
        }));
        if let Err(e) = posted {
            warn!(error = %e, "main run loop refused drain request, dropping queued actions");
            self.shared.abandon();
        }
    }
}

impl Scheduler for MainThreadScheduler {
    fn schedule(&self, action: Action) -> DisposableRef {
        if self.shared.closed.load(Ordering::Acquire) {
            debug!("main-thread scheduler is closed, rejecting action");
            self.shared.metrics.record_rejected();
            return disposable::disposed();
        }
        self.shared.metrics.record_scheduled();

        if self.is_main_thread() {
            self.shared.drain();
            self.shared.metrics.record_executed();
            action();
            return disposable::disposed();
        }

        let handle = Arc::new(SimpleDisposable::new());
        self.shared.queue().push_back(Pending {
            action,
            handle: Arc::clone(&handle),
        });
        self.request_drain();
        // Lost a race with a failed post: the drain that would have picked
        // this up never comes.
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.abandon();
        }
        handle
    }
}

impl std::fmt::Debug for MainThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadScheduler")
            .field("pending", &self.pending_count())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}
