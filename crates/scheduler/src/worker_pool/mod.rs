//! Real-time scheduler backed by a rayon worker pool.
//!
//! Immediate work goes straight to a [`WorkQueue`](queue::WorkQueue).
//! Delayed and repeating work is armed on a dedicated timer thread, which
//! hands each firing to the same queue when it comes due. Suspending the
//! queue holds every firing back until [`WorkerPoolScheduler::resume`].

mod queue;
#[cfg(test)]
mod tests;
mod timer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use cadence_core::config::{QueueKind, WorkerPoolConfig};
use cadence_core::disposable::{self, Disposable, DisposableRef, SimpleDisposable};
use cadence_core::error::SchedulerError;
use cadence_core::scheduler::{offset, Action, DateScheduler, RepeatingAction, Scheduler};

use crate::metrics::{MetricsRecorder, SchedulerMetrics};

use self::queue::WorkQueue;
use self::timer::{later, Tick, Timer, TimerKey};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pairs one wall-clock reading with one monotonic reading, taken together
/// when the scheduler is built. Every date maps through the same pair, so
/// equal dates always yield equal deadlines.
struct ClockAnchor {
    instant: Instant,
    date: DateTime<Utc>,
}

impl ClockAnchor {
    fn capture() -> Self {
        Self {
            instant: Instant::now(),
            date: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        offset(self.date, self.instant.elapsed())
    }

    /// Monotonic deadline for `date`. Dates before the anchor map to the
    /// anchor itself, which has always passed.
    fn deadline_for(&self, date: DateTime<Utc>) -> Instant {
        let ahead = (date - self.date).to_std().unwrap_or(Duration::ZERO);
        later(self.instant, ahead)
    }
}

// ── Handles ──────────────────────────────────────────────────────────

/// Handle for timer-backed work: disposing it flips the flag and disarms
/// the timer entry.
#[derive(Default)]
struct TimedHandle {
    disposed: AtomicBool,
    timer: Mutex<Option<TimerKey>>,
}

impl TimedHandle {
    /// Bind the armed timer entry. A handle disposed in the meantime
    /// disarms it on the spot.
    fn attach(&self, key: TimerKey) {
        let mut slot = lock(&self.timer);
        if self.is_disposed() {
            drop(slot);
            key.cancel();
            return;
        }
        *slot = Some(key);
    }
}

impl Disposable for TimedHandle {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let key = lock(&self.timer).take();
        if let Some(key) = key {
            key.cancel();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Shared state of one repeating registration.
struct Recurrence {
    handle: Arc<TimedHandle>,
    action: Mutex<RepeatingAction>,
    /// A firing is waiting in the queue. Ticks arriving meanwhile are
    /// dropped so a busy or suspended queue does not pile up firings.
    queued: AtomicBool,
}

impl Recurrence {
    fn fire(&self, metrics: &MetricsRecorder) {
        self.queued.store(false, Ordering::Release);
        if self.handle.is_disposed() {
            metrics.record_skipped();
            return;
        }
        let mut action = lock(&self.action);
        // Disposal may have landed while we waited for a previous firing.
        if self.handle.is_disposed() {
            metrics.record_skipped();
            return;
        }
        metrics.record_executed();
        (*action)();
    }
}

// ── Scheduler ────────────────────────────────────────────────────────

struct Inner {
    queue: WorkQueue,
    timer: Timer,
    anchor: ClockAnchor,
    metrics: Arc<MetricsRecorder>,
    kind: QueueKind,
    shut_down: AtomicBool,
}

impl Inner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // Timer first: once its thread is joined nothing new reaches the queue.
        let mut dropped = self.timer.shutdown();
        dropped.extend(self.queue.shutdown());
        // A repeating registration can be both armed and queued.
        let mut rejected = 0u64;
        for handle in dropped {
            if !handle.is_disposed() {
                handle.dispose();
                self.metrics.record_rejected();
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!(rejected, "worker pool scheduler shut down with pending work");
        } else {
            info!("worker pool scheduler shut down");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs actions asynchronously on a pool of worker threads.
///
/// Clones share the same pool. The pool shuts down when
/// [`shutdown`](WorkerPoolScheduler::shutdown) is called or the last
/// clone is dropped; later scheduling calls return an already-disposed
/// handle and count as rejected.
#[derive(Clone)]
pub struct WorkerPoolScheduler {
    inner: Arc<Inner>,
}

impl WorkerPoolScheduler {
    pub fn new(config: &WorkerPoolConfig) -> Result<Self, SchedulerError> {
        let queue = WorkQueue::new(config)?;
        let timer = Timer::start(&config.thread_name)?;
        Ok(Self {
            inner: Arc::new(Inner {
                queue,
                timer,
                anchor: ClockAnchor::capture(),
                metrics: Arc::new(MetricsRecorder::default()),
                kind: config.kind,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// One worker, strict FIFO, no overlap.
    pub fn serial() -> Result<Self, SchedulerError> {
        Self::new(&WorkerPoolConfig::serial())
    }

    /// `threads` workers (0 = available parallelism).
    pub fn concurrent(threads: usize) -> Result<Self, SchedulerError> {
        Self::new(&WorkerPoolConfig::concurrent(threads))
    }

    pub fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    /// Hold back every action that has not started yet.
    pub fn suspend(&self) {
        debug!("worker pool suspended");
        self.inner.queue.suspend();
    }

    /// Release held-back actions in submission order.
    pub fn resume(&self) {
        debug!(backlog = self.inner.queue.backlog(), "worker pool resumed");
        self.inner.queue.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.queue.is_suspended()
    }

    /// Actions accepted but not yet handed to a worker.
    pub fn backlog(&self) -> usize {
        self.inner.queue.backlog()
    }

    /// Delayed or repeating registrations still armed on the timer.
    pub fn armed_timers(&self) -> usize {
        self.inner.timer.armed()
    }

    /// Stop the timer thread, drop queued work and refuse new work.
    /// Actions already running are allowed to finish. Handles of dropped
    /// work are disposed and the work counts as rejected. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics.snapshot()
    }

    fn reject(&self) -> DisposableRef {
        debug!("worker pool scheduler is shut down, rejecting action");
        self.inner.metrics.record_rejected();
        disposable::disposed()
    }

    /// Queue job that runs `action` unless `handle` was disposed first.
    fn gated(&self, handle: Arc<dyn Disposable>, action: Action) -> queue::Job {
        let metrics = Arc::clone(&self.inner.metrics);
        Box::new(move || {
            if handle.is_disposed() {
                metrics.record_skipped();
                trace!("pooled action disposed before it ran");
                return;
            }
            metrics.record_executed();
            action();
        })
    }
}

impl std::fmt::Debug for WorkerPoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolScheduler")
            .field("kind", &self.inner.kind)
            .field("suspended", &self.is_suspended())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Scheduler for WorkerPoolScheduler {
    /// Submit for asynchronous execution. Never runs inline, even when
    /// called from one of the pool's own workers.
    fn schedule(&self, action: Action) -> DisposableRef {
        if self.is_shut_down() {
            return self.reject();
        }
        let handle = Arc::new(SimpleDisposable::new());
        let job = self.gated(handle.clone(), action);
        if !self.inner.queue.submit(job, handle.clone()) {
            return self.reject();
        }
        self.inner.metrics.record_scheduled();
        handle
    }
}

impl DateScheduler for WorkerPoolScheduler {
    /// Wall-clock time advanced by the monotonic clock since construction.
    fn now(&self) -> DateTime<Utc> {
        self.inner.anchor.now()
    }

    /// Past dates are armed like any other so actions for equal dates keep
    /// their submission order; they fire on the timer's next wake-up.
    fn schedule_after(&self, date: DateTime<Utc>, action: Action) -> DisposableRef {
        if self.is_shut_down() {
            return self.reject();
        }
        let handle = Arc::new(TimedHandle::default());
        let job = self.gated(handle.clone(), action);
        let queue = self.inner.queue.clone();
        let queued: DisposableRef = handle.clone();
        let key = self.inner.timer.arm_once(
            self.inner.anchor.deadline_for(date),
            Box::new(move || {
                queue.submit(job, queued);
            }),
            handle.clone(),
        );
        handle.attach(key);
        self.inner.metrics.record_scheduled();
        handle
    }

    /// Firings that fall behind (busy or suspended queue) are coalesced:
    /// at most one firing per registration waits in the queue at a time,
    /// and missed timer slots are skipped rather than replayed.
    fn schedule_repeating(
        &self,
        date: DateTime<Utc>,
        interval: Duration,
        leeway: Duration,
        action: RepeatingAction,
    ) -> DisposableRef {
        if self.is_shut_down() {
            return self.reject();
        }
        let handle = Arc::new(TimedHandle::default());
        let recurrence = Arc::new(Recurrence {
            handle: Arc::clone(&handle),
            action: Mutex::new(action),
            queued: AtomicBool::new(false),
        });
        let queue = self.inner.queue.clone();
        let metrics = Arc::clone(&self.inner.metrics);
        let tick: Tick = Arc::new(move || {
            if recurrence.handle.is_disposed() || recurrence.queued.swap(true, Ordering::AcqRel) {
                return;
            }
            let (r, m) = (Arc::clone(&recurrence), Arc::clone(&metrics));
            if !queue.submit(Box::new(move || r.fire(&m)), recurrence.handle.clone()) {
                recurrence.queued.store(false, Ordering::Release);
            }
        });
        let key = self.inner.timer.arm_repeating(
            self.inner.anchor.deadline_for(date),
            interval,
            leeway,
            tick,
            handle.clone(),
        );
        handle.attach(key);
        self.inner.metrics.record_scheduled();
        debug!(?interval, ?leeway, "repeating action armed");
        handle
    }
}
