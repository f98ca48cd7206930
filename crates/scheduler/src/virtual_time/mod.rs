//! Deterministic virtual-time scheduler for tests.
//!
//! The clock only moves when a caller advances it. Every due action runs
//! synchronously on the thread that calls [`VirtualTimeScheduler::advance_by`],
//! [`advance_to`](VirtualTimeScheduler::advance_to),
//! [`advance`](VirtualTimeScheduler::advance) or [`run`](VirtualTimeScheduler::run);
//! there is no background thread.
//!
//! The ledger sits behind a mutex only so actions (which must be `Send`)
//! can capture an `Arc` of the scheduler and enqueue more work. The lock is
//! never held while an action runs. Driving one scheduler from several
//! threads at once is not supported.

mod ledger;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use cadence_core::config::VirtualTimeConfig;
use cadence_core::disposable::{Disposable, DisposableRef, SimpleDisposable};
use cadence_core::scheduler::{offset, Action, DateScheduler, RepeatingAction, Scheduler};

use crate::metrics::{MetricsRecorder, SchedulerMetrics};

use self::ledger::{Due, Entry, Ledger, Work};

/// The clock value [`VirtualTimeScheduler::run`] leaves behind.
pub const DISTANT_FUTURE: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

struct Clock {
    now: DateTime<Utc>,
    ledger: Ledger,
}

/// Why a drain loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    Idle,
    StepLimit,
}

/// Single-threaded scheduler with a simulated clock.
pub struct VirtualTimeScheduler {
    clock: Mutex<Clock>,
    run_step_limit: usize,
    metrics: MetricsRecorder,
}

impl VirtualTimeScheduler {
    /// Scheduler starting at the Unix epoch.
    pub fn new() -> Self {
        Self::with_config(&VirtualTimeConfig::default())
    }

    /// Scheduler starting at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::with_config(&VirtualTimeConfig {
            start,
            ..VirtualTimeConfig::default()
        })
    }

    pub fn with_config(config: &VirtualTimeConfig) -> Self {
        Self {
            clock: Mutex::new(Clock {
                now: config.start,
                ledger: Ledger::new(),
            }),
            run_step_limit: config.run_step_limit.max(1),
            metrics: MetricsRecorder::default(),
        }
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current virtual time.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.clock().now
    }

    /// Number of pending actions that have not been disposed.
    pub fn pending_count(&self) -> usize {
        self.clock().ledger.live_len()
    }

    /// Due time of the next pending action.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.clock().ledger.next_due()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.snapshot()
    }

    fn enqueue(&self, due: DateTime<Utc>, work: Work) -> DisposableRef {
        let handle = Arc::new(SimpleDisposable::new());
        let mut clock = self.clock();
        // Never schedule into the past; the clock is monotonic.
        let due = due.max(clock.now);
        let seq = clock.ledger.insert(
            due,
            Entry {
                work,
                handle: Arc::clone(&handle),
            },
        );
        drop(clock);
        self.metrics.record_scheduled();
        trace!(seq, due = %due, "virtual action enqueued");
        handle
    }

    /// Pop the next live action due at or before `limit`, moving the clock
    /// to its due time.
    fn take_due(&self, limit: DateTime<Utc>) -> Option<Due> {
        let mut clock = self.clock();
        let (due, skipped) = clock.ledger.pop_due(limit);
        if let Some(due) = &due {
            clock.now = clock.now.max(due.due);
        }
        drop(clock);
        for _ in 0..skipped {
            self.metrics.record_skipped();
        }
        due
    }

    /// Run one popped action. Repeating work is re-enqueued afterwards
    /// unless it disposed itself during the call.
    fn fire(&self, due: Due) {
        let Due { due, entry } = due;
        match entry.work {
            Work::Once(action) => {
                self.metrics.record_executed();
                action();
            }
            Work::Repeating {
                mut action,
                interval,
            } => {
                self.metrics.record_executed();
                action();
                if entry.handle.is_disposed() {
                    debug!(due = %due, "repeating action disposed itself");
                    return;
                }
                let next = offset(due, interval);
                if next <= due {
                    // Saturated at the end of representable time.
                    entry.handle.dispose();
                    return;
                }
                self.clock().ledger.insert(
                    next,
                    Entry {
                        work: Work::Repeating { action, interval },
                        handle: entry.handle,
                    },
                );
            }
        }
    }

    /// Run every action due at or before `limit`, in `(due, sequence)` order.
    fn drain_until(&self, limit: DateTime<Utc>) -> Drained {
        let mut steps = 0usize;
        loop {
            if steps >= self.run_step_limit {
                warn!(
                    limit = self.run_step_limit,
                    now = %self.current_time(),
                    "virtual time step limit reached, stopping"
                );
                return Drained::StepLimit;
            }
            match self.take_due(limit) {
                Some(due) => {
                    steps += 1;
                    self.fire(due);
                }
                None => return Drained::Idle,
            }
        }
    }

    fn settle(&self, target: DateTime<Utc>) {
        let mut clock = self.clock();
        clock.now = clock.now.max(target);
    }

    /// Move to the next pending action's due time and run that one action.
    ///
    /// No-op when nothing is pending.
    pub fn advance(&self) {
        if let Some(due) = self.take_due(DISTANT_FUTURE) {
            self.fire(due);
        }
    }

    /// Advance the clock by `interval`, running every action that comes due.
    ///
    /// Each action observes the clock at its own due time; afterwards the
    /// clock settles at `start + interval`.
    pub fn advance_by(&self, interval: Duration) {
        let target = offset(self.current_time(), interval);
        self.advance_to(target);
    }

    /// Advance the clock to `date`, running every action due at or before it.
    ///
    /// A `date` in the past does not move the clock backwards, but still
    /// runs anything due at the current time.
    pub fn advance_to(&self, date: DateTime<Utc>) {
        let target = date.max(self.current_time());
        if self.drain_until(target) == Drained::Idle {
            self.settle(target);
        }
    }

    /// Run everything pending, including work enqueued along the way, and
    /// leave the clock at [`DISTANT_FUTURE`].
    ///
    /// Repeating registrations keep firing, interleaved with other work in
    /// due order, as long as their next occurrence falls at or before the
    /// latest pending one-shot action. Past that point they are retired
    /// (their handles report disposed): with no one-shot work left, every
    /// further occurrence would run forever.
    pub fn run(&self) {
        let mut steps = 0usize;
        loop {
            if steps >= self.run_step_limit {
                warn!(
                    limit = self.run_step_limit,
                    now = %self.current_time(),
                    "virtual time step limit reached during run, stopping"
                );
                return;
            }
            let Some(Due { due, entry }) = self.take_due(DISTANT_FUTURE) else {
                break;
            };
            steps += 1;
            self.metrics.record_executed();
            match entry.work {
                Work::Once(action) => action(),
                Work::Repeating {
                    mut action,
                    interval,
                } => {
                    action();
                    if entry.handle.is_disposed() {
                        continue;
                    }
                    let next = offset(due, interval);
                    let mut clock = self.clock();
                    let horizon = clock.ledger.last_once_due();
                    if next > due && horizon.is_some_and(|last| next <= last) {
                        clock.ledger.insert(
                            next,
                            Entry {
                                work: Work::Repeating { action, interval },
                                handle: entry.handle,
                            },
                        );
                    } else {
                        drop(clock);
                        trace!(due = %due, "retiring repeating action at end of run");
                        entry.handle.dispose();
                    }
                }
            }
        }
        self.settle(DISTANT_FUTURE);
    }
}

impl Default for VirtualTimeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualTimeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clock = self.clock();
        f.debug_struct("VirtualTimeScheduler")
            .field("now", &clock.now)
            .field("pending", &clock.ledger.live_len())
            .finish()
    }
}

impl Scheduler for VirtualTimeScheduler {
    /// Enqueue at the current virtual time. Nothing runs until the clock is
    /// advanced or [`run`](VirtualTimeScheduler::run) is called.
    fn schedule(&self, action: Action) -> DisposableRef {
        let now = self.current_time();
        self.enqueue(now, Work::Once(action))
    }
}

impl DateScheduler for VirtualTimeScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.current_time()
    }

    fn schedule_after(&self, date: DateTime<Utc>, action: Action) -> DisposableRef {
        self.enqueue(date, Work::Once(action))
    }

    /// Leeway is irrelevant in virtual time: firings land exactly on
    /// `date + n * interval`. A zero interval is treated as one nanosecond
    /// so the registration always makes progress.
    fn schedule_repeating(
        &self,
        date: DateTime<Utc>,
        interval: Duration,
        _leeway: Duration,
        action: RepeatingAction,
    ) -> DisposableRef {
        let interval = interval.max(Duration::from_nanos(1));
        self.enqueue(date, Work::Repeating { action, interval })
    }
}
