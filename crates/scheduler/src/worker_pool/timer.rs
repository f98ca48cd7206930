//! Timer thread arming delayed and repeating work.
//!
//! Each entry has a window `[due, due + leeway]`. On every wake-up the timer
//! fires all entries whose `due` has passed, and it chooses its next wake-up
//! as the latest `due` that still falls inside the earliest-closing window,
//! so entries with overlapping windows fire together.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use cadence_core::disposable::DisposableRef;
use cadence_core::error::SchedulerError;

use super::queue::Job;

/// Repeating intervals shorter than this are rounded up.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest delay, interval or leeway the timer accepts; larger values are
/// clamped so deadline arithmetic stays representable.
pub(crate) const MAX_SPAN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `at + by`, with `by` clamped to [`MAX_SPAN`].
pub(crate) fn later(at: Instant, by: Duration) -> Instant {
    at.checked_add(by.min(MAX_SPAN)).unwrap_or(at)
}

pub(crate) type Tick = Arc<dyn Fn() + Send + Sync + 'static>;

enum Callback {
    Once(Job),
    Repeating { tick: Tick, interval: Duration },
}

struct TimerEntry {
    due: Instant,
    leeway: Duration,
    callback: Callback,
    /// Disposed if the timer shuts down while the entry is still armed.
    handle: DisposableRef,
}

#[derive(Default)]
struct TimerState {
    deadlines: BTreeMap<(Instant, u64), ()>,
    entries: HashMap<u64, TimerEntry>,
    next_id: u64,
    shutdown: bool,
}

impl TimerState {
    fn insert(&mut self, id: u64, entry: TimerEntry) {
        self.deadlines.insert((entry.due, id), ());
        self.entries.insert(id, entry);
    }

    fn remove(&mut self, id: u64) -> Option<TimerEntry> {
        let entry = self.entries.remove(&id)?;
        self.deadlines.remove(&(entry.due, id));
        Some(entry)
    }

    /// Pop every entry due at or before `now`, re-arming repeating ones.
    fn take_due(&mut self, now: Instant) -> Vec<Job> {
        let mut fired: Vec<Job> = Vec::new();
        while let Some((&(due, id), _)) = self.deadlines.first_key_value() {
            if due > now {
                break;
            }
            let Some(entry) = self.remove(id) else {
                continue;
            };
            match entry.callback {
                Callback::Once(job) => fired.push(job),
                Callback::Repeating { tick, interval } => {
                    let next = next_occurrence(due, interval, now);
                    let t = Arc::clone(&tick);
                    fired.push(Box::new(move || t()));
                    self.insert(
                        id,
                        TimerEntry {
                            due: next,
                            leeway: entry.leeway,
                            callback: Callback::Repeating { tick, interval },
                            handle: entry.handle,
                        },
                    );
                }
            }
        }
        fired
    }

    /// When to wake next, coalescing entries whose leeway windows overlap.
    fn next_wake(&self) -> Option<Instant> {
        let window_end = self
            .deadlines
            .keys()
            .filter_map(|&(due, id)| self.entries.get(&id).map(|e| later(due, e.leeway)))
            .min()?;
        self.deadlines
            .keys()
            .map(|&(due, _)| due)
            .take_while(|&due| due <= window_end)
            .last()
    }
}

/// First `due + n * interval` strictly after `now` (n >= 1). Occurrences
/// missed while the timer was behind are skipped, not replayed.
fn next_occurrence(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = later(due, interval);
    if next > now {
        return next;
    }
    let behind = now.duration_since(due).as_nanos();
    let steps = behind / interval.as_nanos().max(1) + 1;
    let offset = interval.as_nanos().saturating_mul(steps);
    later(due, Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX)))
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl TimerShared {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self) {
        let mut state = self.state();
        loop {
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            let fired = state.take_due(now);
            if !fired.is_empty() {
                // Callbacks only hand work to the queue; run them unlocked
                // so cancellation never waits on a submission.
                drop(state);
                for job in fired {
                    job();
                }
                state = self.state();
                continue;
            }
            state = match state.next_wake() {
                Some(at) => {
                    let timeout = at.saturating_duration_since(now);
                    self.wake
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
                None => self
                    .wake
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
    }
}

/// Removes a timer entry. Holds the timer weakly so a handle outliving its
/// scheduler is harmless.
#[derive(Clone)]
pub(crate) struct TimerKey {
    timer: Weak<TimerShared>,
    id: u64,
}

impl TimerKey {
    pub(crate) fn cancel(&self) {
        if let Some(timer) = self.timer.upgrade() {
            if timer.state().remove(self.id).is_some() {
                timer.wake.notify_one();
            }
        }
    }
}

pub(crate) struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn start(name: &str) -> Result<Self, SchedulerError> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let s = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || s.run())
            .map_err(|e| SchedulerError::PoolBuild(format!("timer thread: {e}")))?;
        debug!(name, "timer thread started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn arm(
        &self,
        due: Instant,
        leeway: Duration,
        callback: Callback,
        handle: DisposableRef,
    ) -> TimerKey {
        let mut state = self.shared.state();
        let id = state.next_id;
        state.next_id += 1;
        state.insert(
            id,
            TimerEntry {
                due,
                leeway: leeway.min(MAX_SPAN),
                callback,
                handle,
            },
        );
        drop(state);
        self.shared.wake.notify_one();
        TimerKey {
            timer: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Run `job` once `due` has passed.
    pub(crate) fn arm_once(&self, due: Instant, job: Job, handle: DisposableRef) -> TimerKey {
        self.arm(due, Duration::ZERO, Callback::Once(job), handle)
    }

    /// Call `tick` at `due` and every `interval` thereafter.
    pub(crate) fn arm_repeating(
        &self,
        due: Instant,
        interval: Duration,
        leeway: Duration,
        tick: Tick,
        handle: DisposableRef,
    ) -> TimerKey {
        let interval = interval.clamp(MIN_INTERVAL, MAX_SPAN);
        self.arm(due, leeway, Callback::Repeating { tick, interval }, handle)
    }

    /// Entries currently armed.
    pub(crate) fn armed(&self) -> usize {
        self.shared.state().entries.len()
    }

    /// Stop the thread and drop every armed entry, returning the handles of
    /// the dropped entries. Idempotent; later calls return nothing.
    pub(crate) fn shutdown(&self) -> Vec<DisposableRef> {
        let dropped: Vec<DisposableRef> = {
            let mut state = self.shared.state();
            if state.shutdown {
                return Vec::new();
            }
            state.shutdown = true;
            state.deadlines.clear();
            state.entries.drain().map(|(_, entry)| entry.handle).collect()
        };
        self.shared.wake.notify_all();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            // Never join ourselves.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!(armed = dropped.len(), "timer thread stopped");
        dropped
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        for handle in self.shutdown() {
            handle.dispose();
        }
    }
}
