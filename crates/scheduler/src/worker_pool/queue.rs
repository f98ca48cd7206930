//! FIFO work queue over a rayon thread pool, with suspend/resume.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info};

use cadence_core::config::{QueueKind, WorkerPoolConfig};
use cadence_core::disposable::DisposableRef;
use cadence_core::error::SchedulerError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job waiting for a worker, with the handle to dispose if it never runs.
struct Pending {
    job: Job,
    handle: DisposableRef,
}

#[derive(Default)]
struct QueueState {
    suspended: bool,
    shut_down: bool,
    /// Serial: every job not yet started. Concurrent: only jobs held back
    /// while suspended.
    pending: VecDeque<Pending>,
    /// Serial only: a drain task is live on the pool.
    draining: bool,
}

struct QueueInner {
    kind: QueueKind,
    pool: rayon::ThreadPool,
    state: Mutex<QueueState>,
}

/// Jobs start in submission order. A serial queue runs them one at a time;
/// a concurrent queue hands them to the pool as they arrive.
///
/// Submission never runs a job inline, even when called from a worker.
#[derive(Clone)]
pub(crate) struct WorkQueue {
    inner: Arc<QueueInner>,
}

/// Run a job, containing any panic so one faulty action cannot wedge a
/// serial queue or abort the pool.
fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("scheduled action panicked");
    }
}

impl WorkQueue {
    pub(crate) fn new(config: &WorkerPoolConfig) -> Result<Self, SchedulerError> {
        let threads = config.resolved_threads();
        let name = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{name}-{i}"))
            .build()
            .map_err(|e| SchedulerError::PoolBuild(e.to_string()))?;
        info!(
            kind = ?config.kind,
            threads,
            thread_name = %config.thread_name,
            "worker queue started"
        );
        Ok(Self {
            inner: Arc::new(QueueInner {
                kind: config.kind,
                pool,
                state: Mutex::new(QueueState {
                    suspended: config.start_suspended,
                    ..QueueState::default()
                }),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a job. Returns `false` if the queue has been shut down.
    /// `handle` is handed back by [`WorkQueue::shutdown`] if the job is
    /// dropped before it starts.
    pub(crate) fn submit(&self, job: Job, handle: DisposableRef) -> bool {
        // The lock is held across `spawn_fifo` so a concurrent `resume`
        // cannot interleave its backlog with fresh submissions.
        let mut state = self.state();
        if state.shut_down {
            return false;
        }
        match self.inner.kind {
            QueueKind::Concurrent if !state.suspended => {
                self.inner.pool.spawn_fifo(move || run_job(job));
            }
            QueueKind::Concurrent => state.pending.push_back(Pending { job, handle }),
            QueueKind::Serial => {
                state.pending.push_back(Pending { job, handle });
                self.start_drain(&mut state);
            }
        }
        true
    }

    /// Serial only: make sure exactly one drain task is live.
    fn start_drain(&self, state: &mut QueueState) {
        if state.draining || state.suspended || state.pending.is_empty() {
            return;
        }
        state.draining = true;
        let queue = self.clone();
        self.inner.pool.spawn_fifo(move || queue.drain());
    }

    fn drain(&self) {
        loop {
            let job = {
                let mut state = self.state();
                if state.suspended || state.shut_down {
                    state.draining = false;
                    return;
                }
                match state.pending.pop_front() {
                    Some(pending) => pending.job,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            run_job(job);
        }
    }

    /// Hold back jobs that have not started yet.
    pub(crate) fn suspend(&self) {
        self.state().suspended = true;
    }

    /// Release held-back jobs in submission order.
    pub(crate) fn resume(&self) {
        let mut state = self.state();
        if !state.suspended {
            return;
        }
        state.suspended = false;
        match self.inner.kind {
            QueueKind::Concurrent => {
                for Pending { job, .. } in state.pending.drain(..) {
                    self.inner.pool.spawn_fifo(move || run_job(job));
                }
            }
            QueueKind::Serial => self.start_drain(&mut state),
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.state().suspended
    }

    /// Jobs accepted but not yet handed to a worker.
    pub(crate) fn backlog(&self) -> usize {
        self.state().pending.len()
    }

    /// Refuse further jobs and drop the backlog, returning the handles of
    /// the dropped jobs.
    pub(crate) fn shutdown(&self) -> Vec<DisposableRef> {
        let mut state = self.state();
        state.shut_down = true;
        state.pending.drain(..).map(|p| p.handle).collect()
    }
}
