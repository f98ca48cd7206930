//! The designated-thread abstraction the main-thread scheduler posts to.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use cadence_core::error::SchedulerError;

/// Work posted to a run loop.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A host event loop bound to one designated thread.
///
/// GUI hosts implement this over their platform main loop. Headless hosts
/// and tests can use [`ThreadRunLoop`].
pub trait MainRunLoop: Send + Sync {
    /// Whether the calling thread is the designated thread. Callable from
    /// any thread.
    fn is_current(&self) -> bool;

    /// Queue `job` to run later on the designated thread, in FIFO order.
    fn post(&self, job: Job) -> Result<(), SchedulerError>;
}

enum Message {
    Run(Job),
    Stop,
}

/// Channel-backed run loop owned by the thread that created it.
///
/// The owner drives it with [`run_pending`](ThreadRunLoop::run_pending)
/// (non-blocking) or [`run_until_stopped`](ThreadRunLoop::run_until_stopped).
pub struct ThreadRunLoop {
    owner: ThreadId,
    sender: Mutex<Option<Sender<Message>>>,
    receiver: Mutex<Receiver<Message>>,
}

impl ThreadRunLoop {
    /// Create a run loop whose designated thread is the caller.
    pub fn for_current_thread() -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        Arc::new(Self {
            owner: thread::current().id(),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(rx),
        })
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn send(&self, message: Message) -> Result<(), SchedulerError> {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| SchedulerError::RunLoopClosed),
            None => Err(SchedulerError::RunLoopClosed),
        }
    }

    fn next(&self, block: bool) -> Option<Message> {
        let receiver = lock(&self.receiver);
        if block {
            receiver.recv().ok()
        } else {
            match receiver.try_recv() {
                Ok(message) => Some(message),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
            }
        }
    }

    fn guard_owner(&self, op: &str) -> bool {
        if self.is_current() {
            return true;
        }
        warn!(op, "run loop driven from a thread other than its owner, ignoring");
        false
    }

    /// Run every job queued so far without blocking. Returns the number of
    /// jobs run. A pending stop request ends the batch early.
    pub fn run_pending(&self) -> usize {
        if !self.guard_owner("run_pending") {
            return 0;
        }
        let mut ran = 0;
        // The receiver lock is released before each job so jobs may post
        // more work or drive the loop re-entrantly.
        while let Some(message) = self.next(false) {
            match message {
                Message::Run(job) => {
                    job();
                    ran += 1;
                }
                Message::Stop => break,
            }
        }
        ran
    }

    /// Block running jobs until [`stop`](ThreadRunLoop::stop) is requested
    /// or the loop is closed and drained.
    pub fn run_until_stopped(&self) {
        if !self.guard_owner("run_until_stopped") {
            return;
        }
        debug!("run loop started");
        while let Some(message) = self.next(true) {
            match message {
                Message::Run(job) => job(),
                Message::Stop => break,
            }
        }
        debug!("run loop stopped");
    }

    /// Ask a blocking [`run_until_stopped`](ThreadRunLoop::run_until_stopped)
    /// to return once the jobs queued ahead of the request have run.
    pub fn stop(&self) {
        if self.send(Message::Stop).is_err() {
            debug!("stop requested on closed run loop");
        }
    }

    /// Refuse further posts. Jobs already queued can still be run.
    pub fn close(&self) {
        lock(&self.sender).take();
    }
}

impl MainRunLoop for ThreadRunLoop {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post(&self, job: Job) -> Result<(), SchedulerError> {
        self.send(Message::Run(job))
    }
}

impl std::fmt::Debug for ThreadRunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRunLoop")
            .field("owner", &self.owner)
            .field("closed", &lock(&self.sender).is_none())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
