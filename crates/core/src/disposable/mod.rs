//! Cancellation handles.
//!
//! Every scheduling call returns a [`DisposableRef`]. Disposing it prevents
//! work that has not started yet from running; it never interrupts work that
//! is already executing. All handles are idempotent and safe to dispose from
//! any thread.

mod composite;
mod serial;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub use composite::{CompositeDisposable, CompositeKey};
pub use serial::SerialDisposable;

/// A one-way `active -> disposed` transition.
pub trait Disposable: Send + Sync {
    /// Release the resource. Calls after the first are no-ops.
    fn dispose(&self);

    /// Whether [`dispose`](Disposable::dispose) has been called.
    fn is_disposed(&self) -> bool;
}

/// Shared handle type returned by schedulers.
pub type DisposableRef = Arc<dyn Disposable>;

/// A handle that is already disposed.
///
/// Returned for work that completed synchronously or was rejected by a
/// torn-down scheduler.
pub fn disposed() -> DisposableRef {
    let d = SimpleDisposable::new();
    d.dispose();
    Arc::new(d)
}

/// A handle that runs `cleanup` the first time it is disposed.
pub fn from_fn<F>(cleanup: F) -> DisposableRef
where
    F: FnOnce() + Send + 'static,
{
    Arc::new(ActionDisposable::new(cleanup))
}

// ── SimpleDisposable ─────────────────────────────────────────────────

/// Flag-only handle. Schedulers check it right before invoking an action.
#[derive(Debug, Default)]
pub struct SimpleDisposable {
    disposed: AtomicBool,
}

impl SimpleDisposable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Disposable for SimpleDisposable {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

// ── ActionDisposable ─────────────────────────────────────────────────

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// Runs a cleanup closure exactly once, on the first `dispose`.
pub struct ActionDisposable {
    disposed: AtomicBool,
    cleanup: Mutex<Option<Cleanup>>,
}

impl ActionDisposable {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disposed: AtomicBool::new(false),
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }
}

impl Disposable for ActionDisposable {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Take the closure out before calling it so a re-entrant dispose
        // from inside the cleanup does not deadlock.
        let cleanup = match self.cleanup.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ActionDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDisposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ── ScopedDisposable ─────────────────────────────────────────────────

/// Disposes the wrapped handle when dropped.
///
/// ```ignore
/// let _guard = ScopedDisposable::new(scheduler.schedule_fn(|| tick()));
/// // dropped at end of scope -> tick() never runs if still pending
/// ```
pub struct ScopedDisposable {
    inner: DisposableRef,
}

impl ScopedDisposable {
    pub fn new(inner: DisposableRef) -> Self {
        Self { inner }
    }

    /// The wrapped handle.
    pub fn inner(&self) -> &DisposableRef {
        &self.inner
    }
}

impl Disposable for ScopedDisposable {
    fn dispose(&self) {
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl Drop for ScopedDisposable {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Disposal must keep working after an unrelated panic, so poisoning is
/// not treated as an error anywhere in this module.
pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
