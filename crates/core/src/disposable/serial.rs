use std::fmt;
use std::sync::Mutex;

use super::{lock, Disposable, DisposableRef};

#[derive(Default)]
struct SerialState {
    disposed: bool,
    inner: Option<DisposableRef>,
}

/// Owns at most one inner handle at a time.
///
/// Replacing the inner handle disposes the previous one. Once the serial
/// handle itself is disposed, any newly assigned inner is disposed
/// immediately and never stored.
#[derive(Default)]
pub struct SerialDisposable {
    state: Mutex<SerialState>,
}

impl SerialDisposable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently held inner handle, if any.
    pub fn inner(&self) -> Option<DisposableRef> {
        lock(&self.state).inner.clone()
    }

    /// Replace the inner handle, disposing the old one.
    pub fn set_inner(&self, next: Option<DisposableRef>) {
        let (previous, rejected) = {
            let mut state = lock(&self.state);
            if state.disposed {
                (None, next)
            } else {
                (std::mem::replace(&mut state.inner, next), None)
            }
        };
        // Dispose outside the lock; inner cleanups may touch this handle.
        if let Some(previous) = previous {
            previous.dispose();
        }
        if let Some(rejected) = rejected {
            rejected.dispose();
        }
    }
}

impl Disposable for SerialDisposable {
    fn dispose(&self) {
        let inner = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.inner.take()
        };
        if let Some(inner) = inner {
            inner.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }
}

impl fmt::Debug for SerialDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SerialDisposable")
            .field("disposed", &state.disposed)
            .field("has_inner", &state.inner.is_some())
            .finish()
    }
}
