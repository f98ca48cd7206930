//! Synchronous scheduler.

use cadence_core::disposable::{self, DisposableRef};
use cadence_core::scheduler::{Action, Scheduler};

/// Runs every action on the calling thread before `schedule` returns.
///
/// Only the [`Scheduler`] capability is provided: there is no way to defer
/// work without blocking the caller, so delayed and repeating scheduling
/// are deliberately absent. The returned handle is already disposed since
/// the work has completed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, action: Action) -> DisposableRef {
        action();
        disposable::disposed()
    }
}
