//! Scheduler capability traits.
//!
//! [`Scheduler`] and [`DateScheduler`] take boxed closures so they stay
//! object-safe: an `Arc<dyn DateScheduler>` can be handed to any component
//! and swapped for a virtual-time scheduler in tests. The `*Ext` traits add
//! generic helpers on top.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::disposable::DisposableRef;

/// Work item run at most once.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Work item run on every firing of a repeating schedule.
pub type RepeatingAction = Box<dyn FnMut() + Send + 'static>;

/// Runs work "as soon as possible" under some execution policy.
pub trait Scheduler {
    /// Enqueue `action`. Disposing the returned handle before the scheduler
    /// reaches the action prevents it from running.
    fn schedule(&self, action: Action) -> DisposableRef;
}

/// A scheduler that also understands time.
pub trait DateScheduler: Scheduler {
    /// The scheduler's notion of the current date.
    fn now(&self) -> DateTime<Utc>;

    /// Run `action` no earlier than `date`. Past dates run as soon as possible.
    fn schedule_after(&self, date: DateTime<Utc>, action: Action) -> DisposableRef;

    /// Fire `action` at `date`, then every `interval` after that.
    ///
    /// `leeway` is the slack the scheduler may add to coalesce firings.
    /// Disposing the handle stops all future firings; a firing that is
    /// already executing is allowed to finish.
    fn schedule_repeating(
        &self,
        date: DateTime<Utc>,
        interval: Duration,
        leeway: Duration,
        action: RepeatingAction,
    ) -> DisposableRef;
}

/// Closure-friendly helpers for any [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    fn schedule_fn<F>(&self, action: F) -> DisposableRef
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Box::new(action))
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

/// Closure-friendly helpers for any [`DateScheduler`].
pub trait DateSchedulerExt: DateScheduler {
    fn schedule_after_fn<F>(&self, date: DateTime<Utc>, action: F) -> DisposableRef
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_after(date, Box::new(action))
    }

    /// Run `action` once `delay` has elapsed from [`now`](DateScheduler::now).
    fn schedule_after_interval<F>(&self, delay: Duration, action: F) -> DisposableRef
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_after(offset(self.now(), delay), Box::new(action))
    }

    fn schedule_repeating_fn<F>(
        &self,
        date: DateTime<Utc>,
        interval: Duration,
        leeway: Duration,
        action: F,
    ) -> DisposableRef
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_repeating(date, interval, leeway, Box::new(action))
    }
}

impl<S: DateScheduler + ?Sized> DateSchedulerExt for S {}

/// `date + delay`, saturating at the largest representable date.
pub fn offset(date: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| date.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
