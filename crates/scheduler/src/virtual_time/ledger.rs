//! Ordered store of pending virtual-time work.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cadence_core::disposable::{Disposable, SimpleDisposable};
use cadence_core::scheduler::{Action, RepeatingAction};

pub(super) enum Work {
    Once(Action),
    Repeating {
        action: RepeatingAction,
        interval: Duration,
    },
}

pub(super) struct Entry {
    pub(super) work: Work,
    pub(super) handle: Arc<SimpleDisposable>,
}

/// Result of [`Ledger::pop_due`].
pub(super) struct Due {
    pub(super) due: DateTime<Utc>,
    pub(super) entry: Entry,
}

/// Pending work keyed by `(due, sequence)`.
///
/// The sequence number is assigned at insertion and strictly increases, so
/// entries sharing a due time come out in submission order.
pub(super) struct Ledger {
    entries: BTreeMap<(DateTime<Utc>, u64), Entry>,
    next_seq: u64,
}

impl Ledger {
    pub(super) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(super) fn insert(&mut self, due: DateTime<Utc>, entry: Entry) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((due, seq), entry);
        seq
    }

    /// Remove and return the earliest live entry due at or before `limit`.
    ///
    /// Disposed entries encountered on the way are dropped; their count is
    /// returned alongside so the caller can record them.
    pub(super) fn pop_due(&mut self, limit: DateTime<Utc>) -> (Option<Due>, u64) {
        let mut skipped = 0;
        while let Some((&(due, seq), entry)) = self.entries.first_key_value() {
            if entry.handle.is_disposed() {
                self.entries.remove(&(due, seq));
                skipped += 1;
                continue;
            }
            if due > limit {
                break;
            }
            return match self.entries.remove(&(due, seq)) {
                Some(entry) => (Some(Due { due, entry }), skipped),
                None => (None, skipped),
            };
        }
        (None, skipped)
    }

    /// Due time of the earliest live entry.
    pub(super) fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|(_, entry)| !entry.handle.is_disposed())
            .map(|(&(due, _), _)| due)
    }

    /// Due time of the latest live one-shot entry.
    pub(super) fn last_once_due(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .rev()
            .find(|(_, entry)| {
                matches!(entry.work, Work::Once(_)) && !entry.handle.is_disposed()
            })
            .map(|(&(due, _), _)| due)
    }

    /// Number of live entries.
    pub(super) fn live_len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.handle.is_disposed())
            .count()
    }
}
