use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use super::{lock, Disposable, DisposableRef};

/// Token returned by [`CompositeDisposable::add`], used to detach a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(u64);

#[derive(Default)]
struct CompositeState {
    disposed: bool,
    next_key: u64,
    // Ordered so members are disposed in insertion order.
    members: BTreeMap<u64, DisposableRef>,
}

/// A set of handles disposed together.
#[derive(Default)]
pub struct CompositeDisposable {
    state: Mutex<CompositeState>,
}

impl CompositeDisposable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member.
    ///
    /// Returns `None` when the composite is already disposed; the member is
    /// disposed immediately in that case.
    pub fn add(&self, member: DisposableRef) -> Option<CompositeKey> {
        let mut state = lock(&self.state);
        if !state.disposed {
            let key = state.next_key;
            state.next_key += 1;
            state.members.insert(key, member);
            return Some(CompositeKey(key));
        }
        drop(state);
        member.dispose();
        None
    }

    /// Detach a member without disposing it.
    pub fn remove(&self, key: CompositeKey) -> Option<DisposableRef> {
        lock(&self.state).members.remove(&key.0)
    }

    /// Number of members currently held.
    pub fn len(&self) -> usize {
        lock(&self.state).members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Disposable for CompositeDisposable {
    fn dispose(&self) {
        let members = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.members)
        };
        for member in members.into_values() {
            member.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }
}

impl fmt::Debug for CompositeDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CompositeDisposable")
            .field("disposed", &state.disposed)
            .field("members", &state.members.len())
            .finish()
    }
}
