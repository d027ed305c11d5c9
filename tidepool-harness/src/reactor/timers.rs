//! Timer bookkeeping for the reactor.

use std::collections::HashMap;
use std::fmt;

use tokio::task::AbortHandle;

/// Identifier of a timer scheduled on a [`Reactor`](super::Reactor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Pending timers keyed by id.
///
/// A timer is pending while its entry exists. Firing and cancelling both
/// remove the entry, so whichever happens first wins and the other is a
/// no-op.
#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    next_id: u64,
    pending: HashMap<TimerId, AbortHandle>,
}

impl TimerRegistry {
    pub(crate) fn allocate(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: TimerId, handle: AbortHandle) {
        self.pending.insert(id, handle);
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Claim a one-shot timer for firing. Returns `false` if it was cancelled.
    pub(crate) fn take_fired(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.pending.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Forget every timer. Their tasks are dropped with the pass.
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
