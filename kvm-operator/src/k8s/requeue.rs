//! Bookkeeping of delayed passes.
//!
//! Each cluster has at most one delayed pass pending: its earliest deadline. Timers are never
//! cancelled; a timer whose deadline is no longer the pending one is simply dropped when it fires.

#[cfg(test)]
#[path = "requeue_test.rs"]
mod requeue_test;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
pub(super) struct Requeues {
    pending: HashMap<Arc<String>, Instant>,
}

impl Requeues {
    /// Record a delayed pass of the named cluster due at the given deadline.
    ///
    /// Returns true if a timer must be started for this deadline, which is the case unless a pass
    /// at the same time or earlier is already pending.
    pub fn schedule(&mut self, name: &Arc<String>, deadline: Instant) -> bool {
        match self.pending.get(name) {
            Some(pending) if *pending <= deadline => false,
            _ => {
                self.pending.insert(name.clone(), deadline);
                true
            }
        }
    }

    /// Take the pending pass of the named cluster for a timer which fired at the given deadline.
    ///
    /// Returns false for stale timers, which were superseded by an earlier deadline.
    pub fn fire(&mut self, name: &Arc<String>, deadline: Instant) -> bool {
        match self.pending.get(name) {
            Some(pending) if *pending == deadline => {
                self.pending.remove(name);
                true
            }
            _ => false,
        }
    }
}
