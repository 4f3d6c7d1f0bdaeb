//! Invariants for the checker queues.

#![cfg(any(test, debug_assertions))]

use std::collections::HashSet;

use super::*;

impl Inner {
    /// Checks the invariants the queues must maintain. Called from the hot
    /// paths while the monitor is held.
    #[track_caller]
    pub(super) fn check_invariants(&self, state: &Queues) {
        self.check_queue_shape(state);
        self.check_unique_getters(state);
    }

    /// One transient and one persistent queue per priority class, always.
    #[track_caller]
    fn check_queue_shape(&self, state: &Queues) {
        assert_eq!(
            state.transient.len(),
            state.persistent.len(),
            "priority classes out of step"
        );
    }

    /// A getter appears at most once in the persistent queue of a priority.
    #[track_caller]
    fn check_unique_getters(&self, state: &Queues) {
        for (prio, queue) in state.persistent.iter().enumerate() {
            let mut seen = HashSet::new();
            for entry in queue {
                assert!(
                    seen.insert(entry.getter),
                    "getter {} queued twice at priority {prio}",
                    entry.getter
                );
            }
        }
    }
}
