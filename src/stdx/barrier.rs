//! Cyclic barrier whose participants can drop out mid-run.
//!
//! `std::sync::Barrier` has a fixed arity for its whole lifetime, which makes
//! clean shutdown of a barrier-synchronized thread group impossible: a thread
//! that exits leaves everyone else waiting forever. This barrier adds
//! [`arrive_and_drop`](TickBarrier::arrive_and_drop): the caller permanently
//! leaves the group and, if it was the last arrival the group was waiting
//! for, releases the current generation on its way out.
//!
//! # Correctness Invariants
//!
//! - A generation completes exactly when `arrived == participants`.
//! - `arrive_and_drop` never blocks.
//! - Dropping below the current arrival count releases the waiters (the
//!   departed participant counts as "arrived forever").

use std::sync::{Condvar, Mutex};

struct BarrierState {
    participants: usize,
    arrived: usize,
    generation: u64,
}

/// Mutex + condvar cyclic barrier with participant drop-out.
pub struct TickBarrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

impl TickBarrier {
    /// Creates a barrier for `participants` threads.
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "barrier needs at least one participant");
        Self {
            state: Mutex::new(BarrierState {
                participants,
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Blocks until every remaining participant has arrived.
    pub fn arrive_and_wait(&self) {
        let mut s = self.state.lock().expect("barrier mutex poisoned");
        s.arrived += 1;
        if s.arrived >= s.participants {
            s.arrived = 0;
            s.generation = s.generation.wrapping_add(1);
            drop(s);
            self.cv.notify_all();
            return;
        }
        let gen = s.generation;
        while s.generation == gen {
            s = self.cv.wait(s).expect("barrier mutex poisoned");
        }
    }

    /// Permanently removes the caller from the group without waiting.
    ///
    /// If the remaining participants are all already parked at the barrier,
    /// their generation completes immediately.
    pub fn arrive_and_drop(&self) {
        let mut s = self.state.lock().expect("barrier mutex poisoned");
        assert!(s.participants > 0, "barrier drop underflow");
        s.participants -= 1;
        if s.participants > 0 && s.arrived >= s.participants {
            s.arrived = 0;
            s.generation = s.generation.wrapping_add(1);
            drop(s);
            self.cv.notify_all();
        }
    }

    /// Remaining participants. Diagnostic only; racy by nature.
    pub fn participants(&self) -> usize {
        self.state.lock().expect("barrier mutex poisoned").participants
    }
}
