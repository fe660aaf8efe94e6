//! Policy-sorted multiset of dispatchable processes.
//!
//! The ready set keeps its elements ordered by the active
//! [`SchedulingPolicy`] comparator at all times: `receive_next` pops the
//! head (the next process to dispatch) and `receive_victim` pops the tail
//! (the least attractive entry, e.g. for swap-out pressure). Insertion order
//! is irrelevant — the comparator plus the PID tiebreak define a total
//! order, so switching a policy away and back reproduces the same order.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::policy::SchedulingPolicy;
use crate::process::Process;

struct ReadyInner {
    /// Sorted ascending under the active policy comparator.
    queue: Vec<Arc<Process>>,
    policy: SchedulingPolicy,
}

/// The scheduler's ready set.
pub struct ReadyQueue {
    inner: Mutex<ReadyInner>,
}

impl ReadyQueue {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            inner: Mutex::new(ReadyInner {
                queue: Vec::new(),
                policy,
            }),
        }
    }

    /// Inserts a process at its comparator-defined position.
    pub fn send(&self, p: Arc<Process>) {
        let mut inner = self.inner.lock().expect("ready queue mutex poisoned");
        let policy = inner.policy;
        let idx = inner
            .queue
            .partition_point(|q| policy.compare(q, &p) != Ordering::Greater);
        inner.queue.insert(idx, p);
    }

    /// Removes and returns the head under the current policy.
    pub fn receive_next(&self) -> Option<Arc<Process>> {
        let mut inner = self.inner.lock().expect("ready queue mutex poisoned");
        if inner.queue.is_empty() {
            None
        } else {
            Some(inner.queue.remove(0))
        }
    }

    /// Removes and returns the tail under the current policy.
    pub fn receive_victim(&self) -> Option<Arc<Process>> {
        self.inner
            .lock()
            .expect("ready queue mutex poisoned")
            .queue
            .pop()
    }

    /// Switches the ordering policy, rebuilding the sorted order in place.
    pub fn set_policy(&self, policy: SchedulingPolicy) {
        let mut inner = self.inner.lock().expect("ready queue mutex poisoned");
        inner.policy = policy;
        inner.queue.sort_by(|a, b| policy.compare(a, b));
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.inner.lock().expect("ready queue mutex poisoned").policy
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("ready queue mutex poisoned")
            .queue
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ready queue mutex poisoned").queue.len()
    }

    /// True if a process with this PID is queued. Diagnostic only.
    pub fn contains(&self, pid: u32) -> bool {
        self.inner
            .lock()
            .expect("ready queue mutex poisoned")
            .queue
            .iter()
            .any(|p| p.id() == pid)
    }

    /// PIDs in dispatch order, for snapshots and tests.
    pub fn order(&self) -> Vec<u32> {
        self.inner
            .lock()
            .expect("ready queue mutex poisoned")
            .queue
            .iter()
            .map(|p| p.id())
            .collect()
    }

    /// Table-style snapshot, head first.
    pub fn snapshot(&self) -> String {
        let inner = self.inner.lock().expect("ready queue mutex poisoned");
        if inner.queue.is_empty() {
            return String::new();
        }
        let mut out = String::from("Name\tPID\tPR\tLA\n----------------------------------------\n");
        const LIMIT: usize = 10;
        for p in inner.queue.iter().take(LIMIT) {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                p.name(),
                p.id(),
                p.priority(),
                p.last_active_tick(),
            ));
        }
        if inner.queue.len() > LIMIT {
            out.push_str(&format!("... ({} more)\n", inner.queue.len() - LIMIT));
        }
        out
    }
}
