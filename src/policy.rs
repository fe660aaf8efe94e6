//! Scheduling policies and the ready-set comparator.
//!
//! A policy is a plain sum type and ordering is a single pure function of
//! `(a, b, policy)`. Ties always break by PID ascending so the ready-set
//! order is a total order and snapshots are reproducible.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::process::Process;

/// Ordering policy for the ready set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// First come, first served: by last-active tick ascending, no preemption.
    Fcfs,
    /// Round robin: same ordering as FCFS plus quantum-based preemption.
    Rr,
    /// Highest priority first, no preemption.
    Priority,
}

impl SchedulingPolicy {
    /// Whether this policy forcibly preempts running processes.
    #[inline]
    pub fn preempts(self) -> bool {
        matches!(self, SchedulingPolicy::Rr)
    }

    /// Total order over processes under this policy.
    ///
    /// `Less` means `a` is dispatched before `b`.
    pub fn compare(self, a: &Arc<Process>, b: &Arc<Process>) -> Ordering {
        let primary = match self {
            // Earlier last-active tick first: a process that has waited longer
            // since it last held a CPU goes to the head.
            SchedulingPolicy::Fcfs | SchedulingPolicy::Rr => {
                a.last_active_tick().cmp(&b.last_active_tick())
            }
            // Higher priority first.
            SchedulingPolicy::Priority => b.priority().cmp(&a.priority()),
        };
        primary.then_with(|| a.id().cmp(&b.id()))
    }

    /// Lowercase token used in configs and snapshots.
    pub fn token(self) -> &'static str {
        match self {
            SchedulingPolicy::Fcfs => "fcfs",
            SchedulingPolicy::Rr => "rr",
            SchedulingPolicy::Priority => "priority",
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn proc_with(id: u32, priority: u32, last_active: u64) -> Arc<Process> {
        let p = Arc::new(Process::with_priority(
            id,
            format!("p{id}"),
            vec![Instruction::Print(None)],
            priority,
        ));
        p.set_last_active_tick(last_active);
        p
    }

    #[test]
    fn fcfs_orders_by_last_active() {
        let a = proc_with(1, 0, 10);
        let b = proc_with(2, 0, 5);
        assert_eq!(SchedulingPolicy::Fcfs.compare(&b, &a), Ordering::Less);
        assert_eq!(SchedulingPolicy::Fcfs.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn rr_matches_fcfs_ordering() {
        let a = proc_with(1, 0, 3);
        let b = proc_with(2, 0, 7);
        assert_eq!(
            SchedulingPolicy::Rr.compare(&a, &b),
            SchedulingPolicy::Fcfs.compare(&a, &b)
        );
    }

    #[test]
    fn priority_orders_descending() {
        let low = proc_with(1, 1, 0);
        let high = proc_with(2, 9, 0);
        assert_eq!(SchedulingPolicy::Priority.compare(&high, &low), Ordering::Less);
    }

    #[test]
    fn ties_break_by_pid() {
        let a = proc_with(1, 4, 42);
        let b = proc_with(2, 4, 42);
        for policy in [
            SchedulingPolicy::Fcfs,
            SchedulingPolicy::Rr,
            SchedulingPolicy::Priority,
        ] {
            assert_eq!(policy.compare(&a, &b), Ordering::Less, "{policy}");
            assert_eq!(policy.compare(&b, &a), Ordering::Greater, "{policy}");
        }
    }

    #[test]
    fn preemption_flag() {
        assert!(SchedulingPolicy::Rr.preempts());
        assert!(!SchedulingPolicy::Fcfs.preempts());
        assert!(!SchedulingPolicy::Priority.preempts());
    }

    #[test]
    fn serde_tokens() {
        let p: SchedulingPolicy = serde_json::from_str("\"priority\"").unwrap();
        assert_eq!(p, SchedulingPolicy::Priority);
        assert_eq!(serde_json::to_string(&SchedulingPolicy::Fcfs).unwrap(), "\"fcfs\"");
    }
}
