//! Short-term scheduling: dispatch, release, and RR preemption.
//!
//! `release_cpu_interrupt` is the single choke point for step outcomes. It
//! checks `Finished` first so a process that both exhausts its RR quantum
//! and retires its last instruction in the same step is logged as finished,
//! never re-queued.

use std::sync::Arc;

use crate::events::SchedEvent;
use crate::process::{Process, ProcessState, TickOutcome};

use super::{SchedCore, ShortTerm};

impl SchedCore {
    /// Hands core `cpu` a process: the sticky assignment if the slot is
    /// occupied, otherwise the head of the ready set.
    ///
    /// Ready-set candidates already present in any running slot are dropped
    /// and the next candidate is tried, so a process can never hold two
    /// cores at once.
    pub(crate) fn dispatch_to_cpu(&self, cpu: u32) -> Option<Arc<Process>> {
        let mut st = self.short_term.lock().expect("short-term mutex poisoned");
        if let Some(p) = &st.running[cpu as usize] {
            return Some(Arc::clone(p));
        }
        // Shutdown: the partially advanced tick finishes without new
        // dispatch; sticky assignments above still run out their step.
        if !self.is_running() {
            return None;
        }

        loop {
            let p = self.ready_queue.receive_next()?;
            if p.is_finished() {
                continue;
            }
            let occupied = st
                .running
                .iter()
                .flatten()
                .any(|r| Arc::ptr_eq(r, &p));
            if occupied {
                // Duplicate entry; drop it and retry with the next head.
                self.sink.emit(&SchedEvent::Diagnostic {
                    message: format!("dropped duplicate ready entry for pid {}", p.id()),
                });
                continue;
            }

            let tick = self.current_tick();
            p.set_state(ProcessState::Running);
            p.set_core(cpu);
            p.set_last_active_tick(tick);
            st.running[cpu as usize] = Some(Arc::clone(&p));
            st.quantum_remaining[cpu as usize] = self.cfg.quantum_cycles.saturating_sub(1);
            self.sink.emit(&SchedEvent::Dispatched {
                pid: p.id(),
                core: cpu,
                tick,
            });
            return Some(p);
        }
    }

    /// Routes a step outcome to the right queue and clears the running slot.
    ///
    /// | Outcome | Effect |
    /// |---------|--------|
    /// | Finished | finished log, drop from process map |
    /// | BlockedPageFault | blocked queue; medium-term stage services it |
    /// | Waiting(k) | sleep queue with `wake = tick + k` |
    /// | Ready | back into the ready set (deduplicated) |
    /// | Running | no-op, keeps the slot |
    pub(crate) fn release_cpu_interrupt(&self, cpu: u32, p: &Arc<Process>, outcome: TickOutcome) {
        let tick = self.current_tick();
        let mut st = self.short_term.lock().expect("short-term mutex poisoned");
        let holds_slot = st.running[cpu as usize]
            .as_ref()
            .map(|r| Arc::ptr_eq(r, p))
            .unwrap_or(false);

        // Finished wins over every other outcome, including quantum expiry.
        if p.is_finished() || matches!(outcome, TickOutcome::Finished) {
            p.set_state(ProcessState::Finished);
            if holds_slot {
                st.running[cpu as usize] = None;
            }
            drop(st);
            self.finished.insert(Arc::clone(p), tick);
            self.process_map
                .lock()
                .expect("process map mutex poisoned")
                .remove(&p.id());
            self.sink.emit(&SchedEvent::Finished { pid: p.id(), tick });
            return;
        }

        match outcome {
            TickOutcome::Running => {}
            TickOutcome::BlockedPageFault(page) => {
                p.set_state(ProcessState::BlockedPageFault);
                if holds_slot {
                    st.running[cpu as usize] = None;
                }
                drop(st);
                self.blocked_queue.send(Arc::clone(p));
                self.sink.emit(&SchedEvent::PageFault {
                    pid: p.id(),
                    page,
                    tick,
                });
            }
            TickOutcome::Waiting(remaining) => {
                p.set_state(ProcessState::Waiting);
                if holds_slot {
                    st.running[cpu as usize] = None;
                }
                drop(st);
                let wake_tick = tick + remaining as u64;
                self.sleep_queue.send(Arc::clone(p), wake_tick);
                self.sink.emit(&SchedEvent::Slept {
                    pid: p.id(),
                    wake_tick,
                    tick,
                });
            }
            TickOutcome::Ready => {
                if holds_slot {
                    st.running[cpu as usize] = None;
                }
                self.enqueue_ready_locked(&mut st, p);
            }
            TickOutcome::Finished => unreachable!("handled above"),
        }
    }

    /// Re-enqueues a process into the ready set from outside the short-term
    /// lock.
    pub(crate) fn enqueue_ready(&self, p: &Arc<Process>) {
        let mut st = self.short_term.lock().expect("short-term mutex poisoned");
        self.enqueue_ready_locked(&mut st, p);
    }

    /// Dedup rules: never enqueue a process that is finished, waiting,
    /// currently on a core, or already in the ready set.
    fn enqueue_ready_locked(&self, st: &mut ShortTerm, p: &Arc<Process>) {
        if p.is_finished() || p.is_waiting() {
            return;
        }
        if st.running.iter().flatten().any(|r| Arc::ptr_eq(r, p)) {
            return;
        }
        if self.ready_queue.contains(p.id()) {
            self.sink.emit(&SchedEvent::Diagnostic {
                message: format!("skipped duplicate enqueue for pid {}", p.id()),
            });
            return;
        }
        p.set_state(ProcessState::Ready);
        self.ready_queue.send(Arc::clone(p));
    }

    /// RR only: decrement each running process's quantum; on expiry, release
    /// it back to READY and hand the slot a replacement with a fresh
    /// quantum. FCFS and PRIORITY never preempt.
    pub(crate) fn preemption_check(&self) {
        if !self.ready_queue.policy().preempts() {
            return;
        }
        for cpu in 0..self.cfg.num_cpu {
            let expired = {
                let mut st = self.short_term.lock().expect("short-term mutex poisoned");
                match st.running[cpu as usize].clone() {
                    None => None,
                    Some(p) => {
                        if st.quantum_remaining[cpu as usize] > 0 {
                            st.quantum_remaining[cpu as usize] -= 1;
                            None
                        } else {
                            Some(p)
                        }
                    }
                }
            };
            let Some(p) = expired else { continue };
            self.sink.emit(&SchedEvent::Preempted {
                pid: p.id(),
                core: cpu,
                tick: self.current_tick(),
            });
            self.release_cpu_interrupt(cpu, &p, TickOutcome::Ready);
            self.dispatch_to_cpu(cpu);
        }
    }

    /// Fills every empty running slot from the ready set.
    pub(crate) fn short_term_dispatch(&self) {
        if self.ready_queue.is_empty() {
            return;
        }
        for cpu in 0..self.cfg.num_cpu {
            let empty = {
                let st = self.short_term.lock().expect("short-term mutex poisoned");
                st.running[cpu as usize].is_none()
            };
            if empty {
                self.dispatch_to_cpu(cpu);
            }
        }
    }
}
