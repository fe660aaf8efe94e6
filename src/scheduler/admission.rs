//! Long-term admission, the timer stage, and the medium-term stage
//! (page-fault service and whole-process swapping).

use std::sync::Arc;

use crate::events::SchedEvent;
use crate::process::{Process, ProcessState};

use super::SchedCore;

impl SchedCore {
    /// Wakes every sleeper whose wake tick has arrived.
    pub(crate) fn timer_check(&self) {
        let now = self.current_tick();
        while self.sleep_queue.top_wake().is_some_and(|wake| wake <= now) {
            let Some(entry) = self.sleep_queue.receive() else {
                break;
            };
            let p = entry.item;
            // Clear the counter so the next dispatch executes an instruction
            // instead of draining the remaining sleep a second time.
            p.clear_sleep();
            self.sink.emit(&SchedEvent::Woken {
                pid: p.id(),
                tick: now,
            });
            self.enqueue_ready(&p);
        }
    }

    /// Services every fault parked in the blocked queue. Runs between B2 and
    /// B3, when no worker is executing, so page-table updates cannot race a
    /// translation.
    pub(crate) fn medium_term_check(&self) {
        while let Some(p) = self.blocked_queue.try_receive() {
            let page = p.faulting_page();
            self.handle_page_fault(&p, page);
        }
    }

    /// Grants the faulting page, invalidates any eviction victim, and
    /// returns the caller to READY.
    pub(crate) fn handle_page_fault(&self, p: &Arc<Process>, page: usize) {
        let on_disk = p.is_page_on_disk(page);
        let grant = self.mm.request_page(p.id(), page, on_disk);

        if let Some(victim) = grant.evicted {
            self.sink.emit(&SchedEvent::Evicted {
                pid: victim.pid,
                page: victim.page,
                frame: grant.frame_idx,
            });
            if victim.pid == p.id() {
                p.invalidate_page(victim.page);
            } else if let Some(owner) = self.get_process(victim.pid) {
                owner.invalidate_page(victim.page);
            }
        }

        p.update_page_table(page, grant.frame_idx);
        self.enqueue_ready(p);
    }

    /// Admits every queued job: roll a frame-aligned memory budget, size the
    /// page table (lazily — no page is resident until first touch), and move
    /// the process to READY.
    pub(crate) fn long_term_admission(&self) {
        while let Some(p) = self.job_queue.try_receive() {
            let budget = match p.memory_requirement() {
                Some(bytes) => self.frame_align(bytes),
                None => self.roll_mem_budget(),
            };
            p.initialize_memory(budget, self.cfg.mem_per_frame);
            p.set_created_tick(self.current_tick());
            p.set_event_sink(Arc::clone(&self.sink));
            self.process_map
                .lock()
                .expect("process map mutex poisoned")
                .insert(p.id(), Arc::clone(&p));
            self.sink.emit(&SchedEvent::Admitted {
                pid: p.id(),
                tick: self.current_tick(),
                mem_bytes: budget,
            });
            self.enqueue_ready(&p);
        }
    }

    /// Rolls a memory budget in `[min_mem_per_proc, max_mem_per_proc]`,
    /// aligned up to a whole number of frames.
    fn roll_mem_budget(&self) -> usize {
        let min = self.cfg.min_mem_per_proc;
        let max = self.cfg.max_mem_per_proc;
        let rolled = if max > min {
            let span = (max - min + 1) as u64;
            min + self
                .rng
                .lock()
                .expect("rng mutex poisoned")
                .next_below(span) as usize
        } else {
            min
        };
        self.frame_align(rolled)
    }

    fn frame_align(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.cfg.mem_per_frame) * self.cfg.mem_per_frame
    }

    /// Swaps out the tail of the ready set: write back and free every
    /// resident page, mark SWAPPED_OUT, and park in the swapped queue.
    pub(crate) fn swap_out_victim(&self) -> Option<u32> {
        let p = self.ready_queue.receive_victim()?;
        for (page, frame) in p.resident_pages() {
            match self.mm.evict_frame(p.id(), page, frame) {
                Ok(()) => p.invalidate_page(page),
                // Write-back failed: the page stays resident and dirty so a
                // later attempt can succeed.
                Err(e) => self.sink.emit(&SchedEvent::Diagnostic {
                    message: format!("swap-out of pid {} page {page} failed: {e}", p.id()),
                }),
            }
        }
        p.set_state(ProcessState::SwappedOut);
        let pid = p.id();
        self.swapped_queue.send(p);
        self.sink.emit(&SchedEvent::SwappedOut { pid });
        Some(pid)
    }

    /// Returns the oldest swapped process to READY. Pages fault back in on
    /// demand.
    pub(crate) fn swap_in_next(&self) -> Option<u32> {
        let p = self.swapped_queue.try_receive()?;
        let pid = p.id();
        self.enqueue_ready(&p);
        self.sink.emit(&SchedEvent::SwappedIn { pid });
        Some(pid)
    }
}
