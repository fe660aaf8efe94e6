//! Snapshot formatting and periodic housekeeping.
//!
//! Snapshots are human-readable and not a stable format. The periodic
//! variants land in the in-memory log ring (every `snapshot_cooldown` ticks)
//! and in per-queue files under the configured logs dir (every
//! `save_snapshot_file_rate` ticks).

use std::fs;
use std::io;

use crate::events::SchedEvent;
use crate::util::fmt_clock_time;

use super::SchedCore;

impl SchedCore {
    /// Formatted multi-section snapshot of cores and queues.
    pub(crate) fn snapshot(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Scheduler Snapshot ===\n");
        out.push_str(&format!(
            "paused: {}  tick: {}  policy: {}\n",
            self.is_paused(),
            self.current_tick(),
            self.ready_queue.policy(),
        ));

        out.push_str("[CPU States]\n");
        out.push_str(&self.cpu_state_snapshot());

        out.push_str("[Sleep Queue]\n");
        push_section(&mut out, self.sleep_queue_snapshot());

        out.push_str("[Job Queue]\n");
        push_section(&mut out, self.job_queue.snapshot());

        out.push_str("[Ready Queue]\n");
        push_section(&mut out, self.ready_queue.snapshot());

        out.push_str("[Finished Processes]\n");
        push_section(&mut out, self.finished.snapshot());

        out
    }

    /// One line per core: the resident process or IDLE.
    pub(crate) fn cpu_state_snapshot(&self) -> String {
        // Clone the slots under the lock, format after releasing it: the
        // per-process summary takes each process's own lock.
        let (slots, quanta) = {
            let st = self.short_term.lock().expect("short-term mutex poisoned");
            (st.running.clone(), st.quantum_remaining.clone())
        };

        let now = fmt_clock_time(std::time::SystemTime::now());
        let mut out = String::new();
        for (cpu, slot) in slots.iter().enumerate() {
            match slot {
                Some(p) => out.push_str(&format!(
                    "{}\t{}\tPID={}\tRR={}\tLA={}\tCore: {}\t{} / {}\n",
                    p.name(),
                    now,
                    p.id(),
                    quanta[cpu],
                    p.last_active_tick(),
                    cpu,
                    p.executed_instructions(),
                    p.total_instructions(),
                )),
                None => out.push_str(&format!("  CPU {cpu}: IDLE\n")),
            }
        }
        out
    }

    pub(crate) fn sleep_queue_snapshot(&self) -> String {
        let mut out = String::new();
        for entry in self.sleep_queue.entries() {
            out.push_str(&format!(
                "{}\tPID={}\twake={}\n",
                entry.item.name(),
                entry.item.id(),
                entry.wake_tick,
            ));
        }
        out
    }

    /// Periodic housekeeping at the end of each tick.
    pub(crate) fn log_status(&self) {
        let tick = self.current_tick();
        if tick % self.cfg.snapshot_cooldown == 0 {
            self.log_ring.send(self.snapshot());
            self.sink.emit(&SchedEvent::TickSnapshot { tick });
        }
        if tick % self.cfg.save_snapshot_file_rate == 0 {
            if let Err(e) = self.save_snapshot() {
                self.sink.emit(&SchedEvent::Diagnostic {
                    message: format!("snapshot file write failed: {e}"),
                });
            }
        }
    }

    /// Writes one snapshot file per queue under the logs dir.
    pub(crate) fn save_snapshot(&self) -> io::Result<()> {
        let dir = &self.cfg.logs_dir;
        fs::create_dir_all(dir)?;
        fs::write(dir.join("s_sleep_queue.log"), self.sleep_queue_snapshot())?;
        fs::write(dir.join("s_ready_queue.log"), self.ready_queue.snapshot())?;
        fs::write(dir.join("s_job_queue.log"), self.job_queue.snapshot())?;
        fs::write(dir.join("s_finished_queue.log"), self.finished.snapshot())?;
        fs::write(dir.join("s_running_cpu.log"), self.cpu_state_snapshot())?;
        Ok(())
    }
}

fn push_section(out: &mut String, body: String) {
    if body.is_empty() {
        out.push_str("  (empty)\n");
    } else {
        out.push_str(&body);
    }
}
