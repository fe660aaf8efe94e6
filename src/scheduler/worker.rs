//! CPU worker: one thread per simulated core.
//!
//! The worker's whole job is to execute exactly one step of its assigned
//! process between barriers B1 and B2 each tick, then rendezvous at B2 and
//! B3 while the scheduler runs its phases. A worker that observes shutdown
//! finishes the barriers of the tick in flight before leaving the group, so
//! the scheduler thread can always make progress.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::SchedCore;

pub(crate) struct CpuWorker {
    id: u32,
    handle: Option<JoinHandle<()>>,
}

impl CpuWorker {
    /// Spawns the worker thread for core `id`.
    pub(crate) fn spawn(id: u32, core: Arc<SchedCore>) -> CpuWorker {
        let handle = thread::Builder::new()
            .name(format!("cpu-{id}"))
            .spawn(move || worker_loop(id, core))
            .expect("spawn cpu worker thread");
        CpuWorker {
            id,
            handle: Some(handle),
        }
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                // A worker panic is a scheduler bug; surface it loudly but
                // keep joining the rest so shutdown completes.
                eprintln!("cpu worker {} panicked", self.id);
            }
        }
    }
}

fn worker_loop(cpu: u32, core: Arc<SchedCore>) {
    loop {
        if !core.is_running() {
            break;
        }
        core.worker_pause_gate();
        if !core.is_running() {
            break;
        }

        core.barriers[0].arrive_and_wait();

        match core.dispatch_to_cpu(cpu) {
            None => core.account_idle(cpu),
            Some(p) => {
                let outcome =
                    p.execute_tick(&core.mm, core.current_tick(), core.cfg.delay_per_exec);
                if outcome.is_yield() {
                    core.release_cpu_interrupt(cpu, &p, outcome);
                }
                core.account_busy(cpu);
            }
        }

        core.barriers[1].arrive_and_wait();
        // Scheduler phases run here (timer, faults, preemption, admission,
        // dispatch); the worker just waits out the tick.
        core.barriers[2].arrive_and_wait();

        // Match the scheduler's tick rate so the worker does not lap the
        // barrier cycle while the scheduler sleeps.
        thread::sleep(Duration::from_millis(core.cfg.scheduler_tick_delay));
    }

    // Leave all three barriers so remaining participants never stall.
    for barrier in &core.barriers {
        barrier.arrive_and_drop();
    }
}
