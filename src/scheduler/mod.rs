//! Tick-synchronized multi-core scheduler.
//!
//! # Barrier protocol
//!
//! One scheduler thread and `num_cpu` worker threads rendezvous at three
//! barriers of arity `num_cpu + 1` per tick:
//!
//! ```text
//! scheduler                              worker[i]
//!   pause check                            pause gate
//!   advance tick
//!   arrive B1 ─────────────────────────── arrive B1   (enter work)
//!         (workers execute one step, release outcomes)
//!   arrive B2 ─────────────────────────── arrive B2
//!   timer / faults / preempt / admit /       (idle)
//!   dispatch
//!   arrive B3 ─────────────────────────── arrive B3
//!   housekeeping + sleep                   sleep
//! ```
//!
//! Workers execute exactly one step of their assigned process between B1 and
//! B2; every outcome is observed by the scheduler strictly between B2 and B3
//! through the thread-safe queues and the short-term lock. Shutdown drains
//! the barriers via arrive-and-drop so a partially advanced tick always
//! completes.
//!
//! # Locks
//!
//! | Lock | Guards |
//! |------|--------|
//! | pause mutex | pause condition, tick-in-flight handshake |
//! | short-term mutex | running vector, quantum vector |
//! | per-queue mutexes | inside each channel / heap / map |
//! | MM mutex | frames, bitmaps, FIFO, backing files |
//! | process mutex | pc, vars, page table, logs |
//!
//! Acquisition order is pause → short-term → queue → MM/process. The MM
//! lock is a leaf acquired inside a process step; nothing acquires a process
//! lock while holding the MM lock, so the pair cannot form a cycle. Two
//! process locks are never held simultaneously.

mod admission;
mod dispatch;
pub mod rng;
mod snapshot;
mod worker;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ahash::AHashMap;
use crossbeam_utils::CachePadded;

use crate::config::{ConfigError, SchedulerConfig};
use crate::events::{EventSink, NullSink};
use crate::finished::FinishedMap;
use crate::memory::MemoryManager;
use crate::policy::SchedulingPolicy;
use crate::process::{Process, ProcessState};
use crate::ready_queue::ReadyQueue;
use crate::stdx::{BufferedChannel, Channel, FullPolicy, SleepQueue, TickBarrier};

use rng::XorShift64;
use worker::CpuWorker;

/// Failure building a scheduler.
#[derive(Debug)]
pub enum BuildError {
    Config(ConfigError),
    Io(io::Error),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Config(e) => write!(f, "scheduler config: {e}"),
            BuildError::Io(e) => write!(f, "scheduler io: {e}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        BuildError::Config(e)
    }
}

impl From<io::Error> for BuildError {
    fn from(e: io::Error) -> Self {
        BuildError::Io(e)
    }
}

/// Per-core busy/idle tick totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuUtilization {
    pub busy_ticks: Vec<u64>,
    pub idle_ticks: Vec<u64>,
}

impl CpuUtilization {
    pub fn busy_total(&self) -> u64 {
        self.busy_ticks.iter().sum()
    }

    pub fn idle_total(&self) -> u64 {
        self.idle_ticks.iter().sum()
    }

    /// Fraction of accounted core-ticks that were busy, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        let busy = self.busy_total();
        let total = busy + self.idle_total();
        if total == 0 {
            0.0
        } else {
            busy as f64 / total as f64
        }
    }
}

/// Mutable short-term state: one slot and one quantum counter per core.
pub(crate) struct ShortTerm {
    pub(crate) running: Vec<Option<Arc<Process>>>,
    pub(crate) quantum_remaining: Vec<u32>,
}

/// State shared between the scheduler thread, the workers, and the public
/// handle.
pub(crate) struct SchedCore {
    pub(crate) cfg: SchedulerConfig,

    tick: AtomicU64,
    paused: AtomicBool,
    running: AtomicBool,
    /// True from pause-check exit until just before B3: the scheduler has
    /// committed to completing the current barrier cycle, so workers may
    /// pass their pause gate and arrive at B1.
    tick_in_flight: AtomicBool,
    pause_mtx: Mutex<()>,
    pause_cv: Condvar,

    pub(crate) short_term: Mutex<ShortTerm>,

    pub(crate) job_queue: Channel<Arc<Process>>,
    pub(crate) ready_queue: ReadyQueue,
    pub(crate) blocked_queue: Channel<Arc<Process>>,
    pub(crate) swapped_queue: Channel<Arc<Process>>,
    pub(crate) sleep_queue: SleepQueue<Arc<Process>>,
    pub(crate) finished: FinishedMap,
    pub(crate) process_map: Mutex<AHashMap<u32, Arc<Process>>>,

    pub(crate) mm: Arc<MemoryManager>,
    pub(crate) barriers: [TickBarrier; 3],

    pub(crate) busy_ticks: Vec<CachePadded<AtomicU64>>,
    pub(crate) idle_ticks: Vec<CachePadded<AtomicU64>>,

    pub(crate) log_ring: BufferedChannel<String>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) rng: Mutex<XorShift64>,
}

impl SchedCore {
    #[inline]
    pub(crate) fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn account_busy(&self, cpu: u32) {
        self.busy_ticks[cpu as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn account_idle(&self, cpu: u32) {
        self.idle_ticks[cpu as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get_process(&self, pid: u32) -> Option<Arc<Process>> {
        self.process_map
            .lock()
            .expect("process map mutex poisoned")
            .get(&pid)
            .cloned()
    }

    /// Blocks the scheduler thread while paused, then commits to a tick.
    fn pause_check(&self) {
        let mut guard = self.pause_mtx.lock().expect("pause mutex poisoned");
        while self.is_paused() && self.is_running() {
            guard = self.pause_cv.wait(guard).expect("pause mutex poisoned");
        }
        if self.is_running() {
            self.tick_in_flight.store(true, Ordering::Release);
        }
        drop(guard);
        // Wake workers parked at their pause gate.
        self.pause_cv.notify_all();
    }

    /// Parks a worker while paused, unless the scheduler has already
    /// committed to the current tick (in which case the worker must arrive
    /// at B1 so the barrier cycle completes).
    pub(crate) fn worker_pause_gate(&self) {
        let mut guard = self.pause_mtx.lock().expect("pause mutex poisoned");
        while self.is_paused()
            && self.is_running()
            && !self.tick_in_flight.load(Ordering::Acquire)
        {
            let (g, _) = self
                .pause_cv
                .wait_timeout(guard, Duration::from_millis(1))
                .expect("pause mutex poisoned");
            guard = g;
        }
    }

    /// One full scheduler tick cycle. Returns `false` when shutting down.
    fn run_one_tick(&self) -> bool {
        self.pause_check();
        if !self.is_running() {
            return false;
        }

        self.tick.fetch_add(1, Ordering::AcqRel);
        self.barriers[0].arrive_and_wait();
        // Workers execute one step each between B1 and B2.
        self.barriers[1].arrive_and_wait();

        self.timer_check();
        self.medium_term_check();
        self.preemption_check();
        self.long_term_admission();
        self.short_term_dispatch();

        // After B3 the in-flight flag must already read false, otherwise a
        // worker could slip past its pause gate into a tick the scheduler
        // never starts.
        self.tick_in_flight.store(false, Ordering::Release);
        self.barriers[2].arrive_and_wait();

        self.log_status();
        thread::sleep(Duration::from_millis(self.cfg.scheduler_tick_delay));
        true
    }

    fn tick_loop(&self) {
        while self.run_one_tick() {}
        self.tick_in_flight.store(false, Ordering::Release);
        // Leave the barrier group so workers mid-tick can finish and exit.
        for barrier in &self.barriers {
            barrier.arrive_and_drop();
        }
    }
}

// ============================================================================
// Public handle
// ============================================================================

/// Owning handle over the scheduler thread, the CPU workers, and all queues.
///
/// Admission is **lazy**: a process is admitted with a sized page table and
/// no resident pages; first touches fault pages in one by one. The handle is
/// single-shot: after [`stop`](Scheduler::stop) the barrier group has been
/// drained and the scheduler cannot be restarted.
pub struct Scheduler {
    core: Arc<SchedCore>,
    sched_thread: Option<JoinHandle<()>>,
    workers: Vec<CpuWorker>,
}

impl Scheduler {
    /// Builds a scheduler with no event sink.
    pub fn new(cfg: SchedulerConfig) -> Result<Self, BuildError> {
        Self::with_sink(cfg, Arc::new(NullSink))
    }

    /// Builds a scheduler that reports structured events to `sink`.
    pub fn with_sink(cfg: SchedulerConfig, sink: Arc<dyn EventSink>) -> Result<Self, BuildError> {
        cfg.validate()?;
        let mm = Arc::new(MemoryManager::with_sink(&cfg, Arc::clone(&sink))?);
        let num_cpu = cfg.num_cpu as usize;
        let finished = if cfg.remove_finished {
            FinishedMap::with_capacity(cfg.remove_finished_capacity)
        } else {
            FinishedMap::new()
        };

        let core = Arc::new(SchedCore {
            tick: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            tick_in_flight: AtomicBool::new(false),
            pause_mtx: Mutex::new(()),
            pause_cv: Condvar::new(),
            short_term: Mutex::new(ShortTerm {
                running: vec![None; num_cpu],
                quantum_remaining: vec![cfg.quantum_cycles.saturating_sub(1); num_cpu],
            }),
            job_queue: Channel::new(),
            ready_queue: ReadyQueue::new(cfg.scheduler),
            blocked_queue: Channel::new(),
            swapped_queue: Channel::new(),
            sleep_queue: SleepQueue::new(),
            finished,
            process_map: Mutex::new(AHashMap::new()),
            mm,
            barriers: [
                TickBarrier::new(num_cpu + 1),
                TickBarrier::new(num_cpu + 1),
                TickBarrier::new(num_cpu + 1),
            ],
            busy_ticks: (0..num_cpu).map(|_| CachePadded::new(AtomicU64::new(0))).collect(),
            idle_ticks: (0..num_cpu).map(|_| CachePadded::new(AtomicU64::new(0))).collect(),
            log_ring: BufferedChannel::new(20, FullPolicy::Overwrite),
            sink,
            rng: Mutex::new(XorShift64::new(cfg.rng_seed)),
            cfg,
        });

        Ok(Self {
            core,
            sched_thread: None,
            workers: Vec::new(),
        })
    }

    /// Spins up the scheduler thread and one worker per core.
    ///
    /// # Panics
    /// Panics if called twice; the barrier group is single-shot.
    pub fn start(&mut self) {
        assert!(self.sched_thread.is_none(), "scheduler already started");
        self.core.running.store(true, Ordering::Release);

        for cpu in 0..self.core.cfg.num_cpu {
            self.workers.push(CpuWorker::spawn(cpu, Arc::clone(&self.core)));
        }
        let core = Arc::clone(&self.core);
        self.sched_thread = Some(
            thread::Builder::new()
                .name("scheduler".to_string())
                .spawn(move || core.tick_loop())
                .expect("spawn scheduler thread"),
        );
    }

    /// Cooperative shutdown: the current tick finishes without new dispatch,
    /// every thread drains out of the barrier group, and all threads join.
    pub fn stop(&mut self) {
        if self.sched_thread.is_none() {
            return;
        }
        self.core.running.store(false, Ordering::Release);
        // Wake the pause condvar so a paused scheduler observes the flag.
        let guard = self.core.pause_mtx.lock().expect("pause mutex poisoned");
        drop(guard);
        self.core.pause_cv.notify_all();

        if let Some(handle) = self.sched_thread.take() {
            let _ = handle.join();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
    }

    // ------------------------------------------------------------------
    // Long-term API
    // ------------------------------------------------------------------

    /// Enqueues a process for admission. Safe from any thread.
    pub fn submit_process(&self, p: Arc<Process>) {
        p.set_state(ProcessState::New);
        self.core.job_queue.send(p);
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Freezes the tick counter after the in-flight tick completes.
    pub fn pause(&self) {
        let guard = self.core.pause_mtx.lock().expect("pause mutex poisoned");
        self.core.paused.store(true, Ordering::Release);
        drop(guard);
    }

    /// Resumes tick advancement.
    pub fn resume(&self) {
        let guard = self.core.pause_mtx.lock().expect("pause mutex poisoned");
        self.core.paused.store(false, Ordering::Release);
        drop(guard);
        self.core.pause_cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.core.is_paused()
    }

    /// Switches the ready-set ordering policy (and, for RR, preemption).
    pub fn set_scheduling_policy(&self, policy: SchedulingPolicy) {
        self.core.ready_queue.set_policy(policy);
    }

    // ------------------------------------------------------------------
    // Medium-term API
    // ------------------------------------------------------------------

    /// Swaps out the least attractive ready process: every resident page is
    /// written back and freed, and the process parks in the swapped queue.
    /// Returns the PID, or `None` when the ready set is empty.
    pub fn swap_out_victim(&self) -> Option<u32> {
        self.core.swap_out_victim()
    }

    /// Returns the oldest swapped process to the ready set. Its pages fault
    /// back in on demand.
    pub fn swap_in_next(&self) -> Option<u32> {
        self.core.swap_in_next()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn current_tick(&self) -> u64 {
        self.core.current_tick()
    }

    pub fn cpu_utilization(&self) -> CpuUtilization {
        CpuUtilization {
            busy_ticks: self
                .core
                .busy_ticks
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            idle_ticks: self
                .core
                .idle_ticks
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }

    /// Admitted-but-unfinished processes plus jobs awaiting admission.
    pub fn get_total_active_processes(&self) -> usize {
        let admitted = self
            .core
            .process_map
            .lock()
            .expect("process map mutex poisoned")
            .len();
        admitted + self.core.job_queue.len()
    }

    pub fn get_all_processes(&self) -> Vec<Arc<Process>> {
        self.core
            .process_map
            .lock()
            .expect("process map mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_process(&self, pid: u32) -> Option<Arc<Process>> {
        self.core.get_process(pid)
    }

    /// The finished log.
    pub fn finished(&self) -> &FinishedMap {
        &self.core.finished
    }

    /// The memory manager (paging counters, swap paths).
    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.core.mm
    }

    /// Formatted multi-section snapshot of every queue and core.
    pub fn snapshot(&self) -> String {
        self.core.snapshot()
    }

    /// [`snapshot`](Scheduler::snapshot) plus the ring of recent periodic
    /// snapshots.
    pub fn snapshot_with_log(&self) -> String {
        let mut out = self.core.snapshot();
        out.push_str("\n[Recent Snapshots]\n");
        out.push_str(&self.core.log_ring.snapshot_all());
        out
    }

    /// Writes the per-queue snapshot files under the configured logs dir.
    pub fn save_snapshot(&self) -> io::Result<()> {
        self.core.save_snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
