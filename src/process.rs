//! Process model: identity, execution state, page table, and the one-tick
//! step function.
//!
//! A process owns a flat instruction vector (FOR loops are unrolled at
//! construction), a symbol table mapping variable names to virtual addresses
//! of 2-byte cells, and a page table indexed by page number. All virtual
//! memory is demand paged: the first touch of an invalid page records the
//! faulting page and yields [`TickOutcome::BlockedPageFault`] without
//! advancing the program counter, so the instruction is retried once the
//! medium-term stage has serviced the fault.
//!
//! # State machine
//!
//! ```text
//! NEW ──admit──▶ READY ──dispatch──▶ RUNNING
//!                  ▲                  │  ├── SLEEP n   ──▶ WAITING ──timer──▶ READY
//!                  │                  │  ├── page miss ──▶ BLOCKED_PAGE_FAULT ──MM──▶ READY
//!                  └──preempt─────────┘  ├── quantum end (RR) ──▶ READY
//!                                        ├── instruction ok ────▶ RUNNING (same slot)
//!                                        └── pc == end ─────────▶ FINISHED
//! ```
//!
//! # Locking
//!
//! Mutable execution state lives behind one internal mutex, held for the
//! duration of a single `execute_tick`. The scheduler reads `state`,
//! `last_active_tick`, and the finished-logged latch through atomics so the
//! ready-set comparator and snapshot paths never contend with a running
//! step. The memory-manager lock is acquired *inside* the process lock
//! (physical reads/writes); nothing acquires a process lock while holding
//! the memory-manager lock, so the pair cannot deadlock. Holding two process
//! locks at once is forbidden.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ahash::AHashMap;

use crate::events::{EventSink, NullSink, SchedEvent};
use crate::instruction::{clamp16, unroll, Instruction, Operand, PrintArg};
use crate::memory::MemoryManager;
use crate::stdx::channel::SnapshotLine;
use crate::util::fmt_clock_time;

/// Virtual address space bound: addresses are 16-bit.
const VADDR_LIMIT: u32 = 1 << 16;

// ============================================================================
// States and outcomes
// ============================================================================

/// Lifecycle state of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    New = 0,
    Ready = 1,
    Running = 2,
    Waiting = 3,
    BlockedPageFault = 4,
    SwappedOut = 5,
    Finished = 6,
}

impl ProcessState {
    fn from_u8(v: u8) -> ProcessState {
        match v {
            0 => ProcessState::New,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Waiting,
            4 => ProcessState::BlockedPageFault,
            5 => ProcessState::SwappedOut,
            6 => ProcessState::Finished,
            _ => unreachable!("invalid process state tag"),
        }
    }

    /// Uppercase token used in snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Waiting => "WAITING",
            ProcessState::BlockedPageFault => "BLOCKED_PAGE_FAULT",
            ProcessState::SwappedOut => "SWAPPED_OUT",
            ProcessState::Finished => "FINISHED",
        }
    }
}

/// Result of one `execute_tick` call, driving the scheduler's release logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The process keeps its core (instruction retired or delay consumed).
    Running,
    /// The process yields but is immediately dispatchable again.
    Ready,
    /// The process sleeps for the given number of remaining ticks.
    Waiting(u32),
    /// The process touched an invalid page and must wait for the grant.
    BlockedPageFault(usize),
    /// The process retired its last instruction (or was terminated).
    Finished,
}

impl TickOutcome {
    /// Whether the worker must hand the CPU back to the scheduler.
    #[inline]
    pub fn is_yield(&self) -> bool {
        !matches!(self, TickOutcome::Running)
    }
}

// ============================================================================
// Supporting records
// ============================================================================

/// One page-table slot.
///
/// `valid` and `on_disk` are never both set at rest; they flip together when
/// the medium-term stage services a fault or evicts a victim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageEntry {
    pub frame_idx: usize,
    pub valid: bool,
    pub on_disk: bool,
    pub dirty: bool,
}

/// Runtime metrics for one process.
#[derive(Clone, Debug)]
pub struct ProcessMetrics {
    pub created_tick: u64,
    pub finished_tick: u64,
    pub executed_instructions: u32,
    pub total_instructions: u32,
    /// Core that last ran this process.
    pub core_id: Option<u32>,
    pub start_time: SystemTime,
    pub finish_time: Option<SystemTime>,
}

/// Resident / swapped page counts for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    pub active_pages: usize,
    pub swap_pages: usize,
    pub total_pages: usize,
}

struct ProcInner {
    pc: usize,
    instructions: Vec<Instruction>,
    page_table: Vec<PageEntry>,
    symbols: AHashMap<String, usize>,
    brk: usize,
    page_size: usize,
    memory_limit: usize,
    sleep_remaining: u32,
    delay_remaining: u32,
    faulting_page: usize,
    memory_requirement: Option<usize>,
    logs: Vec<String>,
    metrics: ProcessMetrics,
    sink: Arc<dyn EventSink>,
}

// ============================================================================
// Process
// ============================================================================

/// A synthetic process.
pub struct Process {
    id: u32,
    name: String,
    priority: u32,
    state: AtomicU8,
    last_active_tick: AtomicU64,
    finished_logged: AtomicBool,
    inner: Mutex<ProcInner>,
}

impl Process {
    /// Creates a process, eagerly unrolling FOR loops.
    pub fn new(id: u32, name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self::with_priority(id, name, instructions, 0)
    }

    /// Like [`Process::new`] with an explicit priority (higher runs first
    /// under the PRIORITY policy).
    pub fn with_priority(
        id: u32,
        name: impl Into<String>,
        instructions: Vec<Instruction>,
        priority: u32,
    ) -> Self {
        let flat = unroll(&instructions);
        debug_assert!(flat.iter().all(|i| !matches!(i, Instruction::For { .. })));
        let total = flat.len() as u32;
        Self {
            id,
            name: name.into(),
            priority,
            state: AtomicU8::new(ProcessState::New as u8),
            last_active_tick: AtomicU64::new(0),
            finished_logged: AtomicBool::new(false),
            inner: Mutex::new(ProcInner {
                pc: 0,
                instructions: flat,
                page_table: Vec::new(),
                symbols: AHashMap::new(),
                brk: 0,
                page_size: 16,
                memory_limit: 0,
                sleep_remaining: 0,
                delay_remaining: 0,
                faulting_page: 0,
                memory_requirement: None,
                logs: Vec::new(),
                sink: Arc::new(NullSink),
                metrics: ProcessMetrics {
                    created_tick: 0,
                    finished_tick: 0,
                    executed_instructions: 0,
                    total_instructions: total,
                    core_id: None,
                    start_time: SystemTime::now(),
                    finish_time: None,
                },
            }),
        }
    }

    // ------------------------------------------------------------------
    // Identity and scheduler-visible fields
    // ------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, s: ProcessState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.state() == ProcessState::Finished
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == ProcessState::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    #[inline]
    pub fn last_active_tick(&self) -> u64 {
        self.last_active_tick.load(Ordering::Acquire)
    }

    pub fn set_last_active_tick(&self, tick: u64) {
        self.last_active_tick.store(tick, Ordering::Release);
    }

    /// Claims the finished-log slot; only the first caller wins.
    pub(crate) fn try_mark_finished_logged(&self) -> bool {
        !self.finished_logged.swap(true, Ordering::AcqRel)
    }

    // ------------------------------------------------------------------
    // Admission-time setup
    // ------------------------------------------------------------------

    /// Sizes the page table for a memory budget. Pages start invalid; first
    /// touch faults them in.
    pub fn initialize_memory(&self, memory_limit: usize, page_size: usize) {
        assert!(page_size >= 2, "page must hold at least one cell");
        let mut inner = self.lock_inner();
        inner.page_size = page_size;
        inner.memory_limit = memory_limit;
        inner.page_table = vec![PageEntry::default(); memory_limit.div_ceil(page_size)];
        inner.brk = 0;
    }

    pub fn set_created_tick(&self, tick: u64) {
        self.lock_inner().metrics.created_tick = tick;
    }

    /// Requests a specific memory budget. Admission honors it (frame-aligned)
    /// instead of rolling one from the configured range.
    pub fn set_memory_requirement(&self, bytes: usize) {
        self.lock_inner().memory_requirement = Some(bytes);
    }

    /// Installs the sink structured events are reported through. Installed
    /// at admission; defaults to a no-op sink.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.lock_inner().sink = sink;
    }

    pub fn memory_requirement(&self) -> Option<usize> {
        self.lock_inner().memory_requirement
    }

    pub fn set_core(&self, core: u32) {
        self.lock_inner().metrics.core_id = Some(core);
    }

    // ------------------------------------------------------------------
    // Page-table maintenance (called by the medium-term stage)
    // ------------------------------------------------------------------

    /// Records a granted frame: the page becomes valid and leaves the disk.
    pub fn update_page_table(&self, page: usize, frame_idx: usize) {
        let mut inner = self.lock_inner();
        if page >= inner.page_table.len() {
            inner.page_table.resize(page + 1, PageEntry::default());
        }
        inner.page_table[page] = PageEntry {
            frame_idx,
            valid: true,
            on_disk: false,
            dirty: false,
        };
    }

    /// Marks an evicted page: no longer resident, contents on disk.
    pub fn invalidate_page(&self, page: usize) {
        let mut inner = self.lock_inner();
        if let Some(entry) = inner.page_table.get_mut(page) {
            entry.valid = false;
            entry.on_disk = true;
        }
    }

    pub fn is_page_on_disk(&self, page: usize) -> bool {
        self.lock_inner()
            .page_table
            .get(page)
            .map(|e| e.on_disk)
            .unwrap_or(false)
    }

    /// The page recorded by the most recent fault.
    pub fn faulting_page(&self) -> usize {
        self.lock_inner().faulting_page
    }

    /// `(page, frame)` for every resident page. Used by swap-out.
    pub fn resident_pages(&self) -> Vec<(usize, usize)> {
        self.lock_inner()
            .page_table
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(page, e)| (page, e.frame_idx))
            .collect()
    }

    /// Memory budget assigned at admission, in bytes.
    pub fn memory_limit(&self) -> usize {
        self.lock_inner().memory_limit
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let inner = self.lock_inner();
        MemoryStats {
            active_pages: inner.page_table.iter().filter(|e| e.valid).count(),
            swap_pages: inner.page_table.iter().filter(|e| e.on_disk).count(),
            total_pages: inner.page_table.len(),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Thread-safe copy of the process log.
    pub fn logs(&self) -> Vec<String> {
        self.lock_inner().logs.clone()
    }

    pub fn metrics(&self) -> ProcessMetrics {
        self.lock_inner().metrics.clone()
    }

    pub fn pc(&self) -> usize {
        self.lock_inner().pc
    }

    pub fn total_instructions(&self) -> u32 {
        self.lock_inner().metrics.total_instructions
    }

    pub fn executed_instructions(&self) -> u32 {
        self.lock_inner().metrics.executed_instructions
    }

    pub fn remaining_sleep_ticks(&self) -> u32 {
        self.lock_inner().sleep_remaining
    }

    /// Cancels any pending sleep. Called by the timer stage on wake so the
    /// next dispatch executes an instruction instead of draining the counter
    /// a second time.
    pub fn clear_sleep(&self) {
        self.lock_inner().sleep_remaining = 0;
    }

    pub fn has_instructions_remaining(&self) -> bool {
        let inner = self.lock_inner();
        inner.pc < inner.instructions.len()
    }

    /// One-line summary for listings.
    pub fn summary_line(&self) -> String {
        let inner = self.lock_inner();
        let core = match (self.state(), inner.metrics.core_id) {
            (ProcessState::Finished, _) => "Finished".to_string(),
            (_, Some(core)) => format!("Core: {core}"),
            (_, None) => "Core: -".to_string(),
        };
        format!(
            "{:<12} ({})   {}   {} / {}",
            self.name,
            fmt_clock_time(inner.metrics.start_time),
            core,
            inner.metrics.executed_instructions,
            inner.metrics.total_instructions,
        )
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Executes one tick on behalf of the process.
    ///
    /// The caller (one CPU worker) must hold the only live execution
    /// reference for this tick. At most one instruction is retired; delay
    /// and sleep counters consume ticks without retiring anything.
    pub fn execute_tick(
        &self,
        mm: &MemoryManager,
        global_tick: u64,
        delay_per_exec: u32,
    ) -> TickOutcome {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        // Busy-wait delay from the previous instruction.
        if inner.delay_remaining > 0 {
            inner.delay_remaining -= 1;
            self.set_state(ProcessState::Running);
            return TickOutcome::Running;
        }

        if self.is_finished() {
            return TickOutcome::Finished;
        }

        // A sleeping process that somehow reached a core drains its counter
        // one tick at a time instead of executing.
        if inner.sleep_remaining > 0 {
            inner.sleep_remaining -= 1;
            if inner.sleep_remaining == 0 {
                self.set_state(ProcessState::Ready);
                return TickOutcome::Ready;
            }
            self.set_state(ProcessState::Waiting);
            return TickOutcome::Waiting(inner.sleep_remaining);
        }

        let end = inner.instructions.len();
        if inner.pc >= end {
            self.finish(inner, global_tick);
            return TickOutcome::Finished;
        }

        self.set_state(ProcessState::Running);
        let inst = inner.instructions[inner.pc].clone();
        let mut pending_sleep = None;

        match &inst {
            Instruction::Print(arg) => {
                let line = match arg {
                    None => format!("Hello world from {}!", self.name),
                    Some(PrintArg::Message(msg)) => msg.clone(),
                    Some(PrintArg::Var(var)) => match self.read_var(inner, mm, var) {
                        Ok(value) => format!("{var} = {value}"),
                        Err(page) => return self.fault(inner, page),
                    },
                };
                inner.logs.push(line);
                inner.pc += 1;
            }

            Instruction::Declare { var, value } => {
                let v = match self.read_operand(inner, mm, value) {
                    Ok(v) => v,
                    Err(page) => return self.fault(inner, page),
                };
                if let Err(page) = self.write_var(inner, mm, var, v) {
                    return self.fault(inner, page);
                }
                inner.pc += 1;
            }

            Instruction::Add { dst, lhs, rhs } => {
                match self.binary_op(inner, mm, dst, lhs, rhs, |a, b| a + b) {
                    Ok(()) => inner.pc += 1,
                    Err(page) => return self.fault(inner, page),
                }
            }

            Instruction::Subtract { dst, lhs, rhs } => {
                match self.binary_op(inner, mm, dst, lhs, rhs, |a, b| a - b) {
                    Ok(()) => inner.pc += 1,
                    Err(page) => return self.fault(inner, page),
                }
            }

            Instruction::Sleep(ticks) => {
                inner.pc += 1;
                if *ticks > 0 {
                    inner.sleep_remaining = *ticks;
                    pending_sleep = Some(*ticks);
                }
            }

            // Unrolling removes FOR nodes; skip one defensively if present.
            Instruction::For { .. } => {
                inner.pc += 1;
            }

            Instruction::Read { var, addr } => {
                if *addr >= VADDR_LIMIT {
                    return self.memory_violation(inner, *addr, global_tick);
                }
                let Some((frame, offset)) = translate(inner, *addr as usize) else {
                    return self.fault(inner, *addr as usize / inner.page_size);
                };
                let value = mm.read_physical(frame, offset);
                if let Err(page) = self.write_var(inner, mm, var, value) {
                    return self.fault(inner, page);
                }
                inner.pc += 1;
            }

            Instruction::Write { addr, value } => {
                if *addr >= VADDR_LIMIT {
                    return self.memory_violation(inner, *addr, global_tick);
                }
                let v = match self.read_operand(inner, mm, value) {
                    Ok(v) => v,
                    Err(page) => return self.fault(inner, page),
                };
                let Some((frame, offset)) = translate(inner, *addr as usize) else {
                    return self.fault(inner, *addr as usize / inner.page_size);
                };
                mm.write_physical(frame, offset, v);
                inner.pc += 1;
            }
        }

        // FOR never counts as a retired instruction.
        if !matches!(inst, Instruction::For { .. }) {
            inner.metrics.executed_instructions += 1;
        }
        if delay_per_exec > 0 && inner.pc < end {
            inner.delay_remaining = delay_per_exec;
        }
        if inner.pc >= end {
            self.finish(inner, global_tick);
            return TickOutcome::Finished;
        }
        if let Some(ticks) = pending_sleep {
            self.set_state(ProcessState::Waiting);
            return TickOutcome::Waiting(ticks);
        }
        TickOutcome::Running
    }

    // ------------------------------------------------------------------
    // Execution helpers
    // ------------------------------------------------------------------

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ProcInner> {
        self.inner.lock().expect("process mutex poisoned")
    }

    fn finish(&self, inner: &mut ProcInner, global_tick: u64) {
        self.set_state(ProcessState::Finished);
        inner.metrics.finished_tick = global_tick;
        inner.metrics.finish_time = Some(SystemTime::now());
    }

    fn fault(&self, inner: &mut ProcInner, page: usize) -> TickOutcome {
        inner.faulting_page = page;
        self.set_state(ProcessState::BlockedPageFault);
        TickOutcome::BlockedPageFault(page)
    }

    fn memory_violation(&self, inner: &mut ProcInner, addr: u32, global_tick: u64) -> TickOutcome {
        inner.logs.push(format!(
            "Process {} shut down due to memory access violation error that occurred at {}. 0x{:x} invalid.",
            self.name,
            fmt_clock_time(SystemTime::now()),
            addr,
        ));
        inner.sink.emit(&SchedEvent::MemoryViolation {
            pid: self.id,
            tick: global_tick,
            addr,
        });
        self.finish(inner, global_tick);
        TickOutcome::Finished
    }

    fn binary_op(
        &self,
        inner: &mut ProcInner,
        mm: &MemoryManager,
        dst: &str,
        lhs: &Operand,
        rhs: &Operand,
        op: fn(i64, i64) -> i64,
    ) -> Result<(), usize> {
        let a = self.read_operand(inner, mm, lhs)? as i64;
        let b = self.read_operand(inner, mm, rhs)? as i64;
        self.write_var(inner, mm, dst, clamp16(op(a, b)))
    }

    fn read_operand(
        &self,
        inner: &mut ProcInner,
        mm: &MemoryManager,
        operand: &Operand,
    ) -> Result<u16, usize> {
        match operand {
            Operand::Literal(v) => Ok(*v),
            Operand::Var(name) => self.read_var(inner, mm, name),
        }
    }

    /// Resolves a variable. Unknown names are created at the current brk
    /// with value 0; the creation itself touches no memory, so it cannot
    /// fault.
    fn read_var(&self, inner: &mut ProcInner, mm: &MemoryManager, name: &str) -> Result<u16, usize> {
        let Some(&vaddr) = inner.symbols.get(name) else {
            alloc_var(inner, name);
            return Ok(0);
        };
        match translate(inner, vaddr) {
            Some((frame, offset)) => Ok(mm.read_physical(frame, offset)),
            None => Err(vaddr / inner.page_size),
        }
    }

    fn write_var(
        &self,
        inner: &mut ProcInner,
        mm: &MemoryManager,
        name: &str,
        value: u16,
    ) -> Result<(), usize> {
        let vaddr = match inner.symbols.get(name) {
            Some(&vaddr) => vaddr,
            None => alloc_var(inner, name),
        };
        match translate(inner, vaddr) {
            Some((frame, offset)) => {
                mm.write_physical(frame, offset, value);
                Ok(())
            }
            None => Err(vaddr / inner.page_size),
        }
    }
}

/// Virtual-to-physical translation. `None` on a missing or invalid page.
fn translate(inner: &ProcInner, vaddr: usize) -> Option<(usize, usize)> {
    let page = vaddr / inner.page_size;
    let offset = vaddr % inner.page_size;
    let entry = inner.page_table.get(page)?;
    entry.valid.then_some((entry.frame_idx, offset))
}

/// Allocates a 2-byte cell at the brk, bumping to the next page boundary if
/// the cell would straddle pages. Grows the page table as needed; the new
/// page starts invalid and faults on first touch.
fn alloc_var(inner: &mut ProcInner, name: &str) -> usize {
    if inner.page_size - (inner.brk % inner.page_size) < 2 {
        inner.brk = (inner.brk / inner.page_size + 1) * inner.page_size;
    }
    let vaddr = inner.brk;
    inner.brk += 2;
    let page = vaddr / inner.page_size;
    if page >= inner.page_table.len() {
        inner.page_table.resize(page + 1, PageEntry::default());
    }
    inner.symbols.insert(name.to_string(), vaddr);
    vaddr
}

impl SnapshotLine for Arc<Process> {
    fn snapshot_line(&self) -> String {
        format!(
            "{}\tID: {}\tPR: {}\tPC: {}\t({})",
            self.name(),
            self.id(),
            self.priority(),
            self.pc(),
            self.state().as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::events::VecSink;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempDir {
        path: PathBuf,
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn make_temp_dir(prefix: &str) -> TempDir {
        let mut path = std::env::temp_dir();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        path.push(format!("{}_{}_{}", prefix, std::process::id(), stamp));
        std::fs::create_dir_all(&path).expect("create temp dir");
        TempDir { path }
    }

    fn mm_with(frames: usize, frame_size: usize, dir: &Path) -> MemoryManager {
        let cfg = SchedulerConfig {
            max_overall_mem: frames * frame_size,
            mem_per_frame: frame_size,
            backing_store_dir: dir.join("backing"),
            ..Default::default()
        };
        MemoryManager::new(&cfg).expect("memory manager")
    }

    fn print(msg: &str) -> Instruction {
        Instruction::Print(Some(PrintArg::Message(msg.to_string())))
    }

    /// Drives a process to completion, servicing faults the way the
    /// medium-term stage would.
    fn run_to_completion(p: &Process, mm: &MemoryManager, max_steps: usize) -> TickOutcome {
        let mut tick = 0;
        for _ in 0..max_steps {
            tick += 1;
            match p.execute_tick(mm, tick, 0) {
                TickOutcome::Finished => return TickOutcome::Finished,
                TickOutcome::BlockedPageFault(page) => {
                    let on_disk = p.is_page_on_disk(page);
                    let grant = mm.request_page(p.id(), page, on_disk);
                    p.update_page_table(page, grant.frame_idx);
                }
                _ => {}
            }
        }
        panic!("process did not finish within {max_steps} steps");
    }

    // ==================== Construction ====================

    #[test]
    fn construction_unrolls_loops() {
        let p = Process::new(
            1,
            "p1",
            vec![Instruction::For {
                repeats: 3,
                body: vec![print("x")],
            }],
        );
        assert_eq!(p.total_instructions(), 3);
        assert_eq!(p.state(), ProcessState::New);
    }

    // ==================== Printing ====================

    #[test]
    fn print_default_and_message() {
        let tmp = make_temp_dir("proc_print");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "greeter", vec![Instruction::Print(None), print("custom")]);
        p.initialize_memory(32, 16);
        run_to_completion(&p, &mm, 10);
        assert_eq!(p.logs(), vec!["Hello world from greeter!", "custom"]);
        assert_eq!(p.executed_instructions(), 2);
    }

    #[test]
    fn print_variable_logs_resolved_value() {
        let tmp = make_temp_dir("proc_print_var");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "p1",
            vec![
                Instruction::Declare {
                    var: "x".to_string(),
                    value: Operand::Literal(9),
                },
                Instruction::Print(Some(PrintArg::Var("x".to_string()))),
            ],
        );
        p.initialize_memory(32, 16);
        run_to_completion(&p, &mm, 10);
        assert_eq!(p.logs().last().unwrap(), "x = 9");
    }

    // ==================== Arithmetic ====================

    #[test]
    fn add_and_subtract_clamp() {
        let tmp = make_temp_dir("proc_math");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "p1",
            vec![
                Instruction::Declare {
                    var: "big".to_string(),
                    value: Operand::Literal(60_000),
                },
                Instruction::Add {
                    dst: "over".to_string(),
                    lhs: Operand::Var("big".to_string()),
                    rhs: Operand::Literal(10_000),
                },
                Instruction::Subtract {
                    dst: "under".to_string(),
                    lhs: Operand::Literal(5),
                    rhs: Operand::Literal(9),
                },
                Instruction::Print(Some(PrintArg::Var("over".to_string()))),
                Instruction::Print(Some(PrintArg::Var("under".to_string()))),
            ],
        );
        p.initialize_memory(32, 16);
        run_to_completion(&p, &mm, 20);
        let logs = p.logs();
        assert!(logs.contains(&"over = 65535".to_string()));
        assert!(logs.contains(&"under = 0".to_string()));
    }

    #[test]
    fn unknown_operand_reads_as_zero() {
        let tmp = make_temp_dir("proc_auto");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "p1",
            vec![
                Instruction::Add {
                    dst: "sum".to_string(),
                    lhs: Operand::Var("ghost".to_string()),
                    rhs: Operand::Literal(5),
                },
                Instruction::Print(Some(PrintArg::Var("sum".to_string()))),
            ],
        );
        p.initialize_memory(32, 16);
        run_to_completion(&p, &mm, 10);
        assert!(p.logs().contains(&"sum = 5".to_string()));
    }

    // ==================== Sleep ====================

    #[test]
    fn sleep_yields_with_remaining_ticks() {
        let tmp = make_temp_dir("proc_sleep");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![Instruction::Sleep(3), print("after")]);
        p.initialize_memory(32, 16);

        assert_eq!(p.execute_tick(&mm, 1, 0), TickOutcome::Waiting(3));
        assert_eq!(p.state(), ProcessState::Waiting);
        assert_eq!(p.remaining_sleep_ticks(), 3);

        // The timer stage wakes the process and clears the counter.
        p.clear_sleep();
        p.set_state(ProcessState::Ready);
        assert_eq!(p.execute_tick(&mm, 5, 0), TickOutcome::Finished);
        assert_eq!(p.logs(), vec!["after"]);
    }

    #[test]
    fn zero_sleep_is_a_no_op() {
        let tmp = make_temp_dir("proc_sleep0");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![Instruction::Sleep(0), print("next")]);
        p.initialize_memory(32, 16);
        assert_eq!(p.execute_tick(&mm, 1, 0), TickOutcome::Running);
        assert_eq!(p.execute_tick(&mm, 2, 0), TickOutcome::Finished);
        assert_eq!(p.logs(), vec!["next"]);
    }

    #[test]
    fn trailing_sleep_still_finishes() {
        let tmp = make_temp_dir("proc_sleep_end");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![Instruction::Sleep(5)]);
        p.initialize_memory(32, 16);
        // Finishing wins over parking in the sleep queue.
        assert_eq!(p.execute_tick(&mm, 1, 0), TickOutcome::Finished);
    }

    #[test]
    fn stale_sleep_counter_drains_one_tick_at_a_time() {
        let tmp = make_temp_dir("proc_sleep_drain");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![Instruction::Sleep(2), print("x")]);
        p.initialize_memory(32, 16);
        assert_eq!(p.execute_tick(&mm, 1, 0), TickOutcome::Waiting(2));
        // Without a timer wake, the counter drains on subsequent dispatches.
        assert_eq!(p.execute_tick(&mm, 2, 0), TickOutcome::Waiting(1));
        assert_eq!(p.execute_tick(&mm, 3, 0), TickOutcome::Ready);
        assert_eq!(p.execute_tick(&mm, 4, 0), TickOutcome::Finished);
    }

    // ==================== Delay ====================

    #[test]
    fn exec_delay_consumes_ticks_without_retiring() {
        let tmp = make_temp_dir("proc_delay");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![print("a"), print("b")]);
        p.initialize_memory(32, 16);

        assert_eq!(p.execute_tick(&mm, 1, 2), TickOutcome::Running); // retires a
        assert_eq!(p.executed_instructions(), 1);
        assert_eq!(p.execute_tick(&mm, 2, 2), TickOutcome::Running); // delay
        assert_eq!(p.execute_tick(&mm, 3, 2), TickOutcome::Running); // delay
        assert_eq!(p.executed_instructions(), 1);
        assert_eq!(p.execute_tick(&mm, 4, 2), TickOutcome::Finished); // retires b
        assert_eq!(p.executed_instructions(), 2);
    }

    // ==================== Paging ====================

    #[test]
    fn first_touch_faults_and_retry_succeeds() {
        let tmp = make_temp_dir("proc_fault");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "p1",
            vec![Instruction::Declare {
                var: "x".to_string(),
                value: Operand::Literal(3),
            }],
        );
        p.initialize_memory(32, 16);

        let outcome = p.execute_tick(&mm, 1, 0);
        assert_eq!(outcome, TickOutcome::BlockedPageFault(0));
        assert_eq!(p.state(), ProcessState::BlockedPageFault);
        assert_eq!(p.faulting_page(), 0);
        // Nothing retired; the instruction retries after the grant.
        assert_eq!(p.executed_instructions(), 0);
        assert_eq!(p.pc(), 0);

        let grant = mm.request_page(1, 0, false);
        p.update_page_table(0, grant.frame_idx);
        assert_eq!(p.execute_tick(&mm, 2, 0), TickOutcome::Finished);
        assert_eq!(p.executed_instructions(), 1);
    }

    #[test]
    fn read_write_round_trip_through_ram() {
        let tmp = make_temp_dir("proc_rw");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "p1",
            vec![
                Instruction::Write {
                    addr: 0x20,
                    value: Operand::Literal(777),
                },
                Instruction::Read {
                    var: "v".to_string(),
                    addr: 0x20,
                },
                Instruction::Print(Some(PrintArg::Var("v".to_string()))),
            ],
        );
        p.initialize_memory(64, 16);
        run_to_completion(&p, &mm, 20);
        assert!(p.logs().contains(&"v = 777".to_string()));
    }

    #[test]
    fn memory_stats_track_valid_and_disk_pages() {
        let tmp = make_temp_dir("proc_stats");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![print("x")]);
        p.initialize_memory(48, 16);
        assert_eq!(
            p.memory_stats(),
            MemoryStats {
                active_pages: 0,
                swap_pages: 0,
                total_pages: 3
            }
        );
        let g = mm.request_page(1, 0, false);
        p.update_page_table(0, g.frame_idx);
        p.invalidate_page(0);
        let stats = p.memory_stats();
        assert_eq!(stats.active_pages, 0);
        assert_eq!(stats.swap_pages, 1);
    }

    // ==================== Memory violation ====================

    #[test]
    fn out_of_range_read_terminates_with_log() {
        let tmp = make_temp_dir("proc_violation");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "rogue",
            vec![
                Instruction::Read {
                    var: "v".to_string(),
                    addr: 0x10000,
                },
                print("unreached"),
            ],
        );
        p.initialize_memory(32, 16);
        let sink = Arc::new(VecSink::new());
        p.set_event_sink(sink.clone());

        assert_eq!(p.execute_tick(&mm, 7, 0), TickOutcome::Finished);
        assert_eq!(p.state(), ProcessState::Finished);
        let logs = p.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("memory access violation"));
        assert!(logs[0].contains("0x10000 invalid"));
        assert_eq!(p.metrics().finished_tick, 7);

        // The violation is distinguishable from a normal completion on the
        // event stream.
        assert!(sink.events().iter().any(|e| matches!(
            e,
            SchedEvent::MemoryViolation {
                pid: 1,
                tick: 7,
                addr: 0x10000
            }
        )));
    }

    #[test]
    fn out_of_range_write_terminates_too() {
        let tmp = make_temp_dir("proc_violation_w");
        let mm = mm_with(4, 16, &tmp.path);
        let p = Process::new(
            1,
            "rogue",
            vec![Instruction::Write {
                addr: 0xFFFF0,
                value: Operand::Literal(1),
            }],
        );
        p.initialize_memory(32, 16);
        assert_eq!(p.execute_tick(&mm, 1, 0), TickOutcome::Finished);
        // Addresses render in lowercase hex.
        assert!(p.logs()[0].contains("0xffff0 invalid"));
    }

    // ==================== Latches and outcomes ====================

    #[test]
    fn finished_logged_latch_fires_once() {
        let p = Process::new(1, "p1", vec![]);
        assert!(p.try_mark_finished_logged());
        assert!(!p.try_mark_finished_logged());
    }

    #[test]
    fn outcome_yield_classification() {
        assert!(!TickOutcome::Running.is_yield());
        assert!(TickOutcome::Ready.is_yield());
        assert!(TickOutcome::Waiting(1).is_yield());
        assert!(TickOutcome::BlockedPageFault(0).is_yield());
        assert!(TickOutcome::Finished.is_yield());
    }

    #[test]
    fn empty_program_finishes_immediately() {
        let tmp = make_temp_dir("proc_empty");
        let mm = mm_with(2, 16, &tmp.path);
        let p = Process::new(1, "p1", vec![]);
        p.initialize_memory(16, 16);
        assert_eq!(p.execute_tick(&mm, 3, 0), TickOutcome::Finished);
        assert_eq!(p.metrics().finished_tick, 3);
    }
}

#[cfg(all(test, feature = "stdx-proptest"))]
mod property_tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use proptest::prelude::*;
    use std::time::UNIX_EPOCH;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// ADD/SUBTRACT always produce clamp16(a ± b).
        #[test]
        fn arithmetic_clamp_law(a in 0u16..=u16::MAX, b in 0u16..=u16::MAX, add in proptest::bool::ANY) {
            let mut dir = std::env::temp_dir();
            let stamp = std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            dir.push(format!("proc_prop_{}_{}", std::process::id(), stamp));
            let cfg = SchedulerConfig {
                max_overall_mem: 64,
                mem_per_frame: 16,
                backing_store_dir: dir.join("backing"),
                ..Default::default()
            };
            let mm = MemoryManager::new(&cfg).expect("memory manager");

            let inst = if add {
                Instruction::Add {
                    dst: "r".to_string(),
                    lhs: Operand::Literal(a),
                    rhs: Operand::Literal(b),
                }
            } else {
                Instruction::Subtract {
                    dst: "r".to_string(),
                    lhs: Operand::Literal(a),
                    rhs: Operand::Literal(b),
                }
            };
            let p = Process::new(1, "p", vec![inst]);
            p.initialize_memory(32, 16);

            let mut tick = 0;
            loop {
                tick += 1;
                match p.execute_tick(&mm, tick, 0) {
                    TickOutcome::Finished => break,
                    TickOutcome::BlockedPageFault(page) => {
                        let g = mm.request_page(1, page, p.is_page_on_disk(page));
                        p.update_page_table(page, g.frame_idx);
                    }
                    _ => {}
                }
                prop_assert!(tick < 20);
            }

            let expected = if add {
                clamp16(a as i64 + b as i64)
            } else {
                clamp16(a as i64 - b as i64)
            };
            // Read the result cell back through the still-resident page.
            let frame = p
                .resident_pages()
                .iter()
                .find(|(page, _)| *page == 0)
                .map(|(_, frame)| *frame)
                .expect("result page resident");
            prop_assert_eq!(mm.read_physical(frame, 0), expected);

            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}
