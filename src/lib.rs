//! Tick-driven multi-core process-scheduler emulator with demand paging.
//!
//! The emulator runs synthetic "processes" — flat sequences of primitive
//! instructions (PRINT, DECLARE, ADD, SUBTRACT, SLEEP, READ, WRITE) — on a
//! configurable number of simulated CPU cores. Time is measured in abstract
//! ticks; one barrier cycle equals one tick.
//!
//! # Architecture
//!
//! ```text
//!  submit_process()          ┌──────────────────────────────────────────────┐
//!  (any thread) ────────────►│                  Scheduler                   │
//!                            │                                              │
//!   job queue ──admit──► ready set ──dispatch──► running slots (per core)   │
//!        ▲                     ▲                     │                      │
//!        │              timer  │              ┌──────┴──────┐               │
//!        │             wakeups │              │  CPU worker │ × num_cpu     │
//!        │                     │              │  (1 thread) │               │
//!   sleep queue ◄──SLEEP───────┴──────────────┤ execute one │               │
//!   blocked queue ◄──page fault───────────────┤ tick step   │               │
//!        │                                    └─────────────┘               │
//!        └──medium-term──► MemoryManager (frames, FIFO, backing store)      │
//!                            └──────────────────────────────────────────────┘
//! ```
//!
//! Each tick the scheduler and every worker rendezvous at three barriers:
//! workers execute exactly one step of their assigned process between B1 and
//! B2, the scheduler runs its timer / medium-term / preemption / admission /
//! dispatch phases between B2 and B3, and everyone sleeps the configured tick
//! delay after B3. See [`scheduler`] for the precise protocol.
//!
//! # Module map
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`instruction`] | Instruction variants and the FOR unroller |
//! | [`process`] | Per-process state, page table, one-tick step function |
//! | [`memory`] | Physical frames, FIFO replacement, per-process swap files |
//! | [`policy`] | FCFS / RR / PRIORITY ordering of the ready set |
//! | [`ready_queue`] | Policy-sorted multiset of dispatchable processes |
//! | [`finished`] | Bounded newest-first log of finished processes |
//! | [`stdx`] | Channels, sleep queue, droppable tick barrier |
//! | [`scheduler`] | Tick loop, queues, workers, barriers |
//! | [`events`] | Structured scheduler events and JSONL sink |
//! | [`config`] | Run configuration and validation |

pub mod config;
pub mod events;
pub mod finished;
pub mod instruction;
pub mod memory;
pub mod policy;
pub mod process;
pub mod ready_queue;
pub mod scheduler;
pub mod stdx;
mod util;

pub use config::{ConfigError, SchedulerConfig};
pub use events::{EventSink, JsonlEventSink, NullSink, SchedEvent, VecSink};
pub use finished::{FinishedMap, FinishedRecord};
pub use instruction::{unroll, unrolled_len, Instruction, Operand, PrintArg, FOR_MAX_NESTING};
pub use memory::{FrameOwner, MemoryManager, PageGrant};
pub use policy::SchedulingPolicy;
pub use process::{MemoryStats, PageEntry, Process, ProcessMetrics, ProcessState, TickOutcome};
pub use ready_queue::ReadyQueue;
pub use scheduler::{BuildError, CpuUtilization, Scheduler};
