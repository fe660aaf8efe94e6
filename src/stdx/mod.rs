//! Small, self-contained concurrency primitives used across the emulator.
//!
//! # Scope
//! `stdx` hosts the narrow building blocks the scheduler is assembled from.
//! They are deliberately simple — mutex + condvar, no lock-free tricks — so
//! their blocking behavior is easy to reason about at tick granularity.
//!
//! # Module map
//! - `channel`: unbounded and bounded FIFO channels with snapshots.
//! - `sleep_queue`: thread-safe min-heap keyed by wake tick.
//! - `barrier`: cyclic barrier whose participants can drop out mid-run.

pub mod barrier;
pub mod channel;
pub mod sleep_queue;

pub use barrier::TickBarrier;
pub use channel::{BufferedChannel, Channel, FullPolicy, SnapshotLine};
pub use sleep_queue::{SleepEntry, SleepQueue};
