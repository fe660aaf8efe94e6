//! Structured scheduler events, output sinks, and JSONL encoder.
//!
//! The scheduler and memory manager emit [`SchedEvent`] values through an
//! [`EventSink`]. The default wiring is [`NullSink`] (no cost on the hot
//! path); [`JsonlEventSink`] serializes each event as a single JSON line and
//! writes it atomically to the underlying writer; [`VecSink`] buffers events
//! in memory for tests and diagnostics.
//!
//! # Wire format
//!
//! One JSON object per event followed by `\n`. Formatting happens into a
//! local buffer; the writer mutex is held only for the `write_all` call, so
//! events from concurrent workers are never interleaved at the byte level.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Structured event emitted during a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedEvent {
    /// A job left the job queue and became READY.
    Admitted { pid: u32, tick: u64, mem_bytes: usize },
    /// A process was assigned to a core.
    Dispatched { pid: u32, core: u32, tick: u64 },
    /// RR forced a process off its core.
    Preempted { pid: u32, core: u32, tick: u64 },
    /// A process entered the sleep queue.
    Slept { pid: u32, wake_tick: u64, tick: u64 },
    /// The timer stage returned a sleeper to READY.
    Woken { pid: u32, tick: u64 },
    /// A process yielded on a missing page.
    PageFault { pid: u32, page: usize, tick: u64 },
    /// The replacement policy pushed a page out of RAM.
    Evicted { pid: u32, page: usize, frame: usize },
    /// A process was terminated for touching an address outside the virtual
    /// address space.
    MemoryViolation { pid: u32, tick: u64, addr: u32 },
    /// A process retired its last instruction.
    Finished { pid: u32, tick: u64 },
    /// A periodic snapshot was pushed into the log ring.
    TickSnapshot { tick: u64 },
    /// A process had all resident pages written out.
    SwappedOut { pid: u32 },
    /// A swapped process was returned to READY.
    SwappedIn { pid: u32 },
    /// Non-fatal anomaly worth surfacing (I/O failure, dropped enqueue).
    Diagnostic { message: String },
}

/// Destination for scheduler events.
///
/// Implementations must tolerate concurrent `emit` calls from the scheduler
/// thread and every worker.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SchedEvent);
}

/// Discards every event.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SchedEvent) {}
}

/// Collects events in memory. Intended for tests.
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<SchedEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event emitted so far, in emission order.
    pub fn events(&self) -> Vec<SchedEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }
}

impl EventSink for VecSink {
    fn emit(&self, event: &SchedEvent) {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .push(event.clone());
    }
}

/// Serializes events as JSON lines into any writer.
pub struct JsonlEventSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink and returns the writer (flushing is the caller's
    /// concern).
    pub fn into_inner(self) -> W {
        self.writer.into_inner().expect("event sink mutex poisoned")
    }
}

impl<W: Write + Send> EventSink for JsonlEventSink<W> {
    fn emit(&self, event: &SchedEvent) {
        // Format outside the lock; hold it only for the atomic append.
        let mut buf = match serde_json::to_vec(event) {
            Ok(buf) => buf,
            Err(_) => return,
        };
        buf.push(b'\n');
        let mut w = self.writer.lock().expect("event sink mutex poisoned");
        // Event loss on a broken sink is acceptable; the emulator must not
        // fail a tick over diagnostics.
        let _ = w.write_all(&buf);
    }
}
