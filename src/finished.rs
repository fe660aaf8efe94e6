//! Bounded, newest-first log of finished processes.
//!
//! Each process is recorded at most once: the per-process `finished_logged`
//! latch is claimed atomically before insertion, so double releases (e.g. a
//! process finishing in the same step its quantum expires) cannot duplicate
//! an entry. When the capacity is reached the oldest record is evicted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::process::Process;
use crate::util::fmt_clock_time;

/// One finished-process record.
#[derive(Clone)]
pub struct FinishedRecord {
    pub finished_tick: u64,
    pub finished_at: SystemTime,
    pub process: Arc<Process>,
}

struct FinishedInner {
    /// Oldest first; rendered newest first.
    records: VecDeque<FinishedRecord>,
    capacity: usize,
}

/// The scheduler's finished log.
pub struct FinishedMap {
    inner: Mutex<FinishedInner>,
}

impl FinishedMap {
    /// Unbounded log.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Log bounded to `capacity` records; the oldest are evicted first.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            inner: Mutex::new(FinishedInner {
                records: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Records a finished process. Returns `false` if it was already logged.
    pub fn insert(&self, process: Arc<Process>, finished_tick: u64) -> bool {
        if !process.try_mark_finished_logged() {
            return false;
        }
        let mut inner = self.inner.lock().expect("finished map mutex poisoned");
        inner.records.push_back(FinishedRecord {
            finished_tick,
            finished_at: SystemTime::now(),
            process,
        });
        while inner.records.len() > inner.capacity {
            inner.records.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("finished map mutex poisoned")
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("finished map mutex poisoned")
            .records
            .clear();
    }

    /// Drops the oldest records until at most `capacity` remain.
    pub fn trim_to(&self, capacity: usize) {
        let mut inner = self.inner.lock().expect("finished map mutex poisoned");
        while inner.records.len() > capacity {
            inner.records.pop_front();
        }
    }

    /// Records newest first.
    pub fn ordered(&self) -> Vec<FinishedRecord> {
        let inner = self.inner.lock().expect("finished map mutex poisoned");
        inner.records.iter().rev().cloned().collect()
    }

    /// Most recently finished record with this name, if any.
    pub fn get_by_name(&self, name: &str) -> Option<FinishedRecord> {
        let inner = self.inner.lock().expect("finished map mutex poisoned");
        inner
            .records
            .iter()
            .rev()
            .find(|r| r.process.name() == name)
            .cloned()
    }

    pub fn contains(&self, pid: u32) -> bool {
        let inner = self.inner.lock().expect("finished map mutex poisoned");
        inner.records.iter().any(|r| r.process.id() == pid)
    }

    /// Table-style snapshot, newest first.
    pub fn snapshot(&self) -> String {
        let inner = self.inner.lock().expect("finished map mutex poisoned");
        if inner.records.is_empty() {
            return String::new();
        }
        let mut out =
            String::from("Finished Time\tName\tProgress\tTick\n------------------------------------\n");
        const LIMIT: usize = 10;
        for rec in inner.records.iter().rev().take(LIMIT) {
            let m = rec.process.metrics();
            out.push_str(&format!(
                "{}\t{}\t{} / {}\t{}\n",
                fmt_clock_time(rec.finished_at),
                rec.process.name(),
                m.executed_instructions,
                m.total_instructions,
                rec.finished_tick,
            ));
        }
        if inner.records.len() > LIMIT {
            out.push_str(&format!("... ({} more)\n", inner.records.len() - LIMIT));
        }
        out
    }
}

impl Default for FinishedMap {
    fn default() -> Self {
        Self::new()
    }
}
