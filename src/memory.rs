//! Frame-based physical memory with FIFO replacement and a per-process
//! backing store.
//!
//! RAM is a flat byte vector carved into fixed-size frames. Each frame is
//! free or owned by one `(pid, page)` pair; in-use frames queue in FIFO order
//! and the queue head is always the eviction victim. Evicted dirty frames are
//! written to the owner's swap file at `backing_store/process_<pid>.swap`,
//! byte range `[page * frame_size, (page + 1) * frame_size)`.
//!
//! # Concurrency
//!
//! One mutex guards frames, bitmaps, the FIFO, and counters. `request_page`
//! is O(frames) and runs inside the scheduler's fault-service path, so it
//! must stay cheap. The lock is a leaf: no method here acquires any other
//! lock in the crate.
//!
//! # Failure model
//!
//! A missing swap file at load time is not an error (the page reads as
//! zeros). A failed swap write is surfaced as a diagnostic event and counted;
//! the emulator never fails a tick over backing-store I/O.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::SchedulerConfig;
use crate::events::{EventSink, NullSink, SchedEvent};

/// Owner of an in-use frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: u32,
    pub page: usize,
}

/// Result of a page request: the granted frame and, when the grant required
/// an eviction, the previous owner of that frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageGrant {
    pub frame_idx: usize,
    pub evicted: Option<FrameOwner>,
}

struct MmInner {
    ram: Vec<u8>,
    used: Vec<bool>,
    dirty: Vec<bool>,
    owners: Vec<FrameOwner>,
    /// In-use frames, oldest first. The head is the next victim.
    fifo: VecDeque<usize>,
    paged_in: u64,
    paged_out: u64,
    io_errors: u64,
}

/// Physical memory manager.
pub struct MemoryManager {
    frame_size: usize,
    backing_dir: PathBuf,
    sink: Arc<dyn EventSink>,
    inner: Mutex<MmInner>,
}

impl MemoryManager {
    /// Creates a manager sized from the config and ensures the backing-store
    /// directory exists.
    pub fn new(cfg: &SchedulerConfig) -> io::Result<Self> {
        Self::with_sink(cfg, Arc::new(NullSink))
    }

    /// Like [`MemoryManager::new`] with an explicit diagnostic sink.
    pub fn with_sink(cfg: &SchedulerConfig, sink: Arc<dyn EventSink>) -> io::Result<Self> {
        let frames = cfg.frame_count();
        assert!(frames > 0, "config yields zero frames");
        std::fs::create_dir_all(&cfg.backing_store_dir)?;
        Ok(Self {
            frame_size: cfg.mem_per_frame,
            backing_dir: cfg.backing_store_dir.clone(),
            sink,
            inner: Mutex::new(MmInner {
                ram: vec![0u8; cfg.max_overall_mem],
                used: vec![false; frames],
                dirty: vec![false; frames],
                owners: vec![FrameOwner { pid: 0, page: 0 }; frames],
                fifo: VecDeque::with_capacity(frames),
                paged_in: 0,
                paged_out: 0,
                io_errors: 0,
            }),
        })
    }

    /// Grants a frame for `(pid, page)`, evicting the oldest in-use frame if
    /// none is free.
    ///
    /// With `load_from_disk` the frame is filled from the caller's swap file
    /// (zero-padded on short read, all zeros if the file is missing);
    /// otherwise it is zero-filled.
    pub fn request_page(&self, pid: u32, page: usize, load_from_disk: bool) -> PageGrant {
        let mut inner = self.inner.lock().expect("memory manager mutex poisoned");
        let inner = &mut *inner;

        let (frame_idx, evicted) = match inner.used.iter().position(|&u| !u) {
            Some(free) => (free, None),
            None => {
                let victim = inner
                    .fifo
                    .pop_front()
                    .expect("all frames in use but FIFO empty");
                let owner = inner.owners[victim];
                if inner.dirty[victim] {
                    let start = victim * self.frame_size;
                    let bytes = &inner.ram[start..start + self.frame_size];
                    match save_frame(&self.backing_dir, self.frame_size, owner, bytes) {
                        Ok(()) => inner.paged_out += 1,
                        Err(e) => {
                            inner.io_errors += 1;
                            self.sink.emit(&SchedEvent::Diagnostic {
                                message: format!(
                                    "swap write failed for pid {} page {}: {e}",
                                    owner.pid, owner.page
                                ),
                            });
                        }
                    }
                }
                (victim, Some(owner))
            }
        };

        inner.owners[frame_idx] = FrameOwner { pid, page };
        inner.used[frame_idx] = true;
        inner.dirty[frame_idx] = false;

        let start = frame_idx * self.frame_size;
        inner.ram[start..start + self.frame_size].fill(0);
        if load_from_disk {
            let owner = FrameOwner { pid, page };
            let dst = &mut inner.ram[start..start + self.frame_size];
            if let Err(e) = load_frame(&self.backing_dir, self.frame_size, owner, dst) {
                inner.io_errors += 1;
                self.sink.emit(&SchedEvent::Diagnostic {
                    message: format!("swap read failed for pid {pid} page {page}: {e}"),
                });
            }
            inner.paged_in += 1;
        }

        inner.fifo.push_back(frame_idx);
        PageGrant { frame_idx, evicted }
    }

    /// Pushes one resident frame out of RAM on behalf of the medium-term
    /// stage (whole-process swap-out).
    ///
    /// On a dirty frame the contents are written back first; if that write
    /// fails the frame stays resident and dirty so a later attempt can
    /// succeed.
    pub fn evict_frame(&self, pid: u32, page: usize, frame_idx: usize) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("memory manager mutex poisoned");
        let inner = &mut *inner;
        if frame_idx >= inner.used.len()
            || !inner.used[frame_idx]
            || inner.owners[frame_idx] != (FrameOwner { pid, page })
        {
            // Stale request; the frame was already reassigned.
            return Ok(());
        }
        if inner.dirty[frame_idx] {
            let start = frame_idx * self.frame_size;
            let bytes = &inner.ram[start..start + self.frame_size];
            let res = save_frame(&self.backing_dir, self.frame_size, FrameOwner { pid, page }, bytes);
            if let Err(e) = res {
                inner.io_errors += 1;
                return Err(e);
            }
            inner.paged_out += 1;
        }
        inner.used[frame_idx] = false;
        inner.dirty[frame_idx] = false;
        inner.fifo.retain(|&f| f != frame_idx);
        Ok(())
    }

    /// Reads the little-endian 16-bit cell at `(frame, offset)`.
    pub fn read_physical(&self, frame_idx: usize, offset: usize) -> u16 {
        let inner = self.inner.lock().expect("memory manager mutex poisoned");
        let addr = frame_idx * self.frame_size + offset;
        if frame_idx >= inner.used.len() || addr + 1 >= inner.ram.len() {
            debug_assert!(false, "physical read out of range: frame {frame_idx} offset {offset}");
            self.sink.emit(&SchedEvent::Diagnostic {
                message: format!("physical read out of range: frame {frame_idx} offset {offset}"),
            });
            return 0;
        }
        u16::from_le_bytes([inner.ram[addr], inner.ram[addr + 1]])
    }

    /// Writes the little-endian 16-bit cell at `(frame, offset)` and marks
    /// the frame dirty.
    pub fn write_physical(&self, frame_idx: usize, offset: usize, value: u16) {
        let mut inner = self.inner.lock().expect("memory manager mutex poisoned");
        let addr = frame_idx * self.frame_size + offset;
        if frame_idx >= inner.used.len() || addr + 1 >= inner.ram.len() {
            debug_assert!(false, "physical write out of range: frame {frame_idx} offset {offset}");
            self.sink.emit(&SchedEvent::Diagnostic {
                message: format!("physical write out of range: frame {frame_idx} offset {offset}"),
            });
            return;
        }
        let bytes = value.to_le_bytes();
        inner.ram[addr] = bytes[0];
        inner.ram[addr + 1] = bytes[1];
        inner.dirty[frame_idx] = true;
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_frames(&self) -> usize {
        self.inner
            .lock()
            .expect("memory manager mutex poisoned")
            .used
            .len()
    }

    pub fn free_frames(&self) -> usize {
        self.inner
            .lock()
            .expect("memory manager mutex poisoned")
            .used
            .iter()
            .filter(|&&u| !u)
            .count()
    }

    pub fn paged_in(&self) -> u64 {
        self.inner.lock().expect("memory manager mutex poisoned").paged_in
    }

    pub fn paged_out(&self) -> u64 {
        self.inner.lock().expect("memory manager mutex poisoned").paged_out
    }

    pub fn io_errors(&self) -> u64 {
        self.inner.lock().expect("memory manager mutex poisoned").io_errors
    }

    /// `(frame, owner, dirty)` for every in-use frame, FIFO order.
    pub fn ram_state(&self) -> Vec<(usize, FrameOwner, bool)> {
        let inner = self.inner.lock().expect("memory manager mutex poisoned");
        inner
            .fifo
            .iter()
            .map(|&f| (f, inner.owners[f], inner.dirty[f]))
            .collect()
    }

    /// Path of a process's swap file.
    pub fn swap_path(&self, pid: u32) -> PathBuf {
        swap_path(&self.backing_dir, pid)
    }
}

fn swap_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("process_{pid}.swap"))
}

fn save_frame(dir: &Path, frame_size: usize, owner: FrameOwner, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(swap_path(dir, owner.pid))?;
    file.seek(SeekFrom::Start((owner.page * frame_size) as u64))?;
    file.write_all(bytes)
}

/// Fills `dst` from the owner's swap file. A missing file or short read
/// leaves the remainder zeroed (callers pre-zero the destination).
fn load_frame(dir: &Path, frame_size: usize, owner: FrameOwner, dst: &mut [u8]) -> io::Result<()> {
    let mut file = match File::open(swap_path(dir, owner.pid)) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start((owner.page * frame_size) as u64))?;
    let mut filled = 0;
    while filled < dst.len() {
        match file.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
