//! Thread-safe FIFO channels.
//!
//! Two flavors:
//! - [`Channel`] — unbounded; `send` never blocks, `receive` blocks until an
//!   element arrives. The scheduler loop itself only ever uses the
//!   non-blocking `try_receive` / `is_empty` pair so it can never park inside
//!   its own tick.
//! - [`BufferedChannel`] — bounded with a mode switch: block-on-full senders
//!   or overwrite-oldest. Capacity and mode can change at runtime; both
//!   transitions wake any parked senders.
//!
//! All queues expose an O(n) [`snapshot`](Channel::snapshot) that renders one
//! line per element while holding the queue lock.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Renders one element of a queue snapshot.
pub trait SnapshotLine {
    fn snapshot_line(&self) -> String;
}

impl SnapshotLine for String {
    fn snapshot_line(&self) -> String {
        self.clone()
    }
}

/// Maximum elements rendered per snapshot before eliding the tail.
const SNAPSHOT_LIMIT: usize = 10;

fn render_snapshot<'a, T: SnapshotLine + 'a>(iter: impl Iterator<Item = &'a T>, len: usize) -> String {
    let mut out = String::new();
    for item in iter.take(SNAPSHOT_LIMIT) {
        out.push_str(&item.snapshot_line());
        out.push('\n');
    }
    if len > SNAPSHOT_LIMIT {
        out.push_str(&format!("... ({} more)\n", len - SNAPSHOT_LIMIT));
    }
    out
}

// ============================================================================
// Unbounded channel
// ============================================================================

/// Unbounded multi-producer multi-consumer FIFO.
pub struct Channel<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends an element. Never blocks.
    pub fn send(&self, item: T) {
        let mut q = self.queue.lock().expect("channel mutex poisoned");
        q.push_back(item);
        drop(q);
        self.available.notify_one();
    }

    /// Blocks until an element is available, then removes and returns it.
    pub fn receive(&self) -> T {
        let mut q = self.queue.lock().expect("channel mutex poisoned");
        loop {
            if let Some(item) = q.pop_front() {
                return item;
            }
            q = self.available.wait(q).expect("channel mutex poisoned");
        }
    }

    /// Removes and returns the front element if one is present.
    pub fn try_receive(&self) -> Option<T> {
        self.queue
            .lock()
            .expect("channel mutex poisoned")
            .pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("channel mutex poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("channel mutex poisoned").len()
    }
}

impl<T: SnapshotLine> Channel<T> {
    /// One line per queued element, oldest first.
    pub fn snapshot(&self) -> String {
        let q = self.queue.lock().expect("channel mutex poisoned");
        render_snapshot(q.iter(), q.len())
    }
}

// ============================================================================
// Bounded channel
// ============================================================================

/// What a bounded channel does with senders when it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FullPolicy {
    /// Senders wait for space.
    Block,
    /// The oldest element is dropped to make room.
    Overwrite,
}

struct BufInner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    policy: FullPolicy,
}

/// Bounded FIFO with a runtime-switchable full-queue policy.
pub struct BufferedChannel<T> {
    inner: Mutex<BufInner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BufferedChannel<T> {
    /// Creates a channel holding at most `capacity` elements.
    pub fn new(capacity: usize, policy: FullPolicy) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            inner: Mutex::new(BufInner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                policy,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Appends an element, blocking or overwriting per the current policy.
    pub fn send(&self, item: T) {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        loop {
            if inner.queue.len() < inner.capacity {
                break;
            }
            match inner.policy {
                FullPolicy::Overwrite => {
                    inner.queue.pop_front();
                    break;
                }
                FullPolicy::Block => {
                    inner = self.not_full.wait(inner).expect("channel mutex poisoned");
                }
            }
        }
        inner.queue.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Blocks until an element is available.
    pub fn receive(&self) -> T {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        loop {
            if let Some(item) = inner.queue.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return item;
            }
            inner = self.not_empty.wait(inner).expect("channel mutex poisoned");
        }
    }

    /// Removes and returns the front element if one is present.
    pub fn try_receive(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        let item = inner.queue.pop_front();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Shrinks (or grows) the capacity, dropping the oldest elements until
    /// the queue fits. Wakes any parked senders.
    pub fn set_capacity(&self, capacity: usize) {
        assert!(capacity > 0, "capacity must be > 0");
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        inner.capacity = capacity;
        while inner.queue.len() > capacity {
            inner.queue.pop_front();
        }
        drop(inner);
        self.not_full.notify_all();
    }

    /// Switches the full-queue policy. Wakes any parked senders so they can
    /// re-evaluate under the new mode.
    pub fn set_policy(&self, policy: FullPolicy) {
        let mut inner = self.inner.lock().expect("channel mutex poisoned");
        inner.policy = policy;
        drop(inner);
        self.not_full.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("channel mutex poisoned")
            .queue
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("channel mutex poisoned").queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("channel mutex poisoned").capacity
    }
}

impl<T: SnapshotLine> BufferedChannel<T> {
    /// One line per queued element, oldest first.
    pub fn snapshot(&self) -> String {
        let inner = self.inner.lock().expect("channel mutex poisoned");
        render_snapshot(inner.queue.iter(), inner.queue.len())
    }

    /// Concatenation of every queued element, oldest first, without eliding.
    pub fn snapshot_all(&self) -> String {
        let inner = self.inner.lock().expect("channel mutex poisoned");
        let mut out = String::new();
        for item in inner.queue.iter() {
            out.push_str(&item.snapshot_line());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    // ==================== Channel ====================

    #[test]
    fn channel_fifo_order() {
        let ch = Channel::new();
        for i in 0..5 {
            ch.send(i);
        }
        for i in 0..5 {
            assert_eq!(ch.try_receive(), Some(i));
        }
        assert!(ch.is_empty());
        assert_eq!(ch.try_receive(), None);
    }

    #[test]
    fn channel_blocking_receive_wakes() {
        let ch = Arc::new(Channel::new());
        let producer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                ch.send(7u32);
            })
        };
        assert_eq!(ch.receive(), 7);
        producer.join().unwrap();
    }

    #[test]
    fn channel_snapshot_elides_tail() {
        let ch = Channel::new();
        for i in 0..15 {
            ch.send(format!("line{i}"));
        }
        let snap = ch.snapshot();
        assert!(snap.contains("line0"));
        assert!(snap.contains("... (5 more)"));
        assert!(!snap.contains("line12"));
    }

    // ==================== BufferedChannel ====================

    #[test]
    fn buffered_overwrite_drops_oldest() {
        let ch = BufferedChannel::new(3, FullPolicy::Overwrite);
        for i in 0..5 {
            ch.send(i);
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.try_receive(), Some(2));
        assert_eq!(ch.try_receive(), Some(3));
        assert_eq!(ch.try_receive(), Some(4));
    }

    #[test]
    fn buffered_block_waits_for_space() {
        let ch = Arc::new(BufferedChannel::new(1, FullPolicy::Block));
        ch.send(1);
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(2))
        };
        thread::sleep(Duration::from_millis(20));
        // Sender is parked; draining makes room.
        assert_eq!(ch.try_receive(), Some(1));
        sender.join().unwrap();
        assert_eq!(ch.try_receive(), Some(2));
    }

    #[test]
    fn buffered_set_capacity_shrinks_and_wakes() {
        let ch = Arc::new(BufferedChannel::new(2, FullPolicy::Block));
        ch.send(1);
        ch.send(2);
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(3))
        };
        thread::sleep(Duration::from_millis(20));
        // Shrinking to 1 drops the oldest and still leaves no room, but the
        // subsequent policy flip lets the parked sender finish by overwrite.
        ch.set_capacity(1);
        ch.set_policy(FullPolicy::Overwrite);
        sender.join().unwrap();
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.try_receive(), Some(3));
    }

    #[test]
    fn buffered_snapshot_all_keeps_everything() {
        let ch = BufferedChannel::new(4, FullPolicy::Overwrite);
        ch.send("a\n".to_string());
        ch.send("b\n".to_string());
        assert_eq!(ch.snapshot_all(), "a\nb\n");
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn buffered_zero_capacity_panics() {
        let _ = BufferedChannel::<u32>::new(0, FullPolicy::Block);
    }
}

#[cfg(all(test, feature = "stdx-proptest"))]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Channel matches a VecDeque model under any push/pop interleaving.
        #[test]
        fn channel_model(ops in prop::collection::vec(prop::option::of(0u32..100), 1..200)) {
            let ch = Channel::new();
            let mut model: VecDeque<u32> = VecDeque::new();
            for op in ops {
                match op {
                    Some(v) => {
                        ch.send(v);
                        model.push_back(v);
                    }
                    None => {
                        prop_assert_eq!(ch.try_receive(), model.pop_front());
                    }
                }
                prop_assert_eq!(ch.len(), model.len());
            }
        }

        /// Overwrite mode always retains the newest `cap` elements.
        #[test]
        fn overwrite_keeps_newest(cap in 1usize..8, values in prop::collection::vec(0u32..1000, 0..40)) {
            let ch = BufferedChannel::new(cap, FullPolicy::Overwrite);
            for &v in &values {
                ch.send(v);
            }
            let keep = values.len().saturating_sub(cap);
            for expected in &values[keep..] {
                prop_assert_eq!(ch.try_receive(), Some(*expected));
            }
            prop_assert!(ch.is_empty());
        }
    }
}
