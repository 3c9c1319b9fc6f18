//! Single-slot "latest frame wins" handoff.
//!
//! The producer never blocks: a new frame replaces whatever the worker has
//! not picked up yet. The worker blocks until a frame arrives or the slot is
//! closed.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

pub struct LatestFrameSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Stores `value`, returning the undelivered value it displaced.
    /// After [`close`](Self::close) the value is handed straight back.
    pub fn push(&self, value: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(value);
        }
        let displaced = state.value.replace(value);
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(state);
        self.ready.notify_one();
        displaced
    }

    /// Blocks until a value is available. Returns `None` once closed.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(value) = state.value.take() {
                return Some(value);
            }
            self.ready.wait(&mut state);
        }
    }

    pub fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.value.take()
    }

    /// Wakes every waiter; pending and future values are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.value = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of values replaced before the worker saw them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn newer_value_replaces_pending_one() {
        let slot = LatestFrameSlot::new();
        assert_eq!(slot.push(1), None);
        assert_eq!(slot.push(2), Some(1));
        assert_eq!(slot.push(3), Some(2));
        assert_eq!(slot.dropped(), 2);
        assert_eq!(slot.try_take(), Some(3));
        assert_eq!(slot.try_take(), None);
    }

    #[test]
    fn take_blocks_until_push() {
        let slot = Arc::new(LatestFrameSlot::new());
        let worker = {
            let slot = slot.clone();
            thread::spawn(move || slot.take())
        };
        thread::sleep(Duration::from_millis(20));
        slot.push(7u32);
        assert_eq!(worker.join().unwrap(), Some(7));
    }

    #[test]
    fn close_releases_waiters_and_rejects_pushes() {
        let slot = Arc::new(LatestFrameSlot::<u32>::new());
        let worker = {
            let slot = slot.clone();
            thread::spawn(move || slot.take())
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(worker.join().unwrap(), None);
        assert!(slot.is_closed());
        assert_eq!(slot.push(1), Some(1));
        assert_eq!(slot.try_take(), None);
    }

    #[test]
    fn consumer_only_sees_increasing_values() {
        let slot = Arc::new(LatestFrameSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..5_000u64 {
                    slot.push(i);
                }
                slot.push(u64::MAX);
            })
        };

        let mut last = None;
        while let Some(v) = slot.take() {
            if let Some(prev) = last {
                assert!(v > prev);
            }
            last = Some(v);
            if v == u64::MAX {
                break;
            }
        }
        producer.join().unwrap();
        assert_eq!(last, Some(u64::MAX));
    }
}
