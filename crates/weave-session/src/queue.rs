use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use weave_core::Event;

/// Bounded FIFO of inbound client events. Pushing into a full queue evicts
/// the oldest event.
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the evicted event, if any.
    pub fn push(&self, event: Event) -> Option<Event> {
        let mut events = self.events.lock();
        let evicted = if events.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            events.pop_front()
        } else {
            None
        };
        events.push_back(event);
        evicted
    }

    pub fn pop(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    pub fn drain(&self) -> Vec<Event> {
        self.events.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events evicted since the queue was created.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
