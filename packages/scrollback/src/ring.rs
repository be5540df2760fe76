use std::collections::VecDeque;

/// A fixed-capacity ring of line events. Once full, each write overwrites
/// the oldest entry; reads are oldest-first snapshots.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// O(1) insert, evicting the oldest entry once at capacity.
    pub fn write(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Snapshot of all retained entries, oldest first.
    pub fn read_all(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
