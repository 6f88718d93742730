// Bounded insertion-ordered buffer with strict FIFO eviction.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    entries: VecDeque<T>,
    /// Total appends since construction; survives `clear`.
    appended_total: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            appended_total: 0,
        }
    }

    /// Appends one entry; returns the single evicted oldest entry when over capacity.
    pub fn append(&mut self, item: T) -> Option<T> {
        self.entries.push_back(item);
        self.appended_total += 1;
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops all but the most recent `keep` entries.
    pub fn retain_last(&mut self, keep: usize) {
        let len = self.entries.len();
        if len > keep {
            self.entries.drain(..len - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn appended_total(&self) -> u64 {
        self.appended_total
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }
}

impl<T> Extend<T> for RingBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.append(item);
        }
    }
}
