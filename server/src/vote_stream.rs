//! Bounded buffer of recently cast words feeding the live vote ticker.
//!
//! The buffer caps ticker traffic regardless of how fast votes arrive: when
//! it is full the oldest word is dropped, and the scheduler only drains a
//! fixed batch per stream interval.

use shared::PackedWord;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct VoteStream {
    queue: Mutex<VecDeque<PackedWord>>,
    capacity: usize,
}

impl VoteStream {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PackedWord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a word, evicting the oldest one when full.
    pub fn push(&self, word: PackedWord) {
        let mut queue = self.queue();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(word);
    }

    /// Removes and returns up to `max_count` of the oldest words.
    pub fn pop_batch(&self, max_count: usize) -> Vec<PackedWord> {
        let mut queue = self.queue();
        let count = max_count.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn clear(&self) {
        self.queue().clear();
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
