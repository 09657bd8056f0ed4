//! # Ready Queue
//!
//! Strict FIFO of Running threads. While a thread other than the idle thread
//! runs, it sits at the head; yielding rotates it to the tail.

use crate::ThreadId;
use alloc::collections::VecDeque;

/// Simple FIFO run queue
#[derive(Debug, Default)]
pub struct FifoQueue {
    queue: VecDeque<ThreadId>,
}

impl FifoQueue {
    /// Create a new FIFO queue
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append at the tail
    pub fn enqueue(&mut self, id: ThreadId) {
        self.queue.push_back(id);
    }

    /// Head of the queue
    pub fn peek(&self) -> Option<ThreadId> {
        self.queue.front().copied()
    }

    /// Move the head to the tail
    pub fn rotate(&mut self) {
        if let Some(head) = self.queue.pop_front() {
            self.queue.push_back(head);
        }
    }

    /// Whether `id` is queued
    pub fn contains(&self, id: ThreadId) -> bool {
        self.queue.contains(&id)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove `id` wherever it is
    pub fn remove(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.queue.iter().position(|&x| x == id) {
            self.queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Queued threads, head first
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queue.iter().copied()
    }
}
