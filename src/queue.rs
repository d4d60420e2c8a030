//! Bounded packet queue — the queue primitive every dispatch path moves
//! items through.
//!
//! Internally synchronized so producer threads can enqueue while the worker
//! drains; items transfer by value, so an item is owned by exactly one queue
//! (or one holder) at any time. A failed enqueue drops the item, which
//! releases any frame it carries.
//!
//! [`QueueError::Fault`] maps lock poisoning — the Rust analogue of the
//! queue-corruption class the worker escalates as fatal.

use core::fmt;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Queue operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at capacity.
    Full,
    /// Queue has no items.
    Empty,
    /// No item matched the predicate.
    NotFound,
    /// The queue's internal state is unusable (poisoned lock).
    Fault,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
            Self::Empty => write!(f, "queue empty"),
            Self::NotFound => write!(f, "no matching item"),
            Self::Fault => write!(f, "queue fault"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Bounded FIFO with predicate removal.
pub struct PacketQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `item`. On `Full`/`Fault` the item is dropped.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let mut q = self.inner.lock().map_err(|_| QueueError::Fault)?;
        if q.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        q.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item.
    pub fn dequeue(&self) -> Result<T, QueueError> {
        let mut q = self.inner.lock().map_err(|_| QueueError::Fault)?;
        q.pop_front().ok_or(QueueError::Empty)
    }

    /// Remove and return the first item matching `pred`, preserving the
    /// order of the rest.
    pub fn remove_matching(&self, mut pred: impl FnMut(&T) -> bool) -> Result<T, QueueError> {
        let mut q = self.inner.lock().map_err(|_| QueueError::Fault)?;
        if q.is_empty() {
            return Err(QueueError::Empty);
        }
        match q.iter().position(&mut pred) {
            Some(idx) => q.remove(idx).ok_or(QueueError::Fault),
            None => Err(QueueError::NotFound),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|q| q.is_empty()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Drain every item through `flush`. Items are moved out under the lock
    /// first so `flush` runs without holding it.
    pub fn drain_with(&self, mut flush: impl FnMut(T)) {
        let drained = {
            match self.inner.lock() {
                Ok(mut q) => std::mem::take(&mut *q),
                Err(_) => return,
            }
        };
        for item in drained {
            flush(item);
        }
    }
}
