//! Bounded history of inbound payloads.
//!
//! Keeps the last N decoded frames with their receive time for diagnostics
//! and for consumers that mount after the traffic started.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Default number of retained messages.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// A received payload and the time it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedMessage {
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

/// Fixed-capacity FIFO ring. Once full, every push evicts the oldest entry.
///
/// A capacity of zero retains nothing.
pub struct MessageBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<BufferedMessage>>,
}

impl MessageBuffer {
    /// Create a buffer holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record `payload` stamped with the current time.
    pub fn push(&self, payload: Value) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(BufferedMessage {
            received_at: Utc::now(),
            payload,
        });
    }

    /// Copy of the most recent `count` messages, oldest first.
    ///
    /// `None` returns the whole buffer.
    pub fn snapshot(&self, count: Option<usize>) -> Vec<BufferedMessage> {
        let entries = self.entries.lock();
        let skip = match count {
            Some(n) => entries.len().saturating_sub(n),
            None => 0,
        };
        entries.iter().skip(skip).cloned().collect()
    }

    /// Most recently pushed message.
    pub fn latest(&self) -> Option<BufferedMessage> {
        self.entries.lock().back().cloned()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
