//! Bounded FIFO of pending batches
//!
//! Arrival order is transmission order. When full, pushing evicts the
//! oldest batch (drop-oldest); batches only leave the head after a
//! confirmed transmission.

use crate::batch::PendingBatch;
use std::collections::VecDeque;

/// Default capacity (`Qmax`)
pub const DEFAULT_BACKLOG_CAPACITY: usize = 120;

/// Bounded queue of batches awaiting transmission
#[derive(Debug, Clone)]
pub struct Backlog {
    queue: VecDeque<PendingBatch>,
    capacity: usize,
}

impl Backlog {
    /// Create a backlog holding at most `capacity` batches (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a batch, evicting and returning the oldest one if full
    pub fn push(&mut self, batch: PendingBatch) -> Option<PendingBatch> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(batch);
        evicted
    }

    /// Oldest pending batch
    pub fn front(&self) -> Option<&PendingBatch> {
        self.queue.front()
    }

    /// Remove the oldest batch after it was delivered
    pub fn pop_front(&mut self) -> Option<PendingBatch> {
        self.queue.pop_front()
    }

    /// Number of pending batches
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of pending batches
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the next push will evict
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &PendingBatch> {
        self.queue.iter()
    }

    /// Drop everything pending
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::build_batch;
    use crate::error::TransportError;
    use crate::register::RegisterSpec;
    use crate::source::{RegisterBank, RegisterSource};
    use chrono::{TimeZone, Utc};

    struct Const(u16);

    impl RegisterSource for Const {
        fn read(&mut self, _address: u16, _word_count: u16) -> Result<Vec<u8>, TransportError> {
            Ok(self.0.to_be_bytes().to_vec())
        }
    }

    fn batch(value: u16) -> PendingBatch {
        let bank = RegisterBank::from_specs(vec![RegisterSpec::parse("1:1:v:1:U16:_", 1).unwrap()]);
        bank.read_all(&mut Const(value));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        build_batch(bank.registers(), "", now).unwrap()
    }

    fn values(backlog: &Backlog) -> Vec<String> {
        backlog
            .iter()
            .map(|b| b.body().split(' ').nth(1).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_push_within_capacity() {
        let mut backlog = Backlog::new(3);
        assert!(backlog.push(batch(1)).is_none());
        assert!(backlog.push(batch(2)).is_none());
        assert_eq!(backlog.len(), 2);
        assert!(!backlog.is_full());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut backlog = Backlog::new(3);
        for v in 1..=3 {
            backlog.push(batch(v));
        }
        assert!(backlog.is_full());

        let evicted = backlog.push(batch(4)).unwrap();
        assert!(evicted.body().contains("v=1"));
        assert_eq!(backlog.len(), 3);
        assert_eq!(values(&backlog), vec!["v=2", "v=3", "v=4"]);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut backlog = Backlog::new(5);
        for v in 0..50 {
            backlog.push(batch(v));
            assert!(backlog.len() <= backlog.capacity());
        }
        assert_eq!(values(&backlog), vec!["v=45", "v=46", "v=47", "v=48", "v=49"]);
    }

    #[test]
    fn test_pop_front_is_fifo() {
        let mut backlog = Backlog::new(3);
        backlog.push(batch(1));
        backlog.push(batch(2));
        assert!(backlog.front().unwrap().body().contains("v=1"));
        assert!(backlog.pop_front().unwrap().body().contains("v=1"));
        assert!(backlog.pop_front().unwrap().body().contains("v=2"));
        assert!(backlog.pop_front().is_none());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut backlog = Backlog::new(0);
        assert_eq!(backlog.capacity(), 1);
        backlog.push(batch(1));
        assert!(backlog.push(batch(2)).is_some());
        assert_eq!(backlog.len(), 1);
    }
}
