//! Forwarding statistics
//!
//! Counters kept by the forwarding pipeline across cycles.

/// Forwarding pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardMetrics {
    /// Cycles processed
    pub cycles: u64,
    /// Batches appended to the backlog
    pub batches_enqueued: u64,
    /// Batches dropped by drop-oldest eviction
    pub batches_evicted: u64,
    /// Batches confirmed delivered (or accepted in dry-run)
    pub batches_flushed: u64,
    /// Failed transmission attempts
    pub flush_failures: u64,
    /// Cycles where no point survived batching
    pub empty_cycles: u64,
    /// Backlog depth at the end of the last cycle
    pub backlog_depth: usize,
}

impl ForwardMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a cycle
    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    /// Record an enqueue, and an eviction if one happened
    pub fn record_enqueue(&mut self, evicted: bool) {
        self.batches_enqueued += 1;
        if evicted {
            self.batches_evicted += 1;
        }
    }

    /// Record a transmission attempt
    pub fn record_attempt(&mut self, success: bool) {
        if success {
            self.batches_flushed += 1;
        } else {
            self.flush_failures += 1;
        }
    }

    /// Record a cycle with nothing to forward
    pub fn record_empty(&mut self) {
        self.empty_cycles += 1;
    }

    /// Fraction of batches lost to eviction (0.0 - 1.0)
    pub fn loss_ratio(&self) -> f64 {
        if self.batches_enqueued == 0 {
            return 0.0;
        }
        self.batches_evicted as f64 / self.batches_enqueued as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut metrics = ForwardMetrics::new();
        metrics.record_cycle();
        metrics.record_enqueue(false);
        metrics.record_enqueue(true);
        metrics.record_attempt(true);
        metrics.record_attempt(false);
        metrics.record_empty();

        assert_eq!(metrics.cycles, 1);
        assert_eq!(metrics.batches_enqueued, 2);
        assert_eq!(metrics.batches_evicted, 1);
        assert_eq!(metrics.batches_flushed, 1);
        assert_eq!(metrics.flush_failures, 1);
        assert_eq!(metrics.empty_cycles, 1);
    }

    #[test]
    fn test_loss_ratio() {
        let mut metrics = ForwardMetrics::new();
        assert_eq!(metrics.loss_ratio(), 0.0);

        for i in 0..4 {
            metrics.record_enqueue(i == 0);
        }
        assert!((metrics.loss_ratio() - 0.25).abs() < 1e-9);

        metrics.reset();
        assert_eq!(metrics, ForwardMetrics::default());
    }
}
