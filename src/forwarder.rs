//! Telemetry buffering and forwarding pipeline
//!
//! One [`Forwarder::process`] call per sampling cycle:
//!
//! 1. build a [`PendingBatch`] from the cycle's registers
//! 2. append it to the bounded [`Backlog`], evicting the oldest if full
//! 3. transmit from the head of the backlog, stopping at the first failure,
//!    with at most `max_flush_per_cycle` attempts
//! 4. report what happened through the status [`Sink`]
//!
//! Nothing here is fatal; every failure becomes a status line and either a
//! stalled backlog or a dropped oldest batch.

use crate::backlog::{Backlog, DEFAULT_BACKLOG_CAPACITY};
use crate::batch::{build_batch, PendingBatch};
use crate::error::FlushError;
use crate::metrics::ForwardMetrics;
use crate::sink::Sink;
use crate::source::Register;
use crate::transport::{redact_endpoint, Transport, CONTENT_TYPE, REDACTED_ENDPOINT};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default transmission attempts per cycle (`MaxFlushPerCycle`)
pub const DEFAULT_MAX_FLUSH_PER_CYCLE: usize = 12;

/// Forwarding pipeline configuration
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Backlog capacity (`Qmax`)
    pub max_backlog: usize,
    /// Transmission attempts shared by one cycle's flush loop
    pub max_flush_per_cycle: usize,
    /// Emit the would-be request instead of sending it
    pub dry_run: bool,
    /// Comma-separated `key=value` tags added to every line
    pub tags: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            max_backlog: DEFAULT_BACKLOG_CAPACITY,
            max_flush_per_cycle: DEFAULT_MAX_FLUSH_PER_CYCLE,
            dry_run: false,
            tags: String::new(),
        }
    }
}

impl ForwarderConfig {
    /// Configuration with the given tags and default limits
    pub fn with_tags(tags: impl Into<String>) -> Self {
        Self {
            tags: tags.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one forwarding cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// A new batch was appended
    pub enqueued: bool,
    /// The oldest batch was dropped to make room
    pub evicted: bool,
    /// Batches pending before the flush loop
    pub pending_at_start: usize,
    /// Transmission attempts made
    pub attempts: usize,
    /// Batches delivered and popped
    pub flushed: usize,
    /// Backlog depth after the cycle
    pub remaining: usize,
    /// First failure, which stopped the flush loop
    pub failure: Option<FlushError>,
}

impl CycleReport {
    /// Whether the cycle drained part of an older backlog
    pub fn is_recovery(&self) -> bool {
        self.pending_at_start > 1 && self.flushed > 0
    }
}

#[derive(Debug)]
struct ForwarderState {
    backlog: Backlog,
    metrics: ForwardMetrics,
}

/// Bounded, retrying forwarder to a remote write endpoint
pub struct Forwarder {
    config: ForwarderConfig,
    transport: Box<dyn Transport>,
    status: Arc<dyn Sink>,
    // Serializes cycles; the state lock is only taken briefly so readers of
    // the counters never wait on the network.
    cycle: Mutex<()>,
    state: Mutex<ForwarderState>,
}

impl Forwarder {
    /// Create a forwarder sending through `transport` and reporting to `status`
    pub fn new(config: ForwarderConfig, transport: Box<dyn Transport>, status: Arc<dyn Sink>) -> Self {
        let backlog = Backlog::new(config.max_backlog);
        Self {
            config,
            transport,
            status,
            cycle: Mutex::new(()),
            state: Mutex::new(ForwarderState {
                backlog,
                metrics: ForwardMetrics::new(),
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ForwarderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counter snapshot
    pub fn metrics(&self) -> ForwardMetrics {
        self.state().metrics.clone()
    }

    /// Pending batches
    pub fn backlog_len(&self) -> usize {
        self.state().backlog.len()
    }

    /// Copy of the pending batch bodies, oldest first
    pub fn pending(&self) -> Vec<PendingBatch> {
        self.state().backlog.iter().cloned().collect()
    }

    fn report(&self, line: &str) {
        self.status.write_text(&redact_endpoint(line, self.transport.endpoint()));
    }

    /// Run one forwarding cycle for `registers` as of `now`
    pub fn process(&self, registers: &[Register], now: DateTime<Utc>) -> CycleReport {
        let _cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner());
        let mut report = CycleReport::default();

        let batch = build_batch(registers, &self.config.tags, now);

        {
            let mut state = self.state();
            state.metrics.record_cycle();

            let batch = match batch {
                Some(batch) => batch,
                None => {
                    state.metrics.record_empty();
                    report.remaining = state.backlog.len();
                    state.metrics.backlog_depth = report.remaining;
                    drop(state);
                    self.report("ERR forward: no points to write");
                    return report;
                }
            };

            let evicted = state.backlog.push(batch);
            report.enqueued = true;
            report.evicted = evicted.is_some();
            state.metrics.record_enqueue(report.evicted);
            report.pending_at_start = state.backlog.len();
        }

        if report.evicted {
            let capacity = self.config.max_backlog.max(1);
            warn!("forward backlog full ({}), dropped oldest batch", capacity);
            self.report(&format!(
                "WARN forward: backlog full [{}], dropped oldest batch",
                capacity
            ));
        }

        self.flush(&mut report);

        let remaining = {
            let mut state = self.state();
            state.metrics.backlog_depth = state.backlog.len();
            state.backlog.len()
        };
        report.remaining = remaining;

        if let Some(ref err) = report.failure {
            self.report(&format!(
                "ERR forward: qsize={} req={} {}",
                remaining, report.attempts, err
            ));
        }
        if report.is_recovery() {
            self.report(&format!(
                "OK forward: qsize={} flushed={}",
                remaining, report.flushed
            ));
        }

        report
    }

    fn flush(&self, report: &mut CycleReport) {
        while report.attempts < self.config.max_flush_per_cycle {
            let body = match self.state().backlog.front() {
                Some(batch) => batch.body().to_string(),
                None => break,
            };

            report.attempts += 1;
            let result = self.transmit(&body);
            debug!(
                "flush attempt {} ({} bytes): {}",
                report.attempts,
                body.len(),
                if result.is_ok() { "ok" } else { "failed" }
            );

            let mut state = self.state();
            state.metrics.record_attempt(result.is_ok());
            match result {
                Ok(()) => {
                    state.backlog.pop_front();
                    report.flushed += 1;
                }
                Err(e) => {
                    let e = redact(e, self.transport.endpoint());
                    warn!("flush failed with {} pending: {}", state.backlog.len(), e);
                    report.failure = Some(e);
                    break;
                }
            }
        }
    }

    fn transmit(&self, body: &str) -> Result<(), FlushError> {
        if self.config.dry_run {
            self.status.write_text(&format!(
                "curl -i -XPOST '{}' -H 'Content-Type: {}' --data-binary '{}'",
                REDACTED_ENDPOINT,
                CONTENT_TYPE,
                body.trim_end()
            ));
            return Ok(());
        }
        self.transport.send(body)
    }
}

fn redact(err: FlushError, endpoint: &str) -> FlushError {
    match err {
        FlushError::Request(msg) => FlushError::Request(redact_endpoint(&msg, endpoint)),
        FlushError::Rejected { status, reason } => FlushError::Rejected {
            status,
            reason: redact_endpoint(&reason, endpoint),
        },
    }
}

impl Sink for Forwarder {
    fn write_measurements(&self, registers: &[Register]) {
        self.process(registers, Utc::now());
    }

    fn write_text(&self, _line: &str) {}
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("config", &self.config)
            .field("backlog", &self.backlog_len())
            .finish()
    }
}
