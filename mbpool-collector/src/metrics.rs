// mbpool collector - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the collector.
//!
//! [`MetricsSink`] is appended last to the sink list so it sees each cycle
//! after the forwarder has processed it.
//!
//! Per-register series are labelled by the descriptor name without the
//! critical marker, so `^suffix` pairs stay distinct series.

use lazy_static::lazy_static;
use mbpool::{ForwardMetrics, Forwarder, Register, Sink};
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    // ============================================================
    // Sampling
    // ============================================================

    /// Sampling cycles completed.
    pub static ref CYCLES_TOTAL: Gauge = register_gauge!(
        "mbpool_cycles_total",
        "Sampling cycles completed"
    ).unwrap();

    /// Registers whose last read failed.
    pub static ref REGISTERS_IN_ERROR: Gauge = register_gauge!(
        "mbpool_registers_in_error",
        "Registers whose last read failed"
    ).unwrap();

    /// Last decoded value per register (numeric registers only).
    pub static ref REGISTER_VALUE: GaugeVec = register_gauge_vec!(
        "mbpool_register_value",
        "Last decoded register value",
        &["register"]
    ).unwrap();

    /// Duration of the last read per register.
    pub static ref REGISTER_READ_SECONDS: GaugeVec = register_gauge_vec!(
        "mbpool_register_read_seconds",
        "Duration of the last register read in seconds",
        &["register"]
    ).unwrap();

    /// Failed reads per register.
    pub static ref REGISTER_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "mbpool_register_errors_total",
        "Failed register reads",
        &["register"]
    ).unwrap();

    // ============================================================
    // Forwarding
    // ============================================================

    /// Batches appended to the backlog.
    pub static ref BATCHES_ENQUEUED: Gauge = register_gauge!(
        "mbpool_forward_batches_enqueued_total",
        "Batches appended to the forwarding backlog"
    ).unwrap();

    /// Batches dropped by drop-oldest eviction.
    pub static ref BATCHES_EVICTED: Gauge = register_gauge!(
        "mbpool_forward_batches_evicted_total",
        "Batches dropped because the backlog was full"
    ).unwrap();

    /// Batches delivered.
    pub static ref BATCHES_FLUSHED: Gauge = register_gauge!(
        "mbpool_forward_batches_flushed_total",
        "Batches delivered to the write endpoint"
    ).unwrap();

    /// Failed write attempts.
    pub static ref FLUSH_FAILURES: Gauge = register_gauge!(
        "mbpool_forward_flush_failures_total",
        "Failed write attempts"
    ).unwrap();

    /// Cycles with no point to forward.
    pub static ref EMPTY_CYCLES: Gauge = register_gauge!(
        "mbpool_forward_empty_cycles_total",
        "Cycles with no point to forward"
    ).unwrap();

    /// Pending batches.
    pub static ref BACKLOG_DEPTH: Gauge = register_gauge!(
        "mbpool_forward_backlog_depth",
        "Batches waiting for transmission"
    ).unwrap();
}

/// Update forwarding gauges from a counter snapshot.
pub fn update_forward_metrics(metrics: &ForwardMetrics) {
    BATCHES_ENQUEUED.set(metrics.batches_enqueued as f64);
    BATCHES_EVICTED.set(metrics.batches_evicted as f64);
    BATCHES_FLUSHED.set(metrics.batches_flushed as f64);
    FLUSH_FAILURES.set(metrics.flush_failures as f64);
    EMPTY_CYCLES.set(metrics.empty_cycles as f64);
    BACKLOG_DEPTH.set(metrics.backlog_depth as f64);
}

/// Label for a register: its name with `**` removed, `^suffix` kept.
fn register_label(register: &Register) -> &str {
    register.spec().name.trim_matches(|c| c == '*' || c == ' ')
}

/// Update per-register metrics after a cycle.
pub fn update_register_metrics(registers: &[Register]) {
    let mut in_error = 0;
    for register in registers {
        let name = register_label(register);
        let state = register.snapshot();

        REGISTER_READ_SECONDS
            .with_label_values(&[name])
            .set(state.last_read_latency.as_secs_f64());

        if state.has_error() {
            in_error += 1;
            REGISTER_ERRORS_TOTAL.with_label_values(&[name]).inc();
        } else if let Some(value) = state.current_value().and_then(|v| v.as_f64()) {
            REGISTER_VALUE.with_label_values(&[name]).set(value);
        }
    }
    REGISTERS_IN_ERROR.set(in_error as f64);
    CYCLES_TOTAL.inc();
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Sink exporting each cycle to the Prometheus registry
pub struct MetricsSink {
    forwarder: Option<Arc<Forwarder>>,
}

impl MetricsSink {
    pub fn new(forwarder: Option<Arc<Forwarder>>) -> Self {
        Self { forwarder }
    }
}

impl Sink for MetricsSink {
    fn write_measurements(&self, registers: &[Register]) {
        update_register_metrics(registers);
        if let Some(ref forwarder) = self.forwarder {
            update_forward_metrics(&forwarder.metrics());
        }
    }

    fn write_text(&self, _line: &str) {}
}
