//! # mbpool - Field telemetry collector
//!
//! Samples numeric registers from a field device, decodes them into scaled
//! engineering values, and forwards them to a time-series write endpoint
//! through a bounded, drop-oldest backlog.
//!
//! ## Key Features
//!
//! - **Typed decoding**: big-endian I16/U16/I32/U32 with gain, raw fallback
//! - **Time buckets**: per-register timestamp policies (now, hour, day, month...)
//! - **Bounded backlog**: FIFO with drop-oldest eviction and a per-cycle flush budget
//! - **Sinks**: one capability for stdout, the snapshot ring and the forwarder
//!
//! ## Quick Start
//!
//! ```rust
//! use mbpool::{decode, DecodeKind, DecodedValue};
//!
//! let value = decode(&[0x00, 0x00, 0x27, 0x10], DecodeKind::I32, 1000).unwrap();
//! assert_eq!(value, DecodedValue::Number(10.0));
//!
//! let spec = mbpool::RegisterSpec::parse("32080:2:active_power**:1000:I32:kW", 1).unwrap();
//! assert_eq!(spec.field_name(), "active_power");
//! assert!(spec.is_critical());
//! ```
//!
//! ## Modules
//!
//! - [`register`]: Register descriptors and descriptor ingestion
//! - [`decoder`]: Raw payload decoding
//! - [`bucket`]: Time-bucket policies
//! - [`source`]: Device link capability and per-register state
//! - [`sink`]: Sink capability, stdout and snapshot sinks
//! - [`batch`]: Line batch construction
//! - [`backlog`]: Bounded FIFO of pending batches
//! - [`transport`]: Remote write transport
//! - [`forwarder`]: Buffering and forwarding pipeline
//! - [`collector`]: Sampling loop
//! - [`metrics`]: Forwarding statistics

// Modules
pub mod backlog;
pub mod batch;
pub mod bucket;
pub mod collector;
pub mod decoder;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod register;
pub mod sink;
pub mod source;
pub mod transport;

// Re-exports for convenient access
pub use backlog::{Backlog, DEFAULT_BACKLOG_CAPACITY};
pub use batch::{build_batch, unix_nanos, PendingBatch};
pub use bucket::BucketPolicy;
pub use collector::{Collector, CollectorConfig, CycleTiming, NightSchedule, Tick};
pub use decoder::{decode, DecodedValue};
pub use error::{ConfigError, DecodeError, FlushError, MbpoolError, Result, TransportError};
pub use forwarder::{CycleReport, Forwarder, ForwarderConfig, DEFAULT_MAX_FLUSH_PER_CYCLE};
pub use metrics::ForwardMetrics;
pub use register::{load_descriptor_file, parse_descriptors, DecodeKind, RegisterSpec};
pub use sink::{Sink, SnapshotSink, SnapshotView, StdoutSink};
pub use source::{Register, RegisterBank, RegisterSource, RegisterState, TIME_FORMAT};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{redact_endpoint, HttpTransportConfig, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_pipeline() {
        struct Device;

        impl RegisterSource for Device {
            fn read(&mut self, _address: u16, _word_count: u16) -> std::result::Result<Vec<u8>, TransportError> {
                Ok(vec![0x00, 0x00, 0x27, 0x10])
            }
        }

        let specs = parse_descriptors(["32080:2:active_power**:1000:I32:kW"]).unwrap();
        let bank = RegisterBank::from_specs(specs);
        assert_eq!(bank.read_all(&mut Device), 0);

        let batch = build_batch(bank.registers(), "loc=1", chrono::Utc::now()).unwrap();
        assert!(batch.body().starts_with("mbpool,loc=1 active_power=10 "));
    }
}
