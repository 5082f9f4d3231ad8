//! Sample source adapter
//!
//! [`RegisterSource`] is the link to the device. [`Register`] pairs an
//! immutable [`RegisterSpec`] with its mutable [`RegisterState`] behind a
//! per-register lock; [`Register::read`] is the only writer of that state.

use crate::decoder::{decode, DecodedValue};
use crate::error::{MbpoolError, TransportError};
use crate::register::RegisterSpec;
use chrono::{DateTime, Local, Utc};
use log::{debug, warn};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Capability to read raw register words from the device
pub trait RegisterSource: Send {
    /// Read `word_count` 16-bit words starting at `address`
    ///
    /// Returns `2 * word_count` bytes, big-endian as sent by the device.
    fn read(&mut self, address: u16, word_count: u16) -> Result<Vec<u8>, TransportError>;

    /// Release the link
    fn close(&mut self) {}
}

impl<S: RegisterSource + ?Sized> RegisterSource for Box<S> {
    fn read(&mut self, address: u16, word_count: u16) -> Result<Vec<u8>, TransportError> {
        (**self).read(address, word_count)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Mutable state of one register
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterState {
    /// Bytes from the last successful transport read
    pub raw: Vec<u8>,
    /// Last successfully decoded value
    pub value: Option<DecodedValue>,
    /// Completion time of the last read attempt
    pub last_read_at: Option<DateTime<Utc>>,
    /// Duration of the last read attempt
    pub last_read_latency: Duration,
    /// Error of the last read attempt, if any
    pub last_error: Option<MbpoolError>,
}

impl RegisterState {
    /// Value eligible for forwarding: decoded and not in error
    pub fn current_value(&self) -> Option<&DecodedValue> {
        match self.last_error {
            Some(_) => None,
            None => self.value.as_ref(),
        }
    }

    /// Whether the last read failed
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }
}

/// A register: spec plus lock-guarded state
#[derive(Debug)]
pub struct Register {
    id: usize,
    spec: RegisterSpec,
    state: Mutex<RegisterState>,
}

impl Register {
    /// Create a register with empty state
    pub fn new(id: usize, spec: RegisterSpec) -> Self {
        Self {
            id,
            spec,
            state: Mutex::new(RegisterState::default()),
        }
    }

    /// Stable index within the bank
    pub fn id(&self) -> usize {
        self.id
    }

    /// Immutable description
    pub fn spec(&self) -> &RegisterSpec {
        &self.spec
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> RegisterState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegisterState> {
        // State is plain data, fully rewritten by the next read
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read and decode this register from `source`
    ///
    /// The lock is held for the whole read so readers never see raw bytes
    /// from one read next to a value from another. On transport failure the
    /// previous value is kept and the error is recorded.
    pub fn read(&self, source: &mut dyn RegisterSource) -> Result<(), MbpoolError> {
        let mut state = self.lock();
        state.last_error = None;

        let started = Instant::now();
        let result = source.read(self.spec.address, self.spec.word_count);
        state.last_read_latency = started.elapsed();
        state.last_read_at = Some(Utc::now());

        debug!(
            "read register {} ({}) in {:?}",
            self.spec.address, self.spec.name, state.last_read_latency
        );

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                let err = MbpoolError::from(e);
                warn!("register {} ({}): {}", self.spec.address, self.spec.name, err);
                state.last_error = Some(err.clone());
                return Err(err);
            }
        };

        let decoded = decode(&raw, self.spec.kind, self.spec.gain);
        state.raw = raw;
        match decoded {
            Ok(value) => {
                state.value = Some(value);
                Ok(())
            }
            Err(e) => {
                let err = MbpoolError::from(e);
                warn!("register {} ({}): {}", self.spec.address, self.spec.name, err);
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Render the display line for this register
    pub fn display_line(&self) -> String {
        let state = self.snapshot();
        format_line(&self.spec, &state)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}

/// Display timestamp format
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format `state` of `spec` as a display line
pub fn format_line(spec: &RegisterSpec, state: &RegisterState) -> String {
    if let Some(ref err) = state.last_error {
        let at = state
            .last_read_at
            .map(|t| t.with_timezone(&Local).format(TIME_FORMAT).to_string())
            .unwrap_or_default();
        return format!("{} ## {}: {}", at, spec.name, err.class());
    }

    let value = state
        .value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{:>15}| {:>10} |{}| {:?}",
        spec.name,
        format!("{}{}", value, spec.display_unit()),
        spec.address,
        round_latency(state.last_read_latency)
    )
}

/// Round to the nearest 100µs
pub fn round_latency(d: Duration) -> Duration {
    let micros = (d.as_micros() + 50) / 100 * 100;
    Duration::from_micros(micros as u64)
}

/// Arena of registers indexed by stable id
#[derive(Debug, Default)]
pub struct RegisterBank {
    registers: Vec<Register>,
}

impl RegisterBank {
    /// Build a bank, assigning ids in descriptor order
    pub fn from_specs(specs: Vec<RegisterSpec>) -> Self {
        let registers = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Register::new(id, spec))
            .collect();
        Self { registers }
    }

    /// Register by id
    pub fn get(&self, id: usize) -> Option<&Register> {
        self.registers.get(id)
    }

    /// All registers in id order
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the bank is empty
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Read every register serially; returns the number of failures
    pub fn read_all(&self, source: &mut dyn RegisterSource) -> usize {
        self.registers
            .iter()
            .filter(|r| r.read(&mut *source).is_err())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    struct FixedSource {
        replies: Vec<Result<Vec<u8>, TransportError>>,
        calls: Vec<(u16, u16)>,
    }

    impl RegisterSource for FixedSource {
        fn read(&mut self, address: u16, word_count: u16) -> Result<Vec<u8>, TransportError> {
            self.calls.push((address, word_count));
            self.replies.remove(0)
        }
    }

    fn spec(line: &str) -> RegisterSpec {
        RegisterSpec::parse(line, 1).unwrap()
    }

    #[test]
    fn test_read_decodes_value() {
        let register = Register::new(0, spec("100:2:active_power**:1000:I32:kW"));
        let mut source = FixedSource {
            replies: vec![Ok(vec![0x00, 0x00, 0x27, 0x10])],
            calls: vec![],
        };

        register.read(&mut source).unwrap();
        assert_eq!(source.calls, vec![(100, 2)]);

        let state = register.snapshot();
        assert_eq!(state.value, Some(DecodedValue::Number(10.0)));
        assert_eq!(state.raw, vec![0x00, 0x00, 0x27, 0x10]);
        assert!(state.last_read_at.is_some());
        assert!(!state.has_error());
        assert!(register.display_line().contains("10kW"));
    }

    #[test]
    fn test_transport_error_keeps_previous_value() {
        let register = Register::new(0, spec("1:1:temp**:10:I16:C"));
        let mut source = FixedSource {
            replies: vec![Ok(vec![0x00, 0xFA]), Err(TransportError::Timeout { timeout_ms: 5 })],
            calls: vec![],
        };

        register.read(&mut source).unwrap();
        assert!(register.read(&mut source).is_err());

        let state = register.snapshot();
        assert_eq!(state.value, Some(DecodedValue::Number(25.0)));
        assert!(state.has_error());
        assert_eq!(state.current_value(), None);
        let line = register.display_line();
        assert!(line.contains("## temp**: transport error"));
        assert!(!line.contains("timeout after"));
    }

    #[test]
    fn test_decode_error_recorded() {
        let register = Register::new(0, spec("1:1:odd:1:U32:_"));
        let mut source = FixedSource {
            replies: vec![Ok(vec![0x00, 0x01])],
            calls: vec![],
        };

        let err = register.read(&mut source).unwrap_err();
        assert_eq!(
            err,
            MbpoolError::Decode(DecodeError::BufferTooShort {
                needed: 4,
                available: 2
            })
        );
        assert!(register.snapshot().has_error());
    }

    #[test]
    fn test_error_cleared_by_next_success() {
        let register = Register::new(0, spec("1:1:freq:100:U16:Hz"));
        let mut source = FixedSource {
            replies: vec![Err(TransportError::Closed), Ok(vec![0x13, 0x88])],
            calls: vec![],
        };

        assert!(register.read(&mut source).is_err());
        register.read(&mut source).unwrap();
        let state = register.snapshot();
        assert_eq!(state.current_value(), Some(&DecodedValue::Number(50.0)));
    }

    #[test]
    fn test_bank_read_all_counts_failures() {
        let bank = RegisterBank::from_specs(vec![
            spec("1:1:a:1:U16:_"),
            spec("2:1:b:1:U16:_"),
            spec("3:1:c:1:U16:_"),
        ]);
        let mut source = FixedSource {
            replies: vec![
                Ok(vec![0, 1]),
                Err(TransportError::Io("reset".into())),
                Ok(vec![0, 3]),
            ],
            calls: vec![],
        };

        assert_eq!(bank.read_all(&mut source), 1);
        assert_eq!(bank.len(), 3);
        assert_eq!(bank.get(2).unwrap().id(), 2);
        assert!(bank.get(1).unwrap().snapshot().has_error());
    }

    #[test]
    fn test_display_line_layout() {
        let register = Register::new(0, spec("32285:1:efficiency:100:U16:%"));
        let mut source = FixedSource {
            replies: vec![Ok(vec![0x26, 0x8E])],
            calls: vec![],
        };
        register.read(&mut source).unwrap();

        let line = register.display_line();
        assert!(line.starts_with("     efficiency|"));
        assert!(line.contains("98.7%"));
        assert!(line.contains("|32285|"));
    }

    #[test]
    fn test_round_latency() {
        assert_eq!(
            round_latency(Duration::from_micros(1234)),
            Duration::from_micros(1200)
        );
        assert_eq!(
            round_latency(Duration::from_micros(1250)),
            Duration::from_micros(1300)
        );
    }
}
