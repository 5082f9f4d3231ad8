//! Register payload decoding
//!
//! Turns the raw big-endian words returned by the device into a scaled
//! engineering value. Integer decoding is total: the only failure is a
//! payload shorter than the width of the declared kind.

use crate::error::DecodeError;
use crate::register::DecodeKind;
use std::fmt;

/// A decoded register value
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// Scaled numeric value (raw / gain)
    Number(f64),
    /// Raw bytes rendered as text, unscaled
    Text(String),
}

impl DecodedValue {
    /// Numeric value, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(v) => Some(*v),
            DecodedValue::Text(_) => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Number(v) => write!(f, "{}", v),
            DecodedValue::Text(s) => f.write_str(s),
        }
    }
}

/// Decode `raw` according to `kind`, dividing integers by `gain`
///
/// # Errors
///
/// Returns [`DecodeError::BufferTooShort`] when `raw` holds fewer bytes than
/// the kind needs. Extra trailing bytes are ignored.
pub fn decode(raw: &[u8], kind: DecodeKind, gain: i64) -> Result<DecodedValue, DecodeError> {
    let needed = kind.width();
    if raw.len() < needed {
        return Err(DecodeError::BufferTooShort {
            needed,
            available: raw.len(),
        });
    }

    let gain = gain as f64;
    let value = match kind {
        DecodeKind::I16 => f64::from(i16::from_be_bytes([raw[0], raw[1]])) / gain,
        DecodeKind::U16 => {
            let v = u16::from_be_bytes([raw[0], raw[1]]);
            // All-ones is the device's "not applicable" marker
            let v = if v == u16::MAX { 0 } else { v };
            f64::from(v) / gain
        }
        DecodeKind::I32 => {
            f64::from(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])) / gain
        }
        DecodeKind::U32 => {
            let v = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let v = if v == u32::MAX { 0 } else { v };
            f64::from(v) / gain
        }
        DecodeKind::Raw => return Ok(DecodedValue::Text(render_raw(raw))),
    };

    Ok(DecodedValue::Number(value))
}

/// Render bytes as `[b0 b1 ...]`
pub fn render_raw(raw: &[u8]) -> String {
    let parts: Vec<String> = raw.iter().map(|b| b.to_string()).collect();
    format!("[{}]", parts.join(" "))
}
