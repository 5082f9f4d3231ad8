//! Point batch construction
//!
//! Groups one cycle's registers by stream and bucket timestamp and
//! serializes each group as a line:
//!
//! ```text
//! stream,tag1=a,tag2=b field1=v1,field2=v2 <unix nanos>
//! ```

use crate::decoder::DecodedValue;
use crate::source::Register;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A serialized, immutable batch of points ready to transmit verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    body: String,
    lines: usize,
    created_at: DateTime<Utc>,
}

impl PendingBatch {
    /// Request body (newline-separated lines)
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Number of point lines
    pub fn line_count(&self) -> usize {
        self.lines
    }

    /// Cycle instant the batch was built for
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Body size in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Nanoseconds since the Unix epoch
pub fn unix_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() * 1_000_000_000 + i64::from(ts.timestamp_subsec_nanos())
}

/// Render a field assignment
fn field(name: &str, value: &DecodedValue) -> String {
    match value {
        DecodedValue::Number(v) => format!("{}={}", name, v),
        DecodedValue::Text(s) => format!("{}=\"{}\"", name, s.replace('"', "\\\"")),
    }
}

/// Build a batch from `registers` as of `now`
///
/// Registers in error, never decoded, or with the `none` bucket policy are
/// left out. Returns `None` when no field survives.
pub fn build_batch(registers: &[Register], tags: &str, now: DateTime<Utc>) -> Option<PendingBatch> {
    // stream -> bucket timestamp -> fields, in register order
    let mut groups: BTreeMap<&str, BTreeMap<i64, Vec<String>>> = BTreeMap::new();

    for register in registers {
        let spec = register.spec();
        let ts = match spec.bucket.evaluate(now) {
            Some(ts) => ts,
            None => continue,
        };

        let state = register.snapshot();
        let value = match state.current_value() {
            Some(v) => v,
            None => continue,
        };

        groups
            .entry(spec.stream.as_str())
            .or_default()
            .entry(unix_nanos(ts))
            .or_default()
            .push(field(spec.field_name(), value));
    }

    let tags = tags.trim().trim_matches(',');
    let mut body = String::new();
    let mut lines = 0;

    for (stream, buckets) in &groups {
        for (ts, fields) in buckets {
            if fields.is_empty() {
                continue;
            }
            body.push_str(stream);
            if !tags.is_empty() {
                body.push(',');
                body.push_str(tags);
            }
            body.push(' ');
            body.push_str(&fields.join(","));
            body.push(' ');
            body.push_str(&ts.to_string());
            body.push('\n');
            lines += 1;
        }
    }

    if lines == 0 {
        return None;
    }

    Some(PendingBatch {
        body,
        lines,
        created_at: now,
    })
}
