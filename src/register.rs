//! Register model
//!
//! A [`RegisterSpec`] describes one measurement read from the device. It is
//! parsed once from a colon-separated descriptor line:
//!
//! ```text
//! address:wordCount:name:gain:decodeKind:unit[:bucketPolicy[:streamName]]
//! 32290:2:active_power**:1000:I32:kW
//! 32345:2:ehour^p:100:U32:kWh:-1h:ehour
//! ```
//!
//! A `**` in the name marks the register as critical (shown in the short
//! snapshot view); a `^suffix` disambiguates descriptors that report the same
//! field under different bucket policies.

use crate::bucket::BucketPolicy;
use crate::error::ConfigError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Stream (measurement) name used when the descriptor names none
pub const DEFAULT_STREAM_NAME: &str = "mbpool";

/// Marker for critical registers
pub const CRITICAL_MARKER: &str = "**";

/// Unit sentinel meaning "no unit"
pub const NO_UNIT: &str = "_";

/// Minimum number of descriptor fields
pub const MIN_DESCRIPTOR_FIELDS: usize = 6;

/// How raw register words are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecodeKind {
    /// Signed 16-bit
    I16,
    /// Unsigned 16-bit
    U16,
    /// Signed 32-bit
    I32,
    /// Unsigned 32-bit
    U32,
    /// Bytes rendered as text
    #[default]
    Raw,
}

impl DecodeKind {
    /// Number of bytes the kind consumes
    pub fn width(&self) -> usize {
        match self {
            DecodeKind::I16 | DecodeKind::U16 => 2,
            DecodeKind::I32 | DecodeKind::U32 => 4,
            DecodeKind::Raw => 0,
        }
    }
}

impl FromStr for DecodeKind {
    type Err = std::convert::Infallible;

    /// Unrecognized kinds fall back to [`DecodeKind::Raw`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "I16" => DecodeKind::I16,
            "U16" => DecodeKind::U16,
            "I32" => DecodeKind::I32,
            "U32" => DecodeKind::U32,
            _ => DecodeKind::Raw,
        })
    }
}

impl fmt::Display for DecodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeKind::I16 => "I16",
            DecodeKind::U16 => "U16",
            DecodeKind::I32 => "I32",
            DecodeKind::U32 => "U32",
            DecodeKind::Raw => "RAW",
        };
        f.write_str(s)
    }
}

/// Immutable description of one register
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSpec {
    /// Start address on the device
    pub address: u16,
    /// Number of 16-bit words (1 or 2)
    pub word_count: u16,
    /// Display name, including markers
    pub name: String,
    /// Divisor applied to integer values
    pub gain: i64,
    /// Decode rule
    pub kind: DecodeKind,
    /// Unit, or `_` for none
    pub unit: String,
    /// Time-bucketing policy
    pub bucket: BucketPolicy,
    /// Destination stream
    pub stream: String,
}

impl RegisterSpec {
    /// Parse a descriptor line
    ///
    /// `line_no` is only used to label errors.
    pub fn parse(line: &str, line_no: usize) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() < MIN_DESCRIPTOR_FIELDS {
            return Err(ConfigError::MissingFields {
                line: line_no,
                found: fields.len(),
                text: line.trim().to_string(),
            });
        }

        let address = parse_number::<u16>(fields[0], "address", line_no)?;
        let word_count = parse_number::<u64>(fields[1], "word count", line_no)?;
        if !(1..=2).contains(&word_count) {
            return Err(ConfigError::InvalidWordCount {
                line: line_no,
                count: word_count,
            });
        }

        let name = fields[2].trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName { line: line_no });
        }

        let gain = parse_number::<i64>(fields[3], "gain", line_no)?;
        if gain == 0 {
            return Err(ConfigError::ZeroGain { line: line_no });
        }

        let kind = fields[4].parse::<DecodeKind>().unwrap_or_default();

        let bucket = match fields.get(6) {
            Some(tag) => tag
                .parse::<BucketPolicy>()
                .map_err(|tag| ConfigError::UnknownBucketPolicy { line: line_no, tag })?,
            None => BucketPolicy::Now,
        };

        let stream = fields
            .get(7)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STREAM_NAME);

        Ok(Self {
            address,
            word_count: word_count as u16,
            name: name.to_string(),
            gain,
            kind,
            unit: fields[5].trim().to_string(),
            bucket,
            stream: stream.to_string(),
        })
    }

    /// Bytes the transport returns for this register
    pub fn byte_count(&self) -> usize {
        usize::from(self.word_count) * 2
    }

    /// Whether the name carries the critical marker
    pub fn is_critical(&self) -> bool {
        self.name.contains(CRITICAL_MARKER)
    }

    /// Field name used downstream
    ///
    /// Strips the critical marker and any `^suffix`, so `emonth**` and
    /// `emonth^p` both become `emonth`.
    pub fn field_name(&self) -> &str {
        let trimmed = self.name.trim_matches(|c| c == '*' || c == ' ');
        trimmed.split('^').next().unwrap_or(trimmed)
    }

    /// Unit for display, empty for `_`
    pub fn display_unit(&self) -> &str {
        if self.unit == NO_UNIT {
            ""
        } else {
            &self.unit
        }
    }
}

fn parse_number<T: FromStr>(
    value: &str,
    field: &'static str,
    line: usize,
) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        line,
        field,
        value: value.trim().to_string(),
    })
}

/// Parse descriptor lines, skipping blanks and `#` comments
///
/// # Errors
///
/// Fails on the first malformed line, or with [`ConfigError::NoRegisters`]
/// if nothing remains.
pub fn parse_descriptors<'a, I>(lines: I) -> Result<Vec<RegisterSpec>, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut specs = Vec::new();
    for (idx, line) in lines.into_iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        specs.push(RegisterSpec::parse(trimmed, idx + 1)?);
    }

    if specs.is_empty() {
        return Err(ConfigError::NoRegisters);
    }
    Ok(specs)
}

/// Read and parse a descriptor file
pub fn load_descriptor_file(path: &Path) -> Result<Vec<RegisterSpec>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_descriptors(content.lines())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let spec = RegisterSpec::parse("32290:2:active_power**:1000:I32:kW", 1).unwrap();
        assert_eq!(spec.address, 32290);
        assert_eq!(spec.word_count, 2);
        assert_eq!(spec.byte_count(), 4);
        assert_eq!(spec.gain, 1000);
        assert_eq!(spec.kind, DecodeKind::I32);
        assert_eq!(spec.unit, "kW");
        assert_eq!(spec.bucket, BucketPolicy::Now);
        assert_eq!(spec.stream, DEFAULT_STREAM_NAME);
        assert!(spec.is_critical());
        assert_eq!(spec.field_name(), "active_power");
    }

    #[test]
    fn test_parse_bucket_and_stream() {
        let spec = RegisterSpec::parse("32345:2:ehour^p:100:U32:kWh:-1h:ehour", 1).unwrap();
        assert_eq!(spec.bucket, BucketPolicy::PriorHour);
        assert_eq!(spec.stream, "ehour");
        assert!(!spec.is_critical());
        assert_eq!(spec.field_name(), "ehour");
    }

    #[test]
    fn test_unknown_kind_is_raw() {
        let spec = RegisterSpec::parse("1:1:blob:1:STR:_", 1).unwrap();
        assert_eq!(spec.kind, DecodeKind::Raw);
        assert_eq!(spec.display_unit(), "");
    }

    #[test]
    fn test_missing_fields() {
        let err = RegisterSpec::parse("1:1:x:1:U16", 4).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingFields {
                line: 4,
                found: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_numbers() {
        assert!(matches!(
            RegisterSpec::parse("70000:1:x:1:U16:V", 1),
            Err(ConfigError::InvalidNumber {
                field: "address",
                ..
            })
        ));
        assert!(matches!(
            RegisterSpec::parse("1:3:x:1:U16:V", 1),
            Err(ConfigError::InvalidWordCount { count: 3, .. })
        ));
        assert!(matches!(
            RegisterSpec::parse("1:1:x:0:U16:V", 1),
            Err(ConfigError::ZeroGain { .. })
        ));
        assert!(matches!(
            RegisterSpec::parse("1:1:x:abc:U16:V", 1),
            Err(ConfigError::InvalidNumber { field: "gain", .. })
        ));
    }

    #[test]
    fn test_unknown_bucket_policy() {
        let err = RegisterSpec::parse("1:1:x:1:U16:V:2h", 9).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownBucketPolicy {
                line: 9,
                tag: "2h".to_string()
            }
        );
    }

    #[test]
    fn test_parse_descriptors_skips_comments() {
        let text = "# header\n\n32286:1:temp**:10:I16:C\n32262:1:Upv1:10:I16:V\n";
        let specs = parse_descriptors(text.lines()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].name, "Upv1");
    }

    #[test]
    fn test_parse_descriptors_empty() {
        assert_eq!(
            parse_descriptors("# only\n\n".lines()),
            Err(ConfigError::NoRegisters)
        );
    }

    #[test]
    fn test_parse_descriptors_reports_line() {
        let text = "1:1:a:1:U16:V\n1:1:b\n";
        let err = parse_descriptors(text.lines()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFields { line: 2, .. }));
    }

    #[test]
    fn test_load_descriptor_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# inverter").unwrap();
        writeln!(file, "32306:2:etotal**:100:U32:kWh:inf:etotal").unwrap();
        file.flush().unwrap();

        let specs = load_descriptor_file(file.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].bucket, BucketPolicy::EpochZero);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_descriptor_file(Path::new("/nonexistent/registers.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
