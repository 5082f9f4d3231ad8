//! Error types for mbpool
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for mbpool operations
pub type Result<T> = std::result::Result<T, MbpoolError>;

/// Main error type for mbpool operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MbpoolError {
    /// Register descriptor error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Device link error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Remote write error
    #[error("Flush error: {0}")]
    Flush(#[from] FlushError),
}

impl MbpoolError {
    /// Short label for the error kind, without detail
    pub fn class(&self) -> &'static str {
        match self {
            MbpoolError::Config(_) => "config error",
            MbpoolError::Transport(_) => "transport error",
            MbpoolError::Decode(_) => "decode error",
            MbpoolError::Flush(_) => "flush error",
        }
    }
}

/// Errors while building the register table
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Fewer than the six mandatory fields
    #[error("line {line}: expected at least 6 fields, got {found} in '{text}'")]
    MissingFields {
        line: usize,
        found: usize,
        text: String,
    },

    /// A numeric field did not parse
    #[error("line {line}: invalid {field} '{value}'")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    /// Word count outside 1..=2
    #[error("line {line}: word count must be 1 or 2, got {count}")]
    InvalidWordCount { line: usize, count: u64 },

    /// Gain would divide by zero
    #[error("line {line}: gain must not be zero")]
    ZeroGain { line: usize },

    /// Unknown time-bucket tag
    #[error("line {line}: unknown bucket policy '{tag}'")]
    UnknownBucketPolicy { line: usize, tag: String },

    /// Empty register name
    #[error("line {line}: register name is empty")]
    EmptyName { line: usize },

    /// Nothing to read
    #[error("no registers configured")]
    NoRegisters,

    /// Descriptor file could not be read
    #[error("unable to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// Invalid pipeline or transport settings
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Errors reported by a [`RegisterSource`](crate::source::RegisterSource)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The device could not be reached
    #[error("unable to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// No reply within the configured timeout
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Link-level I/O failure
    #[error("i/o error: {0}")]
    Io(String),

    /// The device answered with an exception code
    #[error("device exception 0x{code:02x} reading register {address}")]
    Exception { address: u16, code: u8 },

    /// The reply was not a valid answer to the request
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The source was closed
    #[error("source closed")]
    Closed,
}

/// Errors while decoding a raw register payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload shorter than the decode kind requires
    #[error("buffer too short: need {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },
}

/// Errors while transmitting a pending batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlushError {
    /// The request did not complete (connect, TLS, timeout, ...)
    #[error("request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-2xx status
    #[error("endpoint rejected batch: {status} {reason}")]
    Rejected { status: u16, reason: String },
}
