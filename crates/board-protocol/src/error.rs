//! Error types for board protocol decoding

use thiserror::Error;

/// Errors that can occur while decoding a device byte stream
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Message ended before a complete structure was read
    #[error("truncated {context}: need {needed} more bytes")]
    Truncated {
        /// What was being decoded
        context: &'static str,
        /// Bytes missing at the point decoding stopped
        needed: usize,
    },

    /// Sysex payload exceeded the receive buffer
    #[error("sysex payload exceeds {limit} bytes")]
    Overflow { limit: usize },

    /// A pin, port or channel index outside the protocol range
    #[error("{what} {value} out of range (max {max})")]
    OutOfRange {
        /// Which index was out of range
        what: &'static str,
        /// Value read from the stream
        value: usize,
        /// Largest legal value
        max: usize,
    },

    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Communication timeout
    #[error("communication timeout after {0}ms")]
    Timeout(u64),

    /// Invalid response from the board
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
