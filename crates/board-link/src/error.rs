//! Error types for the board link

use board_protocol::{ParseError, PinMode, Protocol};
use thiserror::Error;

/// Errors returned by board operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// The pin does not support the mode the operation needs
    #[error("pin {pin} does not support {mode}; valid {mode} pins are {}", join_pins(.valid_pins))]
    Capability {
        /// Pin the operation targeted
        pin: u8,
        /// Mode the operation needed
        mode: PinMode,
        /// Pins that do support `mode`
        valid_pins: Vec<u8>,
    },

    /// Analog channel outside the board's range
    #[error("analog channel {channel} out of range; valid channels are {}", join_pins(.valid))]
    InvalidChannel {
        /// Requested channel
        channel: u8,
        /// Channels the board reported
        valid: Vec<u8>,
    },

    /// Argument outside what the operation accepts
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Named hardware or connector that was never registered
    #[error("unknown hardware '{0}'")]
    UnknownHardware(String),

    /// No board is connected
    #[error("no board connected")]
    NotConnected,

    /// The board went away before the request completed
    #[error("connection lost")]
    ConnectionLost,

    /// Operation is not available on the connected board's protocol
    #[error("operation not supported by {0} boards")]
    WrongProtocol(Protocol),

    /// Malformed data from the board
    #[error("decode error: {0}")]
    Decode(#[from] ParseError),

    /// Transport failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The supervisor task has stopped
    #[error("supervisor is not running")]
    SupervisorGone,
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

fn join_pins(pins: &[u8]) -> String {
    if pins.is_empty() {
        return "none".to_string();
    }
    pins.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
