//! Board Protocol Library
//!
//! This crate provides decoding and encoding for the two wire protocols
//! spoken by serial-attached microcontroller boards:
//!
//! - **Firmata**: status-byte framed short messages plus sysex envelopes,
//!   used by Arduino-class boards
//! - **Telegram**: single-byte polls answered by fixed 16-byte telegrams,
//!   used by PicoBoard-class sensor boards
//!
//! # Architecture
//!
//! Each protocol module provides:
//! - A streaming decoder that handles partial data and keeps its position
//!   between chunks
//! - Typed host commands that encode to protocol bytes
//! - Encoders for board messages, so simulated boards can speak the wire
//!
//! The same bytes mean different things by direction: `F0 79 F7` sent by the
//! host is a firmware query, while `F0 79 02 05 .. F7` from the board is the
//! firmware report.
//!
//! # Example
//!
//! ```rust
//! use board_protocol::firmata::{FirmataCodec, FirmataMessage};
//! use board_protocol::ProtocolCodec;
//!
//! let mut codec = FirmataCodec::new();
//! codec.push_bytes(&[0xE0, 0x7F, 0x07]);
//!
//! if let Some(Ok(FirmataMessage::AnalogSample { channel, value })) = codec.next_message() {
//!     assert_eq!((channel, value), (0, 1023));
//! }
//! ```

use std::fmt;
use std::str::FromStr;

pub mod error;
pub mod firmata;
pub mod pins;
pub mod telegram;

pub use error::{ParseError, ProtocolError};
pub use firmata::{FirmataCodec, FirmataCommand, FirmataMessage, FirmwareInfo};
pub use pins::{AnalogMap, CapabilityTable, Level, PinMode};
pub use telegram::{ChannelSample, DisplayTarget, Telegram, TelegramCodec, TelegramCommand};

/// Identifies which wire protocol a board speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Protocol {
    /// Firmata (Arduino-class boards)
    Firmata,
    /// Fixed 16-byte telegrams (PicoBoard-class sensor boards)
    Telegram,
}

impl Protocol {
    /// Returns a human-readable name for the protocol
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Firmata => "Firmata",
            Protocol::Telegram => "Telegram",
        }
    }

    /// Serial bit rate the board firmware runs at
    pub fn baud_rate(&self) -> u32 {
        match self {
            Protocol::Firmata => 57_600,
            Protocol::Telegram => 115_200,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firmata" | "arduino" => Ok(Protocol::Firmata),
            "telegram" | "picoboard" | "experisense" => Ok(Protocol::Telegram),
            other => Err(ProtocolError::InvalidResponse(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

/// Trait for codecs that turn a byte stream into messages
pub trait ProtocolCodec {
    /// The message type produced by this codec
    type Message;

    /// Push raw bytes into the codec
    fn push_bytes(&mut self, data: &[u8]);

    /// Take the next complete message, or the error that replaced it
    fn next_message(&mut self) -> Option<Result<Self::Message, ParseError>>;

    /// Drop buffered bytes and reset decoding state
    fn clear(&mut self);
}

/// Trait for commands that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}

/// A message from either kind of board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    Firmata(FirmataMessage),
    Telegram(Telegram),
}

/// Object-safe decoder for board → host traffic of any protocol
pub trait DeviceCodec: Send {
    /// Protocol this codec decodes
    fn protocol(&self) -> Protocol;

    /// Push raw bytes into the codec
    fn push_bytes(&mut self, data: &[u8]);

    /// Take the next decoded message
    fn next_message(&mut self) -> Option<Result<DeviceMessage, ParseError>>;

    /// Reset decoding state
    fn clear(&mut self);
}

impl DeviceCodec for FirmataCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Firmata
    }

    fn push_bytes(&mut self, data: &[u8]) {
        ProtocolCodec::push_bytes(self, data);
    }

    fn next_message(&mut self) -> Option<Result<DeviceMessage, ParseError>> {
        ProtocolCodec::next_message(self).map(|r| r.map(DeviceMessage::Firmata))
    }

    fn clear(&mut self) {
        ProtocolCodec::clear(self);
    }
}

impl DeviceCodec for TelegramCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Telegram
    }

    fn push_bytes(&mut self, data: &[u8]) {
        ProtocolCodec::push_bytes(self, data);
    }

    fn next_message(&mut self) -> Option<Result<DeviceMessage, ParseError>> {
        ProtocolCodec::next_message(self).map(|r| r.map(DeviceMessage::Telegram))
    }

    fn clear(&mut self) {
        ProtocolCodec::clear(self);
    }
}

/// Create a board → host decoder for the given protocol
pub fn create_device_codec(protocol: Protocol) -> Box<dyn DeviceCodec> {
    match protocol {
        Protocol::Firmata => Box::new(FirmataCodec::new()),
        Protocol::Telegram => Box::new(TelegramCodec::new()),
    }
}
