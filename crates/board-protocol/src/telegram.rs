//! Fixed-Telegram Protocol Implementation
//!
//! Sensor boards of the PicoBoard family answer every single-byte poll with
//! a 16-byte telegram: eight 2-byte pairs, one per channel.
//!
//! # Pair Format
//! ```text
//! byte 0:  1 S C C C V V V     S = sensitive flag, C = channel, V = value bits 9..7
//! byte 1:  0 V V V V V V V     value bits 6..0
//! ```
//!
//! Channel 7 carries the firmware identity instead of a sensor value.

use std::collections::VecDeque;

use crate::error::ParseError;
use crate::{EncodeCommand, ProtocolCodec};

/// Poll for a telegram
pub const PING: u8 = 0x02;
/// Sensitivity switch flag (`| sensitive << 3 | channel`)
pub const SENSITIVITY_SWITCH: u8 = 0x80;
/// Display write flag (`| target`), followed by the value byte
pub const DISPLAY_WRITE: u8 = 0x40;
/// Blank both displays
pub const CLEAR_DISPLAYS: u8 = 0x44;

/// Channel/value pairs per telegram
pub const PAIRS_PER_TELEGRAM: usize = 8;
/// Bytes per telegram
pub const TELEGRAM_LEN: usize = PAIRS_PER_TELEGRAM * 2;
/// Slot that carries the firmware identity
pub const ID_CHANNEL: u8 = 7;
/// Identity reported by a supported board
pub const FIRMWARE_ID: u16 = 0x01;
/// Number of sensor channels (0..6)
pub const SENSOR_CHANNELS: usize = 7;

/// One sensor reading from a telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelSample {
    /// Channel index, 0..6
    pub channel: u8,
    /// 10-bit reading
    pub value: u16,
    /// Whether the channel is in its sensitive range
    pub sensitive: bool,
}

/// A decoded telegram
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Telegram {
    /// Sensor readings in wire order
    pub samples: Vec<ChannelSample>,
    /// Value of the identity slot, if present
    pub firmware_id: Option<u16>,
}

impl Telegram {
    /// Whether this telegram came from a supported board
    pub fn is_valid_device(&self) -> bool {
        self.firmware_id == Some(FIRMWARE_ID)
    }

    /// Decode exactly one telegram
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < TELEGRAM_LEN {
            return Err(ParseError::Truncated {
                context: "telegram",
                needed: TELEGRAM_LEN - bytes.len(),
            });
        }

        let mut telegram = Telegram::default();
        for pair in bytes[..TELEGRAM_LEN].chunks_exact(2) {
            let hb = pair[0] & 0x7F;
            let lb = pair[1] & 0x7F;
            let channel = (hb >> 3) & 0x07;
            let value = (((hb & 0x07) as u16) << 7) + lb as u16;

            if channel == ID_CHANNEL {
                telegram.firmware_id = Some(value);
                continue;
            }
            telegram.samples.push(ChannelSample {
                channel,
                value,
                sensitive: (hb >> 6) != 0,
            });
        }
        Ok(telegram)
    }
}

impl EncodeCommand for Telegram {
    fn encode(&self) -> Vec<u8> {
        let encode_pair = |channel: u8, value: u16, sensitive: bool| {
            let hb = 0x80 | ((sensitive as u8) << 6) | ((channel & 0x07) << 3)
                | ((value >> 7) as u8 & 0x07);
            [hb, (value & 0x7F) as u8]
        };

        let mut out = Vec::with_capacity(TELEGRAM_LEN);
        for sample in &self.samples {
            out.extend_from_slice(&encode_pair(sample.channel, sample.value, sample.sensitive));
        }
        if let Some(id) = self.firmware_id {
            out.extend_from_slice(&encode_pair(ID_CHANNEL, id, false));
        }
        out
    }
}

/// Streaming telegram decoder
///
/// Accumulates bytes until a full telegram is available. Bytes beyond one
/// telegram are kept for the next one.
pub struct TelegramCodec {
    buffer: Vec<u8>,
    ready: VecDeque<Result<Telegram, ParseError>>,
}

impl TelegramCodec {
    /// Create a new telegram decoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(TELEGRAM_LEN * 2),
            ready: VecDeque::new(),
        }
    }
}

impl Default for TelegramCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for TelegramCodec {
    type Message = Telegram;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= TELEGRAM_LEN {
            let frame: Vec<u8> = self.buffer.drain(..TELEGRAM_LEN).collect();
            self.ready.push_back(Telegram::decode(&frame));
        }
    }

    fn next_message(&mut self) -> Option<Result<Telegram, ParseError>> {
        self.ready.pop_front()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }
}

/// Which segment display a number goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisplayTarget {
    First = 1,
    Second = 2,
    /// Two-digit number across both displays
    Both = 3,
}

/// Commands sent by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramCommand {
    /// Request one telegram
    Ping,
    /// Switch a channel between normal and sensitive range
    SetSensitivity { channel: u8, sensitive: bool },
    /// Show a number on a display
    ShowNumber { target: DisplayTarget, value: u8 },
    /// Blank both displays
    ClearDisplays,
}

impl TelegramCommand {
    /// Decode one command from the front of `bytes`, returning bytes used
    pub fn decode(bytes: &[u8]) -> Option<Result<(Self, usize), ParseError>> {
        let &first = bytes.first()?;
        let cmd = match first {
            PING => (TelegramCommand::Ping, 1),
            CLEAR_DISPLAYS => (TelegramCommand::ClearDisplays, 1),
            b if b & SENSITIVITY_SWITCH != 0 => (
                TelegramCommand::SetSensitivity {
                    channel: b & 0x07,
                    sensitive: b & 0x08 != 0,
                },
                1,
            ),
            b if b & DISPLAY_WRITE != 0 => {
                let target = match b & 0x03 {
                    1 => DisplayTarget::First,
                    2 => DisplayTarget::Second,
                    3 => DisplayTarget::Both,
                    _ => {
                        return Some(Err(ParseError::InvalidFrame(format!(
                            "display target 0x{:02X}",
                            b
                        ))))
                    }
                };
                let &value = bytes.get(1)?;
                (TelegramCommand::ShowNumber { target, value }, 2)
            }
            other => {
                return Some(Err(ParseError::InvalidFrame(format!(
                    "unknown command 0x{:02X}",
                    other
                ))))
            }
        };
        Some(Ok(cmd))
    }
}

impl EncodeCommand for TelegramCommand {
    fn encode(&self) -> Vec<u8> {
        match *self {
            TelegramCommand::Ping => vec![PING],
            TelegramCommand::SetSensitivity { channel, sensitive } => {
                vec![SENSITIVITY_SWITCH | ((sensitive as u8) << 3) | (channel & 0x07)]
            }
            TelegramCommand::ShowNumber { target, value } => {
                vec![DISPLAY_WRITE | target as u8, value]
            }
            TelegramCommand::ClearDisplays => vec![CLEAR_DISPLAYS],
        }
    }
}
