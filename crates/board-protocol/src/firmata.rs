//! Firmata Protocol Implementation
//!
//! Firmata frames every message with a status byte (high bit set) followed
//! by 7-bit data bytes. Short messages carry a channel or port number in the
//! low nibble of the status byte; everything else travels inside a sysex
//! envelope.
//!
//! # Message Format
//! ```text
//! 90|port  lsb msb            digital port value (14 bits)
//! E0|chan  lsb msb            analog sample / PWM or servo value
//! F9       major minor        protocol version
//! F0 id [data...] F7          sysex (firmware, capabilities, mappings...)
//! ```
//!
//! 14-bit values are split into two 7-bit bytes, low byte first.

use std::collections::VecDeque;

use tracing::trace;

use crate::error::ParseError;
use crate::pins::{AnalogMap, CapabilityTable, PinMode, MAX_PINS};
use crate::{EncodeCommand, ProtocolCodec};

/// Set pin mode
pub const PIN_MODE: u8 = 0xF4;
/// Enable/disable digital port reporting (`| port`)
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Enable/disable analog channel reporting (`| channel`)
pub const REPORT_ANALOG: u8 = 0xC0;
/// Digital port message (`| port`)
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Analog message (`| channel`)
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Protocol version report
pub const REPORT_VERSION: u8 = 0xF9;
/// Start of a sysex message
pub const START_SYSEX: u8 = 0xF0;
/// End of a sysex message
pub const END_SYSEX: u8 = 0xF7;

/// Sysex: firmware name and version
pub const QUERY_FIRMWARE: u8 = 0x79;
/// Sysex: ask for the analog channel mapping
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Sysex: analog channel mapping reply
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Sysex: ask for supported pin modes
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Sysex: supported pin modes reply
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Sysex: ask for a pin's mode and state
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Sysex: pin mode and state reply
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Sysex: analog write to pins above 15
pub const EXTENDED_ANALOG: u8 = 0x6F;

/// Largest sysex payload kept while decoding
pub const MAX_DATA_BYTES: usize = 4096;
/// Digital ports addressable by a status byte
pub const PORT_COUNT: usize = 16;
/// Analog channels addressable by a status byte
pub const ANALOG_CHANNELS: usize = 16;

/// Terminates one pin's entry in a capability response
const CAPABILITY_TERMINATOR: u8 = 0x7F;

/// Firmware identity reported in reply to a firmware query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    pub name: String,
}

impl std::fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "firmware {}.{}", self.major, self.minor)
        } else {
            write!(f, "{} {}.{}", self.name, self.major, self.minor)
        }
    }
}

/// Messages sent by the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmataMessage {
    /// Value of one 8-pin digital input port
    DigitalPort { port: u8, value: u16 },
    /// New sample on an analog channel (0..1023 on 10-bit boards)
    AnalogSample { channel: u8, value: u16 },
    /// Firmata protocol version
    Version { major: u8, minor: u8 },
    /// Reply (or echo) of a firmware query
    Firmware(FirmwareInfo),
    /// Supported modes for every pin
    Capabilities(CapabilityTable),
    /// Analog channel for every pin
    AnalogMapping(AnalogMap),
    /// Current mode and state of one pin
    PinState { pin: u8, mode: u8, state: u32 },
    /// Sysex message without a dedicated decoder
    Sysex { command: u8, data: Vec<u8> },
}

/// Resumable decoder position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    /// Collecting the data bytes of a short message. Bytes are stored from
    /// the end of `args`, so `args[1]` holds the first wire byte.
    AwaitingArgs {
        opcode: u8,
        channel: u8,
        remaining: usize,
        args: [u8; 2],
    },
    InSysex,
}

/// Streaming decoder for board → host Firmata traffic
///
/// Bytes may be pushed in chunks of any size; the decoder keeps its position
/// between calls.
pub struct FirmataCodec {
    state: DecodeState,
    sysex: Vec<u8>,
    ready: VecDeque<Result<FirmataMessage, ParseError>>,
}

impl FirmataCodec {
    /// Create a new Firmata decoder
    pub fn new() -> Self {
        Self {
            state: DecodeState::Idle,
            sysex: Vec::with_capacity(64),
            ready: VecDeque::new(),
        }
    }

    fn feed(&mut self, byte: u8) {
        match self.state {
            DecodeState::InSysex => {
                if byte == END_SYSEX {
                    self.state = DecodeState::Idle;
                    let payload = std::mem::take(&mut self.sysex);
                    self.ready.push_back(parse_sysex(&payload));
                } else if self.sysex.len() >= MAX_DATA_BYTES {
                    self.sysex.clear();
                    self.state = DecodeState::Idle;
                    self.ready.push_back(Err(ParseError::Overflow {
                        limit: MAX_DATA_BYTES,
                    }));
                } else {
                    self.sysex.push(byte);
                }
            }
            DecodeState::AwaitingArgs {
                opcode,
                channel,
                remaining,
                mut args,
            } if byte < 0x80 => {
                let remaining = remaining - 1;
                args[remaining] = byte;
                if remaining == 0 {
                    self.state = DecodeState::Idle;
                    self.ready
                        .push_back(Ok(complete_short_message(opcode, channel, args)));
                } else {
                    self.state = DecodeState::AwaitingArgs {
                        opcode,
                        channel,
                        remaining,
                        args,
                    };
                }
            }
            _ => self.start_command(byte),
        }
    }

    fn start_command(&mut self, byte: u8) {
        let (command, channel) = if byte < 0xF0 {
            (byte & 0xF0, byte & 0x0F)
        } else {
            (byte, 0)
        };

        self.state = match command {
            DIGITAL_MESSAGE | ANALOG_MESSAGE | REPORT_VERSION => DecodeState::AwaitingArgs {
                opcode: command,
                channel,
                remaining: 2,
                args: [0; 2],
            },
            START_SYSEX => {
                self.sysex.clear();
                DecodeState::InSysex
            }
            _ => {
                trace!("Firmata: ignoring byte 0x{:02X}", byte);
                DecodeState::Idle
            }
        };
    }
}

impl Default for FirmataCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for FirmataCodec {
    type Message = FirmataMessage;

    fn push_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.feed(byte);
        }
    }

    fn next_message(&mut self) -> Option<Result<FirmataMessage, ParseError>> {
        self.ready.pop_front()
    }

    fn clear(&mut self) {
        self.state = DecodeState::Idle;
        self.sysex.clear();
        self.ready.clear();
    }
}

/// Combine two stored 7-bit bytes: `args[0]` is the high part
fn compose_14bit(args: [u8; 2]) -> u16 {
    ((args[0] as u16) << 7) + args[1] as u16
}

fn complete_short_message(opcode: u8, channel: u8, args: [u8; 2]) -> FirmataMessage {
    match opcode {
        DIGITAL_MESSAGE => FirmataMessage::DigitalPort {
            port: channel,
            value: compose_14bit(args),
        },
        ANALOG_MESSAGE => FirmataMessage::AnalogSample {
            channel,
            value: compose_14bit(args),
        },
        _ => FirmataMessage::Version {
            major: args[1],
            minor: args[0],
        },
    }
}

fn parse_sysex(payload: &[u8]) -> Result<FirmataMessage, ParseError> {
    let Some((&command, data)) = payload.split_first() else {
        return Err(ParseError::Truncated {
            context: "sysex",
            needed: 1,
        });
    };

    match command {
        CAPABILITY_RESPONSE => parse_capabilities(data).map(FirmataMessage::Capabilities),
        ANALOG_MAPPING_RESPONSE => parse_analog_mapping(data).map(FirmataMessage::AnalogMapping),
        QUERY_FIRMWARE => Ok(FirmataMessage::Firmware(parse_firmware(data))),
        PIN_STATE_RESPONSE => parse_pin_state(data),
        _ => Ok(FirmataMessage::Sysex {
            command,
            data: data.to_vec(),
        }),
    }
}

/// Decode per-pin `(mode, resolution)` lists, each ended by 0x7F
fn parse_capabilities(data: &[u8]) -> Result<CapabilityTable, ParseError> {
    let mut table = CapabilityTable::new();
    let mut i = 0;
    let mut pin = 0usize;

    while i < data.len() && pin < MAX_PINS {
        loop {
            let Some(&mode) = data.get(i) else {
                return Err(ParseError::Truncated {
                    context: "capability response",
                    needed: 1,
                });
            };
            i += 1;
            if mode == CAPABILITY_TERMINATOR {
                break;
            }
            // resolution byte is not used
            if data.get(i).is_none() {
                return Err(ParseError::Truncated {
                    context: "capability response",
                    needed: 1,
                });
            }
            i += 1;
            match PinMode::from_u8(mode) {
                Some(mode) => table.record(pin as u8, mode),
                None => trace!("Firmata: pin {} reports unknown mode 0x{:02X}", pin, mode),
            }
        }
        pin += 1;
    }

    table.set_pin_count(pin);
    Ok(table)
}

fn parse_analog_mapping(data: &[u8]) -> Result<AnalogMap, ParseError> {
    if data.len() > MAX_PINS {
        return Err(ParseError::OutOfRange {
            what: "analog mapping entries",
            value: data.len(),
            max: MAX_PINS,
        });
    }
    Ok(AnalogMap::from_pin_channels(data))
}

fn parse_firmware(data: &[u8]) -> FirmwareInfo {
    let major = data.first().copied().unwrap_or(0);
    let minor = data.get(1).copied().unwrap_or(0);
    let name = data
        .get(2..)
        .unwrap_or(&[])
        .chunks(2)
        .filter_map(|pair| {
            let lsb = pair[0] as u32;
            let msb = pair.get(1).copied().unwrap_or(0) as u32;
            char::from_u32(lsb | (msb << 7))
        })
        .collect();

    FirmwareInfo { major, minor, name }
}

fn parse_pin_state(data: &[u8]) -> Result<FirmataMessage, ParseError> {
    if data.len() < 3 {
        return Err(ParseError::Truncated {
            context: "pin state response",
            needed: 3 - data.len(),
        });
    }
    let pin = data[0];
    if pin as usize >= MAX_PINS {
        return Err(ParseError::OutOfRange {
            what: "pin",
            value: pin as usize,
            max: MAX_PINS - 1,
        });
    }
    let state = data[2..]
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | ((*b as u32 & 0x7F) << (7 * i)));

    Ok(FirmataMessage::PinState {
        pin,
        mode: data[1],
        state,
    })
}

/// Split a value into 7-bit bytes, low byte first
fn push_14bit(out: &mut Vec<u8>, value: u16) {
    out.push((value & 0x7F) as u8);
    out.push(((value >> 7) & 0x7F) as u8);
}

/// Reporting resolution advertised for a mode in capability responses
fn default_resolution(mode: PinMode) -> u8 {
    match mode {
        PinMode::Analog => 10,
        PinMode::Pwm => 8,
        PinMode::Servo => 14,
        _ => 1,
    }
}

impl EncodeCommand for FirmataMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            FirmataMessage::DigitalPort { port, value } => {
                out.push(DIGITAL_MESSAGE | (port & 0x0F));
                push_14bit(&mut out, *value);
            }
            FirmataMessage::AnalogSample { channel, value } => {
                out.push(ANALOG_MESSAGE | (channel & 0x0F));
                push_14bit(&mut out, *value);
            }
            FirmataMessage::Version { major, minor } => {
                out.extend_from_slice(&[REPORT_VERSION, *major, *minor]);
            }
            FirmataMessage::Firmware(info) => {
                out.extend_from_slice(&[START_SYSEX, QUERY_FIRMWARE, info.major, info.minor]);
                for c in info.name.chars() {
                    let code = c as u32;
                    out.push((code & 0x7F) as u8);
                    out.push(((code >> 7) & 0x7F) as u8);
                }
                out.push(END_SYSEX);
            }
            FirmataMessage::Capabilities(table) => {
                out.extend_from_slice(&[START_SYSEX, CAPABILITY_RESPONSE]);
                for pin in 0..table.pin_count() {
                    for mode in table.modes_for(pin as u8) {
                        out.push(mode.as_u8());
                        out.push(default_resolution(mode));
                    }
                    out.push(CAPABILITY_TERMINATOR);
                }
                out.push(END_SYSEX);
            }
            FirmataMessage::AnalogMapping(map) => {
                out.extend_from_slice(&[START_SYSEX, ANALOG_MAPPING_RESPONSE]);
                out.extend_from_slice(map.entries());
                out.push(END_SYSEX);
            }
            FirmataMessage::PinState { pin, mode, state } => {
                out.extend_from_slice(&[START_SYSEX, PIN_STATE_RESPONSE, *pin, *mode]);
                let mut rest = *state;
                loop {
                    out.push((rest & 0x7F) as u8);
                    rest >>= 7;
                    if rest == 0 {
                        break;
                    }
                }
                out.push(END_SYSEX);
            }
            FirmataMessage::Sysex { command, data } => {
                out.extend_from_slice(&[START_SYSEX, *command]);
                out.extend_from_slice(data);
                out.push(END_SYSEX);
            }
        }
        out
    }
}

/// Commands sent by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmataCommand {
    /// Put a pin into a mode
    SetPinMode { pin: u8, mode: PinMode },
    /// Write all eight output bits of a port
    DigitalPortWrite { port: u8, value: u8 },
    /// PWM duty or servo angle for pins 0..15
    AnalogWrite { pin: u8, value: u16 },
    /// PWM duty or servo angle for any pin
    ExtendedAnalog { pin: u8, value: u16 },
    /// Enable or disable reporting of a digital port
    ReportDigital { port: u8, enable: bool },
    /// Enable or disable reporting of an analog channel
    ReportAnalog { channel: u8, enable: bool },
    QueryFirmware,
    QueryCapabilities,
    QueryAnalogMapping,
    QueryPinState { pin: u8 },
}

impl FirmataCommand {
    /// Analog write using the short form where the pin fits in a nibble
    pub fn analog(pin: u8, value: u16) -> Self {
        if pin <= 0x0F {
            FirmataCommand::AnalogWrite { pin, value }
        } else {
            FirmataCommand::ExtendedAnalog { pin, value }
        }
    }
}

impl EncodeCommand for FirmataCommand {
    fn encode(&self) -> Vec<u8> {
        match *self {
            FirmataCommand::SetPinMode { pin, mode } => vec![PIN_MODE, pin, mode.as_u8()],
            FirmataCommand::DigitalPortWrite { port, value } => {
                vec![DIGITAL_MESSAGE | (port & 0x0F), value & 0x7F, value >> 7]
            }
            FirmataCommand::AnalogWrite { pin, value } => {
                let mut out = vec![ANALOG_MESSAGE | (pin & 0x0F)];
                push_14bit(&mut out, value);
                out
            }
            FirmataCommand::ExtendedAnalog { pin, value } => {
                let mut out = vec![START_SYSEX, EXTENDED_ANALOG, pin];
                push_14bit(&mut out, value);
                out.push(END_SYSEX);
                out
            }
            FirmataCommand::ReportDigital { port, enable } => {
                vec![REPORT_DIGITAL | (port & 0x0F), enable as u8]
            }
            FirmataCommand::ReportAnalog { channel, enable } => {
                vec![REPORT_ANALOG | (channel & 0x0F), enable as u8]
            }
            FirmataCommand::QueryFirmware => vec![START_SYSEX, QUERY_FIRMWARE, END_SYSEX],
            FirmataCommand::QueryCapabilities => vec![START_SYSEX, CAPABILITY_QUERY, END_SYSEX],
            FirmataCommand::QueryAnalogMapping => {
                vec![START_SYSEX, ANALOG_MAPPING_QUERY, END_SYSEX]
            }
            FirmataCommand::QueryPinState { pin } => {
                vec![START_SYSEX, PIN_STATE_QUERY, pin, END_SYSEX]
            }
        }
    }
}

/// Streaming parser for host → board Firmata traffic
///
/// Used by simulated boards. Unlike [`FirmataCodec`] this keeps raw bytes
/// buffered and cuts complete frames out of them.
pub struct FirmataRequestCodec {
    buffer: Vec<u8>,
}

impl FirmataRequestCodec {
    /// Create a new request parser
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Length of the frame starting with `status`, if it is fixed
    fn fixed_len(status: u8) -> Option<usize> {
        match status {
            PIN_MODE => Some(3),
            s if s < 0xF0 && matches!(s & 0xF0, DIGITAL_MESSAGE | ANALOG_MESSAGE) => Some(3),
            s if s < 0xF0 && matches!(s & 0xF0, REPORT_DIGITAL | REPORT_ANALOG) => Some(2),
            _ => None,
        }
    }

    fn parse_fixed(frame: &[u8]) -> Result<FirmataCommand, ParseError> {
        if frame[1..].iter().any(|b| b & 0x80 != 0) {
            return Err(ParseError::InvalidFrame(format!(
                "status byte inside frame {:02X?}",
                frame
            )));
        }
        let status = frame[0];
        if status == PIN_MODE {
            let mode = PinMode::from_u8(frame[2]).ok_or_else(|| {
                ParseError::InvalidFrame(format!("unknown pin mode 0x{:02X}", frame[2]))
            })?;
            return Ok(FirmataCommand::SetPinMode {
                pin: frame[1],
                mode,
            });
        }
        let low = status & 0x0F;
        let cmd = match status & 0xF0 {
            DIGITAL_MESSAGE => FirmataCommand::DigitalPortWrite {
                port: low,
                value: frame[1] | (frame[2] << 7),
            },
            ANALOG_MESSAGE => FirmataCommand::AnalogWrite {
                pin: low,
                value: compose_14bit([frame[2], frame[1]]),
            },
            REPORT_DIGITAL => FirmataCommand::ReportDigital {
                port: low,
                enable: frame[1] != 0,
            },
            _ => FirmataCommand::ReportAnalog {
                channel: low,
                enable: frame[1] != 0,
            },
        };
        Ok(cmd)
    }

    fn parse_sysex_request(frame: &[u8]) -> Result<FirmataCommand, ParseError> {
        // frame = F0 id [data..] F7
        let body = &frame[1..frame.len() - 1];
        let Some((&id, data)) = body.split_first() else {
            return Err(ParseError::Truncated {
                context: "sysex request",
                needed: 1,
            });
        };
        match id {
            QUERY_FIRMWARE => Ok(FirmataCommand::QueryFirmware),
            CAPABILITY_QUERY => Ok(FirmataCommand::QueryCapabilities),
            ANALOG_MAPPING_QUERY => Ok(FirmataCommand::QueryAnalogMapping),
            PIN_STATE_QUERY => data
                .first()
                .map(|&pin| FirmataCommand::QueryPinState { pin })
                .ok_or(ParseError::Truncated {
                    context: "pin state query",
                    needed: 1,
                }),
            EXTENDED_ANALOG => {
                let Some((&pin, value)) = data.split_first() else {
                    return Err(ParseError::Truncated {
                        context: "extended analog",
                        needed: 2,
                    });
                };
                let value = value
                    .iter()
                    .take(2)
                    .enumerate()
                    .fold(0u16, |acc, (i, b)| acc | ((*b as u16 & 0x7F) << (7 * i)));
                Ok(FirmataCommand::ExtendedAnalog { pin, value })
            }
            other => Err(ParseError::InvalidFrame(format!(
                "unsupported sysex 0x{:02X}",
                other
            ))),
        }
    }
}

impl Default for FirmataRequestCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for FirmataRequestCodec {
    type Message = FirmataCommand;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_message(&mut self) -> Option<Result<FirmataCommand, ParseError>> {
        loop {
            // Resync on the next status byte
            let Some(start) = self.buffer.iter().position(|b| b & 0x80 != 0) else {
                self.buffer.clear();
                return None;
            };
            self.buffer.drain(..start);

            let status = self.buffer[0];
            if status == START_SYSEX {
                let Some(end) = self.buffer.iter().position(|&b| b == END_SYSEX) else {
                    if self.buffer.len() > MAX_DATA_BYTES {
                        self.buffer.clear();
                        return Some(Err(ParseError::Overflow {
                            limit: MAX_DATA_BYTES,
                        }));
                    }
                    return None;
                };
                let frame: Vec<u8> = self.buffer.drain(..=end).collect();
                return Some(Self::parse_sysex_request(&frame));
            }

            let Some(len) = Self::fixed_len(status) else {
                trace!("Firmata request: skipping byte 0x{:02X}", status);
                self.buffer.remove(0);
                continue;
            };
            if self.buffer.len() < len {
                return None;
            }
            let frame: Vec<u8> = self.buffer.drain(..len).collect();
            return Some(Self::parse_fixed(&frame));
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Scale a 0..100 percentage to an 8-bit PWM duty, clamping out-of-range input
pub fn percent_to_pwm(percent: f64) -> u16 {
    let clamped = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    (clamped * 255.0 / 100.0).round() as u16
}

/// Clamp a servo angle to 0..180 degrees
pub fn clamp_servo_angle(degrees: i32) -> u16 {
    degrees.clamp(0, 180) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<FirmataMessage, ParseError>> {
        let mut codec = FirmataCodec::new();
        codec.push_bytes(bytes);
        std::iter::from_fn(|| codec.next_message()).collect()
    }

    #[test]
    fn test_digital_message_composes_low_byte_first() {
        // Stored buffer reads [0x08, 0x7F] once both bytes are in
        let msgs = decode_all(&[DIGITAL_MESSAGE | 0x02, 0x7F, 0x08]);
        assert_eq!(
            msgs,
            vec![Ok(FirmataMessage::DigitalPort {
                port: 2,
                value: (0x08 << 7) + 0x7F
            })]
        );
        assert_eq!((0x08 << 7) + 0x7F, 1151);
    }

    #[test]
    fn test_analog_sample() {
        let msgs = decode_all(&[ANALOG_MESSAGE | 0x03, 0x7F, 0x07]);
        assert_eq!(
            msgs,
            vec![Ok(FirmataMessage::AnalogSample {
                channel: 3,
                value: 1023
            })]
        );
    }

    #[test]
    fn test_report_version() {
        let msgs = decode_all(&[REPORT_VERSION, 0x02, 0x05]);
        assert_eq!(
            msgs,
            vec![Ok(FirmataMessage::Version { major: 2, minor: 5 })]
        );
    }

    #[test]
    fn test_split_across_chunks() {
        let mut codec = FirmataCodec::new();
        codec.push_bytes(&[ANALOG_MESSAGE | 0x01]);
        assert!(codec.next_message().is_none());
        codec.push_bytes(&[0x10]);
        assert!(codec.next_message().is_none());
        codec.push_bytes(&[0x01, START_SYSEX, QUERY_FIRMWARE]);
        assert_eq!(
            codec.next_message(),
            Some(Ok(FirmataMessage::AnalogSample {
                channel: 1,
                value: 0x90
            }))
        );
        codec.push_bytes(&[0x02, 0x05, END_SYSEX]);
        assert_eq!(
            codec.next_message(),
            Some(Ok(FirmataMessage::Firmware(FirmwareInfo {
                major: 2,
                minor: 5,
                name: String::new()
            })))
        );
    }

    #[test]
    fn test_status_byte_abandons_pending_message() {
        let msgs = decode_all(&[DIGITAL_MESSAGE, 0x01, ANALOG_MESSAGE, 0x05, 0x00]);
        assert_eq!(
            msgs,
            vec![Ok(FirmataMessage::AnalogSample {
                channel: 0,
                value: 5
            })]
        );
    }

    #[test]
    fn test_firmware_name() {
        let msgs = decode_all(&[
            START_SYSEX,
            QUERY_FIRMWARE,
            2,
            5,
            b'S',
            0,
            b'F',
            0,
            END_SYSEX,
        ]);
        match &msgs[0] {
            Ok(FirmataMessage::Firmware(info)) => {
                assert_eq!(info.name, "SF");
                assert_eq!(info.to_string(), "SF 2.5");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_capability_response() {
        let msgs = decode_all(&[
            START_SYSEX,
            CAPABILITY_RESPONSE,
            0x7F, // pin 0: nothing
            0x00,
            1,
            0x01,
            1,
            0x7F, // pin 1: input, output
            0x02,
            10,
            0x03,
            8,
            0x7F, // pin 2: analog, pwm
            END_SYSEX,
        ]);
        let Ok(FirmataMessage::Capabilities(table)) = &msgs[0] else {
            panic!("expected capabilities, got {:?}", msgs);
        };
        assert_eq!(table.pin_count(), 3);
        assert!(table.modes_for(0).is_empty());
        assert_eq!(table.modes_for(1), vec![PinMode::Input, PinMode::Output]);
        assert!(table.has_capability(2, PinMode::Pwm));
        assert!(!table.has_capability(1, PinMode::Pwm));
    }

    #[test]
    fn test_truncated_capability_response_fails_closed() {
        let msgs = decode_all(&[START_SYSEX, CAPABILITY_RESPONSE, 0x00, 1, 0x01, END_SYSEX]);
        assert!(matches!(msgs[0], Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_analog_mapping_response() {
        let msgs = decode_all(&[START_SYSEX, ANALOG_MAPPING_RESPONSE, 127, 127, 0, 1, END_SYSEX]);
        let Ok(FirmataMessage::AnalogMapping(map)) = &msgs[0] else {
            panic!("expected mapping, got {:?}", msgs);
        };
        assert_eq!(map.pin_for_channel(0), Some(2));
        assert_eq!(map.pin_for_channel(1), Some(3));
        assert_eq!(map.channel_for_pin(0), None);
    }

    #[test]
    fn test_pin_state_response() {
        let msgs = decode_all(&[START_SYSEX, PIN_STATE_RESPONSE, 13, 0x01, 0x01, END_SYSEX]);
        assert_eq!(
            msgs,
            vec![Ok(FirmataMessage::PinState {
                pin: 13,
                mode: 1,
                state: 1
            })]
        );
    }

    #[test]
    fn test_pin_state_out_of_range_pin() {
        let msgs = decode_all(&[START_SYSEX, PIN_STATE_RESPONSE, 0x80, 0x01, 0x00, END_SYSEX]);
        assert!(matches!(
            msgs[0],
            Err(ParseError::OutOfRange { what: "pin", .. })
        ));
    }

    #[test]
    fn test_short_pin_state_response() {
        let msgs = decode_all(&[START_SYSEX, PIN_STATE_RESPONSE, 13, END_SYSEX]);
        assert_eq!(
            msgs,
            vec![Err(ParseError::Truncated {
                context: "pin state response",
                needed: 2
            })]
        );
    }

    #[test]
    fn test_sysex_overflow_resets() {
        let mut bytes = vec![START_SYSEX, 0x71];
        bytes.extend(std::iter::repeat(0x01).take(MAX_DATA_BYTES + 10));
        bytes.push(END_SYSEX);
        bytes.extend_from_slice(&[REPORT_VERSION, 2, 6]);

        let msgs = decode_all(&bytes);
        assert_eq!(
            msgs,
            vec![
                Err(ParseError::Overflow {
                    limit: MAX_DATA_BYTES
                }),
                Ok(FirmataMessage::Version { major: 2, minor: 6 })
            ]
        );
    }

    #[test]
    fn test_encode_host_commands() {
        assert_eq!(
            FirmataCommand::SetPinMode {
                pin: 13,
                mode: PinMode::Output
            }
            .encode(),
            vec![0xF4, 13, 0x01]
        );
        assert_eq!(
            FirmataCommand::DigitalPortWrite {
                port: 1,
                value: 0xA0
            }
            .encode(),
            vec![0x91, 0x20, 0x01]
        );
        assert_eq!(
            FirmataCommand::AnalogWrite { pin: 9, value: 255 }.encode(),
            vec![0xE9, 0x7F, 0x01]
        );
        assert_eq!(
            FirmataCommand::QueryPinState { pin: 5 }.encode(),
            vec![0xF0, 0x6D, 5, 0xF7]
        );
        assert_eq!(
            FirmataCommand::ReportAnalog {
                channel: 2,
                enable: true
            }
            .encode(),
            vec![0xC2, 0x01]
        );
    }

    #[test]
    fn test_analog_picks_extended_form_for_high_pins() {
        assert_eq!(
            FirmataCommand::analog(20, 90).encode(),
            vec![0xF0, EXTENDED_ANALOG, 20, 90, 0, 0xF7]
        );
        assert_eq!(FirmataCommand::analog(3, 90).encode(), vec![0xE3, 90, 0]);
    }

    #[test]
    fn test_request_codec_parses_host_traffic() {
        let mut codec = FirmataRequestCodec::new();
        codec.push_bytes(&[0x00, 0xF4, 13, 0x01, 0x91, 0x20]);
        assert_eq!(
            codec.next_message(),
            Some(Ok(FirmataCommand::SetPinMode {
                pin: 13,
                mode: PinMode::Output
            }))
        );
        assert!(codec.next_message().is_none());
        codec.push_bytes(&[0x01, 0xF0, 0x6D, 4, 0xF7]);
        assert_eq!(
            codec.next_message(),
            Some(Ok(FirmataCommand::DigitalPortWrite {
                port: 1,
                value: 0xA0
            }))
        );
        assert_eq!(
            codec.next_message(),
            Some(Ok(FirmataCommand::QueryPinState { pin: 4 }))
        );
    }

    #[test]
    fn test_percent_to_pwm_clamps() {
        assert_eq!(percent_to_pwm(-5.0), 0);
        assert_eq!(percent_to_pwm(150.0), 255);
        assert_eq!(percent_to_pwm(50.0), 128);
        assert_eq!(percent_to_pwm(f64::NAN), 0);
    }

    #[test]
    fn test_servo_clamp() {
        assert_eq!(clamp_servo_angle(-10), 0);
        assert_eq!(clamp_servo_angle(90), 90);
        assert_eq!(clamp_servo_angle(270), 180);
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Vec<Result<FirmataMessage, ParseError>> {
        let mut codec = FirmataCodec::new();
        let mut out = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            let end = cut.clamp(start, bytes.len());
            codec.push_bytes(&bytes[start..end]);
            out.extend(std::iter::from_fn(|| codec.next_message()));
            start = end;
        }
        codec.push_bytes(&bytes[start..]);
        out.extend(std::iter::from_fn(|| codec.next_message()));
        out
    }

    proptest! {
        #[test]
        fn chunking_never_changes_output(
            bytes in proptest::collection::vec(any::<u8>(), 0..512),
            mut cuts in proptest::collection::vec(0usize..512, 0..8),
        ) {
            cuts.sort_unstable();
            let whole = decode_in_chunks(&bytes, &[]);
            prop_assert_eq!(decode_in_chunks(&bytes, &cuts), whole);
        }

        #[test]
        fn analog_samples_survive_any_split(channel in 0u8..16, value in 0u16..16384, cut in 0usize..4) {
            let wire = [ANALOG_MESSAGE | channel, (value & 0x7F) as u8, (value >> 7) as u8];
            let msgs = decode_in_chunks(&wire, &[cut]);
            prop_assert_eq!(msgs, vec![Ok(FirmataMessage::AnalogSample { channel, value })]);
        }
    }
}
