//! Virtual Firmata board
//!
//! Behaves like an Arduino Uno running StandardFirmata: it answers firmware,
//! capability, analog-mapping and pin-state queries, tracks pin modes and
//! outputs, and reports analog samples on every sampling tick for channels
//! whose reporting is enabled.
//!
//! Each analog input sits behind a divider whose range is chosen by the
//! digital pin numbered like the channel. While that pin is driven high the
//! board reports the channel's sensitive-range value.

use std::collections::{HashMap, VecDeque};

use board_protocol::firmata::{FirmataRequestCodec, ANALOG_CHANNELS, PORT_COUNT};
use board_protocol::pins::UNMAPPED_CHANNEL;
use board_protocol::{
    AnalogMap, CapabilityTable, EncodeCommand, FirmataCommand, FirmataMessage, FirmwareInfo,
    Level, PinMode, ProtocolCodec,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pins on an Uno
const UNO_PINS: u8 = 20;
/// First pin wired to an analog channel
const UNO_FIRST_ANALOG_PIN: u8 = 14;

/// Configuration for creating a virtual Firmata board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFirmataConfig {
    /// Display name/identifier
    pub id: String,
    /// Firmware name reported to firmware queries
    pub firmware_name: String,
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl Default for VirtualFirmataConfig {
    fn default() -> Self {
        Self {
            id: "Virtual Uno".to_string(),
            firmware_name: "StandardFirmata.ino".to_string(),
            firmware_major: 2,
            firmware_minor: 5,
        }
    }
}

/// A simulated Firmata board
pub struct VirtualFirmataBoard {
    id: String,
    firmware: FirmwareInfo,
    capabilities: CapabilityTable,
    analog_map: AnalogMap,
    codec: FirmataRequestCodec,
    modes: HashMap<u8, PinMode>,
    /// Output bits written per port
    outputs: [u8; PORT_COUNT],
    /// Input levels per port
    inputs: [u16; PORT_COUNT],
    /// Last PWM or servo value per pin
    analog_outputs: HashMap<u8, u16>,
    analog_inputs: [u16; ANALOG_CHANNELS],
    sensitive_inputs: [Option<u16>; ANALOG_CHANNELS],
    report_analog: [bool; ANALOG_CHANNELS],
    report_digital: [bool; PORT_COUNT],
    pending_output: VecDeque<Vec<u8>>,
    /// Received command log
    received: Vec<FirmataCommand>,
}

impl VirtualFirmataBoard {
    /// Create an Uno-like board with default firmware
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_config(VirtualFirmataConfig {
            id: id.into(),
            ..VirtualFirmataConfig::default()
        })
    }

    pub fn from_config(config: VirtualFirmataConfig) -> Self {
        Self {
            id: config.id,
            firmware: FirmwareInfo {
                major: config.firmware_major,
                minor: config.firmware_minor,
                name: config.firmware_name,
            },
            capabilities: uno_capabilities(),
            analog_map: uno_analog_map(),
            codec: FirmataRequestCodec::new(),
            modes: HashMap::new(),
            outputs: [0; PORT_COUNT],
            inputs: [0; PORT_COUNT],
            analog_outputs: HashMap::new(),
            analog_inputs: [0; ANALOG_CHANNELS],
            sensitive_inputs: [None; ANALOG_CHANNELS],
            report_analog: [false; ANALOG_CHANNELS],
            report_digital: [false; PORT_COUNT],
            pending_output: VecDeque::new(),
            received: Vec::new(),
        }
    }

    /// Replace the advertised capabilities
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn firmware(&self) -> &FirmwareInfo {
        &self.firmware
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    // ========================================================================
    // Host → board
    // ========================================================================

    /// Process bytes from the host; replies are queued for [`take_output`]
    ///
    /// [`take_output`]: Self::take_output
    pub fn process_bytes(&mut self, data: &[u8]) {
        self.codec.push_bytes(data);
        while let Some(result) = self.codec.next_message() {
            match result {
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => warn!("Virtual board {} ignoring bad request: {}", self.id, e),
            }
        }
    }

    fn handle_command(&mut self, cmd: FirmataCommand) {
        debug!("Virtual board {} <- {:?}", self.id, cmd);
        self.received.push(cmd);
        match cmd {
            FirmataCommand::QueryFirmware => {
                self.queue(FirmataMessage::Firmware(self.firmware.clone()));
            }
            FirmataCommand::QueryCapabilities => {
                self.queue(FirmataMessage::Capabilities(self.capabilities.clone()));
            }
            FirmataCommand::QueryAnalogMapping => {
                self.queue(FirmataMessage::AnalogMapping(self.analog_map.clone()));
            }
            FirmataCommand::QueryPinState { pin } => {
                let mode = self.modes.get(&pin).copied().unwrap_or(PinMode::Output);
                let state = match mode {
                    PinMode::Output => self.output_level(pin).is_high() as u32,
                    PinMode::Pwm | PinMode::Servo => {
                        self.analog_outputs.get(&pin).copied().unwrap_or(0) as u32
                    }
                    _ => 0,
                };
                self.queue(FirmataMessage::PinState {
                    pin,
                    mode: mode.as_u8(),
                    state,
                });
            }
            FirmataCommand::SetPinMode { pin, mode } => {
                if self.capabilities.has_capability(pin, mode) {
                    self.modes.insert(pin, mode);
                } else {
                    warn!(
                        "Virtual board {} pin {} cannot be {}",
                        self.id, pin, mode
                    );
                }
            }
            FirmataCommand::DigitalPortWrite { port, value } => {
                if let Some(slot) = self.outputs.get_mut(port as usize) {
                    *slot = value;
                }
            }
            FirmataCommand::AnalogWrite { pin, value }
            | FirmataCommand::ExtendedAnalog { pin, value } => {
                self.analog_outputs.insert(pin, value);
            }
            FirmataCommand::ReportAnalog { channel, enable } => {
                if let Some(slot) = self.report_analog.get_mut(channel as usize) {
                    *slot = enable;
                }
                if enable {
                    self.queue_sample(channel);
                }
            }
            FirmataCommand::ReportDigital { port, enable } => {
                if let Some(slot) = self.report_digital.get_mut(port as usize) {
                    *slot = enable;
                }
                if enable {
                    self.queue_port(port);
                }
            }
        }
    }

    // ========================================================================
    // Board → host
    // ========================================================================

    fn queue(&mut self, msg: FirmataMessage) {
        let bytes = msg.encode();
        debug!("Virtual board {} -> {:02X?}", self.id, bytes);
        self.pending_output.push_back(bytes);
    }

    fn queue_sample(&mut self, channel: u8) {
        if let Some(value) = self.sample(channel) {
            self.queue(FirmataMessage::AnalogSample { channel, value });
        }
    }

    fn queue_port(&mut self, port: u8) {
        if let Some(&value) = self.inputs.get(port as usize) {
            self.queue(FirmataMessage::DigitalPort { port, value });
        }
    }

    /// Report every enabled analog channel once
    pub fn sampling_tick(&mut self) {
        for channel in 0..ANALOG_CHANNELS as u8 {
            if self.report_analog[channel as usize] {
                self.queue_sample(channel);
            }
        }
    }

    /// Take the next queued reply
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    // ========================================================================
    // Simulated hardware
    // ========================================================================

    /// Value reported for `channel` given its range pin
    pub fn sample(&self, channel: u8) -> Option<u16> {
        let normal = *self.analog_inputs.get(channel as usize)?;
        let sensitive = self.sensitive_inputs[channel as usize];
        match sensitive {
            Some(value) if self.output_level(channel).is_high() => Some(value),
            _ => Some(normal),
        }
    }

    /// Set the normal-range reading of an analog channel
    pub fn set_analog(&mut self, channel: u8, value: u16) {
        if let Some(slot) = self.analog_inputs.get_mut(channel as usize) {
            *slot = value.min(1023);
        }
    }

    /// Set the reading of an analog channel while its range pin is high
    pub fn set_sensitive_analog(&mut self, channel: u8, value: u16) {
        if let Some(slot) = self.sensitive_inputs.get_mut(channel as usize) {
            *slot = Some(value.min(1023));
        }
    }

    /// Drive a digital input; reported at once if the port reports
    pub fn set_digital_input(&mut self, pin: u8, level: Level) {
        let port = pin / 8;
        let Some(value) = self.inputs.get_mut(port as usize) else {
            return;
        };
        let mask = 1u16 << (pin % 8);
        if level.is_high() {
            *value |= mask;
        } else {
            *value &= !mask;
        }
        if self.report_digital[port as usize] {
            self.queue_port(port);
        }
    }

    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    /// Level the host last wrote to `pin`
    pub fn output_level(&self, pin: u8) -> Level {
        let bits = self.outputs.get(pin as usize / 8).copied().unwrap_or(0);
        Level::from(bits & (1 << (pin % 8)) != 0)
    }

    /// Last PWM or servo value written to `pin`
    pub fn analog_output(&self, pin: u8) -> Option<u16> {
        self.analog_outputs.get(&pin).copied()
    }

    pub fn is_reporting_analog(&self, channel: u8) -> bool {
        self.report_analog
            .get(channel as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Every command received so far
    pub fn received(&self) -> &[FirmataCommand] {
        &self.received
    }
}

impl std::fmt::Debug for VirtualFirmataBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFirmataBoard")
            .field("id", &self.id)
            .field("firmware", &self.firmware)
            .field("modes", &self.modes)
            .field("outputs", &self.outputs)
            .field("pending_output", &self.pending_output.len())
            .finish_non_exhaustive()
    }
}

/// Capabilities of an Uno running StandardFirmata
///
/// Pins 0 and 1 carry the serial link and report no modes.
pub fn uno_capabilities() -> CapabilityTable {
    let mut caps = CapabilityTable::new();
    for pin in 2..UNO_PINS {
        caps.record(pin, PinMode::Input);
        caps.record(pin, PinMode::Output);
        caps.record(pin, PinMode::Pullup);
        caps.record(pin, PinMode::Servo);
    }
    for pin in [3, 5, 6, 9, 10, 11] {
        caps.record(pin, PinMode::Pwm);
    }
    for pin in UNO_FIRST_ANALOG_PIN..UNO_PINS {
        caps.record(pin, PinMode::Analog);
    }
    caps.set_pin_count(UNO_PINS as usize);
    caps
}

/// Analog mapping of an Uno: A0..A5 on pins 14..19
pub fn uno_analog_map() -> AnalogMap {
    let entries: Vec<u8> = (0..UNO_PINS)
        .map(|pin| {
            pin.checked_sub(UNO_FIRST_ANALOG_PIN)
                .unwrap_or(UNMAPPED_CHANNEL)
        })
        .collect();
    AnalogMap::from_pin_channels(&entries)
}
