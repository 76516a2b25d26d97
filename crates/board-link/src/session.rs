//! Protocol session for one connected board
//!
//! A [`Session`] owns everything tied to a single connection: the decoder,
//! the pin model, the output shadow, pending reads and named hardware. It is
//! synchronous and never touches the transport. Bytes from the board go in
//! through [`Session::push_bytes`]; bytes for the board accumulate in an
//! outbound queue that the supervisor drains and writes.
//!
//! Decoded samples always land in the sample store before any pending read
//! for them fires.

use std::collections::VecDeque;

use board_protocol::firmata::{ANALOG_CHANNELS, PORT_COUNT};
use board_protocol::telegram::SENSOR_CHANNELS;
use board_protocol::{
    create_device_codec, DeviceCodec, DeviceMessage, DisplayTarget, EncodeCommand,
    FirmataCommand, FirmataMessage, FirmwareInfo, Level, ParseError, PinMode, Protocol, Telegram,
    TelegramCommand,
};
use tracing::{debug, info, warn};

use crate::config::BoardConfig;
use crate::encoder::{require_capability, CommandEncoder, SegmentDisplay};
use crate::error::LinkError;
use crate::hardware::{light_level, Comparison, HardwareRegistry};
use crate::model::PinModel;
use crate::waiters::{raw_to_percent, Conversion, PendingRead, ReadReply, WaiterTable};

/// Things the supervisor needs to know about after feeding bytes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// A valid probe or ping answer
    Alive { firmware: Option<FirmwareInfo> },
    /// Initialization finished
    Ready,
    /// Malformed data from the board
    DecodeError(ParseError),
}

/// Telegram-board boolean sensor checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorCheck {
    /// The built-in button is held down
    ButtonPressed,
    /// Something is plugged into a resistance connector (A..D)
    Connected(String),
}

/// State of one board connection
pub struct Session {
    protocol: Protocol,
    codec: Box<dyn DeviceCodec>,
    model: PinModel,
    encoder: CommandEncoder,
    waiters: WaiterTable,
    hardware: HardwareRegistry,
    config: BoardConfig,
    outbound: VecDeque<Vec<u8>>,
    notices: VecDeque<SessionNotice>,
    initializing: bool,
    ready: bool,
}

impl Session {
    pub fn new(protocol: Protocol, config: BoardConfig) -> Self {
        Self {
            protocol,
            codec: create_device_codec(protocol),
            model: PinModel::new(),
            encoder: CommandEncoder::new(),
            waiters: WaiterTable::new(),
            hardware: HardwareRegistry::new(),
            config,
            outbound: VecDeque::new(),
            notices: VecDeque::new(),
            initializing: false,
            ready: false,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn model(&self) -> &PinModel {
        &self.model
    }

    pub fn encoder(&self) -> &CommandEncoder {
        &self.encoder
    }

    pub fn hardware(&self) -> &HardwareRegistry {
        &self.hardware
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Reads still waiting for the board
    pub fn pending_reads(&self) -> usize {
        self.waiters.len()
    }

    // ========================================================================
    // Transport side
    // ========================================================================

    /// Feed bytes received from the board
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.codec.push_bytes(data);
        while let Some(result) = self.codec.next_message() {
            match result {
                Ok(DeviceMessage::Firmata(msg)) => self.handle_firmata(msg),
                Ok(DeviceMessage::Telegram(telegram)) => self.handle_telegram(telegram),
                Err(err) => {
                    warn!("Dropping malformed {} data: {}", self.protocol, err);
                    self.notices.push_back(SessionNotice::DecodeError(err));
                }
            }
        }
    }

    /// Take everything queued for the board, oldest first
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbound.drain(..).collect()
    }

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        self.notices.drain(..).collect()
    }

    /// Queue the probe query, also used as the keep-alive ping
    pub fn queue_probe(&mut self) {
        match self.protocol {
            Protocol::Firmata => self.send_firmata(&[FirmataCommand::QueryFirmware]),
            Protocol::Telegram => self.send_telegram(TelegramCommand::Ping),
        }
    }

    /// Start device initialization after the board first answered
    pub fn initialize(&mut self) {
        match self.protocol {
            Protocol::Firmata => {
                info!("Initializing Firmata board");
                let mut cmds: Vec<FirmataCommand> = (0..PORT_COUNT as u8)
                    .map(|port| FirmataCommand::ReportDigital { port, enable: true })
                    .collect();
                cmds.push(FirmataCommand::QueryCapabilities);
                self.send_firmata(&cmds);
                self.initializing = true;
            }
            Protocol::Telegram => self.mark_ready(),
        }
    }

    /// Forget the connection; pending reads are dropped unresolved
    pub fn reset(&mut self) {
        let dropped = self.waiters.len();
        if dropped > 0 {
            debug!("Dropping {} pending reads", dropped);
        }
        self.codec.clear();
        self.model.reset();
        self.encoder.reset();
        self.waiters.clear();
        self.outbound.clear();
        self.notices.clear();
        self.initializing = false;
        self.ready = false;
    }

    fn mark_ready(&mut self) {
        self.initializing = false;
        if !self.ready {
            self.ready = true;
            self.notices.push_back(SessionNotice::Ready);
        }
    }

    fn send_firmata(&mut self, cmds: &[FirmataCommand]) {
        for cmd in cmds {
            self.outbound.push_back(cmd.encode());
        }
    }

    fn send_telegram(&mut self, cmd: TelegramCommand) {
        self.outbound.push_back(cmd.encode());
    }

    fn handle_firmata(&mut self, msg: FirmataMessage) {
        match msg {
            FirmataMessage::DigitalPort { port, value } => {
                self.model.samples.set_port(port, value);
            }
            FirmataMessage::AnalogSample { channel, value } => {
                self.model.samples.set_analog(channel, value);
                let fired = self.waiters.fire_sample(channel, value);
                if fired > 0 {
                    debug!("Resolved {} reads on channel {}", fired, channel);
                }
            }
            FirmataMessage::Version { major, minor } => {
                debug!("Firmata protocol version {}.{}", major, minor);
                self.model.version = Some((major, minor));
            }
            FirmataMessage::Firmware(info) => {
                self.model.firmware = Some(info.clone());
                self.notices.push_back(SessionNotice::Alive {
                    firmware: Some(info),
                });
            }
            FirmataMessage::Capabilities(table) => {
                debug!("Capability table covers {} pins", table.pin_count());
                self.model.capabilities = table;
                self.send_firmata(&[FirmataCommand::QueryAnalogMapping]);
            }
            FirmataMessage::AnalogMapping(map) => {
                self.model.analog_map = map;
                let reports: Vec<FirmataCommand> = self
                    .model
                    .analog_channels()
                    .into_iter()
                    .filter(|ch| (*ch as usize) < ANALOG_CHANNELS)
                    .map(|channel| FirmataCommand::ReportAnalog {
                        channel,
                        enable: true,
                    })
                    .collect();
                debug!("Enabling reports on {} analog channels", reports.len());
                self.send_firmata(&reports);
                self.mark_ready();
            }
            FirmataMessage::PinState { pin, state, .. } => {
                // Newest must end up last so it fires first
                let moved = self.waiters.take_state(pin, state != 0);
                for read in moved.into_iter().rev() {
                    self.waiters.push_sample(read);
                }
                if self.waiters.has_state_waiters(pin) {
                    self.send_firmata(&[FirmataCommand::QueryPinState { pin }]);
                }
            }
            FirmataMessage::Sysex { command, data } => {
                debug!("Ignoring sysex 0x{:02X} ({} bytes)", command, data.len());
            }
        }
    }

    fn handle_telegram(&mut self, telegram: Telegram) {
        for sample in &telegram.samples {
            self.model.samples.set_channel(sample);

            for read in self.waiters.take_state(sample.channel, sample.sensitive) {
                read.resolve(sample.value);
            }
            if self.waiters.has_waiters_for(sample.channel, !sample.sensitive) {
                self.send_telegram(TelegramCommand::SetSensitivity {
                    channel: sample.channel,
                    sensitive: !sample.sensitive,
                });
            }
        }

        if telegram.is_valid_device() {
            self.notices.push_back(SessionNotice::Alive { firmware: None });
        } else {
            debug!("Telegram with identity {:?}", telegram.firmware_id);
        }
    }

    // ========================================================================
    // Pin operations
    // ========================================================================

    fn require_protocol(&self, protocol: Protocol) -> Result<(), LinkError> {
        if self.protocol == protocol {
            Ok(())
        } else {
            Err(LinkError::WrongProtocol(self.protocol))
        }
    }

    /// Drive an output pin
    pub fn digital_write(&mut self, pin: u8, level: Level) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let cmds = self
            .encoder
            .digital_write(&self.model.capabilities, pin, level)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    /// PWM duty in percent
    pub fn analog_write(&mut self, pin: u8, percent: f64) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let cmds = self
            .encoder
            .analog_write(&self.model.capabilities, pin, percent)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    /// Servo angle in degrees
    pub fn rotate_servo(&mut self, pin: u8, degrees: i32) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let cmds = self
            .encoder
            .rotate_servo(&self.model.capabilities, pin, degrees)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    /// Switch a pin to input and return its last reported level
    pub fn digital_read(&mut self, pin: u8) -> Result<Option<Level>, LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let cmds = self.encoder.digital_input(&self.model.capabilities, pin)?;
        self.send_firmata(&cmds);
        Ok(self.model.samples.pin_level(pin))
    }

    /// Read an analog channel as a percentage
    ///
    /// Returns the cached value right away. With a `reply`, the range switch
    /// is confirmed and the reply fires with the next sample taken in the
    /// requested range.
    pub fn analog_read(
        &mut self,
        channel: u8,
        sensitive: bool,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        let conversion = match self.protocol {
            Protocol::Firmata => Conversion::RoundedPercent,
            Protocol::Telegram => Conversion::Percent,
        };
        self.confirmed_read(channel, sensitive, conversion, reply)
    }

    /// Read the resistance on a divider channel, in kΩ
    pub fn read_resistance(
        &mut self,
        channel: u8,
        sensitive: bool,
        reply: ReadReply,
    ) -> Result<(), LinkError> {
        let known_kohm = self.config.resistors.for_range(sensitive);
        self.confirmed_read(
            channel,
            sensitive,
            Conversion::Resistance { known_kohm },
            Some(reply),
        )
        .map(|_| ())
    }

    fn confirmed_read(
        &mut self,
        channel: u8,
        sensitive: bool,
        conversion: Conversion,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        match self.protocol {
            Protocol::Firmata => self.firmata_read(channel, sensitive, conversion, reply),
            Protocol::Telegram => self.telegram_read(channel, sensitive, conversion, reply),
        }
    }

    fn firmata_read(
        &mut self,
        channel: u8,
        sensitive: bool,
        conversion: Conversion,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        let pin = self
            .model
            .analog_map
            .pin_for_channel(channel)
            .ok_or_else(|| {
                warn!("Rejected read of analog channel {}", channel);
                LinkError::InvalidChannel {
                    channel,
                    valid: self.model.analog_channels(),
                }
            })?;
        let caps = &self.model.capabilities;
        let mut cmds = self.encoder.analog_input(caps, pin)?;

        let control = self.config.sensitivity_pin(channel);
        let level = Level::from(sensitive);
        let switchable = caps.has_capability(control, PinMode::Output);
        if switchable {
            if !self.encoder.holds_level(control, level) {
                cmds.extend(self.encoder.digital_write(caps, control, level)?);
            }
        } else {
            debug!(
                "Channel {} has no usable range switch on pin {}",
                channel, control
            );
        }

        let cached = self
            .model
            .samples
            .analog(channel)
            .map(|raw| Conversion::RoundedPercent.apply(raw));
        self.send_firmata(&cmds);

        if let Some(reply) = reply {
            let read = PendingRead::new(channel, conversion, reply);
            if switchable {
                self.waiters.push_state(control, sensitive, read);
                self.send_firmata(&[FirmataCommand::QueryPinState { pin: control }]);
            } else {
                self.waiters.push_sample(read);
            }
        }
        Ok(cached)
    }

    fn telegram_read(
        &mut self,
        channel: u8,
        sensitive: bool,
        conversion: Conversion,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        if channel as usize >= SENSOR_CHANNELS {
            return Err(LinkError::InvalidChannel {
                channel,
                valid: (0..SENSOR_CHANNELS as u8).collect(),
            });
        }
        let samples = &self.model.samples;
        let cached = samples.analog(channel).map(|raw| conversion.apply(raw));

        if samples.sensitivity(channel) != Some(sensitive) {
            self.send_telegram(TelegramCommand::SetSensitivity { channel, sensitive });
        }
        if let Some(reply) = reply {
            self.waiters
                .push_state(channel, sensitive, PendingRead::new(channel, conversion, reply));
            self.send_telegram(TelegramCommand::Ping);
        }
        Ok(cached)
    }

    // ========================================================================
    // Shift registers
    // ========================================================================

    pub fn shift_out(&mut self, data_pin: u8, clock_pin: u8, value: u16) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let cmds =
            self.encoder
                .shift_out(&self.model.capabilities, data_pin, clock_pin, value)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    /// Latch a raw 16-bit pattern into the shift registers
    pub fn serial_out(&mut self, value: u16) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let pins = self.config.shift_register;
        let cmds = self
            .encoder
            .serial_out(&self.model.capabilities, &pins, value)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    pub fn segment_display(&mut self, display: SegmentDisplay, digit: u8) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Firmata)?;
        let pins = self.config.shift_register;
        let cmds =
            self.encoder
                .segment_display(&self.model.capabilities, &pins, display, digit)?;
        self.send_firmata(&cmds);
        Ok(())
    }

    // ========================================================================
    // Connectors
    // ========================================================================

    fn connector_channel(&self, name: &str) -> Result<u8, LinkError> {
        self.config
            .connectors(self.protocol)
            .analog(name)
            .ok_or_else(|| LinkError::UnknownHardware(name.to_string()))
    }

    fn connector_pin(&self, name: &str) -> Result<u8, LinkError> {
        self.config
            .connectors(self.protocol)
            .digital(name)
            .ok_or_else(|| LinkError::UnknownHardware(name.to_string()))
    }

    /// Analog read by connector name
    pub fn read_connector(
        &mut self,
        name: &str,
        sensitive: bool,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        let channel = self.connector_channel(name)?;
        self.analog_read(channel, sensitive, reply)
    }

    /// Resistance read by connector name
    pub fn read_connector_resistance(
        &mut self,
        name: &str,
        sensitive: bool,
        reply: ReadReply,
    ) -> Result<(), LinkError> {
        let channel = self.connector_channel(name)?;
        self.read_resistance(channel, sensitive, reply)
    }

    /// PWM write on the pin numbered like a connector's analog channel
    pub fn write_connector(&mut self, name: &str, percent: f64) -> Result<(), LinkError> {
        let pin = self.connector_channel(name)?;
        self.analog_write(pin, percent)
    }

    /// Compare a connector's cached reading against a threshold
    pub fn connector_compare(
        &mut self,
        name: &str,
        cmp: Comparison,
        threshold: f64,
    ) -> Result<bool, LinkError> {
        let value = self.read_connector(name, false, None)?;
        Ok(value.is_some_and(|v| cmp.evaluate(v, threshold)))
    }

    // ========================================================================
    // Named hardware
    // ========================================================================

    /// Attach named hardware to a connector's digital pin
    pub fn connect_hw(&mut self, name: &str, connector: &str) -> Result<(), LinkError> {
        let pin = self.connector_pin(connector)?;
        info!("Attached '{}' to {} (pin {})", name, connector, pin);
        self.hardware.connect(name, pin);
        Ok(())
    }

    /// Set an LED's brightness in percent
    pub fn set_led(&mut self, name: &str, percent: f64) -> Result<(), LinkError> {
        let pin = self.hardware.get(name)?.pin;
        let brightness = brightness(percent);
        self.analog_write(pin, brightness)?;
        self.hardware.set_value(name, brightness)
    }

    /// Change an LED's brightness by `delta` percent
    pub fn change_led(&mut self, name: &str, delta: f64) -> Result<(), LinkError> {
        let device = self.hardware.get(name)?;
        let (pin, brightness) = (device.pin, brightness(device.value + delta));
        self.analog_write(pin, brightness)?;
        self.hardware.set_value(name, brightness)
    }

    /// Switch an LED fully on or off
    pub fn digital_led(&mut self, name: &str, on: bool) -> Result<(), LinkError> {
        let pin = self.hardware.get(name)?.pin;
        self.digital_write(pin, Level::from(on))?;
        self.hardware.set_value(name, if on { 255.0 } else { 0.0 })
    }

    /// Move a named servo to an absolute angle
    pub fn rotate_servo_named(&mut self, name: &str, degrees: i32) -> Result<(), LinkError> {
        let pin = self.hardware.get(name)?.pin;
        let degrees = degrees.clamp(0, 180);
        self.rotate_servo(pin, degrees)?;
        self.hardware.set_value(name, degrees as f64)
    }

    /// Move a named servo by `delta` degrees
    pub fn change_servo(&mut self, name: &str, delta: i32) -> Result<(), LinkError> {
        let device = self.hardware.get(name)?;
        let pin = device.pin;
        let degrees = (device.value as i32).saturating_add(delta).clamp(0, 180);
        self.rotate_servo(pin, degrees)?;
        self.hardware.set_value(name, degrees as f64)
    }

    /// Analog channel behind a named input
    ///
    /// Hardware attached through a connector sits on that connector's digital
    /// pin; the built-in sensors are registered by channel number.
    fn hardware_channel(&self, name: &str) -> Result<u8, LinkError> {
        let pin = self.hardware.get(name)?.pin;
        Ok(self.model.analog_map.channel_for_pin(pin).unwrap_or(pin))
    }

    /// Read a named analog input
    pub fn read_input(
        &mut self,
        name: &str,
        reply: Option<ReadReply>,
    ) -> Result<Option<f64>, LinkError> {
        let channel = self.hardware_channel(name)?;
        self.analog_read(channel, false, reply)
    }

    /// Whether a named button reads high
    pub fn is_button_pressed(&mut self, name: &str) -> Result<Option<bool>, LinkError> {
        let pin = self.hardware.get(name)?.pin;
        Ok(self.digital_read(pin)?.map(Level::is_high))
    }

    /// Compare a named input's cached reading against a threshold
    pub fn input_compare(
        &mut self,
        name: &str,
        cmp: Comparison,
        threshold: f64,
    ) -> Result<bool, LinkError> {
        let value = self.read_input(name, None)?;
        Ok(value.is_some_and(|v| cmp.evaluate(v, threshold)))
    }

    // ========================================================================
    // Telegram boards
    // ========================================================================

    /// Scaled reading of a named sensor: `light`, `dial` or a connector
    pub fn sensor(&self, name: &str) -> Result<Option<f64>, LinkError> {
        self.require_protocol(Protocol::Telegram)?;
        let connectors = self.config.connectors(Protocol::Telegram);
        let samples = &self.model.samples;
        if name.eq_ignore_ascii_case("light") {
            let channel = connectors
                .analog("EXT2")
                .ok_or_else(|| LinkError::UnknownHardware("EXT2".to_string()))?;
            return Ok(samples.analog(channel).map(light_level));
        }
        let connector = if name.eq_ignore_ascii_case("dial") {
            "EXT1"
        } else {
            name
        };
        let channel = self.connector_channel(connector)?;
        Ok(samples.analog(channel).map(raw_to_percent))
    }

    /// Boolean sensor checks
    pub fn sensor_connected(&self, check: &SensorCheck) -> Result<bool, LinkError> {
        let (name, limit) = match check {
            SensorCheck::ButtonPressed => ("button", 1.0),
            SensorCheck::Connected(connector) => (connector.as_str(), 10.0),
        };
        Ok(self.sensor(name)?.is_some_and(|v| v < limit))
    }

    /// Show a number on a display
    pub fn show_number(&mut self, target: DisplayTarget, value: u8) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Telegram)?;
        self.send_telegram(TelegramCommand::ShowNumber { target, value });
        Ok(())
    }

    pub fn clear_displays(&mut self) -> Result<(), LinkError> {
        self.require_protocol(Protocol::Telegram)?;
        self.send_telegram(TelegramCommand::ClearDisplays);
        Ok(())
    }

    /// Check a capability without writing anything
    pub fn has_capability(&self, pin: u8, mode: PinMode) -> bool {
        self.model.has_capability(pin, mode)
    }

    /// Check a capability, returning the descriptive error
    pub fn check_capability(&self, pin: u8, mode: PinMode) -> Result<(), LinkError> {
        require_capability(&self.model.capabilities, pin, mode)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("protocol", &self.protocol)
            .field("ready", &self.ready)
            .field("pending_reads", &self.waiters.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

/// LED brightness in 0..=100; NaN counts as off
fn brightness(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}
