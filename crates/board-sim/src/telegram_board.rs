//! Virtual telegram board
//!
//! Answers every ping with one 16-byte telegram carrying all seven sensor
//! channels and the identity slot. Sensitivity switches take effect on the
//! next telegram; display commands are recorded.

use std::collections::VecDeque;

use board_protocol::telegram::{FIRMWARE_ID, SENSOR_CHANNELS};
use board_protocol::{ChannelSample, DisplayTarget, EncodeCommand, Telegram, TelegramCommand};
use tracing::{debug, warn};

/// Both segment displays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Displays {
    pub first: Option<u8>,
    pub second: Option<u8>,
}

/// A simulated telegram board
#[derive(Debug)]
pub struct VirtualTelegramBoard {
    id: String,
    /// Identity reported in slot 7
    firmware_id: u16,
    normal: [u16; SENSOR_CHANNELS],
    sensitive: [u16; SENSOR_CHANNELS],
    ranges: [bool; SENSOR_CHANNELS],
    displays: Displays,
    buffer: Vec<u8>,
    pending_output: VecDeque<Vec<u8>>,
    pings: usize,
}

impl VirtualTelegramBoard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            firmware_id: FIRMWARE_ID,
            normal: [0; SENSOR_CHANNELS],
            sensitive: [0; SENSOR_CHANNELS],
            ranges: [false; SENSOR_CHANNELS],
            displays: Displays::default(),
            buffer: Vec::new(),
            pending_output: VecDeque::new(),
            pings: 0,
        }
    }

    /// Report a different identity (an unsupported board)
    pub fn with_firmware_id(mut self, firmware_id: u16) -> Self {
        self.firmware_id = firmware_id;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process bytes from the host; telegrams are queued for output
    pub fn process_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        loop {
            match TelegramCommand::decode(&self.buffer) {
                None => break,
                Some(Ok((cmd, used))) => {
                    self.buffer.drain(..used);
                    self.handle_command(cmd);
                }
                Some(Err(e)) => {
                    warn!("Virtual board {} ignoring bad request: {}", self.id, e);
                    self.buffer.remove(0);
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: TelegramCommand) {
        debug!("Virtual board {} <- {:?}", self.id, cmd);
        match cmd {
            TelegramCommand::Ping => {
                self.pings += 1;
                let bytes = self.telegram().encode();
                debug!("Virtual board {} -> {:02X?}", self.id, bytes);
                self.pending_output.push_back(bytes);
            }
            TelegramCommand::SetSensitivity { channel, sensitive } => {
                if let Some(range) = self.ranges.get_mut(channel as usize) {
                    *range = sensitive;
                }
            }
            TelegramCommand::ShowNumber { target, value } => match target {
                DisplayTarget::First => self.displays.first = Some(value),
                DisplayTarget::Second => self.displays.second = Some(value),
                DisplayTarget::Both => {
                    self.displays.first = Some(value / 10);
                    self.displays.second = Some(value % 10);
                }
            },
            TelegramCommand::ClearDisplays => self.displays = Displays::default(),
        }
    }

    /// The telegram the board would send right now
    pub fn telegram(&self) -> Telegram {
        Telegram {
            samples: (0..SENSOR_CHANNELS)
                .map(|ch| {
                    let sensitive = self.ranges[ch];
                    ChannelSample {
                        channel: ch as u8,
                        value: if sensitive {
                            self.sensitive[ch]
                        } else {
                            self.normal[ch]
                        },
                        sensitive,
                    }
                })
                .collect(),
            firmware_id: Some(self.firmware_id),
        }
    }

    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    /// Set a channel's reading in both ranges
    pub fn set_analog(&mut self, channel: u8, value: u16) {
        if let Some(ch) = self.channel_index(channel) {
            self.normal[ch] = value.min(1023);
            self.sensitive[ch] = value.min(1023);
        }
    }

    /// Set a channel's reading in the sensitive range only
    pub fn set_sensitive_analog(&mut self, channel: u8, value: u16) {
        if let Some(ch) = self.channel_index(channel) {
            self.sensitive[ch] = value.min(1023);
        }
    }

    fn channel_index(&self, channel: u8) -> Option<usize> {
        let ch = channel as usize;
        (ch < SENSOR_CHANNELS).then_some(ch)
    }

    pub fn is_sensitive(&self, channel: u8) -> bool {
        self.ranges.get(channel as usize).copied().unwrap_or(false)
    }

    pub fn displays(&self) -> Displays {
        self.displays
    }

    /// Pings answered so far
    pub fn pings(&self) -> usize {
        self.pings
    }
}
