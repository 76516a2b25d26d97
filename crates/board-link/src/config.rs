//! Link, timing and board configuration
//!
//! Everything the supervisor and session need that is not learned from the
//! board itself: serial parameters, supervisor timers, connector names and
//! the pins wired to sensitivity switches and shift registers.

use std::collections::BTreeMap;
use std::time::Duration;

use board_protocol::Protocol;
use serde::{Deserialize, Serialize};

/// Serial link parameters used when opening a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Bit rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: u8,
    /// Stop bits per character
    pub stop_bits: u8,
    /// Hardware (RTS/CTS) flow control
    pub flow_control: bool,
}

impl LinkConfig {
    /// Fixed link parameters for a protocol: 8N1, no flow control
    pub fn for_protocol(protocol: Protocol) -> Self {
        Self {
            baud_rate: protocol.baud_rate(),
            data_bits: 8,
            stop_bits: 1,
            flow_control: false,
        }
    }
}

/// Supervisor timers for one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between probe queries
    pub probe_interval_ms: u64,
    /// Time a candidate gets to answer before it is abandoned
    pub watchdog_ms: u64,
    /// Delay between the first valid answer and initialization
    pub settle_ms: u64,
    /// Keep-alive interval once connected
    pub ping_interval_ms: u64,
    /// Unanswered ping ticks tolerated before the board is declared lost
    pub max_missed_pings: u32,
    /// Whether a removal notification tears the connection down
    #[serde(default)]
    pub honor_removal: bool,
}

impl TimingConfig {
    /// Default timers for a protocol
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Firmata => Self {
                probe_interval_ms: 1000,
                watchdog_ms: 5000,
                settle_ms: 200,
                ping_interval_ms: 100,
                max_missed_pings: 6,
                honor_removal: false,
            },
            Protocol::Telegram => Self {
                probe_interval_ms: 50,
                watchdog_ms: 250,
                settle_ms: 0,
                ping_interval_ms: 50,
                max_missed_pings: 6,
                honor_removal: true,
            },
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }
}

/// Connector names mapped to analog channels
///
/// Firmata boards also reach each connector digitally at
/// `channel + digital_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMap {
    /// Connector name to analog channel
    pub channels: BTreeMap<String, u8>,
    /// Offset from analog channel to digital pin
    #[serde(default)]
    pub digital_offset: Option<u8>,
}

impl ConnectorMap {
    /// Default connector layout for a protocol
    pub fn for_protocol(protocol: Protocol) -> Self {
        let (entries, digital_offset): (&[(&str, u8)], _) = match protocol {
            Protocol::Firmata => (
                &[("A", 2), ("B", 3), ("C", 4), ("D", 5), ("EXT1", 0), ("EXT2", 1)],
                Some(14),
            ),
            Protocol::Telegram => (
                &[
                    ("EXT2", 0),
                    ("EXT1", 1),
                    ("D", 2),
                    ("C", 3),
                    ("B", 4),
                    ("A", 5),
                    ("button", 6),
                ],
                None,
            ),
        };
        Self {
            channels: entries
                .iter()
                .map(|(name, ch)| (name.to_string(), *ch))
                .collect(),
            digital_offset,
        }
    }

    /// Analog channel of a connector (names compare case-insensitively)
    pub fn analog(&self, name: &str) -> Option<u8> {
        self.channels
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, ch)| *ch)
    }

    /// Digital pin of a connector
    pub fn digital(&self, name: &str) -> Option<u8> {
        let offset = self.digital_offset?;
        self.analog(name).and_then(|ch| ch.checked_add(offset))
    }

    /// Connector names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

/// Pins driving the two daisy-chained shift registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRegisterConfig {
    pub data_pin: u8,
    pub clock_pin: u8,
    pub latch_pin: u8,
}

impl Default for ShiftRegisterConfig {
    fn default() -> Self {
        Self {
            data_pin: 10,
            clock_pin: 12,
            latch_pin: 11,
        }
    }
}

/// Known resistors of the divider used for resistance reads, in kΩ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResistorConfig {
    /// Resistor in normal range
    pub normal_kohm: f64,
    /// Resistor chain in sensitive range
    pub sensitive_kohm: f64,
}

impl Default for ResistorConfig {
    fn default() -> Self {
        Self {
            normal_kohm: 10.0,
            sensitive_kohm: 1010.0,
        }
    }
}

impl ResistorConfig {
    pub fn for_range(&self, sensitive: bool) -> f64 {
        if sensitive {
            self.sensitive_kohm
        } else {
            self.normal_kohm
        }
    }
}

/// Board wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Connector layout of Firmata boards
    pub firmata_connectors: ConnectorMap,
    /// Connector layout of telegram boards
    pub telegram_connectors: ConnectorMap,
    /// Control pin of each analog channel's sensitivity switch
    ///
    /// Channels without an entry use the digital pin with the channel's
    /// number.
    #[serde(default)]
    pub sensitivity_pins: BTreeMap<u8, u8>,
    #[serde(default)]
    pub shift_register: ShiftRegisterConfig,
    #[serde(default)]
    pub resistors: ResistorConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            firmata_connectors: ConnectorMap::for_protocol(Protocol::Firmata),
            telegram_connectors: ConnectorMap::for_protocol(Protocol::Telegram),
            sensitivity_pins: BTreeMap::new(),
            shift_register: ShiftRegisterConfig::default(),
            resistors: ResistorConfig::default(),
        }
    }
}

impl BoardConfig {
    /// Connector layout for a protocol
    pub fn connectors(&self, protocol: Protocol) -> &ConnectorMap {
        match protocol {
            Protocol::Firmata => &self.firmata_connectors,
            Protocol::Telegram => &self.telegram_connectors,
        }
    }

    /// Control pin for an analog channel's sensitivity switch
    pub fn sensitivity_pin(&self, channel: u8) -> u8 {
        self.sensitivity_pins
            .get(&channel)
            .copied()
            .unwrap_or(channel)
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Timers for Firmata boards
    pub firmata: TimingConfig,
    /// Timers for telegram boards
    pub telegram: TimingConfig,
    /// Board wiring
    #[serde(default)]
    pub board: BoardConfig,
    /// Capacity of the command and event channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            firmata: TimingConfig::for_protocol(Protocol::Firmata),
            telegram: TimingConfig::for_protocol(Protocol::Telegram),
            board: BoardConfig::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SupervisorConfig {
    /// Timers for a protocol
    pub fn timing(&self, protocol: Protocol) -> &TimingConfig {
        match protocol {
            Protocol::Firmata => &self.firmata,
            Protocol::Telegram => &self.telegram,
        }
    }
}
