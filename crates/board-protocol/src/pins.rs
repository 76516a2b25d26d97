//! Pin modes, capability tables and analog channel maps
//!
//! A board reports which modes each of its pins supports in a capability
//! response, and which pins back its analog channels in an analog mapping
//! response. Both are rebuilt from scratch every time the board answers.

use std::collections::BTreeSet;
use std::fmt;

/// Highest number of pins a board can describe
pub const MAX_PINS: usize = 128;

/// Number of mode slots in a capability table
pub const TOTAL_PIN_MODES: usize = 13;

/// Marker for "this pin has no analog channel"
pub const UNMAPPED_CHANNEL: u8 = 127;

/// Electrical mode of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PinMode {
    Input = 0x00,
    Output = 0x01,
    Analog = 0x02,
    Pwm = 0x03,
    Servo = 0x04,
    Shift = 0x05,
    I2c = 0x06,
    OneWire = 0x07,
    Stepper = 0x08,
    Encoder = 0x09,
    Serial = 0x0A,
    Pullup = 0x0B,
    /// Pin is reserved and must not be touched
    Ignore = 0x7F,
}

impl PinMode {
    /// Every mode, in slot order
    pub const ALL: [PinMode; TOTAL_PIN_MODES] = [
        PinMode::Input,
        PinMode::Output,
        PinMode::Analog,
        PinMode::Pwm,
        PinMode::Servo,
        PinMode::Shift,
        PinMode::I2c,
        PinMode::OneWire,
        PinMode::Stepper,
        PinMode::Encoder,
        PinMode::Serial,
        PinMode::Pullup,
        PinMode::Ignore,
    ];

    /// Decode a wire mode byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00..=0x0B => Some(Self::ALL[value as usize]),
            0x7F => Some(Self::Ignore),
            _ => None,
        }
    }

    /// Wire byte for this mode
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Index of this mode in a capability table
    fn slot(self) -> usize {
        match self {
            PinMode::Ignore => TOTAL_PIN_MODES - 1,
            other => other as usize,
        }
    }

    /// Lower-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
            PinMode::Analog => "analog",
            PinMode::Pwm => "PWM",
            PinMode::Servo => "servo",
            PinMode::Shift => "shift",
            PinMode::I2c => "I2C",
            PinMode::OneWire => "OneWire",
            PinMode::Stepper => "stepper",
            PinMode::Encoder => "encoder",
            PinMode::Serial => "serial",
            PinMode::Pullup => "pullup",
            PinMode::Ignore => "ignore",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logic level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Which pins support which modes
///
/// Built from a capability response. A pin is listed under every mode it
/// reported and nowhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    modes: [BTreeSet<u8>; TOTAL_PIN_MODES],
    pin_count: usize,
}

impl CapabilityTable {
    /// Create an empty table (no pin supports anything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `pin` as supporting `mode`
    pub fn record(&mut self, pin: u8, mode: PinMode) {
        self.modes[mode.slot()].insert(pin);
        self.pin_count = self.pin_count.max(pin as usize + 1);
    }

    /// Note that the board described `pins` pins, supported or not
    pub fn set_pin_count(&mut self, pins: usize) {
        self.pin_count = pins.min(MAX_PINS);
    }

    /// Number of pins the board described
    pub fn pin_count(&self) -> usize {
        self.pin_count
    }

    /// Whether `pin` supports `mode`
    pub fn has_capability(&self, pin: u8, mode: PinMode) -> bool {
        self.modes[mode.slot()].contains(&pin)
    }

    /// Pins supporting `mode`, ascending
    pub fn pins_for(&self, mode: PinMode) -> Vec<u8> {
        self.modes[mode.slot()].iter().copied().collect()
    }

    /// Number of pins supporting `mode`
    pub fn count_for(&self, mode: PinMode) -> usize {
        self.modes[mode.slot()].len()
    }

    /// Modes supported by `pin`
    pub fn modes_for(&self, pin: u8) -> Vec<PinMode> {
        PinMode::ALL
            .into_iter()
            .filter(|mode| self.has_capability(pin, *mode))
            .collect()
    }

    /// True until a capability response has been applied
    pub fn is_empty(&self) -> bool {
        self.modes.iter().all(BTreeSet::is_empty)
    }
}

/// Which pin backs each analog channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalogMap {
    channels: [u8; MAX_PINS],
    len: usize,
}

impl Default for AnalogMap {
    fn default() -> Self {
        Self {
            channels: [UNMAPPED_CHANNEL; MAX_PINS],
            len: 0,
        }
    }
}

impl AnalogMap {
    /// Create a map with every pin unmapped
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from per-pin channel bytes (pin 0 first)
    ///
    /// Entries past `MAX_PINS` are ignored; callers validate length first.
    pub fn from_pin_channels(entries: &[u8]) -> Self {
        let mut map = Self::default();
        for (pin, channel) in entries.iter().take(MAX_PINS).enumerate() {
            map.channels[pin] = *channel;
        }
        map.len = entries.len().min(MAX_PINS);
        map
    }

    /// Per-pin entries as reported, pin 0 first
    pub fn entries(&self) -> &[u8] {
        &self.channels[..self.len]
    }

    /// Analog channel of `pin`, if any
    pub fn channel_for_pin(&self, pin: u8) -> Option<u8> {
        self.channels
            .get(pin as usize)
            .copied()
            .filter(|c| *c != UNMAPPED_CHANNEL)
    }

    /// Pin that backs `channel`, if any
    pub fn pin_for_channel(&self, channel: u8) -> Option<u8> {
        if channel == UNMAPPED_CHANNEL {
            return None;
        }
        self.channels
            .iter()
            .position(|c| *c == channel)
            .map(|pin| pin as u8)
    }

    /// Mapped (pin, channel) pairs in pin order
    pub fn mapped(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != UNMAPPED_CHANNEL)
            .map(|(pin, c)| (pin as u8, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for mode in PinMode::ALL {
            assert_eq!(PinMode::from_u8(mode.as_u8()), Some(mode));
        }
        assert_eq!(PinMode::from_u8(0x0C), None);
    }

    #[test]
    fn test_capability_lookup() {
        let mut table = CapabilityTable::new();
        table.record(3, PinMode::Output);
        table.record(3, PinMode::Pwm);
        table.record(13, PinMode::Output);

        assert!(table.has_capability(3, PinMode::Pwm));
        assert!(!table.has_capability(13, PinMode::Pwm));
        assert_eq!(table.pins_for(PinMode::Output), vec![3, 13]);
        assert_eq!(table.modes_for(3), vec![PinMode::Output, PinMode::Pwm]);
        assert_eq!(table.pin_count(), 14);
    }

    #[test]
    fn test_empty_table_supports_nothing() {
        let table = CapabilityTable::new();
        assert!(table.is_empty());
        assert!(!table.has_capability(0, PinMode::Input));
        assert!(table.pins_for(PinMode::Analog).is_empty());
    }

    #[test]
    fn test_analog_map_lookup() {
        let mut entries = vec![UNMAPPED_CHANNEL; 14];
        entries.extend_from_slice(&[0, 1, 2, 3, 4, 5]);
        let map = AnalogMap::from_pin_channels(&entries);

        assert_eq!(map.channel_for_pin(14), Some(0));
        assert_eq!(map.channel_for_pin(13), None);
        assert_eq!(map.pin_for_channel(5), Some(19));
        assert_eq!(map.pin_for_channel(6), None);
        assert_eq!(map.mapped().count(), 6);
    }

    #[test]
    fn test_analog_map_never_maps_sentinel() {
        let map = AnalogMap::new();
        assert_eq!(map.pin_for_channel(UNMAPPED_CHANNEL), None);
        assert_eq!(map.channel_for_pin(200), None);
    }
}
