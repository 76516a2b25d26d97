//! Pin and channel model
//!
//! Last known samples plus what the board told us about its pins. Only the
//! decode path writes here; operations read the cached values.

use board_protocol::firmata::{ANALOG_CHANNELS, PORT_COUNT};
use board_protocol::{AnalogMap, CapabilityTable, ChannelSample, FirmwareInfo, Level, PinMode};

/// Latest samples received from the board
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleStore {
    digital: [Option<u16>; PORT_COUNT],
    analog: [Option<u16>; ANALOG_CHANNELS],
    sensitive: [Option<bool>; ANALOG_CHANNELS],
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a digital port report; out-of-range ports are ignored
    pub fn set_port(&mut self, port: u8, value: u16) -> bool {
        match self.digital.get_mut(port as usize) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Record an analog sample; out-of-range channels are ignored
    pub fn set_analog(&mut self, channel: u8, value: u16) -> bool {
        match self.analog.get_mut(channel as usize) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Record one telegram sample (value and range flag)
    pub fn set_channel(&mut self, sample: &ChannelSample) -> bool {
        let idx = sample.channel as usize;
        if idx >= ANALOG_CHANNELS {
            return false;
        }
        self.analog[idx] = Some(sample.value);
        self.sensitive[idx] = Some(sample.sensitive);
        true
    }

    /// Last value of a digital port
    pub fn port(&self, port: u8) -> Option<u16> {
        self.digital.get(port as usize).copied().flatten()
    }

    /// Last level of a digital pin
    pub fn pin_level(&self, pin: u8) -> Option<Level> {
        let port = self.port(pin >> 3)?;
        Some(Level::from((port >> (pin & 0x07)) & 0x01 == 1))
    }

    /// Last raw sample of an analog channel
    pub fn analog(&self, channel: u8) -> Option<u16> {
        self.analog.get(channel as usize).copied().flatten()
    }

    /// Last reported range of a telegram channel
    pub fn sensitivity(&self, channel: u8) -> Option<bool> {
        self.sensitive.get(channel as usize).copied().flatten()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Everything known about the connected board
#[derive(Debug, Clone, Default)]
pub struct PinModel {
    pub samples: SampleStore,
    pub capabilities: CapabilityTable,
    pub analog_map: AnalogMap,
    pub firmware: Option<FirmwareInfo>,
    /// Protocol version from REPORT_VERSION
    pub version: Option<(u8, u8)>,
}

impl PinModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_capability(&self, pin: u8, mode: PinMode) -> bool {
        self.capabilities.has_capability(pin, mode)
    }

    /// Analog channels the board has, in ascending order
    pub fn analog_channels(&self) -> Vec<u8> {
        let mut channels: Vec<u8> = self.analog_map.mapped().map(|(_, ch)| ch).collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }

    /// Forget everything learned from the current board
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_absent_until_first_data() {
        let store = SampleStore::new();
        assert_eq!(store.analog(0), None);
        assert_eq!(store.port(0), None);
        assert_eq!(store.pin_level(3), None);
    }

    #[test]
    fn test_pin_level_from_port() {
        let mut store = SampleStore::new();
        assert!(store.set_port(1, 0b0000_0100));
        assert_eq!(store.pin_level(10), Some(Level::High));
        assert_eq!(store.pin_level(9), Some(Level::Low));
        assert_eq!(store.pin_level(2), None);
    }

    #[test]
    fn test_out_of_range_updates_are_dropped() {
        let mut store = SampleStore::new();
        assert!(!store.set_analog(16, 5));
        assert!(!store.set_port(200, 5));
        assert_eq!(store, SampleStore::new());
    }

    #[test]
    fn test_telegram_channel_sample() {
        let mut store = SampleStore::new();
        store.set_channel(&ChannelSample {
            channel: 5,
            value: 700,
            sensitive: true,
        });
        assert_eq!(store.analog(5), Some(700));
        assert_eq!(store.sensitivity(5), Some(true));
        assert_eq!(store.sensitivity(4), None);
    }

    #[test]
    fn test_analog_channels_sorted() {
        let mut model = PinModel::new();
        let mut entries = vec![127u8; 14];
        entries.extend_from_slice(&[1, 0, 2]);
        model.analog_map = AnalogMap::from_pin_channels(&entries);
        assert_eq!(model.analog_channels(), vec![0, 1, 2]);
    }
}
