//! Named hardware attached to the board
//!
//! Users attach LEDs, servos, buttons and sensors to connectors and then
//! address them by name. The registry remembers the pin and the last value
//! written, so relative changes ("brighten by 10") work.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// One piece of named hardware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDevice {
    pub name: String,
    /// Pin the hardware is wired to
    pub pin: u8,
    /// Last value written (brightness %, servo degrees, 0/255 for on/off)
    pub value: f64,
}

/// Registry of named hardware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareRegistry {
    devices: Vec<HardwareDevice>,
}

impl Default for HardwareRegistry {
    fn default() -> Self {
        let mut registry = Self {
            devices: Vec::new(),
        };
        registry.connect("built-in button", 6);
        registry.connect("light sensor", 1);
        registry.connect("dial", 0);
        registry
    }
}

impl HardwareRegistry {
    /// Registry with the board's built-in hardware
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach hardware to a pin, replacing any earlier attachment
    pub fn connect(&mut self, name: &str, pin: u8) {
        match self.devices.iter_mut().find(|d| d.name == name) {
            Some(device) => {
                device.pin = pin;
                device.value = 0.0;
            }
            None => self.devices.push(HardwareDevice {
                name: name.to_string(),
                pin,
                value: 0.0,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Result<&HardwareDevice, LinkError> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| LinkError::UnknownHardware(name.to_string()))
    }

    /// Record the value last written to a device
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), LinkError> {
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| LinkError::UnknownHardware(name.to_string()))?;
        device.value = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HardwareDevice> {
        self.devices.iter()
    }
}

/// Comparison used by threshold checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Greater,
    Less,
    Equal,
}

impl Comparison {
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Greater => lhs > rhs,
            Comparison::Less => lhs < rhs,
            Comparison::Equal => lhs == rhs,
        }
    }
}

impl FromStr for Comparison {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Comparison::Greater),
            "<" => Ok(Comparison::Less),
            "=" | "==" => Ok(Comparison::Equal),
            other => Err(LinkError::InvalidArgument(format!(
                "unknown comparison '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::Greater => ">",
            Comparison::Less => "<",
            Comparison::Equal => "=",
        })
    }
}

/// Linearly map `val` from `a_min..a_max` onto `b_min..b_max`, rounded
///
/// A zero-width source range maps everything to `b_min`.
pub fn map_values(val: f64, a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> f64 {
    if a_max == a_min {
        return b_min.round();
    }
    ((b_max - b_min) * (val - a_min) / (a_max - a_min) + b_min).round()
}

/// Light level from a telegram board's raw light sensor reading
pub fn light_level(raw: u16) -> f64 {
    let v = raw as f64;
    if v < 25.0 {
        100.0 - v
    } else {
        ((1023.0 - v) * (75.0 / 998.0)).round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_devices() {
        let registry = HardwareRegistry::new();
        assert_eq!(registry.get("built-in button").unwrap().pin, 6);
        assert_eq!(registry.get("light sensor").unwrap().pin, 1);
        assert_eq!(registry.get("dial").unwrap().pin, 0);
        assert!(matches!(
            registry.get("led A"),
            Err(LinkError::UnknownHardware(_))
        ));
    }

    #[test]
    fn test_reconnect_resets_value() {
        let mut registry = HardwareRegistry::new();
        registry.connect("led A", 16);
        registry.set_value("led A", 40.0).unwrap();
        registry.connect("led A", 17);

        let led = registry.get("led A").unwrap();
        assert_eq!((led.pin, led.value), (17, 0.0));
        assert_eq!(registry.iter().count(), 4);
    }

    #[test]
    fn test_comparisons() {
        assert!(Comparison::Greater.evaluate(51.0, 50.0));
        assert!(!Comparison::Less.evaluate(50.0, 50.0));
        assert!(Comparison::Equal.evaluate(50.0, 50.0));
        assert_eq!("<".parse::<Comparison>().unwrap(), Comparison::Less);
        assert!("~".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_map_values() {
        assert_eq!(map_values(512.0, 0.0, 1023.0, 0.0, 100.0), 50.0);
        assert_eq!(map_values(5.0, 0.0, 10.0, 100.0, 0.0), 50.0);
        assert_eq!(map_values(3.0, 1.0, 1.0, 7.0, 9.0), 7.0);
    }

    #[test]
    fn test_light_level() {
        assert_eq!(light_level(0), 100.0);
        assert_eq!(light_level(24), 76.0);
        assert_eq!(light_level(1023), 0.0);
        assert_eq!(light_level(25), 75.0);
    }
}
