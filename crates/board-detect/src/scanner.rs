//! Serial port scanner
//!
//! Lists the host's serial ports, ranked so native-USB boards come first and
//! anonymous ports last.

use board_protocol::Protocol;
use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType, UsbPortInfo};
use tracing::debug;

use crate::error::DetectError;
use crate::usb_ids::{classify_port, suggest_protocol_for_port, PortClassification};

/// A serial port and whatever USB identity it reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// A port known only by name
    pub fn bare(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// A port backed by a USB device
    pub fn usb(port: impl Into<String>, usb: &UsbPortInfo) -> Self {
        Self {
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            serial_number: usb.serial_number.clone(),
            manufacturer: usb.manufacturer.clone(),
            product: usb.product.clone(),
            ..Self::bare(port)
        }
    }

    /// Classification tier and display hint for this port
    pub fn classify(&self) -> (PortClassification, Option<&'static str>) {
        classify_port(self.vid, self.pid, &self.port)
    }

    /// Protocol a board on this port most likely speaks
    pub fn suggested_protocol(&self) -> Option<Protocol> {
        suggest_protocol_for_port(self.vid, &self.port)
    }

    /// One-line description for listings
    pub fn describe(&self) -> String {
        let (_, hint) = self.classify();
        match (self.product.as_deref(), hint) {
            (Some(product), Some(hint)) => format!("{} ({})", product, hint),
            (Some(product), None) => product.to_string(),
            (None, Some(hint)) => hint.to_string(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Which ports a scan reports
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Ports whose name contains any of these are never listed
    pub ignore_names: Vec<String>,
    /// When non-empty, USB ports from other vendors are dropped
    pub vendor_ids: Vec<u16>,
    /// List ports that are neither a known board nor a known adapter
    pub include_unknown: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            // macOS exposes paired Bluetooth devices as serial ports
            ignore_names: vec!["Bluetooth".to_string(), "wlan-debug".to_string()],
            vendor_ids: Vec::new(),
            include_unknown: true,
        }
    }
}

impl ScannerConfig {
    fn admits(&self, info: &SerialPortInfo) -> bool {
        if self
            .ignore_names
            .iter()
            .any(|fragment| info.port.contains(fragment.as_str()))
        {
            return false;
        }
        if let Some(vid) = info.vid {
            if !self.vendor_ids.is_empty() && !self.vendor_ids.contains(&vid) {
                return false;
            }
        }
        self.include_unknown || info.classify().0 != PortClassification::Unknown
    }
}

/// Serial port scanner
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// List serial ports, known boards first
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let found = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        let ports = self.select(found.into_iter().map(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => SerialPortInfo::usb(p.port_name, usb),
            _ => SerialPortInfo::bare(p.port_name),
        }));

        debug!("{} serial port(s) after filtering", ports.len());
        for port in &ports {
            match port.suggested_protocol() {
                Some(protocol) => debug!("  {} - {} [{}]", port.port, port.describe(), protocol),
                None => debug!("  {} - {}", port.port, port.describe()),
            }
        }
        Ok(ports)
    }

    /// Filter and rank ports
    fn select(&self, ports: impl Iterator<Item = SerialPortInfo>) -> Vec<SerialPortInfo> {
        let mut ports: Vec<_> = ports.filter(|p| self.config.admits(p)).collect();
        ports.sort_by(|a, b| {
            a.classify()
                .0
                .cmp(&b.classify().0)
                .then_with(|| a.port.cmp(&b.port))
        });
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb_port(port: &str, vid: u16, pid: u16, product: &str) -> SerialPortInfo {
        let usb = UsbPortInfo {
            vid,
            pid,
            serial_number: None,
            manufacturer: None,
            product: Some(product.to_string()),
        };
        SerialPortInfo::usb(port, &usb)
    }

    #[test]
    fn test_usb_port_is_classified_and_suggested() {
        let info = usb_port("/dev/ttyACM0", 0x2341, 0x0043, "Arduino Uno");
        assert_eq!(info.classify().0, PortClassification::KnownBoard);
        assert_eq!(info.suggested_protocol(), Some(Protocol::Firmata));
        assert_eq!(info.describe(), "Arduino Uno (Arduino Uno)");
    }

    #[test]
    fn test_named_sensor_board_suggests_telegram() {
        let info = SerialPortInfo::bare("/dev/tty.PicoBoard-A1");
        assert_eq!(info.suggested_protocol(), Some(Protocol::Telegram));
        assert_eq!(info.describe(), "PicoBoard");
    }

    #[test]
    fn test_describe_unknown() {
        let info = SerialPortInfo::bare("/dev/ttyS0");
        assert_eq!(info.describe(), "Unknown");
        assert_eq!(info.suggested_protocol(), None);
    }

    #[test]
    fn test_select_ranks_boards_first() {
        let scanner = PortScanner::new();
        let ports = scanner.select(
            vec![
                SerialPortInfo::bare("/dev/ttyS0"),
                usb_port("/dev/ttyUSB0", 0x1A86, 0x7523, "USB Serial"),
                SerialPortInfo::bare("/dev/tty.Bluetooth-Incoming-Port"),
                usb_port("/dev/ttyACM1", 0x2341, 0x0042, "Mega"),
            ]
            .into_iter(),
        );
        let names: Vec<_> = ports.iter().map(|p| p.port.as_str()).collect();
        assert_eq!(names, vec!["/dev/ttyACM1", "/dev/ttyUSB0", "/dev/ttyS0"]);
    }

    #[test]
    fn test_vendor_filter_keeps_named_ports() {
        let scanner = PortScanner::with_config(ScannerConfig {
            vendor_ids: vec![0x2341],
            include_unknown: false,
            ..ScannerConfig::default()
        });
        let ports = scanner.select(
            vec![
                usb_port("/dev/ttyUSB0", 0x0403, 0x6001, "FT232R"),
                usb_port("/dev/ttyACM0", 0x2341, 0x0043, "Uno"),
                SerialPortInfo::bare("/dev/tty.PicoBoard"),
                SerialPortInfo::bare("/dev/ttyS0"),
            ]
            .into_iter(),
        );
        let names: Vec<_> = ports.iter().map(|p| p.port.as_str()).collect();
        assert_eq!(names, vec!["/dev/ttyACM0", "/dev/tty.PicoBoard"]);
    }
}
