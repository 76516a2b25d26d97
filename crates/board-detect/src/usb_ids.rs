//! USB Vendor/Product ID database for boards and serial adapters
//!
//! Boards with native USB (Arduino and friends) can be recognised from their
//! VID/PID alone. Clones and sensor boards usually sit behind a generic
//! USB-to-serial bridge, so those ports are only ever probed on request.

use board_protocol::Protocol;

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// FTDI (Future Technology Devices International)
pub mod ftdi {
    use super::UsbId;

    pub const VID: u16 = 0x0403;

    pub const FT232R: UsbId = UsbId::new(VID, 0x6001);
    pub const FT231X: UsbId = UsbId::new(VID, 0x6015);

    /// All known FTDI product IDs
    pub const ALL_PIDS: &[u16] = &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015];
}

/// Silicon Labs CP210x
pub mod cp210x {
    pub const VID: u16 = 0x10C4;

    /// All known CP210x product IDs
    pub const ALL_PIDS: &[u16] = &[0xEA60, 0xEA70, 0xEA71];
}

/// WCH CH340/CH341, common on Arduino clones
pub mod ch340 {
    use super::UsbId;

    pub const VID: u16 = 0x1A86;

    pub const CH340: UsbId = UsbId::new(VID, 0x7523);
    pub const CH341: UsbId = UsbId::new(VID, 0x5523);

    /// All known CH340/341 product IDs
    pub const ALL_PIDS: &[u16] = &[0x7523, 0x5523];
}

/// Prolific PL2303
pub mod prolific {
    pub const VID: u16 = 0x067B;

    /// All known Prolific product IDs
    pub const ALL_PIDS: &[u16] = &[0x2303];
}

/// Boards with native USB serial
pub mod board {
    use super::UsbId;

    /// Arduino SA
    pub const ARDUINO_VID: u16 = 0x2341;
    /// Arduino.org / Arduino Srl
    pub const ARDUINO_ORG_VID: u16 = 0x2A03;

    pub const UNO: UsbId = UsbId::new(ARDUINO_VID, 0x0043);
    pub const UNO_R3: UsbId = UsbId::new(ARDUINO_VID, 0x0001);
    pub const MEGA_2560: UsbId = UsbId::new(ARDUINO_VID, 0x0010);
    pub const MEGA_2560_R3: UsbId = UsbId::new(ARDUINO_VID, 0x0042);
    pub const LEONARDO: UsbId = UsbId::new(ARDUINO_VID, 0x8036);
    pub const MICRO: UsbId = UsbId::new(ARDUINO_VID, 0x8037);
    pub const NANO_EVERY: UsbId = UsbId::new(ARDUINO_VID, 0x0058);

    pub const ALL: &[(UsbId, &str)] = &[
        (UNO, "Arduino Uno"),
        (UNO_R3, "Arduino Uno"),
        (MEGA_2560, "Arduino Mega 2560"),
        (MEGA_2560_R3, "Arduino Mega 2560"),
        (LEONARDO, "Arduino Leonardo"),
        (MICRO, "Arduino Micro"),
        (NANO_EVERY, "Arduino Nano Every"),
    ];
}

/// Port name fragments used by sensor boards that enumerate by name only
pub mod named_ports {
    /// Information about a port recognised by name
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NamedPortMatch {
        /// Board family
        pub family: &'static str,
    }

    /// Check if a port name matches a known sensor board pattern
    pub fn match_port_name(port_name: &str) -> Option<NamedPortMatch> {
        let name_lower = port_name.to_lowercase();

        if name_lower.contains("picoboard") || name_lower.contains("experisense") {
            return Some(NamedPortMatch {
                family: "PicoBoard",
            });
        }

        None
    }
}

/// Check if a VID/PID is a known serial adapter
pub fn is_known_serial_adapter(vid: u16, pid: u16) -> bool {
    match vid {
        ftdi::VID => ftdi::ALL_PIDS.contains(&pid),
        cp210x::VID => cp210x::ALL_PIDS.contains(&pid),
        ch340::VID => ch340::ALL_PIDS.contains(&pid),
        prolific::VID => prolific::ALL_PIDS.contains(&pid),
        _ => false,
    }
}

/// Check if a VID/PID is a known board with native USB
pub fn is_known_board_usb(vid: u16, pid: u16) -> Option<&'static str> {
    if let Some((_, name)) = board::ALL.iter().find(|(id, _)| id.vid == vid && id.pid == pid) {
        return Some(name);
    }
    match vid {
        board::ARDUINO_VID | board::ARDUINO_ORG_VID => Some("Arduino"),
        _ => None,
    }
}

/// Get adapter type name from VID
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    match vid {
        ftdi::VID => Some("FTDI"),
        cp210x::VID => Some("CP210x"),
        ch340::VID => Some("CH340"),
        prolific::VID => Some("PL2303"),
        board::ARDUINO_VID | board::ARDUINO_ORG_VID => Some("Arduino USB"),
        _ => None,
    }
}

/// Port classification for safe probing decisions
///
/// Known boards can be probed automatically. Generic serial adapters may be
/// wired to anything, so they are probed only when the user asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortClassification {
    /// Board with native USB (Arduino) - safe to auto-probe
    KnownBoard,
    /// Port name identifies a sensor board - safe to auto-probe
    NamedBoard,
    /// Known serial adapter (FTDI, CP210x, CH340, PL2303) - manual probe only
    KnownAdapter,
    /// Unknown device - manual probe only
    Unknown,
}

impl PortClassification {
    /// Returns true if this port classification is safe for automatic probing
    pub fn is_safe_to_probe(&self) -> bool {
        matches!(self, Self::KnownBoard | Self::NamedBoard)
    }
}

/// Suggest a protocol for a port based on USB VID or port name patterns
pub fn suggest_protocol_for_port(vid: Option<u16>, port_name: &str) -> Option<Protocol> {
    if let Some(board::ARDUINO_VID | board::ARDUINO_ORG_VID) = vid {
        return Some(Protocol::Firmata);
    }

    if named_ports::match_port_name(port_name).is_some() {
        return Some(Protocol::Telegram);
    }

    None
}

/// Classify a port based on USB IDs and port name
///
/// Returns the classification tier and an optional hint string for display
/// (e.g., "Arduino Uno", "PicoBoard", "FTDI")
pub fn classify_port(
    vid: Option<u16>,
    pid: Option<u16>,
    port_name: &str,
) -> (PortClassification, Option<&'static str>) {
    if let (Some(v), Some(p)) = (vid, pid) {
        if let Some(name) = is_known_board_usb(v, p) {
            return (PortClassification::KnownBoard, Some(name));
        }
    }

    if let Some(named) = named_ports::match_port_name(port_name) {
        return (PortClassification::NamedBoard, Some(named.family));
    }

    if let Some(v) = vid {
        if matches!(v, ftdi::VID | cp210x::VID | ch340::VID | prolific::VID) {
            return (PortClassification::KnownAdapter, adapter_name(v));
        }
    }

    (PortClassification::Unknown, None)
}
