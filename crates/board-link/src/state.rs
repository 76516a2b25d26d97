//! Connection state and status snapshots

use board_protocol::{FirmwareInfo, Protocol};
use serde::{Deserialize, Serialize};

/// Identifies a candidate device for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of the active connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No candidate open
    #[default]
    Idle,
    /// Candidate open, waiting for a valid answer
    Probing,
    /// Board answered; initialization pending or in progress
    Connected,
    /// Initialized and kept alive by periodic pings
    Pinging,
    /// Board stopped answering; about to move on
    Failed,
}

impl ConnectionState {
    /// Whether a board has answered on the current connection
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Pinging)
    }

    /// Short status line for display
    pub fn status_message(&self) -> &'static str {
        match self {
            ConnectionState::Idle | ConnectionState::Failed => "Disconnected",
            ConnectionState::Probing => "Probing",
            ConnectionState::Connected | ConnectionState::Pinging => "Connected",
        }
    }
}

/// Snapshot of the supervisor, answered to status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStatus {
    pub state: ConnectionState,
    /// Device currently open
    pub device: Option<DeviceId>,
    /// Display name of the open device
    pub device_name: Option<String>,
    pub protocol: Option<Protocol>,
    /// Firmware reported by a Firmata board
    pub firmware: Option<FirmwareInfo>,
    /// Protocol version reported by a Firmata board
    pub protocol_version: Option<(u8, u8)>,
    /// Whether initialization has finished
    pub ready: bool,
    /// Candidates waiting their turn
    pub queued: usize,
}

impl BoardStatus {
    pub fn idle(queued: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            device: None,
            device_name: None,
            protocol: None,
            firmware: None,
            protocol_version: None,
            ready: false,
            queued,
        }
    }

    /// Status line, with the board family where known
    pub fn message(&self) -> String {
        match self.protocol {
            Some(protocol) => format!("{} {}", protocol, self.state.status_message()),
            None => self.state.status_message().to_string(),
        }
    }
}
