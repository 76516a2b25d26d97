//! Events emitted by the connection supervisor
//!
//! All lifecycle changes, traffic and diagnostics flow through a single
//! [`BoardEvent`] stream so a front end only has one thing to listen to.

use board_protocol::{FirmwareInfo, Protocol};

use crate::candidate::CandidateMeta;
use crate::state::DeviceId;

/// Events emitted by the supervisor
#[derive(Debug, Clone)]
pub enum BoardEvent {
    // ========================================================================
    // Candidate lifecycle
    // ========================================================================
    /// A candidate was added to the queue
    CandidateQueued {
        id: DeviceId,
        meta: CandidateMeta,
    },

    /// A candidate was opened and is being probed
    Probing {
        id: DeviceId,
        meta: CandidateMeta,
    },

    /// A candidate could not be opened
    OpenFailed {
        id: DeviceId,
        /// Reason reported by the connector
        reason: String,
    },

    /// A candidate never answered within the watchdog window
    ProbeTimedOut { id: DeviceId },

    // ========================================================================
    // Connection lifecycle
    // ========================================================================
    /// A candidate answered the probe
    Connected {
        id: DeviceId,
        protocol: Protocol,
        /// Firmware identity, for Firmata boards
        firmware: Option<FirmwareInfo>,
    },

    /// Initialization finished; reads and writes are live
    Ready { id: DeviceId },

    /// The board stopped answering pings
    ConnectionLost {
        id: DeviceId,
        /// Ping ticks that went unanswered
        missed_pings: u32,
    },

    /// The active board was closed (lost, removed or shut down)
    Disconnected { id: DeviceId },

    /// A removal notification was ignored because the protocol relies on
    /// pings to detect disconnects
    RemovalIgnored { id: DeviceId },

    // ========================================================================
    // Traffic
    // ========================================================================
    /// Bytes received from the board
    DataIn { id: DeviceId, data: Vec<u8> },

    /// Bytes written to the board
    DataOut { id: DeviceId, data: Vec<u8> },

    // ========================================================================
    // Diagnostics
    // ========================================================================
    /// Something went wrong that callers did not ask about directly
    Error {
        /// Source of the error
        source: String,
        /// Error message
        message: String,
    },
}

impl BoardEvent {
    /// Check if this is a traffic event (for traffic monitor filtering)
    pub fn is_traffic(&self) -> bool {
        matches!(self, BoardEvent::DataIn { .. } | BoardEvent::DataOut { .. })
    }

    /// Check if this is a connection lifecycle event
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            BoardEvent::Connected { .. }
                | BoardEvent::Ready { .. }
                | BoardEvent::ConnectionLost { .. }
                | BoardEvent::Disconnected { .. }
        )
    }

    /// Device this event concerns, if any
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            BoardEvent::CandidateQueued { id, .. }
            | BoardEvent::Probing { id, .. }
            | BoardEvent::OpenFailed { id, .. }
            | BoardEvent::ProbeTimedOut { id }
            | BoardEvent::Connected { id, .. }
            | BoardEvent::Ready { id }
            | BoardEvent::ConnectionLost { id, .. }
            | BoardEvent::Disconnected { id }
            | BoardEvent::RemovalIgnored { id }
            | BoardEvent::DataIn { id, .. }
            | BoardEvent::DataOut { id, .. } => Some(*id),
            BoardEvent::Error { .. } => None,
        }
    }
}
