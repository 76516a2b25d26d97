//! Candidate devices and the queue they wait in
//!
//! A candidate is anything the supervisor may try to open: a serial port
//! reported by the host, or a virtual board registered with a
//! [`VirtualConnector`](crate::connector::VirtualConnector).

use std::collections::VecDeque;

use board_detect::SerialPortInfo;
use board_protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::state::DeviceId;

/// Type of candidate connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Hardware board behind a serial port
    Real,
    /// Simulated board on an in-memory stream
    Virtual,
}

/// Metadata for a candidate device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMeta {
    /// Protocol the board is expected to speak
    pub protocol: Protocol,
    pub kind: CandidateKind,
    /// Serial port name (for real boards)
    pub port_name: Option<String>,
    /// Simulation ID (for virtual boards)
    pub sim_id: Option<String>,
    /// Human-readable display name
    pub display_name: String,
}

impl CandidateMeta {
    /// Create metadata for a board behind a serial port
    pub fn new_real(display_name: String, port_name: String, protocol: Protocol) -> Self {
        Self {
            protocol,
            kind: CandidateKind::Real,
            port_name: Some(port_name),
            sim_id: None,
            display_name,
        }
    }

    /// Create metadata for a simulated board
    pub fn new_virtual(display_name: String, sim_id: String, protocol: Protocol) -> Self {
        Self {
            protocol,
            kind: CandidateKind::Virtual,
            port_name: None,
            sim_id: Some(sim_id),
            display_name,
        }
    }

    /// Candidate for a port reported by the host
    pub fn from_port(info: &SerialPortInfo, protocol: Protocol) -> Self {
        let display = format!("{} ({})", info.describe(), info.port);
        Self::new_real(display, info.port.clone(), protocol)
    }

    /// Check if this is a simulated board
    pub fn is_simulated(&self) -> bool {
        self.kind == CandidateKind::Virtual
    }

    /// Port name or simulation ID, whichever applies
    pub fn address(&self) -> &str {
        self.port_name
            .as_deref()
            .or(self.sim_id.as_deref())
            .unwrap_or("")
    }
}

/// FIFO of candidates not yet tried
#[derive(Debug, Default)]
pub struct CandidateQueue {
    entries: VecDeque<(DeviceId, CandidateMeta)>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: DeviceId, meta: CandidateMeta) {
        self.entries.push_back((id, meta));
    }

    /// Take the oldest candidate
    pub fn pop(&mut self) -> Option<(DeviceId, CandidateMeta)> {
        self.entries.pop_front()
    }

    /// Drop a candidate that has not been tried yet
    pub fn remove(&mut self, id: DeviceId) -> Option<CandidateMeta> {
        let pos = self.entries.iter().position(|(queued, _)| *queued == id)?;
        self.entries.remove(pos).map(|(_, meta)| meta)
    }

    #[cfg(test)]
    fn contains_address(&self, address: &str) -> bool {
        self.entries.iter().any(|(_, meta)| meta.address() == address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(port: &str) -> CandidateMeta {
        CandidateMeta::new_real(port.to_string(), port.to_string(), Protocol::Firmata)
    }

    #[test]
    fn test_real_candidate_meta() {
        let meta = real("/dev/ttyACM0");
        assert_eq!(meta.kind, CandidateKind::Real);
        assert!(!meta.is_simulated());
        assert_eq!(meta.address(), "/dev/ttyACM0");
    }

    #[test]
    fn test_candidate_from_port() {
        let meta = CandidateMeta::from_port(&SerialPortInfo::bare("/dev/ttyUSB3"), Protocol::Telegram);
        assert_eq!(meta.port_name.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(meta.protocol, Protocol::Telegram);
        assert!(meta.display_name.ends_with("(/dev/ttyUSB3)"));
    }

    #[test]
    fn test_virtual_candidate_meta() {
        let meta = CandidateMeta::new_virtual(
            "Virtual".to_string(),
            "sim-1".to_string(),
            Protocol::Telegram,
        );
        assert!(meta.is_simulated());
        assert_eq!(meta.address(), "sim-1");
        assert!(meta.port_name.is_none());
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = CandidateQueue::new();
        queue.push(DeviceId(1), real("a"));
        queue.push(DeviceId(2), real("b"));

        assert_eq!(queue.pop().map(|(id, _)| id), Some(DeviceId(1)));
        assert_eq!(queue.pop().map(|(id, _)| id), Some(DeviceId(2)));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_remove_untried_candidate() {
        let mut queue = CandidateQueue::new();
        queue.push(DeviceId(1), real("a"));
        queue.push(DeviceId(2), real("b"));
        queue.push(DeviceId(3), real("c"));

        assert!(queue.remove(DeviceId(2)).is_some());
        assert!(queue.remove(DeviceId(2)).is_none());
        assert!(!queue.contains_address("b"));
        assert_eq!(queue.len(), 2);
    }
}
