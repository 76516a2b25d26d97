//! Opening candidate transports
//!
//! The supervisor never opens ports itself; it asks a [`Connector`]. Real
//! boards go through tokio-serial, simulated boards hand over one end of a
//! `tokio::io::duplex` pair.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info};

use crate::candidate::{CandidateKind, CandidateMeta};
use crate::config::LinkConfig;

/// Byte stream to a board
pub trait BoardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BoardStream for T {}

/// Owned, type-erased board stream
pub type BoxedStream = Box<dyn BoardStream>;

/// Opens the transport behind a candidate
pub trait Connector: Send + Sync {
    fn open(&self, meta: &CandidateMeta, link: &LinkConfig) -> io::Result<BoxedStream>;
}

/// Opens serial ports with tokio-serial
#[derive(Debug, Clone, Default)]
pub struct SerialConnector;

impl SerialConnector {
    pub fn new() -> Self {
        Self
    }
}

fn data_bits(bits: u8) -> io::Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported data bits: {}", other),
        )),
    }
}

fn stop_bits(bits: u8) -> io::Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported stop bits: {}", other),
        )),
    }
}

impl Connector for SerialConnector {
    fn open(&self, meta: &CandidateMeta, link: &LinkConfig) -> io::Result<BoxedStream> {
        let port = meta.port_name.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "candidate has no port name")
        })?;
        let flow = if link.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let stream = tokio_serial::new(port, link.baud_rate)
            .data_bits(data_bits(link.data_bits)?)
            .stop_bits(stop_bits(link.stop_bits)?)
            .parity(Parity::None)
            .flow_control(flow)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(io::Error::from)?;

        info!("Opened {} at {} baud", port, link.baud_rate);
        Ok(Box::new(stream))
    }
}

/// Hands out pre-registered in-memory streams
///
/// Each registered stream can be opened once, like a port that is unplugged
/// after use.
#[derive(Default)]
pub struct VirtualConnector {
    streams: Mutex<HashMap<String, BoxedStream>>,
}

impl VirtualConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a stream available under a simulation ID
    pub fn register(&self, sim_id: impl Into<String>, stream: impl BoardStream + 'static) {
        let sim_id = sim_id.into();
        debug!("Registered virtual board {}", sim_id);
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(sim_id, Box::new(stream));
        }
    }

    #[cfg(test)]
    fn is_registered(&self, sim_id: &str) -> bool {
        self.streams
            .lock()
            .map(|streams| streams.contains_key(sim_id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for VirtualConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self
            .streams
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("VirtualConnector")
            .field("streams", &ids)
            .finish()
    }
}

impl Connector for VirtualConnector {
    fn open(&self, meta: &CandidateMeta, _link: &LinkConfig) -> io::Result<BoxedStream> {
        let sim_id = meta.sim_id.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "candidate has no simulation ID")
        })?;
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "virtual connector poisoned"))?;
        streams.remove(sim_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no virtual board '{}'", sim_id),
            )
        })
    }
}

/// Sends real candidates to serial and virtual ones to memory
#[derive(Debug, Clone, Default)]
pub struct RoutingConnector {
    serial: SerialConnector,
    virtual_boards: Arc<VirtualConnector>,
}

impl RoutingConnector {
    pub fn new(virtual_boards: Arc<VirtualConnector>) -> Self {
        Self {
            serial: SerialConnector::new(),
            virtual_boards,
        }
    }

    pub fn virtual_boards(&self) -> &Arc<VirtualConnector> {
        &self.virtual_boards
    }
}

impl Connector for RoutingConnector {
    fn open(&self, meta: &CandidateMeta, link: &LinkConfig) -> io::Result<BoxedStream> {
        match meta.kind {
            CandidateKind::Real => self.serial.open(meta, link),
            CandidateKind::Virtual => self.virtual_boards.open(meta, link),
        }
    }
}
