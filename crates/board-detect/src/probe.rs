//! One-shot probing for board detection
//!
//! A probe opens a port with the link parameters of one protocol, sends that
//! protocol's identification query on a fixed interval and waits for a valid
//! answer until the probe window closes.

use std::time::Duration;

use board_protocol::firmata::FirmataMessage;
use board_protocol::{
    create_device_codec, DeviceMessage, EncodeCommand, FirmataCommand, FirmwareInfo, Protocol,
    TelegramCommand,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::DetectError;

/// Result of probing a serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Protocol that answered
    pub protocol: Protocol,
    /// Firmware name and version (Firmata boards)
    pub firmware: Option<FirmwareInfo>,
    /// Identity slot value (telegram boards)
    pub firmware_id: Option<u16>,
    /// Raw bytes received up to and including the answer
    pub raw: Vec<u8>,
}

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long to wait for a valid answer
    pub timeout: Duration,
    /// Delay between repeated queries
    pub query_interval: Duration,
}

impl ProbeConfig {
    /// Timing used by each protocol's firmware
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Firmata => Self {
                timeout: Duration::from_millis(5000),
                query_interval: Duration::from_millis(1000),
            },
            Protocol::Telegram => Self {
                timeout: Duration::from_millis(250),
                query_interval: Duration::from_millis(50),
            },
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::for_protocol(Protocol::Firmata)
    }
}

/// The query a protocol uses to ask "who are you?"
pub fn probe_query(protocol: Protocol) -> Vec<u8> {
    match protocol {
        Protocol::Firmata => FirmataCommand::QueryFirmware.encode(),
        Protocol::Telegram => TelegramCommand::Ping.encode(),
    }
}

/// Board prober
pub struct BoardProber {
    config: ProbeConfig,
}

impl BoardProber {
    /// Create a prober with the default timing of `protocol`
    pub fn new(protocol: Protocol) -> Self {
        Self {
            config: ProbeConfig::for_protocol(protocol),
        }
    }

    /// Create a prober with custom configuration
    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe a stream for a board speaking `protocol`
    pub async fn probe<S>(&self, stream: &mut S, protocol: Protocol) -> Option<ProbeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.config.timeout;
        let query = probe_query(protocol);
        let mut codec = create_device_codec(protocol);
        let mut raw = Vec::new();
        let mut buf = [0u8; 256];

        let mut ticker = interval(self.config.query_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("Sending {} probe: {:02X?}", protocol, query);
                    if let Err(e) = stream.write_all(&query).await {
                        warn!("Failed to write {} probe: {}", protocol, e);
                        return None;
                    }
                }
                read = stream.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            debug!("Stream closed while probing");
                            return None;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            trace!("Probe read error: {}", e);
                            return None;
                        }
                    };
                    raw.extend_from_slice(&buf[..n]);
                    codec.push_bytes(&buf[..n]);

                    while let Some(message) = codec.next_message() {
                        match message {
                            Ok(DeviceMessage::Firmata(FirmataMessage::Firmware(info))) => {
                                info!("Identified {} via Firmata", info);
                                return Some(ProbeResult {
                                    protocol,
                                    firmware: Some(info),
                                    firmware_id: None,
                                    raw,
                                });
                            }
                            Ok(DeviceMessage::Telegram(telegram)) if telegram.is_valid_device() => {
                                info!("Identified telegram board (id {:?})", telegram.firmware_id);
                                return Some(ProbeResult {
                                    protocol,
                                    firmware: None,
                                    firmware_id: telegram.firmware_id,
                                    raw,
                                });
                            }
                            Ok(other) => trace!("Ignoring {:?} while probing", other),
                            Err(e) => debug!("Decode error while probing: {}", e),
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    debug!("No {} board answered within {:?}", protocol, self.config.timeout);
                    return None;
                }
            }
        }
    }
}

/// Probe a specific port for a board speaking `protocol`
///
/// Opens the port at the protocol's bit rate with no flow control.
pub async fn probe_port(port_name: &str, protocol: Protocol) -> Result<ProbeResult, DetectError> {
    use tokio_serial::SerialPortBuilderExt;

    debug!("Probing {} for {} at {} baud", port_name, protocol, protocol.baud_rate());

    let mut stream = tokio_serial::new(port_name, protocol.baud_rate())
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| DetectError::OpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        })?;

    BoardProber::new(protocol)
        .probe(&mut stream, protocol)
        .await
        .ok_or_else(|| DetectError::Timeout {
            port: port_name.to_string(),
            protocol: protocol.name().to_string(),
        })
}
