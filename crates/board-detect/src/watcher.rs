//! Hotplug tracking for serial ports
//!
//! The operating system gives no portable arrival/removal callback for serial
//! ports, so the watcher re-enumerates on an interval and reports the
//! difference between two snapshots.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::scanner::{PortScanner, SerialPortInfo};
use crate::usb_ids::PortClassification;

/// A change in the set of available ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A port appeared
    Arrived(SerialPortInfo),
    /// A port disappeared
    Departed(String),
}

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How often to re-enumerate
    pub poll_interval: Duration,
    /// Report ports that are not recognised as boards
    pub include_unknown: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            include_unknown: false,
        }
    }
}

/// Events that turn `previous` into `current`, removals first
pub fn diff_ports(previous: &[SerialPortInfo], current: &[SerialPortInfo]) -> Vec<PortEvent> {
    let before: HashSet<&str> = previous.iter().map(|p| p.port.as_str()).collect();
    let after: HashSet<&str> = current.iter().map(|p| p.port.as_str()).collect();

    let departed = previous
        .iter()
        .filter(|p| !after.contains(p.port.as_str()))
        .map(|p| PortEvent::Departed(p.port.clone()));
    let arrived = current
        .iter()
        .filter(|p| !before.contains(p.port.as_str()))
        .map(|p| PortEvent::Arrived(p.clone()));

    departed.chain(arrived).collect()
}

/// Polls the port list and emits arrival/removal events
pub struct PortWatcher {
    scanner: PortScanner,
    config: WatcherConfig,
    known: Vec<SerialPortInfo>,
}

impl PortWatcher {
    /// Create a watcher with default configuration
    pub fn new() -> Self {
        Self::with_config(WatcherConfig::default())
    }

    /// Create a watcher with custom configuration
    pub fn with_config(config: WatcherConfig) -> Self {
        Self {
            scanner: PortScanner::new(),
            config,
            known: Vec::new(),
        }
    }

    fn wanted(&self, port: &SerialPortInfo) -> bool {
        self.config.include_unknown || port.classify().0 != PortClassification::Unknown
    }

    /// Apply a fresh snapshot and return the resulting events
    pub fn update(&mut self, snapshot: Vec<SerialPortInfo>) -> Vec<PortEvent> {
        let current: Vec<SerialPortInfo> = snapshot.into_iter().filter(|p| self.wanted(p)).collect();
        let events = diff_ports(&self.known, &current);
        self.known = current;
        events
    }

    /// Re-enumerate once
    pub fn poll(&mut self) -> Vec<PortEvent> {
        match self.scanner.enumerate_ports() {
            Ok(ports) => self.update(ports),
            Err(e) => {
                warn!("Port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Run the watcher until the receiver is dropped
    pub fn spawn(mut self, tx: mpsc::Sender<PortEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Port watcher started");

            loop {
                ticker.tick().await;
                for event in self.poll() {
                    debug!("Port event: {:?}", event);
                    if tx.send(event).await.is_err() {
                        info!("Port watcher stopped");
                        return;
                    }
                }
            }
        })
    }
}

impl Default for PortWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arduino(port: &str) -> SerialPortInfo {
        SerialPortInfo {
            vid: Some(0x2341),
            pid: Some(0x0043),
            ..SerialPortInfo::bare(port)
        }
    }

    #[test]
    fn test_diff_ports() {
        let a = arduino("/dev/ttyACM0");
        let b = arduino("/dev/ttyACM1");

        let events = diff_ports(&[a.clone()], &[b.clone()]);
        assert_eq!(
            events,
            vec![
                PortEvent::Departed("/dev/ttyACM0".to_string()),
                PortEvent::Arrived(b.clone())
            ]
        );

        assert!(diff_ports(&[a.clone(), b.clone()], &[b, a]).is_empty());
    }

    #[test]
    fn test_update_filters_unknown_ports() {
        let mut watcher = PortWatcher::new();
        let events = watcher.update(vec![
            arduino("/dev/ttyACM0"),
            SerialPortInfo::bare("/dev/ttyS0"),
        ]);
        assert_eq!(events, vec![PortEvent::Arrived(arduino("/dev/ttyACM0"))]);

        let events = watcher.update(vec![SerialPortInfo::bare("/dev/ttyS0")]);
        assert_eq!(
            events,
            vec![PortEvent::Departed("/dev/ttyACM0".to_string())]
        );
    }

    #[test]
    fn test_update_can_include_unknown() {
        let mut watcher = PortWatcher::with_config(WatcherConfig {
            include_unknown: true,
            ..Default::default()
        });
        let events = watcher.update(vec![SerialPortInfo::bare("/dev/ttyS0")]);
        assert_eq!(events.len(), 1);
    }
}
