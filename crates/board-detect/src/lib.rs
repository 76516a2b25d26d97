//! Board Detection Library
//!
//! This crate provides serial port enumeration, hotplug tracking and
//! one-shot probing for microcontroller boards.
//!
//! # Example
//!
//! ```rust,no_run
//! use board_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports().unwrap();
//!
//! for port in ports {
//!     println!("Found port: {} - {}", port.port, port.describe());
//! }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;
pub mod usb_ids;
pub mod watcher;

pub use error::DetectError;
pub use probe::{probe_port, probe_query, BoardProber, ProbeConfig, ProbeResult};
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo};
pub use usb_ids::{classify_port, suggest_protocol_for_port, PortClassification};
pub use watcher::{diff_ports, PortEvent, PortWatcher, WatcherConfig};
