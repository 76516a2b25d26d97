//! Board Link Engine
//!
//! This crate keeps one microcontroller board connected over a serial link
//! and exposes its pins as async operations.
//!
//! # Architecture
//!
//! A single supervisor task owns everything that changes while a board is
//! connected:
//!
//! - A **candidate queue** of devices that may be a board. One candidate is
//!   opened at a time and probed until it answers or its watchdog expires.
//! - A **session** holding the decoder, the pin model (capabilities, analog
//!   mapping, last samples), the output shadow and pending reads.
//! - **Keep-alive pings** once connected; too many unanswered pings drop the
//!   board and move on to the next candidate.
//!
//! Callers talk to the supervisor through a cloneable [`BoardHandle`] and
//! observe it through a stream of [`BoardEvent`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use board_link::{spawn_supervisor, CandidateMeta, SerialConnector, SupervisorConfig};
//! use board_protocol::{Level, Protocol};
//!
//! # async fn demo() -> Result<(), board_link::LinkError> {
//! let (board, mut events, _task) =
//!     spawn_supervisor(SupervisorConfig::default(), Arc::new(SerialConnector::new()));
//!
//! board
//!     .add_candidate(CandidateMeta::new_real(
//!         "Uno".into(),
//!         "/dev/ttyACM0".into(),
//!         Protocol::Firmata,
//!     ))
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let board_link::BoardEvent::Ready { .. } = event {
//!         board.digital_write(13, Level::High).await?;
//!         let percent = board.analog_read_confirmed(2, false).await?;
//!         println!("A2 = {:.0}%", percent);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod config;
pub mod connector;
pub mod encoder;
pub mod error;
pub mod events;
pub mod handle;
pub mod hardware;
pub mod model;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod waiters;

// Re-export supervisor types
pub use handle::{spawn_supervisor, BoardHandle};
pub use supervisor::{run_supervisor, SessionTask, SupervisorCommand};

// Re-export connection types
pub use candidate::{CandidateKind, CandidateMeta, CandidateQueue};
pub use connector::{
    BoardStream, BoxedStream, Connector, RoutingConnector, SerialConnector, VirtualConnector,
};

pub use config::{
    BoardConfig, ConnectorMap, LinkConfig, ResistorConfig, ShiftRegisterConfig, SupervisorConfig,
    TimingConfig,
};
pub use encoder::{CommandEncoder, SegmentDisplay};
pub use error::LinkError;
pub use events::BoardEvent;
pub use hardware::{map_values, Comparison, HardwareDevice, HardwareRegistry};
pub use model::{PinModel, SampleStore};
pub use session::{SensorCheck, Session, SessionNotice};
pub use state::{BoardStatus, ConnectionState, DeviceId};
pub use waiters::{Conversion, ReadReply};
