//! Async handle to a running supervisor
//!
//! [`BoardHandle`] is cheap to clone. Every operation is sent to the
//! supervisor task and runs there against the live session, so operations
//! from different tasks never interleave on the wire.
//!
//! Confirmed reads resolve once the board reports a sample taken in the
//! requested range. If the connection drops first they fail with
//! [`LinkError::ConnectionLost`].

use std::sync::Arc;

use board_protocol::{DisplayTarget, Level, PinMode};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::candidate::CandidateMeta;
use crate::config::SupervisorConfig;
use crate::connector::Connector;
use crate::encoder::SegmentDisplay;
use crate::error::LinkError;
use crate::events::BoardEvent;
use crate::hardware::Comparison;
use crate::session::{SensorCheck, Session};
use crate::state::{BoardStatus, DeviceId};
use crate::supervisor::{run_supervisor, SessionTask, SupervisorCommand};
use crate::waiters::ReadReply;

/// Start a supervisor task
///
/// Returns the handle, the event stream and the task's join handle. The
/// supervisor stops on [`BoardHandle::shutdown`] or when every handle has
/// been dropped.
pub fn spawn_supervisor(
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
) -> (BoardHandle, mpsc::Receiver<BoardEvent>, JoinHandle<()>) {
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let task = tokio::spawn(run_supervisor(config, connector, cmd_rx, event_tx));
    (BoardHandle { cmd_tx }, event_rx, task)
}

/// Handle for talking to the supervisor
#[derive(Debug, Clone)]
pub struct BoardHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
}

impl BoardHandle {
    /// Wrap an existing command channel
    pub fn new(cmd_tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn send(&self, cmd: SupervisorCommand) -> Result<(), LinkError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| LinkError::SupervisorGone)
    }

    /// Run `f` against the connected session
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, LinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, LinkError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: SessionTask = Box::new(move |session| {
            let _ = tx.send(session.and_then(f));
        });
        self.send(SupervisorCommand::WithSession(task)).await?;
        rx.await.map_err(|_| LinkError::SupervisorGone)?
    }

    /// Start a read and wait for its confirmed value
    async fn confirmed<F>(&self, start: F) -> Result<f64, LinkError>
    where
        F: FnOnce(&mut Session, ReadReply) -> Result<(), LinkError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let reply: ReadReply = Box::new(move |value| {
            let _ = tx.send(value);
        });
        self.with_session(move |session| start(session, reply))
            .await?;
        rx.await.map_err(|_| LinkError::ConnectionLost)
    }

    // ========================================================================
    // Supervisor
    // ========================================================================

    /// Queue a candidate device; returns its ID
    pub async fn add_candidate(&self, meta: CandidateMeta) -> Result<DeviceId, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::AddCandidate { meta, response: tx })
            .await?;
        rx.await.map_err(|_| LinkError::SupervisorGone)
    }

    /// Report that a device left the host
    pub async fn remove_device(&self, id: DeviceId) -> Result<(), LinkError> {
        self.send(SupervisorCommand::RemoveDevice { id }).await
    }

    pub async fn status(&self) -> Result<BoardStatus, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::QueryStatus { response: tx })
            .await?;
        rx.await.map_err(|_| LinkError::SupervisorGone)
    }

    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.send(SupervisorCommand::Shutdown).await
    }

    // ========================================================================
    // Pins
    // ========================================================================

    pub async fn digital_write(&self, pin: u8, level: Level) -> Result<(), LinkError> {
        self.with_session(move |s| s.digital_write(pin, level)).await
    }

    pub async fn analog_write(&self, pin: u8, percent: f64) -> Result<(), LinkError> {
        self.with_session(move |s| s.analog_write(pin, percent))
            .await
    }

    pub async fn rotate_servo(&self, pin: u8, degrees: i32) -> Result<(), LinkError> {
        self.with_session(move |s| s.rotate_servo(pin, degrees))
            .await
    }

    /// Last reported level of a pin, switching it to input
    pub async fn digital_read(&self, pin: u8) -> Result<Option<Level>, LinkError> {
        self.with_session(move |s| s.digital_read(pin)).await
    }

    /// Cached analog reading in percent; also starts the range switch
    pub async fn analog_read(&self, channel: u8, sensitive: bool) -> Result<Option<f64>, LinkError> {
        self.with_session(move |s| s.analog_read(channel, sensitive, None))
            .await
    }

    /// Analog reading taken after the range switch is confirmed
    pub async fn analog_read_confirmed(
        &self,
        channel: u8,
        sensitive: bool,
    ) -> Result<f64, LinkError> {
        self.confirmed(move |s, reply| {
            s.analog_read(channel, sensitive, Some(reply)).map(|_| ())
        })
        .await
    }

    /// Resistance on a divider channel, in kΩ
    pub async fn read_resistance(&self, channel: u8, sensitive: bool) -> Result<f64, LinkError> {
        self.confirmed(move |s, reply| s.read_resistance(channel, sensitive, reply))
            .await
    }

    pub async fn has_capability(&self, pin: u8, mode: PinMode) -> Result<bool, LinkError> {
        self.with_session(move |s| Ok(s.has_capability(pin, mode)))
            .await
    }

    // ========================================================================
    // Shift registers
    // ========================================================================

    pub async fn shift_out(&self, data_pin: u8, clock_pin: u8, value: u16) -> Result<(), LinkError> {
        self.with_session(move |s| s.shift_out(data_pin, clock_pin, value))
            .await
    }

    pub async fn serial_out(&self, value: u16) -> Result<(), LinkError> {
        self.with_session(move |s| s.serial_out(value)).await
    }

    pub async fn segment_display(
        &self,
        display: SegmentDisplay,
        digit: u8,
    ) -> Result<(), LinkError> {
        self.with_session(move |s| s.segment_display(display, digit))
            .await
    }

    // ========================================================================
    // Connectors
    // ========================================================================

    pub async fn read_connector(
        &self,
        name: impl Into<String>,
        sensitive: bool,
    ) -> Result<Option<f64>, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.read_connector(&name, sensitive, None))
            .await
    }

    pub async fn read_connector_confirmed(
        &self,
        name: impl Into<String>,
        sensitive: bool,
    ) -> Result<f64, LinkError> {
        let name = name.into();
        self.confirmed(move |s, reply| {
            s.read_connector(&name, sensitive, Some(reply)).map(|_| ())
        })
        .await
    }

    pub async fn read_connector_resistance(
        &self,
        name: impl Into<String>,
        sensitive: bool,
    ) -> Result<f64, LinkError> {
        let name = name.into();
        self.confirmed(move |s, reply| s.read_connector_resistance(&name, sensitive, reply))
            .await
    }

    pub async fn write_connector(
        &self,
        name: impl Into<String>,
        percent: f64,
    ) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.write_connector(&name, percent))
            .await
    }

    pub async fn connector_compare(
        &self,
        name: impl Into<String>,
        cmp: Comparison,
        threshold: f64,
    ) -> Result<bool, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.connector_compare(&name, cmp, threshold))
            .await
    }

    // ========================================================================
    // Named hardware
    // ========================================================================

    pub async fn connect_hw(
        &self,
        name: impl Into<String>,
        connector: impl Into<String>,
    ) -> Result<(), LinkError> {
        let (name, connector) = (name.into(), connector.into());
        self.with_session(move |s| s.connect_hw(&name, &connector))
            .await
    }

    pub async fn set_led(&self, name: impl Into<String>, percent: f64) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.set_led(&name, percent)).await
    }

    pub async fn change_led(&self, name: impl Into<String>, delta: f64) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.change_led(&name, delta)).await
    }

    pub async fn digital_led(&self, name: impl Into<String>, on: bool) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.digital_led(&name, on)).await
    }

    pub async fn rotate_servo_named(
        &self,
        name: impl Into<String>,
        degrees: i32,
    ) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.rotate_servo_named(&name, degrees))
            .await
    }

    pub async fn change_servo(&self, name: impl Into<String>, delta: i32) -> Result<(), LinkError> {
        let name = name.into();
        self.with_session(move |s| s.change_servo(&name, delta))
            .await
    }

    pub async fn read_input(&self, name: impl Into<String>) -> Result<Option<f64>, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.read_input(&name, None)).await
    }

    pub async fn read_input_confirmed(&self, name: impl Into<String>) -> Result<f64, LinkError> {
        let name = name.into();
        self.confirmed(move |s, reply| s.read_input(&name, Some(reply)).map(|_| ()))
            .await
    }

    pub async fn is_button_pressed(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<bool>, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.is_button_pressed(&name))
            .await
    }

    pub async fn input_compare(
        &self,
        name: impl Into<String>,
        cmp: Comparison,
        threshold: f64,
    ) -> Result<bool, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.input_compare(&name, cmp, threshold))
            .await
    }

    // ========================================================================
    // Telegram boards
    // ========================================================================

    pub async fn sensor(&self, name: impl Into<String>) -> Result<Option<f64>, LinkError> {
        let name = name.into();
        self.with_session(move |s| s.sensor(&name)).await
    }

    pub async fn sensor_connected(&self, check: SensorCheck) -> Result<bool, LinkError> {
        self.with_session(move |s| s.sensor_connected(&check))
            .await
    }

    pub async fn show_number(&self, target: DisplayTarget, value: u8) -> Result<(), LinkError> {
        self.with_session(move |s| s.show_number(target, value))
            .await
    }

    pub async fn clear_displays(&self) -> Result<(), LinkError> {
        self.with_session(|s| s.clear_displays()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::VirtualConnector;

    #[tokio::test]
    async fn test_operations_fail_without_board() {
        let (handle, _events, _task) =
            spawn_supervisor(SupervisorConfig::default(), Arc::new(VirtualConnector::new()));

        assert_eq!(
            handle.digital_write(13, Level::High).await,
            Err(LinkError::NotConnected)
        );
        assert_eq!(
            handle.read_resistance(2, false).await,
            Err(LinkError::NotConnected)
        );
        let status = handle.status().await.unwrap();
        assert!(!status.state.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_stops_supervisor() {
        let (handle, _events, task) =
            spawn_supervisor(SupervisorConfig::default(), Arc::new(VirtualConnector::new()));
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.status().await, Err(LinkError::SupervisorGone));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_supervisor_runs_on_worker_threads() {
        let connector = Arc::new(VirtualConnector::new());
        let (_host, board) = tokio::io::duplex(64);
        connector.register("sim-1", board);
        let (handle, mut events, task) = spawn_supervisor(SupervisorConfig::default(), connector);

        let missing = CandidateMeta::new_virtual(
            "Ghost".to_string(),
            "sim-0".to_string(),
            board_protocol::Protocol::Firmata,
        );
        let missing_id = handle.add_candidate(missing).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(BoardEvent::CandidateQueued { id, .. }) if id == missing_id
        ));
        assert!(matches!(
            events.recv().await,
            Some(BoardEvent::OpenFailed { id, .. }) if id == missing_id
        ));

        let present = CandidateMeta::new_virtual(
            "Uno".to_string(),
            "sim-1".to_string(),
            board_protocol::Protocol::Firmata,
        );
        let present_id = handle.add_candidate(present).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(BoardEvent::CandidateQueued { id, .. }) if id == present_id
        ));
        assert!(matches!(
            events.recv().await,
            Some(BoardEvent::Probing { id, .. }) if id == present_id
        ));
        assert_eq!(handle.status().await.unwrap().device, Some(present_id));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
