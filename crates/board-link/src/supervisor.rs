//! Connection supervisor actor
//!
//! One task owns the candidate queue, the open transport and the
//! [`Session`]. Commands, transport chunks and timer ticks are handled one at
//! a time, in arrival order.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──candidate──▶ Probing ──valid answer──▶ Connected ──settle──▶ Pinging
//!   ▲                    │                                              │
//!   └──── watchdog ──────┘◀──────────── pings unanswered ───────────────┘
//! ```
//!
//! Every candidate gets one open and one watchdog window. When it fails the
//! transport is closed, pending reads are dropped, and the next queued
//! candidate is tried.
//!
//! # Example
//!
//! ```rust,ignore
//! use board_link::supervisor::{run_supervisor, SupervisorCommand};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//! tokio::spawn(run_supervisor(config, connector, cmd_rx, event_tx));
//! ```

use std::future::pending;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::candidate::{CandidateMeta, CandidateQueue};
use crate::config::{LinkConfig, SupervisorConfig, TimingConfig};
use crate::connector::{BoxedStream, Connector};
use crate::error::LinkError;
use crate::events::BoardEvent;
use crate::session::{Session, SessionNotice};
use crate::state::{BoardStatus, ConnectionState, DeviceId};

/// Work run against the live session inside the actor
///
/// Receives `Err(NotConnected)` when no board has answered yet.
pub type SessionTask = Box<dyn for<'a> FnOnce(Result<&'a mut Session, LinkError>) + Send>;

/// Commands sent to the supervisor
pub enum SupervisorCommand {
    /// Queue a candidate device
    AddCandidate {
        meta: CandidateMeta,
        /// Receives the assigned device ID
        response: oneshot::Sender<DeviceId>,
    },

    /// A device disappeared from the host
    RemoveDevice { id: DeviceId },

    /// Run an operation against the session
    WithSession(SessionTask),

    /// Snapshot of the supervisor state
    QueryStatus {
        response: oneshot::Sender<BoardStatus>,
    },

    /// Close everything and stop
    Shutdown,
}

impl std::fmt::Debug for SupervisorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorCommand::AddCandidate { meta, .. } => f
                .debug_struct("AddCandidate")
                .field("meta", meta)
                .finish_non_exhaustive(),
            SupervisorCommand::RemoveDevice { id } => {
                f.debug_struct("RemoveDevice").field("id", id).finish()
            }
            SupervisorCommand::WithSession(_) => f.write_str("WithSession(..)"),
            SupervisorCommand::QueryStatus { .. } => f.write_str("QueryStatus"),
            SupervisorCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Bytes from a reader task, tagged with the connection they came from
struct IoChunk {
    generation: u64,
    data: Vec<u8>,
}

/// The candidate currently open
struct ActiveDevice {
    id: DeviceId,
    meta: CandidateMeta,
    generation: u64,
    timing: TimingConfig,
    writer: WriteHalf<BoxedStream>,
    reader: JoinHandle<()>,
    session: Session,
}

/// Timers of the active connection; `None` means not armed
#[derive(Default)]
struct Timers {
    probe: Option<Interval>,
    watchdog: Option<Pin<Box<Sleep>>>,
    settle: Option<Pin<Box<Sleep>>>,
    ping: Option<Interval>,
}

impl Timers {
    fn cancel_all(&mut self) {
        *self = Self::default();
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

fn repeating(period: std::time::Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

struct SupervisorState {
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    event_tx: mpsc::Sender<BoardEvent>,
    io_tx: mpsc::Sender<IoChunk>,
    io_rx: mpsc::Receiver<IoChunk>,
    queue: CandidateQueue,
    next_id: u32,
    generation: u64,
    active: Option<ActiveDevice>,
    state: ConnectionState,
    timers: Timers,
    ping_outstanding: bool,
    missed_pings: u32,
}

impl SupervisorState {
    fn new(
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        event_tx: mpsc::Sender<BoardEvent>,
    ) -> Self {
        let (io_tx, io_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            connector,
            event_tx,
            io_tx,
            io_rx,
            queue: CandidateQueue::new(),
            next_id: 1,
            generation: 0,
            active: None,
            state: ConnectionState::Idle,
            timers: Timers::default(),
            ping_outstanding: false,
            missed_pings: 0,
        }
    }

    async fn emit(&mut self, event: BoardEvent) {
        let tx = self.event_tx.clone();
        let _ = tx.send(event).await;
    }

    /// Traffic events are dropped rather than stalling the actor
    fn emit_traffic(&self, event: BoardEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn status(&self) -> BoardStatus {
        let mut status = BoardStatus::idle(self.queue.len());
        status.state = self.state;
        if let Some(active) = &self.active {
            let model = active.session.model();
            status.device = Some(active.id);
            status.device_name = Some(active.meta.display_name.clone());
            status.protocol = Some(active.meta.protocol);
            status.firmware = model.firmware.clone();
            status.protocol_version = model.version;
            status.ready = active.session.is_ready();
        }
        status
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn add_candidate(&mut self, meta: CandidateMeta) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        info!(
            "Queued candidate {} {} ({})",
            id,
            meta.display_name,
            meta.protocol
        );
        self.queue.push(id, meta.clone());
        self.emit(BoardEvent::CandidateQueued { id, meta }).await;
        id
    }

    async fn remove_device(&mut self, id: DeviceId) {
        if self.queue.remove(id).is_some() {
            debug!("Dropped untried candidate {}", id);
            return;
        }
        let Some(active) = &self.active else {
            return;
        };
        if active.id != id {
            return;
        }
        if active.timing.honor_removal {
            info!("Device {} removed", id);
            self.teardown().await;
            self.open_next().await;
        } else {
            info!(
                "Ignoring removal of {} ({}); pings detect disconnects",
                id, active.meta.protocol
            );
            self.emit(BoardEvent::RemovalIgnored { id }).await;
        }
    }

    async fn run_task(&mut self, task: SessionTask) {
        match self.active.as_mut() {
            Some(active) if self.state.is_connected() => {
                task(Ok(&mut active.session));
                self.flush().await;
                self.process_notices().await;
            }
            _ => task(Err(LinkError::NotConnected)),
        }
    }

    // ========================================================================
    // Candidate lifecycle
    // ========================================================================

    /// Open queued candidates until one opens or the queue is empty
    async fn open_next(&mut self) {
        while self.active.is_none() {
            let Some((id, meta)) = self.queue.pop() else {
                self.state = ConnectionState::Idle;
                return;
            };

            let link = LinkConfig::for_protocol(meta.protocol);
            let stream = match self.connector.open(&meta, &link) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to open {} ({}): {}", id, meta.address(), e);
                    self.emit(BoardEvent::OpenFailed {
                        id,
                        reason: e.to_string(),
                    })
                    .await;
                    continue;
                }
            };

            self.generation += 1;
            let generation = self.generation;
            let (reader, writer) = tokio::io::split(stream);
            let reader = spawn_reader(reader, generation, self.io_tx.clone());
            let timing = *self.config.timing(meta.protocol);

            info!("Probing {} ({}) as {}", id, meta.address(), meta.protocol);
            self.active = Some(ActiveDevice {
                id,
                meta: meta.clone(),
                generation,
                timing,
                writer,
                reader,
                session: Session::new(meta.protocol, self.config.board.clone()),
            });
            self.state = ConnectionState::Probing;
            self.ping_outstanding = false;
            self.missed_pings = 0;
            self.emit(BoardEvent::Probing { id, meta }).await;

            self.timers.probe = Some(repeating(timing.probe_interval()));
            self.timers.watchdog = Some(Box::pin(sleep(timing.watchdog())));
            self.send_probe().await;
        }
    }

    /// Close the active device and forget everything about it
    async fn teardown(&mut self) {
        self.timers.cancel_all();
        self.ping_outstanding = false;
        self.missed_pings = 0;

        let was_connected = self.state.is_connected() || self.state == ConnectionState::Failed;
        self.state = ConnectionState::Idle;

        let Some(mut active) = self.active.take() else {
            return;
        };
        active.reader.abort();
        active.session.reset();
        let _ = active.writer.shutdown().await;
        debug!("Closed {}", active.id);

        if was_connected {
            self.emit(BoardEvent::Disconnected { id: active.id }).await;
        }
    }

    async fn send_probe(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.session.queue_probe();
        }
        self.flush().await;
    }

    /// Write everything the session queued
    async fn flush(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let id = active.id;
        for data in active.session.take_outbound() {
            debug!("TX {} {:02X?}", id, data);
            if let Err(e) = active.writer.write_all(&data).await {
                warn!("Write to {} failed: {}", id, e);
                let _ = self
                    .event_tx
                    .send(BoardEvent::Error {
                        source: format!("device {}", id),
                        message: e.to_string(),
                    })
                    .await;
                break;
            }
            let _ = self.event_tx.try_send(BoardEvent::DataOut { id, data });
        }
    }

    // ========================================================================
    // Inbound data
    // ========================================================================

    async fn handle_chunk(&mut self, chunk: IoChunk) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if chunk.generation != active.generation {
            debug!("Dropping {} stale bytes", chunk.data.len());
            return;
        }
        let id = active.id;
        debug!("RX {} {:02X?}", id, chunk.data);
        active.session.push_bytes(&chunk.data);
        self.emit_traffic(BoardEvent::DataIn {
            id,
            data: chunk.data,
        });

        self.process_notices().await;
        self.flush().await;
    }

    /// Act on session notices until none are left
    async fn process_notices(&mut self) {
        loop {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            let notices = active.session.drain_notices();
            if notices.is_empty() {
                return;
            }
            let id = active.id;
            let protocol = active.meta.protocol;
            let settle = active.timing.settle();

            for notice in notices {
                match notice {
                    SessionNotice::Alive { firmware } => {
                        self.ping_outstanding = false;
                        self.missed_pings = 0;
                        if self.state != ConnectionState::Probing {
                            continue;
                        }
                        self.timers.probe = None;
                        self.timers.watchdog = None;
                        self.state = ConnectionState::Connected;
                        match &firmware {
                            Some(info) => info!("{} answered: {}", id, info),
                            None => info!("{} answered as a {} board", id, protocol),
                        }
                        self.emit(BoardEvent::Connected {
                            id,
                            protocol,
                            firmware,
                        })
                        .await;

                        if settle.is_zero() {
                            self.begin_pinging();
                            self.flush().await;
                        } else {
                            self.timers.settle = Some(Box::pin(sleep(settle)));
                        }
                    }
                    SessionNotice::Ready => {
                        info!("{} ready", id);
                        self.emit(BoardEvent::Ready { id }).await;
                    }
                    SessionNotice::DecodeError(err) => {
                        self.emit(BoardEvent::Error {
                            source: format!("device {}", id),
                            message: err.to_string(),
                        })
                        .await;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    async fn on_probe_tick(&mut self) {
        if self.state == ConnectionState::Probing {
            self.send_probe().await;
        }
    }

    async fn on_watchdog(&mut self) {
        self.timers.watchdog = None;
        let Some(active) = &self.active else {
            return;
        };
        let id = active.id;
        info!("{} did not answer; trying next candidate", id);
        self.emit(BoardEvent::ProbeTimedOut { id }).await;
        self.teardown().await;
        self.open_next().await;
    }

    /// Queue the initialization sequence and arm the ping timer
    fn begin_pinging(&mut self) {
        self.timers.settle = None;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.session.initialize();
        self.timers.ping = Some(repeating(active.timing.ping_interval()));
        self.state = ConnectionState::Pinging;
    }

    /// Settle delay elapsed
    async fn initialize(&mut self) {
        self.begin_pinging();
        self.flush().await;
        self.process_notices().await;
    }

    async fn on_ping_tick(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let id = active.id;
        let max_missed = active.timing.max_missed_pings;

        if self.ping_outstanding {
            self.missed_pings += 1;
            if self.missed_pings > max_missed {
                warn!("{} missed {} pings; connection lost", id, self.missed_pings);
                self.state = ConnectionState::Failed;
                self.emit(BoardEvent::ConnectionLost {
                    id,
                    missed_pings: self.missed_pings,
                })
                .await;
                self.teardown().await;
                self.open_next().await;
            }
        } else {
            self.ping_outstanding = true;
            self.send_probe().await;
        }
    }
}

fn spawn_reader(
    mut reader: ReadHalf<BoxedStream>,
    generation: u64,
    io_tx: mpsc::Sender<IoChunk>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Reader {} reached end of stream", generation);
                    break;
                }
                Ok(n) => {
                    let chunk = IoChunk {
                        generation,
                        data: buf[..n].to_vec(),
                    };
                    if io_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    warn!("Read error on connection {}: {}", generation, e);
                    break;
                }
            }
        }
    })
}

/// Run the supervisor until shut down or every handle is dropped
pub async fn run_supervisor(
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
    event_tx: mpsc::Sender<BoardEvent>,
) {
    let mut sup = SupervisorState::new(config, connector, event_tx);
    info!("Supervisor started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    SupervisorCommand::AddCandidate { meta, response } => {
                        let id = sup.add_candidate(meta).await;
                        let _ = response.send(id);
                        if sup.active.is_none() {
                            sup.open_next().await;
                        }
                    }
                    SupervisorCommand::RemoveDevice { id } => sup.remove_device(id).await,
                    SupervisorCommand::WithSession(task) => sup.run_task(task).await,
                    SupervisorCommand::QueryStatus { response } => {
                        let _ = response.send(sup.status());
                    }
                    SupervisorCommand::Shutdown => break,
                }
            }
            Some(chunk) = sup.io_rx.recv() => sup.handle_chunk(chunk).await,
            _ = tick(&mut sup.timers.probe) => sup.on_probe_tick().await,
            _ = expire(&mut sup.timers.watchdog) => sup.on_watchdog().await,
            _ = expire(&mut sup.timers.settle) => sup.initialize().await,
            _ = tick(&mut sup.timers.ping) => sup.on_ping_tick().await,
        }
    }

    sup.teardown().await;
    info!("Supervisor stopped");
}
