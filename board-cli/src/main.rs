//! boardlink: supervise Firmata and telegram boards from the command line
//!
//! Usage:
//!   boardlink ports
//!   boardlink probe --port /dev/ttyACM0 --protocol firmata
//!   boardlink run --port /dev/ttyACM0 --port /dev/ttyUSB0 --watch
//!   boardlink simulate --protocol telegram

mod settings;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use board_detect::{
    probe_port, suggest_protocol_for_port, PortEvent, PortScanner, PortWatcher, ProbeResult,
};
use board_link::{
    spawn_supervisor, BoardEvent, BoardHandle, CandidateMeta, DeviceId, RoutingConnector,
    SensorCheck, VirtualConnector,
};
use board_protocol::{DisplayTarget, Level, Protocol};
use board_sim::{
    run_virtual_board_task, VirtualBoard, VirtualBoardCommand, VirtualFirmataBoard,
    VirtualTelegramBoard,
};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use settings::{ConfiguredBoard, Settings};

const SIM_ID: &str = "sim-0";

/// Time a simulated board gets to finish initialization
const SIM_READY_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "boardlink", version, about)]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/boardlink/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports and how they were classified
    Ports,

    /// Probe one port once and report what answered
    Probe {
        /// Serial port path (e.g. /dev/ttyACM0, COM3)
        #[arg(long)]
        port: String,

        /// firmata or telegram; both are tried when omitted
        #[arg(long)]
        protocol: Option<Protocol>,
    },

    /// Supervise boards and print connection events until interrupted
    Run {
        /// Serial port to queue, may be repeated
        #[arg(long)]
        port: Vec<String>,

        /// Protocol for the ports given with --port
        #[arg(long)]
        protocol: Option<Protocol>,

        /// Queue boards as they are plugged in
        #[arg(long)]
        watch: bool,
    },

    /// Connect to a simulated board and exercise it
    Simulate {
        #[arg(long)]
        protocol: Option<Protocol>,
    },

    /// Write the current settings (or defaults) to the settings file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "boardlink=info,board_protocol=info,board_detect=info,board_link=info,board_sim=info"
                .into()
        }))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings_path = Settings::settings_path(cli.config.as_deref());
    let settings = Settings::load(settings_path.as_deref())?;

    match cli.command {
        Command::Ports => list_ports(),
        Command::Probe { port, protocol } => probe(&port, protocol).await,
        Command::Run {
            port,
            protocol,
            watch,
        } => {
            let protocol = protocol.unwrap_or(settings.default_protocol);
            run(&settings, port, protocol, watch || settings.watch).await
        }
        Command::Simulate { protocol } => {
            simulate(&settings, protocol.unwrap_or(settings.default_protocol)).await
        }
        Command::InitConfig => {
            let path = settings_path.context("Could not determine settings path")?;
            settings.save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// ports / probe
// ---------------------------------------------------------------------------

fn list_ports() -> Result<()> {
    let ports = PortScanner::new()
        .enumerate_ports()
        .context("Failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    for info in &ports {
        let (classification, hint) = info.classify();
        let suggested = suggest_protocol_for_port(info.vid, &info.port)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<32} {:?}{} [{}]",
            info.port,
            info.describe(),
            classification,
            hint.map(|h| format!(" ({})", h)).unwrap_or_default(),
            suggested,
        );
    }
    Ok(())
}

async fn probe(port: &str, protocol: Option<Protocol>) -> Result<()> {
    let protocols = match protocol {
        Some(p) => vec![p],
        None => vec![Protocol::Firmata, Protocol::Telegram],
    };

    for protocol in protocols {
        match probe_port(port, protocol).await {
            Ok(result) => {
                println!("{}", describe_probe(port, &result));
                return Ok(());
            }
            Err(e) => warn!("{}", e),
        }
    }
    bail!("No board answered on {}", port)
}

fn describe_probe(port: &str, result: &ProbeResult) -> String {
    match (&result.firmware, result.firmware_id) {
        (Some(firmware), _) => format!("{}: {} board, firmware {}", port, result.protocol, firmware),
        (None, Some(id)) => format!("{}: {} board, identity {}", port, result.protocol, id),
        (None, None) => format!("{}: {} board", port, result.protocol),
    }
}

// ---------------------------------------------------------------------------
// Event printing
// ---------------------------------------------------------------------------

/// One line per event, or None for traffic
fn describe_event(event: &BoardEvent) -> Option<String> {
    let line = match event {
        BoardEvent::CandidateQueued { id, meta } => {
            format!("[{}] queued {} ({})", id, meta.display_name, meta.protocol)
        }
        BoardEvent::Probing { id, meta } => format!("[{}] probing {}", id, meta.display_name),
        BoardEvent::OpenFailed { id, reason } => format!("[{}] open failed: {}", id, reason),
        BoardEvent::ProbeTimedOut { id } => format!("[{}] no answer", id),
        BoardEvent::Connected {
            id,
            protocol,
            firmware,
        } => match firmware {
            Some(firmware) => format!("[{}] {} Connected: {}", id, protocol, firmware),
            None => format!("[{}] {} Connected", id, protocol),
        },
        BoardEvent::Ready { id } => format!("[{}] ready", id),
        BoardEvent::ConnectionLost { id, missed_pings } => {
            format!("[{}] lost after {} missed pings", id, missed_pings)
        }
        BoardEvent::Disconnected { id } => format!("[{}] Disconnected", id),
        BoardEvent::RemovalIgnored { id } => format!("[{}] removal ignored", id),
        BoardEvent::Error { source, message } => format!("error ({}): {}", source, message),
        BoardEvent::DataIn { .. } | BoardEvent::DataOut { .. } => return None,
    };
    Some(line)
}

/// Print events until the supervisor goes away, flagging readiness
async fn print_events(mut events: mpsc::Receiver<BoardEvent>, ready_tx: watch::Sender<bool>) {
    while let Some(event) = events.recv().await {
        match &event {
            BoardEvent::Ready { .. } => {
                ready_tx.send_replace(true);
            }
            BoardEvent::Disconnected { .. } => {
                ready_tx.send_replace(false);
            }
            _ => {}
        }
        match describe_event(&event) {
            Some(line) => println!("{}", line),
            None => debug!("{:?}", event),
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn configured_candidate(board: &ConfiguredBoard) -> CandidateMeta {
    let name = board.name.clone().unwrap_or_else(|| board.port.clone());
    CandidateMeta::new_real(name, board.port.clone(), board.protocol)
}

async fn run(
    settings: &Settings,
    ports: Vec<String>,
    protocol: Protocol,
    hotplug: bool,
) -> Result<()> {
    let connector = Arc::new(RoutingConnector::new(Arc::new(VirtualConnector::new())));
    let (board, events, supervisor) = spawn_supervisor(settings.supervisor.clone(), connector);
    let (ready_tx, _ready_rx) = watch::channel(false);
    let printer = tokio::spawn(print_events(events, ready_tx));

    let mut queued: HashMap<String, DeviceId> = HashMap::new();
    let from_args = ports
        .into_iter()
        .map(|port| CandidateMeta::new_real(port.clone(), port, protocol));
    for meta in settings.boards.iter().map(configured_candidate).chain(from_args) {
        let Some(port) = meta.port_name.clone() else {
            continue;
        };
        if queued.contains_key(&port) {
            continue;
        }
        let id = board.add_candidate(meta).await?;
        queued.insert(port, id);
    }

    let (port_tx, mut port_rx) = mpsc::channel(32);
    let watcher = hotplug.then(|| PortWatcher::new().spawn(port_tx.clone()));
    if watcher.is_some() {
        info!("Watching for boards; press Ctrl-C to stop");
    } else if queued.is_empty() {
        bail!("Nothing to supervise; pass --port or --watch");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(event) = port_rx.recv() => {
                handle_port_event(&board, &mut queued, event, protocol).await?;
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    board.shutdown().await?;
    supervisor.await.context("Supervisor task failed")?;
    printer.await.context("Event printer failed")?;
    Ok(())
}

async fn handle_port_event(
    board: &BoardHandle,
    queued: &mut HashMap<String, DeviceId>,
    event: PortEvent,
    fallback: Protocol,
) -> Result<()> {
    match event {
        PortEvent::Arrived(info) => {
            if queued.contains_key(&info.port) {
                return Ok(());
            }
            let protocol = suggest_protocol_for_port(info.vid, &info.port).unwrap_or(fallback);
            let id = board
                .add_candidate(CandidateMeta::from_port(&info, protocol))
                .await?;
            queued.insert(info.port, id);
        }
        PortEvent::Departed(port) => {
            if let Some(id) = queued.remove(&port) {
                board.remove_device(id).await?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

fn simulated_board(protocol: Protocol) -> VirtualBoard {
    match protocol {
        Protocol::Firmata => {
            let mut uno = VirtualFirmataBoard::new("Uno");
            uno.set_analog(2, 512);
            uno.set_analog(4, 800);
            uno.set_sensitive_analog(3, 300);
            uno.into()
        }
        Protocol::Telegram => {
            let mut pico = VirtualTelegramBoard::new("Pico");
            pico.set_analog(0, 900);
            pico.set_analog(1, 512);
            pico.set_analog(5, 200);
            pico.set_analog(6, 1023);
            pico.into()
        }
    }
}

async fn simulate(settings: &Settings, protocol: Protocol) -> Result<()> {
    let virtual_boards = Arc::new(VirtualConnector::new());
    let (host_end, board_end) = tokio::io::duplex(4096);
    virtual_boards.register(SIM_ID, host_end);

    let (sim_tx, sim_rx) = mpsc::channel(16);
    let sim = tokio::spawn(run_virtual_board_task(
        board_end,
        simulated_board(protocol),
        sim_rx,
    ));

    let connector = Arc::new(RoutingConnector::new(virtual_boards));
    let (board, events, supervisor) = spawn_supervisor(settings.supervisor.clone(), connector);
    let (ready_tx, mut ready_rx) = watch::channel(false);
    let printer = tokio::spawn(print_events(events, ready_tx));

    board
        .add_candidate(CandidateMeta::new_virtual(
            format!("Simulated {} board", protocol),
            SIM_ID.to_string(),
            protocol,
        ))
        .await?;

    tokio::time::timeout(SIM_READY_TIMEOUT, ready_rx.wait_for(|ready| *ready))
        .await
        .context("Simulated board never became ready")?
        .context("Event stream closed")?;

    let status = board.status().await?;
    println!("Status: {}", status.message());

    let result = match protocol {
        Protocol::Firmata => exercise_firmata(&board).await,
        Protocol::Telegram => exercise_telegram(&board).await,
    };

    board.shutdown().await?;
    supervisor.await.context("Supervisor task failed")?;
    printer.await.context("Event printer failed")?;
    let _ = sim_tx.send(VirtualBoardCommand::Shutdown).await;
    sim.await
        .context("Simulated board task failed")?
        .context("Simulated board stream error")?;
    result
}

async fn exercise_firmata(board: &BoardHandle) -> Result<()> {
    let a = board.read_connector_confirmed("A", false).await?;
    println!("Connector A: {:.0}%", a);

    let kohm = board.read_connector_resistance("B", true).await?;
    println!("Connector B: {:.1} kΩ", kohm);

    board.connect_hw("knob", "C").await?;
    let knob = board.read_input_confirmed("knob").await?;
    println!("knob on C: {:.0}%", knob);

    board.write_connector("B", 25.0).await?;
    board.digital_write(13, Level::High).await?;
    board.rotate_servo(9, 90).await?;
    println!("Wrote 25% to B, pin 13 high, servo on 9 to 90°");

    if let Err(e) = board.analog_write(4, 50.0).await {
        println!("Rejected as expected: {}", e);
    }
    Ok(())
}

async fn exercise_telegram(board: &BoardHandle) -> Result<()> {
    let kohm = board.read_connector_resistance("A", false).await?;
    println!("Connector A: {:.1} kΩ", kohm);

    for name in ["dial", "light"] {
        match board.sensor(name).await? {
            Some(value) => println!("{}: {:.1}%", name, value),
            None => println!("{}: no reading yet", name),
        }
    }

    let pressed = board.sensor_connected(SensorCheck::ButtonPressed).await?;
    let plugged = board
        .sensor_connected(SensorCheck::Connected("A".to_string()))
        .await?;
    println!("Button pressed: {}, A connected: {}", pressed, plugged);

    board.show_number(DisplayTarget::Both, 42).await?;
    println!("Showing 42");
    board.clear_displays().await?;
    Ok(())
}
