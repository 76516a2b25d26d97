//! Integration tests for the board link
//!
//! These tests run the supervisor against simulated boards over in-memory
//! streams and verify:
//! - Probing, connection and initialization for both board families
//! - Confirmed reads through the range switch
//! - Candidate rotation when boards stay silent
//! - Connection loss and device removal
//! - Decoder chunking invariance

use std::sync::Arc;
use std::time::Duration;

use board_link::{
    spawn_supervisor, BoardEvent, BoardHandle, CandidateMeta, ConnectionState, DeviceId,
    LinkError, SensorCheck, SupervisorConfig, VirtualConnector,
};
use board_protocol::{DisplayTarget, Level, PinMode, Protocol};
use board_sim::{
    run_virtual_board_task, VirtualBoard, VirtualBoardCommand, VirtualFirmataBoard,
    VirtualTelegramBoard,
};
use tokio::sync::mpsc;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Supervisor wired to a virtual connector, with lifecycle events
    /// forwarded to an unbounded queue so traffic never backs up
    pub struct Rig {
        pub board: BoardHandle,
        pub connector: Arc<VirtualConnector>,
        pub events: mpsc::UnboundedReceiver<BoardEvent>,
    }

    pub fn rig() -> Rig {
        let connector = Arc::new(VirtualConnector::new());
        let (board, mut raw_events, _task) =
            spawn_supervisor(SupervisorConfig::default(), connector.clone());
        let (tx, events) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = raw_events.recv().await {
                if !event.is_traffic() && tx.send(event).is_err() {
                    break;
                }
            }
        });
        Rig {
            board,
            connector,
            events,
        }
    }

    /// Register a simulated board and start its task
    pub fn attach(
        connector: &VirtualConnector,
        sim_id: &str,
        board: impl Into<VirtualBoard>,
    ) -> mpsc::Sender<VirtualBoardCommand> {
        let (ours, theirs) = tokio::io::duplex(4096);
        connector.register(sim_id, ours);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        tokio::spawn(run_virtual_board_task(theirs, board.into(), cmd_rx));
        cmd_tx
    }

    /// Register a stream nobody answers on
    pub fn attach_dead(connector: &VirtualConnector, sim_id: &str) -> tokio::io::DuplexStream {
        let (ours, theirs) = tokio::io::duplex(4096);
        connector.register(sim_id, ours);
        theirs
    }

    pub fn candidate(sim_id: &str, protocol: Protocol) -> CandidateMeta {
        CandidateMeta::new_virtual(sim_id.to_string(), sim_id.to_string(), protocol)
    }

    /// Wait for the first event matching `pred`, collecting the ones before it
    pub async fn wait_for<F>(
        events: &mut mpsc::UnboundedReceiver<BoardEvent>,
        mut pred: F,
    ) -> (BoardEvent, Vec<BoardEvent>)
    where
        F: FnMut(&BoardEvent) -> bool,
    {
        let mut skipped = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event stream closed");
            if pred(&event) {
                return (event, skipped);
            }
            skipped.push(event);
        }
    }

    pub async fn wait_ready(events: &mut mpsc::UnboundedReceiver<BoardEvent>) -> DeviceId {
        match wait_for(events, |e| matches!(e, BoardEvent::Ready { .. })).await.0 {
            BoardEvent::Ready { id } => id,
            _ => unreachable!(),
        }
    }
}

use helpers::*;

// ============================================================================
// Firmata Boards
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_firmata_board_connects_and_initializes() {
    let mut rig = rig();
    attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));
    let id = rig
        .board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();

    let (connected, _) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Connected { .. })
    })
    .await;
    match connected {
        BoardEvent::Connected {
            id: connected_id,
            protocol,
            firmware,
        } => {
            assert_eq!(connected_id, id);
            assert_eq!(protocol, Protocol::Firmata);
            assert_eq!(firmware.unwrap().name, "StandardFirmata.ino");
        }
        _ => unreachable!(),
    }

    assert_eq!(wait_ready(&mut rig.events).await, id);

    let status = rig.board.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Pinging);
    assert_eq!(status.device, Some(id));
    assert!(status.ready);
    assert_eq!(status.message(), "Firmata Connected");

    assert!(rig.board.has_capability(9, PinMode::Pwm).await.unwrap());
    assert!(!rig.board.has_capability(4, PinMode::Pwm).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_firmata_confirmed_reads() {
    let mut rig = rig();
    let mut uno = VirtualFirmataBoard::new("Uno");
    uno.set_analog(2, 512);
    uno.set_analog(3, 100);
    uno.set_sensitive_analog(3, 512);
    attach(&rig.connector, "uno", uno);
    rig.board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    let percent = rig.board.analog_read_confirmed(2, false).await.unwrap();
    assert_eq!(percent, 50.0);

    // Pin 3 high selects the 1010 kΩ divider
    let kohm = rig.board.read_resistance(3, true).await.unwrap();
    assert!((kohm - 1010.0 * 512.0 / 511.0).abs() < 1e-6);

    // Cached value now reflects the sensitive range
    let cached = rig.board.analog_read(3, true).await.unwrap();
    assert_eq!(cached, Some(50.0));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_resolve_with_same_sample() {
    let mut rig = rig();
    let mut uno = VirtualFirmataBoard::new("Uno");
    uno.set_analog(4, 1023);
    attach(&rig.connector, "uno", uno);
    rig.board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    let (a, b) = tokio::join!(
        rig.board.analog_read_confirmed(4, false),
        rig.board.analog_read_confirmed(4, false)
    );
    assert_eq!(a.unwrap(), 100.0);
    assert_eq!(b.unwrap(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_firmata_capability_errors() {
    let mut rig = rig();
    attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));
    rig.board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    let err = rig.board.analog_write(4, 50.0).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "pin 4 does not support PWM; valid PWM pins are 3, 5, 6, 9, 10, 11"
    );
    assert!(matches!(
        rig.board.analog_read_confirmed(9, false).await,
        Err(LinkError::InvalidChannel { channel: 9, .. })
    ));
    assert!(matches!(
        rig.board.show_number(DisplayTarget::First, 1).await,
        Err(LinkError::WrongProtocol(Protocol::Firmata))
    ));

    rig.board.digital_write(13, Level::High).await.unwrap();
    rig.board.analog_write(9, 150.0).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_named_hardware_on_firmata() {
    let mut rig = rig();
    let mut uno = VirtualFirmataBoard::new("Uno");
    uno.set_analog(3, 1023);
    attach(&rig.connector, "uno", uno);
    rig.board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    // Connector B is analog channel 3, digital pin 17
    rig.board.connect_hw("knob", "B").await.unwrap();
    let value = rig.board.read_input_confirmed("knob").await.unwrap();
    assert_eq!(value, 100.0);

    assert!(matches!(
        rig.board.set_led("missing", 10.0).await,
        Err(LinkError::UnknownHardware(_))
    ));
}

// ============================================================================
// Candidate Rotation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_candidates_are_probed_once_each() {
    let mut rig = rig();
    let _dead_a = attach_dead(&rig.connector, "dead-a");
    let _dead_b = attach_dead(&rig.connector, "dead-b");
    attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));

    let a = rig
        .board
        .add_candidate(candidate("dead-a", Protocol::Firmata))
        .await
        .unwrap();
    let b = rig
        .board
        .add_candidate(candidate("dead-b", Protocol::Firmata))
        .await
        .unwrap();
    let live = rig
        .board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();

    let (_, before) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Connected { id, .. } if *id == live)
    })
    .await;

    let probed = |target: DeviceId| {
        before
            .iter()
            .filter(|e| matches!(e, BoardEvent::Probing { id, .. } if *id == target))
            .count()
    };
    let timed_out = |target: DeviceId| {
        before
            .iter()
            .filter(|e| matches!(e, BoardEvent::ProbeTimedOut { id } if *id == target))
            .count()
    };
    assert_eq!((probed(a), timed_out(a)), (1, 1));
    assert_eq!((probed(b), timed_out(b)), (1, 1));
    assert_eq!(probed(live), 1);
    assert!(!before
        .iter()
        .any(|e| matches!(e, BoardEvent::Disconnected { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unopenable_candidate_is_skipped() {
    let mut rig = rig();
    attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));
    let missing = rig
        .board
        .add_candidate(candidate("nowhere", Protocol::Firmata))
        .await
        .unwrap();
    let live = rig
        .board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();

    let (_, before) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Connected { id, .. } if *id == live)
    })
    .await;
    assert!(before
        .iter()
        .any(|e| matches!(e, BoardEvent::OpenFailed { id, .. } if *id == missing)));
}

// ============================================================================
// Connection Loss and Removal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_loss_fails_pending_reads() {
    let mut rig = rig();
    let sim = attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));
    let id = rig
        .board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    sim.send(VirtualBoardCommand::SetSilent(true)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let read = rig.board.analog_read_confirmed(2, false).await;
    assert_eq!(read, Err(LinkError::ConnectionLost));

    let (lost, _) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::ConnectionLost { .. })
    })
    .await;
    match lost {
        BoardEvent::ConnectionLost {
            id: lost_id,
            missed_pings,
        } => {
            assert_eq!(lost_id, id);
            assert_eq!(missed_pings, 7);
        }
        _ => unreachable!(),
    }
    wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Disconnected { id: gone } if *gone == id)
    })
    .await;

    assert_eq!(
        rig.board.digital_write(13, Level::High).await,
        Err(LinkError::NotConnected)
    );
    let status = rig.board.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_firmata_removal_is_ignored() {
    let mut rig = rig();
    attach(&rig.connector, "uno", VirtualFirmataBoard::new("Uno"));
    let id = rig
        .board
        .add_candidate(candidate("uno", Protocol::Firmata))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    rig.board.remove_device(id).await.unwrap();
    wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::RemovalIgnored { .. })
    })
    .await;
    assert!(rig.board.status().await.unwrap().state.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_telegram_removal_disconnects() {
    let mut rig = rig();
    attach(&rig.connector, "pico", VirtualTelegramBoard::new("Pico"));
    let id = rig
        .board
        .add_candidate(candidate("pico", Protocol::Telegram))
        .await
        .unwrap();
    wait_ready(&mut rig.events).await;

    rig.board.remove_device(id).await.unwrap();
    wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Disconnected { id: gone } if *gone == id)
    })
    .await;
    assert_eq!(
        rig.board.status().await.unwrap().state,
        ConnectionState::Idle
    );
}

// ============================================================================
// Telegram Boards
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_telegram_board_reads_and_displays() {
    let mut rig = rig();
    let mut pico = VirtualTelegramBoard::new("Pico");
    pico.set_analog(1, 512);
    pico.set_analog(5, 100);
    pico.set_sensitive_analog(5, 512);
    pico.set_analog(6, 1023);
    attach(&rig.connector, "pico", pico);
    rig.board
        .add_candidate(candidate("pico", Protocol::Telegram))
        .await
        .unwrap();

    let (connected, _) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::Connected { .. })
    })
    .await;
    assert!(matches!(
        connected,
        BoardEvent::Connected {
            protocol: Protocol::Telegram,
            firmware: None,
            ..
        }
    ));
    wait_ready(&mut rig.events).await;

    // Connector A is channel 5
    let kohm = rig.board.read_connector_resistance("A", true).await.unwrap();
    assert!((kohm - 1010.0 * 512.0 / 511.0).abs() < 1e-6);

    let dial = rig.board.sensor("dial").await.unwrap().unwrap();
    assert!((dial - 50.048).abs() < 0.001);
    assert!(!rig
        .board
        .sensor_connected(SensorCheck::ButtonPressed)
        .await
        .unwrap());

    rig.board.show_number(DisplayTarget::Both, 42).await.unwrap();
    rig.board.clear_displays().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_telegram_with_wrong_identity_times_out() {
    let mut rig = rig();
    attach(
        &rig.connector,
        "other",
        VirtualTelegramBoard::new("Other").with_firmware_id(3),
    );
    rig.board
        .add_candidate(candidate("other", Protocol::Telegram))
        .await
        .unwrap();

    let (_, before) = wait_for(&mut rig.events, |e| {
        matches!(e, BoardEvent::ProbeTimedOut { .. })
    })
    .await;
    assert!(!before
        .iter()
        .any(|e| matches!(e, BoardEvent::Connected { .. })));
    assert_eq!(
        rig.board.status().await.unwrap().state,
        ConnectionState::Idle
    );
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptest_tests {
    use board_link::{BoardConfig, Session};
    use board_protocol::{EncodeCommand, FirmataMessage};
    use board_sim::{uno_analog_map, uno_capabilities};
    use proptest::prelude::*;

    fn firmata_stream(samples: &[(u8, u16)]) -> Vec<u8> {
        let mut bytes = FirmataMessage::Capabilities(uno_capabilities()).encode();
        bytes.extend(FirmataMessage::AnalogMapping(uno_analog_map()).encode());
        for &(channel, value) in samples {
            bytes.extend(FirmataMessage::AnalogSample { channel, value }.encode());
        }
        bytes
    }

    fn feed(bytes: &[u8], cuts: &[usize]) -> Session {
        let mut session = Session::new(board_protocol::Protocol::Firmata, BoardConfig::default());
        session.initialize();
        let mut start = 0;
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
        points.sort_unstable();
        for point in points {
            session.push_bytes(&bytes[start..point.max(start)]);
            start = point.max(start);
        }
        session.push_bytes(&bytes[start..]);
        session
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_decoded_state(
            samples in prop::collection::vec((0u8..6, 0u16..1024), 0..20),
            cuts in prop::collection::vec(any::<usize>(), 0..12),
        ) {
            let bytes = firmata_stream(&samples);
            let whole = feed(&bytes, &[]);
            let chunked = feed(&bytes, &cuts);

            prop_assert!(chunked.is_ready());
            prop_assert_eq!(whole.model().samples.clone(), chunked.model().samples.clone());
            prop_assert_eq!(
                whole.model().analog_channels(),
                chunked.model().analog_channels()
            );
        }
    }
}
