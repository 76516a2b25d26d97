//! Virtual board actor task
//!
//! Owns a virtual board and talks to the host over an async stream. The
//! task uses a select! loop to:
//! - Read host bytes from the stream and answer them
//! - Report analog samples on the Firmata sampling interval
//! - Handle control commands (sensor values, going silent, shutdown)

use std::io;
use std::time::Duration;

use board_protocol::{Level, Protocol};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{VirtualFirmataBoard, VirtualTelegramBoard};

/// StandardFirmata's default sampling interval
pub const SAMPLING_INTERVAL_MS: u64 = 19;

/// Either kind of simulated board
#[derive(Debug)]
pub enum VirtualBoard {
    Firmata(VirtualFirmataBoard),
    Telegram(VirtualTelegramBoard),
}

impl VirtualBoard {
    pub fn id(&self) -> &str {
        match self {
            VirtualBoard::Firmata(board) => board.id(),
            VirtualBoard::Telegram(board) => board.id(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            VirtualBoard::Firmata(_) => Protocol::Firmata,
            VirtualBoard::Telegram(_) => Protocol::Telegram,
        }
    }

    pub fn process_bytes(&mut self, data: &[u8]) {
        match self {
            VirtualBoard::Firmata(board) => board.process_bytes(data),
            VirtualBoard::Telegram(board) => board.process_bytes(data),
        }
    }

    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        match self {
            VirtualBoard::Firmata(board) => board.take_output(),
            VirtualBoard::Telegram(board) => board.take_output(),
        }
    }

    pub fn set_analog(&mut self, channel: u8, value: u16) {
        match self {
            VirtualBoard::Firmata(board) => board.set_analog(channel, value),
            VirtualBoard::Telegram(board) => board.set_analog(channel, value),
        }
    }

    pub fn set_sensitive_analog(&mut self, channel: u8, value: u16) {
        match self {
            VirtualBoard::Firmata(board) => board.set_sensitive_analog(channel, value),
            VirtualBoard::Telegram(board) => board.set_sensitive_analog(channel, value),
        }
    }

    fn sampling_tick(&mut self) {
        if let VirtualBoard::Firmata(board) = self {
            board.sampling_tick();
        }
    }
}

impl From<VirtualFirmataBoard> for VirtualBoard {
    fn from(board: VirtualFirmataBoard) -> Self {
        VirtualBoard::Firmata(board)
    }
}

impl From<VirtualTelegramBoard> for VirtualBoard {
    fn from(board: VirtualTelegramBoard) -> Self {
        VirtualBoard::Telegram(board)
    }
}

/// Commands that can be sent to a virtual board task
#[derive(Debug, Clone)]
pub enum VirtualBoardCommand {
    /// Set a channel's normal-range reading
    SetAnalog { channel: u8, value: u16 },
    /// Set a channel's sensitive-range reading
    SetSensitiveAnalog { channel: u8, value: u16 },
    /// Drive a digital input (Firmata boards)
    SetDigital { pin: u8, level: Level },
    /// Stop answering the host while keeping the stream open
    SetSilent(bool),
    /// Shutdown the virtual board task
    Shutdown,
}

async fn flush_output<S>(stream: &mut S, board: &mut VirtualBoard) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    while let Some(bytes) = board.take_output() {
        stream.write_all(&bytes).await?;
    }
    stream.flush().await
}

/// Run a virtual board until shut down or the stream closes
pub async fn run_virtual_board_task<S>(
    mut stream: S,
    mut board: VirtualBoard,
    mut cmd_rx: mpsc::Receiver<VirtualBoardCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut silent = false;
    let mut sampler = interval(Duration::from_millis(SAMPLING_INTERVAL_MS));
    sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let sampling = board.protocol() == Protocol::Firmata;

    info!(
        "Starting virtual board task for {} ({})",
        board.id(),
        board.protocol()
    );

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual board stream closed for {}", board.id());
                        break;
                    }
                    Ok(n) => {
                        if silent {
                            continue;
                        }
                        board.process_bytes(&buf[..n]);
                        flush_output(&mut stream, &mut board).await?;
                    }
                    Err(e) => {
                        warn!("Virtual board {} stream error: {}", board.id(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualBoardCommand::SetAnalog { channel, value }) => {
                        board.set_analog(channel, value);
                    }
                    Some(VirtualBoardCommand::SetSensitiveAnalog { channel, value }) => {
                        board.set_sensitive_analog(channel, value);
                    }
                    Some(VirtualBoardCommand::SetDigital { pin, level }) => {
                        if let VirtualBoard::Firmata(b) = &mut board {
                            b.set_digital_input(pin, level);
                        }
                        if !silent {
                            flush_output(&mut stream, &mut board).await?;
                        }
                    }
                    Some(VirtualBoardCommand::SetSilent(quiet)) => {
                        info!("Virtual board {} silent: {}", board.id(), quiet);
                        silent = quiet;
                    }
                    Some(VirtualBoardCommand::Shutdown) => {
                        info!("Shutdown requested for virtual board {}", board.id());
                        break;
                    }
                    None => {
                        debug!("Command channel closed for virtual board {}", board.id());
                        break;
                    }
                }
            }

            _ = sampler.tick(), if sampling && !silent => {
                board.sampling_tick();
                flush_output(&mut stream, &mut board).await?;
            }
        }
    }

    info!("Virtual board task ended for {}", board.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_protocol::{FirmataCodec, FirmataMessage, ProtocolCodec, Telegram};

    #[tokio::test]
    async fn test_firmata_task_answers_and_samples() {
        let (mut host, board_end) = tokio::io::duplex(1024);
        let mut board = VirtualFirmataBoard::new("Uno");
        board.set_analog(1, 300);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_virtual_board_task(board_end, board.into(), cmd_rx));

        host.write_all(&[0xF0, 0x79, 0xF7, 0xC1, 0x01]).await.unwrap();

        let mut codec = FirmataCodec::new();
        let mut seen_firmware = false;
        let mut samples = 0;
        let mut buf = [0u8; 256];
        while samples < 2 {
            let n = host.read(&mut buf).await.unwrap();
            codec.push_bytes(&buf[..n]);
            while let Some(msg) = codec.next_message() {
                match msg.unwrap() {
                    FirmataMessage::Firmware(_) => seen_firmware = true,
                    FirmataMessage::AnalogSample { channel: 1, value } => {
                        assert_eq!(value, 300);
                        samples += 1;
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        assert!(seen_firmware);

        cmd_tx.send(VirtualBoardCommand::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_telegram_task_answers_ping() {
        let (mut host, board_end) = tokio::io::duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let board = VirtualTelegramBoard::new("Pico");
        tokio::spawn(run_virtual_board_task(board_end, board.into(), cmd_rx));

        host.write_all(&[0x02]).await.unwrap();
        let mut frame = [0u8; 16];
        host.read_exact(&mut frame).await.unwrap();
        assert!(Telegram::decode(&frame).unwrap().is_valid_device());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_board_ignores_host() {
        let (mut host, board_end) = tokio::io::duplex(1024);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let board = VirtualTelegramBoard::new("Pico");
        tokio::spawn(run_virtual_board_task(board_end, board.into(), cmd_rx));

        cmd_tx.send(VirtualBoardCommand::SetSilent(true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        host.write_all(&[0x02]).await.unwrap();

        let mut frame = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_millis(500), host.read_exact(&mut frame)).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn test_stream_close_ends_task() {
        let (host, board_end) = tokio::io::duplex(64);
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_virtual_board_task(
            board_end,
            VirtualFirmataBoard::new("Uno").into(),
            cmd_rx,
        ));
        drop(host);
        assert!(task.await.unwrap().is_ok());
    }
}
