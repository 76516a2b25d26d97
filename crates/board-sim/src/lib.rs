//! Board Simulation Library
//!
//! This crate provides simulated microcontroller boards for testing the link
//! layer without physical hardware. It includes:
//!
//! - **VirtualFirmataBoard**: an Uno running StandardFirmata
//! - **VirtualTelegramBoard**: a sensor board answering pings with telegrams
//! - **run_virtual_board_task**: drives either board over an async stream
//!
//! # Example
//!
//! ```rust
//! use board_sim::VirtualTelegramBoard;
//!
//! let mut board = VirtualTelegramBoard::new("Pico");
//! board.set_analog(1, 512);
//!
//! // Ping the board and collect its telegram
//! board.process_bytes(&[0x02]);
//! while let Some(bytes) = board.take_output() {
//!     println!("Board output: {:02X?}", bytes);
//! }
//! ```

pub mod board_task;
pub mod firmata_board;
pub mod telegram_board;

pub use board_task::{run_virtual_board_task, VirtualBoard, VirtualBoardCommand};
pub use firmata_board::{uno_analog_map, uno_capabilities, VirtualFirmataBoard, VirtualFirmataConfig};
pub use telegram_board::{Displays, VirtualTelegramBoard};
