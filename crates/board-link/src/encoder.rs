//! Validated Firmata write builders
//!
//! Every builder checks the capability table before producing anything, so a
//! rejected write never reaches the wire. Writes always re-assert the pin
//! mode first. Digital writes go through a per-port output shadow so that
//! setting one pin leaves its siblings alone.

use board_protocol::firmata::{clamp_servo_angle, percent_to_pwm, PORT_COUNT};
use board_protocol::{CapabilityTable, FirmataCommand, Level, PinMode};
use tracing::warn;

use crate::config::ShiftRegisterConfig;
use crate::error::LinkError;

/// Segment patterns for the first display, digits 0..9
pub const FIRST_DISPLAY_DIGITS: [u8; 10] =
    [0x77, 0x14, 0xB3, 0xB6, 0xD4, 0xE6, 0xE7, 0x34, 0xF7, 0xF6];

/// Segment patterns for the second display, digits 0..9
pub const SECOND_DISPLAY_DIGITS: [u8; 10] =
    [0x77, 0x41, 0x3B, 0x6B, 0x4D, 0x6E, 0x7E, 0x43, 0x7F, 0x6F];

/// Which of the two chained displays a digit goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDisplay {
    First,
    Second,
}

/// Check a capability, logging the rejection
pub fn require_capability(
    caps: &CapabilityTable,
    pin: u8,
    mode: PinMode,
) -> Result<(), LinkError> {
    if caps.has_capability(pin, mode) {
        return Ok(());
    }
    let valid_pins = caps.pins_for(mode);
    warn!(
        "Rejected {} write to pin {}: valid {} pins are {:?}",
        mode, pin, mode, valid_pins
    );
    Err(LinkError::Capability {
        pin,
        mode,
        valid_pins,
    })
}

/// Builds Firmata writes and tracks the output port shadow
#[derive(Debug, Clone, Default)]
pub struct CommandEncoder {
    shadow: [u8; PORT_COUNT],
    /// Pins written at least once on this connection
    driven: u128,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output shadow byte of a port
    pub fn port_shadow(&self, port: u8) -> u8 {
        self.shadow.get(port as usize).copied().unwrap_or(0)
    }

    /// Whether `pin` was driven to `level` earlier on this connection
    pub fn holds_level(&self, pin: u8, level: Level) -> bool {
        if pin >= 128 || self.driven & (1u128 << pin) == 0 {
            return false;
        }
        let bit = (self.port_shadow((pin >> 3) & 0x0F) >> (pin & 0x07)) & 0x01;
        (bit == 1) == level.is_high()
    }

    /// Set one output pin, keeping the rest of its port as it was
    pub fn digital_write(
        &mut self,
        caps: &CapabilityTable,
        pin: u8,
        level: Level,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, pin, PinMode::Output)?;
        Ok(self.digital_write_unchecked(pin, level))
    }

    fn digital_write_unchecked(&mut self, pin: u8, level: Level) -> Vec<FirmataCommand> {
        let port = (pin >> 3) & 0x0F;
        let mask = 1u8 << (pin & 0x07);
        let slot = &mut self.shadow[port as usize];
        if level.is_high() {
            *slot |= mask;
        } else {
            *slot &= !mask;
        }
        if pin < 128 {
            self.driven |= 1u128 << pin;
        }

        vec![
            FirmataCommand::SetPinMode {
                pin,
                mode: PinMode::Output,
            },
            FirmataCommand::DigitalPortWrite {
                port,
                value: *slot,
            },
        ]
    }

    /// PWM duty as a percentage (clamped to 0..100)
    pub fn analog_write(
        &self,
        caps: &CapabilityTable,
        pin: u8,
        percent: f64,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, pin, PinMode::Pwm)?;
        Ok(vec![
            FirmataCommand::SetPinMode {
                pin,
                mode: PinMode::Pwm,
            },
            FirmataCommand::analog(pin, percent_to_pwm(percent)),
        ])
    }

    /// Servo angle in degrees (clamped to 0..180)
    pub fn rotate_servo(
        &self,
        caps: &CapabilityTable,
        pin: u8,
        degrees: i32,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, pin, PinMode::Servo)?;
        Ok(vec![
            FirmataCommand::SetPinMode {
                pin,
                mode: PinMode::Servo,
            },
            FirmataCommand::analog(pin, clamp_servo_angle(degrees)),
        ])
    }

    /// Switch a pin to digital input
    pub fn digital_input(
        &self,
        caps: &CapabilityTable,
        pin: u8,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, pin, PinMode::Input)?;
        Ok(vec![FirmataCommand::SetPinMode {
            pin,
            mode: PinMode::Input,
        }])
    }

    /// Switch a pin to analog input
    pub fn analog_input(
        &self,
        caps: &CapabilityTable,
        pin: u8,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, pin, PinMode::Analog)?;
        Ok(vec![FirmataCommand::SetPinMode {
            pin,
            mode: PinMode::Analog,
        }])
    }

    /// Clock 16 bits out, least significant first
    pub fn shift_out(
        &mut self,
        caps: &CapabilityTable,
        data_pin: u8,
        clock_pin: u8,
        value: u16,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        require_capability(caps, data_pin, PinMode::Output)?;
        require_capability(caps, clock_pin, PinMode::Output)?;
        Ok(self.shift_out_unchecked(data_pin, clock_pin, value))
    }

    fn shift_out_unchecked(&mut self, data_pin: u8, clock_pin: u8, value: u16) -> Vec<FirmataCommand> {
        let mut out = Vec::with_capacity(16 * 6);
        for bit in 0..16 {
            let level = Level::from(value & (1 << bit) != 0);
            out.extend(self.digital_write_unchecked(clock_pin, Level::Low));
            out.extend(self.digital_write_unchecked(data_pin, level));
            out.extend(self.digital_write_unchecked(clock_pin, Level::High));
        }
        out
    }

    /// Shift a raw 16-bit value into the registers and latch it
    pub fn serial_out(
        &mut self,
        caps: &CapabilityTable,
        pins: &ShiftRegisterConfig,
        value: u16,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        for pin in [pins.latch_pin, pins.data_pin, pins.clock_pin] {
            require_capability(caps, pin, PinMode::Output)?;
        }
        let mut out = self.digital_write_unchecked(pins.latch_pin, Level::Low);
        out.extend(self.shift_out_unchecked(pins.data_pin, pins.clock_pin, value));
        out.extend(self.digital_write_unchecked(pins.latch_pin, Level::High));
        Ok(out)
    }

    /// Show a digit on one of the seven-segment displays
    pub fn segment_display(
        &mut self,
        caps: &CapabilityTable,
        pins: &ShiftRegisterConfig,
        display: SegmentDisplay,
        digit: u8,
    ) -> Result<Vec<FirmataCommand>, LinkError> {
        let value = match display {
            SegmentDisplay::First => FIRST_DISPLAY_DIGITS
                .get(digit as usize)
                .map(|seg| (*seg as u16) << 8),
            SegmentDisplay::Second => SECOND_DISPLAY_DIGITS
                .get(digit as usize)
                .map(|seg| *seg as u16),
        };
        let value = value.ok_or_else(|| {
            LinkError::InvalidArgument(format!("segment digit {} (expected 0..9)", digit))
        })?;
        self.serial_out(caps, pins, value)
    }

    /// Forget the shadow (new connection)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_protocol::EncodeCommand;

    fn uno_caps() -> CapabilityTable {
        let mut caps = CapabilityTable::new();
        for pin in 2..20 {
            caps.record(pin, PinMode::Input);
            caps.record(pin, PinMode::Output);
        }
        for pin in [3, 5, 6, 9, 10, 11] {
            caps.record(pin, PinMode::Pwm);
            caps.record(pin, PinMode::Servo);
        }
        for pin in 14..20 {
            caps.record(pin, PinMode::Analog);
        }
        caps
    }

    fn wire(cmds: &[FirmataCommand]) -> Vec<u8> {
        cmds.iter().flat_map(|c| c.encode()).collect()
    }

    #[test]
    fn test_digital_write_bytes() {
        let mut enc = CommandEncoder::new();
        let cmds = enc.digital_write(&uno_caps(), 13, Level::High).unwrap();
        assert_eq!(wire(&cmds), vec![0xF4, 13, 0x01, 0x91, 0x20, 0x00]);
    }

    #[test]
    fn test_high_then_low_clears_only_that_bit() {
        let caps = uno_caps();
        let mut enc = CommandEncoder::new();
        enc.digital_write(&caps, 9, Level::High).unwrap();
        enc.digital_write(&caps, 11, Level::High).unwrap();
        enc.digital_write(&caps, 10, Level::High).unwrap();
        enc.digital_write(&caps, 10, Level::Low).unwrap();

        assert_eq!(enc.port_shadow(1), 0b0000_1010);
    }

    #[test]
    fn test_pin_seven_sets_high_byte() {
        let mut caps = CapabilityTable::new();
        caps.record(7, PinMode::Output);
        let mut enc = CommandEncoder::new();
        let cmds = enc.digital_write(&caps, 7, Level::High).unwrap();
        assert_eq!(wire(&cmds[1..]), vec![0x90, 0x00, 0x01]);
    }

    #[test]
    fn test_rejected_write_leaves_shadow_alone() {
        let mut enc = CommandEncoder::new();
        let err = enc.digital_write(&uno_caps(), 0, Level::High).unwrap_err();
        assert!(matches!(err, LinkError::Capability { pin: 0, .. }));
        assert_eq!(enc.port_shadow(0), 0);
        assert!(!enc.holds_level(0, Level::High));
    }

    #[test]
    fn test_analog_write_clamps() {
        let enc = CommandEncoder::new();
        let caps = uno_caps();
        let low = enc.analog_write(&caps, 3, -5.0).unwrap();
        let high = enc.analog_write(&caps, 3, 150.0).unwrap();
        assert_eq!(low[1], FirmataCommand::AnalogWrite { pin: 3, value: 0 });
        assert_eq!(high[1], FirmataCommand::AnalogWrite { pin: 3, value: 255 });
        assert_eq!(wire(&high), vec![0xF4, 3, 0x03, 0xE3, 0x7F, 0x01]);
    }

    #[test]
    fn test_analog_write_requires_pwm() {
        let enc = CommandEncoder::new();
        let err = enc.analog_write(&uno_caps(), 4, 50.0).unwrap_err();
        assert_eq!(
            err,
            LinkError::Capability {
                pin: 4,
                mode: PinMode::Pwm,
                valid_pins: vec![3, 5, 6, 9, 10, 11],
            }
        );
    }

    #[test]
    fn test_servo_clamps_degrees() {
        let enc = CommandEncoder::new();
        let cmds = enc.rotate_servo(&uno_caps(), 9, 270).unwrap();
        assert_eq!(
            cmds,
            vec![
                FirmataCommand::SetPinMode {
                    pin: 9,
                    mode: PinMode::Servo
                },
                FirmataCommand::AnalogWrite { pin: 9, value: 180 },
            ]
        );
    }

    #[test]
    fn test_holds_level_tracks_writes() {
        let caps = uno_caps();
        let mut enc = CommandEncoder::new();
        assert!(!enc.holds_level(5, Level::Low));
        enc.digital_write(&caps, 5, Level::Low).unwrap();
        assert!(enc.holds_level(5, Level::Low));
        assert!(!enc.holds_level(5, Level::High));
    }

    #[test]
    fn test_shift_out_is_lsb_first() {
        let caps = uno_caps();
        let mut enc = CommandEncoder::new();
        let cmds = enc.shift_out(&caps, 10, 12, 0x0001).unwrap();
        assert_eq!(cmds.len(), 16 * 6);

        // First bit: clock low, data high, clock high
        assert_eq!(
            cmds[3],
            FirmataCommand::DigitalPortWrite {
                port: 1,
                value: 0b0000_0100
            }
        );
        // Last bit leaves data low, clock high
        assert_eq!(enc.port_shadow(1), 0b0001_0000);
    }

    #[test]
    fn test_segment_display_latches_around_shift() {
        let caps = uno_caps();
        let mut enc = CommandEncoder::new();
        let pins = ShiftRegisterConfig::default();
        let cmds = enc
            .segment_display(&caps, &pins, SegmentDisplay::Second, 1)
            .unwrap();

        assert_eq!(cmds.len(), 2 + 16 * 6 + 2);
        assert_eq!(
            cmds.first(),
            Some(&FirmataCommand::SetPinMode {
                pin: 11,
                mode: PinMode::Output
            })
        );
        assert!(enc.holds_level(11, Level::High));
    }

    #[test]
    fn test_segment_display_rejects_digit() {
        let mut enc = CommandEncoder::new();
        let pins = ShiftRegisterConfig::default();
        assert!(matches!(
            enc.segment_display(&uno_caps(), &pins, SegmentDisplay::First, 10),
            Err(LinkError::InvalidArgument(_))
        ));
    }
}
