//! Zilog Z80 CTC counter/timer emulator.
//!
//! Four down-counter channels behind a two-bit channel select (`CS0`/`CS1`).
//! Each channel runs in one of two modes:
//!
//! - **timer**: the system clock is divided by a 16 or 256 prescaler, then
//!   by the 8-bit time constant (a constant of 0 counts as 256);
//! - **counter**: the channel decrements on edges of its `CLKTRG` input.
//!
//! When a channel counts down to zero it reloads from its time constant,
//! pulses its `ZC/TO` output (channels 0-2 only — channel 3 has no output
//! pin), and raises an interrupt if enabled. Chaining one channel's
//! `ZC/TO` into another's `CLKTRG` builds the long divider cascades home
//! computers use for their system clocks.
//!
//! The control word:
//!
//! | Bit | Meaning                                  |
//! |-----|------------------------------------------|
//! | 7   | interrupt enable                         |
//! | 6   | mode: 0 timer, 1 counter                 |
//! | 5   | prescaler: 0 = /16, 1 = /256             |
//! | 4   | trigger edge: 0 falling, 1 rising        |
//! | 3   | timer start: 1 = wait for CLKTRG trigger |
//! | 2   | time constant follows                    |
//! | 1   | software reset                           |
//! | 0   | 1 = control word (0 = vector, ch 0 only) |
//!
//! Channel interrupts join the Z80 daisy chain in channel order via
//! [`zilog_z80::IntLine`]; the interrupt vector is the base vector written
//! to channel 0 with the channel number in bits 1-2.

use zilog_z80::IntLine;
use zilog_z80::pins::{self, IORQ, M1, RD, WR};

/// Chip enable.
pub const CE: u64 = 1 << 40;
/// Channel select bit 0.
pub const CS0: u64 = 1 << 41;
/// Channel select bit 1.
pub const CS1: u64 = 1 << 42;

/// Counter/trigger inputs, one per channel.
pub const CLKTRG0: u64 = 1 << 44;
pub const CLKTRG1: u64 = 1 << 45;
pub const CLKTRG2: u64 = 1 << 46;
pub const CLKTRG3: u64 = 1 << 47;

/// Zero-count/timeout outputs (channel 3 has none).
pub const ZCTO0: u64 = 1 << 48;
pub const ZCTO1: u64 = 1 << 49;
pub const ZCTO2: u64 = 1 << 50;

/// Control word bits.
pub const CTRL_EI: u8 = 0x80;
pub const CTRL_MODE_COUNTER: u8 = 0x40;
pub const CTRL_PRESCALER_256: u8 = 0x20;
pub const CTRL_EDGE_RISING: u8 = 0x10;
pub const CTRL_TRIGGER_WAIT: u8 = 0x08;
pub const CTRL_CONST_FOLLOWS: u8 = 0x04;
pub const CTRL_RESET: u8 = 0x02;
pub const CTRL_CONTROL: u8 = 0x01;

/// One CTC channel.
#[derive(Debug, Clone)]
struct Channel {
    control: u8,
    constant: u8,
    down_counter: u16,
    prescaler: u8,
    /// Timer armed but waiting for a CLKTRG edge to start.
    waiting_for_trigger: bool,
    /// Channel stopped (reset, or no time constant loaded yet).
    stopped: bool,
    /// Previous CLKTRG level for edge detection.
    trigger_level: bool,
    irq: IntLine,
}

impl Channel {
    fn new() -> Self {
        Self {
            control: CTRL_RESET,
            constant: 0,
            down_counter: 0,
            prescaler: 0,
            waiting_for_trigger: false,
            stopped: true,
            trigger_level: false,
            irq: IntLine::default(),
        }
    }

    fn reload_value(&self) -> u16 {
        if self.constant == 0 {
            0x100
        } else {
            u16::from(self.constant)
        }
    }

    fn prescaler_mask(&self) -> u8 {
        if self.control & CTRL_PRESCALER_256 != 0 {
            0xFF
        } else {
            0x0F
        }
    }

    /// Decrement the down counter; true on terminal count.
    fn count_down(&mut self) -> bool {
        self.down_counter = self.down_counter.wrapping_sub(1);
        if self.down_counter == 0 {
            self.down_counter = self.reload_value();
            true
        } else {
            false
        }
    }
}

/// A Z80 CTC.
#[derive(Debug, Clone)]
pub struct Ctc {
    channels: [Channel; 4],
    /// Interrupt vector base (written to channel 0 with bit 0 clear).
    vector: u8,
}

impl Ctc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: [Channel::new(), Channel::new(), Channel::new(), Channel::new()],
            vector: 0,
        }
    }

    /// Reset all channels; the vector register survives.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            *channel = Channel::new();
        }
    }

    /// Interrupt vector the given channel delivers.
    #[must_use]
    pub fn channel_vector(&self, channel: usize) -> u8 {
        (self.vector & 0xF8) | ((channel as u8) << 1)
    }

    /// Current down-counter value of a channel (0x100 reads as 0).
    #[must_use]
    pub fn counter(&self, channel: usize) -> u8 {
        self.channels[channel].down_counter as u8
    }

    fn write(&mut self, channel: usize, data: u8) {
        let chn = &mut self.channels[channel];
        if chn.control & CTRL_CONST_FOLLOWS != 0 {
            chn.constant = data;
            chn.control &= !(CTRL_CONST_FOLLOWS | CTRL_RESET);
            chn.down_counter = chn.reload_value();
            chn.prescaler = chn.prescaler_mask();
            chn.stopped = false;
            chn.waiting_for_trigger = chn.control & CTRL_MODE_COUNTER == 0
                && chn.control & CTRL_TRIGGER_WAIT != 0;
        } else if data & CTRL_CONTROL != 0 {
            chn.control = data;
            if data & CTRL_RESET != 0 {
                chn.stopped = true;
                chn.waiting_for_trigger = false;
            }
        } else if channel == 0 {
            self.vector = data & 0xF8;
        }
    }

    /// Advance the CTC by one tick of the shared bus word.
    ///
    /// Any `ZC/TO` pulse appears in the returned word for this tick only.
    #[must_use]
    pub fn tick(&mut self, mut pins: u64) -> u64 {
        let int_ack = pins & (M1 | IORQ) == M1 | IORQ;
        if pins & CE != 0 && !int_ack {
            let channel = usize::from(pins & CS0 != 0) | (usize::from(pins & CS1 != 0) << 1);
            if pins & WR != 0 {
                self.write(channel, pins::data(pins));
            } else if pins & RD != 0 {
                pins = pins::with_data(pins, self.counter(channel));
            }
        }

        let mut zcto = 0u64;
        for (index, chn) in self.channels.iter_mut().enumerate() {
            let trigger = pins & (CLKTRG0 << index) != 0;
            let edge = if chn.control & CTRL_EDGE_RISING != 0 {
                trigger && !chn.trigger_level
            } else {
                !trigger && chn.trigger_level
            };
            chn.trigger_level = trigger;

            let mut terminal = false;
            if !chn.stopped {
                if chn.control & CTRL_MODE_COUNTER != 0 {
                    if edge {
                        terminal = chn.count_down();
                    }
                } else if chn.waiting_for_trigger {
                    if edge {
                        chn.waiting_for_trigger = false;
                        chn.prescaler = chn.prescaler_mask();
                    }
                } else {
                    chn.prescaler = chn.prescaler.wrapping_sub(1) & chn.prescaler_mask();
                    if chn.prescaler == 0 {
                        terminal = chn.count_down();
                    }
                }
            }
            if terminal {
                if chn.control & CTRL_EI != 0 {
                    chn.irq.request();
                }
                if index < 3 {
                    zcto |= ZCTO0 << index;
                }
            }
        }

        // Interrupt daisy chain in channel priority order.
        let vector = self.vector;
        for (index, chn) in self.channels.iter_mut().enumerate() {
            pins = chn.irq.tick(pins, (vector & 0xF8) | ((index as u8) << 1));
        }

        pins | zcto
    }
}

impl Default for Ctc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zilog_z80::pins::{IEIO, INT, data};

    fn write(ctc: &mut Ctc, channel: u64, value: u8) {
        let pins = pins::with_data(CE | IORQ | WR | channel, value);
        let _ = ctc.tick(pins);
    }

    #[test]
    fn timer_mode_divides_by_prescaler_and_constant() {
        let mut ctc = Ctc::new();
        // Channel 0: timer, /16 prescaler, constant 10, auto start.
        write(&mut ctc, 0, CTRL_CONST_FOLLOWS | CTRL_CONTROL);
        write(&mut ctc, 0, 10);

        let mut first = None;
        for tick in 0..400 {
            let pins = ctc.tick(0);
            if pins & ZCTO0 != 0 {
                first = Some(tick);
                break;
            }
        }
        // 16 * 10 = 160 ticks to the first terminal count (within the
        // prescaler phase of the start tick).
        let first = first.expect("timer should reach terminal count");
        assert!((155..=160).contains(&first), "first ZC/TO at {first}");
    }

    #[test]
    fn counter_mode_counts_trigger_edges() {
        let mut ctc = Ctc::new();
        // Channel 1: counter mode, rising edges, constant 3.
        write(
            &mut ctc,
            CS0,
            CTRL_MODE_COUNTER | CTRL_EDGE_RISING | CTRL_CONST_FOLLOWS | CTRL_CONTROL,
        );
        write(&mut ctc, CS0, 3);

        let mut pulses = 0;
        for i in 0..12 {
            // Alternate the trigger line: 6 rising edges in 12 ticks.
            let trig = if i % 2 == 0 { CLKTRG1 } else { 0 };
            let pins = ctc.tick(trig);
            if pins & ZCTO1 != 0 {
                pulses += 1;
            }
        }
        assert_eq!(pulses, 2, "6 edges / constant 3 = 2 pulses");
    }

    #[test]
    fn counter_read_returns_current_value() {
        let mut ctc = Ctc::new();
        write(&mut ctc, 0, CTRL_MODE_COUNTER | CTRL_EDGE_RISING | CTRL_CONST_FOLLOWS | CTRL_CONTROL);
        write(&mut ctc, 0, 5);
        // Two rising edges.
        let _ = ctc.tick(CLKTRG0);
        let _ = ctc.tick(0);
        let _ = ctc.tick(CLKTRG0);
        let pins = ctc.tick(pins::with_data(CE | IORQ | RD, 0));
        assert_eq!(data(pins), 3);
    }

    #[test]
    fn terminal_count_requests_interrupt_with_channel_vector() {
        let mut ctc = Ctc::new();
        write(&mut ctc, 0, 0xE0); // vector base (bit 0 clear)
        write(
            &mut ctc,
            CS0,
            CTRL_EI | CTRL_MODE_COUNTER | CTRL_EDGE_RISING | CTRL_CONST_FOLLOWS | CTRL_CONTROL,
        );
        write(&mut ctc, CS0, 1);
        let pins = ctc.tick(IEIO | CLKTRG1);
        assert!(pins & INT != 0, "terminal count raises INT");
        let ack = ctc.tick(IEIO | M1 | IORQ);
        assert_eq!(data(ack), 0xE2, "vector base | channel 1 << 1");
        assert_eq!(ctc.channel_vector(1), 0xE2);
    }

    #[test]
    fn software_reset_stops_channel() {
        let mut ctc = Ctc::new();
        write(&mut ctc, 0, CTRL_CONST_FOLLOWS | CTRL_CONTROL);
        write(&mut ctc, 0, 1);
        write(&mut ctc, 0, CTRL_RESET | CTRL_CONTROL);
        for _ in 0..600 {
            let pins = ctc.tick(0);
            assert!(pins & ZCTO0 == 0, "reset channel must not pulse");
        }
    }
}
