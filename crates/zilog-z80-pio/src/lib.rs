//! Zilog Z80 PIO parallel I/O controller emulator.
//!
//! Two 8-bit ports, each independently programmable. The machine selects a
//! register through the `BASEL` (port A/B) and `CDSEL` (data/control) pins,
//! which systems typically wire to two address lines.
//!
//! # Operating modes
//!
//! | Mode | Meaning       |
//! |------|---------------|
//! | 0    | byte output   |
//! | 1    | byte input    |
//! | 2    | bidirectional |
//! | 3    | bit control   |
//!
//! Mode 3 is the interesting one for home computers: each pin is
//! individually an input or an output per the I/O-select mask written right
//! after the mode word, and the port can raise an interrupt when the
//! monitored input pattern matches the programmed condition (AND/OR,
//! active-high/low, with a mask word). This is how a keyboard matrix wired
//! to both ports closes its scan loop.
//!
//! Handshake strobes (ASTB/BSTB, ARDY/BRDY) are not modeled; nothing in
//! this workspace wires them.
//!
//! Interrupts participate in the Z80 daisy chain via
//! [`zilog_z80::IntLine`]; port A outranks port B.

use zilog_z80::pins::{self, IORQ, M1, RD, WR};
use zilog_z80::IntLine;

/// Chip enable.
pub const CE: u64 = 1 << 40;
/// Port select: 0 = port A, 1 = port B.
pub const BASEL: u64 = 1 << 41;
/// Register select: 0 = data, 1 = control.
pub const CDSEL: u64 = 1 << 42;

const PA_SHIFT: u32 = 48;
const PB_SHIFT: u32 = 56;
const PA_MASK: u64 = 0xFF << PA_SHIFT;
const PB_MASK: u64 = 0xFF << PB_SHIFT;

/// Place both port input levels on the bus word.
#[inline]
#[must_use]
pub const fn with_ports(pins: u64, pa: u8, pb: u8) -> u64 {
    (pins & !(PA_MASK | PB_MASK))
        | ((pa as u64) << PA_SHIFT)
        | ((pb as u64) << PB_SHIFT)
}

/// Port A level driven on the bus word.
#[inline]
#[must_use]
pub const fn port_a(pins: u64) -> u8 {
    ((pins & PA_MASK) >> PA_SHIFT) as u8
}

/// Port B level driven on the bus word.
#[inline]
#[must_use]
pub const fn port_b(pins: u64) -> u8 {
    ((pins & PB_MASK) >> PB_SHIFT) as u8
}

/// Byte output mode.
pub const MODE_OUTPUT: u8 = 0;
/// Byte input mode.
pub const MODE_INPUT: u8 = 1;
/// Bidirectional mode (port A only on real silicon).
pub const MODE_BIDIRECTIONAL: u8 = 2;
/// Bit-control mode.
pub const MODE_BITCONTROL: u8 = 3;

/// Port A index.
pub const PORT_A: usize = 0;
/// Port B index.
pub const PORT_B: usize = 1;

/// One PIO port.
#[derive(Debug, Clone)]
struct Port {
    input: u8,
    output: u8,
    mode: u8,
    /// Mode 3: 1-bits are inputs, 0-bits are outputs.
    io_select: u8,
    int_vector: u8,
    int_enabled: bool,
    /// Interrupt condition is AND (all monitored bits) instead of OR (any).
    int_and: bool,
    /// Monitored bits match at high level instead of low.
    int_high: bool,
    /// Mask word: 0-bits are monitored.
    int_mask: u8,
    expect_io_select: bool,
    expect_int_mask: bool,
    /// Previous value of the mode-3 match condition, for edge detection.
    match_state: bool,
    irq: IntLine,
}

impl Port {
    fn new() -> Self {
        Self {
            input: 0,
            output: 0,
            mode: MODE_INPUT,
            io_select: 0,
            int_vector: 0,
            int_enabled: false,
            int_and: false,
            int_high: false,
            int_mask: 0,
            expect_io_select: false,
            expect_int_mask: false,
            match_state: false,
            irq: IntLine::default(),
        }
    }

    /// The byte currently visible on the port pins.
    fn value(&self) -> u8 {
        match self.mode {
            MODE_OUTPUT | MODE_BIDIRECTIONAL => self.output,
            MODE_INPUT => self.input,
            _ => (self.input & self.io_select) | (self.output & !self.io_select),
        }
    }

    fn write_control(&mut self, data: u8) {
        if self.expect_io_select {
            self.io_select = data;
            self.expect_io_select = false;
        } else if self.expect_int_mask {
            self.int_mask = data;
            self.expect_int_mask = false;
        } else if data & 1 == 0 {
            self.int_vector = data;
        } else {
            match data & 0x0F {
                0x0F => {
                    self.mode = data >> 6;
                    if self.mode == MODE_BITCONTROL {
                        self.expect_io_select = true;
                    }
                }
                0x07 => {
                    self.int_enabled = data & 0x80 != 0;
                    self.int_and = data & 0x40 != 0;
                    self.int_high = data & 0x20 != 0;
                    if data & 0x10 != 0 {
                        self.expect_int_mask = true;
                        self.match_state = false;
                    }
                }
                0x03 => {
                    self.int_enabled = data & 0x80 != 0;
                }
                _ => {}
            }
        }
    }

    /// Mode-3 interrupt monitoring: request on a rising edge of the match
    /// condition. Runs every tick, so an output write that flips a
    /// monitored line raises the interrupt just like an external change.
    fn monitor(&mut self) {
        if self.mode != MODE_BITCONTROL {
            return;
        }
        let monitored = !self.int_mask;
        let level = if self.int_high {
            self.value()
        } else {
            !self.value()
        } & monitored;
        let matched = if self.int_and {
            level == monitored && monitored != 0
        } else {
            level != 0
        };
        if matched && !self.match_state && self.int_enabled {
            self.irq.request();
        }
        self.match_state = matched;
    }
}

/// A Z80 PIO.
#[derive(Debug, Clone)]
pub struct Pio {
    ports: [Port; 2],
}

impl Pio {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ports: [Port::new(), Port::new()],
        }
    }

    /// Reset both ports to input mode with interrupts disabled.
    pub fn reset(&mut self) {
        for port in &mut self.ports {
            let vector = port.int_vector;
            *port = Port::new();
            // The vector register survives a hardware reset.
            port.int_vector = vector;
        }
    }

    /// The byte an output or bit-control port currently drives.
    #[must_use]
    pub fn output(&self, port: usize) -> u8 {
        self.ports[port].output
    }

    /// Current operating mode of a port.
    #[must_use]
    pub fn mode(&self, port: usize) -> u8 {
        self.ports[port].mode
    }

    /// Advance the PIO by one tick of the shared bus word.
    ///
    /// Register access happens when `CE` is set together with an I/O read
    /// or write; `BASEL` picks the port and `CDSEL` the data/control
    /// register. Port input levels are sampled from the PA/PB pin groups
    /// and the ports' driven levels are placed back on them. Both ports
    /// run the interrupt daisy-chain protocol, port A first.
    #[must_use]
    pub fn tick(&mut self, mut pins: u64) -> u64 {
        // Sample the externally driven input levels.
        self.ports[PORT_A].input = port_a(pins);
        self.ports[PORT_B].input = port_b(pins);

        let int_ack = pins & (M1 | IORQ) == M1 | IORQ;
        if pins & CE != 0 && !int_ack {
            let port = usize::from(pins & BASEL != 0);
            if pins & RD != 0 {
                let data = if pins & CDSEL != 0 {
                    // Control reads are undefined on the real chip.
                    0xFF
                } else {
                    self.ports[port].value()
                };
                pins = pins::with_data(pins, data);
            } else if pins & WR != 0 {
                let data = pins::data(pins);
                if pins & CDSEL != 0 {
                    self.ports[port].write_control(data);
                } else {
                    self.ports[port].output = data;
                }
            }
        }

        // Interrupt condition monitoring and daisy chain, port A first.
        for port in &mut self.ports {
            port.monitor();
            pins = port.irq.tick(pins, port.int_vector);
        }

        // Drive the resulting port levels.
        let pa = self.ports[PORT_A].value();
        let pb = self.ports[PORT_B].value();
        with_ports(pins, pa, pb)
    }
}

impl Default for Pio {
    fn default() -> Self {
        Self::new()
    }
}
