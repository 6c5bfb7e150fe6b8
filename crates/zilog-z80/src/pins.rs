//! The Z80 bus-signal word.
//!
//! All bus traffic is encoded in one `u64`:
//!
//! | Bits  | Signals                          |
//! |-------|----------------------------------|
//! | 0-15  | A0-A15 address bus               |
//! | 16-23 | D0-D7 data bus                   |
//! | 24-33 | control (see constants below)    |
//! | 40+   | reserved for peripheral chips    |
//!
//! The word is recreated by the CPU every tick: control outputs are cleared
//! on entry and re-asserted as needed, so a bus request (`MREQ|RD`,
//! `MREQ|WR`, `IORQ|RD`, `IORQ|WR`, or `M1|IORQ` for interrupt acknowledge)
//! appears for exactly one tick. Read data is sampled from the word passed
//! into the *next* tick, which gives the system one tick to service the
//! request.
//!
//! `INT` and `NMI` are level inputs consumed by the CPU each tick; a
//! requesting device must re-assert them every tick until acknowledged.
//! `IEIO` is the daisy-chain enable threaded through the peripheral chips
//! in priority order, and `RETI` is a virtual pin the CPU raises for one
//! tick when a RETI instruction begins, so the chips can retire the
//! interrupt currently under service.

/// Address bus pins A0-A15.
pub const A0: u64 = 1 << 0;
pub const A1: u64 = 1 << 1;
pub const A2: u64 = 1 << 2;
pub const A3: u64 = 1 << 3;
pub const A4: u64 = 1 << 4;
pub const A5: u64 = 1 << 5;
pub const A6: u64 = 1 << 6;
pub const A7: u64 = 1 << 7;
pub const A8: u64 = 1 << 8;
pub const A9: u64 = 1 << 9;
pub const A10: u64 = 1 << 10;
pub const A11: u64 = 1 << 11;
pub const A12: u64 = 1 << 12;
pub const A13: u64 = 1 << 13;
pub const A14: u64 = 1 << 14;
pub const A15: u64 = 1 << 15;

/// Machine cycle one (opcode fetch or interrupt acknowledge).
pub const M1: u64 = 1 << 24;
/// Memory request.
pub const MREQ: u64 = 1 << 25;
/// I/O request.
pub const IORQ: u64 = 1 << 26;
/// Read strobe.
pub const RD: u64 = 1 << 27;
/// Write strobe.
pub const WR: u64 = 1 << 28;
/// CPU is halted.
pub const HALT: u64 = 1 << 29;
/// Maskable interrupt request (level input, re-asserted by devices).
pub const INT: u64 = 1 << 30;
/// Non-maskable interrupt request (level input).
pub const NMI: u64 = 1 << 31;
/// Interrupt daisy-chain enable in/out (virtual, shared by all devices).
pub const IEIO: u64 = 1 << 32;
/// RETI notification (virtual, raised by the CPU for one tick).
pub const RETI: u64 = 1 << 33;

/// The canonical CPU pin set. Systems mask chip-specific pins (bits 40+)
/// back to this after ticking each peripheral.
pub const PIN_MASK: u64 = (1 << 34) - 1;

/// Control outputs rebuilt by the CPU at the start of every tick.
pub const CTRL_MASK: u64 = M1 | MREQ | IORQ | RD | WR;

const ADDR_MASK: u64 = 0xFFFF;
const DATA_SHIFT: u32 = 16;
const DATA_MASK: u64 = 0xFF << DATA_SHIFT;

/// Extract the address bus.
#[inline]
#[must_use]
pub const fn addr(pins: u64) -> u16 {
    (pins & ADDR_MASK) as u16
}

/// Replace the address bus.
#[inline]
#[must_use]
pub const fn with_addr(pins: u64, addr: u16) -> u64 {
    (pins & !ADDR_MASK) | addr as u64
}

/// Extract the data bus.
#[inline]
#[must_use]
pub const fn data(pins: u64) -> u8 {
    ((pins & DATA_MASK) >> DATA_SHIFT) as u8
}

/// Replace the data bus.
#[inline]
#[must_use]
pub const fn with_data(pins: u64, data: u8) -> u64 {
    (pins & !DATA_MASK) | ((data as u64) << DATA_SHIFT)
}
