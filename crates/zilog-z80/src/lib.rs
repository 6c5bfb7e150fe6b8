//! Pin-level Zilog Z80 (U880) CPU emulator.
//!
//! Each call to `tick()` advances exactly one T-state. The CPU communicates
//! with the outside world through a single 64-bit bus-signal word ("pins"):
//! the caller passes the current pins in, the CPU asserts address, data and
//! control lines, and returns the updated word. Memory and I/O are *not*
//! accessed through a trait — the system ticking the CPU watches the
//! returned pins, services any bus request, and feeds the result back on
//! the next tick.
//!
//! This layout lets peripheral chips (PIO, CTC) share the same bus word,
//! including the interrupt daisy-chain enable line and the virtual RETI
//! notification pin that drive the Z80-family interrupt protocol.

mod alu;
mod cpu;
mod flags;
mod irq;
mod microcode;
pub mod pins;
mod registers;

pub use cpu::Z80;
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use irq::IntLine;
pub use microcode::MicroOp;
pub use registers::Registers;
