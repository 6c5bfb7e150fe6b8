//! Micro-operations: the machine-cycle building blocks of an instruction.
//!
//! Decoding an opcode pushes a sequence of micro-ops onto the CPU's queue;
//! the tick loop then plays them back one T-state at a time. Bus micro-ops
//! assert their request on their first tick and sample returned data on
//! their second; the remaining ticks pad the op to its documented length.

/// One machine-cycle step of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroOp {
    /// M1 opcode fetch at `pc` (4 T). Decodes on completion.
    Fetch,
    /// Plain read of the next opcode byte at `pc` (3 T, no M1) — used for
    /// the trailing opcode of DD CB / FD CB sequences. Decodes on
    /// completion.
    ReadOpcode,
    /// Read immediate byte at `pc` into `data_lo` (3 T).
    ReadImm,
    /// Read immediate byte at `pc` into `data_hi` (3 T).
    ReadImmHi,
    /// Read displacement byte at `pc` into `disp` (3 T).
    ReadDisp,
    /// Read byte at `addr` into `data_lo` (3 T).
    ReadMem,
    /// Read byte at `addr + 1` into `data_hi` (3 T).
    ReadMemHi,
    /// Write `data_lo` to `addr` (3 T).
    WriteMem,
    /// Write `data_hi` to `addr + 1` (3 T).
    WriteMemHi,
    /// Read byte at `sp` into `data_lo`, increment `sp` (3 T).
    PopLo,
    /// Read byte at `sp` into `data_hi`, increment `sp` (3 T).
    PopHi,
    /// Decrement `sp`, write `data_hi` (3 T).
    PushHi,
    /// Decrement `sp`, write `data_lo` (3 T).
    PushLo,
    /// I/O read at `addr` into `data_lo` (4 T).
    ReadIo,
    /// I/O write of `data_lo` to `addr` (4 T).
    WriteIo,
    /// Interrupt acknowledge cycle: M1|IORQ, device vector lands in
    /// `data_lo` (7 T).
    IntAck,
    /// Idle T-states.
    Internal(u8),
    /// Run the next execute stage of the current instruction (0 T).
    Execute,
}

impl MicroOp {
    /// T-states the op occupies.
    #[must_use]
    pub const fn ticks(self) -> u8 {
        match self {
            Self::Fetch => 4,
            Self::ReadOpcode
            | Self::ReadImm
            | Self::ReadImmHi
            | Self::ReadDisp
            | Self::ReadMem
            | Self::ReadMemHi
            | Self::WriteMem
            | Self::WriteMemHi
            | Self::PopLo
            | Self::PopHi
            | Self::PushHi
            | Self::PushLo => 3,
            Self::ReadIo | Self::WriteIo => 4,
            Self::IntAck => 7,
            Self::Internal(n) => n,
            Self::Execute => 0,
        }
    }
}
