//! The Z80 CPU: pin-level tick loop and instruction sequencing.

mod execute;

use std::collections::VecDeque;

use crate::microcode::MicroOp;
use crate::pins;
use crate::registers::Registers;

/// Index-register context of the instruction being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    Hl,
    Ix,
    Iy,
}

/// What kind of sequence the execute stages belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seq {
    Instr,
    Irq,
    Nmi,
}

/// Pin-level Z80 CPU.
///
/// Call [`Z80::tick`] once per T-state with the current bus word; service
/// any bus request the returned word carries before the next call. See the
/// crate docs for the request/sample protocol.
#[derive(Debug, Clone)]
pub struct Z80 {
    pub regs: Registers,

    pub(crate) opcode: u8,
    pub(crate) prefix: Prefix,
    pub(crate) ed: bool,
    pub(crate) cb: bool,
    pub(crate) seq: Seq,
    pub(crate) stage: u8,

    /// Effective address latch for memory/I-O micro-ops.
    pub(crate) addr: u16,
    pub(crate) data_lo: u8,
    pub(crate) data_hi: u8,
    pub(crate) disp: i8,

    pub(crate) micro_ops: VecDeque<MicroOp>,
    op: Option<MicroOp>,
    op_tick: u8,

    pub(crate) halted: bool,
    pub(crate) ei_pending: bool,
    pub(crate) reti_signal: bool,
    nmi_seen: bool,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        let mut regs = Registers::default();
        regs.set_af(0xFFFF);
        regs.sp = 0xFFFF;
        Self {
            regs,
            opcode: 0,
            prefix: Prefix::Hl,
            ed: false,
            cb: false,
            seq: Seq::Instr,
            stage: 0,
            addr: 0,
            data_lo: 0,
            data_hi: 0,
            disp: 0,
            micro_ops: VecDeque::with_capacity(8),
            op: None,
            op_tick: 0,
            halted: false,
            ei_pending: false,
            reti_signal: false,
            nmi_seen: false,
        }
    }

    /// Hardware reset: registers to their power-on pattern, pipeline
    /// flushed, execution restarts at address 0.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.regs.set_af(0xFFFF);
        self.regs.sp = 0xFFFF;
        self.flush_pipeline();
        self.halted = false;
        self.ei_pending = false;
        self.nmi_seen = false;
    }

    /// Force execution to continue at `addr`: flushes the instruction
    /// pipeline and returns the bus word to seed the tick loop with.
    #[must_use]
    pub fn prefetch(&mut self, addr: u16) -> u64 {
        self.regs.pc = addr;
        self.regs.wz = addr;
        self.flush_pipeline();
        self.halted = false;
        0
    }

    /// True while a HALT instruction is in effect.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    fn flush_pipeline(&mut self) {
        self.micro_ops.clear();
        self.op = None;
        self.op_tick = 0;
        self.prefix = Prefix::Hl;
        self.ed = false;
        self.cb = false;
        self.seq = Seq::Instr;
        self.stage = 0;
        self.reti_signal = false;
    }

    /// Advance the CPU by one T-state.
    ///
    /// Control outputs are rebuilt from scratch; `INT`/`NMI` levels are
    /// consumed (devices re-assert them while requesting).
    pub fn tick(&mut self, pins_in: u64) -> u64 {
        let mut pins = pins_in & !(pins::CTRL_MASK | pins::RETI | pins::HALT);

        // Finish zero-tick work (execute stages) and pick the next
        // clocked micro-op.
        while self.op.is_none() {
            match self.micro_ops.pop_front() {
                Some(MicroOp::Execute) => self.execute(),
                Some(op) if op.ticks() == 0 => {}
                Some(op) => {
                    self.op = Some(op);
                    self.op_tick = 0;
                }
                None => self.begin_instruction(pins_in),
            }
        }

        let op = self.op.unwrap_or(MicroOp::Internal(1));
        pins = self.drive(op, self.op_tick, pins);

        self.op_tick += 1;
        if self.op_tick >= op.ticks() {
            self.op = None;
            self.op_tick = 0;
            if matches!(op, MicroOp::Fetch | MicroOp::ReadOpcode) {
                self.decode();
            }
        }

        if self.reti_signal {
            self.reti_signal = false;
            pins |= pins::RETI;
        }
        if self.halted {
            pins |= pins::HALT;
        }
        pins & !(pins::INT | pins::NMI)
    }

    /// Drive the bus for tick `t` of micro-op `op`.
    fn drive(&mut self, op: MicroOp, t: u8, mut pins: u64) -> u64 {
        match op {
            MicroOp::Fetch => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    pins |= pins::M1 | pins::MREQ | pins::RD;
                    self.regs.bump_r();
                }
                1 => self.opcode = pins::data(pins),
                _ => {}
            },
            MicroOp::ReadOpcode => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.opcode = pins::data(pins),
                _ => {}
            },
            MicroOp::ReadImm => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_lo = pins::data(pins),
                _ => {}
            },
            MicroOp::ReadImmHi => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_hi = pins::data(pins),
                _ => {}
            },
            MicroOp::ReadDisp => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => {
                    self.disp = pins::data(pins) as i8;
                    // Displacement reads only occur for indexed operands;
                    // latch the effective address right away.
                    self.addr = self.index_addr();
                    self.regs.wz = self.addr;
                }
                _ => {}
            },
            MicroOp::ReadMem => match t {
                0 => {
                    pins = pins::with_addr(pins, self.addr);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_lo = pins::data(pins),
                _ => {}
            },
            MicroOp::ReadMemHi => match t {
                0 => {
                    pins = pins::with_addr(pins, self.addr.wrapping_add(1));
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_hi = pins::data(pins),
                _ => {}
            },
            MicroOp::WriteMem => {
                if t == 0 {
                    pins = pins::with_addr(pins, self.addr);
                    pins = pins::with_data(pins, self.data_lo);
                    pins |= pins::MREQ | pins::WR;
                }
            }
            MicroOp::WriteMemHi => {
                if t == 0 {
                    pins = pins::with_addr(pins, self.addr.wrapping_add(1));
                    pins = pins::with_data(pins, self.data_hi);
                    pins |= pins::MREQ | pins::WR;
                }
            }
            MicroOp::PopLo => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.sp);
                    self.regs.sp = self.regs.sp.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_lo = pins::data(pins),
                _ => {}
            },
            MicroOp::PopHi => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.sp);
                    self.regs.sp = self.regs.sp.wrapping_add(1);
                    pins |= pins::MREQ | pins::RD;
                }
                1 => self.data_hi = pins::data(pins),
                _ => {}
            },
            MicroOp::PushHi => {
                if t == 0 {
                    self.regs.sp = self.regs.sp.wrapping_sub(1);
                    pins = pins::with_addr(pins, self.regs.sp);
                    pins = pins::with_data(pins, self.data_hi);
                    pins |= pins::MREQ | pins::WR;
                }
            }
            MicroOp::PushLo => {
                if t == 0 {
                    self.regs.sp = self.regs.sp.wrapping_sub(1);
                    pins = pins::with_addr(pins, self.regs.sp);
                    pins = pins::with_data(pins, self.data_lo);
                    pins |= pins::MREQ | pins::WR;
                }
            }
            MicroOp::ReadIo => match t {
                0 => {
                    pins = pins::with_addr(pins, self.addr);
                    pins |= pins::IORQ | pins::RD;
                }
                1 => self.data_lo = pins::data(pins),
                _ => {}
            },
            MicroOp::WriteIo => {
                if t == 0 {
                    pins = pins::with_addr(pins, self.addr);
                    pins = pins::with_data(pins, self.data_lo);
                    pins |= pins::IORQ | pins::WR;
                }
            }
            MicroOp::IntAck => match t {
                0 => {
                    pins = pins::with_addr(pins, self.regs.pc);
                    pins |= pins::M1 | pins::IORQ;
                    self.regs.bump_r();
                }
                1 => self.data_lo = pins::data(pins),
                _ => {}
            },
            MicroOp::Internal(_) | MicroOp::Execute => {}
        }
        pins
    }

    /// Start the next instruction (or accept an interrupt) at an
    /// instruction boundary.
    fn begin_instruction(&mut self, pins: u64) {
        self.prefix = Prefix::Hl;
        self.ed = false;
        self.cb = false;
        self.seq = Seq::Instr;
        self.stage = 0;

        let nmi = pins & pins::NMI != 0;
        let nmi_edge = nmi && !self.nmi_seen;
        self.nmi_seen = nmi;

        if self.ei_pending {
            // EI enables interrupts only after the following instruction.
            self.ei_pending = false;
            self.regs.iff1 = true;
            self.regs.iff2 = true;
            self.micro_ops.push_back(MicroOp::Fetch);
            return;
        }
        if nmi_edge {
            self.halted = false;
            self.regs.iff1 = false;
            self.seq = Seq::Nmi;
            self.data_hi = (self.regs.pc >> 8) as u8;
            self.data_lo = self.regs.pc as u8;
            self.micro_ops.push_back(MicroOp::Internal(5));
            self.micro_ops.push_back(MicroOp::PushHi);
            self.micro_ops.push_back(MicroOp::PushLo);
            self.micro_ops.push_back(MicroOp::Execute);
            return;
        }
        if self.regs.iff1 && pins & pins::INT != 0 {
            self.halted = false;
            self.regs.iff1 = false;
            self.regs.iff2 = false;
            self.seq = Seq::Irq;
            self.micro_ops.push_back(MicroOp::IntAck);
            self.micro_ops.push_back(MicroOp::Execute);
            return;
        }
        if self.halted {
            self.micro_ops.push_back(MicroOp::Internal(1));
            return;
        }
        self.micro_ops.push_back(MicroOp::Fetch);
    }

    /// Effective address of the current indexed operand.
    pub(crate) fn index_addr(&self) -> u16 {
        let base = match self.prefix {
            Prefix::Hl => self.regs.hl(),
            Prefix::Ix => self.regs.ix,
            Prefix::Iy => self.regs.iy,
        };
        base.wrapping_add(self.disp as u16)
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}
