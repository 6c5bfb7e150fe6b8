//! Instruction decode and execution for the Z80.
//!
//! `decode()` runs when an opcode fetch completes: it either finishes the
//! instruction on the spot (register-to-register work costs no extra
//! machine cycles) or queues the micro-ops that collect operands, with
//! `Execute` markers where a follow-up stage needs the collected data.
//! `execute()` plays those stages back; a stage may queue further
//! micro-ops (a conditional call only pushes the return address once the
//! condition is known to hold).
//!
//! The decode is organised by the octal fields of the opcode
//! (`x = op >> 6`, `y = op >> 3 & 7`, `z = op & 7`, `p = y >> 1`,
//! `q = y & 1`), which turns the 256-entry map into a handful of families.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]

use crate::alu::{self, AluResult};
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};
use crate::microcode::MicroOp;

use super::{Prefix, Seq, Z80};

/// Interrupt-mode table for `ED` z=6 (y indexes 0-7).
const IM_TABLE: [u8; 8] = [0, 0, 1, 2, 0, 0, 1, 2];

impl Z80 {
    // =========================================================================
    // Register-group helpers (octal operand fields)
    // =========================================================================

    /// 8-bit register group: 0=B 1=C 2=D 3=E 4=H 5=L 7=A. With `ixy`, H/L
    /// become the halves of the active index register. Never call with 6.
    fn r8(&self, r: u8, ixy: bool) -> u8 {
        match r {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 if ixy => (self.index_base() >> 8) as u8,
            4 => self.regs.h,
            5 if ixy => self.index_base() as u8,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_r8(&mut self, r: u8, ixy: bool, v: u8) {
        match r {
            0 => self.regs.b = v,
            1 => self.regs.c = v,
            2 => self.regs.d = v,
            3 => self.regs.e = v,
            4 if ixy => self.set_index_base((self.index_base() & 0x00FF) | ((v as u16) << 8)),
            4 => self.regs.h = v,
            5 if ixy => self.set_index_base((self.index_base() & 0xFF00) | v as u16),
            5 => self.regs.l = v,
            _ => self.regs.a = v,
        }
    }

    /// 16-bit register-pair group: 0=BC 1=DE 2=HL/IX/IY 3=SP.
    fn rp_get(&self, p: u8) -> u16 {
        match p {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.hl_ir(),
            _ => self.regs.sp,
        }
    }

    fn rp_set(&mut self, p: u8, v: u16) {
        match p {
            0 => self.regs.set_bc(v),
            1 => self.regs.set_de(v),
            2 => self.set_hl_ir(v),
            _ => self.regs.sp = v,
        }
    }

    /// Stack register-pair group: 0=BC 1=DE 2=HL/IX/IY 3=AF.
    fn rp2_get(&self, p: u8) -> u16 {
        match p {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.hl_ir(),
            _ => self.regs.af(),
        }
    }

    fn rp2_set(&mut self, p: u8, v: u16) {
        match p {
            0 => self.regs.set_bc(v),
            1 => self.regs.set_de(v),
            2 => self.set_hl_ir(v),
            _ => self.regs.set_af(v),
        }
    }

    /// HL, or the active index register under a DD/FD prefix.
    fn hl_ir(&self) -> u16 {
        match self.prefix {
            Prefix::Hl => self.regs.hl(),
            Prefix::Ix => self.regs.ix,
            Prefix::Iy => self.regs.iy,
        }
    }

    fn set_hl_ir(&mut self, v: u16) {
        match self.prefix {
            Prefix::Hl => self.regs.set_hl(v),
            Prefix::Ix => self.regs.ix = v,
            Prefix::Iy => self.regs.iy = v,
        }
    }

    fn index_base(&self) -> u16 {
        match self.prefix {
            Prefix::Ix => self.regs.ix,
            _ => self.regs.iy,
        }
    }

    fn set_index_base(&mut self, v: u16) {
        match self.prefix {
            Prefix::Ix => self.regs.ix = v,
            _ => self.regs.iy = v,
        }
    }

    /// Condition-code group: NZ Z NC C PO PE P M.
    fn cond(&self, y: u8) -> bool {
        let f = self.regs.f;
        match y {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    /// Accumulator ALU group: ADD ADC SUB SBC AND XOR OR CP.
    fn alu_acc(&mut self, y: u8, val: u8) {
        let carry = self.regs.f & CF;
        match y {
            0 => self.apply(alu::add8(self.regs.a, val, 0)),
            1 => self.apply(alu::add8(self.regs.a, val, carry)),
            2 => self.apply(alu::sub8(self.regs.a, val, 0)),
            3 => self.apply(alu::sub8(self.regs.a, val, carry)),
            4 => self.apply(alu::and8(self.regs.a, val)),
            5 => self.apply(alu::xor8(self.regs.a, val)),
            6 => self.apply(alu::or8(self.regs.a, val)),
            _ => self.regs.f = alu::cp8(self.regs.a, val),
        }
    }

    fn apply(&mut self, r: AluResult) {
        self.regs.a = r.value;
        self.regs.f = r.flags;
    }

    /// CB rotate/shift group: RLC RRC RL RR SLA SRA SLL SRL.
    fn rot(&self, y: u8, v: u8) -> AluResult {
        let carry = self.regs.f & CF;
        match y {
            0 => alu::rlc(v),
            1 => alu::rrc(v),
            2 => alu::rl(v, carry),
            3 => alu::rr(v, carry),
            4 => alu::sla(v),
            5 => alu::sra(v),
            6 => alu::sll(v),
            _ => alu::srl(v),
        }
    }

    /// BIT y: Z/P from the tested bit, S only for bit 7, X/Y from `xy_src`.
    fn bit_flags(&mut self, y: u8, v: u8, xy_src: u8) {
        let result = v & (1 << y);
        let mut f = (self.regs.f & CF) | HF | (xy_src & (YF | XF));
        if result == 0 {
            f |= ZF | PF;
        }
        f |= result & SF;
        self.regs.f = f;
    }

    /// Queue a 16-bit push of `v` (high byte first).
    fn push16(&mut self, v: u16) {
        self.data_hi = (v >> 8) as u8;
        self.data_lo = v as u8;
        self.micro_ops.push_back(MicroOp::PushHi);
        self.micro_ops.push_back(MicroOp::PushLo);
    }

    fn push_op(&mut self, op: MicroOp) {
        self.micro_ops.push_back(op);
    }

    /// Queue the displacement read + address padding for an indexed
    /// memory operand.
    fn push_disp(&mut self) {
        self.push_op(MicroOp::ReadDisp);
        self.push_op(MicroOp::Internal(5));
    }

    fn data16(&self) -> u16 {
        (self.data_hi as u16) << 8 | self.data_lo as u16
    }

    // =========================================================================
    // Decode entry points
    // =========================================================================

    pub(super) fn decode(&mut self) {
        if self.cb {
            self.decode_cb();
        } else if self.ed {
            self.decode_ed();
        } else {
            self.decode_main();
        }
    }

    pub(super) fn execute(&mut self) {
        let stage = self.stage;
        self.stage += 1;
        match self.seq {
            Seq::Irq => self.exec_irq(stage),
            Seq::Nmi => {
                self.regs.pc = 0x0066;
                self.regs.wz = 0x0066;
            }
            Seq::Instr => {
                if self.cb {
                    self.exec_cb();
                } else if self.ed {
                    self.exec_ed(stage);
                } else {
                    self.exec_main(stage);
                }
            }
        }
    }

    /// Maskable interrupt acceptance: the vector is in `data_lo` after the
    /// acknowledge cycle.
    fn exec_irq(&mut self, stage: u8) {
        if stage == 0 {
            let vector = self.data_lo;
            self.addr = (self.regs.i as u16) << 8 | vector as u16;
            self.push16(self.regs.pc);
            if self.regs.im == 2 {
                self.push_op(MicroOp::ReadMem);
                self.push_op(MicroOp::ReadMemHi);
                self.push_op(MicroOp::Execute);
            } else {
                // IM 0 is treated as IM 1: the classic RST 38h response.
                self.regs.pc = 0x0038;
                self.regs.wz = 0x0038;
            }
        } else {
            self.regs.pc = self.data16();
            self.regs.wz = self.regs.pc;
        }
    }

    // =========================================================================
    // Unprefixed instructions
    // =========================================================================

    fn decode_main(&mut self) {
        let op = self.opcode;
        match op {
            0xCB => {
                self.cb = true;
                if self.prefix == Prefix::Hl {
                    self.push_op(MicroOp::Fetch);
                } else {
                    // DD CB d op: displacement comes before the final
                    // opcode byte, which is read without M1.
                    self.push_op(MicroOp::ReadDisp);
                    self.push_op(MicroOp::ReadOpcode);
                }
                return;
            }
            0xDD => {
                self.prefix = Prefix::Ix;
                self.push_op(MicroOp::Fetch);
                return;
            }
            0xFD => {
                self.prefix = Prefix::Iy;
                self.push_op(MicroOp::Fetch);
                return;
            }
            0xED => {
                self.ed = true;
                self.prefix = Prefix::Hl;
                self.push_op(MicroOp::Fetch);
                return;
            }
            _ => {}
        }

        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        match x {
            0 => self.decode_x0(y, z),
            1 => self.decode_x1(op, y, z),
            2 => {
                // ALU A, r[z]
                if z == 6 {
                    if self.prefix != Prefix::Hl {
                        self.push_disp();
                    } else {
                        self.addr = self.regs.hl();
                    }
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::Execute);
                } else {
                    let v = self.r8(z, true);
                    self.alu_acc(y, v);
                }
            }
            _ => self.decode_x3(y, z),
        }
    }

    fn decode_x0(&mut self, y: u8, z: u8) {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => match y {
                0 => {} // NOP
                1 => {
                    // EX AF, AF'
                    core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                    core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
                }
                2 => {
                    // DJNZ d
                    self.push_op(MicroOp::Internal(1));
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::Execute);
                }
                _ => {
                    // JR d / JR cc, d
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::Execute);
                }
            },
            1 => {
                if q == 0 {
                    // LD rp[p], nn
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                } else {
                    // ADD HL, rp[p]
                    let hl = self.hl_ir();
                    let rr = self.rp_get(p);
                    self.regs.wz = hl.wrapping_add(1);
                    let (value, flags) = alu::add16(hl, rr);
                    self.set_hl_ir(value);
                    self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                    self.push_op(MicroOp::Internal(7));
                }
            }
            2 => self.decode_x0_z2(p, q),
            3 => {
                // INC/DEC rp[p]
                let v = self.rp_get(p);
                let v = if q == 0 {
                    v.wrapping_add(1)
                } else {
                    v.wrapping_sub(1)
                };
                self.rp_set(p, v);
                self.push_op(MicroOp::Internal(2));
            }
            4 | 5 => {
                // INC/DEC r[y]
                if y == 6 {
                    if self.prefix != Prefix::Hl {
                        self.push_disp();
                    } else {
                        self.addr = self.regs.hl();
                    }
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::Internal(1));
                    self.push_op(MicroOp::Execute);
                } else {
                    let r = if z == 4 {
                        alu::inc8(self.r8(y, true))
                    } else {
                        alu::dec8(self.r8(y, true))
                    };
                    self.set_r8(y, true, r.value);
                    self.regs.f = (self.regs.f & CF) | r.flags;
                }
            }
            6 => {
                // LD r[y], n
                if y == 6 {
                    if self.prefix != Prefix::Hl {
                        self.push_op(MicroOp::ReadDisp);
                        self.push_op(MicroOp::ReadImm);
                        self.push_op(MicroOp::Internal(2));
                    } else {
                        self.addr = self.regs.hl();
                        self.push_op(MicroOp::ReadImm);
                    }
                    self.push_op(MicroOp::WriteMem);
                } else {
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::Execute);
                }
            }
            _ => self.decode_x0_z7(y),
        }
    }

    fn decode_x0_z2(&mut self, p: u8, q: u8) {
        if q == 0 {
            match p {
                0 | 1 => {
                    // LD (BC/DE), A
                    self.addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    self.data_lo = self.regs.a;
                    self.regs.wz =
                        (self.regs.a as u16) << 8 | (self.addr.wrapping_add(1) & 0xFF);
                    self.push_op(MicroOp::WriteMem);
                }
                _ => {
                    // LD (nn), HL / LD (nn), A
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                }
            }
        } else {
            match p {
                0 | 1 => {
                    // LD A, (BC/DE)
                    self.addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    self.regs.wz = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::Execute);
                }
                _ => {
                    // LD HL, (nn) / LD A, (nn)
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                }
            }
        }
    }

    fn decode_x0_z7(&mut self, y: u8) {
        let a = self.regs.a;
        let f = self.regs.f;
        match y {
            0 => {
                // RLCA
                let carry = a >> 7;
                self.regs.a = (a << 1) | carry;
                self.regs.f = (f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            1 => {
                // RRCA
                let carry = a & 1;
                self.regs.a = (a >> 1) | (carry << 7);
                self.regs.f = (f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            2 => {
                // RLA
                let carry = a >> 7;
                self.regs.a = (a << 1) | (f & CF);
                self.regs.f = (f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            3 => {
                // RRA
                let carry = a & 1;
                self.regs.a = (a >> 1) | ((f & CF) << 7);
                self.regs.f = (f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            4 => self.apply(alu::daa(a, f)),
            5 => {
                // CPL
                self.regs.a = !a;
                self.regs.f =
                    (f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
            }
            6 => {
                // SCF
                self.regs.f = (f & (SF | ZF | PF)) | CF | (a & (YF | XF));
            }
            _ => {
                // CCF
                let carry = f & CF;
                self.regs.f = ((f & (SF | ZF | PF)) | (carry << 4) | (a & (YF | XF)))
                    | (carry ^ CF);
            }
        }
    }

    fn decode_x1(&mut self, op: u8, y: u8, z: u8) {
        if op == 0x76 {
            self.halted = true;
            return;
        }
        if y == 6 {
            // LD (HL/IX+d), r[z] — the register operand is never remapped
            // when the other side is memory.
            self.data_lo = self.r8(z, false);
            if self.prefix != Prefix::Hl {
                self.push_disp();
            } else {
                self.addr = self.regs.hl();
            }
            self.push_op(MicroOp::WriteMem);
        } else if z == 6 {
            // LD r[y], (HL/IX+d)
            if self.prefix != Prefix::Hl {
                self.push_disp();
            } else {
                self.addr = self.regs.hl();
            }
            self.push_op(MicroOp::ReadMem);
            self.push_op(MicroOp::Execute);
        } else {
            let v = self.r8(z, true);
            self.set_r8(y, true, v);
        }
    }

    fn decode_x3(&mut self, y: u8, z: u8) {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => {
                // RET cc
                self.push_op(MicroOp::Internal(1));
                self.push_op(MicroOp::Execute);
            }
            1 => {
                if q == 0 {
                    // POP rp2[p]
                    self.push_op(MicroOp::PopLo);
                    self.push_op(MicroOp::PopHi);
                    self.push_op(MicroOp::Execute);
                } else {
                    match p {
                        0 => {
                            // RET
                            self.push_op(MicroOp::PopLo);
                            self.push_op(MicroOp::PopHi);
                            self.push_op(MicroOp::Execute);
                        }
                        1 => {
                            // EXX
                            core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                            core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                            core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                            core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                            core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                            core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
                        }
                        2 => {
                            // JP (HL)
                            self.regs.pc = self.hl_ir();
                        }
                        _ => {
                            // LD SP, HL
                            self.regs.sp = self.hl_ir();
                            self.push_op(MicroOp::Internal(2));
                        }
                    }
                }
            }
            2 => {
                // JP cc, nn
                self.push_op(MicroOp::ReadImm);
                self.push_op(MicroOp::ReadImmHi);
                self.push_op(MicroOp::Execute);
            }
            3 => match y {
                0 => {
                    // JP nn
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                }
                2 | 3 => {
                    // OUT (n), A / IN A, (n)
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::Execute);
                }
                4 => {
                    // EX (SP), HL
                    self.addr = self.regs.sp;
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::ReadMemHi);
                    self.push_op(MicroOp::Internal(1));
                    self.push_op(MicroOp::Execute);
                }
                5 => {
                    // EX DE, HL (always the real HL, prefix or not)
                    core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                    core::mem::swap(&mut self.regs.e, &mut self.regs.l);
                }
                6 => {
                    // DI
                    self.regs.iff1 = false;
                    self.regs.iff2 = false;
                }
                _ => {
                    // EI (takes effect after the next instruction)
                    self.ei_pending = true;
                }
            },
            4 => {
                // CALL cc, nn
                self.push_op(MicroOp::ReadImm);
                self.push_op(MicroOp::ReadImmHi);
                self.push_op(MicroOp::Execute);
            }
            5 => {
                if q == 0 {
                    // PUSH rp2[p]
                    self.push_op(MicroOp::Internal(1));
                    let v = self.rp2_get(p);
                    self.push16(v);
                } else {
                    // CALL nn (prefix bytes were handled in decode_main)
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                }
            }
            6 => {
                // ALU A, n
                self.push_op(MicroOp::ReadImm);
                self.push_op(MicroOp::Execute);
            }
            _ => {
                // RST y*8
                self.push_op(MicroOp::Internal(1));
                self.push16(self.regs.pc);
                self.regs.pc = (y as u16) * 8;
                self.regs.wz = self.regs.pc;
            }
        }
    }

    fn exec_main(&mut self, stage: u8) {
        let op = self.opcode;
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        if x == 1 {
            // LD r[y], (HL/IX+d)
            self.set_r8(y, false, self.data_lo);
            return;
        }
        if x == 2 {
            // ALU A, (HL/IX+d)
            let v = self.data_lo;
            self.alu_acc(y, v);
            return;
        }
        if x == 0 {
            self.exec_x0(y, z, p, q, stage);
        } else {
            self.exec_x3(y, z, p, q, stage);
        }
    }

    fn exec_x0(&mut self, y: u8, z: u8, p: u8, q: u8, stage: u8) {
        match z {
            0 => match y {
                2 => {
                    // DJNZ d
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    if self.regs.b != 0 {
                        self.branch_relative();
                    }
                }
                3 => self.branch_relative(), // JR d
                _ => {
                    // JR cc, d
                    if self.cond(y - 4) {
                        self.branch_relative();
                    }
                }
            },
            1 => {
                // LD rp[p], nn
                let v = self.data16();
                self.rp_set(p, v);
            }
            2 => self.exec_x0_z2(p, q, stage),
            4 | 5 => {
                // INC/DEC (HL/IX+d)
                let r = if z == 4 {
                    alu::inc8(self.data_lo)
                } else {
                    alu::dec8(self.data_lo)
                };
                self.regs.f = (self.regs.f & CF) | r.flags;
                self.data_lo = r.value;
                self.push_op(MicroOp::WriteMem);
            }
            _ => {
                // LD r[y], n
                self.set_r8(y, true, self.data_lo);
            }
        }
    }

    fn exec_x0_z2(&mut self, p: u8, q: u8, stage: u8) {
        if q == 0 {
            match p {
                2 => {
                    // LD (nn), HL: address collected, queue the two writes.
                    self.addr = self.data16();
                    self.regs.wz = self.addr.wrapping_add(1);
                    let v = self.hl_ir();
                    self.data_lo = v as u8;
                    self.data_hi = (v >> 8) as u8;
                    self.push_op(MicroOp::WriteMem);
                    self.push_op(MicroOp::WriteMemHi);
                }
                3 => {
                    // LD (nn), A
                    self.addr = self.data16();
                    self.regs.wz =
                        (self.regs.a as u16) << 8 | (self.addr.wrapping_add(1) & 0xFF);
                    self.data_lo = self.regs.a;
                    self.push_op(MicroOp::WriteMem);
                }
                _ => {}
            }
        } else {
            match (p, stage) {
                (0 | 1, _) => {
                    // LD A, (BC/DE)
                    self.regs.a = self.data_lo;
                }
                (2, 0) => {
                    // LD HL, (nn): address collected, queue the two reads.
                    self.addr = self.data16();
                    self.regs.wz = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::ReadMemHi);
                    self.push_op(MicroOp::Execute);
                }
                (2, _) => {
                    let v = self.data16();
                    self.set_hl_ir(v);
                }
                (3, 0) => {
                    // LD A, (nn)
                    self.addr = self.data16();
                    self.regs.wz = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::ReadMem);
                    self.push_op(MicroOp::Execute);
                }
                (_, _) => self.regs.a = self.data_lo,
            }
        }
    }

    fn exec_x3(&mut self, y: u8, z: u8, p: u8, q: u8, stage: u8) {
        match z {
            0 => {
                // RET cc
                if stage == 0 {
                    if self.cond(y) {
                        self.push_op(MicroOp::PopLo);
                        self.push_op(MicroOp::PopHi);
                        self.push_op(MicroOp::Execute);
                    }
                } else {
                    self.jump_data16();
                }
            }
            1 => {
                if q == 0 {
                    let v = self.data16();
                    self.rp2_set(p, v);
                } else {
                    // RET
                    self.jump_data16();
                }
            }
            2 => {
                // JP cc, nn
                self.regs.wz = self.data16();
                if self.cond(y) {
                    self.regs.pc = self.regs.wz;
                }
            }
            3 => match y {
                0 => {
                    // JP nn
                    self.jump_data16();
                }
                2 => {
                    // OUT (n), A
                    self.addr = (self.regs.a as u16) << 8 | self.data_lo as u16;
                    self.regs.wz = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0xFF);
                    self.data_lo = self.regs.a;
                    self.push_op(MicroOp::WriteIo);
                }
                3 => {
                    // IN A, (n)
                    if stage == 0 {
                        self.addr = (self.regs.a as u16) << 8 | self.data_lo as u16;
                        self.regs.wz = self.addr.wrapping_add(1);
                        self.push_op(MicroOp::ReadIo);
                        self.push_op(MicroOp::Execute);
                    } else {
                        self.regs.a = self.data_lo;
                    }
                }
                _ => {
                    // EX (SP), HL
                    let old = self.hl_ir();
                    let new = self.data16();
                    self.set_hl_ir(new);
                    self.regs.wz = new;
                    self.data_lo = old as u8;
                    self.data_hi = (old >> 8) as u8;
                    self.push_op(MicroOp::WriteMemHi);
                    self.push_op(MicroOp::WriteMem);
                    self.push_op(MicroOp::Internal(2));
                }
            },
            6 => {
                // ALU A, n
                let v = self.data_lo;
                self.alu_acc(y, v);
            }
            _ => {
                // CALL cc, nn (z=4) and CALL nn (z=5, q=1)
                if stage == 0 {
                    self.regs.wz = self.data16();
                    let taken = z == 5 || self.cond(y);
                    if taken {
                        self.push_op(MicroOp::Internal(1));
                        self.push16(self.regs.pc);
                        self.push_op(MicroOp::Execute);
                    }
                } else {
                    self.regs.pc = self.regs.wz;
                }
            }
        }
    }

    fn branch_relative(&mut self) {
        self.regs.pc = self.regs.pc.wrapping_add(self.data_lo as i8 as u16);
        self.regs.wz = self.regs.pc;
        self.push_op(MicroOp::Internal(5));
    }

    fn jump_data16(&mut self) {
        self.regs.pc = self.data16();
        self.regs.wz = self.regs.pc;
    }

    // =========================================================================
    // CB-prefixed instructions
    // =========================================================================

    fn decode_cb(&mut self) {
        let op = self.opcode;
        let x = op >> 6;
        let z = op & 7;

        if self.prefix != Prefix::Hl {
            // DD CB d op: always a memory operand; `addr` was latched when
            // the displacement was read.
            self.push_op(MicroOp::Internal(2));
            self.push_op(MicroOp::ReadMem);
            self.push_op(MicroOp::Internal(1));
            self.push_op(MicroOp::Execute);
        } else if z == 6 {
            self.addr = self.regs.hl();
            self.push_op(MicroOp::ReadMem);
            self.push_op(MicroOp::Internal(1));
            self.push_op(MicroOp::Execute);
        } else {
            // Register operand: finishes within the two fetches.
            let y = (op >> 3) & 7;
            let v = self.r8(z, false);
            match x {
                0 => {
                    let r = self.rot(y, v);
                    self.set_r8(z, false, r.value);
                    self.regs.f = r.flags;
                }
                1 => self.bit_flags(y, v, v),
                2 => self.set_r8(z, false, v & !(1 << y)),
                _ => self.set_r8(z, false, v | (1 << y)),
            }
        }
    }

    fn exec_cb(&mut self) {
        let op = self.opcode;
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let v = self.data_lo;
        let indexed = self.prefix != Prefix::Hl;

        match x {
            0 => {
                let r = self.rot(y, v);
                self.regs.f = r.flags;
                self.data_lo = r.value;
                if indexed && z != 6 {
                    // Undocumented: the result is also copied to a register.
                    self.set_r8(z, false, r.value);
                }
                self.push_op(MicroOp::WriteMem);
            }
            1 => {
                // BIT y, (HL/IX+d): X/Y leak from the internal address latch.
                let xy = (self.regs.wz >> 8) as u8;
                self.bit_flags(y, v, xy);
            }
            _ => {
                let result = if x == 2 { v & !(1 << y) } else { v | (1 << y) };
                self.data_lo = result;
                if indexed && z != 6 {
                    self.set_r8(z, false, result);
                }
                self.push_op(MicroOp::WriteMem);
            }
        }
    }

    // =========================================================================
    // ED-prefixed instructions
    // =========================================================================

    fn decode_ed(&mut self) {
        let op = self.opcode;
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        if x == 1 {
            match z {
                0 => {
                    // IN r[y], (C)
                    self.addr = self.regs.bc();
                    self.regs.wz = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::ReadIo);
                    self.push_op(MicroOp::Execute);
                }
                1 => {
                    // OUT (C), r[y] (y=6 outputs 0)
                    self.addr = self.regs.bc();
                    self.regs.wz = self.addr.wrapping_add(1);
                    self.data_lo = if y == 6 { 0 } else { self.r8(y, false) };
                    self.push_op(MicroOp::WriteIo);
                }
                2 => {
                    // SBC/ADC HL, rp[p]
                    let hl = self.regs.hl();
                    let rr = match p {
                        0 => self.regs.bc(),
                        1 => self.regs.de(),
                        2 => self.regs.hl(),
                        _ => self.regs.sp,
                    };
                    self.regs.wz = hl.wrapping_add(1);
                    let carry = self.regs.f & CF;
                    let (value, flags) = if q == 0 {
                        alu::sbc16(hl, rr, carry)
                    } else {
                        alu::adc16(hl, rr, carry)
                    };
                    self.regs.set_hl(value);
                    self.regs.f = flags;
                    self.push_op(MicroOp::Internal(7));
                }
                3 => {
                    // LD (nn), rp[p] / LD rp[p], (nn)
                    self.push_op(MicroOp::ReadImm);
                    self.push_op(MicroOp::ReadImmHi);
                    self.push_op(MicroOp::Execute);
                }
                4 => {
                    // NEG
                    self.apply(alu::sub8(0, self.regs.a, 0));
                }
                5 => {
                    // RETN (and RETI at y=1); RETI additionally notifies
                    // the daisy chain.
                    self.regs.iff1 = self.regs.iff2;
                    if y == 1 {
                        self.reti_signal = true;
                    }
                    self.push_op(MicroOp::PopLo);
                    self.push_op(MicroOp::PopHi);
                    self.push_op(MicroOp::Execute);
                }
                6 => {
                    self.regs.im = IM_TABLE[y as usize];
                }
                _ => self.decode_ed_z7(y),
            }
        } else if x == 2 && z <= 3 && y >= 4 {
            self.decode_ed_block(z);
        }
        // Everything else in the ED space is a NONI/NOP.
    }

    fn decode_ed_z7(&mut self, y: u8) {
        match y {
            0 => {
                // LD I, A
                self.regs.i = self.regs.a;
                self.push_op(MicroOp::Internal(1));
            }
            1 => {
                // LD R, A
                self.regs.r = self.regs.a;
                self.push_op(MicroOp::Internal(1));
            }
            2 => {
                // LD A, I
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                self.push_op(MicroOp::Internal(1));
            }
            3 => {
                // LD A, R
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                self.push_op(MicroOp::Internal(1));
            }
            4 | 5 => {
                // RRD / RLD
                self.addr = self.regs.hl();
                self.regs.wz = self.addr.wrapping_add(1);
                self.push_op(MicroOp::ReadMem);
                self.push_op(MicroOp::Internal(4));
                self.push_op(MicroOp::Execute);
            }
            _ => {} // NOP
        }
    }

    fn decode_ed_block(&mut self, z: u8) {
        match z {
            0 | 1 => {
                // LDI/LDD/LDIR/LDDR and CPI/CPD/CPIR/CPDR read (HL) first.
                self.addr = self.regs.hl();
                self.push_op(MicroOp::ReadMem);
                if z == 1 {
                    self.push_op(MicroOp::Internal(5));
                }
                self.push_op(MicroOp::Execute);
            }
            2 => {
                // INI/IND/INIR/INDR: port read at BC, then memory write.
                self.push_op(MicroOp::Internal(1));
                self.addr = self.regs.bc();
                self.push_op(MicroOp::ReadIo);
                self.push_op(MicroOp::Execute);
            }
            _ => {
                // OUTI/OUTD/OTIR/OTDR: memory read at HL, then port write.
                self.push_op(MicroOp::Internal(1));
                self.addr = self.regs.hl();
                self.push_op(MicroOp::ReadMem);
                self.push_op(MicroOp::Execute);
            }
        }
    }

    fn exec_ed(&mut self, stage: u8) {
        let op = self.opcode;
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        if x == 1 {
            match z {
                0 => {
                    // IN r[y], (C)
                    let v = self.data_lo;
                    self.regs.f = (self.regs.f & CF) | sz53p(v);
                    if y != 6 {
                        self.set_r8(y, false, v);
                    }
                }
                3 => {
                    if stage == 0 {
                        self.addr = self.data16();
                        self.regs.wz = self.addr.wrapping_add(1);
                        if q == 0 {
                            // LD (nn), rp[p]
                            let v = match p {
                                0 => self.regs.bc(),
                                1 => self.regs.de(),
                                2 => self.regs.hl(),
                                _ => self.regs.sp,
                            };
                            self.data_lo = v as u8;
                            self.data_hi = (v >> 8) as u8;
                            self.push_op(MicroOp::WriteMem);
                            self.push_op(MicroOp::WriteMemHi);
                        } else {
                            // LD rp[p], (nn)
                            self.push_op(MicroOp::ReadMem);
                            self.push_op(MicroOp::ReadMemHi);
                            self.push_op(MicroOp::Execute);
                        }
                    } else {
                        let v = self.data16();
                        match p {
                            0 => self.regs.set_bc(v),
                            1 => self.regs.set_de(v),
                            2 => self.regs.set_hl(v),
                            _ => self.regs.sp = v,
                        }
                    }
                }
                5 => {
                    // RETN/RETI
                    self.jump_data16();
                }
                _ => {
                    // RRD/RLD (z=7, y=4/5)
                    let m = self.data_lo;
                    let a = self.regs.a;
                    let (new_a, new_m) = if y == 4 {
                        // RRD: low digit of (HL) -> A, A low -> high digit,
                        // high digit -> low digit.
                        ((a & 0xF0) | (m & 0x0F), (a << 4) | (m >> 4))
                    } else {
                        // RLD
                        ((a & 0xF0) | (m >> 4), (m << 4) | (a & 0x0F))
                    };
                    self.regs.a = new_a;
                    self.regs.f = (self.regs.f & CF) | sz53p(new_a);
                    self.data_lo = new_m;
                    self.push_op(MicroOp::WriteMem);
                }
            }
        } else {
            self.exec_ed_block(y, z, stage);
        }
    }

    fn exec_ed_block(&mut self, y: u8, z: u8, stage: u8) {
        let increment = y & 1 == 0;
        let repeat = y >= 6;
        let step: u16 = if increment { 1 } else { 0xFFFF };

        match z {
            0 => {
                // LDI/LDD family
                if stage == 0 {
                    self.addr = self.regs.de();
                    self.push_op(MicroOp::WriteMem);
                    self.push_op(MicroOp::Internal(2));
                    self.push_op(MicroOp::Execute);
                } else {
                    self.regs.set_hl(self.regs.hl().wrapping_add(step));
                    self.regs.set_de(self.regs.de().wrapping_add(step));
                    let bc = self.regs.bc().wrapping_sub(1);
                    self.regs.set_bc(bc);
                    let n = self.data_lo.wrapping_add(self.regs.a);
                    let mut f = (self.regs.f & (SF | ZF | CF)) | (n & XF) | ((n & 0x02) << 4);
                    if bc != 0 {
                        f |= PF;
                    }
                    self.regs.f = f;
                    if repeat && bc != 0 {
                        self.push_op(MicroOp::Internal(5));
                        self.regs.pc = self.regs.pc.wrapping_sub(2);
                        self.regs.wz = self.regs.pc.wrapping_add(1);
                    }
                }
            }
            1 => {
                // CPI/CPD family
                let value = self.data_lo;
                let r = alu::sub8(self.regs.a, value, 0);
                self.regs.set_hl(self.regs.hl().wrapping_add(step));
                let bc = self.regs.bc().wrapping_sub(1);
                self.regs.set_bc(bc);
                let n = self
                    .regs
                    .a
                    .wrapping_sub(value)
                    .wrapping_sub(if r.flags & HF != 0 { 1 } else { 0 });
                let mut f = (self.regs.f & CF)
                    | (r.flags & (SF | ZF | HF))
                    | NF
                    | (n & XF)
                    | ((n & 0x02) << 4);
                if bc != 0 {
                    f |= PF;
                }
                self.regs.f = f;
                self.regs.wz = self.regs.wz.wrapping_add(step);
                if repeat && bc != 0 && f & ZF == 0 {
                    self.push_op(MicroOp::Internal(5));
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    self.regs.wz = self.regs.pc.wrapping_add(1);
                }
            }
            2 => {
                // INI/IND family
                if stage == 0 {
                    self.regs.wz = self.regs.bc().wrapping_add(step);
                    self.addr = self.regs.hl();
                    self.push_op(MicroOp::WriteMem);
                    self.push_op(MicroOp::Execute);
                } else {
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    self.regs.set_hl(self.regs.hl().wrapping_add(step));
                    self.set_in_out_block_flags(self.data_lo, self.regs.c.wrapping_add(step as u8));
                    if repeat && self.regs.b != 0 {
                        self.push_op(MicroOp::Internal(5));
                        self.regs.pc = self.regs.pc.wrapping_sub(2);
                    }
                }
            }
            _ => {
                // OUTI/OUTD family
                if stage == 0 {
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    self.addr = self.regs.bc();
                    self.regs.wz = self.addr.wrapping_add(step);
                    self.push_op(MicroOp::WriteIo);
                    self.push_op(MicroOp::Execute);
                } else {
                    self.regs.set_hl(self.regs.hl().wrapping_add(step));
                    self.set_in_out_block_flags(self.data_lo, self.regs.l);
                    if repeat && self.regs.b != 0 {
                        self.push_op(MicroOp::Internal(5));
                        self.regs.pc = self.regs.pc.wrapping_sub(2);
                    }
                }
            }
        }
    }

    /// Shared flag voodoo of the INx/OUTx block instructions.
    fn set_in_out_block_flags(&mut self, value: u8, k_operand: u8) {
        let b = self.regs.b;
        let k = u16::from(value) + u16::from(k_operand);
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if k > 0xFF {
            f |= HF | CF;
        }
        f |= crate::flags::parity(((k & 7) as u8) ^ b) & PF;
        self.regs.f = f;
    }
}
