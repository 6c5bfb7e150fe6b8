//! Small hand-assembled programs run through the pin-level protocol.
//!
//! The test board is the minimal system: 64 KB flat RAM, 256 I/O ports,
//! and a loop that services exactly the bus requests the CPU asserts.

#![allow(clippy::cast_possible_truncation)]

use zilog_z80::pins::{self, HALT, INT, IORQ, M1, MREQ, RD, WR};
use zilog_z80::{CF, Z80, ZF};

struct TestBoard {
    ram: Vec<u8>,
    io: Vec<u8>,
    /// Keep INT asserted (a device would re-assert it every tick).
    assert_int: bool,
    /// Vector placed on the bus during interrupt acknowledge.
    int_vector: u8,
}

impl TestBoard {
    fn new() -> Self {
        Self {
            ram: vec![0; 0x1_0000],
            io: vec![0; 256],
            assert_int: false,
            int_vector: 0,
        }
    }

    fn load(&mut self, addr: u16, bytes: &[u8]) {
        let addr = addr as usize;
        self.ram[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    /// One board tick: CPU first, then bus request service.
    fn tick(&mut self, cpu: &mut Z80, mut pins: u64) -> u64 {
        if self.assert_int {
            pins |= INT;
        }
        pins = cpu.tick(pins);
        if pins & MREQ != 0 {
            let addr = pins::addr(pins) as usize;
            if pins & RD != 0 {
                pins = pins::with_data(pins, self.ram[addr]);
            } else if pins & WR != 0 {
                self.ram[addr] = pins::data(pins);
            }
        } else if pins & (M1 | IORQ) == M1 | IORQ {
            pins = pins::with_data(pins, self.int_vector);
        } else if pins & IORQ != 0 {
            let port = (pins::addr(pins) & 0xFF) as usize;
            if pins & RD != 0 {
                pins = pins::with_data(pins, self.io[port]);
            } else if pins & WR != 0 {
                self.io[port] = pins::data(pins);
            }
        }
        pins
    }

    /// Run until HALT or the tick budget runs out; returns ticks used.
    fn run_until_halt(&mut self, cpu: &mut Z80, mut pins: u64, max_ticks: u32) -> u32 {
        for tick in 0..max_ticks {
            pins = self.tick(cpu, pins);
            if pins & HALT != 0 {
                return tick + 1;
            }
        }
        panic!("program did not halt within {max_ticks} ticks");
    }

    fn run_ticks(&mut self, cpu: &mut Z80, mut pins: u64, ticks: u32) -> u64 {
        for _ in 0..ticks {
            pins = self.tick(cpu, pins);
        }
        pins
    }
}

fn boot(board: &mut TestBoard, program: &[u8]) -> (Z80, u64) {
    board.load(0x0100, program);
    let mut cpu = Z80::new();
    let pins = cpu.prefetch(0x0100);
    (cpu, pins)
}

#[test]
fn immediate_loads_and_addition() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x3E, 0x15, // LD A, 0x15
            0x06, 0x27, // LD B, 0x27
            0x80, //       ADD A, B
            0x76, //       HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 100);
    assert_eq!(cpu.regs.a, 0x3C);
    assert_eq!(cpu.regs.f & CF, 0);
}

#[test]
fn nop_takes_four_ticks() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(&mut board, &[0x00, 0x00, 0x00]);
    board.run_ticks(&mut cpu, pins, 8);
    // Two complete fetches: PC advanced past the third opcode's fetch
    // start would need tick 9.
    assert_eq!(cpu.regs.pc, 0x0102);
}

#[test]
fn memory_write_and_readback() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x21, 0x00, 0x90, // LD HL, 0x9000
            0x36, 0xAB, //       LD (HL), 0xAB
            0x7E, //             LD A, (HL)
            0x76, //             HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 100);
    assert_eq!(board.ram[0x9000], 0xAB);
    assert_eq!(cpu.regs.a, 0xAB);
}

#[test]
fn call_and_return_balance_the_stack() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x31, 0x00, 0x80, // LD SP, 0x8000
            0xCD, 0x00, 0x02, // CALL 0x0200
            0x76, //             HALT
        ],
    );
    board.load(
        0x0200,
        &[
            0x3E, 0x42, // LD A, 0x42
            0xC9, //       RET
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.a, 0x42);
    assert_eq!(cpu.regs.sp, 0x8000);
    assert_eq!(cpu.regs.pc, 0x0107, "halted after the CALL site");
}

#[test]
fn djnz_counts_down() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0xAF, //       XOR A
            0x06, 0x05, // LD B, 5
            0x3C, //       INC A      <- loop
            0x10, 0xFD, // DJNZ -3
            0x76, //       HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 500);
    assert_eq!(cpu.regs.a, 5);
    assert_eq!(cpu.regs.b, 0);
}

#[test]
fn conditional_jump_on_zero() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x3E, 0x01, //       LD A, 1
            0x3D, //             DEC A
            0xCA, 0x08, 0x01, // JP Z, 0x0108
            0x06, 0xFF, //       LD B, 0xFF (skipped)
            0x06, 0x11, //       LD B, 0x11 <- 0x0108
            0x76, //             HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert!(cpu.regs.f & ZF != 0);
    assert_eq!(cpu.regs.b, 0x11);
}

#[test]
fn indexed_addressing_with_displacement() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0xDD, 0x21, 0x00, 0x90, // LD IX, 0x9000
            0xDD, 0x36, 0x03, 0xAB, // LD (IX+3), 0xAB
            0xDD, 0x7E, 0x03, //       LD A, (IX+3)
            0xDD, 0x46, 0xFF, //       LD B, (IX-1)
            0x76, //                   HALT
        ],
    );
    board.ram[0x8FFF] = 0x55;
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(board.ram[0x9003], 0xAB);
    assert_eq!(cpu.regs.a, 0xAB);
    assert_eq!(cpu.regs.b, 0x55);
}

#[test]
fn block_copy_with_ldir() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x21, 0x00, 0x20, // LD HL, 0x2000
            0x11, 0x00, 0x30, // LD DE, 0x3000
            0x01, 0x04, 0x00, // LD BC, 4
            0xED, 0xB0, //       LDIR
            0x76, //             HALT
        ],
    );
    board.load(0x2000, &[0xDE, 0xAD, 0xBE, 0xEF]);
    board.run_until_halt(&mut cpu, pins, 500);
    assert_eq!(&board.ram[0x3000..0x3004], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(cpu.regs.bc(), 0);
    assert_eq!(cpu.regs.hl(), 0x2004);
    assert_eq!(cpu.regs.de(), 0x3004);
}

#[test]
fn io_ports_roundtrip() {
    let mut board = TestBoard::new();
    board.io[0x43] = 0x99;
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x3E, 0x5A, // LD A, 0x5A
            0xD3, 0x42, // OUT (0x42), A
            0xDB, 0x43, // IN A, (0x43)
            0x76, //       HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(board.io[0x42], 0x5A);
    assert_eq!(cpu.regs.a, 0x99);
}

#[test]
fn bit_operations_on_registers_and_memory() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x3E, 0x01, //       LD A, 1
            0xCB, 0x27, //       SLA A
            0x21, 0x00, 0x90, // LD HL, 0x9000
            0xCB, 0xC6, //       SET 0, (HL)
            0xCB, 0x46, //       BIT 0, (HL)
            0x76, //             HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.a, 0x02);
    assert_eq!(board.ram[0x9000], 0x01);
    assert!(cpu.regs.f & ZF == 0, "BIT found the bit set");
}

#[test]
fn exchange_and_alternate_registers() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x01, 0x11, 0x11, // LD BC, 0x1111
            0xD9, //             EXX
            0x01, 0x22, 0x22, // LD BC, 0x2222
            0xD9, //             EXX
            0x76, //             HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.bc(), 0x1111);
    assert_eq!(cpu.regs.b_alt, 0x22);
}

#[test]
fn im2_interrupt_vectors_through_table() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x31, 0x00, 0x80, // LD SP, 0x8000
            0x3E, 0x20, //       LD A, 0x20
            0xED, 0x47, //       LD I, A
            0xED, 0x5E, //       IM 2
            0xFB, //             EI
            0x18, 0xFE, //       JR -2 (spin)
        ],
    );
    // Vector table entry at 0x2010 -> handler at 0x3000.
    board.load(0x2010, &[0x00, 0x30]);
    board.load(
        0x3000,
        &[
            0x3E, 0x55, // LD A, 0x55
            0x76, //       HALT
        ],
    );
    board.int_vector = 0x10;

    // Let the setup run, then raise INT.
    let pins = board.run_ticks(&mut cpu, pins, 60);
    board.assert_int = true;
    board.run_until_halt(&mut cpu, pins, 500);
    assert_eq!(cpu.regs.a, 0x55);
    assert!(!cpu.regs.iff1, "acceptance clears IFF1");
    // The spin loop's address was pushed for the handler's RETI.
    assert_eq!(cpu.regs.sp, 0x7FFE);
}

#[test]
fn interrupt_ignored_while_disabled() {
    let mut board = TestBoard::new();
    board.assert_int = true;
    board.int_vector = 0x10;
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0xF3, //       DI
            0x06, 0x07, // LD B, 7
            0x76, //       HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.b, 7, "program ran to completion despite INT");
}

#[test]
fn halt_wakes_on_interrupt() {
    let mut board = TestBoard::new();
    board.int_vector = 0x10;
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x31, 0x00, 0x80, // LD SP, 0x8000
            0xED, 0x56, //       IM 1
            0xFB, //             EI
            0x76, //             HALT
        ],
    );
    board.load(
        0x0038,
        &[
            0x3E, 0x77, // LD A, 0x77
            0x76, //       HALT
        ],
    );
    let mut pins = board.run_ticks(&mut cpu, pins, 60);
    assert!(cpu.is_halted());
    board.assert_int = true;
    for _ in 0..200 {
        pins = board.tick(&mut cpu, pins);
        if !cpu.is_halted() {
            break;
        }
    }
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.a, 0x77, "IM 1 handler at 0x38 ran");
}

#[test]
fn daa_adjusts_bcd_addition() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x3E, 0x15, // LD A, 0x15
            0xC6, 0x27, // ADD A, 0x27
            0x27, //       DAA
            0x76, //       HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 100);
    assert_eq!(cpu.regs.a, 0x42);
}

#[test]
fn sixteen_bit_arithmetic_and_stack_ops() {
    let mut board = TestBoard::new();
    let (mut cpu, pins) = boot(
        &mut board,
        &[
            0x31, 0x00, 0x80, // LD SP, 0x8000
            0x21, 0x34, 0x12, // LD HL, 0x1234
            0x01, 0x11, 0x11, // LD BC, 0x1111
            0x09, //             ADD HL, BC
            0xE5, //             PUSH HL
            0xD1, //             POP DE
            0x76, //             HALT
        ],
    );
    board.run_until_halt(&mut cpu, pins, 200);
    assert_eq!(cpu.regs.hl(), 0x2345);
    assert_eq!(cpu.regs.de(), 0x2345);
    assert_eq!(cpu.regs.sp, 0x8000);
}
