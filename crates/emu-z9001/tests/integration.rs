//! Whole-machine integration tests.
//!
//! Each test boots a tiny hand-assembled OS ROM at the machine's entry
//! point (0xF000) and verifies behavior end to end across the bus engine:
//! CPU, chip decode, interrupt daisy chain, keyboard loop, beeper and
//! video decoder.

#![allow(clippy::cast_possible_truncation)]

use std::cell::RefCell;
use std::rc::Rc;

use emu_z9001::{AudioConfig, Roms, Z9001, Z9001Config};

/// A KC87 whose OS ROM carries `program` at the 0xF000 entry point and
/// `font` glyph rows (all glyphs identical for simplicity).
fn kc87_with(program: &[u8], table: &[(u16, Vec<u8>)]) -> Z9001 {
    let mut os = vec![0u8; 0x2000];
    os[0x1000..0x1000 + program.len()].copy_from_slice(program);
    for (addr, bytes) in table {
        // Addresses are CPU addresses within the 0xE000-0xFFFF OS window.
        let offset = usize::from(*addr) - 0xE000;
        os[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
    Z9001::new(Z9001Config {
        roms: Roms::Kc87 {
            basic: vec![0; 0x2000],
            os,
            font: solid_font(),
        },
        audio: AudioConfig::default(),
        debug: None,
    })
}

/// A font whose every glyph is 8 solid rows (0xFF).
fn solid_font() -> Vec<u8> {
    vec![0xFF; 0x0800]
}

const DI_HALT: &[u8] = &[0xF3, 0x76];

#[test]
fn ctc_interrupt_reaches_an_im2_handler() {
    // Program the CTC channel 0 as a /16 timer with constant 10 and count
    // the resulting interrupts through the full daisy chain: terminal
    // count -> INT -> acknowledge with the channel vector -> IM 2 table
    // -> handler -> RETI retiring the service.
    let program = [
        0x31, 0x00, 0x40, // LD SP, 0x4000
        0xAF, //             XOR A
        0x32, 0x00, 0x70, // LD (0x7000), A
        0x3E, 0xF0, //       LD A, 0xF0
        0xED, 0x47, //       LD I, A
        0xED, 0x5E, //       IM 2
        0x3E, 0xE0, //       LD A, 0xE0 (CTC vector base)
        0xD3, 0x80, //       OUT (0x80), A
        0x3E, 0x85, //       LD A, EI|CONST_FOLLOWS|CONTROL (timer /16)
        0xD3, 0x80, //       OUT (0x80), A
        0x3E, 0x0A, //       LD A, 10
        0xD3, 0x80, //       OUT (0x80), A
        0xFB, //             EI
        0x18, 0xFE, //       JR -2 (spin)
    ];
    let handler = vec![
        0xE5, //             PUSH HL
        0x21, 0x00, 0x70, // LD HL, 0x7000
        0x34, //             INC (HL)
        0xE1, //             POP HL
        0xFB, //             EI
        0xED, 0x4D, //       RETI
    ];
    // IM 2 table entry: I=0xF0, vector 0xE0 -> 0xF0E0 -> handler 0xF040.
    let mut sys = kc87_with(
        &program,
        &[(0xF0E0, vec![0x40, 0xF0]), (0xF040, handler)],
    );

    // 10 ms = 24,576 cycles; a terminal count every 160 cycles gives
    // roughly 150 interrupts.
    sys.exec(10_000);
    let count = sys.ram()[0x7000];
    assert!(
        (100..=200).contains(&count),
        "expected ~150 interrupts, got {count}"
    );
}

#[test]
fn keyboard_scan_through_pio2() {
    // Port A (columns) as output driving all columns, port B (lines) as
    // input; a pressed '0' (column 0, line 0) must read back as line 0.
    let program = [
        0x3E, 0x0F, //       LD A, mode 0 (output)
        0xD3, 0x92, //       OUT (0x92), A  (PIO2 control A)
        0x3E, 0x4F, //       LD A, mode 1 (input)
        0xD3, 0x93, //       OUT (0x93), A  (PIO2 control B)
        0xAF, //             XOR A          (all columns active low)
        0xD3, 0x90, //       OUT (0x90), A  (PIO2 data A)
        0x00, 0x00, //       NOP; NOP       (let the loop settle)
        0xDB, 0x91, //       IN A, (0x91)   (PIO2 data B)
        0x2F, //             CPL            (active low -> 1 = pressed)
        0x32, 0x00, 0x70, // LD (0x7000), A
        0x76, //             HALT
    ];
    let mut sys = kc87_with(&program, &[]);
    sys.key_down(b'0');
    sys.exec(1_000);
    assert_eq!(sys.ram()[0x7000], 0x01, "line 0 reads as pressed");

    // Release and let the sticky time pass; a rerun sees nothing.
    sys.key_up(b'0');
    sys.exec(100_000);
    sys.reset();
    sys.exec(1_000);
    assert_eq!(sys.ram()[0x7000], 0x00, "matrix idle after release");
}

#[test]
fn ctc_terminal_count_drives_the_beeper() {
    // CTC channel 0 as a /16 timer, constant 10: the beeper toggles every
    // 160 cycles (~7.7 kHz) and the audio stream carries both polarities.
    let program = [
        0x3E, 0x05, // LD A, CONST_FOLLOWS|CONTROL
        0xD3, 0x80, // OUT (0x80), A
        0x3E, 0x0A, // LD A, 10
        0xD3, 0x80, // OUT (0x80), A
        0x76, //       HALT
    ];
    let samples = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&samples);

    let mut os = vec![0u8; 0x2000];
    os[0x1000..0x1000 + program.len()].copy_from_slice(&program);
    let mut sys = Z9001::new(Z9001Config {
        roms: Roms::Kc87 {
            basic: vec![0; 0x2000],
            os,
            font: solid_font(),
        },
        audio: AudioConfig {
            callback: Some(Box::new(move |buffer| {
                sink.borrow_mut().extend_from_slice(buffer);
            })),
            sample_rate: 0,
            num_samples: 0,
            volume: 0.0,
        },
        debug: None,
    });

    sys.exec(200_000);
    let samples = samples.borrow();
    assert!(samples.len() > 8000, "200 ms of audio was delivered");
    assert!(samples.iter().any(|&s| s > 0.0), "speaker went high");
    assert!(samples.iter().any(|&s| s < 0.0), "speaker went low");
}

#[test]
fn video_decoder_renders_characters_and_attributes() {
    let mut sys = kc87_with(DI_HALT, &[]);
    // 'A' at the top-left character cell, green on purple.
    sys.mem_write(0xEC00, b'A');
    sys.mem_write(0xE800, 0x25);
    // Blank the neighbour cell's attribute for contrast.
    sys.mem_write(0xEC01, b' ');
    sys.mem_write(0xE801, 0x00);
    sys.exec(1_000);

    let info = Z9001::display_info(Some(&sys));
    let fb = info.buffer.expect("live instance has a framebuffer");
    // Solid font: all 8 pixels of the first cell are foreground (2).
    assert_eq!(&fb[0..8], &[2; 8]);
    // Second cell: solid glyph in black-on-black.
    assert_eq!(&fb[8..16], &[0; 8]);
}

#[test]
fn video_decode_is_deterministic_and_idempotent() {
    let mut sys = kc87_with(DI_HALT, &[]);
    sys.mem_write(0xEC00, b'X');
    sys.mem_write(0xE800, 0x52);
    sys.exec(0);
    let first: Vec<u8> = Z9001::display_info(Some(&sys))
        .buffer
        .expect("framebuffer")
        .to_vec();
    sys.exec(0);
    let second: Vec<u8> = Z9001::display_info(Some(&sys))
        .buffer
        .expect("framebuffer")
        .to_vec();
    assert_eq!(first, second);
}

#[test]
fn blink_attribute_swaps_colors_when_the_flip_flop_is_high() {
    let mut sys = kc87_with(DI_HALT, &[]);
    // Blink bit set, foreground green (2), background purple (5).
    sys.mem_write(0xEC00, b'A');
    sys.mem_write(0xE800, 0x80 | 0x25);
    sys.exec(1_000);
    let before = Z9001::display_info(Some(&sys)).buffer.expect("fb")[0];
    assert_eq!(before, 2, "foreground before the blink flips");

    // The blink flip-flop toggles at ~25 Hz; run far enough past one
    // reload period.
    sys.exec(330_000);
    let after = Z9001::display_info(Some(&sys)).buffer.expect("fb")[0];
    assert_eq!(after, 5, "foreground and background swapped");
}

#[test]
fn monochrome_model_uses_fixed_colors() {
    let mut sys = Z9001::new(Z9001Config {
        roms: Roms::Z9001 {
            os_1: {
                let mut os = vec![0u8; 0x0800];
                os[..2].copy_from_slice(DI_HALT);
                os
            },
            os_2: vec![0; 0x0800],
            font: solid_font(),
            basic: None,
        },
        audio: AudioConfig::default(),
        debug: None,
    });
    sys.mem_write(0xEC00, b'A');
    sys.exec(1_000);
    let fb = Z9001::display_info(Some(&sys)).buffer.expect("fb");
    assert_eq!(&fb[0..8], &[7; 8], "white on black");
}

#[test]
fn display_info_answers_without_an_instance() {
    let info = Z9001::display_info(None);
    assert_eq!(info.frame_width, 512);
    assert_eq!(info.frame_height, 192);
    assert_eq!(info.screen_width, 320);
    assert_eq!(info.screen_height, 192);
    assert!(info.buffer.is_none(), "no buffer without an instance");
    assert_eq!(info.palette.len(), 8);
}

#[test]
fn split_execution_matches_one_shot_execution() {
    let mut whole = kc87_with(DI_HALT, &[]);
    let mut split = kc87_with(DI_HALT, &[]);
    let a = whole.exec(100_000);
    let b: u32 = (0..10).map(|_| split.exec(10_000)).sum();
    assert_eq!(a, b);
    assert_eq!(whole.cpu().regs.pc, split.cpu().regs.pc);
}

#[test]
fn quickload_then_execute_runs_the_payload() {
    // KC TAP image whose payload is executable code: LD A,0x99; HALT.
    let mut sys = kc87_with(DI_HALT, &[]);
    let mut image = Vec::new();
    image.extend_from_slice(&[
        0xC3, b'K', b'C', b'-', b'T', b'A', b'P', b'E', 0x20, b'b', b'y', 0x20, b'A', b'F', b'.',
        0x20,
    ]);
    image.push(0x00); // type byte
    let mut header = vec![0u8; 128];
    header[..4].copy_from_slice(b"PROG");
    header[16] = 3; // load, end and exec addresses all present
    header[17] = 0x00; // load 0x0300
    header[18] = 0x03;
    header[19] = 0x80; // end 0x0380
    header[20] = 0x03;
    header[21] = 0x00; // exec 0x0300
    header[22] = 0x03;
    image.extend_from_slice(&header);
    let mut block = vec![0x01]; // lead byte
    block.extend_from_slice(&[0x3E, 0x99, 0x76]); // LD A,0x99; HALT
    block.resize(129, 0x00);
    image.extend_from_slice(&block);

    sys.quickload(&image).expect("valid KC TAP");
    assert_eq!(sys.cpu().regs.pc, 0x0300);
    sys.exec(1_000);
    assert_eq!(sys.cpu().regs.a, 0x99);
    assert!(sys.cpu().is_halted());
}
