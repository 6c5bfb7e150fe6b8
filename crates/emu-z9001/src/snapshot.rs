//! Whole-machine snapshots.
//!
//! A snapshot is a value copy of everything the emulation owns: CPU and
//! chip state mid-instruction, RAM, ROM, framebuffer, the persisted bus
//! word and the CTC cascade bit. What it deliberately does **not** carry
//! is host identity: the audio and debug callbacks live outside the
//! snapshot, and memory-map bindings are storage offsets rather than
//! addresses, so a blob restores into any live instance — including one
//! in a different process.
//!
//! Loading is two-phase: the incoming state is staged as a complete value
//! first and only then swapped over the live machine, so a rejected or
//! half-read snapshot can never leave the instance partially restored.
//! The live host's callbacks stay bound through a load.

use std::fmt;

use zilog_z80::Z80;
use zilog_z80_ctc::Ctc;
use zilog_z80_pio::Pio;

use crate::beeper::Beeper;
use crate::config::Model;
use crate::keyboard::KeyboardMatrix;
use crate::memory::MemoryMap;
use crate::system::{AudioState, FONT_SIZE, RAM_SIZE, ROM_SIZE, Z9001};

/// Bump whenever the snapshot layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Rejected snapshot loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    /// The blob was written by a different snapshot layout.
    VersionMismatch { expected: u32, got: u32 },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { expected, got } => {
                write!(f, "snapshot version {got} does not match {expected}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// A host-independent copy of the machine state.
#[derive(Clone)]
pub struct Snapshot {
    version: u32,
    cpu: Z80,
    pio1: Pio,
    pio2: Pio,
    ctc: Ctc,
    beeper: Beeper,
    model: Model,
    pins: u64,
    ctc_zcto2: u64,
    blink_flip_flop: u8,
    blink_counter: u32,
    mem: MemoryMap,
    kbd: KeyboardMatrix,
    has_basic_rom: bool,
    tick_accum: u64,
    audio: AudioState,
    ram: Box<[u8; RAM_SIZE]>,
    rom: Box<[u8; ROM_SIZE]>,
    rom_font: Box<[u8; FONT_SIZE]>,
}

impl Snapshot {
    /// The layout version this snapshot was written with.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }
}

impl Z9001 {
    /// Capture the machine state. Returns the snapshot and its version;
    /// pass the version back to [`Z9001::load_snapshot`].
    #[must_use]
    pub fn save_snapshot(&self) -> (Snapshot, u32) {
        assert!(self.valid, "save_snapshot on a discarded instance");
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            cpu: self.cpu.clone(),
            pio1: self.pio1.clone(),
            pio2: self.pio2.clone(),
            ctc: self.ctc.clone(),
            beeper: self.beeper.clone(),
            model: self.model,
            pins: self.pins,
            ctc_zcto2: self.ctc_zcto2,
            blink_flip_flop: self.blink_flip_flop,
            blink_counter: self.blink_counter,
            mem: self.mem.clone(),
            kbd: self.kbd.clone(),
            has_basic_rom: self.has_basic_rom,
            tick_accum: self.tick_accum,
            audio: self.audio.clone(),
            ram: Box::new(self.ram),
            rom: Box::new(self.rom),
            rom_font: Box::new(self.rom_font),
        };
        (snapshot, SNAPSHOT_VERSION)
    }

    /// Restore a snapshot into this instance.
    ///
    /// The live audio and debug callbacks are retained — host identity is
    /// re-bound here, not carried in the blob. The framebuffer is rebuilt
    /// from the restored video RAM rather than copied.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::VersionMismatch`] leaves the instance completely
    /// unchanged.
    pub fn load_snapshot(&mut self, version: u32, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        assert!(self.valid, "load_snapshot on a discarded instance");
        if version != SNAPSHOT_VERSION || snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                got: if version == SNAPSHOT_VERSION {
                    snapshot.version
                } else {
                    version
                },
            });
        }

        // Stage the full incoming state, then commit field by field; the
        // clone cannot fail halfway, so the machine is never left mixed.
        let staged = snapshot.clone();
        self.cpu = staged.cpu;
        self.pio1 = staged.pio1;
        self.pio2 = staged.pio2;
        self.ctc = staged.ctc;
        self.beeper = staged.beeper;
        self.model = staged.model;
        self.pins = staged.pins;
        self.ctc_zcto2 = staged.ctc_zcto2;
        self.blink_flip_flop = staged.blink_flip_flop;
        self.blink_counter = staged.blink_counter;
        self.mem = staged.mem;
        self.kbd = staged.kbd;
        self.has_basic_rom = staged.has_basic_rom;
        self.tick_accum = staged.tick_accum;
        self.audio = staged.audio;
        self.ram = *staged.ram;
        self.rom = *staged.rom;
        self.rom_font = *staged.rom_font;
        // audio_callback and debug keep their live-host bindings.

        self.decode_vidmem();
        Ok(())
    }
}
