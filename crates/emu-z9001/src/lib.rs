//! Cycle-accurate Robotron Z9001 / KC87 emulator core.
//!
//! The Z9001 (retconned to KC85/1) was Robotron Dresden's 2.5 MHz U880
//! home computer with a 40×24 character display; the KC87 is the same
//! machine with BASIC in ROM and the color extension fitted. A U880 (Z80)
//! CPU, two PIOs and a CTC hang off one bus; PIO2 scans the keyboard
//! matrix, the CTC divides the system clock down to the blink rate and
//! the beeper frequency, and all three chips share the Z80 interrupt
//! daisy chain.
//!
//! This crate is the embeddable core only: the host drives it slice by
//! slice with [`Z9001::exec`], pulls the framebuffer via
//! [`Z9001::display_info`], and receives audio through a callback. There
//! is no windowing, rendering or audio playback here.

mod beeper;
mod config;
mod keyboard;
pub mod keyboard_map;
mod memory;
mod palette;
pub mod quickload;
mod snapshot;
mod system;
#[cfg(test)]
mod testutil;
mod video;

pub use beeper::Beeper;
pub use config::{AudioCallback, AudioConfig, DebugHook, Model, Roms, Z9001Config};
pub use keyboard::KeyboardMatrix;
pub use memory::{Backing, MemoryMap};
pub use palette::PALETTE;
pub use quickload::QuickloadError;
pub use snapshot::{SNAPSHOT_VERSION, Snapshot, SnapshotError};
pub use system::{
    DISPLAY_HEIGHT, DISPLAY_WIDTH, DisplayInfo, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH,
    FREQUENCY, MAX_AUDIO_SAMPLES, Z9001,
};
