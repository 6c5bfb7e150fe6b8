//! Machine configuration.

use std::cell::Cell;
use std::rc::Rc;

/// Supported machine models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Original Z9001: monochrome display, OS in two 2 KB ROMs, optional
    /// 10 KB BASIC module.
    Z9001,
    /// KC87: built-in BASIC, color extension.
    Kc87,
}

/// ROM images for the selected model.
///
/// The variant doubles as the model selector, so a configuration can never
/// pair KC87 ROMs with a Z9001 machine. All sizes are hard contracts,
/// checked at init.
pub enum Roms {
    Z9001 {
        /// OS part 1, 2,048 bytes (mapped at 0xF000).
        os_1: Vec<u8>,
        /// OS part 2, 2,048 bytes (mapped at 0xF800).
        os_2: Vec<u8>,
        /// Character font, 2,048 bytes (never CPU-addressable).
        font: Vec<u8>,
        /// Optional BASIC module, 10,240 bytes (mapped at 0xC000).
        basic: Option<Vec<u8>>,
    },
    Kc87 {
        /// BASIC ROM, 8,192 bytes (mapped at 0xC000).
        basic: Vec<u8>,
        /// OS ROM, 8,192 bytes (mapped at 0xE000).
        os: Vec<u8>,
        /// Character font, 2,048 bytes (never CPU-addressable).
        font: Vec<u8>,
    },
}

impl Roms {
    #[must_use]
    pub const fn model(&self) -> Model {
        match self {
            Self::Z9001 { .. } => Model::Z9001,
            Self::Kc87 { .. } => Model::Kc87,
        }
    }
}

/// Audio sample sink: called with a full buffer of mono f32 samples.
pub type AudioCallback = Box<dyn FnMut(&[f32])>;

/// Audio output configuration. Zero values fall back to the documented
/// defaults (44,100 Hz, 128 samples, volume 0.5).
pub struct AudioConfig {
    pub callback: Option<AudioCallback>,
    pub sample_rate: u32,
    /// Samples per callback invocation; capped at
    /// [`crate::MAX_AUDIO_SAMPLES`].
    pub num_samples: usize,
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            callback: None,
            sample_rate: 0,
            num_samples: 0,
            volume: 0.0,
        }
    }
}

/// Optional per-tick debug hook.
///
/// The callback runs after every tick with the post-tick bus word. The
/// `stopped` flag is owned by the host; once it reads true, `exec` returns
/// early at the next per-tick check.
pub struct DebugHook {
    pub callback: Box<dyn FnMut(u64)>,
    pub stopped: Rc<Cell<bool>>,
}

/// Configuration for [`crate::Z9001::new`].
pub struct Z9001Config {
    pub roms: Roms,
    pub audio: AudioConfig,
    pub debug: Option<DebugHook>,
}
