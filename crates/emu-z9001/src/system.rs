//! The Z9001/KC87 system: chips, bus engine and execution driver.
//!
//! Everything ticks at the 2.4576 MHz system clock. One call to `tick`
//! is one clock cycle of the whole board: the CPU first, then address
//! decode and memory, then the three peripheral chips in daisy-chain
//! priority order (PIO1, PIO2, CTC), then the beeper and the blink
//! divider. The bus word is threaded explicitly through every stage and
//! the final value is persisted as the next cycle's input — the only
//! extra state carried across cycles is the CTC channel-2 to channel-3
//! cascade bit.

use zilog_z80::Z80;
use zilog_z80::pins::{self, A0, A1, A3, A4, A5, A6, A7, IEIO, IORQ, M1, MREQ, RD, WR};
use zilog_z80_ctc::{CLKTRG3, Ctc, ZCTO0, ZCTO2};
use zilog_z80_pio::Pio;

use crate::beeper::Beeper;
use crate::config::{AudioCallback, DebugHook, Roms, Z9001Config};
use crate::keyboard::KeyboardMatrix;
use crate::keyboard_map;
use crate::memory::MemoryMap;

pub use crate::config::Model;

/// System clock frequency in Hz (the fastest East German 8-bitter).
pub const FREQUENCY: u32 = 2_457_600;

/// Framebuffer stride in pixels (bytes).
pub const FRAMEBUFFER_WIDTH: usize = 512;
/// Framebuffer height in pixels.
pub const FRAMEBUFFER_HEIGHT: usize = 192;
/// Visible display width within the framebuffer.
pub const DISPLAY_WIDTH: usize = 320;
/// Visible display height.
pub const DISPLAY_HEIGHT: usize = 192;

const FRAMEBUFFER_SIZE: usize = FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT;

/// Hard capacity of the internal audio sample buffer.
pub const MAX_AUDIO_SAMPLES: usize = 1024;
const DEFAULT_AUDIO_SAMPLES: usize = 128;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_VOLUME: f32 = 0.5;

/// Blink divider reload: the display blink runs at ~25 Hz off a /8
/// counter chain.
const BLINK_RELOAD: u32 = FREQUENCY * 8 / 25;

/// Execution entry point after power-on and reset.
const ENTRY_ADDR: u16 = 0xF000;

/// Keys stay observable for 3 frame times after release.
const KBD_STICKY_FRAMES: u32 = 3;

pub(crate) const RAM_SIZE: usize = 0x1_0000;
pub(crate) const ROM_SIZE: usize = 0x4000;
pub(crate) const FONT_SIZE: usize = 0x0800;

// I/O address decode. All three chips answer in the 0x80-0xBF port range
// (IORQ, not an interrupt acknowledge, A7 high, A6 low); each maps its
// registers twice across an 8-port window, so only A3-A5 distinguish the
// chips and A0/A1 select the register.
const IO_SEL_MASK: u64 = IORQ | M1 | A7 | A6;
const IO_SEL_PINS: u64 = IORQ | A7;
/// CTC at ports 0x80-0x87.
const CTC_SEL_MASK: u64 = IO_SEL_MASK | A5 | A4 | A3;
const CTC_SEL_PINS: u64 = IO_SEL_PINS;
/// PIO1 at ports 0x88-0x8F.
const PIO1_SEL_MASK: u64 = IO_SEL_MASK | A5 | A4 | A3;
const PIO1_SEL_PINS: u64 = IO_SEL_PINS | A3;
/// PIO2 at ports 0x90-0x97.
const PIO2_SEL_MASK: u64 = IO_SEL_MASK | A5 | A4 | A3;
const PIO2_SEL_PINS: u64 = IO_SEL_PINS | A4;

/// Audio buffering state (the callback itself lives outside, so snapshots
/// stay free of host identities).
#[derive(Debug, Clone)]
pub(crate) struct AudioState {
    pub(crate) num_samples: usize,
    pub(crate) sample_pos: usize,
    pub(crate) buffer: [f32; MAX_AUDIO_SAMPLES],
}

/// Display geometry and (for a live instance) the framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct DisplayInfo<'a> {
    /// Full framebuffer dimensions; one byte per pixel, palette-indexed.
    pub frame_width: usize,
    pub frame_height: usize,
    /// Visible window within the framebuffer, anchored at the origin.
    pub screen_width: usize,
    pub screen_height: usize,
    /// ABGR palette the pixel bytes index.
    pub palette: &'static [u32; 8],
    /// The framebuffer of a live instance; `None` for the static query.
    pub buffer: Option<&'a [u8]>,
}

/// A Z9001 or KC87 system.
pub struct Z9001 {
    pub(crate) cpu: Z80,
    pub(crate) pio1: Pio,
    pub(crate) pio2: Pio,
    pub(crate) ctc: Ctc,
    pub(crate) beeper: Beeper,
    pub(crate) model: Model,
    /// Bus word persisted between cycles.
    pub(crate) pins: u64,
    /// CTC ZC/TO2 state carried into the next cycle's CLKTRG3 — the
    /// channel 2 → channel 3 cascade is the machine's master clock
    /// divider chain.
    pub(crate) ctc_zcto2: u64,
    /// Bit 7 toggles at the blink rate and gates attribute blinking.
    pub(crate) blink_flip_flop: u8,
    pub(crate) blink_counter: u32,
    pub(crate) mem: MemoryMap,
    pub(crate) kbd: KeyboardMatrix,
    pub(crate) valid: bool,
    pub(crate) has_basic_rom: bool,
    /// Sub-microsecond tick remainder, so repeated short slices never
    /// drop cycles against one long slice.
    pub(crate) tick_accum: u64,
    pub(crate) audio: AudioState,
    pub(crate) ram: [u8; RAM_SIZE],
    pub(crate) rom: [u8; ROM_SIZE],
    /// Font ROM; feeds the video decoder only, never CPU-addressable.
    pub(crate) rom_font: [u8; FONT_SIZE],
    pub(crate) fb: [u8; FRAMEBUFFER_SIZE],

    // Host bindings; excluded from snapshots and re-bound on load.
    pub(crate) audio_callback: Option<AudioCallback>,
    pub(crate) debug: Option<DebugHook>,
}

// xorshift-filled startup RAM: deterministic garbage makes
// uninitialized-memory bugs reproducible instead of hiding them in zeros.
const RAM_FILL_SEED: u32 = 0x6D98_302B;

fn xorshift32(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

impl Z9001 {
    /// Build a machine from the configuration.
    ///
    /// # Panics
    ///
    /// ROM images of the wrong size, an oversized audio buffer request,
    /// or a debug callback without a stop flag are contract violations
    /// and panic.
    #[must_use]
    pub fn new(config: Z9001Config) -> Self {
        let model = config.roms.model();
        let mut rom = [0u8; ROM_SIZE];
        let mut rom_font = [0u8; FONT_SIZE];
        let mut has_basic_rom = false;

        match &config.roms {
            Roms::Z9001 {
                os_1,
                os_2,
                font,
                basic,
            } => {
                assert!(font.len() == FONT_SIZE, "Z9001 font ROM must be 2 KB");
                rom_font.copy_from_slice(font);
                if let Some(basic) = basic {
                    assert!(basic.len() == 0x2800, "Z9001 BASIC module ROM must be 10 KB");
                    rom[0x0000..0x2800].copy_from_slice(basic);
                    has_basic_rom = true;
                }
                assert!(os_1.len() == 0x0800, "Z9001 OS ROM 1 must be 2 KB");
                rom[0x3000..0x3800].copy_from_slice(os_1);
                assert!(os_2.len() == 0x0800, "Z9001 OS ROM 2 must be 2 KB");
                rom[0x3800..0x4000].copy_from_slice(os_2);
            }
            Roms::Kc87 { basic, os, font } => {
                assert!(font.len() == FONT_SIZE, "KC87 font ROM must be 2 KB");
                rom_font.copy_from_slice(font);
                assert!(basic.len() == 0x2000, "KC87 BASIC ROM must be 8 KB");
                rom[0x0000..0x2000].copy_from_slice(basic);
                assert!(os.len() == 0x2000, "KC87 OS ROM must be 8 KB");
                rom[0x2000..0x4000].copy_from_slice(os);
            }
        }

        // Fill RAM with deterministic pseudo-random garbage.
        let mut ram = [0u8; RAM_SIZE];
        let mut r = RAM_FILL_SEED;
        for chunk in ram.chunks_exact_mut(4) {
            r = xorshift32(r);
            chunk.copy_from_slice(&r.to_le_bytes());
        }

        /* Memory map: fixed for the lifetime of the instance.
           Z9001 ships with the 16 KB RAM module fitted (32 KB total) and
           the optional BASIC module; KC87 with 48 KB RAM and the color
           extension. Both have the 1 KB ASCII video RAM at 0xEC00 cut
           into whatever else covers that page. */
        let mut mem = MemoryMap::new();
        match model {
            Model::Z9001 => {
                mem.map_ram(0, 0x0000, 0x8000, 0x0000);
                if has_basic_rom {
                    mem.map_rom(1, 0xC000, 0x2800, 0x0000);
                }
                mem.map_rom(1, 0xF000, 0x0800, 0x3000);
                mem.map_rom(1, 0xF800, 0x0800, 0x3800);
            }
            Model::Kc87 => {
                mem.map_ram(0, 0x0000, 0xC000, 0x0000);
                // 1 KB color RAM.
                mem.map_ram(0, 0xE800, 0x0400, 0xE800);
                mem.map_rom(1, 0xC000, 0x2000, 0x0000);
                // The OS ROM covers 0xE000-0xFFFF; the video RAM window
                // below overlays one page of it.
                mem.map_rom(1, 0xE000, 0x2000, 0x2000);
            }
        }
        // 1 KB ASCII video RAM.
        mem.map_ram(0, 0xEC00, 0x0400, 0xEC00);

        let mut kbd = KeyboardMatrix::new(KBD_STICKY_FRAMES);
        keyboard_map::register_all(&mut kbd);

        let num_samples = if config.audio.num_samples == 0 {
            DEFAULT_AUDIO_SAMPLES
        } else {
            config.audio.num_samples
        };
        assert!(
            num_samples <= MAX_AUDIO_SAMPLES,
            "audio buffer request exceeds {MAX_AUDIO_SAMPLES} samples"
        );
        let sample_rate = if config.audio.sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            config.audio.sample_rate
        };
        let volume = if config.audio.volume == 0.0 {
            DEFAULT_VOLUME
        } else {
            config.audio.volume
        };

        let mut cpu = Z80::new();
        let pins = cpu.prefetch(ENTRY_ADDR);

        Self {
            cpu,
            pio1: Pio::new(),
            pio2: Pio::new(),
            ctc: Ctc::new(),
            beeper: Beeper::new(FREQUENCY, sample_rate, volume),
            model,
            pins,
            ctc_zcto2: 0,
            blink_flip_flop: 0,
            blink_counter: BLINK_RELOAD,
            mem,
            kbd,
            valid: true,
            has_basic_rom,
            tick_accum: 0,
            audio: AudioState {
                num_samples,
                sample_pos: 0,
                buffer: [0.0; MAX_AUDIO_SAMPLES],
            },
            ram,
            rom,
            rom_font,
            fb: [0; FRAMEBUFFER_SIZE],
            audio_callback: config.audio.callback,
            debug: config.debug,
        }
    }

    /// Reset CPU and chips and restart execution at the OS entry point.
    /// RAM contents and the memory map are untouched.
    pub fn reset(&mut self) {
        assert!(self.valid, "reset on a discarded instance");
        self.cpu.reset();
        self.pio1.reset();
        self.pio2.reset();
        self.ctc.reset();
        self.beeper.reset();
        self.ctc_zcto2 = 0;
        self.pins = self.cpu.prefetch(ENTRY_ADDR);
    }

    /// Mark the instance invalid. Every further operation except a fresh
    /// construction is a contract violation.
    pub fn discard(&mut self) {
        assert!(self.valid, "double discard");
        self.valid = false;
    }

    /// The machine model this instance emulates.
    #[must_use]
    pub const fn model(&self) -> Model {
        self.model
    }

    /// Reference to the CPU.
    #[must_use]
    pub const fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    /// Mutable reference to the CPU.
    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    /// One clock cycle of the whole board.
    fn tick(&mut self, pins_in: u64) -> u64 {
        let mut pins = self.cpu.tick(pins_in);

        // Memory requests: read or write, never both in one cycle.
        if pins & MREQ != 0 {
            let addr = pins::addr(pins);
            if pins & RD != 0 {
                let data = self.mem.read(&self.ram, &self.rom, addr);
                pins = pins::with_data(pins, data);
            } else if pins & WR != 0 {
                self.mem.write(&mut self.ram, addr, pins::data(pins));
            }
        }

        // PIO1, highest daisy-chain priority. Port A drives user-facing
        // control lines (display mode, border color, keyboard LED, audio
        // enable) and port B is wired to the expansion slots; neither
        // feeds back into the engine, so the ports get no inputs here.
        {
            pins |= IEIO;
            if pins & PIO1_SEL_MASK == PIO1_SEL_PINS {
                pins |= zilog_z80_pio::CE;
            }
            if pins & A0 != 0 {
                pins |= zilog_z80_pio::BASEL;
            }
            if pins & A1 != 0 {
                pins |= zilog_z80_pio::CDSEL;
            }
            pins = self.pio1.tick(pins);
            pins &= pins::PIN_MASK;
        }

        // PIO2 scans the keyboard matrix: inputs are the complemented
        // scan-out of the other axis, and the complemented outputs drive
        // the active columns/lines for the next cycle. The chip both
        // scans and drives the same matrix, closing the loop across two
        // cycles' worth of state.
        {
            if pins & PIO2_SEL_MASK == PIO2_SEL_PINS {
                pins |= zilog_z80_pio::CE;
            }
            if pins & A0 != 0 {
                pins |= zilog_z80_pio::BASEL;
            }
            if pins & A1 != 0 {
                pins |= zilog_z80_pio::CDSEL;
            }
            let pa_in = !self.kbd.scan_columns();
            let pb_in = !self.kbd.scan_lines();
            pins = zilog_z80_pio::with_ports(pins, pa_in, pb_in);
            pins = self.pio2.tick(pins);
            self.kbd.set_active_columns(!zilog_z80_pio::port_a(pins));
            self.kbd.set_active_lines(!zilog_z80_pio::port_b(pins));
            pins &= pins::PIN_MASK;
        }

        // CTC. Channel 2's ZC/TO output cascades into channel 3's
        // CLKTRG input across cycles; channel 0's terminal count is the
        // beeper frequency.
        {
            pins |= self.ctc_zcto2;
            if pins & CTC_SEL_MASK == CTC_SEL_PINS {
                pins |= zilog_z80_ctc::CE;
            }
            if pins & A0 != 0 {
                pins |= zilog_z80_ctc::CS0;
            }
            if pins & A1 != 0 {
                pins |= zilog_z80_ctc::CS1;
            }
            if pins & ZCTO2 != 0 {
                pins |= CLKTRG3;
            }
            pins = self.ctc.tick(pins);
            if pins & ZCTO0 != 0 {
                self.beeper.toggle();
            }
            self.ctc_zcto2 = pins & ZCTO2;
            pins &= pins::PIN_MASK;
        }

        // Beeper resampling; a full buffer goes to the host.
        if let Some(sample) = self.beeper.tick() {
            self.audio.buffer[self.audio.sample_pos] = sample;
            self.audio.sample_pos += 1;
            if self.audio.sample_pos == self.audio.num_samples {
                if let Some(callback) = &mut self.audio_callback {
                    callback(&self.audio.buffer[..self.audio.num_samples]);
                }
                self.audio.sample_pos = 0;
            }
        }

        // Blink divider.
        if self.blink_counter == 0 {
            self.blink_counter = BLINK_RELOAD;
            self.blink_flip_flop ^= 0x80;
        } else {
            self.blink_counter -= 1;
        }

        pins
    }

    /// Run the machine for a wall-clock duration.
    ///
    /// Returns the number of clock cycles actually executed — fewer than
    /// requested only when the debug hook's stop flag went up. After the
    /// cycle loop the keyboard stickiness ages by the elapsed time and
    /// the video decoder rebuilds the framebuffer.
    pub fn exec(&mut self, micro_seconds: u32) -> u32 {
        assert!(self.valid, "exec on a discarded instance");
        let total = u64::from(FREQUENCY) * u64::from(micro_seconds) + self.tick_accum;
        let num_ticks = (total / 1_000_000) as u32;
        self.tick_accum = total % 1_000_000;

        let mut pins = self.pins;
        let mut executed = 0;
        // The hook is taken out for the loop so it can observe the
        // machine without aliasing it.
        let mut debug = self.debug.take();
        if let Some(hook) = &mut debug {
            while executed < num_ticks && !hook.stopped.get() {
                pins = self.tick(pins);
                (hook.callback)(pins);
                executed += 1;
            }
        } else {
            while executed < num_ticks {
                pins = self.tick(pins);
                executed += 1;
            }
        }
        self.debug = debug;
        self.pins = pins;

        self.kbd.update(micro_seconds);
        self.decode_vidmem();
        executed
    }

    /// Host key-down event (machine key codes, see
    /// [`crate::keyboard_map`]).
    pub fn key_down(&mut self, key_code: u8) {
        assert!(self.valid, "key_down on a discarded instance");
        self.kbd.key_down(key_code);
    }

    /// Host key-up event.
    pub fn key_up(&mut self, key_code: u8) {
        assert!(self.valid, "key_up on a discarded instance");
        self.kbd.key_up(key_code);
    }

    /// Display geometry, palette and framebuffer.
    ///
    /// Callable with `None` to obtain the static layout before any
    /// instance exists; with a live instance the buffer is present.
    #[must_use]
    pub fn display_info(sys: Option<&Self>) -> DisplayInfo<'_> {
        DisplayInfo {
            frame_width: FRAMEBUFFER_WIDTH,
            frame_height: FRAMEBUFFER_HEIGHT,
            screen_width: DISPLAY_WIDTH,
            screen_height: DISPLAY_HEIGHT,
            palette: &crate::palette::PALETTE,
            buffer: sys.map(|sys| {
                assert!(sys.valid, "display_info on a discarded instance");
                &sys.fb[..]
            }),
        }
    }

    /// Direct RAM view (video RAM included), mainly for tests and hosts
    /// that want to peek.
    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Read a byte the way the CPU would see it.
    #[must_use]
    pub fn mem_read(&self, addr: u16) -> u8 {
        self.mem.read(&self.ram, &self.rom, addr)
    }

    /// Write a byte through the memory map (ROM absorbs it).
    pub fn mem_write(&mut self, addr: u16, value: u8) {
        self.mem.write(&mut self.ram, addr, value);
    }
}
