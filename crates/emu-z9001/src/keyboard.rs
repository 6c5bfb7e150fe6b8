//! 8×8 keyboard matrix with sticky keys.
//!
//! The Z9001 keyboard is a passive matrix: PIO2 port A drives/reads the
//! eight columns and port B the eight lines, both active low at the chip
//! (the complementing happens in the bus engine). The scanning OS routine
//! selects a set of columns or lines and reads back the crossing keys from
//! the other axis — both directions are used, which is why the matrix
//! keeps an active mask per axis.
//!
//! A host key event can easily be shorter than the OS scan interval, so a
//! released key stays "sticky" for a few frame times and is only removed
//! once the scanner has had a chance to see it.

/// At most this many simultaneous host keys are tracked.
const MAX_PRESSED: usize = 4;

/// One 50 Hz frame in microseconds, the unit of stickiness.
const FRAME_US: u32 = 20_000;

/// The shift key sits at column 0, line 7.
const SHIFT_COLUMN: u8 = 0;
const SHIFT_LINE: u8 = 7;

/// Grid bit for a column/line crossing.
const fn crossing(column: u8, line: u8) -> u64 {
    1 << (line * 8 + column)
}

#[derive(Debug, Clone, Copy, Default)]
struct PressedKey {
    /// Key code; 0 marks a free slot.
    code: u8,
    /// Matrix crossings this key closes (including its shift modifier).
    mask: u64,
    /// Time since key-down.
    age_us: u32,
    /// Host released the key; it expires once the sticky time is up.
    released: bool,
}

/// Keyboard matrix state.
#[derive(Debug, Clone)]
pub struct KeyboardMatrix {
    /// Registered crossings per key code (0 = unregistered).
    masks: [u64; 256],
    pressed: [PressedKey; MAX_PRESSED],
    active_columns: u8,
    active_lines: u8,
    sticky_us: u32,
}

impl KeyboardMatrix {
    /// `sticky_frames` is how many frame times a key stays observable
    /// after the host releases it.
    #[must_use]
    pub fn new(sticky_frames: u32) -> Self {
        Self {
            masks: [0; 256],
            pressed: [PressedKey::default(); MAX_PRESSED],
            active_columns: 0,
            active_lines: 0,
            sticky_us: sticky_frames * FRAME_US,
        }
    }

    /// Register a key code at a matrix crossing. `shift` additionally
    /// closes the shift key's crossing while the key is down.
    pub fn register_key(&mut self, code: u8, column: u8, line: u8, shift: bool) {
        assert!(column < 8 && line < 8, "matrix position out of range");
        let mut mask = crossing(column, line);
        if shift {
            mask |= crossing(SHIFT_COLUMN, SHIFT_LINE);
        }
        self.masks[code as usize] = mask;
    }

    /// Host key-down event. Unregistered codes are ignored.
    pub fn key_down(&mut self, code: u8) {
        let mask = self.masks[code as usize];
        if mask == 0 {
            return;
        }
        // Re-press refreshes the existing slot.
        if let Some(slot) = self.pressed.iter_mut().find(|slot| slot.code == code) {
            slot.released = false;
            slot.age_us = 0;
            return;
        }
        if let Some(slot) = self.pressed.iter_mut().find(|slot| slot.code == 0) {
            *slot = PressedKey {
                code,
                mask,
                age_us: 0,
                released: false,
            };
        }
    }

    /// Host key-up event. The key lingers until its sticky time expires.
    pub fn key_up(&mut self, code: u8) {
        for slot in &mut self.pressed {
            if slot.code == code {
                if slot.age_us >= self.sticky_us {
                    *slot = PressedKey::default();
                } else {
                    slot.released = true;
                }
            }
        }
    }

    /// Age the sticky state by the elapsed real time.
    pub fn update(&mut self, elapsed_us: u32) {
        for slot in &mut self.pressed {
            if slot.code == 0 {
                continue;
            }
            slot.age_us = slot.age_us.saturating_add(elapsed_us);
            if slot.released && slot.age_us >= self.sticky_us {
                *slot = PressedKey::default();
            }
        }
    }

    /// Select which columns the scanner currently drives.
    pub fn set_active_columns(&mut self, columns: u8) {
        self.active_columns = columns;
    }

    /// Select which lines the scanner currently drives.
    pub fn set_active_lines(&mut self, lines: u8) {
        self.active_lines = lines;
    }

    fn grid(&self) -> u64 {
        self.pressed.iter().map(|slot| slot.mask).fold(0, |a, b| a | b)
    }

    /// Columns closed by pressed keys on the active lines.
    #[must_use]
    pub fn scan_columns(&self) -> u8 {
        let grid = self.grid();
        let mut columns = 0;
        for line in 0..8 {
            if self.active_lines & (1 << line) != 0 {
                columns |= (grid >> (line * 8)) as u8;
            }
        }
        columns
    }

    /// Lines closed by pressed keys on the active columns.
    #[must_use]
    pub fn scan_lines(&self) -> u8 {
        let grid = self.grid();
        let mut lines = 0;
        for line in 0..8 {
            if (grid >> (line * 8)) as u8 & self.active_columns != 0 {
                lines |= 1 << line;
            }
        }
        lines
    }
}
