//! The Z9001/KC87 key layout.
//!
//! Alphanumeric keys are laid out in two 8×8 blocks (unshifted and
//! shifted); control keys sit on dedicated crossings. Host key codes are
//! the machine's own ASCII-ish codes, so `b'A'` is the unshifted A key
//! and `b'a'` the shifted one — the machine predates lowercase-first
//! keyboards.

use crate::keyboard::KeyboardMatrix;

/// 8 lines × 8 columns, unshifted block then shifted block. A space means
/// "no key at this crossing".
#[rustfmt::skip]
const KEYMAP: &[u8; 128] = b"\
01234567\
89:;,=.?\
@ABCDEFG\
HIJKLMNO\
PQRSTUVW\
XYZ   ^ \
\x20\x20\x20\x20\x20\x20\x20\x20\
\x20\x20\x20\x20\x20\x20\x20\x20\
_!\"#$%&'\
()*+<->/\
\x20abcdefg\
hijklmno\
pqrstuvw\
xyz     \
\x20\x20\x20\x20\x20\x20\x20\x20\
\x20\x20\x20\x20\x20\x20\x20\x20";

/// Control keys: (code, column, line).
const SPECIAL_KEYS: &[(u8, u8, u8)] = &[
    (0x03, 6, 6), // stop (Esc)
    (0x08, 0, 6), // cursor left
    (0x09, 1, 6), // cursor right
    (0x0A, 2, 6), // cursor up
    (0x0B, 3, 6), // cursor down
    (0x0D, 5, 6), // enter
    (0x13, 4, 5), // pause
    (0x14, 1, 7), // color
    (0x19, 3, 5), // home
    (0x1A, 5, 5), // insert
    (0x1B, 4, 6), // esc (Shift+Esc)
    (0x1C, 4, 7), // list
    (0x1D, 5, 7), // run
    (0x20, 7, 6), // space
];

/// Register the full Z9001/KC87 layout on a matrix.
pub fn register_all(kbd: &mut KeyboardMatrix) {
    for shift in 0..2u8 {
        for line in 0..8u8 {
            for column in 0..8u8 {
                let code = KEYMAP[(shift * 64 + line * 8 + column) as usize];
                if code != 0x20 {
                    kbd.register_key(code, column, line, shift != 0);
                }
            }
        }
    }
    for &(code, column, line) in SPECIAL_KEYS {
        kbd.register_key(code, column, line, false);
    }
}
