//! The 8-color palette of the KC87 color extension.
//!
//! Framebuffer bytes are indices into this table. The entries are packed
//! ABGR (alpha in the top byte, red in the low byte), the layout host
//! texture uploads expect. The monochrome Z9001 renders as white on black
//! using the same indices.

/// ABGR palette: 8 entries, 3-bit color index.
pub const PALETTE: [u32; 8] = [
    0xFF00_0000, // 0: black
    0xFF00_00FF, // 1: red
    0xFF00_FF00, // 2: green
    0xFF00_FFFF, // 3: yellow
    0xFFFF_0000, // 4: blue
    0xFFFF_00FF, // 5: purple
    0xFFFF_FF00, // 6: cyan
    0xFFFF_FFFF, // 7: white
];
