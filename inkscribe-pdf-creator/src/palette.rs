//! Ink palette
//!
//! Pen colours are a closed set so both renderers agree on the exact RGB bytes.
//! The preview blends with [`InkColor::rgb`] and the compositor emits
//! [`InkColor::pdf_rgb`], which is derived from the same table.

use serde::{Deserialize, Serialize};

/// A named pen ink.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum InkColor {
    Black,
    #[default]
    Blue,
    RoyalBlue,
    Navy,
    Red,
    Crimson,
    Green,
    Forest,
    Purple,
    Brown,
    Gray,
    Teal,
}

/// Name and RGB triple for every ink, in cycling order.
pub const PALETTE: [(InkColor, &str, [u8; 3]); 12] = [
    (InkColor::Black, "black", [0x1a, 0x1a, 0x1a]),
    (InkColor::Blue, "blue", [0x1f, 0x3a, 0x93]),
    (InkColor::RoyalBlue, "royalBlue", [0x2b, 0x59, 0xc3]),
    (InkColor::Navy, "navy", [0x0b, 0x1f, 0x4d]),
    (InkColor::Red, "red", [0xc0, 0x1c, 0x28]),
    (InkColor::Crimson, "crimson", [0x8b, 0x0a, 0x1e]),
    (InkColor::Green, "green", [0x1e, 0x7b, 0x34]),
    (InkColor::Forest, "forest", [0x14, 0x4d, 0x2a]),
    (InkColor::Purple, "purple", [0x5b, 0x2a, 0x86]),
    (InkColor::Brown, "brown", [0x6b, 0x40, 0x23]),
    (InkColor::Gray, "gray", [0x55, 0x55, 0x55]),
    (InkColor::Teal, "teal", [0x0f, 0x6e, 0x6e]),
];

impl InkColor {
    fn position(self) -> usize {
        // PALETTE is declared in enum order
        self as usize
    }

    /// The 8-bit RGB triple drawn on screen.
    pub fn rgb(self) -> [u8; 3] {
        PALETTE[self.position()].2
    }

    /// The same triple scaled to the 0.0..=1.0 range PDF `rg` operators expect.
    pub fn pdf_rgb(self) -> [f32; 3] {
        let [r, g, b] = self.rgb();
        [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
    }

    pub fn name(self) -> &'static str {
        PALETTE[self.position()].1
    }

    /// The next ink in the palette, wrapping from the last back to the first.
    pub fn next(self) -> InkColor {
        PALETTE[(self.position() + 1) % PALETTE.len()].0
    }

    /// Look an ink up by its palette name.
    pub fn from_name(name: &str) -> Option<InkColor> {
        PALETTE
            .iter()
            .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
            .map(|(ink, _, _)| *ink)
    }
}
