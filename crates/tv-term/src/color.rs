// SPDX-License-Identifier: MIT
//
// Colour model: what the application *wants* a cell to look like.
//
// A `DesiredColour` is one of four tagged forms: the terminal default, a
// legacy 4-bit BIOS index, an xterm 256-palette index, or 24-bit RGB. The
// value records intent only. Mapping it to something a particular terminal
// can display is the job of `convert`, which knows the output capability.
//
// BIOS order is the CGA/VGA text-mode order (1 = blue, 4 = red), not the
// ANSI wire order (1 = red, 4 = blue). The two differ by swapping bits 0
// and 2, so the same table converts in both directions.
//
// A `ColourAttribute` bundles foreground, background and style bits. The
// packed "BIOS byte" form (low nibble fg, high nibble bg) survives because
// a lot of palette data is still authored that way.

use crate::convert;

// ─── BIOS Palette ────────────────────────────────────────────────────────────

/// Map a BIOS colour index (0–15) to its ANSI/xterm index and back.
///
/// Self-inverse: `BIOS_TO_XTERM[BIOS_TO_XTERM[i]] == i`.
pub const BIOS_TO_XTERM: [u8; 16] = [0, 4, 2, 6, 1, 5, 3, 7, 8, 12, 10, 14, 9, 13, 11, 15];

/// Packed attribute returned when an attribute has no BIOS form
/// (light gray on black).
pub const BIOS_FALLBACK: u8 = 0x07;

/// BIOS index the default foreground downconverts to (light gray).
pub const DEFAULT_FG_BIOS: u8 = 0x07;

/// BIOS index the default background downconverts to (black).
pub const DEFAULT_BG_BIOS: u8 = 0x00;

/// Convert a BIOS index to the ANSI/xterm palette index of the same colour.
#[inline]
#[must_use]
pub const fn bios_to_xterm(idx: u8) -> u8 {
    BIOS_TO_XTERM[(idx & 0x0F) as usize]
}

// ─── DesiredColour ───────────────────────────────────────────────────────────

/// A colour as requested by the application.
///
/// Exactly one representation is active. Every operation dispatches on the
/// tag; there is no implicit widening between forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DesiredColour {
    /// Whatever the terminal's default foreground/background is.
    #[default]
    Default,
    /// Legacy 16-colour index in BIOS order (0–7 normal, 8–15 bright).
    Bios(u8),
    /// Index into the xterm 256-colour palette.
    Xterm(u8),
    /// 24-bit colour.
    Rgb(u8, u8, u8),
}

impl DesiredColour {
    /// A BIOS colour. Only the low nibble is kept.
    #[inline]
    #[must_use]
    pub const fn from_bios(idx: u8) -> Self {
        Self::Bios(idx & 0x0F)
    }

    /// An xterm 256-palette colour.
    #[inline]
    #[must_use]
    pub const fn from_xterm(idx: u8) -> Self {
        Self::Xterm(idx)
    }

    /// A 24-bit colour.
    #[inline]
    #[must_use]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self::Rgb(r, g, b)
    }

    #[inline]
    #[must_use]
    pub const fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }

    #[inline]
    #[must_use]
    pub const fn is_bios(self) -> bool {
        matches!(self, Self::Bios(_))
    }

    #[inline]
    #[must_use]
    pub const fn is_xterm(self) -> bool {
        matches!(self, Self::Xterm(_))
    }

    #[inline]
    #[must_use]
    pub const fn is_rgb(self) -> bool {
        matches!(self, Self::Rgb(..))
    }

    /// Lossy downconversion to a BIOS index. Never fails.
    ///
    /// The default colour has no index of its own, so it resolves to the
    /// classic text-mode pair: light gray for foreground, black for
    /// background.
    #[must_use]
    pub const fn to_bios(self, is_foreground: bool) -> u8 {
        match self {
            Self::Default => {
                if is_foreground {
                    DEFAULT_FG_BIOS
                } else {
                    DEFAULT_BG_BIOS
                }
            }
            Self::Bios(idx) => idx & 0x0F,
            Self::Xterm(idx) => convert::xterm_to_bios(idx),
            Self::Rgb(r, g, b) => convert::rgb_to_bios(r, g, b),
        }
    }
}

// ─── Style ───────────────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Text style bits carried alongside the colours of an attribute.
    ///
    /// ```
    /// use tv_term::color::Style;
    ///
    /// let s = Style::BOLD | Style::UNDERLINE;
    /// assert!(s.contains(Style::BOLD));
    /// assert!(!s.contains(Style::REVERSE));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Style: u8 {
        const BOLD      = 1 << 0;
        const ITALIC    = 1 << 1;
        const UNDERLINE = 1 << 2;
        const BLINK     = 1 << 3;
        const REVERSE   = 1 << 4;
        const STRIKE    = 1 << 5;
        /// SGR 8. Text is drawn in the background colour.
        const HIDDEN    = 1 << 6;
    }
}

// ─── ColourAttribute ─────────────────────────────────────────────────────────

/// Foreground, background and style of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColourAttribute {
    pub fg: DesiredColour,
    pub bg: DesiredColour,
    pub style: Style,
}

impl ColourAttribute {
    /// Terminal-default colours, no style.
    pub const DEFAULT: Self = Self::new(DesiredColour::Default, DesiredColour::Default, Style::empty());

    #[inline]
    #[must_use]
    pub const fn new(fg: DesiredColour, bg: DesiredColour, style: Style) -> Self {
        Self { fg, bg, style }
    }

    /// Unpack a BIOS attribute byte: low nibble foreground, high nibble
    /// background, no style.
    #[inline]
    #[must_use]
    pub const fn from_bios(byte: u8) -> Self {
        Self::new(
            DesiredColour::from_bios(byte & 0x0F),
            DesiredColour::from_bios(byte >> 4),
            Style::empty(),
        )
    }

    /// The packed BIOS byte, if this attribute has one.
    ///
    /// Only attributes whose colours are both BIOS indices and whose style
    /// is empty are representable. Anything else yields [`BIOS_FALLBACK`].
    #[must_use]
    pub const fn as_bios(self) -> u8 {
        match (self.fg, self.bg) {
            (DesiredColour::Bios(fg), DesiredColour::Bios(bg)) if self.style.is_empty() => {
                (fg & 0x0F) | ((bg & 0x0F) << 4)
            }
            _ => BIOS_FALLBACK,
        }
    }

    /// Force a packed BIOS byte out of any attribute. Style is dropped.
    #[must_use]
    pub const fn to_bios(self) -> u8 {
        self.fg.to_bios(true) | (self.bg.to_bios(false) << 4)
    }

    /// Whether [`as_bios`](Self::as_bios) would return the real byte.
    #[inline]
    #[must_use]
    pub const fn is_bios_representable(self) -> bool {
        self.fg.is_bios() && self.bg.is_bios() && self.style.is_empty()
    }

    /// The same attribute with foreground and background exchanged.
    ///
    /// Default colours swap as well. On most terminals `39;49` reversed
    /// shows nothing, so a default pair is resolved through its BIOS
    /// fallback first.
    #[must_use]
    pub const fn swapped(self) -> Self {
        let fg = match self.fg {
            DesiredColour::Default => DesiredColour::Bios(DEFAULT_FG_BIOS),
            c => c,
        };
        let bg = match self.bg {
            DesiredColour::Default => DesiredColour::Bios(DEFAULT_BG_BIOS),
            c => c,
        };
        Self::new(bg, fg, self.style)
    }

    #[inline]
    #[must_use]
    pub const fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }
}

// ─── AttributePair ───────────────────────────────────────────────────────────

/// Two attributes: slot 0 is "normal", slot 1 is "highlighted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributePair {
    slots: [ColourAttribute; 2],
}

impl AttributePair {
    #[inline]
    #[must_use]
    pub const fn new(normal: ColourAttribute, highlighted: ColourAttribute) -> Self {
        Self {
            slots: [normal, highlighted],
        }
    }

    /// Unpack two BIOS bytes: low byte is slot 0, high byte is slot 1.
    #[inline]
    #[must_use]
    pub const fn from_packed(packed: u16) -> Self {
        let [lo, hi] = packed.to_le_bytes();
        Self::new(ColourAttribute::from_bios(lo), ColourAttribute::from_bios(hi))
    }

    /// Slot `index`. Zero is the normal attribute; any other index reads
    /// the highlighted one.
    #[inline]
    #[must_use]
    pub const fn attribute(&self, index: usize) -> ColourAttribute {
        if index == 0 { self.slots[0] } else { self.slots[1] }
    }

    #[inline]
    #[must_use]
    pub const fn normal(&self) -> ColourAttribute {
        self.slots[0]
    }

    #[inline]
    #[must_use]
    pub const fn highlighted(&self) -> ColourAttribute {
        self.slots[1]
    }
}

impl From<u16> for AttributePair {
    fn from(packed: u16) -> Self {
        Self::from_packed(packed)
    }
}

// ─── ColourInput ─────────────────────────────────────────────────────────────

/// Every shape a caller may hand over as "a colour".
///
/// Call sites take `impl Into<ColourInput>` and normalise once with
/// [`coerce`] instead of inspecting the argument themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourInput {
    /// Packed BIOS attribute(s). The low byte is the attribute used.
    Packed(u16),
    Single(ColourAttribute),
    Pair(AttributePair),
}

impl From<u16> for ColourInput {
    fn from(v: u16) -> Self {
        Self::Packed(v)
    }
}

impl From<u8> for ColourInput {
    fn from(v: u8) -> Self {
        Self::Packed(u16::from(v))
    }
}

impl From<ColourAttribute> for ColourInput {
    fn from(v: ColourAttribute) -> Self {
        Self::Single(v)
    }
}

impl From<AttributePair> for ColourInput {
    fn from(v: AttributePair) -> Self {
        Self::Pair(v)
    }
}

impl From<(ColourAttribute, ColourAttribute)> for ColourInput {
    fn from((normal, highlighted): (ColourAttribute, ColourAttribute)) -> Self {
        Self::Pair(AttributePair::new(normal, highlighted))
    }
}

/// Normalise any accepted colour argument to a single attribute.
///
/// Single passes through, a pair yields its normal slot, and a packed
/// value is parsed as a BIOS byte.
#[must_use]
pub fn coerce(input: impl Into<ColourInput>) -> ColourAttribute {
    match input.into() {
        ColourInput::Single(attr) => attr,
        ColourInput::Pair(pair) => pair.normal(),
        ColourInput::Packed(packed) => ColourAttribute::from_bios(packed.to_le_bytes()[0]),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    // ── BIOS byte ───────────────────────────────────────────────────────

    #[test]
    fn classic_attributes_round_trip() {
        for byte in [0x07, 0x17, 0x71, 0x1F, 0x74] {
            assert_eq!(ColourAttribute::from_bios(byte).as_bios(), byte, "byte {byte:#04x}");
        }
    }

    #[test]
    fn from_bios_splits_nibbles() {
        let attr = ColourAttribute::from_bios(0x1F);
        assert_eq!(attr.fg, DesiredColour::Bios(0x0F));
        assert_eq!(attr.bg, DesiredColour::Bios(0x01));
        assert!(attr.style.is_empty());
    }

    #[test]
    fn as_bios_falls_back_when_styled() {
        let attr = ColourAttribute::from_bios(0x1F).with_style(Style::BOLD);
        assert_eq!(attr.as_bios(), BIOS_FALLBACK);
        assert!(!attr.is_bios_representable());
    }

    #[test]
    fn as_bios_falls_back_for_rgb() {
        let attr = ColourAttribute::new(
            DesiredColour::from_rgb(1, 2, 3),
            DesiredColour::from_bios(0),
            Style::empty(),
        );
        assert_eq!(attr.as_bios(), 0x07);
    }

    #[test]
    fn to_bios_resolves_defaults() {
        assert_eq!(ColourAttribute::DEFAULT.to_bios(), 0x07);
        assert_eq!(DesiredColour::Default.to_bios(true), 7);
        assert_eq!(DesiredColour::Default.to_bios(false), 0);
    }

    #[test]
    fn to_bios_ignores_style() {
        let attr = ColourAttribute::from_bios(0x4E).with_style(Style::REVERSE | Style::BOLD);
        assert_eq!(attr.to_bios(), 0x4E);
    }

    #[test]
    fn to_bios_downconverts_rgb() {
        let attr = ColourAttribute::new(
            DesiredColour::from_rgb(255, 0, 0),
            DesiredColour::from_rgb(0, 0, 128),
            Style::empty(),
        );
        // Bright red on blue, BIOS order.
        assert_eq!(attr.to_bios(), 0x1C);
    }

    proptest! {
        #[test]
        fn every_bios_byte_round_trips(byte in any::<u8>()) {
            prop_assert_eq!(ColourAttribute::from_bios(byte).as_bios(), byte);
        }
    }

    // ── Palette ─────────────────────────────────────────────────────────

    #[test]
    fn bios_xterm_table_is_an_involution() {
        for i in 0..16u8 {
            assert_eq!(bios_to_xterm(bios_to_xterm(i)), i);
        }
        assert_eq!(bios_to_xterm(4), 1, "BIOS red is ANSI red");
        assert_eq!(bios_to_xterm(1), 4, "BIOS blue is ANSI blue");
    }

    #[test]
    fn from_bios_masks_high_bits() {
        assert_eq!(DesiredColour::from_bios(0xF3), DesiredColour::Bios(3));
    }

    #[test]
    fn predicates_follow_tag() {
        assert!(DesiredColour::Default.is_default());
        assert!(DesiredColour::from_bios(1).is_bios());
        assert!(DesiredColour::from_xterm(200).is_xterm());
        assert!(DesiredColour::from_rgb(0, 0, 0).is_rgb());
        assert!(!DesiredColour::from_xterm(3).is_bios());
    }

    // ── Pair & coercion ─────────────────────────────────────────────────

    #[test]
    fn pair_unpacks_low_byte_first() {
        let pair = AttributePair::from_packed(0x1234);
        assert_eq!(pair.attribute(0), ColourAttribute::from_bios(0x34));
        assert_eq!(pair.attribute(1), ColourAttribute::from_bios(0x12));
    }

    #[test]
    fn coerce_normalises_every_form() {
        let normal = ColourAttribute::from_bios(0x1F);
        let hi = ColourAttribute::from_bios(0x70);
        assert_eq!(coerce(normal), normal);
        assert_eq!(coerce((normal, hi)), normal);
        assert_eq!(coerce(AttributePair::new(normal, hi)), normal);
        assert_eq!(coerce(0x701F_u16), normal);
        assert_eq!(coerce(0x1F_u8), normal);
    }

    #[test]
    fn swapped_exchanges_colours() {
        let attr = ColourAttribute::from_bios(0x1E);
        let s = attr.swapped();
        assert_eq!(s.fg, DesiredColour::Bios(1));
        assert_eq!(s.bg, DesiredColour::Bios(0xE));
    }

    #[test]
    fn swapped_default_becomes_visible() {
        let s = ColourAttribute::DEFAULT.swapped();
        assert_eq!(s.fg, DesiredColour::Bios(DEFAULT_BG_BIOS));
        assert_eq!(s.bg, DesiredColour::Bios(DEFAULT_FG_BIOS));
    }
}
