// SPDX-License-Identifier: MIT
//
// Colour conversion: from what the application wants to what the
// connected terminal can show.
//
// A `TermCap` is negotiated once per session from two facts the platform
// reports: whether truecolor is advertised, and how many palette colours
// exist. Every `ColourAttribute` is then pushed through `TermCap::convert`
// on its way to the protocol writer, degrading one tier at a time:
//
//   Direct      RGB passes through, indices stay indices
//   Indexed256  RGB snaps to the 6×6×6 cube or the gray ramp
//   Indexed16   everything folds to 16 colours via hue bucketing
//   Indexed8    bright foregrounds become bold, bright backgrounds dim
//   NoColour    colours vanish; bold and reverse carry the contrast
//
// All conversions are deterministic integer arithmetic. The 256→16 table
// is built at compile time from the same bucketing the RGB path uses, so
// the two paths can never disagree.

use crate::color::{BIOS_TO_XTERM, ColourAttribute, DesiredColour, Style, bios_to_xterm};

// ─── Palette ─────────────────────────────────────────────────────────────────

/// The 16 base colours in xterm order, as the common xterm defaults.
pub const XTERM16_RGB: [(u8, u8, u8); 16] = [
    (0, 0, 0),       // 0: Black
    (128, 0, 0),     // 1: Red
    (0, 128, 0),     // 2: Green
    (128, 128, 0),   // 3: Yellow
    (0, 0, 128),     // 4: Blue
    (128, 0, 128),   // 5: Magenta
    (0, 128, 128),   // 6: Cyan
    (192, 192, 192), // 7: White
    (128, 128, 128), // 8: Bright Black
    (255, 0, 0),     // 9: Bright Red
    (0, 255, 0),     // 10: Bright Green
    (255, 255, 0),   // 11: Bright Yellow
    (0, 0, 255),     // 12: Bright Blue
    (255, 0, 255),   // 13: Bright Magenta
    (0, 255, 255),   // 14: Bright Cyan
    (255, 255, 255), // 15: Bright White
];

/// RGB value of an xterm 256-palette index.
#[must_use]
pub const fn xterm_to_rgb(idx: u8) -> (u8, u8, u8) {
    match idx {
        0..=15 => XTERM16_RGB[idx as usize],
        16..=231 => {
            let i = idx - 16;
            (cube_level(i / 36), cube_level((i % 36) / 6), cube_level(i % 6))
        }
        232..=255 => {
            let v = 8 + 10 * (idx - 232);
            (v, v, v)
        }
    }
}

/// The cube uses 0, 95, 135, 175, 215, 255.
const fn cube_level(i: u8) -> u8 {
    if i == 0 { 0 } else { 55 + 40 * i }
}

const fn nearest_cube_index(v: u8) -> u8 {
    if v < 48 {
        0
    } else if v < 115 {
        1
    } else {
        (v - 35) / 40
    }
}

const fn distance_sq(a: (u8, u8, u8), b: (u8, u8, u8)) -> i32 {
    let dr = a.0 as i32 - b.0 as i32;
    let dg = a.1 as i32 - b.1 as i32;
    let db = a.2 as i32 - b.2 as i32;
    dr * dr + dg * dg + db * db
}

/// Nearest xterm 256-palette entry for an RGB value, from the cube or the
/// gray ramp. The 16 base colours are never chosen; their RGB values vary
/// between terminals.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn rgb_to_xterm(r: u8, g: u8, b: u8) -> u8 {
    let (ri, gi, bi) = (nearest_cube_index(r), nearest_cube_index(g), nearest_cube_index(b));
    let cube = 16 + 36 * ri + 6 * gi + bi;
    let cube_rgb = (cube_level(ri), cube_level(gi), cube_level(bi));

    let avg = (r as i32 + g as i32 + b as i32) / 3;
    let gray_step = if avg < 8 {
        0
    } else if avg > 238 {
        23
    } else {
        (avg - 8) / 10
    };
    let gray = 232 + gray_step as u8;
    let gray_v = (8 + 10 * gray_step) as u8;

    if distance_sq((r, g, b), (gray_v, gray_v, gray_v)) < distance_sq((r, g, b), cube_rgb) {
        gray
    } else {
        cube
    }
}

// ─── Hue Bucketing ───────────────────────────────────────────────────────────

/// Chroma below this is treated as gray.
pub const LOW_CHROMA: i32 = 32;
/// Hue resolution: steps per 60° sector.
pub const HUE_STEPS: i32 = 64;
/// Chromatic colours at or above this lightness use the bright variant.
pub const BRIGHT_LIGHTNESS: i32 = 96;
/// Chromatic colours at or above this lightness collapse to white.
pub const WHITE_LIGHTNESS: i32 = 224;

/// BIOS index of each hue bucket: red, yellow, green, cyan, blue, magenta.
const HUE_TO_BIOS: [u8; 6] = [4, 6, 2, 3, 1, 5];

/// Fold an RGB value into one of the 16 BIOS colours.
///
/// Low-chroma values are classified by lightness alone into black, dark
/// gray, light gray or white. Everything else lands in one of six hue
/// buckets centred on the primaries and secondaries, then picks the bright
/// variant above [`BRIGHT_LIGHTNESS`].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn rgb_to_bios(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let max = if r > g { if r > b { r } else { b } } else if g > b { g } else { b };
    let min = if r < g { if r < b { r } else { b } } else if g < b { g } else { b };
    let chroma = max - min;
    let lightness = (max + min) / 2;

    if chroma < LOW_CHROMA {
        return if lightness < 40 {
            0x0
        } else if lightness < 140 {
            0x8
        } else if lightness < 216 {
            0x7
        } else {
            0xF
        };
    }

    if lightness >= WHITE_LIGHTNESS {
        return 0xF;
    }

    let mut hue = if max == r {
        HUE_STEPS * (g - b) / chroma
    } else if max == g {
        2 * HUE_STEPS + HUE_STEPS * (b - r) / chroma
    } else {
        4 * HUE_STEPS + HUE_STEPS * (r - g) / chroma
    };
    if hue < 0 {
        hue += 6 * HUE_STEPS;
    }
    let bucket = ((hue + HUE_STEPS / 2) / HUE_STEPS) % 6;

    let base = HUE_TO_BIOS[bucket as usize];
    if lightness >= BRIGHT_LIGHTNESS { base | 0x8 } else { base }
}

const fn build_xterm_to_bios() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = if i < 16 {
            BIOS_TO_XTERM[i]
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let (r, g, b) = xterm_to_rgb(i as u8);
            rgb_to_bios(r, g, b)
        };
        i += 1;
    }
    table
}

/// xterm 256-palette index → BIOS index.
pub const XTERM_TO_BIOS: [u8; 256] = build_xterm_to_bios();

#[inline]
#[must_use]
pub const fn xterm_to_bios(idx: u8) -> u8 {
    XTERM_TO_BIOS[idx as usize]
}

/// Whether a BIOS background reads as "light" on a monochrome display.
const fn is_light_bios(idx: u8) -> bool {
    let (r, g, b) = XTERM16_RGB[bios_to_xterm(idx) as usize];
    let max = if r > g { if r > b { r } else { b } } else if g > b { g } else { b };
    let min = if r < g { if r < b { r } else { b } } else if g < b { g } else { b };
    (max as u16 + min as u16) / 2 > 150
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// How many colours the output can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColourTier {
    NoColour,
    Indexed8,
    Indexed16,
    Indexed256,
    Direct,
}

impl ColourTier {
    /// Tier for a reported palette size.
    #[must_use]
    pub const fn from_count(count: u32) -> Self {
        match count {
            0..=7 => Self::NoColour,
            8..=15 => Self::Indexed8,
            16..=255 => Self::Indexed16,
            256..=16_777_215 => Self::Indexed256,
            _ => Self::Direct,
        }
    }
}

bitflags::bitflags! {
    /// Rendering quirks of the connected terminal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Quirks: u8 {
        /// Drawing a wide glyph over stale cells leaves fragments behind.
        /// The span must be blanked before the glyph is written.
        const WIDE_GLYPH_OVERLAP = 1 << 0;
    }
}

/// Immutable capability descriptor for one output session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermCap {
    tier: ColourTier,
    quirks: Quirks,
}

impl Default for TermCap {
    fn default() -> Self {
        Self::new(ColourTier::Indexed16, Quirks::empty())
    }
}

impl TermCap {
    #[inline]
    #[must_use]
    pub const fn new(tier: ColourTier, quirks: Quirks) -> Self {
        Self { tier, quirks }
    }

    /// Build the capability from what the platform reports.
    ///
    /// Advertised truecolor wins as long as the terminal claims colour at
    /// all; a colourless terminal stays colourless whatever `COLORTERM`
    /// says.
    #[must_use]
    pub fn negotiate(truecolor: bool, color_count: u32, quirks: Quirks) -> Self {
        let tier = if truecolor && color_count >= 8 {
            ColourTier::Direct
        } else {
            ColourTier::from_count(color_count)
        };
        tracing::debug!(?tier, truecolor, color_count, ?quirks, "negotiated terminal capability");
        Self::new(tier, quirks)
    }

    #[inline]
    #[must_use]
    pub const fn tier(&self) -> ColourTier {
        self.tier
    }

    #[inline]
    #[must_use]
    pub const fn quirks(&self) -> Quirks {
        self.quirks
    }

    #[inline]
    #[must_use]
    pub const fn has_quirk(&self, quirk: Quirks) -> bool {
        self.quirks.contains(quirk)
    }

    /// Convert an attribute for this terminal.
    #[must_use]
    pub fn convert(&self, attr: ColourAttribute) -> TermAttribute {
        let mut style = attr.style;
        let (fg, bg) = match self.tier {
            ColourTier::Direct | ColourTier::Indexed256 | ColourTier::Indexed16 => {
                (self.convert_colour(attr.fg, true), self.convert_colour(attr.bg, false))
            }
            ColourTier::Indexed8 => {
                if !attr.fg.is_default() && attr.fg.to_bios(true) >= 8 {
                    style |= Style::BOLD;
                }
                (self.convert_colour(attr.fg, true), self.convert_colour(attr.bg, false))
            }
            ColourTier::NoColour => {
                if !attr.fg.is_default() && attr.fg.to_bios(true) >= 8 {
                    style |= Style::BOLD;
                }
                if !attr.bg.is_default() && is_light_bios(attr.bg.to_bios(false)) {
                    style.toggle(Style::REVERSE);
                }
                (TermColour::NoColor, TermColour::NoColor)
            }
        };
        TermAttribute { fg, bg, style }
    }

    fn convert_colour(&self, colour: DesiredColour, is_foreground: bool) -> TermColour {
        match (self.tier, colour) {
            (ColourTier::NoColour, _) => TermColour::NoColor,
            (_, DesiredColour::Default) => TermColour::Default,
            (ColourTier::Direct, DesiredColour::Rgb(r, g, b)) => TermColour::Rgb(r, g, b),
            (ColourTier::Direct | ColourTier::Indexed256, DesiredColour::Xterm(i)) => {
                TermColour::Indexed(i)
            }
            (ColourTier::Indexed256, DesiredColour::Rgb(r, g, b)) => {
                TermColour::Indexed(rgb_to_xterm(r, g, b))
            }
            (ColourTier::Indexed8, c) => {
                TermColour::Indexed(bios_to_xterm(c.to_bios(is_foreground) & 0x7))
            }
            (_, c) => TermColour::Indexed(bios_to_xterm(c.to_bios(is_foreground))),
        }
    }
}

// ─── Output Representation ───────────────────────────────────────────────────

/// A colour in the form the protocol writer emits it.
///
/// `Indexed` carries an xterm/ANSI wire index, never a BIOS index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TermColour {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
    /// Monochrome output: emit no colour at all.
    NoColor,
}

/// A fully converted attribute, ready for SGR encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TermAttribute {
    pub fg: TermColour,
    pub bg: TermColour,
    pub style: Style,
}

impl TermAttribute {
    /// What the terminal shows after `SGR 0`.
    pub const RESET: Self = Self {
        fg: TermColour::Default,
        bg: TermColour::Default,
        style: Style::empty(),
    };
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cap(tier: ColourTier) -> TermCap {
        TermCap::new(tier, Quirks::empty())
    }

    // ── Bucketing ───────────────────────────────────────────────────────

    #[test]
    fn grays_split_by_lightness() {
        assert_eq!(rgb_to_bios(0, 0, 0), 0x0);
        assert_eq!(rgb_to_bios(39, 39, 39), 0x0);
        assert_eq!(rgb_to_bios(40, 40, 40), 0x8);
        assert_eq!(rgb_to_bios(139, 139, 139), 0x8);
        assert_eq!(rgb_to_bios(140, 140, 140), 0x7);
        assert_eq!(rgb_to_bios(215, 215, 215), 0x7);
        assert_eq!(rgb_to_bios(216, 216, 216), 0xF);
    }

    #[test]
    fn chroma_threshold_boundary() {
        // chroma 31: still gray.
        assert_eq!(rgb_to_bios(100, 100, 131), 0x8);
        // chroma 32: blue bucket, lightness 116 is bright.
        assert_eq!(rgb_to_bios(100, 100, 132), 0x9);
    }

    #[test]
    fn primaries_and_secondaries() {
        assert_eq!(rgb_to_bios(255, 0, 0), 0xC);
        assert_eq!(rgb_to_bios(128, 0, 0), 0x4);
        assert_eq!(rgb_to_bios(0, 255, 0), 0xA);
        assert_eq!(rgb_to_bios(0, 0, 255), 0x9);
        assert_eq!(rgb_to_bios(255, 255, 0), 0xE);
        assert_eq!(rgb_to_bios(0, 128, 128), 0x3);
        assert_eq!(rgb_to_bios(255, 0, 255), 0xD);
    }

    #[test]
    fn hue_boundary_between_red_and_yellow() {
        // hue step 31 rounds to red, 32 to yellow.
        assert_eq!(rgb_to_bios(255, 127, 0), 0xC);
        assert_eq!(rgb_to_bios(255, 128, 0), 0xE);
    }

    #[test]
    fn lightness_threshold_boundaries() {
        // lightness 95 vs 96 on a pure red ramp.
        assert_eq!(rgb_to_bios(190, 0, 0), 0x4);
        assert_eq!(rgb_to_bios(192, 0, 0), 0xC);
        // Pastels collapse to white.
        assert_eq!(rgb_to_bios(255, 200, 200), 0xF);
        assert_eq!(rgb_to_bios(255, 190, 190), 0xC);
    }

    // ── 256 palette ─────────────────────────────────────────────────────

    #[test]
    fn xterm_table_matches_bucketing() {
        assert_eq!(xterm_to_bios(196), 0xC);
        assert_eq!(xterm_to_bios(21), 0x9);
        assert_eq!(xterm_to_bios(52), 0x4);
        assert_eq!(xterm_to_bios(232), 0x0);
        assert_eq!(xterm_to_bios(244), 0x8);
        assert_eq!(xterm_to_bios(250), 0x7);
        assert_eq!(xterm_to_bios(255), 0xF);
    }

    #[test]
    fn xterm_base_colours_permute() {
        assert_eq!(xterm_to_bios(1), 4);
        assert_eq!(xterm_to_bios(4), 1);
        assert_eq!(xterm_to_bios(15), 15);
    }

    #[test]
    fn xterm_rgb_cube_and_ramp() {
        assert_eq!(xterm_to_rgb(16), (0, 0, 0));
        assert_eq!(xterm_to_rgb(196), (255, 0, 0));
        assert_eq!(xterm_to_rgb(67), (95, 135, 175));
        assert_eq!(xterm_to_rgb(232), (8, 8, 8));
        assert_eq!(xterm_to_rgb(255), (238, 238, 238));
    }

    #[test]
    fn rgb_snaps_to_cube_or_ramp() {
        assert_eq!(rgb_to_xterm(255, 0, 0), 196);
        assert_eq!(rgb_to_xterm(95, 135, 175), 67);
        assert_eq!(rgb_to_xterm(128, 128, 128), 244);
        assert_eq!(rgb_to_xterm(0, 0, 0), 16);
    }

    // ── Tiers ───────────────────────────────────────────────────────────

    #[test]
    fn tier_from_count() {
        assert_eq!(ColourTier::from_count(0), ColourTier::NoColour);
        assert_eq!(ColourTier::from_count(8), ColourTier::Indexed8);
        assert_eq!(ColourTier::from_count(16), ColourTier::Indexed16);
        assert_eq!(ColourTier::from_count(256), ColourTier::Indexed256);
        assert_eq!(ColourTier::from_count(16_777_216), ColourTier::Direct);
    }

    #[test]
    fn truecolor_needs_some_colour() {
        assert_eq!(TermCap::negotiate(true, 256, Quirks::empty()).tier(), ColourTier::Direct);
        assert_eq!(TermCap::negotiate(true, 0, Quirks::empty()).tier(), ColourTier::NoColour);
        assert_eq!(TermCap::negotiate(false, 256, Quirks::empty()).tier(), ColourTier::Indexed256);
    }

    #[test]
    fn direct_keeps_everything() {
        let attr = ColourAttribute::new(
            DesiredColour::from_rgb(1, 2, 3),
            DesiredColour::from_xterm(200),
            Style::ITALIC,
        );
        assert_eq!(
            cap(ColourTier::Direct).convert(attr),
            TermAttribute {
                fg: TermColour::Rgb(1, 2, 3),
                bg: TermColour::Indexed(200),
                style: Style::ITALIC,
            }
        );
    }

    #[test]
    fn bios_red_goes_out_as_ansi_red() {
        let attr = ColourAttribute::from_bios(0x04);
        let out = cap(ColourTier::Indexed16).convert(attr);
        assert_eq!(out.fg, TermColour::Indexed(1));
        assert_eq!(out.bg, TermColour::Indexed(0));
    }

    #[test]
    fn indexed256_snaps_rgb() {
        let attr = ColourAttribute::new(DesiredColour::from_rgb(255, 0, 0), DesiredColour::Default, Style::empty());
        let out = cap(ColourTier::Indexed256).convert(attr);
        assert_eq!(out.fg, TermColour::Indexed(196));
        assert_eq!(out.bg, TermColour::Default);
    }

    #[test]
    fn indexed16_folds_xterm() {
        let attr = ColourAttribute::new(DesiredColour::from_xterm(196), DesiredColour::Default, Style::empty());
        assert_eq!(cap(ColourTier::Indexed16).convert(attr).fg, TermColour::Indexed(9));
    }

    #[test]
    fn indexed8_turns_bright_into_bold() {
        let attr = ColourAttribute::from_bios(0x9C);
        let out = cap(ColourTier::Indexed8).convert(attr);
        assert_eq!(out.fg, TermColour::Indexed(1));
        assert_eq!(out.bg, TermColour::Indexed(4));
        assert_eq!(out.style, Style::BOLD);
    }

    #[test]
    fn no_colour_synthesises_style() {
        let bright_on_black = cap(ColourTier::NoColour).convert(ColourAttribute::from_bios(0x0F));
        assert_eq!(bright_on_black.fg, TermColour::NoColor);
        assert_eq!(bright_on_black.style, Style::BOLD);

        let black_on_gray = cap(ColourTier::NoColour).convert(ColourAttribute::from_bios(0x70));
        assert_eq!(black_on_gray.style, Style::REVERSE);

        let plain = cap(ColourTier::NoColour).convert(ColourAttribute::DEFAULT);
        assert_eq!(plain.style, Style::empty());
    }

    #[test]
    fn no_colour_reverse_cancels_explicit_reverse() {
        let attr = ColourAttribute::from_bios(0x70).with_style(Style::REVERSE);
        assert_eq!(cap(ColourTier::NoColour).convert(attr).style, Style::empty());
    }
}
