// SPDX-License-Identifier: MIT
//
// Cell: the atomic unit of a screen grid.
//
// A cell holds a short run of Unicode scalars (one base character plus any
// zero-width combining marks that followed it) and a colour attribute. The
// text is kept as inline UTF-8 so that handing it to an adapter is a slice
// borrow, not an allocation.
//
// Wide characters (CJK, most emoji) occupy two columns. The first cell is
// flagged WIDE and holds the text; the second is flagged TRAIL and holds
// nothing. A TRAIL cell is only meaningful while the WIDE head to its left
// is still there. Code that overwrites one half of a pair must repair the
// other half.

use unicode_width::UnicodeWidthChar;

use crate::color::ColourAttribute;

// ─── Flags ───────────────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Column-occupancy flags of a cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct CellFlags: u8 {
        /// Head of a double-width glyph.
        const WIDE  = 1 << 0;
        /// Placeholder column covered by the glyph to its left.
        const TRAIL = 1 << 1;
    }
}

// ─── CellChar ────────────────────────────────────────────────────────────────

/// Bytes of UTF-8 a cell can hold: a base character and a few marks.
const TEXT_CAPACITY: usize = 14;

/// The text of one cell, with its wide/trail flags.
///
/// Unused bytes are always zero, so derived equality compares text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellChar {
    text: [u8; TEXT_CAPACITY],
    len: u8,
    flags: CellFlags,
}

impl CellChar {
    /// A single space.
    pub const BLANK: Self = Self::ascii(b' ');

    /// The placeholder for the second column of a wide glyph.
    pub const TRAIL: Self = Self {
        text: [0; TEXT_CAPACITY],
        len: 0,
        flags: CellFlags::TRAIL,
    };

    const fn ascii(b: u8) -> Self {
        let mut text = [0; TEXT_CAPACITY];
        text[0] = b;
        Self {
            text,
            len: 1,
            flags: CellFlags::empty(),
        }
    }

    /// A single-column cell holding `ch`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // A char is at most 4 bytes.
    pub fn narrow(ch: char) -> Self {
        let mut text = [0; TEXT_CAPACITY];
        let len = ch.encode_utf8(&mut text).len();
        Self {
            text,
            len: len as u8,
            flags: CellFlags::empty(),
        }
    }

    /// The head cell of a double-width glyph.
    #[must_use]
    pub fn wide(ch: char) -> Self {
        Self {
            flags: CellFlags::WIDE,
            ..Self::narrow(ch)
        }
    }

    /// A cell for `ch`, wide or narrow according to its display width.
    ///
    /// Zero-width and control characters have no cell of their own; they
    /// become a blank.
    #[must_use]
    pub fn from_char(ch: char) -> Self {
        match ch.width() {
            Some(2) => Self::wide(ch),
            Some(1) => Self::narrow(ch),
            _ => Self::BLANK,
        }
    }

    /// The cell's text. Empty for a trail cell.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.text[..usize::from(self.len)]).unwrap_or(" ")
    }

    /// Append a zero-width combining mark.
    ///
    /// Returns `false` and leaves the cell unchanged when the mark does not
    /// fit or the cell is a trail.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_combining(&mut self, mark: char) -> bool {
        let start = usize::from(self.len);
        if self.is_trail() || start + mark.len_utf8() > TEXT_CAPACITY {
            return false;
        }
        let n = mark.encode_utf8(&mut self.text[start..]).len();
        self.len += n as u8;
        true
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> CellFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        self.flags.contains(CellFlags::WIDE)
    }

    #[inline]
    #[must_use]
    pub const fn is_trail(&self) -> bool {
        self.flags.contains(CellFlags::TRAIL)
    }

    /// Columns this cell's glyph covers, counting itself.
    #[inline]
    #[must_use]
    pub const fn columns(&self) -> u16 {
        if self.is_wide() { 2 } else { 1 }
    }
}

impl Default for CellChar {
    fn default() -> Self {
        Self::BLANK
    }
}

impl std::fmt::Debug for CellChar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_trail() {
            write!(f, "Trail")
        } else if self.is_wide() {
            write!(f, "Wide({:?})", self.as_str())
        } else {
            write!(f, "{:?}", self.as_str())
        }
    }
}

// ─── ScreenCell ──────────────────────────────────────────────────────────────

/// One grid position: text plus attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScreenCell {
    pub ch: CellChar,
    pub attr: ColourAttribute,
}

impl ScreenCell {
    /// A space with default colours.
    pub const BLANK: Self = Self {
        ch: CellChar::BLANK,
        attr: ColourAttribute::DEFAULT,
    };

    #[inline]
    #[must_use]
    pub const fn new(ch: CellChar, attr: ColourAttribute) -> Self {
        Self { ch, attr }
    }

    /// A space drawn with `attr`.
    #[inline]
    #[must_use]
    pub const fn blank(attr: ColourAttribute) -> Self {
        Self::new(CellChar::BLANK, attr)
    }

    /// The trail half of a wide glyph drawn with `attr`.
    #[inline]
    #[must_use]
    pub const fn trail(attr: ColourAttribute) -> Self {
        Self::new(CellChar::TRAIL, attr)
    }

    #[inline]
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        self.ch.is_wide()
    }

    #[inline]
    #[must_use]
    pub const fn is_trail(&self) -> bool {
        self.ch.is_trail()
    }
}

/// Cells for a string in one attribute, wide glyphs followed by their trail.
///
/// Zero-width characters attach to the preceding cell.
#[must_use]
pub fn cells_from_str(s: &str, attr: ColourAttribute) -> Vec<ScreenCell> {
    let mut out: Vec<ScreenCell> = Vec::with_capacity(s.len());
    for ch in s.chars() {
        match ch.width() {
            Some(0) => {
                if let Some(last) = out.iter_mut().rev().find(|c| !c.is_trail()) {
                    last.ch.push_combining(ch);
                }
            }
            Some(2) => {
                out.push(ScreenCell::new(CellChar::wide(ch), attr));
                out.push(ScreenCell::trail(attr));
            }
            Some(_) => out.push(ScreenCell::new(CellChar::narrow(ch), attr)),
            None => {}
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::DesiredColour;
    use pretty_assertions::assert_eq;

    // ── Layout ───────────────────────────────────────────────────────────

    #[test]
    fn cell_char_is_16_bytes() {
        assert_eq!(std::mem::size_of::<CellChar>(), 16);
    }

    #[test]
    fn default_is_blank() {
        assert_eq!(CellChar::default(), CellChar::BLANK);
        assert_eq!(CellChar::BLANK.as_str(), " ");
        assert_eq!(ScreenCell::default(), ScreenCell::BLANK);
    }

    // ── Width ────────────────────────────────────────────────────────────

    #[test]
    fn from_char_picks_width() {
        assert!(!CellChar::from_char('a').is_wide());
        assert!(CellChar::from_char('中').is_wide());
        assert_eq!(CellChar::from_char('中').columns(), 2);
        assert_eq!(CellChar::from_char('\u{0301}'), CellChar::BLANK);
    }

    #[test]
    fn trail_has_no_text() {
        assert_eq!(CellChar::TRAIL.as_str(), "");
        assert!(CellChar::TRAIL.is_trail());
        assert!(!CellChar::TRAIL.is_wide());
    }

    // ── Combining ────────────────────────────────────────────────────────

    #[test]
    fn combining_marks_append() {
        let mut c = CellChar::narrow('e');
        assert!(c.push_combining('\u{0301}'));
        assert_eq!(c.as_str(), "e\u{0301}");
        assert_ne!(c, CellChar::narrow('e'));
    }

    #[test]
    fn combining_overflow_is_refused() {
        let mut c = CellChar::narrow('a');
        // U+0301 is 2 bytes; 6 of them fill 13 bytes, the 7th would not fit.
        for _ in 0..6 {
            assert!(c.push_combining('\u{0301}'));
        }
        let before = c;
        assert!(!c.push_combining('\u{0301}'));
        assert_eq!(c, before);
    }

    #[test]
    fn trail_refuses_marks() {
        let mut c = CellChar::TRAIL;
        assert!(!c.push_combining('\u{0301}'));
    }

    // ── Strings ──────────────────────────────────────────────────────────

    #[test]
    fn cells_from_str_expands_wide() {
        let attr = ColourAttribute::from_bios(0x1F);
        let cells = cells_from_str("a中b", attr);
        assert_eq!(cells.len(), 4);
        assert!(cells[1].is_wide());
        assert!(cells[2].is_trail());
        assert_eq!(cells[3].ch.as_str(), "b");
        assert!(cells.iter().all(|c| c.attr == attr));
    }

    #[test]
    fn cells_from_str_attaches_marks() {
        let cells = cells_from_str("e\u{0301}x", ColourAttribute::DEFAULT);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].ch.as_str(), "e\u{0301}");
    }

    #[test]
    fn cell_equality_includes_attribute() {
        let a = ScreenCell::new(CellChar::narrow('x'), ColourAttribute::DEFAULT);
        let mut b = a;
        b.attr.fg = DesiredColour::from_bios(4);
        assert_ne!(a, b);
    }
}
