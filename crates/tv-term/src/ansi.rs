// SPDX-License-Identifier: MIT
//
// ANSI escape sequence generation.
//
// Pure functions that write escape sequences to any `impl Write`. No state,
// no decisions about when to emit; that is the `AnsiAdapter`'s job. This
// module only knows the byte-level encoding of every host-terminal command
// the crate sends.
//
// Cursor positions are 0-indexed in our API and converted to the 1-indexed
// form the terminal expects.

use std::io::{self, Write};

use crate::color::Style;
use crate::convert::TermColour;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Move the cursor to `(x, y)` (CUP).
#[inline]
pub fn cursor_to(w: &mut impl Write, x: u16, y: u16) -> io::Result<()> {
    write!(w, "\x1b[{};{}H", u32::from(y) + 1, u32::from(x) + 1)
}

/// Move the cursor to column `x` of the current row (CHA).
#[inline]
pub fn cursor_column(w: &mut impl Write, x: u16) -> io::Result<()> {
    write!(w, "\x1b[{}G", u32::from(x) + 1)
}

/// Hide the cursor (DECTCEM reset).
#[inline]
pub fn cursor_hide(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?25l")
}

/// Show the cursor (DECTCEM set).
#[inline]
pub fn cursor_show(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?25h")
}

/// Show the caret sized as a percentage of the cell, or hide it at zero.
///
/// Terminals only offer shapes, so small carets become a steady underline
/// and large ones a steady block (DECSCUSR).
pub fn caret_size(w: &mut impl Write, percent: u8) -> io::Result<()> {
    match percent {
        0 => cursor_hide(w),
        1..=50 => {
            w.write_all(b"\x1b[4 q")?;
            cursor_show(w)
        }
        _ => {
            w.write_all(b"\x1b[2 q")?;
            cursor_show(w)
        }
    }
}

/// Restore the terminal's own cursor shape.
#[inline]
pub fn caret_default(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[0 q")
}

// ─── Screen ──────────────────────────────────────────────────────────────────

/// Clear the entire screen (ED 2).
#[inline]
pub fn clear_screen(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[2J")
}

/// Reset all SGR attributes to terminal defaults (SGR 0).
///
/// The stateful writer must forget its tracked attribute after this.
#[inline]
pub fn reset(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[0m")
}

/// Set the window title (OSC 2, BEL-terminated). Control characters in
/// `title` are dropped so they cannot end the sequence early.
pub fn set_title(w: &mut impl Write, title: &str) -> io::Result<()> {
    w.write_all(b"\x1b]2;")?;
    let clean: String = title.chars().filter(|c| !c.is_control()).collect();
    w.write_all(clean.as_bytes())?;
    w.write_all(b"\x07")
}

// ─── Colour ──────────────────────────────────────────────────────────────────

/// Set the foreground colour.
///
/// Compact SGR codes for the 16 base colours (30–37, 90–97), the 256-colour
/// form for the rest of the palette, 24-bit for RGB. `NoColor` emits nothing.
pub fn fg(w: &mut impl Write, color: TermColour) -> io::Result<()> {
    match color {
        TermColour::NoColor => Ok(()),
        TermColour::Default => w.write_all(b"\x1b[39m"),
        TermColour::Indexed(idx) => {
            if idx < 8 {
                write!(w, "\x1b[{}m", 30 + u16::from(idx))
            } else if idx < 16 {
                write!(w, "\x1b[{}m", 82 + u16::from(idx))
            } else {
                write!(w, "\x1b[38;5;{idx}m")
            }
        }
        TermColour::Rgb(r, g, b) => write!(w, "\x1b[38;2;{r};{g};{b}m"),
    }
}

/// Set the background colour.
///
/// Same encoding strategy as [`fg`] with the background codes
/// (40–47, 100–107, 48;5;N, 48;2;R;G;B).
pub fn bg(w: &mut impl Write, color: TermColour) -> io::Result<()> {
    match color {
        TermColour::NoColor => Ok(()),
        TermColour::Default => w.write_all(b"\x1b[49m"),
        TermColour::Indexed(idx) => {
            if idx < 8 {
                write!(w, "\x1b[{}m", 40 + u16::from(idx))
            } else if idx < 16 {
                write!(w, "\x1b[{}m", 92 + u16::from(idx))
            } else {
                write!(w, "\x1b[48;5;{idx}m")
            }
        }
        TermColour::Rgb(r, g, b) => write!(w, "\x1b[48;2;{r};{g};{b}m"),
    }
}

// ─── Style ───────────────────────────────────────────────────────────────────

/// Emit SGR codes for `style` as a single CSI sequence.
///
/// Multiple styles are semicolon-separated: `\x1b[1;3;9m` for bold +
/// italic + strike. Does nothing if no style is set.
pub fn styles(w: &mut impl Write, style: Style) -> io::Result<()> {
    if style.is_empty() {
        return Ok(());
    }

    w.write_all(b"\x1b[")?;
    let mut first = true;

    macro_rules! emit {
        ($flag:expr, $code:expr) => {
            if style.contains($flag) {
                if !first {
                    w.write_all(b";")?;
                }
                w.write_all($code)?;
                first = false;
            }
        };
    }

    emit!(Style::BOLD, b"1");
    emit!(Style::ITALIC, b"3");
    emit!(Style::UNDERLINE, b"4");
    emit!(Style::BLINK, b"5");
    emit!(Style::REVERSE, b"7");
    emit!(Style::HIDDEN, b"8");
    emit!(Style::STRIKE, b"9");
    let _ = first;

    w.write_all(b"m")
}

// ─── Synchronized Output ─────────────────────────────────────────────────────

/// Begin synchronized output (DEC private mode 2026).
#[inline]
pub fn begin_sync(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?2026h")
}

/// End synchronized output; the terminal shows the buffered frame.
#[inline]
pub fn end_sync(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?2026l")
}

// ─── Alternate Screen ────────────────────────────────────────────────────────

/// Enter the alternate screen buffer (DEC private mode 1049).
#[inline]
pub fn enter_alt_screen(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?1049h")
}

/// Leave the alternate screen and restore the original content.
#[inline]
pub fn exit_alt_screen(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?1049l")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Run an ANSI function and return its output as a string.
    fn emit<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ── Cursor ──────────────────────────────────────────────────────────

    #[test]
    fn cursor_to_is_one_based() {
        assert_eq!(emit(|w| cursor_to(w, 0, 0)), "\x1b[1;1H");
        assert_eq!(emit(|w| cursor_to(w, 10, 20)), "\x1b[21;11H");
    }

    #[test]
    fn cursor_to_does_not_overflow() {
        assert_eq!(emit(|w| cursor_to(w, u16::MAX, 0)), "\x1b[1;65536H");
    }

    #[test]
    fn cursor_column_sequence() {
        assert_eq!(emit(|w| cursor_column(w, 4)), "\x1b[5G");
    }

    #[test]
    fn caret_sizes_map_to_shapes() {
        assert_eq!(emit(|w| caret_size(w, 0)), "\x1b[?25l");
        assert_eq!(emit(|w| caret_size(w, 15)), "\x1b[4 q\x1b[?25h");
        assert_eq!(emit(|w| caret_size(w, 100)), "\x1b[2 q\x1b[?25h");
    }

    // ── Screen ──────────────────────────────────────────────────────────

    #[test]
    fn clear_and_reset() {
        assert_eq!(emit(|w| clear_screen(w)), "\x1b[2J");
        assert_eq!(emit(|w| reset(w)), "\x1b[0m");
    }

    #[test]
    fn title_strips_controls() {
        assert_eq!(emit(|w| set_title(w, "a\x07b\x1bc")), "\x1b]2;abc\x07");
    }

    // ── Colour ──────────────────────────────────────────────────────────

    #[test]
    fn fg_encodings() {
        assert_eq!(emit(|w| fg(w, TermColour::Default)), "\x1b[39m");
        assert_eq!(emit(|w| fg(w, TermColour::Indexed(1))), "\x1b[31m");
        assert_eq!(emit(|w| fg(w, TermColour::Indexed(9))), "\x1b[91m");
        assert_eq!(emit(|w| fg(w, TermColour::Indexed(196))), "\x1b[38;5;196m");
        assert_eq!(emit(|w| fg(w, TermColour::Rgb(1, 2, 3))), "\x1b[38;2;1;2;3m");
        assert_eq!(emit(|w| fg(w, TermColour::NoColor)), "");
    }

    #[test]
    fn bg_encodings() {
        assert_eq!(emit(|w| bg(w, TermColour::Default)), "\x1b[49m");
        assert_eq!(emit(|w| bg(w, TermColour::Indexed(4))), "\x1b[44m");
        assert_eq!(emit(|w| bg(w, TermColour::Indexed(15))), "\x1b[107m");
        assert_eq!(emit(|w| bg(w, TermColour::Indexed(17))), "\x1b[48;5;17m");
        assert_eq!(emit(|w| bg(w, TermColour::Rgb(9, 8, 7))), "\x1b[48;2;9;8;7m");
    }

    // ── Style ───────────────────────────────────────────────────────────

    #[test]
    fn styles_join_with_semicolons() {
        assert_eq!(emit(|w| styles(w, Style::BOLD | Style::ITALIC | Style::STRIKE)), "\x1b[1;3;9m");
        assert_eq!(emit(|w| styles(w, Style::REVERSE)), "\x1b[7m");
        assert_eq!(emit(|w| styles(w, Style::empty())), "");
    }
}
