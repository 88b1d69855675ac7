// SPDX-License-Identifier: MIT
//
// VT emulator: turns a child process's output into a grid of cells.
//
// Bytes go through the UTF-8 decoder first, so a read that splits a
// code point or an escape sequence is harmless. Decoded chars then drive a
// three-state machine:
//
//   Normal            printable chars are drawn, C0 controls executed
//   EscapeStart       saw ESC; one-char escapes dispatch here
//   EscapeAccumulate  a CSI, OSC or charset designation is collecting
//
// The accumulator is bounded. A sequence that outgrows it stops collecting
// but is still swallowed up to its own terminator (final byte, BEL or ST,
// or CAN/SUB), then dropped. One that ends in something we do not know is
// dropped as well. Either way the grid is not touched.
//
// Every coordinate is clamped. Nothing in here fails: the worst a hostile
// stream can do is draw garbage.
//
// # Grid model
//
// Same cells as `ScreenBuffer`: a wide glyph is a WIDE head followed by a
// TRAIL. Every write repairs the pair it broke, so the grid can be blitted
// into a buffer as-is. Rows that changed are recorded in per-row damage
// ranges which the host drains with `take_damage`.
//
// # Wrapping
//
// Printing into the last column does not move the cursor past it. It sets
// a pending-wrap flag, and the wrap (carriage return plus line feed) happens
// when the next printable char arrives. Any explicit cursor motion clears
// the flag. This is how VT100-family terminals behave and what full-screen
// programs expect when they draw the bottom-right cell.

use unicode_width::UnicodeWidthChar;

use crate::adapter::{Point, Size};
use crate::buffer::Range;
use crate::cell::{CellChar, ScreenCell};
use crate::color::{ColourAttribute, DesiredColour, Style, bios_to_xterm};
use crate::utf8::Utf8Decoder;

/// Default bound on a buffered escape sequence, in bytes.
pub const DEFAULT_ESCAPE_LIMIT: usize = 256;

const TAB_WIDTH: u16 = 8;

// ─── Out-of-band state ───────────────────────────────────────────────────────

bitflags::bitflags! {
    /// What changed outside the grid since the last
    /// [`take_changes`](Emulator::take_changes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Changes: u8 {
        const TITLE             = 1 << 0;
        const CURSOR_VISIBILITY = 1 << 1;
        const BELL              = 1 << 2;
        const MOUSE_MODE        = 1 << 3;
    }
}

/// Which mouse events the child asked to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseMode {
    #[default]
    Off,
    /// Mode 1000: presses and releases.
    Click,
    /// Mode 1002: also motion while a button is held.
    Drag,
    /// Mode 1003: all motion.
    Motion,
}

// ─── Charsets ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Charset {
    #[default]
    Ascii,
    DecGraphics,
}

/// DEC Special Graphics for `_` through `~`.
const DEC_GRAPHICS: [char; 32] = [
    ' ', '◆', '▒', '␉', '␌', '␍', '␊', '°', '±', '␤', '␋', '┘', '┐', '┌', '└', '┼', '⎺', '⎻', '─', '⎼', '⎽',
    '├', '┤', '┴', '┬', '│', '≤', '≥', 'π', '≠', '£', '·',
];

impl Charset {
    fn map(self, ch: char) -> char {
        match (self, ch) {
            (Self::DecGraphics, '_'..='~') => DEC_GRAPHICS[ch as usize - 0x5F],
            _ => ch,
        }
    }
}

// ─── Parser state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    EscapeStart,
    EscapeAccumulate,
}

/// Cursor state saved by `ESC 7` / `CSI s`.
#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    pos: Point,
    attr: ColourAttribute,
    pending_wrap: bool,
    charsets: [Charset; 2],
    shift: usize,
}

/// A parsed control sequence.
///
/// `params` holds `;`-separated groups, each a list of `:`-separated
/// numbers. An omitted number is zero.
#[derive(Debug, Default)]
struct Csi {
    private: Option<char>,
    params: Vec<Vec<u16>>,
    intermediate: bool,
    verb: char,
}

impl Csi {
    fn parse(body: &str) -> Option<Self> {
        let mut csi = Self {
            params: vec![vec![0]],
            ..Self::default()
        };
        for (i, ch) in body.char_indices() {
            match ch {
                '<'..='?' if i == 0 => csi.private = Some(ch),
                '0'..='9' => {
                    let group = csi.params.last_mut()?;
                    let n = group.last_mut()?;
                    let digit = u16::try_from(ch.to_digit(10)?).ok()?;
                    *n = n.saturating_mul(10).saturating_add(digit);
                }
                ';' => csi.params.push(vec![0]),
                ':' => csi.params.last_mut()?.push(0),
                ' '..='/' => csi.intermediate = true,
                '@'..='~' => {
                    csi.verb = ch;
                    return Some(csi);
                }
                _ => return None,
            }
        }
        None
    }

    /// Parameter `i`, or `default` when omitted or zero.
    fn arg(&self, i: usize, default: u16) -> u16 {
        match self.params.get(i).and_then(|g| g.first()) {
            Some(&n) if n != 0 => n,
            _ => default,
        }
    }
}

// ─── Emulator ────────────────────────────────────────────────────────────────

/// A virtual VT screen fed from a byte stream.
pub struct Emulator {
    size: Size,
    grid: Vec<ScreenCell>,
    /// The main screen while the alternate screen is active.
    primary: Option<Vec<ScreenCell>>,
    damage: Vec<Range>,

    cursor: Point,
    pending_wrap: bool,
    attr: ColourAttribute,
    saved: Option<SavedCursor>,
    alt_saved: Option<SavedCursor>,
    top: u16,
    bottom: u16,

    cursor_visible: bool,
    autowrap: bool,
    mouse: MouseMode,
    mouse_sgr: bool,
    charsets: [Charset; 2],
    shift: usize,
    title: String,
    changes: Changes,
    replies: Vec<u8>,

    state: State,
    seq: String,
    escape_limit: usize,
    /// The current sequence outgrew `escape_limit`; swallow until it ends.
    overflowed: bool,
    utf8: Utf8Decoder,
}

impl Emulator {
    /// A blank screen of `size` (at least 1×1).
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self::with_escape_limit(size, DEFAULT_ESCAPE_LIMIT)
    }

    #[must_use]
    pub fn with_escape_limit(size: Size, escape_limit: usize) -> Self {
        let size = Size {
            cols: size.cols.max(1),
            rows: size.rows.max(1),
        };
        Self {
            size,
            grid: vec![ScreenCell::BLANK; cell_count(size)],
            primary: None,
            damage: vec![Range::full(size.cols); usize::from(size.rows)],
            cursor: Point::default(),
            pending_wrap: false,
            attr: ColourAttribute::DEFAULT,
            saved: None,
            alt_saved: None,
            top: 0,
            bottom: size.rows - 1,
            cursor_visible: true,
            autowrap: true,
            mouse: MouseMode::Off,
            mouse_sgr: false,
            charsets: [Charset::Ascii; 2],
            shift: 0,
            title: String::new(),
            changes: Changes::empty(),
            replies: Vec::new(),
            state: State::Normal,
            seq: String::new(),
            escape_limit: escape_limit.max(2),
            overflowed: false,
            utf8: Utf8Decoder::new(),
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    #[must_use]
    pub fn cell(&self, x: u16, y: u16) -> Option<&ScreenCell> {
        (x < self.size.cols && y < self.size.rows).then(|| &self.grid[self.index(x, y)])
    }

    #[must_use]
    pub fn row(&self, y: u16) -> Option<&[ScreenCell]> {
        (y < self.size.rows).then(|| {
            let start = self.index(0, y);
            &self.grid[start..start + usize::from(self.size.cols)]
        })
    }

    /// Row `y` as text, trail cells contributing nothing.
    #[must_use]
    pub fn row_text(&self, y: u16) -> String {
        self.row(y)
            .map(|row| row.iter().map(|c| c.ch.as_str()).collect())
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> Point {
        self.cursor
    }

    #[inline]
    #[must_use]
    pub const fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    /// The attribute the next printed char will get.
    #[inline]
    #[must_use]
    pub const fn attr(&self) -> ColourAttribute {
        self.attr
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[inline]
    #[must_use]
    pub const fn mouse_mode(&self) -> MouseMode {
        self.mouse
    }

    /// Whether mouse reports should use the SGR (mode 1006) encoding.
    #[inline]
    #[must_use]
    pub const fn mouse_sgr(&self) -> bool {
        self.mouse_sgr
    }

    #[inline]
    #[must_use]
    pub const fn is_alt_screen(&self) -> bool {
        self.primary.is_some()
    }

    /// Scrolling region as inclusive zero-based rows.
    #[inline]
    #[must_use]
    pub const fn scroll_region(&self) -> (u16, u16) {
        (self.top, self.bottom)
    }

    /// Whether an escape sequence is partially buffered.
    #[inline]
    #[must_use]
    pub const fn in_escape(&self) -> bool {
        !matches!(self.state, State::Normal)
    }

    /// Return and clear the accumulated out-of-band changes.
    pub fn take_changes(&mut self) -> Changes {
        std::mem::take(&mut self.changes)
    }

    /// Bytes the child expects back (device status reports).
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    /// Drain per-row damage.
    ///
    /// A range never starts on a trail or ends on a wide head, so copying
    /// it elsewhere moves whole glyphs.
    pub fn take_damage(&mut self) -> Vec<(u16, Range)> {
        let cols = self.size.cols;
        let mut out = Vec::new();
        for y in 0..self.size.rows {
            let r = std::mem::take(&mut self.damage[usize::from(y)]);
            if r.is_empty() {
                continue;
            }
            let row = self.index(0, y);
            let mut begin = r.begin.min(cols - 1);
            let mut end = r.end.min(cols - 1);
            while begin > 0 && self.grid[row + usize::from(begin)].is_trail() {
                begin -= 1;
            }
            if end + 1 < cols && self.grid[row + usize::from(end)].is_wide() {
                end += 1;
            }
            out.push((y, Range::new(begin, end)));
        }
        out
    }

    #[must_use]
    pub fn is_damaged(&self) -> bool {
        self.damage.iter().any(|r| !r.is_empty())
    }

    // ─── Input ───────────────────────────────────────────────────────────

    /// Interpret a chunk of child output. Chunks may split anything.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut utf8 = self.utf8;
        utf8.decode(bytes, |ch| self.advance(ch));
        self.utf8 = utf8;
    }

    fn advance(&mut self, ch: char) {
        match self.state {
            State::Normal => self.normal(ch),
            State::EscapeStart => self.escape_start(ch),
            State::EscapeAccumulate => self.accumulate(ch),
        }
    }

    fn normal(&mut self, ch: char) {
        match ch {
            '\x1b' => {
                self.seq.clear();
                self.state = State::EscapeStart;
            }
            c if c.is_control() => self.execute(c),
            c => self.print(c),
        }
    }

    /// C0 controls. Anything not listed is ignored.
    fn execute(&mut self, ch: char) {
        match ch {
            '\x07' => self.changes |= Changes::BELL,
            '\x08' => self.goto(i32::from(self.cursor.x) - 1, i32::from(self.cursor.y)),
            '\t' => {
                let next = i32::from(self.cursor.x / TAB_WIDTH + 1) * i32::from(TAB_WIDTH);
                self.goto(next, i32::from(self.cursor.y));
            }
            '\n' | '\x0b' | '\x0c' => self.linefeed(),
            '\r' => {
                self.cursor.x = 0;
                self.pending_wrap = false;
            }
            '\x0e' => self.shift = 1,
            '\x0f' => self.shift = 0,
            _ => {}
        }
    }

    fn escape_start(&mut self, ch: char) {
        self.state = State::Normal;
        match ch {
            '\x18' | '\x1a' => {}
            '\x1b' => self.state = State::EscapeStart,
            '[' | ']' | '(' | ')' | '#' | '%' | ' ' => {
                self.seq.push(ch);
                self.overflowed = false;
                self.state = State::EscapeAccumulate;
            }
            '7' => self.save_cursor(),
            '8' => self.restore_cursor(),
            'D' => self.linefeed(),
            'E' => {
                self.cursor.x = 0;
                self.linefeed();
            }
            'M' => self.reverse_index(),
            'c' => self.full_reset(),
            // Keypad modes and a stray string terminator.
            '=' | '>' | '\\' => {}
            c if c.is_control() => {
                self.execute(c);
                self.state = State::EscapeStart;
            }
            c => tracing::trace!(final_char = ?c, "unknown escape dropped"),
        }
    }

    fn accumulate(&mut self, ch: char) {
        if matches!(ch, '\x18' | '\x1a') {
            self.abort();
            return;
        }
        let kind = self.seq.as_bytes().first().copied();
        match kind {
            Some(b']') => match ch {
                '\x07' => {
                    self.finish_osc();
                    self.state = State::Normal;
                }
                // ESC \ terminates; the backslash is absorbed by EscapeStart.
                '\x1b' => {
                    self.finish_osc();
                    self.seq.clear();
                    self.state = State::EscapeStart;
                }
                c if c.is_control() => {}
                c => self.push_seq(c),
            },
            Some(b'[') => match ch {
                '\x1b' => {
                    self.seq.clear();
                    self.state = State::EscapeStart;
                }
                c if c.is_control() => self.execute(c),
                '@'..='~' => {
                    self.push_seq(ch);
                    if !self.overflowed {
                        self.csi();
                    }
                    self.abort();
                }
                c => self.push_seq(c),
            },
            _ => match ch {
                '\x1b' => {
                    self.seq.clear();
                    self.state = State::EscapeStart;
                }
                c => {
                    self.designate(c);
                    self.state = State::Normal;
                }
            },
        }
    }

    fn push_seq(&mut self, ch: char) {
        if self.overflowed {
            return;
        }
        if self.seq.len() + ch.len_utf8() > self.escape_limit {
            tracing::debug!(limit = self.escape_limit, "escape sequence too long, dropped");
            // Keep the introducer so the terminator is still recognised.
            self.seq.truncate(1);
            self.overflowed = true;
        } else {
            self.seq.push(ch);
        }
    }

    fn finish_osc(&mut self) {
        if !self.overflowed {
            self.osc();
        }
        self.overflowed = false;
    }

    fn abort(&mut self) {
        self.seq.clear();
        self.overflowed = false;
        self.state = State::Normal;
    }

    // ─── Printing ────────────────────────────────────────────────────────

    fn print(&mut self, ch: char) {
        let ch = self.charsets[self.shift].map(ch);
        let Some(width) = ch.width() else {
            return;
        };
        if width == 0 {
            self.combine(ch);
            return;
        }

        let cols = self.size.cols;
        if self.pending_wrap {
            self.wrap();
        }
        let wide = width >= 2;
        if wide && self.cursor.x + 1 >= cols && self.autowrap && cols > 1 {
            // Both halves must land on one row.
            let blank = self.blank();
            self.put(self.cursor.x, self.cursor.y, &[blank]);
            self.wrap();
        }

        let Point { x, y } = self.cursor;
        let attr = self.attr;
        if wide && x + 1 < cols {
            self.put(x, y, &[ScreenCell::new(CellChar::wide(ch), attr), ScreenCell::trail(attr)]);
        } else if wide {
            self.put(x, y, &[ScreenCell::new(CellChar::wide(ch), attr)]);
        } else {
            self.put(x, y, &[ScreenCell::new(CellChar::narrow(ch), attr)]);
        }

        let next = x.saturating_add(if wide { 2 } else { 1 });
        if next >= cols {
            self.cursor.x = cols - 1;
            self.pending_wrap = self.autowrap;
        } else {
            self.cursor.x = next;
        }
    }

    fn wrap(&mut self) {
        self.cursor.x = 0;
        self.linefeed();
    }

    /// Attach a zero-width char to the glyph left of the cursor.
    fn combine(&mut self, mark: char) {
        let Point { mut x, y } = self.cursor;
        if !self.pending_wrap {
            if x == 0 {
                return;
            }
            x -= 1;
        }
        if x > 0 && self.grid[self.index(x, y)].is_trail() {
            x -= 1;
        }
        let i = self.index(x, y);
        if self.grid[i].ch.push_combining(mark) {
            self.damage[usize::from(y)].widen(x, x);
        }
    }

    /// Write `cells` at `(x, y)`, clipped to the row, repairing broken pairs.
    fn put(&mut self, x: u16, y: u16, cells: &[ScreenCell]) {
        let room = usize::from(self.size.cols.saturating_sub(x));
        let n = cells.len().min(room);
        if n == 0 || y >= self.size.rows {
            return;
        }
        let start = self.index(x, y);
        self.grid[start..start + n].copy_from_slice(&cells[..n]);
        #[allow(clippy::cast_possible_truncation)] // n <= room <= u16::MAX.
        let end = x + n as u16 - 1;
        self.damage[usize::from(y)].widen(x, end);
        self.repair(y, x.saturating_sub(1), end.saturating_add(1));
    }

    /// Blank columns `[x0, x1]` of row `y` in the erase attribute.
    fn fill(&mut self, y: u16, x0: u16, x1: u16) {
        let x1 = x1.min(self.size.cols - 1);
        if x0 > x1 {
            return;
        }
        let blank = self.blank();
        let row = self.index(0, y);
        self.grid[row + usize::from(x0)..=row + usize::from(x1)].fill(blank);
        self.damage[usize::from(y)].widen(x0, x1);
        self.repair(y, x0.saturating_sub(1), x1.saturating_add(1));
    }

    fn fill_rows(&mut self, from: u16, to: u16) {
        for y in from..=to.min(self.size.rows - 1) {
            self.fill(y, 0, self.size.cols - 1);
        }
    }

    /// Blank orphan trails and heads that lost their trail in `[from, to]`.
    fn repair(&mut self, y: u16, from: u16, to: u16) {
        let cols = self.size.cols;
        let to = to.min(cols - 1);
        let row = self.index(0, y);
        for x in from..=to {
            let i = row + usize::from(x);
            let cell = self.grid[i];
            let broken = if cell.is_trail() {
                x == 0 || !self.grid[i - 1].is_wide()
            } else {
                cell.is_wide() && x + 1 < cols && !self.grid[i + 1].is_trail()
            };
            if broken {
                self.grid[i] = ScreenCell::blank(cell.attr);
                self.damage[usize::from(y)].widen(x, x);
            }
        }
    }

    /// The cell erases leave behind: current colours, no style.
    const fn blank(&self) -> ScreenCell {
        ScreenCell::blank(ColourAttribute::new(self.attr.fg, self.attr.bg, Style::empty()))
    }

    // ─── Cursor motion ───────────────────────────────────────────────────

    fn goto(&mut self, x: i32, y: i32) {
        self.cursor = Point::new(
            clamp_to(x, i32::from(self.size.cols) - 1),
            clamp_to(y, i32::from(self.size.rows) - 1),
        );
        self.pending_wrap = false;
    }

    fn linefeed(&mut self) {
        self.pending_wrap = false;
        if self.cursor.y == self.bottom {
            self.scroll_up(self.top, self.bottom, 1);
        } else if self.cursor.y + 1 < self.size.rows {
            self.cursor.y += 1;
        }
    }

    fn reverse_index(&mut self) {
        self.pending_wrap = false;
        if self.cursor.y == self.top {
            self.scroll_down(self.top, self.bottom, 1);
        } else if self.cursor.y > 0 {
            self.cursor.y -= 1;
        }
    }

    fn save_cursor(&mut self) {
        self.saved = Some(self.snapshot());
    }

    fn restore_cursor(&mut self) {
        let saved = self.saved.unwrap_or(SavedCursor {
            pos: Point::default(),
            attr: ColourAttribute::DEFAULT,
            pending_wrap: false,
            charsets: [Charset::Ascii; 2],
            shift: 0,
        });
        self.apply(saved);
    }

    const fn snapshot(&self) -> SavedCursor {
        SavedCursor {
            pos: self.cursor,
            attr: self.attr,
            pending_wrap: self.pending_wrap,
            charsets: self.charsets,
            shift: self.shift,
        }
    }

    fn apply(&mut self, saved: SavedCursor) {
        self.goto(i32::from(saved.pos.x), i32::from(saved.pos.y));
        self.pending_wrap = saved.pending_wrap && self.cursor == saved.pos;
        self.attr = saved.attr;
        self.charsets = saved.charsets;
        self.shift = saved.shift;
    }

    // ─── Scrolling ───────────────────────────────────────────────────────

    /// Move rows `[top, bottom]` up by `n`; blank rows appear at the bottom.
    fn scroll_up(&mut self, top: u16, bottom: u16, n: u16) {
        let n = n.min(bottom - top + 1);
        let cols = usize::from(self.size.cols);
        let (t, b) = (usize::from(top), usize::from(bottom));
        let n_us = usize::from(n);
        self.grid.copy_within((t + n_us) * cols..(b + 1) * cols, t * cols);
        self.fill_rows(bottom + 1 - n, bottom);
        self.damage_rows(top, bottom);
    }

    /// Move rows `[top, bottom]` down by `n`; blank rows appear at the top.
    fn scroll_down(&mut self, top: u16, bottom: u16, n: u16) {
        let n = n.min(bottom - top + 1);
        let cols = usize::from(self.size.cols);
        let (t, b) = (usize::from(top), usize::from(bottom));
        let n_us = usize::from(n);
        self.grid.copy_within(t * cols..(b + 1 - n_us) * cols, (t + n_us) * cols);
        self.fill_rows(top, top + n - 1);
        self.damage_rows(top, bottom);
    }

    fn damage_rows(&mut self, from: u16, to: u16) {
        let full = Range::full(self.size.cols);
        for r in &mut self.damage[usize::from(from)..=usize::from(to)] {
            *r = full;
        }
    }

    // ─── Escape dispatch ─────────────────────────────────────────────────

    fn csi(&mut self) {
        let seq = std::mem::take(&mut self.seq);
        let Some(csi) = Csi::parse(&seq[1..]) else {
            tracing::trace!(seq = %seq.escape_debug(), "malformed CSI dropped");
            return;
        };
        if csi.intermediate {
            tracing::trace!(seq = %seq.escape_debug(), "CSI with intermediate ignored");
            return;
        }

        let n = i32::from(csi.arg(0, 1));
        let (x, y) = (i32::from(self.cursor.x), i32::from(self.cursor.y));
        let (top, bottom) = (i32::from(self.top), i32::from(self.bottom));
        let last_row = i32::from(self.size.rows) - 1;

        match (csi.private, csi.verb) {
            (None, 'A') => self.goto(x, (y - n).max(if y >= top { top } else { 0 })),
            (None, 'B' | 'e') => self.goto(x, (y + n).min(if y <= bottom { bottom } else { last_row })),
            (None, 'C' | 'a') => self.goto(x + n, y),
            (None, 'D') => self.goto(x - n, y),
            (None, 'E') => self.goto(0, (y + n).min(if y <= bottom { bottom } else { last_row })),
            (None, 'F') => self.goto(0, (y - n).max(if y >= top { top } else { 0 })),
            (None, 'G' | '`') => self.goto(n - 1, y),
            (None, 'd') => self.goto(x, n - 1),
            (None, 'H' | 'f') => self.goto(i32::from(csi.arg(1, 1)) - 1, n - 1),
            (None, 'J') => self.erase_display(csi.arg(0, 0)),
            (None, 'K') => self.erase_line(csi.arg(0, 0)),
            (None, '@') => self.insert_chars(csi.arg(0, 1)),
            (None, 'P') => self.delete_chars(csi.arg(0, 1)),
            (None, 'X') => {
                let x = self.cursor.x;
                self.fill(self.cursor.y, x, x.saturating_add(csi.arg(0, 1) - 1));
            }
            (None, 'L') => self.insert_lines(csi.arg(0, 1)),
            (None, 'M') => self.delete_lines(csi.arg(0, 1)),
            (None, 'S') => self.scroll_up(self.top, self.bottom, csi.arg(0, 1)),
            (None, 'T') => self.scroll_down(self.top, self.bottom, csi.arg(0, 1)),
            (None, 'm') => self.sgr(&csi.params),
            (None, 'n') => self.status_report(csi.arg(0, 0)),
            (None, 'r') => self.set_region(csi.arg(0, 1), csi.arg(1, self.size.rows)),
            (None, 's') => self.save_cursor(),
            (None, 'u') => self.restore_cursor(),
            (Some('?'), 'h' | 'l') => {
                let on = csi.verb == 'h';
                for group in &csi.params {
                    self.set_mode(group[0], on);
                }
            }
            _ => tracing::trace!(seq = %seq.escape_debug(), "unsupported CSI ignored"),
        }
    }

    /// `ESC ( x` and friends: the designation is the second char.
    fn designate(&mut self, ch: char) {
        let slot = match self.seq.as_bytes().first() {
            Some(b'(') => 0,
            Some(b')') => 1,
            _ => return,
        };
        self.charsets[slot] = if ch == '0' { Charset::DecGraphics } else { Charset::Ascii };
    }

    fn osc(&mut self) {
        let body = self.seq.get(1..).unwrap_or_default();
        if let Some(("0" | "2", title)) = body.split_once(';') {
            if self.title != title {
                self.title = title.to_owned();
                self.changes |= Changes::TITLE;
            }
        }
    }

    fn erase_display(&mut self, mode: u16) {
        let Point { x, y } = self.cursor;
        let last = self.size.rows - 1;
        match mode {
            0 => {
                self.fill(y, x, u16::MAX);
                if y < last {
                    self.fill_rows(y + 1, last);
                }
            }
            1 => {
                if y > 0 {
                    self.fill_rows(0, y - 1);
                }
                self.fill(y, 0, x);
            }
            2 | 3 => self.fill_rows(0, last),
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let Point { x, y } = self.cursor;
        match mode {
            0 => self.fill(y, x, u16::MAX),
            1 => self.fill(y, 0, x),
            2 => self.fill(y, 0, u16::MAX),
            _ => {}
        }
    }

    fn insert_chars(&mut self, n: u16) {
        let Point { x, y } = self.cursor;
        let cols = self.size.cols;
        let n = n.min(cols - x);
        let row = self.index(0, y);
        let (x_us, n_us, c_us) = (usize::from(x), usize::from(n), usize::from(cols));
        self.grid.copy_within(row + x_us..row + c_us - n_us, row + x_us + n_us);
        self.damage[usize::from(y)].widen(x, cols - 1);
        self.fill(y, x, x + n - 1);
        self.pending_wrap = false;
    }

    fn delete_chars(&mut self, n: u16) {
        let Point { x, y } = self.cursor;
        let cols = self.size.cols;
        let n = n.min(cols - x);
        let row = self.index(0, y);
        let (x_us, n_us, c_us) = (usize::from(x), usize::from(n), usize::from(cols));
        self.grid.copy_within(row + x_us + n_us..row + c_us, row + x_us);
        self.damage[usize::from(y)].widen(x, cols - 1);
        self.fill(y, cols - n, cols - 1);
        self.repair(y, x.saturating_sub(1), x);
        self.pending_wrap = false;
    }

    fn insert_lines(&mut self, n: u16) {
        let y = self.cursor.y;
        if y < self.top || y > self.bottom {
            return;
        }
        self.scroll_down(y, self.bottom, n);
        self.goto(0, i32::from(y));
    }

    fn delete_lines(&mut self, n: u16) {
        let y = self.cursor.y;
        if y < self.top || y > self.bottom {
            return;
        }
        self.scroll_up(y, self.bottom, n);
        self.goto(0, i32::from(y));
    }

    /// DECSTBM with one-based inclusive bounds. Invalid regions are ignored.
    fn set_region(&mut self, top: u16, bottom: u16) {
        let bottom = bottom.min(self.size.rows);
        if top >= bottom {
            return;
        }
        self.top = top - 1;
        self.bottom = bottom - 1;
        self.goto(0, 0);
    }

    fn status_report(&mut self, kind: u16) {
        match kind {
            5 => self.replies.extend_from_slice(b"\x1b[0n"),
            6 => {
                let (x, y) = (u32::from(self.cursor.x) + 1, u32::from(self.cursor.y) + 1);
                let reply = format!("\x1b[{y};{x}R");
                self.replies.extend_from_slice(reply.as_bytes());
            }
            _ => {}
        }
    }

    fn set_mode(&mut self, mode: u16, on: bool) {
        match mode {
            7 => self.autowrap = on,
            25 => {
                if self.cursor_visible != on {
                    self.cursor_visible = on;
                    self.changes |= Changes::CURSOR_VISIBILITY;
                }
            }
            1000 => self.set_mouse(MouseMode::Click, on),
            1002 => self.set_mouse(MouseMode::Drag, on),
            1003 => self.set_mouse(MouseMode::Motion, on),
            1006 => {
                if self.mouse_sgr != on {
                    self.mouse_sgr = on;
                    self.changes |= Changes::MOUSE_MODE;
                }
            }
            1049 => {
                if on {
                    self.enter_alt_screen(true);
                } else {
                    self.leave_alt_screen(true);
                }
            }
            47 | 1047 => {
                if on {
                    self.enter_alt_screen(false);
                } else {
                    self.leave_alt_screen(false);
                }
            }
            _ => tracing::trace!(mode, on, "unsupported private mode ignored"),
        }
    }

    fn set_mouse(&mut self, mode: MouseMode, on: bool) {
        let next = if on {
            mode
        } else if self.mouse == mode {
            MouseMode::Off
        } else {
            self.mouse
        };
        if next != self.mouse {
            self.mouse = next;
            self.changes |= Changes::MOUSE_MODE;
        }
    }

    fn enter_alt_screen(&mut self, save_cursor: bool) {
        if self.primary.is_some() {
            return;
        }
        if save_cursor {
            self.alt_saved = Some(self.snapshot());
        }
        let blank = vec![ScreenCell::BLANK; cell_count(self.size)];
        self.primary = Some(std::mem::replace(&mut self.grid, blank));
        self.damage_rows(0, self.size.rows - 1);
    }

    fn leave_alt_screen(&mut self, restore_cursor: bool) {
        let Some(primary) = self.primary.take() else {
            return;
        };
        self.grid = primary;
        self.damage_rows(0, self.size.rows - 1);
        if restore_cursor {
            if let Some(saved) = self.alt_saved.take() {
                self.apply(saved);
            }
        }
    }

    /// `ESC c`. Geometry and title survive.
    fn full_reset(&mut self) {
        let mut fresh = Self::with_escape_limit(self.size, self.escape_limit);
        fresh.title = std::mem::take(&mut self.title);
        fresh.changes = self.changes;
        fresh.replies = std::mem::take(&mut self.replies);
        fresh.utf8 = self.utf8;
        if !self.cursor_visible {
            fresh.changes |= Changes::CURSOR_VISIBILITY;
        }
        if self.mouse != MouseMode::Off || self.mouse_sgr {
            fresh.changes |= Changes::MOUSE_MODE;
        }
        *self = fresh;
    }

    // ─── SGR ─────────────────────────────────────────────────────────────

    fn sgr(&mut self, params: &[Vec<u16>]) {
        let mut i = 0;
        while i < params.len() {
            let group = &params[i];
            let style = &mut self.attr.style;
            match group[0] {
                0 => self.attr = ColourAttribute::DEFAULT,
                1 => style.insert(Style::BOLD),
                3 => style.insert(Style::ITALIC),
                4 | 21 => style.insert(Style::UNDERLINE),
                5 | 6 => style.insert(Style::BLINK),
                7 => style.insert(Style::REVERSE),
                8 => style.insert(Style::HIDDEN),
                9 => style.insert(Style::STRIKE),
                22 => style.remove(Style::BOLD),
                23 => style.remove(Style::ITALIC),
                24 => style.remove(Style::UNDERLINE),
                25 => style.remove(Style::BLINK),
                27 => style.remove(Style::REVERSE),
                28 => style.remove(Style::HIDDEN),
                29 => style.remove(Style::STRIKE),
                code @ 30..=37 => self.attr.fg = ansi_colour(code - 30),
                code @ 40..=47 => self.attr.bg = ansi_colour(code - 40),
                code @ 90..=97 => self.attr.fg = ansi_colour(code - 90 + 8),
                code @ 100..=107 => self.attr.bg = ansi_colour(code - 100 + 8),
                39 => self.attr.fg = DesiredColour::Default,
                49 => self.attr.bg = DesiredColour::Default,
                code @ (38 | 48) => {
                    let (colour, used) = extended_colour(group, &params[i + 1..]);
                    if let Some(c) = colour {
                        if code == 38 {
                            self.attr.fg = c;
                        } else {
                            self.attr.bg = c;
                        }
                    }
                    i += used;
                }
                _ => {}
            }
            i += 1;
        }
    }

    // ─── Geometry ────────────────────────────────────────────────────────

    /// Change the screen size (at least 1×1).
    ///
    /// Content keeps its bottom-left alignment and the cursor moves with
    /// it. The scrolling region resets to the full screen and every row is
    /// damaged.
    pub fn resize(&mut self, size: Size) {
        let size = Size {
            cols: size.cols.max(1),
            rows: size.rows.max(1),
        };
        let old = self.size;
        if size == old {
            return;
        }
        self.grid = realign(&self.grid, old, size);
        if let Some(primary) = self.primary.as_mut() {
            *primary = realign(primary, old, size);
        }
        self.size = size;
        self.damage = vec![Range::full(size.cols); usize::from(size.rows)];
        self.top = 0;
        self.bottom = size.rows - 1;

        let shift = i32::from(size.rows) - i32::from(old.rows);
        self.goto(i32::from(self.cursor.x), i32::from(self.cursor.y) + shift);
        tracing::debug!(from = ?old, to = ?size, "emulator resized");
    }

    #[inline]
    const fn index(&self, x: u16, y: u16) -> usize {
        y as usize * self.size.cols as usize + x as usize
    }
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .field("attr", &self.attr)
            .field("state", &self.state)
            .field("alt_screen", &self.primary.is_some())
            .finish_non_exhaustive()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cell_count(size: Size) -> usize {
    usize::from(size.cols) * usize::from(size.rows)
}

fn clamp_to(v: i32, max: i32) -> u16 {
    u16::try_from(v.clamp(0, max.max(0))).unwrap_or(0)
}

/// Copy the bottom-left-aligned intersection of `grid` into a `new` grid.
fn realign(grid: &[ScreenCell], old: Size, new: Size) -> Vec<ScreenCell> {
    let mut out = vec![ScreenCell::BLANK; cell_count(new)];
    let rows = old.rows.min(new.rows);
    let cols = usize::from(old.cols.min(new.cols));
    for k in 0..rows {
        let src = usize::from(old.rows - rows + k) * usize::from(old.cols);
        let dst = usize::from(new.rows - rows + k) * usize::from(new.cols);
        out[dst..dst + cols].copy_from_slice(&grid[src..src + cols]);
    }
    out
}

/// SGR colours come in ANSI order; the grid stores BIOS order.
#[allow(clippy::cast_possible_truncation)] // Callers pass 0–15.
const fn ansi_colour(idx: u16) -> DesiredColour {
    DesiredColour::from_bios(bios_to_xterm(idx as u8))
}

fn byte(v: u16) -> u8 {
    u8::try_from(v).unwrap_or(u8::MAX)
}

/// Decode a `38`/`48` colour.
///
/// The colon form carries everything in `group`. The semicolon form takes
/// its arguments from the following groups; the second value is how many
/// of them were consumed.
fn extended_colour(group: &[u16], rest: &[Vec<u16>]) -> (Option<DesiredColour>, usize) {
    if group.len() > 1 {
        let colour = match &group[1..] {
            [5, n, ..] => Some(DesiredColour::from_xterm(byte(*n))),
            [2, _, r, g, b, ..] | [2, r, g, b] => Some(DesiredColour::from_rgb(byte(*r), byte(*g), byte(*b))),
            _ => None,
        };
        return (colour, 0);
    }

    let args: Vec<u16> = rest.iter().take(4).map(|g| g[0]).collect();
    match args.as_slice() {
        [5, n, ..] => (Some(DesiredColour::from_xterm(byte(*n))), 2),
        [2, r, g, b] => (Some(DesiredColour::from_rgb(byte(*r), byte(*g), byte(*b))), 4),
        [5] => (None, 1),
        [2, ..] => (None, args.len()),
        _ => (None, 0),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
