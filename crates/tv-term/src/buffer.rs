// SPDX-License-Identifier: MIT
//
// ScreenBuffer: a double-buffered cell grid with per-row damage.
//
// Two grids of the same size live side by side:
//
//   cells   what the application wants on screen right now
//   shadow  what the display was last told to show
//
// Writes land in `cells` and widen the row's damage range. Nothing touches
// the display until `flush`, which walks only the damaged columns, compares
// each cell to its shadow and sends the ones that differ to the adapter.
// Any number of writes between two flushes collapse into one diff pass, so
// deferring a flush is always safe.
//
// Wide glyphs make the diff more than a per-cell comparison:
//
//   - A WIDE head and its TRAIL are written as one glyph, once.
//   - A damage range that starts on a TRAIL backs up to its head first.
//   - A head that no longer fits before the right edge is shown as a blank.
//   - Terminals that leave fragments when a wide glyph is drawn over stale
//     cells (Quirks::WIDE_GLYPH_OVERLAP) get the span blanked first.
//
// Writes keep the grid consistent: a TRAIL is never left without its head,
// and a head never points at a column that is not its TRAIL.

use std::io;
use std::time::{Duration, Instant};

use crate::adapter::{ConsoleAdapter, Point, Size};
use crate::cell::{ScreenCell, cells_from_str};
use crate::color::ColourAttribute;
use crate::convert::{Quirks, TermCap};

// ─── Range ───────────────────────────────────────────────────────────────────

/// Inclusive column interval `[begin, end]`. Empty when `begin > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub begin: u16,
    pub end: u16,
}

impl Range {
    /// The empty range. Widening it by any interval yields that interval.
    pub const EMPTY: Self = Self {
        begin: u16::MAX,
        end: 0,
    };

    #[inline]
    #[must_use]
    pub const fn new(begin: u16, end: u16) -> Self {
        Self { begin, end }
    }

    /// Every column of a row `cols` wide.
    #[inline]
    #[must_use]
    pub const fn full(cols: u16) -> Self {
        if cols == 0 { Self::EMPTY } else { Self::new(0, cols - 1) }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.begin > self.end
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, x: u16) -> bool {
        self.begin <= x && x <= self.end
    }

    /// Grow to cover `[begin, end]` as well.
    #[inline]
    pub fn widen(&mut self, begin: u16, end: u16) {
        self.begin = self.begin.min(begin);
        self.end = self.end.max(end);
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::EMPTY
    }
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Where the cursor is and whether it is drawn.
///
/// The cursor is not a cell. It is rendered by swapping the colours of the
/// cell beneath it for the duration of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub pos: Point,
    pub visible: bool,
}

// ─── FlushStats ──────────────────────────────────────────────────────────────

/// What a flush pass did, for profiling and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// `write_cell` calls issued, overlap blanking included.
    pub cells_written: usize,
    /// Rows that had damage and were scanned.
    pub rows_scanned: usize,
    /// Whether the display was cleared first.
    pub cleared: bool,
}

// ─── ScreenBuffer ────────────────────────────────────────────────────────────

/// A cell grid that flushes only what changed.
pub struct ScreenBuffer {
    size: Size,
    caps: TermCap,
    cells: Vec<ScreenCell>,
    shadow: Vec<ScreenCell>,
    damage: Vec<Range>,
    cursor: Cursor,
    /// Cell that carried the inverted cursor during the last flush.
    overlay: Option<Point>,
    /// Where the caret was last parked on the display.
    parked: Option<Point>,
    /// The display holds unknown content; clear it before the next diff.
    needs_clear: bool,
}

impl ScreenBuffer {
    /// A blank buffer. The first flush clears the display.
    #[must_use]
    pub fn new(size: Size, caps: TermCap) -> Self {
        let n = cell_count(size);
        Self {
            size,
            caps,
            cells: vec![ScreenCell::BLANK; n],
            shadow: vec![ScreenCell::BLANK; n],
            damage: vec![Range::EMPTY; usize::from(size.rows)],
            cursor: Cursor::default(),
            overlay: None,
            parked: None,
            needs_clear: true,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn caps(&self) -> TermCap {
        self.caps
    }

    /// Switch capability. Converted colours may change, so everything is
    /// redrawn.
    pub fn set_caps(&mut self, caps: TermCap) {
        self.caps = caps;
        self.invalidate();
    }

    #[inline]
    const fn index(&self, x: u16, y: u16) -> usize {
        y as usize * self.size.cols as usize + x as usize
    }

    #[must_use]
    pub fn cell(&self, x: u16, y: u16) -> Option<&ScreenCell> {
        (x < self.size.cols && y < self.size.rows).then(|| &self.cells[self.index(x, y)])
    }

    #[must_use]
    pub fn row(&self, y: u16) -> Option<&[ScreenCell]> {
        if y >= self.size.rows {
            return None;
        }
        let start = self.index(0, y);
        Some(&self.cells[start..start + usize::from(self.size.cols)])
    }

    /// Pending damage of row `y`.
    #[must_use]
    pub fn damage(&self, y: u16) -> Range {
        self.damage.get(usize::from(y)).copied().unwrap_or(Range::EMPTY)
    }

    /// Whether the next flush has anything to do.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.needs_clear
            || self.damage.iter().any(|r| !r.is_empty())
            || self.overlay != self.cursor_cell()
            || (self.cursor.visible && self.parked != Some(self.cursor.pos))
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Copy up to `count` cells into row `y` starting at column `x`.
    ///
    /// Out-of-bounds `(x, y)` is a no-op. A run that would cross the right
    /// edge is clipped.
    pub fn write(&mut self, x: u16, y: u16, cells: &[ScreenCell], count: usize) {
        if x >= self.size.cols || y >= self.size.rows {
            return;
        }
        let room = usize::from(self.size.cols - x);
        let n = count.min(cells.len()).min(room);
        if n == 0 {
            return;
        }
        let start = self.index(x, y);
        self.cells[start..start + n].copy_from_slice(&cells[..n]);

        #[allow(clippy::cast_possible_truncation)] // n <= room <= u16::MAX.
        let end = x + (n as u16) - 1;
        self.damage[usize::from(y)].widen(x, end);
        self.repair_pairs(y, x.saturating_sub(1), end.saturating_add(1));
    }

    /// Write `text` at `(x, y)` in one attribute. Returns the columns used.
    pub fn write_str(&mut self, x: u16, y: u16, text: &str, attr: ColourAttribute) -> usize {
        let cells = cells_from_str(text, attr);
        let room = usize::from(self.size.cols.saturating_sub(x));
        self.write(x, y, &cells, cells.len());
        cells.len().min(room)
    }

    /// Fill the whole grid with blanks in `attr`.
    pub fn clear(&mut self, attr: ColourAttribute) {
        self.cells.fill(ScreenCell::blank(attr));
        let full = Range::full(self.size.cols);
        self.damage.fill(full);
    }

    /// Forget what the display shows. The next flush clears it and redraws
    /// every non-blank cell.
    pub fn invalidate(&mut self) {
        self.shadow.fill(ScreenCell::BLANK);
        self.damage.fill(Range::full(self.size.cols));
        self.needs_clear = true;
        self.overlay = None;
        self.parked = None;
    }

    /// Blank half-pairs in columns `[from, to]` of row `y`.
    ///
    /// A TRAIL whose left neighbour is not WIDE is orphaned; a WIDE whose
    /// right neighbour exists but is not a TRAIL has lost its second half.
    /// Both become blanks in their own attribute. A WIDE in the last column
    /// is left alone: flush renders it as a blank without losing the text.
    fn repair_pairs(&mut self, y: u16, from: u16, to: u16) {
        let cols = self.size.cols;
        let to = to.min(cols.saturating_sub(1));
        let row = self.index(0, y);
        for x in from..=to {
            let i = row + usize::from(x);
            let cell = self.cells[i];
            let broken = if cell.is_trail() {
                x == 0 || !self.cells[i - 1].is_wide()
            } else {
                cell.is_wide() && x + 1 < cols && !self.cells[i + 1].is_trail()
            };
            if broken {
                self.cells[i] = ScreenCell::blank(cell.attr);
                self.damage[usize::from(y)].widen(x, x);
            }
        }
    }

    // ─── Cursor ──────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Move the cursor. The position is clamped into the grid.
    pub fn set_cursor(&mut self, pos: Point) {
        self.cursor.pos = Point::new(
            pos.x.min(self.size.cols.saturating_sub(1)),
            pos.y.min(self.size.rows.saturating_sub(1)),
        );
    }

    pub const fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor.visible = visible;
    }

    /// The cell that should carry the cursor, adjusted to a glyph's head.
    fn cursor_cell(&self) -> Option<Point> {
        let Cursor { pos, visible } = self.cursor;
        if !visible || pos.x >= self.size.cols || pos.y >= self.size.rows {
            return None;
        }
        let x = if pos.x > 0 && self.cells[self.index(pos.x, pos.y)].is_trail() {
            pos.x - 1
        } else {
            pos.x
        };
        Some(Point::new(x, pos.y))
    }

    // ─── Resize ──────────────────────────────────────────────────────────

    /// Reallocate both grids for `size`.
    ///
    /// The bottom-left-aligned intersection of old and new content is kept;
    /// everything else is blank. Every row is damaged and the display is
    /// cleared on the next flush. The cursor moves with the content.
    pub fn resize(&mut self, size: Size) {
        let old = self.size;
        let mut cells = vec![ScreenCell::BLANK; cell_count(size)];
        let rows = old.rows.min(size.rows);
        let cols = usize::from(old.cols.min(size.cols));

        for k in 0..rows {
            let src = usize::from(old.rows - rows + k) * usize::from(old.cols);
            let dst = usize::from(size.rows - rows + k) * usize::from(size.cols);
            cells[dst..dst + cols].copy_from_slice(&self.cells[src..src + cols]);
        }

        self.size = size;
        self.cells = cells;
        self.shadow = vec![ScreenCell::BLANK; cell_count(size)];
        self.damage = vec![Range::EMPTY; usize::from(size.rows)];
        self.invalidate();

        let shift = i32::from(size.rows) - i32::from(old.rows);
        let y = (i32::from(self.cursor.pos.y) + shift).max(0);
        self.set_cursor(Point::new(
            self.cursor.pos.x,
            u16::try_from(y).unwrap_or(u16::MAX),
        ));
        tracing::debug!(from = ?old, to = ?size, "screen buffer resized");
    }

    // ─── Flush ───────────────────────────────────────────────────────────

    /// Bring the display up to date through `adapter`.
    ///
    /// Only damaged columns are examined and only cells that differ from
    /// the shadow grid are written. Damage is cleared row by row as each
    /// row completes, so an I/O error leaves unfinished rows damaged.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the adapter.
    pub fn flush(&mut self, adapter: &mut impl ConsoleAdapter) -> io::Result<FlushStats> {
        let mut stats = FlushStats::default();

        if self.needs_clear {
            adapter.clear_screen()?;
            // The cursor is drawn in-cell; the hardware caret stays hidden.
            adapter.set_caret_size(0)?;
            self.needs_clear = false;
            stats.cleared = true;
        }

        // The previous cursor cell must be repainted wherever the cursor is now.
        if let Some(p) = self.overlay.take() {
            self.touch(p);
        }
        let overlay = self.cursor_cell().map(|p| {
            let i = self.index(p.x, p.y);
            let saved = self.cells[i].attr;
            self.cells[i].attr = saved.swapped();
            self.touch(p);
            (p, saved)
        });

        let result = self.flush_rows(adapter, &mut stats);

        if let Some((p, saved)) = overlay {
            let i = self.index(p.x, p.y);
            self.cells[i].attr = saved;
            self.overlay = Some(p);
        }
        result?;

        let caret = self.cursor.pos;
        let moved = self.parked != Some(caret);
        if stats.cells_written > 0 || moved {
            adapter.set_caret_pos(caret)?;
            self.parked = Some(caret);
        }
        if stats.cells_written > 0 || stats.cleared || moved {
            adapter.flush()?;
        }
        Ok(stats)
    }

    /// Flush unless the last flush was less than one frame ago.
    ///
    /// A deferred call reports how long until a flush is allowed, rounded
    /// up to whole milliseconds, for use as the caller's next wait timeout.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the adapter.
    pub fn flush_paced(
        &mut self,
        adapter: &mut impl ConsoleAdapter,
        clock: &mut FrameClock,
        now: Instant,
    ) -> io::Result<FlushOutcome> {
        if let Some(remaining) = clock.remaining(now) {
            let micros = remaining.as_micros();
            let ms = u64::try_from(micros.div_ceil(1000)).unwrap_or(u64::MAX);
            return Ok(FlushOutcome::Deferred { remaining_ms: ms });
        }
        let stats = self.flush(adapter)?;
        clock.mark(now);
        Ok(FlushOutcome::Flushed(stats))
    }

    fn touch(&mut self, p: Point) {
        if let Some(r) = self.damage.get_mut(usize::from(p.y)) {
            r.widen(p.x, p.x);
        }
    }

    fn flush_rows(&mut self, adapter: &mut impl ConsoleAdapter, stats: &mut FlushStats) -> io::Result<()> {
        let cols = self.size.cols;
        for y in 0..self.size.rows {
            let range = self.damage[usize::from(y)];
            if range.is_empty() || cols == 0 {
                continue;
            }
            stats.rows_scanned += 1;

            let end = range.end.min(cols - 1);
            let mut x = range.begin.min(end);
            // Damage starting inside a wide glyph: back up to its head.
            while x > 0 && self.cells[self.index(x, y)].is_trail() {
                x -= 1;
            }
            while x <= end {
                x = self.flush_cell(adapter, x, y, stats)?;
            }
            self.damage[usize::from(y)] = Range::EMPTY;
        }
        Ok(())
    }

    /// Bring one glyph up to date and return the column after it.
    fn flush_cell(
        &mut self,
        adapter: &mut impl ConsoleAdapter,
        x: u16,
        y: u16,
        stats: &mut FlushStats,
    ) -> io::Result<u16> {
        let cols = self.size.cols;
        let i = self.index(x, y);
        let cell = self.cells[i];
        let pos = Point::new(x, y);

        if cell.is_wide() {
            let span = cell.ch.columns();
            if x + span > cols {
                // No room for the second column: a blank stands in.
                if cell != self.shadow[i] {
                    adapter.write_cell(pos, " ", cell.attr, false)?;
                    self.shadow[i] = cell;
                    stats.cells_written += 1;
                }
                return Ok(x + 1);
            }

            let n = usize::from(span);
            if self.cells[i..i + n] != self.shadow[i..i + n] {
                if self.caps.has_quirk(Quirks::WIDE_GLYPH_OVERLAP) {
                    for k in 0..span {
                        adapter.write_cell(Point::new(x + k, y), " ", cell.attr, false)?;
                        stats.cells_written += 1;
                    }
                }
                adapter.write_cell(pos, cell.ch.as_str(), cell.attr, true)?;
                stats.cells_written += 1;
            }

            self.shadow[i] = cell;
            let mut k = 1;
            while k < span && self.cells[i + usize::from(k)].is_trail() {
                self.shadow[i + usize::from(k)] = self.cells[i + usize::from(k)];
                k += 1;
            }
            return Ok(x + k);
        }

        // A trail reached on its own has lost its glyph.
        if cell.is_trail() || cell != self.shadow[i] {
            let text = if cell.is_trail() { " " } else { cell.ch.as_str() };
            adapter.write_cell(pos, text, cell.attr, false)?;
            self.shadow[i] = cell;
            stats.cells_written += 1;
        }
        Ok(x + 1)
    }
}

fn cell_count(size: Size) -> usize {
    usize::from(size.cols) * usize::from(size.rows)
}

impl std::fmt::Debug for ScreenBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenBuffer")
            .field("size", &self.size)
            .field("caps", &self.caps)
            .field("cursor", &self.cursor)
            .field("dirty_rows", &self.damage.iter().filter(|r| !r.is_empty()).count())
            .finish_non_exhaustive()
    }
}

// ─── Pacing ──────────────────────────────────────────────────────────────────

/// Default frame interval: 60 Hz.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Limits physical flushes to one per frame interval.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameClock {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next flush is allowed, or `None` if it is due.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last?;
        let next = last + self.interval;
        (now < next).then(|| next - now)
    }

    /// Record a flush at `now`.
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

/// Result of [`ScreenBuffer::flush_paced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed(FlushStats),
    /// Too early; try again after this many milliseconds.
    Deferred { remaining_ms: u64 },
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CaptureAdapter;
    use crate::cell::CellChar;
    use crate::color::DesiredColour;
    use crate::convert::ColourTier;
    use pretty_assertions::assert_eq;

    fn size(cols: u16, rows: u16) -> Size {
        Size { cols, rows }
    }

    fn setup(cols: u16, rows: u16) -> (ScreenBuffer, CaptureAdapter) {
        let mut buf = ScreenBuffer::new(size(cols, rows), TermCap::default());
        let mut cap = CaptureAdapter::new(size(cols, rows), 16);
        buf.flush(&mut cap).unwrap();
        cap.take_writes();
        (buf, cap)
    }

    fn red() -> ColourAttribute {
        ColourAttribute::from_bios(0x04)
    }

    fn narrow(ch: char, attr: ColourAttribute) -> ScreenCell {
        ScreenCell::new(CellChar::narrow(ch), attr)
    }

    // ── Range ───────────────────────────────────────────────────────────

    #[test]
    fn range_empty_and_widen() {
        let mut r = Range::EMPTY;
        assert!(r.is_empty());
        r.widen(5, 7);
        assert_eq!(r, Range::new(5, 7));
        r.widen(2, 3);
        assert_eq!(r, Range::new(2, 7));
        assert!(r.contains(2) && r.contains(7) && !r.contains(8));
        assert!(Range::full(0).is_empty());
        assert_eq!(Range::full(80), Range::new(0, 79));
    }

    // ── Write contract ──────────────────────────────────────────────────

    #[test]
    fn out_of_bounds_write_is_noop() {
        let (mut buf, _) = setup(4, 2);
        let cells = [narrow('x', red())];
        buf.write(4, 0, &cells, 1);
        buf.write(0, 2, &cells, 1);
        assert!(!buf.is_dirty());
    }

    #[test]
    fn write_clips_at_right_edge() {
        let (mut buf, _) = setup(4, 1);
        let cells = vec![narrow('x', red()); 10];
        buf.write(2, 0, &cells, 10);
        assert_eq!(buf.damage(0), Range::new(2, 3));
        assert_eq!(buf.cell(3, 0).unwrap().ch.as_str(), "x");
    }

    #[test]
    fn write_count_limits_run() {
        let (mut buf, _) = setup(8, 1);
        let cells = vec![narrow('x', red()); 5];
        buf.write(0, 0, &cells, 2);
        assert_eq!(buf.damage(0), Range::new(0, 1));
        assert_eq!(buf.cell(2, 0), Some(&ScreenCell::BLANK));
    }

    #[test]
    fn write_str_reports_columns() {
        let (mut buf, _) = setup(4, 1);
        assert_eq!(buf.write_str(1, 0, "a中", red()), 3);
        assert_eq!(buf.write_str(3, 0, "xyz", red()), 1);
    }

    // ── Flush ───────────────────────────────────────────────────────────

    #[test]
    fn first_flush_clears_and_writes_content() {
        let mut buf = ScreenBuffer::new(size(8, 2), TermCap::default());
        let mut cap = CaptureAdapter::new(size(8, 2), 16);
        buf.write_str(0, 1, "hi", red());
        let stats = buf.flush(&mut cap).unwrap();
        assert!(stats.cleared);
        assert_eq!(stats.cells_written, 2);
        assert_eq!(cap.clears, 1);
        assert_eq!(cap.row_text(1), "hi      ");
        assert_eq!(cap.caret_size, 0);
    }

    #[test]
    fn second_flush_writes_nothing() {
        let (mut buf, mut cap) = setup(8, 2);
        buf.write_str(0, 0, "hello", red());
        buf.flush(&mut cap).unwrap();
        cap.take_writes();
        let flushes = cap.flushes;

        let stats = buf.flush(&mut cap).unwrap();
        assert_eq!(stats.cells_written, 0);
        assert_eq!(cap.write_count(), 0);
        assert_eq!(cap.flushes, flushes);
    }

    #[test]
    fn identical_rewrite_writes_nothing() {
        let (mut buf, mut cap) = setup(8, 1);
        buf.write_str(0, 0, "same", red());
        buf.flush(&mut cap).unwrap();
        cap.take_writes();
        buf.write_str(0, 0, "same", red());
        assert_eq!(buf.flush(&mut cap).unwrap().cells_written, 0);
    }

    #[test]
    fn one_changed_cell_is_one_write() {
        let (mut buf, mut cap) = setup(8, 1);
        buf.write_str(0, 0, "abcdefgh", red());
        buf.flush(&mut cap).unwrap();
        cap.take_writes();

        buf.write_str(0, 0, "abcXefgh", red());
        buf.flush(&mut cap).unwrap();
        let writes = cap.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].pos, Point::new(3, 0));
        assert_eq!(writes[0].text, "X");
    }

    #[test]
    fn damage_resets_after_flush() {
        let (mut buf, mut cap) = setup(8, 2);
        buf.write_str(2, 1, "x", red());
        assert_eq!(buf.damage(1), Range::new(2, 2));
        buf.flush(&mut cap).unwrap();
        assert!(buf.damage(1).is_empty());
        assert!(!buf.is_dirty());
    }

    // ── Wide glyphs ─────────────────────────────────────────────────────

    #[test]
    fn wide_glyph_is_written_once() {
        let (mut buf, mut cap) = setup(6, 1);
        buf.write_str(1, 0, "中", red());
        buf.flush(&mut cap).unwrap();
        let writes = cap.take_writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].is_wide);
        assert_eq!(cap.row_text(0), " 中   ");
    }

    #[test]
    fn overwriting_trail_never_leaves_stale_marker() {
        let (mut buf, mut cap) = setup(6, 1);
        buf.write_str(0, 0, "中", red());
        buf.flush(&mut cap).unwrap();

        buf.write_str(1, 0, "x", red());
        assert!(!buf.cell(1, 0).unwrap().is_trail());
        buf.flush(&mut cap).unwrap();
        assert_eq!(cap.text_at(1, 0), Some("x"));
        assert_eq!(cap.text_at(0, 0), Some(" "));
    }

    #[test]
    fn overwriting_head_blanks_orphan_trail() {
        let (mut buf, mut cap) = setup(6, 1);
        buf.write_str(2, 0, "中", red());
        buf.flush(&mut cap).unwrap();

        buf.write_str(2, 0, "a", red());
        assert_eq!(buf.cell(3, 0), Some(&ScreenCell::blank(red())));
        buf.flush(&mut cap).unwrap();
        assert_eq!(cap.row_text(0), "  a   ");
    }

    #[test]
    fn wide_glyph_at_right_edge_renders_blank() {
        let (mut buf, mut cap) = setup(4, 1);
        buf.write_str(3, 0, "中", red());
        assert!(buf.cell(3, 0).unwrap().is_wide());
        buf.flush(&mut cap).unwrap();
        let writes = cap.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].text, " ");
        assert!(!writes[0].is_wide);
    }

    #[test]
    fn damage_inside_glyph_backs_up_to_head() {
        let (mut buf, mut cap) = setup(6, 1);
        buf.write_str(1, 0, "中", red());
        buf.flush(&mut cap).unwrap();
        cap.take_writes();

        let blue = ColourAttribute::from_bios(0x01);
        buf.write(2, 0, &[ScreenCell::trail(blue)], 1);
        buf.flush(&mut cap).unwrap();
        let writes = cap.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].pos, Point::new(1, 0));
        assert!(writes[0].is_wide);
    }

    #[test]
    fn overlap_quirk_blanks_span_first() {
        let caps = TermCap::new(ColourTier::Indexed16, Quirks::WIDE_GLYPH_OVERLAP);
        let mut buf = ScreenBuffer::new(size(6, 1), caps);
        let mut cap = CaptureAdapter::new(size(6, 1), 16);
        buf.write_str(0, 0, "中", red());
        buf.flush(&mut cap).unwrap();
        let writes = cap.take_writes();
        let texts: Vec<_> = writes.iter().map(|w| (w.pos.x, w.text.as_str(), w.is_wide)).collect();
        assert_eq!(texts, vec![(0, " ", false), (1, " ", false), (0, "中", true)]);
    }

    // ── Cursor ──────────────────────────────────────────────────────────

    #[test]
    fn visible_cursor_swaps_only_during_flush() {
        let (mut buf, mut cap) = setup(4, 1);
        let attr = ColourAttribute::from_bios(0x1E);
        buf.write_str(0, 0, "ab", attr);
        buf.set_cursor(Point::new(1, 0));
        buf.set_cursor_visible(true);
        buf.flush(&mut cap).unwrap();

        assert_eq!(cap.attr_at(1, 0), Some(attr.swapped()));
        assert_eq!(cap.attr_at(0, 0), Some(attr));
        assert_eq!(buf.cell(1, 0).unwrap().attr, attr);
        assert_eq!(cap.caret, Point::new(1, 0));

        cap.take_writes();
        assert_eq!(buf.flush(&mut cap).unwrap().cells_written, 0);
    }

    #[test]
    fn moving_cursor_repaints_old_cell() {
        let (mut buf, mut cap) = setup(4, 1);
        let attr = ColourAttribute::from_bios(0x1E);
        buf.write_str(0, 0, "ab", attr);
        buf.set_cursor_visible(true);
        buf.flush(&mut cap).unwrap();
        cap.take_writes();

        buf.set_cursor(Point::new(1, 0));
        assert!(buf.is_dirty());
        buf.flush(&mut cap).unwrap();
        assert_eq!(cap.take_writes().len(), 2);
        assert_eq!(cap.attr_at(0, 0), Some(attr));
        assert_eq!(cap.attr_at(1, 0), Some(attr.swapped()));
    }

    #[test]
    fn hiding_cursor_restores_cell() {
        let (mut buf, mut cap) = setup(4, 1);
        buf.set_cursor_visible(true);
        buf.flush(&mut cap).unwrap();
        buf.set_cursor_visible(false);
        buf.flush(&mut cap).unwrap();
        assert_eq!(cap.attr_at(0, 0), Some(ColourAttribute::DEFAULT));
    }

    #[test]
    fn cursor_is_clamped() {
        let (mut buf, _) = setup(4, 2);
        buf.set_cursor(Point::new(40, 9));
        assert_eq!(buf.cursor().pos, Point::new(3, 1));
    }

    // ── Resize ──────────────────────────────────────────────────────────

    #[test]
    fn resize_keeps_bottom_left_content() {
        let (mut buf, _) = setup(80, 24);
        let attr = ColourAttribute::new(DesiredColour::from_xterm(33), DesiredColour::Default, Default::default());
        for y in 0..24 {
            let line: String = (0..80).map(|x| char::from(b'a' + ((x + y) % 26) as u8)).collect();
            buf.write_str(0, y, &line, attr);
        }
        let before: Vec<Vec<ScreenCell>> = (0..24).map(|y| buf.row(y).unwrap().to_vec()).collect();

        buf.resize(size(100, 30));
        assert_eq!(buf.size(), size(100, 30));
        for y in 0..24u16 {
            let row = buf.row(y + 6).unwrap();
            assert_eq!(&row[..80], &before[usize::from(y)][..]);
            assert!(row[80..].iter().all(|c| *c == ScreenCell::BLANK));
        }
        for y in 0..6 {
            assert!(buf.row(y).unwrap().iter().all(|c| *c == ScreenCell::BLANK));
        }
        for y in 0..30 {
            assert_eq!(buf.damage(y), Range::full(100));
        }
    }

    #[test]
    fn resize_smaller_keeps_bottom_rows() {
        let (mut buf, mut cap) = setup(4, 3);
        buf.write_str(0, 0, "top", red());
        buf.write_str(0, 2, "bot", red());
        buf.set_cursor(Point::new(1, 2));
        buf.resize(size(2, 2));
        assert_eq!(buf.cell(0, 1).unwrap().ch.as_str(), "b");
        assert_eq!(buf.cell(1, 1).unwrap().ch.as_str(), "o");
        assert_eq!(buf.cursor().pos, Point::new(1, 1));

        cap.set_size(size(2, 2));
        let stats = buf.flush(&mut cap).unwrap();
        assert!(stats.cleared);
        assert_eq!(cap.row_text(1), "bo");
    }

    // ── Pacing ──────────────────────────────────────────────────────────

    #[test]
    fn paced_flush_defers_within_interval() {
        let (mut buf, mut cap) = setup(4, 1);
        let mut clock = FrameClock::new(Duration::from_millis(16));
        let t0 = Instant::now();

        buf.write_str(0, 0, "a", red());
        let first = buf.flush_paced(&mut cap, &mut clock, t0).unwrap();
        assert!(matches!(first, FlushOutcome::Flushed(s) if s.cells_written == 1));

        buf.write_str(1, 0, "b", red());
        buf.write_str(2, 0, "c", red());
        let early = buf.flush_paced(&mut cap, &mut clock, t0 + Duration::from_millis(5)).unwrap();
        assert_eq!(early, FlushOutcome::Deferred { remaining_ms: 11 });
        assert!(buf.is_dirty());

        let late = buf.flush_paced(&mut cap, &mut clock, t0 + Duration::from_millis(16)).unwrap();
        assert!(matches!(late, FlushOutcome::Flushed(s) if s.cells_written == 2));
    }

    #[test]
    fn deferred_time_rounds_up() {
        let mut clock = FrameClock::new(Duration::from_micros(16_667));
        let t0 = Instant::now();
        clock.mark(t0);
        assert_eq!(clock.remaining(t0), Some(Duration::from_micros(16_667)));
        let (mut buf, mut cap) = setup(1, 1);
        let out = buf.flush_paced(&mut cap, &mut clock, t0).unwrap();
        assert_eq!(out, FlushOutcome::Deferred { remaining_ms: 17 });
    }

    #[test]
    fn zero_size_buffer_is_inert() {
        let mut buf = ScreenBuffer::new(size(0, 0), TermCap::default());
        let mut cap = CaptureAdapter::new(size(0, 0), 16);
        buf.write_str(0, 0, "x", red());
        buf.set_cursor_visible(true);
        let stats = buf.flush(&mut cap).unwrap();
        assert_eq!(stats.cells_written, 0);
    }
}
