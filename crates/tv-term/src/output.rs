// SPDX-License-Identifier: MIT
//
// Output buffering and the ANSI protocol writer.
//
// Two components work together to minimize terminal I/O:
//
//   OutputBuffer: accumulates all escape bytes of one batch in memory so
//   the whole batch reaches the terminal in a single write() call.
//
//   AnsiAdapter: a `ConsoleAdapter` that speaks ANSI/xterm. It remembers
//   where the terminal cursor is and which attribute is active, so a run of
//   same-coloured cells on one row costs one cursor move, one SGR sequence
//   and the text. Colours pass through the session's `TermCap` first, so
//   the same buffer renders on truecolor and monochrome terminals alike.

use std::io::{self, Write};

use crate::adapter::{ConsoleAdapter, Point, Size};
use crate::ansi;
use crate::color::ColourAttribute;
use crate::convert::{TermAttribute, TermCap};
use crate::tty;

// ─── OutputBuffer ────────────────────────────────────────────────────────────

/// A byte buffer that accumulates escape output for a single `write()`.
///
/// Default capacity: 16 KB, enough for most frames without reallocation.
pub struct OutputBuffer {
    buf: Vec<u8>,
}

const DEFAULT_CAPACITY: usize = 16_384;

impl OutputBuffer {
    /// Create an empty buffer with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(DEFAULT_CAPACITY),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The accumulated bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Append text verbatim.
    #[inline]
    pub fn push_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Clear the buffer for reuse (keeps allocated capacity).
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Write accumulated output to `w` and clear the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails. The buffer is kept so the
    /// batch can be retried.
    pub fn flush_to(&mut self, w: &mut impl Write) -> io::Result<()> {
        if !self.buf.is_empty() {
            w.write_all(&self.buf)?;
            w.flush()?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl Write for OutputBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Real flushing happens in flush_to().
        Ok(())
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ─── AnsiAdapter ─────────────────────────────────────────────────────────────

/// The ANSI protocol writer.
///
/// # Optimization decisions
///
/// - **Cursor**: skipped when the terminal cursor already sits on the
///   target cell (it auto-advances after text). A move within the same row
///   uses the shorter column-only form.
/// - **Attributes**: when a style bit turns off, SGR 0 and re-emit; that is
///   shorter than the individual "off" codes for anything but one bit.
///   Added style bits, fg and bg are each emitted only when they change.
/// - **Right edge**: after writing into the last column the terminal may
///   be in its pending-wrap state, so the position is forgotten and the
///   next write repositions absolutely.
/// - **Batches**: everything between two `flush` calls is wrapped in
///   synchronized-output markers and written with one syscall.
pub struct AnsiAdapter<W: Write> {
    sink: W,
    out: OutputBuffer,
    caps: TermCap,
    colors: u32,
    size: Size,
    size_query: fn() -> Option<Size>,
    last_attr: Option<TermAttribute>,
    last_pos: Option<Point>,
    batch_open: bool,
}

impl<W: Write> AnsiAdapter<W> {
    /// A writer for a terminal with the given capability and palette size.
    ///
    /// Geometry is queried from the host tty; see
    /// [`with_size_query`](Self::with_size_query) to override.
    pub fn new(sink: W, caps: TermCap, colors: u32) -> Self {
        let size_query: fn() -> Option<Size> = tty::host_size;
        Self {
            sink,
            out: OutputBuffer::new(),
            caps,
            colors,
            size: size_query().unwrap_or(tty::FALLBACK_SIZE),
            size_query,
            last_attr: None,
            last_pos: None,
            batch_open: false,
        }
    }

    /// Replace the geometry source and re-query it.
    #[must_use]
    pub fn with_size_query(mut self, query: fn() -> Option<Size>) -> Self {
        self.size_query = query;
        self.reload_geometry();
        self
    }

    #[inline]
    #[must_use]
    pub const fn caps(&self) -> TermCap {
        self.caps
    }

    /// The underlying writer.
    #[inline]
    pub const fn get_ref(&self) -> &W {
        &self.sink
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Forget tracked cursor and attribute state. Call after anything else
    /// has written to the terminal.
    pub const fn reset_state(&mut self) {
        self.last_attr = None;
        self.last_pos = None;
    }

    /// Queue a window-title change into the current batch.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the batch is in memory.
    pub fn set_title(&mut self, title: &str) -> io::Result<()> {
        self.open_batch()?;
        ansi::set_title(&mut self.out, title)
    }

    fn open_batch(&mut self) -> io::Result<()> {
        if !self.batch_open {
            ansi::begin_sync(&mut self.out)?;
            self.batch_open = true;
        }
        Ok(())
    }

    fn move_to(&mut self, pos: Point) -> io::Result<()> {
        match self.last_pos {
            Some(p) if p == pos => Ok(()),
            Some(p) if p.y == pos.y => ansi::cursor_column(&mut self.out, pos.x),
            _ => ansi::cursor_to(&mut self.out, pos.x, pos.y),
        }
    }

    fn apply_attr(&mut self, next: TermAttribute) -> io::Result<()> {
        let mut prev = match self.last_attr {
            Some(prev) if prev == next => return Ok(()),
            Some(prev) if (prev.style - next.style).is_empty() => {
                ansi::styles(&mut self.out, next.style - prev.style)?;
                prev
            }
            // Unknown state or a style bit turning off.
            _ => {
                ansi::reset(&mut self.out)?;
                ansi::styles(&mut self.out, next.style)?;
                TermAttribute::RESET
            }
        };
        if prev.fg != next.fg {
            ansi::fg(&mut self.out, next.fg)?;
        }
        if prev.bg != next.bg {
            ansi::bg(&mut self.out, next.bg)?;
        }
        prev = next;
        self.last_attr = Some(prev);
        Ok(())
    }
}

impl<W: Write> ConsoleAdapter for AnsiAdapter<W> {
    fn reload_geometry(&mut self) -> Size {
        if let Some(size) = (self.size_query)() {
            self.size = size;
        }
        self.last_pos = None;
        self.size
    }

    fn color_count(&self) -> u32 {
        self.colors
    }

    fn write_cell(&mut self, pos: Point, text: &str, attr: ColourAttribute, is_wide: bool) -> io::Result<()> {
        self.open_batch()?;
        self.move_to(pos)?;
        self.apply_attr(self.caps.convert(attr))?;
        self.out.push_str(if text.is_empty() { " " } else { text });

        let next = pos.x.saturating_add(if is_wide { 2 } else { 1 });
        self.last_pos = (next < self.size.cols).then_some(Point::new(next, pos.y));
        Ok(())
    }

    fn set_caret_pos(&mut self, pos: Point) -> io::Result<()> {
        self.open_batch()?;
        self.move_to(pos)?;
        self.last_pos = Some(pos);
        Ok(())
    }

    fn set_caret_size(&mut self, size: u8) -> io::Result<()> {
        self.open_batch()?;
        ansi::caret_size(&mut self.out, size)
    }

    fn clear_screen(&mut self) -> io::Result<()> {
        self.open_batch()?;
        ansi::reset(&mut self.out)?;
        ansi::clear_screen(&mut self.out)?;
        self.last_attr = Some(TermAttribute::RESET);
        self.last_pos = None;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.batch_open {
            ansi::end_sync(&mut self.out)?;
            self.batch_open = false;
        }
        self.out.flush_to(&mut self.sink)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
