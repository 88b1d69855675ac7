// SPDX-License-Identifier: MIT
//
// Console adapter: the boundary between the algorithmic core and whatever
// actually shows the pixels.
//
// `ScreenBuffer::flush` decides *which* cells to write; an adapter decides
// *how*. The ANSI protocol writer in `output` is one adapter. The in-memory
// `CaptureAdapter` below is another: it records every call and keeps a
// picture of what a real display would hold, which is what tests and
// headless embedders want.

use std::io;

use crate::color::ColourAttribute;

// ─── Point ───────────────────────────────────────────────────────────────────

/// A zero-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

impl Point {
    #[inline]
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// Display or grid dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

impl Size {
    #[inline]
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Whether `p` lies inside a grid of this size.
    #[inline]
    #[must_use]
    pub const fn contains(self, p: Point) -> bool {
        p.x < self.cols && p.y < self.rows
    }
}

// ─── Adapter Trait ───────────────────────────────────────────────────────────

/// A physical display the screen buffer can flush to.
///
/// Calls between two [`flush`](Self::flush) calls form one batch. An
/// implementation may buffer freely inside a batch.
pub trait ConsoleAdapter {
    /// Re-query the display size.
    fn reload_geometry(&mut self) -> Size;

    /// Palette size reported by the display, used to negotiate a
    /// [`TermCap`](crate::convert::TermCap).
    fn color_count(&self) -> u32;

    /// Draw `text` at `pos`. `is_wide` means the glyph covers `pos` and the
    /// column after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cannot be written.
    fn write_cell(&mut self, pos: Point, text: &str, attr: ColourAttribute, is_wide: bool) -> io::Result<()>;

    /// Park the caret at `pos`.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cannot be written.
    fn set_caret_pos(&mut self, pos: Point) -> io::Result<()>;

    /// Caret size as a percentage of the cell. Zero hides it.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cannot be written.
    fn set_caret_size(&mut self, size: u8) -> io::Result<()>;

    /// Blank the whole display in default colours.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cannot be written.
    fn clear_screen(&mut self) -> io::Result<()>;

    /// End of a batch. Make everything written so far visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the display cannot be written.
    fn flush(&mut self) -> io::Result<()>;
}

// ─── CaptureAdapter ──────────────────────────────────────────────────────────

/// One `write_cell` call as the capture saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub pos: Point,
    pub text: String,
    pub attr: ColourAttribute,
    pub is_wide: bool,
}

/// An adapter that keeps the display in memory.
///
/// `display` mirrors what a real terminal would show: a wide write fills
/// its second column with an empty string, a clear resets every position
/// to a default-coloured space.
#[derive(Debug, Clone)]
pub struct CaptureAdapter {
    size: Size,
    colors: u32,
    display: Vec<(String, ColourAttribute)>,
    /// Every `write_cell` since the last [`take_writes`](Self::take_writes).
    writes: Vec<CellWrite>,
    pub caret: Point,
    pub caret_size: u8,
    pub clears: usize,
    pub flushes: usize,
}

impl CaptureAdapter {
    #[must_use]
    pub fn new(size: Size, colors: u32) -> Self {
        let n = usize::from(size.cols) * usize::from(size.rows);
        Self {
            size,
            colors,
            display: vec![(" ".to_owned(), ColourAttribute::DEFAULT); n],
            writes: Vec::new(),
            caret: Point::default(),
            caret_size: 0,
            clears: 0,
            flushes: 0,
        }
    }

    /// Change what the next [`reload_geometry`](ConsoleAdapter::reload_geometry)
    /// reports. The display is reallocated blank.
    pub fn set_size(&mut self, size: Size) {
        *self = Self {
            writes: std::mem::take(&mut self.writes),
            ..Self::new(size, self.colors)
        };
    }

    /// Drain the recorded writes.
    pub fn take_writes(&mut self) -> Vec<CellWrite> {
        std::mem::take(&mut self.writes)
    }

    /// Number of writes recorded since the last drain.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// What the display shows at `(x, y)`.
    #[must_use]
    pub fn text_at(&self, x: u16, y: u16) -> Option<&str> {
        self.index(x, y).map(|i| self.display[i].0.as_str())
    }

    /// Attribute the display shows at `(x, y)`.
    #[must_use]
    pub fn attr_at(&self, x: u16, y: u16) -> Option<ColourAttribute> {
        self.index(x, y).map(|i| self.display[i].1)
    }

    /// Row `y` as a string, trail columns contributing nothing.
    #[must_use]
    pub fn row_text(&self, y: u16) -> String {
        (0..self.size.cols).filter_map(|x| self.text_at(x, y)).collect()
    }

    fn index(&self, x: u16, y: u16) -> Option<usize> {
        self.size
            .contains(Point::new(x, y))
            .then(|| usize::from(y) * usize::from(self.size.cols) + usize::from(x))
    }
}

impl ConsoleAdapter for CaptureAdapter {
    fn reload_geometry(&mut self) -> Size {
        self.size
    }

    fn color_count(&self) -> u32 {
        self.colors
    }

    fn write_cell(&mut self, pos: Point, text: &str, attr: ColourAttribute, is_wide: bool) -> io::Result<()> {
        if let Some(i) = self.index(pos.x, pos.y) {
            self.display[i] = (text.to_owned(), attr);
            if is_wide {
                if let Some(j) = self.index(pos.x + 1, pos.y) {
                    self.display[j] = (String::new(), attr);
                }
            }
        }
        self.writes.push(CellWrite {
            pos,
            text: text.to_owned(),
            attr,
            is_wide,
        });
        Ok(())
    }

    fn set_caret_pos(&mut self, pos: Point) -> io::Result<()> {
        self.caret = pos;
        Ok(())
    }

    fn set_caret_size(&mut self, size: u8) -> io::Result<()> {
        self.caret_size = size;
        Ok(())
    }

    fn clear_screen(&mut self) -> io::Result<()> {
        for slot in &mut self.display {
            *slot = (" ".to_owned(), ColourAttribute::DEFAULT);
        }
        self.clears += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> CaptureAdapter {
        CaptureAdapter::new(Size { cols: 4, rows: 2 }, 16)
    }

    #[test]
    fn size_contains_is_exclusive_at_the_edges() {
        let size = Size::new(4, 2);
        assert!(size.contains(Point::new(0, 0)));
        assert!(size.contains(Point::new(3, 1)));
        assert!(!size.contains(Point::new(4, 0)));
        assert!(!size.contains(Point::new(0, 2)));
        assert!(!Size::new(0, 5).contains(Point::new(0, 0)));
    }

    #[test]
    fn write_updates_display_and_log() {
        let mut cap = capture();
        let attr = ColourAttribute::from_bios(0x1F);
        cap.write_cell(Point::new(1, 1), "x", attr, false).unwrap();
        assert_eq!(cap.text_at(1, 1), Some("x"));
        assert_eq!(cap.attr_at(1, 1), Some(attr));
        assert_eq!(cap.write_count(), 1);
        assert_eq!(cap.take_writes()[0].pos, Point::new(1, 1));
        assert_eq!(cap.write_count(), 0);
    }

    #[test]
    fn wide_write_covers_next_column() {
        let mut cap = capture();
        cap.write_cell(Point::new(0, 0), "中", ColourAttribute::DEFAULT, true).unwrap();
        assert_eq!(cap.row_text(0), "中  ");
        assert_eq!(cap.text_at(1, 0), Some(""));
    }

    #[test]
    fn clear_resets_display() {
        let mut cap = capture();
        cap.write_cell(Point::new(0, 0), "a", ColourAttribute::DEFAULT, false).unwrap();
        cap.clear_screen().unwrap();
        assert_eq!(cap.row_text(0), "    ");
        assert_eq!(cap.clears, 1);
    }

    #[test]
    fn out_of_range_write_is_only_logged() {
        let mut cap = capture();
        cap.write_cell(Point::new(9, 9), "a", ColourAttribute::DEFAULT, false).unwrap();
        assert_eq!(cap.text_at(9, 9), None);
        assert_eq!(cap.write_count(), 1);
    }

    #[test]
    fn geometry_and_colours_report_configuration() {
        let mut cap = capture();
        assert_eq!(cap.reload_geometry(), Size { cols: 4, rows: 2 });
        assert_eq!(cap.color_count(), 16);
        cap.set_size(Size { cols: 8, rows: 3 });
        assert_eq!(cap.reload_geometry(), Size { cols: 8, rows: 3 });
        assert_eq!(cap.row_text(2), "        ");
    }
}
