// SPDX-License-Identifier: MIT
//
// Session: one emulator bound to one child over a byte channel.
//
// Everything runs on the UI thread. `poll` waits a bounded time for child
// output, feeds it to the emulator and writes any replies straight back.
// A child that hangs up, exits, or whose channel fails is reported once as
// `PollStatus::Disconnected`; the caller tears the view down. Nothing here
// retries a dead channel.

use std::io;
use std::time::{Duration, Instant};

use crate::adapter::{Point, Size};
use crate::buffer::ScreenBuffer;
use crate::emulator::{Changes, Emulator};

/// Bytes read from a child per call.
pub const READ_CHUNK: usize = 4096;

/// Reads drained per poll before yielding to other terminals.
const MAX_READS_PER_POLL: usize = 16;

// ─── Channel ─────────────────────────────────────────────────────────────────

/// Outcome of one bounded read from a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were placed in the buffer.
    Data(usize),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The child side is gone. No more data will ever arrive.
    Closed,
}

/// A duplex byte channel to a child process.
///
/// `Pty` is the real one. Tests substitute scripted channels.
pub trait Channel {
    /// Wait up to `timeout` for output and read it into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than timeout and hang-up.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus>;

    /// Queue `data` for the child without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is broken.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Tell the child its window changed size.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be applied.
    fn resize(&mut self, size: Size) -> io::Result<()>;

    /// Whether the child process has exited. Never blocks.
    fn has_exited(&mut self) -> bool;

    /// Terminate the child. Harmless if it already exited.
    fn kill(&mut self);
}

// ─── PollStatus ──────────────────────────────────────────────────────────────

/// What one poll of a terminal found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// No output arrived.
    Idle,
    /// The emulator consumed new output; redraw.
    Updated,
    /// The child is gone. Further polls return this again.
    Disconnected,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// A child process and the virtual screen it draws on.
pub struct Session<C: Channel> {
    channel: C,
    emulator: Emulator,
    buf: Box<[u8]>,
    /// The child was reaped; disconnect once its output is drained.
    exited: bool,
    disconnected: bool,
}

impl<C: Channel> Session<C> {
    /// Wrap `channel` with an emulator of `size`.
    pub fn new(channel: C, size: Size, escape_limit: usize) -> Self {
        Self {
            channel,
            emulator: Emulator::with_escape_limit(size, escape_limit),
            buf: vec![0; READ_CHUNK].into_boxed_slice(),
            exited: false,
            disconnected: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    #[inline]
    pub const fn emulator_mut(&mut self) -> &mut Emulator {
        &mut self.emulator
    }

    #[inline]
    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    #[inline]
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Wait up to `timeout` for child output and apply it.
    ///
    /// Once data arrives, whatever else is already buffered is drained
    /// without further waiting, up to a fixed number of reads.
    pub fn poll(&mut self, timeout: Duration) -> PollStatus {
        if self.disconnected {
            return PollStatus::Disconnected;
        }

        let deadline = Instant::now() + timeout;
        let mut updated = false;
        for _ in 0..MAX_READS_PER_POLL {
            let wait = if updated {
                Duration::ZERO
            } else {
                deadline.saturating_duration_since(Instant::now())
            };
            match self.channel.read(&mut self.buf, wait) {
                Ok(ReadStatus::Data(n)) => {
                    self.emulator.feed(&self.buf[..n]);
                    updated = true;
                }
                Ok(ReadStatus::Timeout) => break,
                Ok(ReadStatus::Closed) => return self.disconnect("child closed its terminal"),
                Err(e) => {
                    tracing::warn!(error = %e, "read from child failed");
                    return self.disconnect("read failed");
                }
            }
        }

        let replies = self.emulator.take_replies();
        if !replies.is_empty() {
            if let Err(e) = self.channel.write(&replies) {
                tracing::warn!(error = %e, "write to child failed");
                return self.disconnect("write failed");
            }
        }

        if updated {
            PollStatus::Updated
        } else if self.exited {
            self.disconnect("child exited")
        } else {
            PollStatus::Idle
        }
    }

    fn disconnect(&mut self, reason: &'static str) -> PollStatus {
        if !self.disconnected {
            tracing::debug!(reason, "session disconnected");
            self.disconnected = true;
        }
        PollStatus::Disconnected
    }

    /// Check whether the child exited, without blocking.
    pub fn reap(&mut self) {
        if !self.exited && self.channel.has_exited() {
            self.exited = true;
        }
    }

    /// Forward keystrokes (or any bytes) to the child.
    ///
    /// # Errors
    ///
    /// Returns the channel's error. The session is marked disconnected.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.disconnected {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.channel.write(data).inspect_err(|_| {
            self.disconnected = true;
        })
    }

    /// Resize the virtual screen and tell the child.
    ///
    /// # Errors
    ///
    /// Returns the channel's error. The emulator is resized regardless.
    pub fn resize(&mut self, size: Size) -> io::Result<()> {
        self.emulator.resize(size);
        if self.disconnected {
            return Ok(());
        }
        self.channel.resize(self.emulator.size())
    }

    /// Return and clear the emulator's out-of-band changes.
    pub fn take_changes(&mut self) -> Changes {
        self.emulator.take_changes()
    }

    /// Copy damaged rows into `buf` with the screen's top-left at `origin`,
    /// then place the buffer's cursor over the emulator's.
    pub fn blit(&mut self, buf: &mut ScreenBuffer, origin: Point) {
        for (y, range) in self.emulator.take_damage() {
            if let Some(row) = self.emulator.row(y) {
                let cells = &row[usize::from(range.begin)..=usize::from(range.end)];
                buf.write(
                    origin.x.saturating_add(range.begin),
                    origin.y.saturating_add(y),
                    cells,
                    cells.len(),
                );
            }
        }
        self.place_cursor(buf, origin);
    }

    /// Copy the whole screen into `buf`, damaged or not.
    pub fn blit_all(&mut self, buf: &mut ScreenBuffer, origin: Point) {
        let _ = self.emulator.take_damage();
        for y in 0..self.emulator.size().rows {
            if let Some(row) = self.emulator.row(y) {
                buf.write(origin.x, origin.y.saturating_add(y), row, row.len());
            }
        }
        self.place_cursor(buf, origin);
    }

    fn place_cursor(&self, buf: &mut ScreenBuffer, origin: Point) {
        let c = self.emulator.cursor();
        buf.set_cursor(Point::new(
            origin.x.saturating_add(c.x),
            origin.y.saturating_add(c.y),
        ));
        buf.set_cursor_visible(self.emulator.cursor_visible() && !self.disconnected);
    }

    /// Kill the child. Harmless if it already exited.
    pub fn kill(&mut self) {
        self.channel.kill();
        self.exited = true;
    }
}

#[cfg(unix)]
impl Session<crate::pty::Pty> {
    /// Spawn `config.command` on a new pty of `size`.
    ///
    /// # Errors
    ///
    /// Fails if the pty cannot be opened or the program cannot start.
    pub fn spawn(config: &crate::config::Config, size: Size) -> crate::Result<Self> {
        let pty = crate::pty::Pty::spawn(&config.command, &config.term, size)?;
        Ok(Self::new(pty, size, config.escape_limit))
    }
}

impl<C: Channel> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("emulator", &self.emulator)
            .field("exited", &self.exited)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
