// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Event loop: hosts child terminals on the real tty.
//
// Everything that touches an emulator or the screen buffer happens on this
// thread. Each iteration:
//
//   1. Drain keystrokes the background stdin reader collected and write
//      them to the focused child (non-blocking).
//   2. Pick up a host resize flagged by SIGWINCH.
//   3. Poll the registry: every child gets a share of the wait budget to
//      produce output. Disconnected children are destroyed on the spot.
//   4. Blit the focused child's damage below the title bar.
//   5. Flush through the ANSI adapter, at most once per frame interval.
//
// # Waiting
//
// The wait budget is the tick interval (8.3 ms by default) unless a frame
// is pending, in which case it is the time until that frame may be
// flushed. An idle host sleeps in poll() on the child ptys: no busy loop,
// and output that arrives wakes us immediately.
//
// # SIGWINCH Handling
//
// Host resize is detected via a SIGWINCH handler that sets an `AtomicBool`.
// The loop checks the flag each iteration, resizes the buffer and every
// child, and repaints. Maximum latency from resize to redraw: one tick.

use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use crate::adapter::{Point, Size};
use crate::buffer::{FlushOutcome, FrameClock, ScreenBuffer};
use crate::color::ColourAttribute;
use crate::config::Config;
use crate::emulator::Changes;
use crate::output::AnsiAdapter;
use crate::reader::StdinReader;
use crate::registry::{TerminalId, TerminalRegistry};
use crate::session::{Channel, PollStatus, Session};
use crate::tty::HostTty;

/// Rows reserved above the child's screen.
pub const TITLE_ROWS: u16 = 1;

/// Black on light grey, like a classic status line.
pub const TITLE_ATTR: ColourAttribute = ColourAttribute::from_bios(0x70);

// ─── SIGWINCH ────────────────────────────────────────────────────────────────

/// Global flag set by the SIGWINCH handler. Checked each loop iteration.
static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Install a signal handler for SIGWINCH (host terminal resize).
///
/// The handler only sets [`SIGWINCH_RECEIVED`]; writing an atomic is
/// async-signal-safe.
#[cfg(unix)]
fn install_sigwinch_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigwinch_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&raw mut sa.sa_mask);
        libc::sigaction(libc::SIGWINCH, &raw const sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigwinch_handler(_sig: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigwinch_handler() {
    // No-op on non-unix platforms.
}

// ─── Layout ──────────────────────────────────────────────────────────────────

/// Size of the child's screen inside a host of `host` cells.
#[must_use]
pub fn child_size(host: Size) -> Size {
    Size {
        cols: host.cols.max(1),
        rows: host.rows.saturating_sub(TITLE_ROWS).max(1),
    }
}

/// Paint the title bar: `title`, or `fallback` when the child set none,
/// centred and padded to the full width.
pub fn paint_title_bar(buf: &mut ScreenBuffer, title: &str, fallback: &str) {
    let cols = usize::from(buf.size().cols);
    let text = if title.is_empty() { fallback } else { title };
    let text: String = text.chars().filter(|c| !c.is_control()).collect();
    let width = unicode_width::UnicodeWidthStr::width(text.as_str()).min(cols);
    let left = (cols - width) / 2;
    let line = format!("{:left$}{text}{:right$}", "", "", right = cols.saturating_sub(left + width));
    buf.write_str(0, 0, &line, TITLE_ATTR);
}

// ─── Host ────────────────────────────────────────────────────────────────────

/// Drives one session per registered child on the host tty.
///
/// # Example
///
/// ```no_run
/// use tv_term::config::Config;
/// use tv_term::event_loop::Host;
///
/// let mut host = Host::new(Config::default());
/// host.run()?;
/// # Ok::<(), tv_term::Error>(())
/// ```
pub struct Host {
    tty: HostTty,
    config: Config,
}

impl Host {
    /// Create a host for `config`. The tty is untouched until [`run`](Self::run).
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            tty: HostTty::new(),
            config,
        }
    }

    /// The current host terminal size.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.tty.size()
    }

    /// Spawn the configured command and host it until it exits.
    ///
    /// This method:
    /// 1. Spawns the child on a pty sized to the host minus the title bar
    /// 2. Takes over the tty (raw mode, alternate screen)
    /// 3. Installs the SIGWINCH handler and starts the stdin reader
    /// 4. Runs the loop until no child is left
    /// 5. Restores the tty on exit (even on error)
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be spawned or the tty fails.
    #[cfg(unix)]
    pub fn run(&mut self) -> crate::Result<()> {
        let size = self.tty.size();
        let session = Session::spawn(&self.config, child_size(size))?;
        let mut registry = TerminalRegistry::new();
        let focus = registry.insert(session)?;

        self.tty.enter()?;
        install_sigwinch_handler();
        let (mut reader, rx) = match StdinReader::spawn() {
            Ok(pair) => pair,
            Err(e) => {
                self.tty.leave()?;
                return Err(e.into());
            }
        };

        let result = self.run_inner(&mut registry, focus, &rx);

        // Always clean up, even if the loop errored.
        registry.destroy_all();
        reader.stop();
        self.tty.leave()?;

        result.map_err(Into::into)
    }

    /// Child processes need a pty, which this platform lacks.
    ///
    /// # Errors
    ///
    /// Always.
    #[cfg(not(unix))]
    pub fn run(&mut self) -> crate::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported).into())
    }

    fn run_inner<C: Channel>(
        &mut self,
        registry: &mut TerminalRegistry<Session<C>>,
        focus: TerminalId,
        rx: &Receiver<Vec<u8>>,
    ) -> io::Result<()> {
        let caps = self.config.caps();
        tracing::debug!(tier = ?caps.tier(), colors = self.config.color_count, "capabilities negotiated");

        let mut adapter = AnsiAdapter::new(io::stdout(), caps, self.config.color_count);
        let mut buf = ScreenBuffer::new(self.tty.size(), caps);
        let mut clock = FrameClock::new(self.config.frame_interval);
        let fallback = self.config.command.join(" ");
        let mut stdin_open = true;
        let mut pending_frame = true;

        if let Some(session) = registry.get_mut(focus) {
            paint_title_bar(&mut buf, session.emulator().title(), &fallback);
            session.blit_all(&mut buf, Point::new(0, TITLE_ROWS));
        }

        loop {
            // ── Keystrokes to the child ──────────────────────────
            while stdin_open {
                match rx.try_recv() {
                    Ok(bytes) => {
                        if let Some(session) = registry.get_mut(focus) {
                            if let Err(e) = session.send(&bytes) {
                                tracing::warn!(error = %e, "input dropped");
                            }
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        tracing::debug!("stdin closed");
                        stdin_open = false;
                    }
                }
            }

            // ── Host resize ──────────────────────────────────────
            if SIGWINCH_RECEIVED.swap(false, Ordering::Relaxed) {
                let host = self.tty.refresh_size();
                resize_all(registry, focus, &mut buf, &mut adapter, &fallback, host);
                pending_frame = true;
            }

            // ── Child output ─────────────────────────────────────
            let wait = if pending_frame {
                clock.remaining(Instant::now()).unwrap_or(Duration::ZERO)
            } else {
                self.config.tick_interval
            };
            registry.poll_each(wait, |registry, id, status| {
                if status == PollStatus::Disconnected {
                    tracing::info!(%id, "terminal disconnected");
                    registry.destroy(id);
                }
            });
            let Some(session) = registry.get_mut(focus) else {
                return Ok(());
            };

            // ── Blit ─────────────────────────────────────────────
            let changes = session.take_changes();
            if changes.contains(Changes::TITLE) {
                let title = session.emulator().title();
                paint_title_bar(&mut buf, title, &fallback);
                adapter.set_title(title)?;
            }
            session.blit(&mut buf, Point::new(0, TITLE_ROWS));

            // ── Flush, paced ─────────────────────────────────────
            if buf.is_dirty() {
                pending_frame = match buf.flush_paced(&mut adapter, &mut clock, Instant::now()) {
                    Ok(FlushOutcome::Flushed(_)) => false,
                    Ok(FlushOutcome::Deferred { .. }) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "flush failed");
                        adapter.reset_state();
                        buf.invalidate();
                        true
                    }
                };
            } else {
                pending_frame = false;
            }
        }
    }
}

/// Apply a new host size to the buffer and every child, then repaint.
fn resize_all<C: Channel>(
    registry: &mut TerminalRegistry<Session<C>>,
    focus: TerminalId,
    buf: &mut ScreenBuffer,
    adapter: &mut AnsiAdapter<Stdout>,
    fallback: &str,
    host: Size,
) {
    buf.resize(host);
    adapter.reset_state();
    let inner = child_size(host);
    let ids: Vec<TerminalId> = registry.ids().collect();
    for id in ids {
        if let Some(session) = registry.get_mut(id) {
            if let Err(e) = session.resize(inner) {
                tracing::warn!(%id, error = %e, "child resize failed");
            }
        }
    }
    if let Some(session) = registry.get_mut(focus) {
        paint_title_bar(buf, session.emulator().title(), fallback);
        session.blit_all(buf, Point::new(0, TITLE_ROWS));
    }
    tracing::debug!(?host, ?inner, "host resized");
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CaptureAdapter;
    use crate::convert::TermCap;
    use pretty_assertions::assert_eq;

    fn flushed(buf: &mut ScreenBuffer) -> CaptureAdapter {
        let mut cap = CaptureAdapter::new(buf.size(), 16);
        buf.flush(&mut cap).unwrap();
        cap
    }

    // ── Layout ──────────────────────────────────────────────────

    #[test]
    fn child_gets_all_but_the_title_row() {
        assert_eq!(child_size(Size { cols: 80, rows: 24 }), Size { cols: 80, rows: 23 });
        assert_eq!(child_size(Size { cols: 0, rows: 1 }), Size { cols: 1, rows: 1 });
    }

    #[test]
    fn title_is_centred_and_padded() {
        let mut buf = ScreenBuffer::new(Size { cols: 10, rows: 2 }, TermCap::default());
        paint_title_bar(&mut buf, "vim", "sh");
        let cap = flushed(&mut buf);
        assert_eq!(cap.row_text(0), "   vim    ");
        assert_eq!(cap.attr_at(0, 0), Some(TITLE_ATTR));
    }

    #[test]
    fn empty_title_uses_fallback_and_long_titles_clip() {
        let mut buf = ScreenBuffer::new(Size { cols: 6, rows: 1 }, TermCap::default());
        paint_title_bar(&mut buf, "", "sh");
        assert_eq!(flushed(&mut buf).row_text(0), "  sh  ");

        let mut buf = ScreenBuffer::new(Size { cols: 4, rows: 1 }, TermCap::default());
        paint_title_bar(&mut buf, "a\x07very long title", "sh");
        assert_eq!(flushed(&mut buf).row_text(0), "aver");
    }

    // ── SIGWINCH flag ──────────────────────────────────────────

    #[test]
    fn sigwinch_flag_swap() {
        SIGWINCH_RECEIVED.store(true, Ordering::Relaxed);
        let was = SIGWINCH_RECEIVED.swap(false, Ordering::Relaxed);
        assert!(was);
        assert!(!SIGWINCH_RECEIVED.load(Ordering::Relaxed));
    }

    // ── Host construction ──────────────────────────────────────

    #[test]
    fn host_new_does_not_touch_the_tty() {
        let host = Host::new(Config::default());
        let size = host.size();
        assert!(size.cols > 0);
        assert!(size.rows > 0);
    }
}
