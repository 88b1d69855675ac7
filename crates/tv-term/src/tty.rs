// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// The host tty: the real terminal tvterm runs in.
//
// While a child is hosted the tty belongs to it. Raw mode passes every
// keystroke through unchanged (Ctrl-C included), the alternate screen keeps
// the user's scrollback intact, and the host's hardware caret is hidden
// because `ScreenBuffer` draws the child's cursor into the cells.
//
// Leaving puts all of that back. So do dropping the `HostTty` and a panic:
// the panic hook writes a fixed restore sequence straight to fd 1, since the
// stdout lock may be held by a flush that was interrupted.

use std::io::{self, Write};
use std::sync::{Mutex, Once};

use crate::adapter::Size;
use crate::ansi;

/// Assumed when the tty cannot be asked (pipes, CI).
pub const FALLBACK_SIZE: Size = Size::new(80, 24);

/// Undo everything `enter` did, in one write.
#[rustfmt::skip]
const RESTORE: &[u8] = b"\
    \x1b[?2026l\
    \x1b[0m\
    \x1b[0 q\
    \x1b[?25h\
    \x1b[?1049l";

// ─── Geometry ────────────────────────────────────────────────────────────────

/// Size of the tty behind `fd`, or `None` if it is not one.
#[cfg(unix)]
#[must_use]
pub fn query_size(fd: std::os::fd::RawFd) -> Option<Size> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ok = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &raw mut ws) } == 0;
    (ok && ws.ws_col > 0 && ws.ws_row > 0).then(|| Size::new(ws.ws_col, ws.ws_row))
}

/// Size of the host screen. Output may be redirected, so stdin is asked
/// when stdout is not a tty.
#[cfg(unix)]
#[must_use]
pub fn host_size() -> Option<Size> {
    query_size(libc::STDOUT_FILENO).or_else(|| query_size(libc::STDIN_FILENO))
}

#[cfg(not(unix))]
#[must_use]
pub fn host_size() -> Option<Size> {
    None
}

// ─── Raw mode ────────────────────────────────────────────────────────────────

/// Termios as it was before raw mode, for the panic hook.
#[cfg(unix)]
static SAVED_TERMIOS: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Turn `t` into raw mode: no echo, no line discipline, no signals, no
/// output processing, 8-bit bytes, reads return after one byte.
#[cfg(unix)]
fn make_raw(t: &mut libc::termios) {
    t.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    t.c_oflag &= !libc::OPOST;
    t.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    t.c_cflag &= !(libc::CSIZE | libc::PARENB);
    t.c_cflag |= libc::CS8;
    t.c_cc[libc::VMIN] = 1;
    t.c_cc[libc::VTIME] = 0;
}

/// Raw mode on stdin, holding the termios to go back to.
#[cfg(unix)]
struct RawMode {
    saved: libc::termios,
}

#[cfg(unix)]
impl RawMode {
    /// `Ok(None)` when stdin is not a tty: there is nothing to switch.
    fn enable() -> io::Result<Option<Self>> {
        let fd = libc::STDIN_FILENO;
        if unsafe { libc::isatty(fd) } == 0 {
            return Ok(None);
        }
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &raw mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut raw = saved;
        make_raw(&mut raw);
        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw const raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if let Ok(mut slot) = SAVED_TERMIOS.lock() {
            *slot = Some(saved);
        }
        Ok(Some(Self { saved }))
    }

    fn restore(&self) -> io::Result<()> {
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &raw const self.saved) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if let Ok(mut slot) = SAVED_TERMIOS.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[cfg(not(unix))]
struct RawMode;

#[cfg(not(unix))]
impl RawMode {
    #[allow(clippy::unnecessary_wraps)]
    fn enable() -> io::Result<Option<Self>> {
        Ok(None)
    }

    #[allow(clippy::unnecessary_wraps)]
    fn restore(&self) -> io::Result<()> {
        Ok(())
    }
}

// ─── Panic hook ──────────────────────────────────────────────────────────────

static PANIC_HOOK: Once = Once::new();

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            write_restore_raw();
            #[cfg(unix)]
            if let Ok(slot) = SAVED_TERMIOS.lock() {
                if let Some(saved) = slot.as_ref() {
                    unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, saved) };
                }
            }
            previous(info);
        }));
    });
}

/// The same bytes as [`RESTORE`], through a writer.
fn write_restore(w: &mut impl Write) -> io::Result<()> {
    ansi::end_sync(w)?;
    ansi::reset(w)?;
    ansi::caret_default(w)?;
    ansi::cursor_show(w)?;
    ansi::exit_alt_screen(w)
}

fn write_restore_raw() {
    #[cfg(unix)]
    unsafe {
        libc::write(libc::STDOUT_FILENO, RESTORE.as_ptr().cast(), RESTORE.len());
    }
    #[cfg(not(unix))]
    {
        let mut out = io::stdout();
        let _ = out.write_all(RESTORE);
        let _ = out.flush();
    }
}

// ─── HostTty ─────────────────────────────────────────────────────────────────

/// Ownership of the host tty.
///
/// Nothing changes until [`enter`](Self::enter). [`leave`](Self::leave),
/// drop and the panic hook all put the tty back.
pub struct HostTty {
    size: Size,
    /// `Some` while entered on a real tty.
    raw: Option<RawMode>,
    entered: bool,
}

impl HostTty {
    /// Handle on the host tty, sized from the OS or [`FALLBACK_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            size: host_size().unwrap_or(FALLBACK_SIZE),
            raw: None,
            entered: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        self.size
    }

    /// Ask the OS again, after SIGWINCH. Keeps the old size if it cannot.
    pub fn refresh_size(&mut self) -> Size {
        if let Some(size) = host_size() {
            self.size = size;
        }
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_entered(&self) -> bool {
        self.entered
    }

    /// Hand the tty to the child: raw mode, alternate screen, hardware
    /// caret hidden, screen cleared. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if raw mode cannot be set or stdout fails. Raw mode
    /// is rolled back if the screen setup fails.
    pub fn enter(&mut self) -> io::Result<()> {
        if self.entered {
            return Ok(());
        }
        install_panic_hook();
        self.raw = RawMode::enable()?;

        let mut out = io::stdout().lock();
        let setup = ansi::enter_alt_screen(&mut out)
            .and_then(|()| ansi::cursor_hide(&mut out))
            .and_then(|()| ansi::clear_screen(&mut out))
            .and_then(|()| out.flush());
        drop(out);
        if let Err(e) = setup {
            if let Some(raw) = self.raw.take() {
                let _ = raw.restore();
            }
            return Err(e);
        }

        self.entered = true;
        tracing::debug!(size = ?self.size, raw = self.raw.is_some(), "host tty entered");
        Ok(())
    }

    /// Give the tty back to the user. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout or the termios restore fails.
    pub fn leave(&mut self) -> io::Result<()> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;

        let mut out = io::stdout().lock();
        let written = write_restore(&mut out).and_then(|()| out.flush());
        drop(out);
        let restored = self.raw.take().map_or(Ok(()), |raw| raw.restore());

        tracing::debug!("host tty restored");
        written.and(restored)
    }
}

impl Default for HostTty {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostTty {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

impl std::fmt::Debug for HostTty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTty")
            .field("size", &self.size)
            .field("entered", &self.entered)
            .field("raw", &self.raw.is_some())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
