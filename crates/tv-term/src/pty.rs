// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Pseudo-terminal child process.
//
// `portable-pty` opens the pair and spawns the child on the slave side as
// its session leader with the pty as controlling terminal. We keep the
// master, switched to non-blocking mode:
//
//   - Reads wait in poll() for at most the caller's timeout, so the UI
//     thread can poll several children per tick without a reader thread.
//   - Writes never block. Whatever the kernel does not take right away is
//     queued and retried before the next write or read.
//   - EOF or EIO on the master means every slave descriptor is gone: the
//     child exited (or closed its terminal). That is reported as
//     `ReadStatus::Closed`, never as an error.
//
// libc covers what the crate does not: O_NONBLOCK on the master, the
// bounded poll(), and a direct SIGWINCH to the child after a resize.

use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::time::Duration;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};

use crate::adapter::Size;
use crate::error::{Error, Result};
use crate::session::{Channel, ReadStatus};

// ─── Pty ─────────────────────────────────────────────────────────────────────

/// A child process running on its own pseudo-terminal.
pub struct Pty {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    /// The master's descriptor, shared by `reader` and `writer`.
    fd: RawFd,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    /// Bytes accepted by `write` but not yet taken by the kernel.
    pending: Vec<u8>,
    exited: bool,
}

impl Pty {
    /// Spawn `command` on a new pty of `size` with `TERM=term`.
    ///
    /// The child inherits the environment and working directory.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCommand`] for an empty argv, [`Error::OpenPty`] if no
    /// pty is available, [`Error::Spawn`] if the program cannot start.
    pub fn spawn(command: &[String], term: &str, size: Size) -> Result<Self> {
        let (program, args) = command.split_first().ok_or(Error::EmptyCommand)?;

        let pair = portable_pty::native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| Error::OpenPty(io::Error::other(e.to_string())))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", term);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| Error::Spawn {
            command: command.join(" "),
            source: io::Error::other(e.to_string()),
        })?;
        // Our copy of the slave must go, or EOF never arrives.
        drop(pair.slave);

        let master = pair.master;
        let fd = master
            .as_raw_fd()
            .ok_or_else(|| Error::OpenPty(io::Error::other("pty master has no descriptor")))?;
        set_nonblocking(fd).map_err(Error::OpenPty)?;
        let reader = master
            .try_clone_reader()
            .map_err(|e| Error::OpenPty(io::Error::other(e.to_string())))?;
        let writer = master
            .take_writer()
            .map_err(|e| Error::OpenPty(io::Error::other(e.to_string())))?;

        tracing::info!(pid = ?child.process_id(), program = %program, ?size, "spawned child on pty");
        Ok(Self {
            child,
            master,
            fd,
            reader,
            writer,
            pending: Vec::new(),
            exited: false,
        })
    }

    /// The child's process id, while the OS still reports one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Bytes still waiting to be written to the child.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Push queued bytes into the master until it would block.
    fn drain_pending(&mut self) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.writer.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for the master to become readable (or hang up).
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        match unsafe { libc::poll(&raw mut pfd, 1, ms) } {
            0 => Ok(false),
            n if n > 0 => Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted { Ok(false) } else { Err(err) }
            }
        }
    }
}

impl Channel for Pty {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        self.drain_pending()?;
        if !self.wait_readable(timeout)? {
            return Ok(ReadStatus::Timeout);
        }
        match self.reader.read(buf) {
            Ok(0) => Ok(ReadStatus::Closed),
            Ok(n) => Ok(ReadStatus::Data(n)),
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(ReadStatus::Closed),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(ReadStatus::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        self.drain_pending()
    }

    fn resize(&mut self, size: Size) -> io::Result<()> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| io::Error::other(e.to_string()))?;
        if let Some(pid) = self.pid().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // The kernel signals the foreground group; the child itself may
            // not be in it.
            unsafe {
                libc::kill(pid, libc::SIGWINCH);
            }
        }
        tracing::debug!(pid = ?self.pid(), ?size, "pty resized");
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        if !self.exited {
            if let Ok(Some(status)) = self.child.try_wait() {
                tracing::info!(pid = ?self.pid(), code = status.exit_code(), "child exited");
                self.exited = true;
            }
        }
        self.exited
    }

    fn kill(&mut self) {
        if self.exited {
            return;
        }
        // Fails only if the child is already gone.
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.exited = true;
        tracing::debug!(pid = ?self.pid(), "child killed");
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for Pty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pty")
            .field("pid", &self.pid())
            .field("fd", &self.fd)
            .field("pending", &self.pending.len())
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

const fn pty_size(size: Size) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
