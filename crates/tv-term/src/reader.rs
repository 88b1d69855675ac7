// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Background stdin reader: keystrokes for the child.
//
// The host never interprets input: raw bytes from the tty go to the child
// exactly as typed. A dedicated thread reads them and hands chunks to the
// UI thread over a channel, which drains it without blocking once per tick
// before polling the children.
//
// Shutdown: the thread polls its descriptor with a short timeout and checks
// a stop flag between polls, so it never stays stuck in `read()`.

#[cfg(unix)]
use std::os::fd::RawFd;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Largest chunk handed over at once. A paste may arrive in several.
const READ_BUF_SIZE: usize = 4096;

/// How often the thread checks the stop flag (milliseconds).
const POLL_TIMEOUT_MS: i32 = 50;

/// Background stdin reader thread.
///
/// Runs until [`stop`](Self::stop) is called, the `StdinReader` is
/// dropped, input hits EOF, or the receiver goes away.
pub struct StdinReader {
    /// `None` after `stop()` joins it.
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl StdinReader {
    /// Spawn the reader on the process's stdin.
    ///
    /// Each received `Vec<u8>` is a non-empty chunk of raw input. The
    /// channel closes when the reader stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot spawn the thread.
    pub fn spawn() -> io::Result<(Self, Receiver<Vec<u8>>)> {
        #[cfg(unix)]
        {
            Self::spawn_fd(libc::STDIN_FILENO)
        }
        #[cfg(not(unix))]
        {
            Self::start(|tx, stop| blocking_loop(&tx, &stop))
        }
    }

    /// Spawn the reader on an arbitrary readable descriptor.
    ///
    /// The caller keeps `fd` open for as long as the reader runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot spawn the thread.
    #[cfg(unix)]
    pub fn spawn_fd(fd: RawFd) -> io::Result<(Self, Receiver<Vec<u8>>)> {
        Self::start(move |tx, stop| poll_loop(fd, &tx, &stop))
    }

    fn start<F>(body: F) -> io::Result<(Self, Receiver<Vec<u8>>)>
    where
        F: FnOnce(mpsc::Sender<Vec<u8>>, Arc<AtomicBool>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || body(tx, stop_flag))?;

        Ok((
            Self {
                handle: Some(handle),
                stop,
            },
            rx,
        ))
    }

    /// Signal the thread to stop and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StdinReader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StdinReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinReader")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

/// Poll `fd`, read what is there, send it. Exits on stop, EOF, a read
/// error, or a dropped receiver.
#[cfg(unix)]
fn poll_loop(fd: RawFd, tx: &mpsc::Sender<Vec<u8>>, stop: &AtomicBool) {
    let mut buf = [0u8; READ_BUF_SIZE];

    while !stop.load(Ordering::Relaxed) {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&raw mut pfd, 1, POLL_TIMEOUT_MS) };
        if ready <= 0 {
            continue;
        }

        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        let Ok(n) = usize::try_from(n) else {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        };
        if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
            break;
        }
    }
    tracing::debug!("stdin reader finished");
}

/// Blocking fallback where `poll` is unavailable. Shutdown waits for the
/// next keystroke.
#[cfg(not(unix))]
fn blocking_loop(tx: &mpsc::Sender<Vec<u8>>, stop: &AtomicBool) {
    use std::io::Read;

    let stdin = io::stdin();
    let mut buf = [0u8; READ_BUF_SIZE];
    while !stop.load(Ordering::Relaxed) {
        match stdin.lock().read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
