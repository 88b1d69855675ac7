// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// SIGCHLD watch shared by every live child terminal.
//
// The handler only sets an atomic flag; the registry checks it once per
// poll and reaps children from normal code. Installation is reference
// counted: the first `ChildWatch` installs the handler and remembers the
// previous disposition, the last one dropped puts it back.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Set by the handler whenever any child changes state.
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

static WATCH: Mutex<WatchState> = Mutex::new(WatchState {
    users: 0,
    previous: None,
});

struct WatchState {
    users: usize,
    previous: Option<libc::sigaction>,
}

// `libc::sigaction` holds a raw handler address, nothing thread-bound.
unsafe impl Send for WatchState {}

extern "C" fn sigchld_handler(_sig: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::Relaxed);
}

fn lock() -> MutexGuard<'static, WatchState> {
    WATCH.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume the "a child exited" notification.
///
/// Returns `true` at most once per burst of SIGCHLD deliveries.
pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::Relaxed)
}

/// Whether our SIGCHLD handler is currently installed.
#[must_use]
pub fn is_installed() -> bool {
    lock().users > 0
}

/// Keeps the SIGCHLD handler installed while alive.
#[derive(Debug)]
pub struct ChildWatch {
    _private: (),
}

impl ChildWatch {
    /// Register one more user of the handler, installing it if first.
    ///
    /// # Errors
    ///
    /// Returns the OS error if `sigaction` fails.
    pub fn acquire() -> io::Result<Self> {
        let mut state = lock();
        if state.users == 0 {
            let previous = unsafe {
                let mut sa: libc::sigaction = std::mem::zeroed();
                sa.sa_sigaction = sigchld_handler as *const () as usize;
                sa.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
                libc::sigemptyset(&raw mut sa.sa_mask);
                let mut old: libc::sigaction = std::mem::zeroed();
                if libc::sigaction(libc::SIGCHLD, &raw const sa, &raw mut old) == -1 {
                    return Err(io::Error::last_os_error());
                }
                old
            };
            state.previous = Some(previous);
            tracing::debug!("SIGCHLD handler installed");
        }
        state.users += 1;
        Ok(Self { _private: () })
    }
}

impl Drop for ChildWatch {
    fn drop(&mut self) {
        let mut state = lock();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 {
            if let Some(previous) = state.previous.take() {
                unsafe {
                    libc::sigaction(libc::SIGCHLD, &raw const previous, ptr::null_mut());
                }
                tracing::debug!("SIGCHLD handler restored");
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
