// SPDX-License-Identifier: MIT
//
// tv-term: a terminal view for text-mode UIs.
//
// Runs a child process on a pseudo-terminal, emulates the VT screen it
// draws, and shows that screen through a double-buffered cell grid that
// only sends what changed. The pieces stack bottom-up:
//
//   color, convert   colour model and per-terminal conversion (TermCap)
//   cell, buffer     cells, wide glyphs, damage ranges, paced flush
//   adapter, output  the display seam and the ANSI protocol writer
//   utf8, emulator   byte stream to grid
//   pty, session     child process plus emulator over a byte channel
//   registry         round-robin polling of every live child
//   tty, reader      the host tty and the keystrokes it delivers
//   event_loop       the host: stdin in, frames out
//
// Rendering never fails: malformed input is absorbed, coordinates are
// clamped, unrepresentable colours fall back. Only process and tty edges
// return errors.

pub mod adapter;
pub mod ansi;
pub mod buffer;
pub mod cell;
pub mod color;
pub mod config;
pub mod convert;
pub mod emulator;
pub mod error;
pub mod event_loop;
pub mod output;
#[cfg(unix)]
pub mod pty;
pub mod reader;
pub mod registry;
pub mod session;
#[cfg(unix)]
pub mod signals;
pub mod tty;
pub mod utf8;

pub use error::{Error, Result};
