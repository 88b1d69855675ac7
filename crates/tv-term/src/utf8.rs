// SPDX-License-Identifier: MIT
//
// Incremental UTF-8 decoder.
//
// A child process writes whatever its buffers hold, so a read may end in
// the middle of a multi-byte sequence. The decoder keeps the partial
// sequence between calls and finishes it when the rest arrives. Feeding
// the same bytes in one chunk or one byte at a time yields the same chars.
//
// Malformed input never stalls the stream: an invalid lead byte, a
// truncated sequence interrupted by a new lead, an overlong form or a
// surrogate each produce one U+FFFD and decoding resumes at the next byte.

/// Replacement for undecodable input.
pub const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Byte-at-a-time UTF-8 decoder with carry-over between chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utf8Decoder {
    buf: [u8; 4],
    have: u8,
    need: u8,
}

impl Utf8Decoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; 4],
            have: 0,
            need: 0,
        }
    }

    /// Whether a multi-byte sequence is waiting for more bytes.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.need != 0
    }

    /// Drop any partial sequence.
    pub const fn reset(&mut self) {
        self.have = 0;
        self.need = 0;
    }

    /// Decode `bytes`, calling `emit` for every completed char.
    pub fn decode(&mut self, bytes: &[u8], mut emit: impl FnMut(char)) {
        for &b in bytes {
            self.push(b, &mut emit);
        }
    }

    /// Decode one byte.
    pub fn push(&mut self, byte: u8, emit: &mut impl FnMut(char)) {
        if self.need == 0 {
            self.start(byte, emit);
            return;
        }

        if byte & 0xC0 != 0x80 {
            // Sequence cut short. Report it, then treat the byte afresh.
            self.reset();
            emit(REPLACEMENT);
            self.start(byte, emit);
            return;
        }

        self.buf[usize::from(self.have)] = byte;
        self.have += 1;
        if self.have == self.need {
            let n = usize::from(self.need);
            let ch = std::str::from_utf8(&self.buf[..n])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(REPLACEMENT);
            self.reset();
            emit(ch);
        }
    }

    fn start(&mut self, byte: u8, emit: &mut impl FnMut(char)) {
        let need = match byte {
            0x00..=0x7F => {
                emit(char::from(byte));
                return;
            }
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            // Continuation without a lead, C0/C1 overlong leads, > U+10FFFF.
            _ => {
                emit(REPLACEMENT);
                return;
            }
        };
        self.buf[0] = byte;
        self.have = 1;
        self.need = need;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
