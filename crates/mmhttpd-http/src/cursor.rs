//! Bounded receive cursor.
//!
//! `RecvBuf` owns a fixed-capacity byte buffer and three offsets:
//!
//! ```text
//!   0        start_line     checked_idx        read_idx       capacity
//!   |  consumed  | current line |   unscanned     |     spare      |
//! ```
//!
//! Invariant: `start_line <= checked_idx <= read_idx <= capacity`.
//!
//! The line splitter recognizes CRLF and, for a `\n` whose preceding
//! byte is `\r`, the LF half of a terminator split across scans. A
//! complete line has its terminator bytes overwritten with NUL.

use std::ops::Range;

/// Result of one line-splitter scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line is isolated; fetch it with `take_line`
    Ok,
    /// Malformed terminator
    Bad,
    /// Need more bytes from the socket
    Open,
}

pub struct RecvBuf {
    buf: Box<[u8]>,
    read_idx: usize,
    checked_idx: usize,
    start_line: usize,
}

impl RecvBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes received so far
    pub fn read_idx(&self) -> usize {
        self.read_idx
    }

    /// Bytes scanned by the line splitter
    pub fn checked_idx(&self) -> usize {
        self.checked_idx
    }

    /// Offset of the line being assembled
    pub fn start_line(&self) -> usize {
        self.start_line
    }

    /// Free space after `read_idx`
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_idx
    }

    pub fn is_full(&self) -> bool {
        self.read_idx == self.buf.len()
    }

    /// Received bytes, `[0, read_idx)`
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.read_idx]
    }

    /// Spare capacity to receive into; follow with `advance`.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.read_idx..]
    }

    /// Mark `n` spare bytes as received.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.read_idx = (self.read_idx + n).min(self.buf.len());
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.read_idx..self.read_idx + n].copy_from_slice(&data[..n]);
        self.read_idx += n;
        n
    }

    /// Scan `[checked_idx, read_idx)` for the next line terminator.
    ///
    /// A trailing lone `\r` leaves `checked_idx` on it so the next scan
    /// sees the pair once the `\n` arrives.
    pub fn scan_line(&mut self) -> LineStatus {
        while self.checked_idx < self.read_idx {
            match self.buf[self.checked_idx] {
                b'\r' => {
                    if self.checked_idx + 1 == self.read_idx {
                        return LineStatus::Open;
                    }
                    if self.buf[self.checked_idx + 1] == b'\n' {
                        self.buf[self.checked_idx] = 0;
                        self.buf[self.checked_idx + 1] = 0;
                        self.checked_idx += 2;
                        return LineStatus::Ok;
                    }
                    return LineStatus::Bad;
                }
                b'\n' => {
                    if self.checked_idx > 1 && self.buf[self.checked_idx - 1] == b'\r' {
                        self.buf[self.checked_idx - 1] = 0;
                        self.buf[self.checked_idx] = 0;
                        self.checked_idx += 1;
                        return LineStatus::Ok;
                    }
                    return LineStatus::Bad;
                }
                _ => self.checked_idx += 1,
            }
        }
        LineStatus::Open
    }

    /// Range of the line isolated by the last `Ok` scan, terminator
    /// excluded. Consumes it: `start_line` moves to `checked_idx`.
    pub fn take_line(&mut self) -> Range<usize> {
        let end = self.checked_idx.saturating_sub(2).max(self.start_line);
        let line = self.start_line..end;
        self.start_line = self.checked_idx;
        line
    }

    /// Bytes received past `checked_idx`
    pub fn unchecked_len(&self) -> usize {
        self.read_idx - self.checked_idx
    }

    /// Forget all content; the allocation is kept.
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
    }
}
