//! Bounded response header buffer and the fixed response texts.

use std::fmt::{self, Write};

pub const OK_200_TITLE: &str = "OK";
pub const ERROR_400_TITLE: &str = "Bad Request";
pub const ERROR_400_FORM: &str =
    "Your request has bad syntax or is inherently impossible to satisfy.\n";
pub const ERROR_403_TITLE: &str = "Forbidden";
pub const ERROR_403_FORM: &str = "You do not have permission to get file from this server.\n";
pub const ERROR_404_TITLE: &str = "Not Found";
pub const ERROR_404_FORM: &str = "The requested file was not found on this server.\n";
pub const ERROR_500_TITLE: &str = "Internal Error";
pub const ERROR_500_FORM: &str = "There was an unusual problem serving the requested file.\n";
/// Body for a 200 on a zero-length file
pub const EMPTY_FILE_BODY: &str = "<html><body></body></html>";

/// Fixed-capacity buffer for the status line, headers and small bodies.
///
/// Every append is all-or-nothing: a write that would leave no byte
/// spare fails and leaves the buffer unchanged.
pub struct ResponseBuf {
    buf: Box<[u8]>,
    write_idx: usize,
}

impl ResponseBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            write_idx: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.write_idx
    }

    pub fn is_empty(&self) -> bool {
        self.write_idx == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.write_idx]
    }

    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.write_idx = 0;
    }

    /// Append formatted text. Use with `format_args!`.
    pub fn add_response(&mut self, args: fmt::Arguments<'_>) -> bool {
        // one byte always stays spare
        let limit = self.buf.len().saturating_sub(1);
        if self.write_idx >= limit {
            return false;
        }
        let mut w = SliceWriter {
            buf: &mut self.buf[self.write_idx..limit],
            pos: 0,
        };
        match w.write_fmt(args) {
            Ok(()) => {
                self.write_idx += w.pos;
                true
            }
            Err(_) => {
                let start = self.write_idx;
                self.buf[start..limit].fill(0);
                false
            }
        }
    }

    pub fn add_status_line(&mut self, status: u16, title: &str) -> bool {
        self.add_response(format_args!("HTTP/1.1 {} {}\r\n", status, title))
    }

    /// Content-Length, Connection, and the blank line ending the header block
    pub fn add_headers(&mut self, content_len: usize, keep_alive: bool) -> bool {
        self.add_content_length(content_len) && self.add_linger(keep_alive) && self.add_blank_line()
    }

    pub fn add_content_length(&mut self, content_len: usize) -> bool {
        self.add_response(format_args!("Content-Length: {}\r\n", content_len))
    }

    pub fn add_linger(&mut self, keep_alive: bool) -> bool {
        let value = if keep_alive { "keep-alive" } else { "close" };
        self.add_response(format_args!("Connection: {}\r\n", value))
    }

    pub fn add_blank_line(&mut self) -> bool {
        self.add_response(format_args!("\r\n"))
    }

    pub fn add_content(&mut self, content: &str) -> bool {
        self.add_response(format_args!("{}", content))
    }
}

/// `fmt::Write` into a slice that must not be filled completely.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.pos + s.len();
        if end >= self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(s.as_bytes());
        self.pos = end;
        Ok(())
    }
}
