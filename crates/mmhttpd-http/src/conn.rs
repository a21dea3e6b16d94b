//! `HttpConn`: one client connection.
//!
//! Slots are allocated once and reused: `init` binds a slot to a fresh
//! socket, `reset` prepares it for the next request on the same socket,
//! `detach` unbinds it when the connection is torn down.
//!
//! The connection never closes its own descriptor and never touches
//! epoll. Each entry point returns what should happen next and the
//! caller, holding the connection's turn, carries it out.

use crate::parse::{HttpCode, RequestParser};
use crate::response::{self, ResponseBuf};

use mmhttpd_core::error::last_errno;
use mmhttpd_core::interest::Interest;
use mmhttpd_core::{kdebug, kwarn};
use mmhttpd_module::mapped_file::MappedFile;

use std::ffi::OsString;
use std::fs::{self, File};
use std::net::SocketAddrV4;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Result of draining the socket into the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket would block; whatever arrived is buffered
    Drained,
    /// Orderly shutdown from the peer
    PeerClosed,
    /// Receive buffer exhausted before the request completed
    BufferFull,
    /// recv(2) failed
    Error(i32),
}

/// Result of pushing the pending response out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Everything sent; the mapping has been released
    Done { keep_alive: bool },
    /// Send buffer full; wait for writability
    WouldBlock,
    /// writev(2) failed; the mapping has been released
    Error(i32),
}

/// What the turn holder does once a step returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the connection back to epoll for one more event
    Rearm(Interest),
    /// Tear the connection down
    Close,
}

pub struct HttpConn {
    fd: RawFd,
    peer: Option<SocketAddrV4>,
    parser: RequestParser,
    response: ResponseBuf,
    real_file: PathBuf,
    mapping: Option<MappedFile>,
    bytes_to_send: usize,
    bytes_have_send: usize,
    keep_alive: bool,
    /// Responses fully written over the slot's lifetime
    responses: u64,
}

impl HttpConn {
    pub fn new(read_buffer_size: usize, write_buffer_size: usize) -> Self {
        Self {
            fd: -1,
            peer: None,
            parser: RequestParser::new(read_buffer_size),
            response: ResponseBuf::with_capacity(write_buffer_size),
            real_file: PathBuf::new(),
            mapping: None,
            bytes_to_send: 0,
            bytes_have_send: 0,
            keep_alive: false,
            responses: 0,
        }
    }

    /// Bind this slot to a freshly accepted socket.
    pub fn init(&mut self, fd: RawFd, peer: Option<SocketAddrV4>) {
        self.reset();
        self.fd = fd;
        self.peer = peer;
    }

    /// Back to the initial parse state. The socket stays bound.
    ///
    /// Bytes received past the end of the request just served are
    /// discarded.
    pub fn reset(&mut self) {
        self.unmap();
        self.parser.reset();
        self.response.clear();
        self.real_file.clear();
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;
        self.keep_alive = false;
    }

    /// Unbind the socket and release everything. Returns the descriptor
    /// for the caller to deregister and close.
    pub fn detach(&mut self) -> RawFd {
        self.reset();
        self.peer = None;
        std::mem::replace(&mut self.fd, -1)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    /// Monotonic count of completed responses; never reset.
    pub fn responses(&self) -> u64 {
        self.responses
    }

    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    /// Path resolved by the last `do_request`
    pub fn real_file(&self) -> &Path {
        &self.real_file
    }

    /// Size of the live file mapping, 0 when none
    pub fn mapped_len(&self) -> usize {
        self.mapping.as_ref().map_or(0, MappedFile::len)
    }

    pub fn unmap(&mut self) {
        self.mapping = None;
    }

    /// Receive until the socket would block.
    pub fn read(&mut self) -> ReadOutcome {
        loop {
            let recv = self.parser.recv_mut();
            if recv.is_full() {
                return ReadOutcome::BufferFull;
            }
            let spare = recv.spare_mut();
            let n = unsafe {
                libc::recv(
                    self.fd,
                    spare.as_mut_ptr() as *mut libc::c_void,
                    spare.len(),
                    0,
                )
            };
            if n < 0 {
                match last_errno() {
                    libc::EAGAIN => return ReadOutcome::Drained,
                    libc::EINTR => continue,
                    errno => return ReadOutcome::Error(errno),
                }
            }
            if n == 0 {
                return ReadOutcome::PeerClosed;
            }
            recv.advance(n as usize);
        }
    }

    /// Parse what has arrived and, for a complete request, resolve it.
    pub fn process_read(&mut self, doc_root: &Path, filename_len: usize) -> HttpCode {
        match self.parser.parse() {
            HttpCode::GetRequest => self.do_request(doc_root, filename_len),
            code => code,
        }
    }

    /// Resolve the request target under `doc_root` and map the file.
    ///
    /// The joined path is cut to `filename_len - 1` bytes.
    pub fn do_request(&mut self, doc_root: &Path, filename_len: usize) -> HttpCode {
        let mut path = doc_root.as_os_str().as_bytes().to_vec();
        path.extend_from_slice(self.parser.url());
        path.truncate(filename_len.saturating_sub(1));
        self.real_file = PathBuf::from(OsString::from_vec(path));

        let meta = match fs::metadata(&self.real_file) {
            Ok(meta) => meta,
            Err(_) => return HttpCode::NoResource,
        };
        if meta.mode() & libc::S_IROTH == 0 {
            return HttpCode::ForbiddenRequest;
        }
        if meta.is_dir() {
            return HttpCode::BadRequest;
        }

        let file = match File::open(&self.real_file) {
            Ok(file) => file,
            Err(e) => {
                kwarn!("open {} failed: {}", self.real_file.display(), e);
                return HttpCode::InternalError;
            }
        };
        let len = meta.len() as usize;
        if len > 0 {
            match MappedFile::map(&file, len) {
                Ok(mapping) => self.mapping = Some(mapping),
                Err(e) => {
                    kwarn!("{}: {}", self.real_file.display(), e);
                    return HttpCode::InternalError;
                }
            }
        }
        HttpCode::FileRequest
    }

    /// Format the response for `code`. `false` if it does not fit or
    /// `code` has no response.
    pub fn process_write(&mut self, code: HttpCode) -> bool {
        let keep_alive = self.parser.keep_alive();
        let formatted = match code {
            HttpCode::InternalError => {
                self.error_response(500, response::ERROR_500_TITLE, response::ERROR_500_FORM, keep_alive)
            }
            HttpCode::BadRequest => {
                self.error_response(400, response::ERROR_400_TITLE, response::ERROR_400_FORM, keep_alive)
            }
            HttpCode::NoResource => {
                self.error_response(404, response::ERROR_404_TITLE, response::ERROR_404_FORM, keep_alive)
            }
            HttpCode::ForbiddenRequest => {
                self.error_response(403, response::ERROR_403_TITLE, response::ERROR_403_FORM, keep_alive)
            }
            HttpCode::FileRequest => {
                let body_len = self.mapped_len();
                self.response.add_status_line(200, response::OK_200_TITLE)
                    && if body_len > 0 {
                        self.response.add_headers(body_len, keep_alive)
                    } else {
                        self.response.add_headers(response::EMPTY_FILE_BODY.len(), keep_alive)
                            && self.response.add_content(response::EMPTY_FILE_BODY)
                    }
            }
            _ => false,
        };
        if !formatted {
            return false;
        }

        self.bytes_to_send = self.response.len() + self.mapped_len();
        self.bytes_have_send = 0;
        self.keep_alive = keep_alive;
        true
    }

    fn error_response(&mut self, status: u16, title: &str, form: &str, keep_alive: bool) -> bool {
        self.response.add_status_line(status, title)
            && self.response.add_headers(form.len(), keep_alive)
            && self.response.add_content(form)
    }

    /// Send the header block and mapped body with vectored writes.
    pub fn write(&mut self) -> WriteOutcome {
        if self.bytes_to_send == 0 {
            return WriteOutcome::Done { keep_alive: true };
        }
        loop {
            let header = self.response.as_bytes();
            let body = self.mapping.as_ref().map_or(&[][..], MappedFile::as_slice);
            let sent = self.bytes_have_send;

            let mut iov = [libc::iovec {
                iov_base: std::ptr::null_mut(),
                iov_len: 0,
            }; 2];
            let mut iov_count = 0;
            if sent < header.len() {
                iov[iov_count] = libc::iovec {
                    iov_base: header[sent..].as_ptr() as *mut libc::c_void,
                    iov_len: header.len() - sent,
                };
                iov_count += 1;
            }
            let body_sent = sent.saturating_sub(header.len());
            if body_sent < body.len() {
                iov[iov_count] = libc::iovec {
                    iov_base: body[body_sent..].as_ptr() as *mut libc::c_void,
                    iov_len: body.len() - body_sent,
                };
                iov_count += 1;
            }

            let n = unsafe { libc::writev(self.fd, iov.as_ptr(), iov_count as libc::c_int) };
            if n < 0 {
                match last_errno() {
                    libc::EAGAIN => return WriteOutcome::WouldBlock,
                    libc::EINTR => continue,
                    errno => {
                        self.unmap();
                        return WriteOutcome::Error(errno);
                    }
                }
            }

            self.bytes_have_send += n as usize;
            if self.bytes_have_send >= self.bytes_to_send {
                self.unmap();
                self.responses += 1;
                return WriteOutcome::Done {
                    keep_alive: self.keep_alive,
                };
            }
        }
    }

    /// Write what is pending and decide the connection's next step.
    /// Also the entry point for writable readiness.
    pub fn flush(&mut self) -> Disposition {
        match self.write() {
            WriteOutcome::Done { keep_alive: true } => {
                self.reset();
                Disposition::Rearm(Interest::Read)
            }
            WriteOutcome::Done { keep_alive: false } => Disposition::Close,
            WriteOutcome::WouldBlock => Disposition::Rearm(Interest::Write),
            WriteOutcome::Error(errno) => {
                kdebug!("fd {}: writev failed: errno {}", self.fd, errno);
                Disposition::Close
            }
        }
    }

    /// One worker turn: read, parse, resolve, respond.
    pub fn process(&mut self, doc_root: &Path, filename_len: usize) -> Disposition {
        match self.read() {
            ReadOutcome::Drained => {}
            ReadOutcome::PeerClosed => return Disposition::Close,
            ReadOutcome::BufferFull => {
                kdebug!("fd {}: request exceeds receive buffer", self.fd);
                return Disposition::Close;
            }
            ReadOutcome::Error(errno) => {
                kdebug!("fd {}: recv failed: errno {}", self.fd, errno);
                return Disposition::Close;
            }
        }

        let code = self.process_read(doc_root, filename_len);
        if code == HttpCode::NoRequest {
            return Disposition::Rearm(Interest::Read);
        }
        if !self.process_write(code) {
            return Disposition::Close;
        }
        self.flush()
    }
}
