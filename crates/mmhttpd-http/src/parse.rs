//! Request parser: main state machine over the line splitter.
//!
//! ```text
//!   REQUEST_LINE ──ok──▶ HEADERS ──blank line, Content-Length > 0──▶ CONTENT
//!        │                  │                                           │
//!        bad                blank line, no body                   body complete
//!        ▼                  ▼                                           ▼
//!   BadRequest          GetRequest  ◀───────────────────────────────────┘
//! ```
//!
//! `parse` may be called any number of times as bytes trickle in; it
//! resumes where the previous call stopped and the final `HttpCode` does
//! not depend on how the request was split across reads.

use crate::cursor::{LineStatus, RecvBuf};

use mmhttpd_core::{kdebug, ktrace};

/// Outcome of processing a request, from parse through resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// Incomplete; read more
    NoRequest,
    /// Complete request parsed, not yet resolved
    GetRequest,
    /// Malformed request, or a directory target
    BadRequest,
    /// Target does not exist
    NoResource,
    /// Target is not world-readable
    ForbiddenRequest,
    /// Target resolved and (if non-empty) mapped
    FileRequest,
    /// Open or mmap failed after a successful stat
    InternalError,
}

/// Main parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Content,
}

/// Request method. Only `GET` is served; any other token is a bad request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
}

impl Method {
    /// Case-insensitive method token lookup
    pub fn parse(token: &[u8]) -> Option<Method> {
        token.eq_ignore_ascii_case(b"GET").then_some(Method::Get)
    }
}

/// Fields extracted from the request line and headers.
#[derive(Debug, Default)]
struct Request {
    method: Option<Method>,
    url: Vec<u8>,
    version: String,
    host: Option<String>,
    content_length: usize,
    keep_alive: bool,
}

enum HeaderStep {
    More,
    Body,
    Complete,
}

impl Request {
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), &'static str> {
        let sp = find_blank(line).ok_or("no target")?;
        let method = Method::parse(&line[..sp]);
        if method != Some(Method::Get) {
            return Err("unsupported method");
        }

        let rest = skip_blank(&line[sp + 1..]);
        let sp = find_blank(rest).ok_or("no version")?;
        let mut url = &rest[..sp];
        let version = skip_blank(&rest[sp + 1..]);
        if !version.eq_ignore_ascii_case(b"HTTP/1.1") {
            return Err("unsupported version");
        }

        if url.len() >= 7 && url[..7].eq_ignore_ascii_case(b"http://") {
            url = &url[7..];
            let slash = url.iter().position(|&b| b == b'/').ok_or("absolute target without path")?;
            url = &url[slash..];
        }
        if url.first() != Some(&b'/') {
            return Err("target must start with '/'");
        }

        self.method = method;
        self.url = url.to_vec();
        self.version = String::from_utf8_lossy(version).into_owned();
        Ok(())
    }

    fn parse_header(&mut self, line: &[u8]) -> HeaderStep {
        if line.is_empty() {
            return if self.content_length != 0 {
                HeaderStep::Body
            } else {
                HeaderStep::Complete
            };
        }

        if let Some(value) = header_value(line, b"Connection:") {
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = header_value(line, b"Content-Length:") {
            self.content_length = atol(value);
        } else if let Some(value) = header_value(line, b"Host:") {
            self.host = Some(String::from_utf8_lossy(value).into_owned());
        } else {
            ktrace!("unknown header: {}", String::from_utf8_lossy(line));
        }
        HeaderStep::More
    }
}

pub struct RequestParser {
    recv: RecvBuf,
    state: CheckState,
    req: Request,
}

impl RequestParser {
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            recv: RecvBuf::with_capacity(read_buffer_size),
            state: CheckState::RequestLine,
            req: Request::default(),
        }
    }

    pub fn recv(&self) -> &RecvBuf {
        &self.recv
    }

    pub fn recv_mut(&mut self) -> &mut RecvBuf {
        &mut self.recv
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn method(&self) -> Option<Method> {
        self.req.method
    }

    /// Request target, scheme prefix stripped, always starting with '/'
    pub fn url(&self) -> &[u8] {
        &self.req.url
    }

    pub fn version(&self) -> &str {
        &self.req.version
    }

    pub fn host(&self) -> Option<&str> {
        self.req.host.as_deref()
    }

    pub fn content_length(&self) -> usize {
        self.req.content_length
    }

    pub fn keep_alive(&self) -> bool {
        self.req.keep_alive
    }

    /// Back to REQUEST_LINE with an empty buffer and no parsed fields.
    pub fn reset(&mut self) {
        self.recv.reset();
        self.state = CheckState::RequestLine;
        self.req = Request::default();
    }

    /// Advance over whatever has been received.
    ///
    /// Returns `NoRequest` (need more bytes), `BadRequest`, or
    /// `GetRequest` (a complete request is available).
    pub fn parse(&mut self) -> HttpCode {
        loop {
            if self.state == CheckState::Content {
                // body bytes are counted from the end of the header block
                let needed = self.recv.checked_idx().saturating_add(self.req.content_length);
                return if self.recv.read_idx() >= needed {
                    HttpCode::GetRequest
                } else {
                    HttpCode::NoRequest
                };
            }

            match self.recv.scan_line() {
                LineStatus::Open => return HttpCode::NoRequest,
                LineStatus::Bad => return self.reject("malformed line terminator"),
                LineStatus::Ok => {}
            }

            let range = self.recv.take_line();
            let line = &self.recv.as_bytes()[range];
            match self.state {
                CheckState::RequestLine => {
                    if let Err(why) = self.req.parse_request_line(line) {
                        kdebug!("bad request line ({}): {}", why, String::from_utf8_lossy(line));
                        return self.reject(why);
                    }
                    kdebug!(
                        "request: GET {} {}",
                        String::from_utf8_lossy(&self.req.url),
                        self.req.version
                    );
                    self.state = CheckState::Headers;
                }
                CheckState::Headers => match self.req.parse_header(line) {
                    HeaderStep::More => {}
                    HeaderStep::Body => self.state = CheckState::Content,
                    HeaderStep::Complete => return HttpCode::GetRequest,
                },
                CheckState::Content => unreachable!("content state handled above"),
            }
        }
    }

    fn reject(&mut self, why: &'static str) -> HttpCode {
        ktrace!("rejecting request: {}", why);
        self.req.keep_alive = false;
        HttpCode::BadRequest
    }
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn find_blank(s: &[u8]) -> Option<usize> {
    s.iter().position(|&b| is_blank(b))
}

fn skip_blank(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|&&b| is_blank(b)).count();
    &s[n..]
}

/// Case-insensitive `name` prefix match; returns the value with leading
/// blanks skipped.
fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name) {
        Some(skip_blank(&line[name.len()..]))
    } else {
        None
    }
}

/// Leading decimal digits after optional whitespace and '+'. Anything
/// else, including a negative sign, reads as 0.
fn atol(s: &[u8]) -> usize {
    let s = &s[s.iter().take_while(|b| b.is_ascii_whitespace()).count()..];
    let s = s.strip_prefix(b"+").unwrap_or(s);
    s.iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0usize, |acc, &d| acc.saturating_mul(10).saturating_add((d - b'0') as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(req: &[u8]) -> (HttpCode, RequestParser) {
        let mut p = RequestParser::new(2048);
        p.recv_mut().extend_from_slice(req);
        let code = p.parse();
        (code, p)
    }

    fn parse_chunked(req: &[u8], chunk: usize) -> HttpCode {
        let mut p = RequestParser::new(2048);
        let mut code = HttpCode::NoRequest;
        for piece in req.chunks(chunk) {
            p.recv_mut().extend_from_slice(piece);
            code = p.parse();
            if code != HttpCode::NoRequest {
                break;
            }
        }
        code
    }

    #[test]
    fn test_simple_get() {
        let (code, p) = parse_all(b"GET /index.html HTTP/1.1\r\nHost: example\r\n\r\n");
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(p.method(), Some(Method::Get));
        assert_eq!(p.url(), b"/index.html");
        assert_eq!(p.version(), "HTTP/1.1");
        assert_eq!(p.host(), Some("example"));
        assert!(!p.keep_alive());
        assert_eq!(p.state(), CheckState::Headers);
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let requests: [&[u8]; 6] = [
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n",
            b"get\t/b\thttp/1.1\r\nConnection: keep-alive\r\n\r\n",
            b"GET http://host/c HTTP/1.1\r\nX-Other: 1\r\n\r\n",
            b"GET /d HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
            b"POST / HTTP/1.1\r\n\r\n",
            b"GET /e HTTP/1.0\r\n\r\n",
        ];
        for req in requests {
            let (whole, _) = parse_all(req);
            for chunk in 1..=req.len() {
                assert_eq!(
                    parse_chunked(req, chunk),
                    whole,
                    "chunk size {} for {:?}",
                    chunk,
                    String::from_utf8_lossy(req)
                );
            }
        }
    }

    #[test]
    fn test_unsupported_method_and_version() {
        assert_eq!(parse_all(b"POST / HTTP/1.1\r\n\r\n").0, HttpCode::BadRequest);
        assert_eq!(parse_all(b"FETCH / HTTP/1.1\r\n\r\n").0, HttpCode::BadRequest);
        assert_eq!(parse_all(b"GET / HTTP/1.0\r\n\r\n").0, HttpCode::BadRequest);
        assert_eq!(parse_all(b"GET /\r\n\r\n").0, HttpCode::BadRequest);
        assert_eq!(parse_all(b"GET\r\n\r\n").0, HttpCode::BadRequest);
    }

    #[test]
    fn test_target_forms() {
        let (code, p) = parse_all(b"GET HTTP://example.com/x/y HTTP/1.1\r\n\r\n");
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(p.url(), b"/x/y");

        assert_eq!(parse_all(b"GET http://example.com HTTP/1.1\r\n\r\n").0, HttpCode::BadRequest);
        assert_eq!(parse_all(b"GET index.html HTTP/1.1\r\n\r\n").0, HttpCode::BadRequest);
    }

    #[test]
    fn test_extra_blanks_between_tokens() {
        let (code, p) = parse_all(b"GET  \t /spaced \t HTTP/1.1\r\n\r\n");
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(p.url(), b"/spaced");
    }

    #[test]
    fn test_headers() {
        let (code, p) = parse_all(
            b"GET / HTTP/1.1\r\nconnection:   Keep-Alive\r\nHOST:\tbox\r\nAccept: */*\r\n\r\n",
        );
        assert_eq!(code, HttpCode::GetRequest);
        assert!(p.keep_alive());
        assert_eq!(p.host(), Some("box"));

        let (_, p) = parse_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(!p.keep_alive());
    }

    #[test]
    fn test_content_waits_for_body() {
        let mut p = RequestParser::new(2048);
        p.recv_mut()
            .extend_from_slice(b"GET / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab");
        assert_eq!(p.parse(), HttpCode::NoRequest);
        assert_eq!(p.state(), CheckState::Content);
        assert_eq!(p.content_length(), 4);

        p.recv_mut().extend_from_slice(b"cd");
        assert_eq!(p.parse(), HttpCode::GetRequest);
    }

    #[test]
    fn test_bad_terminator_rejects_and_clears_keep_alive() {
        let (code, p) = parse_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\nHost: x\rY\r\n\r\n");
        assert_eq!(code, HttpCode::BadRequest);
        assert!(!p.keep_alive());
        assert_eq!(parse_all(b"GET / HTTP/1.1\n\n").0, HttpCode::BadRequest);
    }

    #[test]
    fn test_incomplete_request() {
        let (code, p) = parse_all(b"GET / HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(code, HttpCode::NoRequest);
        assert_eq!(p.state(), CheckState::Headers);
    }

    #[test]
    fn test_reset() {
        let (_, mut p) = parse_all(b"GET /x HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        p.reset();
        assert_eq!(p.state(), CheckState::RequestLine);
        assert_eq!(p.recv().read_idx(), 0);
        assert!(p.url().is_empty());
        assert!(!p.keep_alive());
        assert_eq!(p.method(), None);
    }

    #[test]
    fn test_atol() {
        assert_eq!(atol(b"42"), 42);
        assert_eq!(atol(b"  17abc"), 17);
        assert_eq!(atol(b"+8"), 8);
        assert_eq!(atol(b"-3"), 0);
        assert_eq!(atol(b"x"), 0);
        assert_eq!(atol(b""), 0);
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!(Method::parse(b"get"), Some(Method::Get));
        assert_eq!(Method::parse(b"GeT"), Some(Method::Get));
        assert_eq!(Method::parse(b"POST"), None);
        assert_eq!(Method::parse(b"GETS"), None);
    }
}
