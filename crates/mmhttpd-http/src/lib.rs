//! # mmhttpd-http
//!
//! Per-connection HTTP state machine.
//!
//! A connection moves `REQUEST_LINE → HEADERS → (CONTENT)?` over a fixed
//! receive buffer, resolves the target against the document root, and
//! answers with a header block plus, for non-empty files, a memory-mapped
//! body sent in the same `writev`.
//!
//! Nothing in here knows about epoll or threads. Whoever holds the
//! connection's turn drives it and acts on the returned `Disposition`.
//!
//! ## Modules
//!
//! - `cursor` - `RecvBuf`, the bounded receive cursor and line splitter
//! - `parse` - `RequestParser` and `HttpCode`
//! - `response` - `ResponseBuf`, bounded header formatting, fixed texts
//! - `conn` - `HttpConn` read / process / write

pub mod cursor;
pub mod parse;
pub mod response;
pub mod conn;

pub use conn::{Disposition, HttpConn, ReadOutcome, WriteOutcome};
pub use cursor::{LineStatus, RecvBuf};
pub use parse::{CheckState, HttpCode, Method, RequestParser};
pub use response::ResponseBuf;
