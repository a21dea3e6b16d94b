//! Server configuration
//!
//! Compile-time defaults (see `crate::constants`) with runtime environment
//! overrides. The command line only carries the bind address and port;
//! everything else comes from here.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls in code (tests, embedding)
//! 2. Environment variables (`MMHTTPD_*`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use mmhttpd_core::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .workers(4)
//!     .doc_root("/srv/www");
//! config.validate()?;
//! ```

use crate::constants;
use crate::error::{HttpdError, Result};

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix for every override
const ENV_PREFIX: &str = "MMHTTPD_";

/// Smallest receive buffer that can hold a complete request
pub const MIN_READ_BUFFER: usize = 19;

/// Server configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory request targets are resolved against
    pub doc_root: PathBuf,
    /// Worker threads in the pool
    pub workers: usize,
    /// Maximum pending tasks in the pool queue
    pub max_requests: usize,
    /// Connection table size and live-connection ceiling
    pub max_fd: usize,
    /// Events harvested per epoll_wait
    pub max_events: usize,
    /// Per-connection receive buffer
    pub read_buffer_size: usize,
    /// Per-connection response header buffer
    pub write_buffer_size: usize,
    /// Maximum resolved path length, doc root included
    pub filename_len: usize,
    /// listen(2) backlog
    pub listen_backlog: i32,
    /// epoll_wait timeout while rejected dispatches wait for queue space
    pub retry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from(constants::DOC_ROOT),
            workers: constants::WORKER_THREADS,
            max_requests: constants::MAX_REQUESTS,
            max_fd: constants::MAX_FD,
            max_events: constants::MAX_EVENT_NUMBER,
            read_buffer_size: constants::READ_BUFFER_SIZE,
            write_buffer_size: constants::WRITE_BUFFER_SIZE,
            filename_len: constants::FILENAME_LEN,
            listen_backlog: constants::LISTEN_BACKLOG,
            retry_interval: Duration::from_millis(1),
        }
    }
}

impl ServerConfig {
    /// Library defaults, no environment lookups
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `MMHTTPD_DOC_ROOT` - Document root directory
    /// - `MMHTTPD_WORKERS` - Number of worker threads
    /// - `MMHTTPD_MAX_REQUESTS` - Task queue capacity
    /// - `MMHTTPD_MAX_FD` - Connection table size / connection ceiling
    /// - `MMHTTPD_MAX_EVENTS` - Events per epoll_wait
    /// - `MMHTTPD_READ_BUFFER` - Receive buffer bytes per connection
    /// - `MMHTTPD_WRITE_BUFFER` - Header buffer bytes per connection
    /// - `MMHTTPD_BACKLOG` - listen(2) backlog
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            doc_root: env_opt::<String>("DOC_ROOT").map(PathBuf::from).unwrap_or(d.doc_root),
            workers: env_get("WORKERS", d.workers),
            max_requests: env_get("MAX_REQUESTS", d.max_requests),
            max_fd: env_get("MAX_FD", d.max_fd),
            max_events: env_get("MAX_EVENTS", d.max_events),
            read_buffer_size: env_get("READ_BUFFER", d.read_buffer_size),
            write_buffer_size: env_get("WRITE_BUFFER", d.write_buffer_size),
            filename_len: d.filename_len,
            listen_backlog: env_get("BACKLOG", d.listen_backlog),
            retry_interval: d.retry_interval,
        }
    }

    pub fn doc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.doc_root = root.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    pub fn max_fd(mut self, n: usize) -> Self {
        self.max_fd = n;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn read_buffer_size(mut self, n: usize) -> Self {
        self.read_buffer_size = n;
        self
    }

    pub fn write_buffer_size(mut self, n: usize) -> Self {
        self.write_buffer_size = n;
        self
    }

    pub fn listen_backlog(mut self, n: i32) -> Self {
        self.listen_backlog = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HttpdError::InvalidConfig("workers must be at least 1"));
        }
        if self.max_requests == 0 {
            return Err(HttpdError::InvalidConfig("max_requests must be at least 1"));
        }
        if self.max_fd == 0 {
            return Err(HttpdError::InvalidConfig("max_fd must be at least 1"));
        }
        if self.max_events == 0 {
            return Err(HttpdError::InvalidConfig("max_events must be at least 1"));
        }
        // "GET / HTTP/1.1\r\n\r\n" (18 bytes) plus one free byte; a
        // receive that fills the buffer is treated as overflow
        if self.read_buffer_size < MIN_READ_BUFFER {
            return Err(HttpdError::InvalidConfig("read_buffer_size too small"));
        }
        // status line + headers of the largest fixed error response
        if self.write_buffer_size < 256 {
            return Err(HttpdError::InvalidConfig("write_buffer_size too small"));
        }
        if self.doc_root.as_os_str().len() + 1 >= self.filename_len {
            return Err(HttpdError::InvalidConfig("doc_root longer than filename_len"));
        }
        Ok(())
    }
}

/// `MMHTTPD_<key>` parsed as T, or the default on absence / parse failure
fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let c = ServerConfig::new();
        assert_eq!(c.doc_root, PathBuf::from("/var/www/html"));
        assert_eq!(c.workers, 8);
        assert_eq!(c.max_requests, 10000);
        assert_eq!(c.max_fd, 65536);
        assert_eq!(c.read_buffer_size, 2048);
        assert_eq!(c.write_buffer_size, 1024);
        assert_eq!(c.filename_len, 200);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let c = ServerConfig::new().workers(2).max_requests(4).doc_root("/tmp");
        assert_eq!(c.workers, 2);
        assert_eq!(c.max_requests, 4);
        assert_eq!(c.doc_root, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_validate_rejects() {
        assert!(ServerConfig::new().workers(0).validate().is_err());
        assert!(ServerConfig::new().max_requests(0).validate().is_err());
        assert!(ServerConfig::new().read_buffer_size(4).validate().is_err());
        assert!(ServerConfig::new().read_buffer_size(18).validate().is_err());
        assert!(ServerConfig::new().read_buffer_size(MIN_READ_BUFFER).validate().is_ok());
        assert!(ServerConfig::new().write_buffer_size(16).validate().is_err());

        let long_root = "/".to_string() + &"d".repeat(250);
        assert!(ServerConfig::new().doc_root(long_root).validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("MMHTTPD_MAX_EVENTS", "77");
        std::env::set_var("MMHTTPD_BACKLOG", "not_a_number");
        let c = ServerConfig::from_env();
        assert_eq!(c.max_events, 77);
        assert_eq!(c.listen_backlog, 5); // parse failure keeps the default
        std::env::remove_var("MMHTTPD_MAX_EVENTS");
        std::env::remove_var("MMHTTPD_BACKLOG");
    }
}
