//! # mmhttpd-core
//!
//! Core types and traits for the mmhttpd file server.
//!
//! This crate holds everything the other crates agree on: the error
//! taxonomy, the logging macros, the server configuration, the
//! synchronization primitives, and the worker-pool contract. It contains
//! no sockets and no readiness multiplexing; those live in `mmhttpd-module`.
//!
//! ## Modules
//!
//! - `error` - `HttpdError`, `TrySubmitError`, `Result`
//! - `kprint` - Kernel-style leveled logging macros
//! - `config` - `ServerConfig` with compile-time defaults and env overrides
//! - `sync` - `Locker`, `Sem`, `Cond` over pthread / POSIX semaphores
//! - `task` - `Task` and `WorkerPool` traits
//! - `interest` - Readiness interest re-armed after each connection turn

pub mod error;
pub mod kprint;
pub mod config;
pub mod sync;
pub mod task;
pub mod interest;

// Re-exports for convenience
pub use config::ServerConfig;
pub use error::{HttpdError, Result, TrySubmitError};
pub use interest::Interest;
pub use sync::{Cond, Locker, LockerGuard, Sem};
pub use task::{Task, WorkerPool};

/// Compile-time defaults. `ServerConfig::from_env` starts from these.
pub mod constants {
    /// Document root that request targets are resolved against
    pub const DOC_ROOT: &str = "/var/www/html";

    /// Maximum length of a resolved file path (including the doc root)
    pub const FILENAME_LEN: usize = 200;

    /// Per-connection receive buffer
    pub const READ_BUFFER_SIZE: usize = 2048;

    /// Per-connection response header buffer
    pub const WRITE_BUFFER_SIZE: usize = 1024;

    /// Descriptor table size, also the live-connection ceiling
    pub const MAX_FD: usize = 65536;

    /// Events harvested per epoll_wait call
    pub const MAX_EVENT_NUMBER: usize = 10000;

    /// Worker threads in the pool
    pub const WORKER_THREADS: usize = 8;

    /// Maximum pending tasks in the pool queue
    pub const MAX_REQUESTS: usize = 10000;

    /// listen(2) backlog
    pub const LISTEN_BACKLOG: i32 = 5;

    /// Sent to a client accepted while the connection table is full
    pub const BUSY_MESSAGE: &[u8] = b"Internal server busy";
}
