//! Error types for mmhttpd

use core::fmt;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, HttpdError>;

/// Errors that escape a component
///
/// Per-request problems (bad syntax, missing files) never show up here;
/// they are resolved into an HTTP status by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpdError {
    /// A synchronization primitive could not be initialized
    SyncInit {
        what: &'static str,
        errno: i32,
    },

    /// Wait/post/lock on an initialized primitive failed
    Sync(i32),

    /// epoll_create / epoll_ctl / epoll_wait failed
    Epoll(i32),

    /// socket / bind / listen / accept failed
    Socket(i32),

    /// mmap of a served file failed
    Mmap(i32),

    /// Worker thread could not be spawned
    Spawn,

    /// Configuration rejected by `ServerConfig::validate`
    InvalidConfig(&'static str),

    /// Bad command line
    Usage(String),

    /// Any other OS error with errno
    Os(i32),
}

impl HttpdError {
    /// Capture the calling thread's errno as an `Os` error
    pub fn last_os() -> Self {
        HttpdError::Os(last_errno())
    }

    /// The raw errno carried by this error, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            HttpdError::SyncInit { errno, .. } => Some(*errno),
            HttpdError::Sync(e)
            | HttpdError::Epoll(e)
            | HttpdError::Socket(e)
            | HttpdError::Mmap(e)
            | HttpdError::Os(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for HttpdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpdError::SyncInit { what, errno } => {
                write!(f, "{} init failed: errno {}", what, errno)
            }
            HttpdError::Sync(e) => write!(f, "synchronization failure: errno {}", e),
            HttpdError::Epoll(e) => write!(f, "epoll failure: errno {}", e),
            HttpdError::Socket(e) => write!(f, "socket failure: errno {}", e),
            HttpdError::Mmap(e) => write!(f, "mmap failed: errno {}", e),
            HttpdError::Spawn => write!(f, "failed to spawn worker thread"),
            HttpdError::InvalidConfig(why) => write!(f, "invalid config: {}", why),
            HttpdError::Usage(msg) => write!(f, "{}", msg),
            HttpdError::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for HttpdError {}

impl From<std::io::Error> for HttpdError {
    fn from(e: std::io::Error) -> Self {
        HttpdError::Os(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

/// Error returned when a task cannot be queued. The task is handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrySubmitError<T> {
    /// Queue is at capacity
    Full(T),
    /// Pool has been told to stop
    Stopped(T),
}

impl<T> TrySubmitError<T> {
    /// Recover the rejected task
    pub fn into_inner(self) -> T {
        match self {
            TrySubmitError::Full(t) | TrySubmitError::Stopped(t) => t,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TrySubmitError::Full(_))
    }
}

impl<T> fmt::Display for TrySubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySubmitError::Full(_) => write!(f, "task queue full"),
            TrySubmitError::Stopped(_) => write!(f, "worker pool stopped"),
        }
    }
}

/// errno of the calling thread
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}
