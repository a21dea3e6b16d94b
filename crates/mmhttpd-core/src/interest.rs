//! Readiness interest for one-shot re-arming.

/// What a connection waits for after its current turn ends.
///
/// Client registrations are always edge-triggered, one-shot, and watch
/// for peer hang-up; only the direction varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Next request bytes (EPOLLIN)
    Read,
    /// Room in the socket send buffer (EPOLLOUT)
    Write,
}

impl Interest {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interest::Read => "read",
            Interest::Write => "write",
        }
    }
}
