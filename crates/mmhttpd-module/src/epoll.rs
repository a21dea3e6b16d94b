//! `Epoll`: readiness multiplexer over epoll(7).
//!
//! Two registration flavors:
//!
//! - listener and notifier fds: level-triggered, persistent
//! - client sockets: edge-triggered, one-shot, with `EPOLLRDHUP`
//!
//! A one-shot registration reports at most one event and then stays
//! disarmed until `rearm` is called. The reactor relies on that: while a
//! connection is disarmed, exactly one thread owns it.

use mmhttpd_core::error::{last_errno, HttpdError, Result};
use mmhttpd_core::interest::Interest;

use std::os::unix::io::RawFd;
use std::time::Duration;

const CLIENT_FLAGS: u32 =
    (libc::EPOLLET | libc::EPOLLONESHOT | libc::EPOLLRDHUP) as u32;
const HANGUP_FLAGS: u32 = (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;

fn interest_bits(interest: Interest) -> u32 {
    match interest {
        Interest::Read => libc::EPOLLIN as u32,
        Interest::Write => libc::EPOLLOUT as u32,
    }
}

pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(HttpdError::Epoll(last_errno()));
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Watch a listening socket for pending connections (level-triggered).
    pub fn add_listener(&self, fd: RawFd) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32)
    }

    /// Watch a wakeup eventfd (level-triggered).
    pub fn add_notifier(&self, fd: RawFd) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32)
    }

    /// Register a client socket, armed once for `interest`.
    pub fn add_oneshot(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest_bits(interest) | CLIENT_FLAGS)
    }

    /// Arm a disarmed client socket for one more event.
    pub fn rearm(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest_bits(interest) | CLIENT_FLAGS)
    }

    /// Stop watching `fd`. Closing the fd also does this implicitly.
    pub fn delete(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(HttpdError::Epoll(last_errno()));
        }
        Ok(())
    }

    /// Block until events arrive or `timeout` passes (`None` = forever).
    ///
    /// An interrupted wait returns `Ok(0)` so the caller can check its
    /// termination flag.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
                ms.min(i32::MAX as u128) as i32
            }
        };
        events.len = 0;
        let n = unsafe {
            libc::epoll_wait(
                self.fd,
                events.buf.as_mut_ptr(),
                events.buf.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let errno = last_errno();
            if errno == libc::EINTR {
                return Ok(0);
            }
            return Err(HttpdError::Epoll(errno));
        }
        events.len = n as usize;
        Ok(events.len)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(HttpdError::Epoll(last_errno()));
        }
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Reusable event buffer for `Epoll::wait`.
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; n.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|ev| {
            // epoll_event is packed on x86_64; copy fields out by value
            let bits = ev.events;
            let token = ev.u64;
            Event { fd: token as RawFd, bits }
        })
    }
}

/// One harvested readiness event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    fd: RawFd,
    bits: u32,
}

impl Event {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_readable(&self) -> bool {
        self.bits & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.bits & libc::EPOLLOUT as u32 != 0
    }

    /// Peer closed, or the socket errored
    pub fn is_hangup(&self) -> bool {
        self.bits & HANGUP_FLAGS != 0
    }
}
