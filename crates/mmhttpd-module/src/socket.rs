//! Listening socket and raw-fd helpers.
//!
//! Client connections are carried around as raw descriptors because their
//! lifetime is managed by the connection table, not by Rust ownership:
//! only the reactor closes them, through `close_fd`.

use mmhttpd_core::error::{last_errno, HttpdError, Result};
use mmhttpd_core::{kdebug, kwarn};

use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;

/// Nonblocking IPv4 TCP listener.
pub struct Listener {
    fd: RawFd,
    local: SocketAddrV4,
}

impl Listener {
    /// socket + SO_REUSEADDR + bind + listen, nonblocking and close-on-exec.
    pub fn bind(addr: SocketAddrV4, backlog: i32) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if fd < 0 {
            return Err(HttpdError::Socket(last_errno()));
        }
        // From here on the fd is closed by Drop on any early return.
        let mut listener = Listener { fd, local: addr };

        let one: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(HttpdError::Socket(last_errno()));
        }

        let sin = to_sockaddr(addr);
        let rc = unsafe {
            libc::bind(
                fd,
                &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(HttpdError::Socket(last_errno()));
        }

        if unsafe { libc::listen(fd, backlog) } < 0 {
            return Err(HttpdError::Socket(last_errno()));
        }

        listener.local = sock_name(fd)?;
        Ok(listener)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bound address; reports the kernel-chosen port after binding port 0.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Accept one pending connection as a nonblocking, close-on-exec fd.
    ///
    /// `Ok(None)` when nothing is pending.
    pub fn accept(&self) -> Result<Option<(RawFd, SocketAddrV4)>> {
        let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        loop {
            let fd = unsafe {
                libc::accept4(
                    self.fd,
                    &mut sin as *mut libc::sockaddr_in as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                return Ok(Some((fd, from_sockaddr(&sin))));
            }
            match last_errno() {
                libc::EAGAIN | libc::ECONNABORTED => return Ok(None),
                libc::EINTR => continue,
                errno => return Err(HttpdError::Socket(errno)),
            }
        }
    }
}

impl Listener {
    /// Turn away every pending connection while the process is out of
    /// descriptors. The spare is closed so `accept4` has a slot to use,
    /// each accepted socket gets `msg` and is closed, then the spare is
    /// reopened. Returns how many connections were turned away.
    pub fn shed(&self, spare: &mut Option<SpareFd>, msg: &[u8]) -> usize {
        drop(spare.take());
        let mut shed = 0;
        loop {
            match self.accept() {
                Ok(Some((fd, _))) => {
                    send_best_effort(fd, msg);
                    close_fd(fd);
                    shed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    kwarn!("accept while shedding failed: {}", e);
                    break;
                }
            }
        }
        match SpareFd::open() {
            Ok(fd) => {
                kdebug!("spare descriptor restored as fd {}", fd.fd());
                *spare = Some(fd);
            }
            Err(e) => kwarn!("spare descriptor not restored: {}", e),
        }
        shed
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

/// A descriptor held in reserve for `Listener::shed`.
#[derive(Debug)]
pub struct SpareFd {
    fd: RawFd,
}

impl SpareFd {
    pub fn open() -> Result<Self> {
        let path = b"/dev/null\0";
        let fd = unsafe {
            libc::open(
                path.as_ptr() as *const libc::c_char,
                libc::O_RDONLY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(HttpdError::last_os());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SpareFd {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

/// Soft `RLIMIT_NOFILE`: every descriptor number stays below it.
pub fn fd_limit() -> Result<usize> {
    let mut rl: libc::rlimit = unsafe { mem::zeroed() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } < 0 {
        return Err(HttpdError::last_os());
    }
    Ok(usize::try_from(rl.rlim_cur).unwrap_or(usize::MAX))
}

/// Whether an accept failure means the process or system is out of
/// descriptors.
pub fn is_fd_exhaustion(err: &HttpdError) -> bool {
    matches!(err.errno(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// Write as much of `msg` as the socket takes right now, ignoring errors.
/// Used for the busy rejection right before closing.
pub fn send_best_effort(fd: RawFd, msg: &[u8]) {
    let mut sent = 0;
    while sent < msg.len() {
        let n = unsafe {
            libc::send(
                fd,
                msg[sent..].as_ptr() as *const libc::c_void,
                msg.len() - sent,
                libc::MSG_NOSIGNAL,
            )
        };
        if n <= 0 {
            if n < 0 && last_errno() == libc::EINTR {
                continue;
            }
            break;
        }
        sent += n as usize;
    }
}

pub fn close_fd(fd: RawFd) {
    if fd >= 0 && unsafe { libc::close(fd) } < 0 {
        kwarn!("close({}) failed: errno {}", fd, last_errno());
    }
}

/// Make writes to a reset peer fail with EPIPE instead of killing the process.
pub fn ignore_sigpipe() -> Result<()> {
    if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(HttpdError::last_os());
    }
    Ok(())
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    sin
}

fn from_sockaddr(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
        u16::from_be(sin.sin_port),
    )
}

fn sock_name(fd: RawFd) -> Result<SocketAddrV4> {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(
            fd,
            &mut sin as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(HttpdError::Socket(last_errno()));
    }
    Ok(from_sockaddr(&sin))
}
