//! `EventFdNotifier`: wakes the reactor out of `epoll_wait`.
//!
//! Workers call `notify()` after handing a finished connection back to
//! the reactor. Multiple notifies before the reactor drains coalesce into
//! one readiness event (eventfd counter semantics). The fd is registered
//! level-triggered, so an undrained counter keeps reporting readable.

use mmhttpd_core::error::{last_errno, HttpdError, Result};

use std::os::unix::io::RawFd;

pub struct EventFdNotifier {
    fd: RawFd,
}

impl EventFdNotifier {
    /// Create a nonblocking, close-on-exec eventfd. Closed on drop.
    pub fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(HttpdError::last_os());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bump the counter. Safe from any thread.
    pub fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            // counter saturated: a wakeup is already pending
            if errno == libc::EAGAIN {
                return Ok(());
            }
            return Err(HttpdError::Os(errno));
        }
        Ok(())
    }

    /// Reset the counter. Returns the number of coalesced notifies,
    /// 0 when nothing was pending.
    pub fn drain(&self) -> Result<u64> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = last_errno();
            if errno == libc::EAGAIN {
                return Ok(0);
            }
            return Err(HttpdError::Os(errno));
        }
        Ok(val)
    }
}

impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifies_coalesce() {
        let n = EventFdNotifier::create().unwrap();
        assert!(n.fd() >= 0);
        assert_eq!(n.drain().unwrap(), 0);

        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert_eq!(n.drain().unwrap(), 3);
        assert_eq!(n.drain().unwrap(), 0);
    }

    #[test]
    fn test_notify_from_other_thread() {
        let n = std::sync::Arc::new(EventFdNotifier::create().unwrap());
        let n2 = std::sync::Arc::clone(&n);
        std::thread::spawn(move || n2.notify().unwrap())
            .join()
            .unwrap();
        assert_eq!(n.drain().unwrap(), 1);
    }
}
