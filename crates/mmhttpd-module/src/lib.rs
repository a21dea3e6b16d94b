//! # mmhttpd-module: Default OS-backed implementations
//!
//! Everything here talks to the kernel: thread pool, readiness
//! multiplexer, wakeup eventfd, file mappings, and sockets.
//!
//! ## Default stack
//!
//! | Concern              | Impl              | Backed by                          |
//! |----------------------|-------------------|------------------------------------|
//! | WorkerPool           | FixedPool         | pthread mutex + POSIX sem + cond   |
//! | Readiness            | Epoll             | epoll(7), one-shot edge-triggered  |
//! | Reactor wakeup       | EventFdNotifier   | eventfd(2)                         |
//! | Zero-copy file body  | MappedFile        | mmap(2) via nix                    |
//! | Listening socket     | Listener          | socket/bind/listen/accept4         |

pub mod fixed_pool;
pub mod eventfd_notifier;
pub mod mapped_file;
pub mod socket;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
    } else {
        compile_error!("mmhttpd needs epoll(7) and eventfd(2); only Linux is supported");
    }
}
