//! mmhttpd static file server
//!
//! Serves files under the document root over HTTP/1.1 GET. One reactor
//! thread multiplexes every socket with epoll; a fixed worker pool reads,
//! parses and answers requests, sending file bodies straight from mmap.
//!
//! Usage:
//!     ./target/release/server <ip_address> <port>
//!
//! The command line carries only the address. Everything else is a
//! built-in default that an optional `MMHTTPD_*` environment variable
//! may override (see `ServerConfig::from_env`); with none set, the
//! defaults apply unchanged:
//!     MMHTTPD_DOC_ROOT=./www MMHTTPD_WORKERS=4 ./target/release/server 127.0.0.1 8080
//!
//! `max_fd` is further capped by the process descriptor limit
//! (`ulimit -n`).
//!
//! Benchmark:
//!     wrk -t4 -c100 -d10s http://127.0.0.1:8080/index.html

use mmhttpd_core::config::ServerConfig;
use mmhttpd_core::error::{HttpdError, Result};
use mmhttpd_core::{kerror, kinfo, kprint};
use mmhttpd_executor::Server;
use mmhttpd_module::socket;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static TERMINATE: AtomicBool = AtomicBool::new(false);
/// Reactor eventfd, poked from the signal handler
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

fn parse_args(args: &[String]) -> Result<SocketAddrV4> {
    let prog = args
        .first()
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "server".into());
    let usage = || HttpdError::Usage(format!("usage: {} ip_address port_number", prog));

    if args.len() != 3 {
        return Err(usage());
    }
    let ip: Ipv4Addr = args[1].parse().map_err(|_| usage())?;
    let port: u16 = args[2].parse().map_err(|_| usage())?;
    Ok(SocketAddrV4::new(ip, port))
}

fn run(addr: SocketAddrV4) -> Result<()> {
    socket::ignore_sigpipe()?;

    let mut server = Server::bind(addr, ServerConfig::from_env())?;
    let waker = server.waker();
    WAKE_FD.store(waker.fd(), Ordering::Release);

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as usize);
        libc::signal(libc::SIGTERM, handle_signal as usize);
    }

    let reactor = std::thread::Builder::new()
        .name("mmhttpd-reactor".into())
        .spawn(move || server.run(&TERMINATE))
        .map_err(|_| HttpdError::Spawn)?;

    let result = match reactor.join() {
        Ok(result) => result,
        Err(_) => {
            kerror!("reactor thread panicked");
            Err(HttpdError::Spawn)
        }
    };

    WAKE_FD.store(-1, Ordering::Release);
    drop(waker);
    result
}

fn main() {
    kprint::init();

    let args: Vec<String> = std::env::args().collect();
    let addr = match parse_args(&args) {
        Ok(addr) => addr,
        Err(e) => {
            println!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(addr) {
        kerror!("mmhttpd: {}", e);
        process::exit(1);
    }
    kinfo!("mmhttpd: shutdown complete");
}

extern "C" fn handle_signal(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::Release);
    // the signal may land on any thread; wake the reactor explicitly
    let fd = WAKE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let one: u64 = 1;
        unsafe {
            libc::write(fd, &one as *const u64 as *const libc::c_void, 8);
        }
    }
}
