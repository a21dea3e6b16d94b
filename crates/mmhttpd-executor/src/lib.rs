//! # mmhttpd-executor: The Reactor
//!
//! One thread owns the listening socket and the epoll instance and runs:
//!
//! ```text
//! loop {
//!     1. Resubmit reads the worker pool turned away (queue full)
//!     2. epoll_wait (forever, or retry_interval while step 1 has leftovers)
//!     3. For each event:
//!          listener  → accept all pending, register one-shot EPOLLIN
//!          eventfd   → drain; workers have handed connections back
//!          hang-up   → tear the connection down
//!          readable  → take the turn, submit a ConnTask to the pool
//!          writable  → take the turn, finish the response right here
//!     4. Close every connection workers handed back
//! }
//! ```
//!
//! A connection is touched only by the holder of its `Turn`. Workers
//! never close sockets: a worker that decides to close pushes its turn
//! onto `close_queue` and pokes the eventfd.

pub mod table;

pub use table::{ConnTable, Turn};

use mmhttpd_core::config::ServerConfig;
use mmhttpd_core::constants::BUSY_MESSAGE;
use mmhttpd_core::error::{HttpdError, Result, TrySubmitError};
use mmhttpd_core::interest::Interest;
use mmhttpd_core::task::{Task, WorkerPool};
use mmhttpd_core::{kdebug, kerror, kinfo, kwarn};
use mmhttpd_http::Disposition;
use mmhttpd_module::epoll::{Epoll, Events};
use mmhttpd_module::eventfd_notifier::EventFdNotifier;
use mmhttpd_module::fixed_pool::FixedPool;
use mmhttpd_module::socket::{self, Listener, SpareFd};

use crossbeam_queue::ArrayQueue;

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long the listener stays unpolled when no descriptor can be freed
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server-wide counters.
#[derive(Default)]
pub struct Stats {
    accepted: AtomicU64,
    served: AtomicU64,
    closed: AtomicU64,
    rejected_busy: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted into the table
    pub accepted: u64,
    /// Responses written completely
    pub served: u64,
    /// Connections torn down
    pub closed: u64,
    /// Connections refused with the busy message
    pub rejected_busy: u64,
    /// Read dispatches that went through only after a queue-full retry
    pub retried: u64,
}

impl Stats {
    fn bump(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} served={} closed={} rejected_busy={} retried={}",
            self.accepted, self.served, self.closed, self.rejected_busy, self.retried
        )
    }
}

/// Everything the reactor and the workers share.
pub struct ServerContext {
    config: ServerConfig,
    epoll: Epoll,
    table: ConnTable,
    notifier: EventFdNotifier,
    /// Turns of connections a worker wants closed
    close_queue: ArrayQueue<Turn>,
    stats: Stats,
}

impl ServerContext {
    /// Act on a step's outcome. Returns the turn back when the
    /// connection has to be closed.
    fn settle(&self, turn: Turn, disposition: Disposition) -> Option<Turn> {
        match disposition {
            Disposition::Rearm(interest) => {
                let fd = turn.fd();
                self.table.release(turn);
                match self.epoll.rearm(fd, interest) {
                    Ok(()) => None,
                    Err(e) => {
                        kwarn!("fd {}: rearm for {} failed: {}", fd, interest.as_str(), e);
                        // disarmed, so nobody else can hold it
                        self.table.acquire(fd)
                    }
                }
            }
            Disposition::Close => Some(turn),
        }
    }

    /// Pass a connection to the reactor for closing.
    fn hand_to_reactor(&self, mut turn: Turn) {
        // one entry per slot at most, so this only spins if the reactor lags
        while let Err(back) = self.close_queue.push(turn) {
            turn = back;
            std::thread::yield_now();
        }
        if let Err(e) = self.notifier.notify() {
            kerror!("reactor wakeup failed: {}", e);
        }
    }

    /// Run one turn-holding step and account for completed responses.
    fn step(&self, turn: &mut Turn, f: impl FnOnce(&mut mmhttpd_http::HttpConn) -> Disposition) -> Disposition {
        let conn = self.table.conn(turn);
        let before = conn.responses();
        let disposition = f(conn);
        Stats::bump(&self.stats.served, conn.responses() - before);
        disposition
    }
}

/// Read-parse-respond cycle for one connection, run on a pool worker.
pub struct ConnTask {
    turn: Turn,
    ctx: Arc<ServerContext>,
}

impl Task for ConnTask {
    fn process(self) {
        let ConnTask { mut turn, ctx } = self;
        let config = &ctx.config;
        let disposition = ctx.step(&mut turn, |conn| conn.process(&config.doc_root, config.filename_len));
        if let Some(turn) = ctx.settle(turn, disposition) {
            ctx.hand_to_reactor(turn);
        }
    }
}

/// Wakes a blocked reactor from any thread.
#[derive(Clone)]
pub struct Waker {
    ctx: Arc<ServerContext>,
}

impl Waker {
    pub fn wake(&self) -> Result<()> {
        self.ctx.notifier.notify()
    }

    /// The eventfd behind this waker, valid while the waker lives.
    /// A signal handler may write to it directly.
    pub fn fd(&self) -> RawFd {
        self.ctx.notifier.fd()
    }
}

pub struct Server {
    ctx: Arc<ServerContext>,
    listener: Listener,
    pool: FixedPool<ConnTask>,
    /// Read dispatches rejected by a full queue, oldest first
    backlog: VecDeque<ConnTask>,
    /// Reserve descriptor for turning clients away at EMFILE
    spare: Option<SpareFd>,
    /// Set while the listener is out of the epoll set
    accept_resume: Option<Instant>,
}

impl Server {
    /// Validate `config`, bind the listener, and start the worker pool.
    ///
    /// The connection table never outgrows the descriptor limit: it keeps
    /// one descriptor per worker (for the file being mapped) and the
    /// spare free, so the busy ceiling is hit before `EMFILE`.
    pub fn bind(addr: SocketAddrV4, mut config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let usable = socket::fd_limit()?
            .saturating_sub(config.workers + 1)
            .max(1);
        if config.max_fd > usable {
            kwarn!("max_fd {} exceeds the descriptor limit, using {}", config.max_fd, usable);
            config.max_fd = usable;
        }

        let listener = Listener::bind(addr, config.listen_backlog)?;
        let epoll = Epoll::new()?;
        let notifier = EventFdNotifier::create()?;
        epoll.add_listener(listener.fd())?;
        epoll.add_notifier(notifier.fd())?;
        let pool = FixedPool::from_config(&config)?;
        let spare = Some(SpareFd::open()?);

        kinfo!(
            "listening on {} doc_root={} workers={} max_requests={} max_fd={}",
            listener.local_addr(),
            config.doc_root.display(),
            config.workers,
            config.max_requests,
            config.max_fd
        );

        let ctx = Arc::new(ServerContext {
            table: ConnTable::new(config.max_fd, config.read_buffer_size, config.write_buffer_size),
            close_queue: ArrayQueue::new(config.max_fd),
            epoll,
            notifier,
            stats: Stats::default(),
            config,
        });

        Ok(Server {
            ctx,
            listener,
            pool,
            backlog: VecDeque::new(),
            spare,
            accept_resume: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.listener.local_addr()
    }

    pub fn waker(&self) -> Waker {
        Waker {
            ctx: Arc::clone(&self.ctx),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Connection ceiling after clamping to the descriptor limit
    pub fn max_connections(&self) -> usize {
        self.ctx.table.capacity()
    }

    /// Run the reactor until `stop` is set, then shut down: the pool
    /// drains and joins, and every open connection is closed.
    ///
    /// Whoever sets `stop` must also `Waker::wake` (or interrupt the
    /// reactor with a signal) for it to be noticed promptly.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let mut events = Events::with_capacity(self.ctx.config.max_events);
        let listen_fd = self.listener.fd();
        let wake_fd = self.ctx.notifier.fd();
        let mut result = Ok(());

        while !stop.load(Ordering::Acquire) {
            // ── Step 1: Resubmit deferred reads, resume accepting ──
            self.retry_backlog();
            self.resume_accept();

            // ── Step 2: Wait ──
            let mut timeout = if self.backlog.is_empty() {
                None
            } else {
                Some(self.ctx.config.retry_interval)
            };
            if let Some(at) = self.accept_resume {
                let left = at.saturating_duration_since(Instant::now());
                timeout = Some(timeout.map_or(left, |t| t.min(left)));
            }
            if let Err(e) = self.ctx.epoll.wait(&mut events, timeout) {
                kerror!("epoll failure: {}", e);
                result = Err(e);
                break;
            }

            // ── Step 3: Dispatch ──
            for ev in events.iter() {
                let fd = ev.fd();
                if fd == listen_fd {
                    self.accept_all();
                } else if fd == wake_fd {
                    if let Err(e) = self.ctx.notifier.drain() {
                        kwarn!("wakeup drain failed: {}", e);
                    }
                } else if ev.is_hangup() {
                    self.on_hangup(fd);
                } else if ev.is_readable() {
                    self.dispatch_read(fd);
                } else if ev.is_writable() {
                    self.on_writable(fd);
                }
            }

            // ── Step 4: Close what workers handed back ──
            self.reap_closed();
        }

        self.shutdown();
        result
    }

    fn accept_all(&mut self) {
        loop {
            let (fd, peer) = match self.listener.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(e) if socket::is_fd_exhaustion(&e) => {
                    self.on_fd_exhaustion(&e);
                    return;
                }
                Err(e) => {
                    kerror!("accept failed: {}", e);
                    return;
                }
            };

            let table = &self.ctx.table;
            if table.live() >= self.ctx.config.max_fd {
                self.reject_busy(fd);
                continue;
            }
            let Some(mut turn) = table.acquire(fd) else {
                self.reject_busy(fd);
                continue;
            };
            table.open(&mut turn, peer);
            Stats::bump(&self.ctx.stats.accepted, 1);
            kdebug!("accepted fd {} from {}", fd, peer);

            table.release(turn);
            if let Err(e) = self.ctx.epoll.add_oneshot(fd, Interest::Read) {
                kerror!("fd {}: register failed: {}", fd, e);
                if let Some(turn) = table.acquire(fd) {
                    self.close_conn(turn);
                }
            }
        }
    }

    /// accept4 hit EMFILE/ENFILE. Shed the queue through the spare; if
    /// that frees nothing, take the listener out of epoll for a while so
    /// the level-triggered event does not spin the loop.
    fn on_fd_exhaustion(&mut self, err: &HttpdError) {
        if self.spare.is_some() {
            let shed = self.listener.shed(&mut self.spare, BUSY_MESSAGE);
            if shed > 0 {
                Stats::bump(&self.ctx.stats.rejected_busy, shed as u64);
                kwarn!("{}: turned away {} pending connections", err, shed);
                return;
            }
        }
        if let Err(e) = self.ctx.epoll.delete(self.listener.fd()) {
            kerror!("listener deregister failed: {}", e);
            return;
        }
        kwarn!("{}: not accepting for {:?}", err, ACCEPT_BACKOFF);
        self.accept_resume = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    fn resume_accept(&mut self) {
        match self.accept_resume {
            Some(at) if Instant::now() >= at => {}
            _ => return,
        }
        if self.spare.is_none() {
            self.spare = SpareFd::open().ok();
        }
        match self.ctx.epoll.add_listener(self.listener.fd()) {
            Ok(()) => {
                self.accept_resume = None;
                kinfo!("accepting again");
            }
            Err(e) => {
                kerror!("listener re-register failed: {}", e);
                self.accept_resume = Some(Instant::now() + ACCEPT_BACKOFF);
            }
        }
    }

    fn reject_busy(&self, fd: RawFd) {
        kwarn!("fd {}: internal server busy ({} live)", fd, self.ctx.table.live());
        socket::send_best_effort(fd, BUSY_MESSAGE);
        socket::close_fd(fd);
        Stats::bump(&self.ctx.stats.rejected_busy, 1);
    }

    fn dispatch_read(&mut self, fd: RawFd) {
        let Some(turn) = self.ctx.table.acquire(fd) else {
            kerror!("fd {}: readable while its turn is held", fd);
            return;
        };
        let task = ConnTask {
            turn,
            ctx: Arc::clone(&self.ctx),
        };
        if !self.backlog.is_empty() {
            self.backlog.push_back(task);
            return;
        }
        match self.pool.submit(task) {
            Ok(()) => {}
            Err(TrySubmitError::Full(task)) => {
                kwarn!("task queue full, deferring fd {}", fd);
                self.backlog.push_back(task);
            }
            Err(TrySubmitError::Stopped(task)) => self.close_conn(task.turn),
        }
    }

    fn retry_backlog(&mut self) {
        while let Some(task) = self.backlog.pop_front() {
            match self.pool.submit(task) {
                Ok(()) => Stats::bump(&self.ctx.stats.retried, 1),
                Err(TrySubmitError::Full(task)) => {
                    self.backlog.push_front(task);
                    break;
                }
                Err(TrySubmitError::Stopped(task)) => self.close_conn(task.turn),
            }
        }
    }

    fn on_writable(&mut self, fd: RawFd) {
        let Some(mut turn) = self.ctx.table.acquire(fd) else {
            kerror!("fd {}: writable while its turn is held", fd);
            return;
        };
        let disposition = self.ctx.step(&mut turn, |conn| conn.flush());
        if let Some(turn) = self.ctx.settle(turn, disposition) {
            self.close_conn(turn);
        }
    }

    fn on_hangup(&mut self, fd: RawFd) {
        match self.ctx.table.acquire(fd) {
            Some(turn) => self.close_conn(turn),
            None => kerror!("fd {}: hang-up while its turn is held", fd),
        }
    }

    fn reap_closed(&mut self) {
        while let Some(turn) = self.ctx.close_queue.pop() {
            self.close_conn(turn);
        }
    }

    /// Tear down the connection behind `turn` and free its slot.
    fn close_conn(&self, mut turn: Turn) {
        if let Some(fd) = self.ctx.table.vacate(&mut turn) {
            // EPOLL_CTL_DEL fails for a socket that never got registered
            let _ = self.ctx.epoll.delete(fd);
            socket::close_fd(fd);
            Stats::bump(&self.ctx.stats.closed, 1);
            kdebug!("closed fd {}", fd);
        }
        self.ctx.table.release(turn);
    }

    fn shutdown(&mut self) {
        kinfo!(
            "shutting down: {} live, {} queued, {} deferred",
            self.ctx.table.live(),
            self.pool.queued(),
            self.backlog.len()
        );

        // deferred reads never reached a worker
        while let Some(task) = self.backlog.pop_front() {
            self.close_conn(task.turn);
        }
        if let Err(e) = self.pool.shutdown() {
            kerror!("worker pool shutdown failed: {}", e);
        }
        self.reap_closed();

        for fd in 0..self.ctx.table.capacity() {
            if let Some(turn) = self.ctx.table.acquire(fd as RawFd) {
                self.close_conn(turn);
            }
        }
        let _ = self.ctx.notifier.drain();

        kinfo!("stopped: {}", self.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, Shutdown, TcpStream};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    struct Running {
        addr: SocketAddrV4,
        stop: Arc<AtomicBool>,
        waker: Waker,
        handle: thread::JoinHandle<(Result<()>, StatsSnapshot)>,
    }

    impl Running {
        fn stop(self) -> StatsSnapshot {
            self.stop.store(true, Ordering::Release);
            self.waker.wake().unwrap();
            let (result, stats) = self.handle.join().unwrap();
            result.unwrap();
            stats
        }
    }

    fn doc_root() -> PathBuf {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        let root = std::env::temp_dir().join(format!(
            "mmhttpd-e2e-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("index.html"), b"<h1>mmhttpd</h1>\n").unwrap();
        fs::set_permissions(root.join("index.html"), fs::Permissions::from_mode(0o644)).unwrap();
        root
    }

    fn start(config: ServerConfig) -> Running {
        socket::ignore_sigpipe().unwrap();
        let mut server = Server::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), config).unwrap();
        let addr = server.local_addr();
        let waker = server.waker();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("mmhttpd-reactor".into())
            .spawn(move || {
                let result = server.run(&flag);
                (result, server.stats())
            })
            .unwrap();
        Running {
            addr,
            stop,
            waker,
            handle,
        }
    }

    fn config(root: &Path) -> ServerConfig {
        ServerConfig::new().doc_root(root).workers(4).max_fd(4096).max_events(64)
    }

    fn connect(addr: SocketAddrV4) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    /// Read one response; returns the head (status line + headers) and body.
    fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).unwrap();
            assert_eq!(n, 1, "connection closed inside the header block");
            raw.push(byte[0]);
        }
        let head = String::from_utf8(raw).unwrap();
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).unwrap();
        (head, body)
    }

    fn get(addr: SocketAddrV4, path: &str) -> (String, Vec<u8>) {
        let mut stream = connect(addr);
        write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).unwrap();
        let response = read_response(&mut stream);
        // no keep-alive: the server closes after the response
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
        response
    }

    #[test]
    fn test_serves_file_then_closes() {
        let root = doc_root();
        let server = start(config(&root));
        let (head, body) = get(server.addr, "/index.html");
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 17\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert_eq!(body, b"<h1>mmhttpd</h1>\n");

        let stats = server.stop();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.served, 1);
        assert_eq!(stats.closed, 1);
    }

    #[test]
    fn test_error_statuses() {
        let root = doc_root();
        let server = start(config(&root));
        assert!(get(server.addr, "/missing").0.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let mut stream = connect(server.addr);
        stream.write_all(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        let (head, body) = read_response(&mut stream);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(
            body,
            b"Your request has bad syntax or is inherently impossible to satisfy.\n"
        );
        server.stop();
    }

    #[test]
    fn test_keep_alive_serves_sequential_requests() {
        let root = doc_root();
        let server = start(config(&root));
        let mut stream = connect(server.addr);

        for _ in 0..3 {
            stream
                .write_all(b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
                .unwrap();
            let (head, body) = read_response(&mut stream);
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert_eq!(body, b"<h1>mmhttpd</h1>\n");
        }

        // request split across two writes
        stream.write_all(b"GET /index.html HT").unwrap();
        thread::sleep(Duration::from_millis(20));
        stream.write_all(b"TP/1.1\r\n\r\n").unwrap();
        let (head, _) = read_response(&mut stream);
        assert!(head.contains("Connection: close\r\n"));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        let stats = server.stop();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.served, 4);
    }

    fn write_large(root: &Path, len: usize) -> Vec<u8> {
        let body: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        fs::write(root.join("large.bin"), &body).unwrap();
        fs::set_permissions(root.join("large.bin"), fs::Permissions::from_mode(0o644)).unwrap();
        body
    }

    #[test]
    fn test_large_file_completes_on_reactor() {
        let root = doc_root();
        let body = write_large(&root, 8 * 1024 * 1024);

        let server = start(config(&root));
        let mut stream = connect(server.addr);
        stream.write_all(b"GET /large.bin HTTP/1.1\r\n\r\n").unwrap();
        // let the send buffer fill so the reactor has to finish the write
        thread::sleep(Duration::from_millis(50));
        let (head, got) = read_response(&mut stream);
        assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(got == body);
        server.stop();
    }

    #[test]
    fn test_keep_alive_large_files_in_parallel() {
        let root = doc_root();
        let body = Arc::new(write_large(&root, 4 * 1024 * 1024));
        let server = start(config(&root).workers(2));
        let addr = server.addr;

        // each response ends on the reactor (writable) and the next
        // request on the same socket is read by a worker
        let clients: Vec<_> = (0..4)
            .map(|_| {
                let body = Arc::clone(&body);
                thread::spawn(move || {
                    let mut stream = connect(addr);
                    for _ in 0..4 {
                        stream
                            .write_all(b"GET /large.bin HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
                            .unwrap();
                        let (head, got) = read_response(&mut stream);
                        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
                        assert!(head.contains("Connection: keep-alive\r\n"));
                        assert!(got == *body, "body corrupted");
                    }
                })
            })
            .collect();
        for c in clients {
            c.join().unwrap();
        }

        let stats = server.stop();
        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.served, 16);
        assert_eq!(stats.closed, 4);
    }

    #[test]
    fn test_bind_clamps_to_descriptor_limit() {
        let root = doc_root();
        let limit = socket::fd_limit().unwrap();
        let server = Server::bind(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            config(&root).workers(4).max_fd(1 << 16),
        )
        .unwrap();
        // one descriptor per worker plus the spare stay free
        let expected = (1 << 16).min(limit - 5);
        assert_eq!(server.max_connections(), expected);
    }

    #[test]
    fn test_busy_rejection() {
        let root = doc_root();
        // a one-slot table cannot hold any real descriptor
        let server = start(config(&root).max_fd(1));
        let mut stream = connect(server.addr);
        let mut got = Vec::new();
        stream.read_to_end(&mut got).unwrap();
        assert_eq!(got, BUSY_MESSAGE);

        let stats = server.stop();
        assert_eq!(stats.rejected_busy, 1);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn test_peer_hangup_frees_slot() {
        let root = doc_root();
        let server = start(config(&root));
        let stream = connect(server.addr);
        stream.shutdown(Shutdown::Both).unwrap();
        drop(stream);

        // the slot comes back, and the server keeps serving
        let (head, _) = get(server.addr, "/index.html");
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        let stats = server.stop();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.closed, 2);
    }

    #[test]
    fn test_concurrent_clients_with_tiny_queue() {
        let root = doc_root();
        let server = start(config(&root).workers(2).max_requests(1));
        let addr = server.addr;

        let clients: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(move || {
                    for _ in 0..10 {
                        let (head, body) = get(addr, "/index.html");
                        assert!(head.starts_with("HTTP/1.1 200 OK"));
                        assert_eq!(body, b"<h1>mmhttpd</h1>\n");
                    }
                })
            })
            .collect();
        for c in clients {
            c.join().unwrap();
        }

        let stats = server.stop();
        assert_eq!(stats.served, 80);
        assert_eq!(stats.accepted, 80);
    }

    #[test]
    fn test_shutdown_closes_idle_connections() {
        let root = doc_root();
        let server = start(config(&root));
        let mut idle = connect(server.addr);
        idle.write_all(b"GET /index.html HTTP/1.1\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));

        let stats = server.stop();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.closed, 1);

        let mut rest = Vec::new();
        let _ = idle.read_to_end(&mut rest);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let root = doc_root();
        let result = Server::bind(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            config(&root).workers(0),
        );
        assert!(result.is_err());
    }
}
