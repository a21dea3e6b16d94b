//! `server` under a tight descriptor limit.
//!
//! Runs as its own process so the limit only applies to the child.

use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const NOFILE: libc::rlim_t = 32;
const CLIENTS: usize = 48;
const BUSY: &[u8] = b"Internal server busy";

fn doc_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("mmhttpd-fdlimit-{}", std::process::id()));
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("index.html"), b"ok\n").unwrap();
    fs::set_permissions(root.join("index.html"), fs::Permissions::from_mode(0o644)).unwrap();
    root
}

fn spawn_server(root: &Path) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_server"));
    cmd.args(["127.0.0.1", "0"])
        .env("MMHTTPD_DOC_ROOT", root)
        .env("MMHTTPD_WORKERS", "2")
        .env("MMHTTPD_BACKLOG", "128")
        .env("MMHTTPD_LOG_LEVEL", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            let rl = libc::rlimit {
                rlim_cur: NOFILE,
                rlim_max: NOFILE,
            };
            if libc::setrlimit(libc::RLIMIT_NOFILE, &rl) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    cmd.spawn().unwrap()
}

fn wait_exit(child: &mut Child, limit: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("server did not stop after SIGTERM");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_descriptor_limit_turns_clients_away_without_spinning() {
    let root = doc_root();
    let mut child = spawn_server(&root);

    let (tx, rx) = mpsc::channel();
    let stderr = child.stderr.take().unwrap();
    let reader = thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let addr: SocketAddr = loop {
        let line = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        if let Some(rest) = line.split("listening on ").nth(1) {
            break rest.split_whitespace().next().unwrap().parse().unwrap();
        }
    };

    let mut clients: Vec<TcpStream> = (0..CLIENTS).map(|_| TcpStream::connect(addr).unwrap()).collect();
    thread::sleep(Duration::from_millis(500));

    // every client is either held open or turned away with the busy text
    let mut held = Vec::new();
    let mut rejected = 0;
    for (i, client) in clients.iter_mut().enumerate() {
        client.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 64];
        match client.read(&mut buf) {
            Ok(n) => {
                assert_eq!(&buf[..n], BUSY);
                rejected += 1;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => held.push(i),
            Err(e) => panic!("client {}: {}", i, e),
        }
    }
    assert!(rejected > 0, "nobody was turned away");
    assert!(!held.is_empty(), "nobody was admitted");
    assert_eq!(rejected + held.len(), CLIENTS);

    // the reactor is still serving
    let client = &mut clients[held[0]];
    client.set_nonblocking(false).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(b"ok\n"));

    drop(clients);
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert!(status.success(), "server exited with {}", status);
    reader.join().unwrap();

    let lines: Vec<String> = rx.try_iter().collect();
    assert!(lines.iter().all(|l| !l.contains("accept failed")));
    // one warning per turned-away client plus startup and shutdown
    assert!(lines.len() < CLIENTS * 4, "{} log lines", lines.len());
}
