//! Connection table indexed by descriptor.
//!
//! Each slot carries an ownership flag next to its `HttpConn`. Whoever
//! wins the flag holds a `Turn` for that descriptor and is the only
//! thread allowed to touch the connection until the turn is released.
//! Release happens before the connection is re-armed in epoll, so the
//! next readiness event always finds the flag free.
//!
//! Slots are allocated lazily on the first accept of a descriptor and
//! then reused for every later connection on that number.

use mmhttpd_http::HttpConn;

use std::cell::UnsafeCell;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Exclusive right to one connection slot. Not `Clone`; moving it moves
/// the right. Must end in `ConnTable::release`.
#[derive(Debug)]
#[must_use = "a dropped turn leaves its connection unreachable"]
pub struct Turn {
    fd: RawFd,
}

impl Turn {
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

struct ConnSlot {
    owned: AtomicBool,
    conn: UnsafeCell<Option<HttpConn>>,
}

pub struct ConnTable {
    slots: Box<[ConnSlot]>,
    live: AtomicUsize,
    read_buffer_size: usize,
    write_buffer_size: usize,
}

// Safety: a slot's conn is only reached through a `Turn`, and at most one
// `Turn` per slot exists at a time.
unsafe impl Sync for ConnTable {}

impl ConnTable {
    pub fn new(max_fd: usize, read_buffer_size: usize, write_buffer_size: usize) -> Self {
        let slots = (0..max_fd)
            .map(|_| ConnSlot {
                owned: AtomicBool::new(false),
                conn: UnsafeCell::new(None),
            })
            .collect();
        Self {
            slots,
            live: AtomicUsize::new(0),
            read_buffer_size,
            write_buffer_size,
        }
    }

    /// Number of slots; descriptors at or above this cannot be served.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Connections currently open
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Take the turn for `fd`. `None` if it is out of range or already held.
    pub fn acquire(&self, fd: RawFd) -> Option<Turn> {
        let slot = self.slot(fd)?;
        slot.owned
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Turn { fd })
    }

    /// Give the turn back. Everything done under it becomes visible to
    /// the next holder.
    pub fn release(&self, turn: Turn) {
        if let Some(slot) = self.slot(turn.fd) {
            slot.owned.store(false, Ordering::Release);
        }
    }

    /// The connection behind a held turn.
    pub fn conn<'a>(&'a self, turn: &'a mut Turn) -> &'a mut HttpConn {
        let slot = &self.slots[turn.fd as usize];
        // Safety: `turn` proves exclusive ownership of this slot, and the
        // returned borrow cannot outlive it.
        let conn = unsafe { &mut *slot.conn.get() };
        conn.get_or_insert_with(|| HttpConn::new(self.read_buffer_size, self.write_buffer_size))
    }

    /// Bind the slot to a newly accepted socket.
    pub fn open<'a>(&'a self, turn: &'a mut Turn, peer: SocketAddrV4) -> &'a mut HttpConn {
        let fd = turn.fd;
        self.live.fetch_add(1, Ordering::AcqRel);
        let conn = self.conn(turn);
        conn.init(fd, Some(peer));
        conn
    }

    /// Unbind the slot. Returns the descriptor if a connection was open,
    /// for the caller to close.
    pub fn vacate(&self, turn: &mut Turn) -> Option<RawFd> {
        let conn = self.conn(turn);
        if !conn.is_open() {
            return None;
        }
        let fd = conn.detach();
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(fd)
    }

    fn slot(&self, fd: RawFd) -> Option<&ConnSlot> {
        usize::try_from(fd).ok().and_then(|i| self.slots.get(i))
    }
}
