// src/table.rs
//! Fixed, fd-indexed connection storage with an atomic owner flag per slot.
//!
//! A slot moves through `Free -> Reactor` (accept), then between `Parked` and
//! `Reactor | Worker` for every unit of work, and back to `Free` on teardown.
//! Access to the connection only goes through a [`SlotGuard`], which exists
//! only after a successful compare-exchange, so two threads can never hold the
//! same connection at once.

use crate::conn::Connection;
use crate::error::{EtudeError, EtudeResult};
use std::cell::UnsafeCell;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const FREE: u8 = 0;
const PARKED: u8 = 1;
const REACTOR: u8 = 2;
const WORKER: u8 = 3;

/// Which kind of thread holds a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Reactor,
    Worker,
}

impl Owner {
    fn tag(self) -> u8 {
        match self {
            Owner::Reactor => REACTOR,
            Owner::Worker => WORKER,
        }
    }
}

struct Slot {
    state: AtomicU8,
    conn: UnsafeCell<Connection>,
}

pub struct ConnectionTable {
    slots: Box<[Slot]>,
    live: AtomicUsize,
}

// SAFETY: a slot's `UnsafeCell` is only dereferenced through a `SlotGuard`,
// and a guard is only created by winning the compare-exchange on `state`.
unsafe impl Sync for ConnectionTable {}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: AtomicU8::new(FREE),
                conn: UnsafeCell::new(Connection::empty()),
            })
            .collect();
        Self {
            slots,
            live: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a connection.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn slot(&self, fd: RawFd) -> Option<&Slot> {
        usize::try_from(fd).ok().and_then(|i| self.slots.get(i))
    }

    /// Take a free slot for a newly accepted socket. The reactor owns it on return.
    pub fn open(
        &self,
        fd: RawFd,
        peer: Option<SocketAddr>,
        edge_triggered: bool,
    ) -> EtudeResult<SlotGuard<'_>> {
        let slot = self.slot(fd).ok_or(EtudeError::TableFull(fd))?;
        slot.state
            .compare_exchange(FREE, REACTOR, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| EtudeError::OwnershipViolation {
                fd,
                wanted: Owner::Reactor,
            })?;

        self.live.fetch_add(1, Ordering::Relaxed);
        let mut guard = SlotGuard {
            table: self,
            slot,
            fd,
            owner: Owner::Reactor,
        };
        guard.init(fd, peer, edge_triggered);
        Ok(guard)
    }

    /// Take a parked connection.
    pub fn claim(&self, fd: RawFd, owner: Owner) -> EtudeResult<SlotGuard<'_>> {
        let slot = self
            .slot(fd)
            .ok_or(EtudeError::OwnershipViolation { fd, wanted: owner })?;
        slot.state
            .compare_exchange(PARKED, owner.tag(), Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| EtudeError::OwnershipViolation { fd, wanted: owner })?;
        Ok(SlotGuard {
            table: self,
            slot,
            fd,
            owner,
        })
    }
}

/// Exclusive access to one connection. Dropping it parks the slot.
pub struct SlotGuard<'a> {
    table: &'a ConnectionTable,
    slot: &'a Slot,
    fd: RawFd,
    owner: Owner,
}

impl SlotGuard<'_> {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Reset the connection and hand the slot back as free. Returns the fd,
    /// which the caller still has to deregister and close.
    pub fn free(mut self) -> RawFd {
        let fd = self.fd;
        self.reset();
        self.slot.state.store(FREE, Ordering::Release);
        self.table.live.fetch_sub(1, Ordering::Relaxed);
        std::mem::forget(self);
        fd
    }
}

impl Deref for SlotGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // SAFETY: the guard holds the slot's owner flag.
        unsafe { &*self.slot.conn.get() }
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        // SAFETY: the guard holds the slot's owner flag.
        unsafe { &mut *self.slot.conn.get() }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.state.store(PARKED, Ordering::Release);
    }
}
