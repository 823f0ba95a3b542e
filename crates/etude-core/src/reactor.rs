// src/reactor.rs
use crate::conn::Connection;
use crate::error::{EtudeError, EtudeResult};
use crate::metrics::Metrics;
use crate::pool::{QueueFull, WorkerPool};
use crate::resource::DocumentRoot;
use crate::syscalls::{
    self, EV_EDGE, EV_HANGUP, EV_ONESHOT, EV_RDHUP, EV_READ, EV_WRITE, Epoll, epoll_event,
};
use crate::table::{ConnectionTable, Owner, SlotGuard};
use crate::transport::Next;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) const LISTENER_TOKEN: u64 = u64::MAX;
pub(crate) const WAKE_TOKEN: u64 = u64::MAX - 1;

const MAX_EVENTS: usize = 1024;

/// State shared by the reactor thread and every worker.
pub(crate) struct Shared {
    pub epoll: Epoll,
    pub table: ConnectionTable,
    pub docs: DocumentRoot,
    pub metrics: Metrics,
    pub edge_triggered: bool,
}

impl Shared {
    fn interest(&self, next: Next) -> u32 {
        let base = match next {
            Next::Write => EV_WRITE,
            Next::Read | Next::Close => EV_READ,
        };
        let mut events = base | EV_RDHUP | EV_ONESHOT;
        if self.edge_triggered {
            events |= EV_EDGE;
        }
        events
    }

    /// Apply `next` to a connection. The slot is released before interest is re-armed.
    pub fn settle(&self, guard: SlotGuard<'_>, next: Next) {
        if next == Next::Close {
            self.close(guard);
            return;
        }

        let fd = guard.fd();
        let owner = guard.owner();
        drop(guard);

        if let Err(e) = self.epoll.modify(fd, fd as u64, self.interest(next)) {
            tracing::warn!(fd, "failed to re-arm connection: {}", e);
            self.reclaim_and_close(fd, owner);
        }
    }

    /// Free the slot, deregister and close the socket.
    pub fn close(&self, guard: SlotGuard<'_>) {
        let peer = guard.peer();
        let fd = guard.free();
        if let Err(e) = self.epoll.delete(fd) {
            tracing::debug!(fd, "failed to deregister connection: {}", e);
        }
        syscalls::close_fd(fd);
        self.metrics.dec_conn();
        tracing::debug!(fd, peer = ?peer, "connection closed");
    }

    fn reclaim_and_close(&self, fd: RawFd, owner: Owner) {
        match self.table.claim(fd, owner) {
            Ok(guard) => self.close(guard),
            Err(e) => tracing::warn!("cannot close connection: {}", e),
        }
    }

    /// Worker side: parse, build the response, re-arm.
    pub fn handle_request(&self, fd: RawFd) {
        self.run_worker(fd, |conn| conn.process(&self.docs));
    }

    /// Claim `fd` for a worker and settle on what `work` decides. A panic closes the connection.
    fn run_worker<F>(&self, fd: RawFd, work: F)
    where
        F: FnOnce(&mut Connection) -> Next,
    {
        match self.table.claim(fd, Owner::Worker) {
            Ok(mut guard) => {
                let next = match panic::catch_unwind(AssertUnwindSafe(|| work(&mut guard))) {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::error!(fd, "request handler panicked; closing connection");
                        Next::Close
                    }
                };
                self.settle(guard, next);
            }
            Err(e) => tracing::warn!("dropping queued connection: {}", e),
        }
    }
}

/// Owns the listening socket and one reserved descriptor, closing both on drop.
pub(crate) struct Listener {
    pub fd: RawFd,
    /// `-1` while given back.
    reserve: RawFd,
}

impl Listener {
    pub fn bind(port: u16, backlog: i32) -> EtudeResult<Self> {
        let mut listener = Self {
            fd: syscalls::create_listen_socket(port, backlog)?,
            reserve: -1,
        };
        listener.reserve = syscalls::open_reserve_fd()?;
        Ok(listener)
    }

    pub fn local_addr(&self) -> EtudeResult<SocketAddr> {
        syscalls::local_addr(self.fd)
    }

    /// Out of descriptors: free the reserve, accept one pending connection and close it
    /// straight away, then take the reserve back. Returns whether a connection was dropped.
    fn shed(&mut self) -> bool {
        if self.reserve >= 0 {
            syscalls::close_fd(self.reserve);
            self.reserve = -1;
        }

        let shed = match syscalls::accept_connection(self.fd) {
            Ok(Some((fd, peer))) => {
                syscalls::close_fd(fd);
                tracing::warn!(peer = ?peer, "out of file descriptors; dropped connection");
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("accept failed with the reserve released: {}", e);
                false
            }
        };

        match syscalls::open_reserve_fd() {
            Ok(fd) => self.reserve = fd,
            Err(e) => tracing::warn!("cannot reserve a spare descriptor: {}", e),
        }
        shed
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        syscalls::close_fd(self.fd);
        if self.reserve >= 0 {
            syscalls::close_fd(self.reserve);
        }
    }
}

/// Self-pipe used to interrupt `epoll_wait`.
pub(crate) struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Waker {
    pub fn new() -> EtudeResult<Self> {
        let (read_fd, write_fd) = syscalls::create_pipe()?;
        Ok(Self { read_fd, write_fd })
    }

    pub fn wake(&self) -> EtudeResult<()> {
        syscalls::wake(self.write_fd)
    }

    fn drain(&self) {
        syscalls::drain_pipe(self.read_fd);
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        syscalls::close_fd(self.read_fd);
        syscalls::close_fd(self.write_fd);
    }
}

pub(crate) struct Reactor {
    shared: Arc<Shared>,
    listener: Listener,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    pool: WorkerPool<RawFd>,
}

impl Reactor {
    pub fn new(
        shared: Shared,
        listener: Listener,
        waker: Arc<Waker>,
        shutdown: Arc<AtomicBool>,
        workers: usize,
        queue_capacity: usize,
    ) -> EtudeResult<Self> {
        let shared = Arc::new(shared);

        shared.epoll.add(listener.fd, LISTENER_TOKEN, EV_READ)?;
        shared.epoll.add(waker.read_fd, WAKE_TOKEN, EV_READ)?;

        let handler_ctx = Arc::clone(&shared);
        let pool = WorkerPool::new(workers, queue_capacity, move |fd: RawFd| {
            handler_ctx.handle_request(fd);
        })?;

        Ok(Self {
            shared,
            listener,
            waker,
            shutdown,
            pool,
        })
    }

    /// Run until shutdown is requested, then drain the pool and close every connection.
    pub fn run(mut self) -> EtudeResult<()> {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        let result = self.event_loop(&mut events);
        if let Err(e) = &result {
            tracing::error!("event loop failed: {}", e);
        }

        self.teardown();
        result
    }

    fn event_loop(&mut self, events: &mut [epoll_event]) -> EtudeResult<()> {
        loop {
            let n = self.shared.epoll.wait(events, -1)?;

            for ev in &events[..n] {
                let token = ev.u64;
                let flags = ev.events;

                match token {
                    LISTENER_TOKEN => self.accept_all(),
                    WAKE_TOKEN => {
                        self.waker.drain();
                        if self.shutdown.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                    }
                    token => {
                        let fd = token as RawFd;
                        if flags & EV_READ != 0 {
                            self.on_readable(fd);
                        } else if flags & EV_WRITE != 0 {
                            self.on_writable(fd);
                        } else if flags & EV_HANGUP != 0 {
                            self.on_hangup(fd);
                        }
                    }
                }
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            match syscalls::accept_connection(self.listener.fd) {
                Ok(Some((fd, peer))) => self.register(fd, peer),
                Ok(None) => break,
                // The backlog entry must be taken off a level-triggered listener.
                Err(e) if syscalls::is_fd_exhaustion(&e) => {
                    if !self.listener.shed() {
                        break;
                    }
                    self.shared.metrics.inc_rejected();
                }
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn register(&self, fd: RawFd, peer: Option<SocketAddr>) {
        let shared = &self.shared;
        match shared.table.open(fd, peer, shared.edge_triggered) {
            Ok(guard) => {
                shared.metrics.inc_conn();
                tracing::debug!(fd, peer = ?peer, "connection accepted");
                shared.settle(guard, Next::Read);
            }
            Err(e) => {
                tracing::warn!(fd, peer = ?peer, "refusing connection: {}", e);
                shared.metrics.inc_rejected();
                syscalls::close_fd(fd);
            }
        }
    }

    fn on_readable(&self, fd: RawFd) {
        let shared = &self.shared;
        let mut guard = match shared.table.claim(fd, Owner::Reactor) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("ignoring read event: {}", e);
                return;
            }
        };

        if let Err(e) = guard.receive() {
            match e {
                EtudeError::PeerClosed => {}
                e => tracing::debug!(fd, "read failed: {}", e),
            }
            shared.close(guard);
            return;
        }
        drop(guard);

        if let Err(QueueFull(fd)) = self.pool.enqueue(fd) {
            tracing::warn!(fd, "{}; dropping connection", EtudeError::QueueFull);
            shared.metrics.inc_rejected();
            shared.reclaim_and_close(fd, Owner::Reactor);
        }
    }

    fn on_writable(&self, fd: RawFd) {
        let shared = &self.shared;
        match shared.table.claim(fd, Owner::Reactor) {
            Ok(mut guard) => {
                let next = guard.transmit(&shared.metrics);
                shared.settle(guard, next);
            }
            Err(e) => tracing::warn!("ignoring write event: {}", e),
        }
    }

    fn on_hangup(&self, fd: RawFd) {
        match self.shared.table.claim(fd, Owner::Reactor) {
            Ok(guard) => self.shared.close(guard),
            Err(e) => tracing::warn!("ignoring hang-up event: {}", e),
        }
    }

    fn teardown(&mut self) {
        if let Err(e) = self.shared.epoll.delete(self.listener.fd) {
            tracing::debug!("failed to deregister listener: {}", e);
        }

        tracing::info!(pending = self.pool.pending(), "stopping worker pool");
        self.pool.shutdown();

        let shared = &self.shared;
        let mut closed = 0usize;
        for fd in 0..shared.table.capacity() {
            if let Ok(guard) = shared.table.claim(fd as RawFd, Owner::Reactor) {
                shared.close(guard);
                closed += 1;
            }
        }

        tracing::info!(closed, "{}", shared.metrics.snapshot());
    }
}
