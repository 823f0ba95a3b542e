// src/server.rs
use crate::config::Config;
use crate::error::EtudeResult;
use crate::metrics::Metrics;
use crate::reactor::{Listener, Reactor, Shared, Waker};
use crate::syscalls::Epoll;
use crate::table::ConnectionTable;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A bound, not yet running file server.
pub struct Server {
    reactor: Reactor,
    local_addr: SocketAddr,
    handle: ShutdownHandle,
}

impl Server {
    /// Bind `0.0.0.0:port` and start the worker pool. Port 0 picks a free port.
    pub fn bind(port: u16, config: Config) -> EtudeResult<Self> {
        config.validate()?;

        let shared = Shared {
            epoll: Epoll::new()?,
            table: ConnectionTable::new(config.max_connections),
            docs: config.document_root(),
            metrics: Metrics::new(),
            edge_triggered: config.edge_triggered,
        };
        let listener = Listener::bind(port, config.backlog)?;
        let local_addr = listener.local_addr()?;

        let handle = ShutdownHandle {
            flag: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new()?),
        };

        let reactor = Reactor::new(
            shared,
            listener,
            Arc::clone(&handle.waker),
            Arc::clone(&handle.flag),
            config.workers,
            config.queue_capacity,
        )?;

        tracing::info!(
            addr = %local_addr,
            doc_root = %config.doc_root.display(),
            workers = config.workers,
            edge_triggered = config.edge_triggered,
            "server bound"
        );

        Ok(Self {
            reactor,
            local_addr,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops [`Server::run`] from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Serve until shutdown is requested.
    pub fn run(self) -> EtudeResult<()> {
        tracing::info!(addr = %self.local_addr, "serving");
        let result = self.reactor.run();
        tracing::info!("server shut down");
        result
    }
}

/// Requests a graceful stop of a running [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            tracing::error!("failed to wake reactor: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
