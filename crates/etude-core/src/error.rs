use crate::table::Owner;
use std::io;
use std::os::fd::RawFd;
use thiserror::Error;

/// Central error type for the Etude engine.
#[derive(Debug, Error)]
pub enum EtudeError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed its end of the connection (zero-length read).
    #[error("peer closed the connection")]
    PeerClosed,

    /// The fixed read buffer has no room left for the request.
    #[error("read buffer is full")]
    ReadBufferFull,

    /// A response was requested before the request was complete.
    #[error("request is not complete")]
    Incomplete,

    /// The response head does not fit in the fixed header buffer.
    #[error("response does not fit in the header buffer")]
    ResponseOverflow,

    /// The connection table has no slot for this descriptor.
    #[error("connection table is full (fd {0})")]
    TableFull(RawFd),

    /// A thread tried to take a connection it does not own.
    #[error("connection {fd} cannot be claimed by {wanted:?}")]
    OwnershipViolation { fd: RawFd, wanted: Owner },

    /// The ready queue reached its maximum pending count.
    #[error("ready queue is full")]
    QueueFull,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EtudeResult<T> = Result<T, EtudeError>;
