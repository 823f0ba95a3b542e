// src/transport.rs
//
// Socket I/O for a `Connection`. These run on whichever thread currently owns
// the slot and report what interest to re-arm instead of re-arming themselves.

use crate::conn::Connection;
use crate::error::{EtudeError, EtudeResult};
use crate::http::Outcome;
use crate::metrics::Metrics;
use crate::resource::DocumentRoot;
use crate::syscalls;

/// What the dispatcher should do with the connection once it has released it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Re-arm one-shot read interest.
    Read,
    /// Re-arm one-shot write interest.
    Write,
    /// Tear the connection down.
    Close,
}

impl Connection {
    /// Drain the socket into the read buffer until it would block or the buffer fills.
    pub fn receive(&mut self) -> EtudeResult<()> {
        if self.cursor.is_full() {
            return Err(EtudeError::ReadBufferFull);
        }

        while !self.cursor.is_full() {
            let start = self.cursor.fill();
            match syscalls::read_nonblocking(self.fd, &mut self.read_buf[start..])? {
                None => break,
                Some(0) => return Err(EtudeError::PeerClosed),
                Some(n) => self.cursor.record_read(n)?,
            }
        }
        Ok(())
    }

    /// Parse what has been received and, once classified, build the response.
    pub fn process(&mut self, docs: &DocumentRoot) -> Next {
        let outcome = self.process_read(docs);
        if outcome == Outcome::NeedMoreData {
            return Next::Read;
        }

        match self.assemble(outcome) {
            Ok(()) => Next::Write,
            Err(e) => {
                tracing::debug!(fd = self.fd, "failed to assemble response: {}", e);
                self.release_resource();
                Next::Close
            }
        }
    }

    /// Push the pending response out with scatter/gather writes.
    pub fn transmit(&mut self, metrics: &Metrics) -> Next {
        if self.bytes_pending == 0 {
            self.reset();
            return Next::Read;
        }

        loop {
            let written = {
                let segments = self.segments();
                syscalls::writev_nonblocking(self.fd, &segments)
            };

            match written {
                Ok(None) => return Next::Write,
                Ok(Some(n)) => {
                    metrics.add_bytes(n);
                    self.advance_written(n);
                }
                Err(e) => {
                    tracing::debug!(fd = self.fd, "write failed: {}", e);
                    self.release_resource();
                    return Next::Close;
                }
            }

            if self.bytes_pending == 0 {
                self.release_resource();
                metrics.inc_req();
                if self.keep_alive {
                    self.reset();
                    return Next::Read;
                }
                return Next::Close;
            }
        }
    }
}
