// src/metrics.rs
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Server-wide counters, owned by the reactor context and shared with workers.
#[repr(C, align(64))]
pub struct Metrics {
    requests: AtomicUsize,
    active: AtomicUsize,
    bytes_sent: AtomicUsize,
    rejected: AtomicUsize,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests: usize,
    pub active: usize,
    pub bytes_sent: usize,
    pub rejected: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn inc_req(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conn(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_conn(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A connection or unit of work dropped for lack of capacity.
    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active connections: {} | requests: {} | bytes sent: {} | rejected: {}",
            self.active, self.requests, self.bytes_sent, self.rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_counters() {
        let metrics = Metrics::new();
        metrics.inc_conn();
        metrics.inc_conn();
        metrics.dec_conn();
        metrics.inc_req();
        metrics.add_bytes(120);
        metrics.inc_rejected();

        let snap = metrics.snapshot();
        assert_eq!(
            snap,
            MetricsSnapshot {
                requests: 1,
                active: 1,
                bytes_sent: 120,
                rejected: 1,
            }
        );
        assert!(snap.to_string().contains("bytes sent: 120"));
    }
}
