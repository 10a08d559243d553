//! Operation counters for the demo node.
//!
//! Lock-free `AtomicU64` fields updated on the hot path and reported by the
//! periodic stats tick. Full Prometheus export is left to an external
//! reporter; these counters are the server's own view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

pub struct OperationMetrics {
    pub calls: AtomicU64,
    pub stream_messages: AtomicU64,
    pub stream_closes: AtomicU64,
    pub gossip_messages: AtomicU64,
    pub joins: AtomicU64,
    pub leaves: AtomicU64,
    pub errors: AtomicU64,
    pub start_time: Instant,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            stream_messages: AtomicU64::new(0),
            stream_closes: AtomicU64::new(0),
            gossip_messages: AtomicU64::new(0),
            joins: AtomicU64::new(0),
            leaves: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit the current counters as one structured log line.
    pub fn log_report(&self, peer_count: usize) {
        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            peers = peer_count,
            calls = self.calls.load(Ordering::Relaxed),
            stream_messages = self.stream_messages.load(Ordering::Relaxed),
            stream_closes = self.stream_closes.load(Ordering::Relaxed),
            gossip_messages = self.gossip_messages.load(Ordering::Relaxed),
            joins = self.joins.load(Ordering::Relaxed),
            leaves = self.leaves.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            "node stats"
        );
    }
}
