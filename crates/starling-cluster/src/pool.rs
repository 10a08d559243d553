//! Per-peer pool of multiplexed gRPC channels.
//!
//! Each [`ChannelPool`] wraps one peer's dial address. Channels are created
//! lazily, shared while they have stream budget left, and trimmed back to
//! `max_idle` once released. When the pool is saturated (`max_active`
//! reached) the `reuse` flag decides between piggybacking on the
//! least-loaded channel and handing out a one-shot channel that is closed
//! on release.
//!
//! The pool never holds its lock across a dial: candidate selection happens
//! under the lock, connecting happens outside it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::config::PeerOptions;
use crate::error::ClusterError;

struct PooledChannel {
    channel: Channel,
    /// Streams currently checked out on this channel.
    active: AtomicUsize,
}

struct PoolInner {
    peer_id: String,
    endpoint: Endpoint,
    options: PeerOptions,
    conns: Mutex<Vec<Arc<PooledChannel>>>,
    /// Outstanding one-shot channels, bounded by `max_active`.
    one_shots: AtomicUsize,
    closed: AtomicBool,
}

/// Bounded pool of multiplexed channels to a single peer address.
#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<PoolInner>,
}

impl ChannelPool {
    /// Create a pool for `addr`. No channel is dialled until first use.
    pub fn new(
        peer_id: impl Into<String>,
        addr: &str,
        options: PeerOptions,
    ) -> Result<Self, ClusterError> {
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                peer_id: peer_id.into(),
                endpoint,
                options,
                conns: Mutex::new(Vec::new()),
                one_shots: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check out a channel, dialling a new one when the pool has headroom.
    ///
    /// Returns [`ClusterError::PoolExhausted`] when `max_active` pooled
    /// channels exist, `reuse` is disabled, and `max_active` one-shot
    /// channels are already outstanding.
    pub async fn acquire(&self) -> Result<ChannelGuard, ClusterError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ClusterError::Cancelled);
        }

        let opts = &self.inner.options;
        let one_shot = {
            let conns = self.inner.conns.lock();
            if let Some(conn) = pick_with_budget(&conns, opts.max_concurrent_streams) {
                conn.active.fetch_add(1, Ordering::AcqRel);
                return Ok(ChannelGuard::pooled(self.inner.clone(), conn));
            }

            let at_cap = opts.max_active > 0 && conns.len() >= opts.max_active;
            if at_cap {
                if opts.reuse {
                    // Every channel is over budget; share the least loaded one.
                    let conn = least_loaded(&conns).expect("saturated pool is non-empty");
                    conn.active.fetch_add(1, Ordering::AcqRel);
                    return Ok(ChannelGuard::pooled(self.inner.clone(), conn));
                }
                if self.inner.one_shots.load(Ordering::Acquire) >= opts.max_active {
                    return Err(ClusterError::PoolExhausted(self.inner.peer_id.clone()));
                }
            }
            at_cap
        };

        // Dial outside the lock.
        let channel = self.inner.endpoint.connect().await?;
        let conn = Arc::new(PooledChannel { channel, active: AtomicUsize::new(1) });

        if one_shot {
            self.inner.one_shots.fetch_add(1, Ordering::AcqRel);
            return Ok(ChannelGuard::one_shot(self.inner.clone(), conn));
        }

        let mut conns = self.inner.conns.lock();
        if opts.max_active > 0 && conns.len() >= opts.max_active {
            // Lost a race while dialling; downgrade to a one-shot channel.
            self.inner.one_shots.fetch_add(1, Ordering::AcqRel);
            return Ok(ChannelGuard::one_shot(self.inner.clone(), conn));
        }
        conns.push(conn.clone());
        Ok(ChannelGuard::pooled(self.inner.clone(), conn))
    }

    /// Drop every channel and refuse further acquisitions. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.conns.lock().clear();
    }

    /// Pooled (non one-shot) channel count.
    pub fn len(&self) -> usize {
        self.inner.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A channel with stream budget left, preferring the least loaded.
fn pick_with_budget(
    conns: &[Arc<PooledChannel>],
    max_streams: usize,
) -> Option<Arc<PooledChannel>> {
    conns
        .iter()
        .filter(|c| max_streams == 0 || c.active.load(Ordering::Acquire) < max_streams)
        .min_by_key(|c| c.active.load(Ordering::Acquire))
        .cloned()
}

fn least_loaded(conns: &[Arc<PooledChannel>]) -> Option<Arc<PooledChannel>> {
    conns
        .iter()
        .min_by_key(|c| c.active.load(Ordering::Acquire))
        .cloned()
}

// ─────────────────────────────────────────────
// ChannelGuard
// ─────────────────────────────────────────────

/// A checked-out channel. Dropping the guard releases the stream slot and
/// trims idle channels beyond `max_idle` (one-shot channels are simply
/// closed).
pub struct ChannelGuard {
    pool: Arc<PoolInner>,
    conn: Arc<PooledChannel>,
    one_shot: bool,
}

impl ChannelGuard {
    fn pooled(pool: Arc<PoolInner>, conn: Arc<PooledChannel>) -> Self {
        Self { pool, conn, one_shot: false }
    }

    fn one_shot(pool: Arc<PoolInner>, conn: Arc<PooledChannel>) -> Self {
        Self { pool, conn, one_shot: true }
    }

    /// The underlying channel. Cloning is cheap; the clone shares the same
    /// HTTP/2 connection.
    pub fn channel(&self) -> Channel {
        self.conn.channel.clone()
    }
}

impl std::fmt::Debug for ChannelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("peer_id", &self.pool.peer_id)
            .field("one_shot", &self.one_shot)
            .finish()
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.conn.active.fetch_sub(1, Ordering::AcqRel);

        if self.one_shot {
            self.pool.one_shots.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let max_idle = self.pool.options.max_idle;
        let mut conns = self.pool.conns.lock();
        let mut idle = conns
            .iter()
            .filter(|c| c.active.load(Ordering::Acquire) == 0)
            .count();
        while idle > max_idle {
            let Some(pos) = conns
                .iter()
                .position(|c| c.active.load(Ordering::Acquire) == 0)
            else {
                break;
            };
            conns.remove(pos);
            idle -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_address() {
        assert!(ChannelPool::new("p", "not an address", PeerOptions::default()).is_err());
    }

    #[tokio::test]
    async fn dial_failure_surfaces_as_dial_error() {
        // Port 1 is never listening.
        let pool = ChannelPool::new("p", "127.0.0.1:1", PeerOptions::default()).unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ClusterError::Dial(_)));
    }

    #[tokio::test]
    async fn closed_pool_refuses_acquire() {
        let pool = ChannelPool::new("p", "127.0.0.1:1", PeerOptions::default()).unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(ClusterError::Cancelled)));
        // A second close is a no-op.
        pool.close();
    }
}
