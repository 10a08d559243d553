//! Peer registry and transport orchestration.
//!
//! [`LocalPeer`] is the live directory of known cluster members, indexed by
//! id, by service name, and by per-name consistent-hash ring, plus the
//! per-peer transport state (channel pools, open streams, stream
//! cancellation scopes) whose lifecycle is bound to membership.
//!
//! Locking: the three membership indexes live under one `RwLock` and every
//! read hands out clones, never aliases. Transport maps are concurrent
//! `DashMap`s keyed independently. No lock is held across a dial or an RPC,
//! and transport purge runs after the registry lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tonic::metadata::MetadataMap;
use tonic::Request;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use starling_api::pb::api_server_client::ApiServerClient;
use starling_api::pb::Envelope;

use crate::config::PeerOptions;
use crate::error::ClusterError;
use crate::meta::{Meta, MetaStatus};
use crate::pool::ChannelPool;
use crate::ring::HashRing;

/// Membership indexes guarded by the registry lock.
///
/// Invariants (checked by tests):
/// - every `(id, name)` in `nodes` is counted in `nodes_by_name[name]`
///   and present in `rings[name]`;
/// - a name whose count reaches zero disappears from both secondary maps.
#[derive(Default)]
struct Indexes {
    nodes: HashMap<String, Meta>,
    nodes_by_name: HashMap<String, usize>,
    rings: HashMap<String, HashRing>,
}

impl Indexes {
    fn insert(&mut self, meta: Meta) {
        if let Some(old) = self.nodes.get(&meta.id).cloned() {
            self.unindex(&old);
        }
        *self.nodes_by_name.entry(meta.name.clone()).or_insert(0) += 1;
        self.rings
            .entry(meta.name.clone())
            .or_default()
            .add_weighted(&meta.id, meta.weight());
        self.nodes.insert(meta.id.clone(), meta);
    }

    fn remove(&mut self, id: &str) -> Option<Meta> {
        let meta = self.nodes.remove(id)?;
        self.unindex(&meta);
        Some(meta)
    }

    /// Drop `meta` from the name count and ring, releasing both when the
    /// service name empties out.
    fn unindex(&mut self, meta: &Meta) {
        if let Some(count) = self.nodes_by_name.get_mut(&meta.name) {
            *count -= 1;
            if *count == 0 {
                self.nodes_by_name.remove(&meta.name);
                self.rings.remove(&meta.name);
                return;
            }
        }
        if let Some(ring) = self.rings.get_mut(&meta.name) {
            ring.remove(&meta.id);
        }
    }
}

/// Cancellation scope shared by every stream opened toward one peer.
struct StreamContext {
    cancel: watch::Sender<bool>,
}

impl StreamContext {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self { cancel }
    }
}

/// Sender half of a registered client stream, keyed by logical client id.
struct StreamHandle {
    tx: mpsc::Sender<Envelope>,
}

// ─────────────────────────────────────────────
// LocalPeer
// ─────────────────────────────────────────────

/// Concurrent-safe peer directory with id/name/ring routing and per-peer
/// RPC transport.
pub struct LocalPeer {
    indexes: RwLock<Indexes>,
    pools: DashMap<String, ChannelPool>,
    streams: Arc<DashMap<String, StreamHandle>>,
    stream_ctxs: DashMap<String, StreamContext>,
    options: PeerOptions,
}

impl LocalPeer {
    pub fn new(options: PeerOptions) -> Arc<Self> {
        Arc::new(Self {
            indexes: RwLock::new(Indexes::default()),
            pools: DashMap::new(),
            streams: Arc::new(DashMap::new()),
            stream_ctxs: DashMap::new(),
            options,
        })
    }

    // ── Reads (always cloned) ────────────────────────────────

    /// Snapshot of a single node.
    pub fn get(&self, id: &str) -> Option<Meta> {
        self.indexes.read().nodes.get(id).cloned()
    }

    /// All nodes registered under a service name.
    pub fn get_by_name(&self, name: &str) -> Vec<Meta> {
        self.indexes
            .read()
            .nodes
            .values()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Snapshot of every known node.
    pub fn all(&self) -> Vec<Meta> {
        self.indexes.read().nodes.values().cloned().collect()
    }

    /// Snapshot of every known node, keyed by id.
    pub fn all_to_map(&self) -> HashMap<String, Meta> {
        self.indexes.read().nodes.clone()
    }

    /// Total registered node count.
    pub fn size(&self) -> usize {
        self.indexes.read().nodes.len()
    }

    /// Node count under one service name.
    pub fn size_by_name(&self, name: &str) -> usize {
        self.indexes
            .read()
            .nodes_by_name
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Route `key` through the consistent-hash ring of `name`.
    ///
    /// Returns `None` when the name has no ring or the ring's answer lost a
    /// race with a concurrent delete.
    pub fn get_with_hash_ring(&self, name: &str, key: &str) -> Option<Meta> {
        let idx = self.indexes.read();
        let id = idx.rings.get(name)?.get_node(key)?;
        idx.nodes.get(id).cloned()
    }

    fn contains(&self, id: &str) -> bool {
        self.indexes.read().nodes.contains_key(id)
    }

    // ── Writes ───────────────────────────────────────────────

    /// Atomically replace the registry contents with `nodes`.
    ///
    /// Ids that disappear have their transport state purged (outside the
    /// registry lock). Ids that survive keep their current `status`: gossip
    /// is authoritative for status, discovery for everything else.
    pub fn sync(&self, nodes: Vec<Meta>) {
        let mut fresh = Indexes::default();
        for node in nodes {
            fresh.insert(node);
        }

        let removed: Vec<String> = {
            let mut idx = self.indexes.write();
            for (id, node) in fresh.nodes.iter_mut() {
                if let Some(existing) = idx.nodes.get(id) {
                    node.status = existing.status;
                }
            }
            let removed = idx
                .nodes
                .keys()
                .filter(|id| !fresh.nodes.contains_key(*id))
                .cloned()
                .collect();
            *idx = fresh;
            removed
        };

        for id in &removed {
            self.purge_transport(id);
        }
        if !removed.is_empty() {
            debug!(purged = removed.len(), "discovery sync removed peers");
        }
    }

    /// Insert or replace a single node, maintaining all indexes.
    pub fn upsert(&self, meta: Meta) {
        self.indexes.write().insert(meta);
    }

    /// Targeted status mutation; a no-op for unknown ids.
    pub fn update(&self, id: &str, status: MetaStatus) {
        let mut idx = self.indexes.write();
        if let Some(node) = idx.nodes.get(id) {
            let mut updated = node.clone();
            updated.status = status;
            idx.nodes.insert(id.to_string(), updated);
        }
    }

    /// Remove a node and purge its transport state.
    pub fn delete(&self, id: &str) {
        let removed = self.indexes.write().remove(id);
        if removed.is_some() {
            self.purge_transport(id);
        }
    }

    /// Empty the registry and tear down every pool and stream scope.
    pub fn reset(&self) {
        {
            let mut idx = self.indexes.write();
            *idx = Indexes::default();
        }
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
        for entry in self.stream_ctxs.iter() {
            let _ = entry.value().cancel.send(true);
        }
        self.stream_ctxs.clear();
    }

    // ── Transport ────────────────────────────────────────────

    /// Unary RPC to `node`. The peer must still be in the registry.
    pub async fn send(&self, node: &Meta, envelope: Envelope) -> Result<Envelope, ClusterError> {
        if !self.contains(&node.id) {
            return Err(ClusterError::UnknownPeer(node.id.clone()));
        }
        let pool = self.transport(&node.id, &node.addr)?;
        let guard = pool.acquire().await?;
        let mut client = ApiServerClient::new(guard.channel());
        let response = client.call(envelope).await?;
        Ok(response.into_inner())
    }

    /// Send on (or open) the bidirectional stream named by `client_id`.
    ///
    /// When a stream already exists the envelope is sent on it and
    /// `(false, None)` is returned. Otherwise a stream is opened inside the
    /// peer's cancellation scope and `(true, Some(receiver))` hands the
    /// caller the inbound message channel. The receiver closing signals
    /// end-of-stream.
    pub async fn send_stream(
        &self,
        client_id: &str,
        node: &Meta,
        envelope: Envelope,
        md: MetadataMap,
    ) -> Result<(bool, Option<mpsc::Receiver<Envelope>>), ClusterError> {
        if let Some(handle) = self.streams.get(client_id) {
            let tx = handle.tx.clone();
            drop(handle);
            return match tx.send(envelope).await {
                Ok(()) => Ok((false, None)),
                Err(_) => Err(ClusterError::Rpc(tonic::Status::unavailable(
                    "stream closed",
                ))),
            };
        }

        if !self.contains(&node.id) {
            return Err(ClusterError::UnknownPeer(node.id.clone()));
        }
        let pool = self.transport(&node.id, &node.addr)?;
        let guard = pool.acquire().await?;
        let mut client = ApiServerClient::new(guard.channel());

        let mut cancel = self.stream_scope(&node.id);
        if *cancel.borrow() {
            return Err(ClusterError::Cancelled);
        }

        let (out_tx, out_rx) = mpsc::channel(self.options.message_queue_size);
        let mut request = Request::new(ReceiverStream::new(out_rx));
        *request.metadata_mut() = md;

        let mut inbound = client.stream(request).await?.into_inner();

        let (in_tx, in_rx) = mpsc::channel(self.options.message_queue_size);
        self.streams
            .insert(client_id.to_string(), StreamHandle { tx: out_tx.clone() });

        let streams = Arc::clone(&self.streams);
        let key = client_id.to_string();
        tokio::spawn(async move {
            // The guard keeps the channel slot occupied for the stream's life.
            let _guard = guard;
            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    msg = inbound.message() => match msg {
                        Ok(Some(out)) => {
                            // Caller not reading: drop, the loop is not a buffer.
                            let _ = in_tx.try_send(out);
                        }
                        Ok(None) => break,
                        Err(status) => {
                            warn!(error = %status, "stream receive failed");
                            break;
                        }
                    }
                }
            }
            streams.remove(&key);
        });

        out_tx
            .send(envelope)
            .await
            .map_err(|_| ClusterError::Rpc(tonic::Status::unavailable("stream closed")))?;
        Ok((true, Some(in_rx)))
    }

    /// `true` while a channel pool exists for `id`.
    pub fn has_transport(&self, id: &str) -> bool {
        self.pools.contains_key(id)
    }

    /// `true` while a client stream is registered under `client_id`.
    pub fn has_stream(&self, client_id: &str) -> bool {
        self.streams.contains_key(client_id)
    }

    fn transport(&self, id: &str, addr: &str) -> Result<ChannelPool, ClusterError> {
        if let Some(pool) = self.pools.get(id) {
            return Ok(pool.clone());
        }
        let pool = ChannelPool::new(id, addr, self.options.clone())?;
        let pool = self.pools.entry(id.to_string()).or_insert(pool).clone();
        // Re-check after publication: a concurrent delete may have purged
        // between the membership check and the pool insert.
        if !self.contains(id) {
            self.purge_transport(id);
            return Err(ClusterError::UnknownPeer(id.to_string()));
        }
        Ok(pool)
    }

    /// The peer-wide cancellation scope, created on first use.
    fn stream_scope(&self, id: &str) -> watch::Receiver<bool> {
        self.stream_ctxs
            .entry(id.to_string())
            .or_insert_with(StreamContext::new)
            .cancel
            .subscribe()
    }

    /// Close the pool and cancel every stream scoped to `id`. Idempotent.
    fn purge_transport(&self, id: &str) {
        if let Some((_, pool)) = self.pools.remove(id) {
            pool.close();
        }
        if let Some((_, ctx)) = self.stream_ctxs.remove(id) {
            let _ = ctx.cancel.send(true);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
