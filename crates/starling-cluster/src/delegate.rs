//! Delegate protocol: the contract between the runtime and user code, and
//! the bridge the gossip substrate drives.
//!
//! User code implements [`Delegate`] and installs it with
//! `Client::on_delegate` / `Server::on_delegate`. The runtime never calls
//! back into user code while holding a registry lock, and membership
//! callbacks run on the substrate's threads, so implementations must not
//! block for long.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use starling_api::pb::{Envelope, NodeStatus};

use crate::error::ClusterError;
use crate::meta::{Meta, MetaStatus};
use crate::peer::LocalPeer;

/// Shared, swappable delegate slot. Registered once, read on every event.
pub(crate) type SharedDelegate = Arc<RwLock<Option<Arc<dyn Delegate>>>>;

/// User-supplied handler for membership events and inbound messages.
#[async_trait]
pub trait Delegate: Send + Sync + 'static {
    /// Serialized snapshot of this node's user-visible state, exchanged
    /// through the gossip substrate's push/pull mechanism.
    fn local_state(&self, join: bool) -> Vec<u8>;

    /// Consume a remote node's state payload.
    fn merge_remote_state(&self, buf: &[u8], join: bool);

    /// A node joined the cluster.
    fn notify_join(&self, meta: &Meta);

    /// A node left the cluster (or was declared dead).
    fn notify_leave(&self, meta: &Meta);

    /// A node's advertised record changed.
    fn notify_update(&self, meta: &Meta);

    /// Admission check for a node reporting itself alive. Returning an
    /// error rejects the node at the substrate level.
    fn notify_alive(&self, _meta: &Meta) -> Result<(), ClusterError> {
        Ok(())
    }

    /// A best-effort user message arrived over gossip. The returned
    /// envelope, if any, is sent back to the sender.
    fn notify_msg(&self, sender: &str, envelope: Envelope)
        -> Result<Option<Envelope>, ClusterError>;

    /// Unary RPC dispatched from the server runtime.
    async fn call(&self, envelope: Envelope) -> Result<Envelope, ClusterError>;

    /// One inbound message on a bidirectional stream. Replies go through
    /// `out`; the channel stays usable for the stream's whole life.
    async fn stream(
        &self,
        out: mpsc::Sender<Envelope>,
        envelope: Envelope,
    ) -> Result<(), ClusterError>;

    /// The peer closed its side of a stream.
    fn on_stream_close(&self);
}

// ─────────────────────────────────────────────
// MembershipBridge
// ─────────────────────────────────────────────

/// Glue between the gossip substrate, the peer registry, and the user
/// delegate.
///
/// The substrate owns the threads these methods run on; each call mirrors
/// the event into the registry first and forwards to the user delegate
/// second. Conflict policy: gossip is authoritative for `status`, discovery
/// for `addr`/`vars`, so events about already-known ids only adopt the
/// incoming status.
#[derive(Clone)]
pub struct MembershipBridge {
    peers: Arc<LocalPeer>,
    local: Arc<RwLock<Meta>>,
    delegate: SharedDelegate,
}

impl MembershipBridge {
    pub(crate) fn new(
        peers: Arc<LocalPeer>,
        local: Arc<RwLock<Meta>>,
        delegate: SharedDelegate,
    ) -> Self {
        Self { peers, local, delegate }
    }

    fn user(&self) -> Option<Arc<dyn Delegate>> {
        self.delegate.read().clone()
    }

    /// This node's advertisement record, serialized for the substrate's
    /// metadata exchange.
    pub fn node_meta(&self) -> Vec<u8> {
        self.local.read().to_json().unwrap_or_default()
    }

    /// User-visible local state for push/pull exchange.
    pub fn local_state(&self, join: bool) -> Vec<u8> {
        self.user().map(|d| d.local_state(join)).unwrap_or_default()
    }

    /// Merge a remote node's state payload.
    pub fn merge_remote_state(&self, buf: &[u8], join: bool) {
        if let Some(delegate) = self.user() {
            delegate.merge_remote_state(buf, join);
        }
    }

    /// A peer joined: upsert into the registry and notify the delegate.
    pub fn notify_join(&self, meta: Meta) {
        info!(id = %meta.id, name = %meta.name, addr = %meta.addr, "peer joined");
        if self.peers.get(&meta.id).is_some() {
            self.peers.update(&meta.id, meta.status);
        } else {
            self.peers.upsert(meta.clone());
        }
        if let Some(delegate) = self.user() {
            delegate.notify_join(&meta);
        }
    }

    /// A peer left: delete from the registry (purging its transport) and
    /// notify the delegate.
    pub fn notify_leave(&self, meta: &Meta) {
        info!(id = %meta.id, name = %meta.name, "peer left");
        self.peers.delete(&meta.id);
        if let Some(delegate) = self.user() {
            delegate.notify_leave(meta);
        }
    }

    /// A peer's record changed: adopt the incoming status (insert when the
    /// id is new) and notify the delegate.
    pub fn notify_update(&self, meta: Meta) {
        if self.peers.get(&meta.id).is_some() {
            self.peers.update(&meta.id, meta.status);
        } else {
            self.peers.upsert(meta.clone());
        }
        if let Some(delegate) = self.user() {
            delegate.notify_update(&meta);
        }
    }

    /// Admission check; errors reject the node.
    pub fn notify_alive(&self, meta: &Meta) -> Result<(), ClusterError> {
        match self.user() {
            Some(delegate) => delegate.notify_alive(meta),
            None => Ok(()),
        }
    }

    /// Inbound user message over gossip.
    pub fn notify_msg(
        &self,
        sender: &str,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, ClusterError> {
        match self.user() {
            Some(delegate) => match delegate.notify_msg(sender, envelope) {
                Ok(reply) => Ok(reply),
                Err(e) => {
                    warn!(sender = %sender, error = %e, "notify_msg failed");
                    Err(e)
                }
            },
            None => Ok(None),
        }
    }

    /// A status broadcast arrived from another node. Unknown status codes
    /// and unknown ids are ignored.
    pub fn notify_status(&self, status: &NodeStatus) {
        match MetaStatus::try_from(status.status) {
            Ok(parsed) => self.peers.update(&status.node, parsed),
            Err(e) => warn!(node = %status.node, error = %e, "ignoring status broadcast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerOptions;
    use crate::meta::{MetaStatus, NodeType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate {
        joins: AtomicUsize,
        leaves: AtomicUsize,
    }

    #[async_trait]
    impl Delegate for CountingDelegate {
        fn local_state(&self, _join: bool) -> Vec<u8> {
            b"state".to_vec()
        }
        fn merge_remote_state(&self, _buf: &[u8], _join: bool) {}
        fn notify_join(&self, _meta: &Meta) {
            self.joins.fetch_add(1, Ordering::Relaxed);
        }
        fn notify_leave(&self, _meta: &Meta) {
            self.leaves.fetch_add(1, Ordering::Relaxed);
        }
        fn notify_update(&self, _meta: &Meta) {}
        fn notify_msg(
            &self,
            _sender: &str,
            _envelope: Envelope,
        ) -> Result<Option<Envelope>, ClusterError> {
            Ok(None)
        }
        async fn call(&self, envelope: Envelope) -> Result<Envelope, ClusterError> {
            Ok(envelope)
        }
        async fn stream(
            &self,
            _out: mpsc::Sender<Envelope>,
            _envelope: Envelope,
        ) -> Result<(), ClusterError> {
            Ok(())
        }
        fn on_stream_close(&self) {}
    }

    fn meta(id: &str, status: MetaStatus) -> Meta {
        let mut m = Meta::new(id, "svc", "127.0.0.1:7350", NodeType::Primary, HashMap::new());
        m.status = status;
        m
    }

    fn bridge_with_delegate() -> (MembershipBridge, Arc<LocalPeer>, Arc<CountingDelegate>) {
        let peers = LocalPeer::new(PeerOptions::default());
        let local = Arc::new(RwLock::new(meta("self", MetaStatus::Ready)));
        let slot: SharedDelegate = Arc::new(RwLock::new(None));
        let counting = Arc::new(CountingDelegate {
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
        });
        *slot.write() = Some(counting.clone());
        (MembershipBridge::new(peers.clone(), local, slot), peers, counting)
    }

    #[test]
    fn join_inserts_and_forwards() {
        let (bridge, peers, counting) = bridge_with_delegate();
        bridge.notify_join(meta("a", MetaStatus::WaitReady));

        assert_eq!(peers.size(), 1);
        assert_eq!(counting.joins.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn join_of_known_id_adopts_status_only() {
        let (bridge, peers, _) = bridge_with_delegate();
        let mut stored = meta("a", MetaStatus::WaitReady);
        stored.addr = "10.0.0.9:7350".to_string();
        peers.upsert(stored);

        // Gossip reports the node ready at a different address; the address
        // from discovery stands.
        let mut incoming = meta("a", MetaStatus::Ready);
        incoming.addr = "10.9.9.9:1".to_string();
        bridge.notify_join(incoming);

        let current = peers.get("a").unwrap();
        assert_eq!(current.status, MetaStatus::Ready);
        assert_eq!(current.addr, "10.0.0.9:7350");
    }

    #[test]
    fn leave_deletes_and_forwards() {
        let (bridge, peers, counting) = bridge_with_delegate();
        bridge.notify_join(meta("a", MetaStatus::Ready));
        bridge.notify_leave(&meta("a", MetaStatus::Ready));

        assert_eq!(peers.size(), 0);
        assert_eq!(counting.leaves.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn update_of_unknown_id_inserts() {
        let (bridge, peers, _) = bridge_with_delegate();
        bridge.notify_update(meta("late", MetaStatus::Ready));
        assert_eq!(peers.get("late").unwrap().status, MetaStatus::Ready);
    }

    #[test]
    fn status_broadcast_updates_known_peers() {
        let (bridge, peers, _) = bridge_with_delegate();
        bridge.notify_join(meta("a", MetaStatus::WaitReady));

        bridge.notify_status(&NodeStatus { node: "a".into(), status: 1, join: false });
        assert_eq!(peers.get("a").unwrap().status, MetaStatus::Ready);

        // Garbage status codes and unknown ids are ignored.
        bridge.notify_status(&NodeStatus { node: "a".into(), status: 9, join: false });
        assert_eq!(peers.get("a").unwrap().status, MetaStatus::Ready);
        bridge.notify_status(&NodeStatus { node: "ghost".into(), status: 2, join: false });
        assert_eq!(peers.size(), 1);
    }

    #[test]
    fn bridge_without_delegate_still_mirrors_membership() {
        let peers = LocalPeer::new(PeerOptions::default());
        let local = Arc::new(RwLock::new(meta("self", MetaStatus::Ready)));
        let slot: SharedDelegate = Arc::new(RwLock::new(None));
        let bridge = MembershipBridge::new(peers.clone(), local, slot);

        bridge.notify_join(meta("a", MetaStatus::Ready));
        assert_eq!(peers.size(), 1);
        assert!(bridge.notify_alive(&meta("a", MetaStatus::Ready)).is_ok());
        assert!(bridge.local_state(true).is_empty());
        assert!(!bridge.node_meta().is_empty());
    }
}
