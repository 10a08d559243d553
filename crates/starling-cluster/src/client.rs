//! Client runtime: the outbound half of a cluster member.
//!
//! A [`Client`] owns the local node's advertised record, the peer registry,
//! and a handle to the gossip substrate. Outbound traffic goes three ways:
//! best-effort gossip broadcast ([`Client::send`]), unary RPC
//! ([`Client::call`]), and bidirectional streams ([`Client::open_stream`]).
//! A background task consumes the discovery feed into the registry for the
//! client's whole life.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tonic::metadata::MetadataMap;
use tracing::{info, warn};

use starling_api::pb::Envelope;

use crate::config::Config;
use crate::delegate::{Delegate, MembershipBridge, SharedDelegate};
use crate::discovery::{spawn_watcher, Discovery};
use crate::error::ClusterError;
use crate::gossip::{GossipTransport, Message};
use crate::meta::{Meta, MetaStatus};
use crate::peer::LocalPeer;

/// Outbound cluster runtime for one node.
pub struct Client {
    local: Arc<RwLock<Meta>>,
    peers: Arc<LocalPeer>,
    gossip: Arc<dyn GossipTransport>,
    delegate: SharedDelegate,
    stop: watch::Sender<bool>,
}

impl Client {
    /// Start the runtime: registers nothing by itself, but begins consuming
    /// the discovery feed immediately.
    pub fn new<G, D>(meta: Meta, gossip: G, discovery: D, config: &Config) -> Arc<Self>
    where
        G: GossipTransport,
        D: Discovery,
    {
        let peers = LocalPeer::new(config.peer.clone());
        let (stop, stop_rx) = watch::channel(false);
        info!(id = %meta.id, name = %meta.name, addr = %meta.addr, "cluster client starting");

        spawn_watcher(discovery, peers.clone(), stop_rx);

        Arc::new(Self {
            local: Arc::new(RwLock::new(meta)),
            peers,
            gossip: Arc::new(gossip),
            delegate: Arc::new(RwLock::new(None)),
            stop,
        })
    }

    /// Install the user delegate. The last registration wins.
    pub fn on_delegate(&self, delegate: Arc<dyn Delegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// The bridge to hand to the gossip substrate at wiring time.
    pub fn membership(&self) -> MembershipBridge {
        MembershipBridge::new(self.peers.clone(), self.local.clone(), self.delegate.clone())
    }

    /// Best-effort broadcast over the gossip substrate. No reply.
    pub async fn send(&self, message: Message) -> Result<(), ClusterError> {
        self.gossip.broadcast(message).await
    }

    /// Unary RPC to a specific peer through its channel pool.
    pub async fn call(&self, node: &Meta, envelope: Envelope) -> Result<Envelope, ClusterError> {
        self.peers.send(node, envelope).await
    }

    /// Send on (or open) the bidirectional stream named by `client_id`.
    /// See [`LocalPeer::send_stream`] for the created/receiver contract.
    pub async fn open_stream(
        &self,
        client_id: &str,
        node: &Meta,
        envelope: Envelope,
        md: MetadataMap,
    ) -> Result<(bool, Option<mpsc::Receiver<Envelope>>), ClusterError> {
        self.peers.send_stream(client_id, node, envelope, md).await
    }

    /// The registry view of the cluster.
    pub fn get_peers(&self) -> Arc<LocalPeer> {
        self.peers.clone()
    }

    /// This node's current advertised record.
    pub fn get_local_node(&self) -> Meta {
        self.local.read().clone()
    }

    /// Update the local node's advertised status and attributes.
    ///
    /// The registry copy is refreshed, the status change is broadcast over
    /// gossip, and the substrate re-reads the full record through
    /// [`MembershipBridge::node_meta`] on its next state exchange.
    pub async fn update_meta(
        &self,
        status: MetaStatus,
        vars: HashMap<String, String>,
    ) -> Result<(), ClusterError> {
        let updated = {
            let mut local = self.local.write();
            local.status = status;
            local.vars = vars;
            local.clone()
        };
        self.peers.upsert(updated.clone());
        self.gossip
            .broadcast(Message::status(updated.id, i32::from(status), false))
            .await
    }

    /// Orderly shutdown: leave the gossip layer, empty the registry, and
    /// cancel every outstanding stream and background task.
    pub async fn stop(&self) {
        info!(id = %self.get_local_node().id, "cluster client stopping");
        if let Err(e) = self.gossip.shutdown().await {
            warn!(error = %e, "gossip shutdown failed");
        }
        self.peers.reset();
        let _ = self.stop.send(true);
    }
}
