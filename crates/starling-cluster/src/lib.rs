//! # starling-cluster
//!
//! Cluster membership and peer-routing runtime for a horizontally-scaled
//! fleet:
//!
//! - [`Meta`] — the self-describing record each node advertises
//! - [`LocalPeer`] — concurrent peer registry with id / service-name /
//!   consistent-hash routing and per-peer RPC transport
//! - [`HashRing`] — weighted consistent-hash ring used per service name
//! - [`Delegate`] / [`MembershipBridge`] — the contract between the gossip
//!   substrate, the registry, and user code
//! - [`Client`] / [`Server`] — the outbound and inbound runtime halves
//!
//! ## Design principles
//!
//! - **Eventually consistent membership**: authoritative state is whatever
//!   gossip reports merged with what discovery lists; gossip wins `status`,
//!   discovery wins `addr` and `vars`.
//! - **Substrate opacity**: SWIM-style gossip and the discovery backend are
//!   capabilities ([`GossipTransport`], [`Discovery`]), not dependencies.
//! - **Lifecycle-bound transport**: channel pools and stream scopes exist
//!   only for registered peers; removal purges them.

pub mod client;
pub mod config;
pub mod delegate;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod meta;
pub mod peer;
pub mod pool;
pub mod ring;
pub mod server;

pub use client::Client;
pub use config::{Config, PeerOptions};
pub use delegate::{Delegate, MembershipBridge};
pub use discovery::{apply_snapshot, Discovery, Snapshot};
pub use error::ClusterError;
pub use gossip::{GossipTransport, Message};
pub use meta::{Meta, MetaStatus, NodeType, DEFAULT_SERVICE, VAR_DOMAIN, VAR_WEIGHT};
pub use peer::LocalPeer;
pub use pool::{ChannelGuard, ChannelPool};
pub use ring::HashRing;
pub use server::Server;

// Wire types travel with the runtime API.
pub use starling_api::pb;
