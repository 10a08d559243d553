//! Gossip substrate capability.
//!
//! The runtime does not implement SWIM itself. Any failure-detecting
//! substrate can be plugged in as long as it offers best-effort broadcast
//! and orderly shutdown here, and drives a
//! [`MembershipBridge`](crate::MembershipBridge) with its membership
//! callbacks.

use async_trait::async_trait;

use starling_api::pb::{Envelope, NodeStatus};

use crate::error::ClusterError;

/// A payload queued for best-effort gossip broadcast: either a user
/// envelope (no reply) or a node status change.
#[derive(Debug, Clone)]
pub enum Message {
    User(Envelope),
    Status(NodeStatus),
}

impl Message {
    pub fn user(envelope: Envelope) -> Self {
        Message::User(envelope)
    }

    pub fn status(node: impl Into<String>, status: i32, join: bool) -> Self {
        Message::Status(NodeStatus { node: node.into(), status, join })
    }
}

/// Capability surface the cluster runtime requires from a gossip substrate.
#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    /// Queue a user message for best-effort dissemination. No reply.
    async fn broadcast(&self, message: Message) -> Result<(), ClusterError>;

    /// Leave the cluster and release substrate resources.
    async fn shutdown(&self) -> Result<(), ClusterError>;
}
