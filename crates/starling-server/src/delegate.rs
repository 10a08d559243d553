//! Demo delegate: logs membership events and echoes RPC traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use starling_cluster::pb::Envelope;
use starling_cluster::{ClusterError, Delegate, Meta};

use crate::metrics::OperationMetrics;

pub struct LoggingDelegate {
    node_name: String,
    metrics: Arc<OperationMetrics>,
}

impl LoggingDelegate {
    pub fn new(node_name: impl Into<String>, metrics: Arc<OperationMetrics>) -> Self {
        Self { node_name: node_name.into(), metrics }
    }
}

#[async_trait]
impl Delegate for LoggingDelegate {
    fn local_state(&self, join: bool) -> Vec<u8> {
        debug!(join, "local_state requested");
        format!("{}-state", self.node_name).into_bytes()
    }

    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        debug!(join, bytes = buf.len(), "merged remote state");
    }

    fn notify_join(&self, meta: &Meta) {
        self.metrics.inc(&self.metrics.joins);
        info!(id = %meta.id, addr = %meta.addr, "delegate: peer joined");
    }

    fn notify_leave(&self, meta: &Meta) {
        self.metrics.inc(&self.metrics.leaves);
        info!(id = %meta.id, "delegate: peer left");
    }

    fn notify_update(&self, meta: &Meta) {
        debug!(id = %meta.id, status = ?meta.status, "delegate: peer updated");
    }

    fn notify_msg(
        &self,
        sender: &str,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, ClusterError> {
        self.metrics.inc(&self.metrics.gossip_messages);
        debug!(sender = %sender, id = envelope.id, "delegate: gossip message");
        Ok(None)
    }

    async fn call(&self, mut envelope: Envelope) -> Result<Envelope, ClusterError> {
        self.metrics.inc(&self.metrics.calls);
        envelope.node = self.node_name.clone();
        Ok(envelope)
    }

    async fn stream(
        &self,
        out: mpsc::Sender<Envelope>,
        mut envelope: Envelope,
    ) -> Result<(), ClusterError> {
        self.metrics.inc(&self.metrics.stream_messages);
        envelope.node = self.node_name.clone();
        out.send(envelope).await.map_err(|_| ClusterError::Cancelled)
    }

    fn on_stream_close(&self) {
        self.metrics.inc(&self.metrics.stream_closes);
        debug!("delegate: stream closed");
    }
}
