//! Error types for the cluster runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to dial peer: {0}")]
    Dial(#[from] tonic::transport::Error),

    #[error("channel pool exhausted for peer '{0}'")]
    PoolExhausted(String),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("unknown peer '{0}'")]
    UnknownPeer(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed node record: {0}")]
    Malformed(String),
}

impl ClusterError {
    /// `true` when the error indicates the target peer is not in the registry.
    pub fn is_unknown_peer(&self) -> bool {
        matches!(self, ClusterError::UnknownPeer(_))
    }
}
