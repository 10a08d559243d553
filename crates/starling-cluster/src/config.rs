//! Runtime configuration consumed by the cluster core.
//!
//! [`Config`] holds the self-endpoint and discovery settings; [`PeerOptions`]
//! tunes the per-peer channel pool and stream queues. The server binary
//! loads both from environment variables; library users construct them
//! directly.

/// Channel-pool and stream tuning for [`crate::LocalPeer`].
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Maximum idle channels retained per peer.
    pub max_idle: usize,

    /// Maximum concurrent channels per peer (0 = unlimited).
    pub max_active: usize,

    /// Concurrent-stream budget per channel.
    pub max_concurrent_streams: usize,

    /// When `max_active` is reached: `true` reuses the least-loaded channel,
    /// `false` hands out a one-shot channel closed on release.
    pub reuse: bool,

    /// Buffer depth of the caller-facing stream receive channel.
    pub message_queue_size: usize,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_active: 64,
            max_concurrent_streams: 64,
            reuse: true,
            message_queue_size: 128,
        }
    }
}

/// Top-level cluster configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Advertised host. Empty or `"0.0.0.0"` selects the first private IPv4.
    pub addr: String,

    /// Advertised RPC port.
    pub port: u16,

    /// Informational domain label, copied into `vars["domain"]`.
    pub domain: String,

    /// Key-space prefix in the discovery backend.
    pub prefix: String,

    /// Retransmission multiplier handed to the gossip substrate.
    pub retransmit_mult: usize,

    /// Per-peer transport tuning.
    pub peer: PeerOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: String::new(),
            port: 7350,
            domain: String::new(),
            prefix: "/starling/".to_string(),
            retransmit_mult: 4,
            peer: PeerOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.port > 0);
        assert!(cfg.prefix.starts_with('/'));
        assert!(cfg.peer.max_idle <= cfg.peer.max_active);
        assert!(cfg.peer.message_queue_size > 0);
    }
}
