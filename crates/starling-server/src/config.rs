//! Server configuration loaded from environment variables.
//!
//! All settings have defaults suitable for a local demo node. Override any
//! variable at container / process startup — no config file required.
//!
//! | Variable                       | Default      | Description                                |
//! |--------------------------------|--------------|--------------------------------------------|
//! | `STARLING_NODE_ID`             | random UUID  | Globally unique node id                    |
//! | `STARLING_NODE_NAME`           | `starling`   | Service name (interchangeable pool)        |
//! | `STARLING_ADDR`                | first private IPv4 | Advertised host (`0.0.0.0` = detect) |
//! | `STARLING_PORT`                | `7350`       | gRPC listen port                           |
//! | `STARLING_DOMAIN`              | *(empty)*    | Informational domain label                 |
//! | `STARLING_PREFIX`              | `/starling/` | Discovery key-space prefix                 |
//! | `STARLING_SEEDS`               | *(empty)*    | CSV of `id@host:port` seed peers           |
//! | `STARLING_WEIGHT`              | `1`          | Hash-ring weight of this node              |
//! | `STARLING_LOG_LEVEL`           | `info`       | tracing filter (trace/debug/info/warn)     |
//! | `STARLING_RETRANSMIT_MULT`     | `4`          | Gossip retransmission multiplier           |
//! | `STARLING_MAX_IDLE`            | `8`          | Idle channels retained per peer            |
//! | `STARLING_MAX_ACTIVE`          | `64`         | Max channels per peer (0 = unlimited)      |
//! | `STARLING_MAX_STREAMS`         | `64`         | Concurrent streams per channel             |
//! | `STARLING_REUSE`               | `true`       | Share channels when the pool is saturated  |
//! | `STARLING_QUEUE_SIZE`          | `128`        | Stream receive-queue depth                 |
//! | `STARLING_STATS_INTERVAL_SECS` | `30`         | Seconds between stats ticks (0 = off)      |

use starling_cluster::{Config, PeerOptions, DEFAULT_SERVICE};
use uuid::Uuid;

/// Runtime configuration for a starling demo node.
#[derive(Debug)]
pub struct ServerConfig {
    pub node_id: String,
    pub node_name: String,
    pub weight: String,
    pub seeds: String,
    pub log_level: String,
    pub stats_interval_secs: u64,
    pub cluster: Config,
}

impl ServerConfig {
    /// Load configuration from environment variables, applying defaults
    /// where a variable is absent or unparseable.
    pub fn from_env() -> Self {
        let peer = PeerOptions {
            max_idle: env_parse("STARLING_MAX_IDLE", 8),
            max_active: env_parse("STARLING_MAX_ACTIVE", 64),
            max_concurrent_streams: env_parse("STARLING_MAX_STREAMS", 64),
            reuse: env_parse("STARLING_REUSE", true),
            message_queue_size: env_parse("STARLING_QUEUE_SIZE", 128),
        };
        Self {
            node_id: env_str("STARLING_NODE_ID", &Uuid::new_v4().to_string()),
            node_name: env_str("STARLING_NODE_NAME", DEFAULT_SERVICE),
            weight: env_str("STARLING_WEIGHT", "1"),
            seeds: env_str("STARLING_SEEDS", ""),
            log_level: env_str("STARLING_LOG_LEVEL", "info"),
            stats_interval_secs: env_parse("STARLING_STATS_INTERVAL_SECS", 30),
            cluster: Config {
                addr: env_str("STARLING_ADDR", ""),
                port: env_parse("STARLING_PORT", 7350),
                domain: env_str("STARLING_DOMAIN", ""),
                prefix: env_str("STARLING_PREFIX", "/starling/"),
                retransmit_mult: env_parse("STARLING_RETRANSMIT_MULT", 4),
                peer,
            },
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => match v.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                eprintln!("WARNING: env var {key}={v:?} is not valid; using default");
                default
            }
        },
        Err(_) => default,
    }
}
