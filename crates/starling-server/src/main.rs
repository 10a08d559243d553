//! Starling demo node.
//!
//! Reads configuration from environment variables (see [`config::ServerConfig`]),
//! registers itself and any seed peers in a fresh registry, then serves the
//! cluster RPC surface until SIGINT. A periodic stats tick pings a ring-routed
//! peer and logs operation counters.
//!
//! ## Quick start
//!
//! ```bash
//! # First node
//! STARLING_PORT=7350 cargo run --bin starling-server
//!
//! # Second node, seeded with the first
//! STARLING_PORT=7351 \
//! STARLING_SEEDS=node-a@127.0.0.1:7350 \
//!   cargo run --bin starling-server
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use starling_cluster::pb::Envelope;
use starling_cluster::{Meta, NodeType, Server, VAR_WEIGHT};

mod bootstrap;
mod config;
mod delegate;
mod metrics;

use config::ServerConfig;
use delegate::LoggingDelegate;
use metrics::OperationMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        id = %config.node_id,
        name = %config.node_name,
        port = config.cluster.port,
        "starling node starting"
    );

    // ── Self-description ─────────────────────────────────────────────────────
    let mut vars = HashMap::new();
    vars.insert(VAR_WEIGHT.to_string(), config.weight.clone());
    let meta = Meta::from_config(
        &config.node_id,
        &config.node_name,
        NodeType::Primary,
        vars,
        &config.cluster,
    );
    info!(addr = %meta.addr, "advertised endpoint");

    // ── Runtime wiring ───────────────────────────────────────────────────────
    let server = Server::new(meta.clone(), &config.cluster);
    let metrics = Arc::new(OperationMetrics::new());
    server.on_delegate(Arc::new(LoggingDelegate::new(
        config.node_name.clone(),
        metrics.clone(),
    )));
    bootstrap::seed_registry(&server.get_peers(), &meta, &config.seeds);

    // ── Stats tick ───────────────────────────────────────────────────────────
    // Pings a ring-routed peer so the transport path stays exercised, then
    // logs the counters.
    if config.stats_interval_secs > 0 {
        let peers = server.get_peers();
        let metrics_tick = metrics.clone();
        let service = config.node_name.clone();
        let local_id = config.node_id.clone();
        let interval = Duration::from_secs(config.stats_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut seq: u64 = 0;
            loop {
                ticker.tick().await;
                seq += 1;

                if let Some(target) = peers.get_with_hash_ring(&service, "heartbeat") {
                    let ping = Envelope::with_bytes(seq, local_id.clone(), b"ping".to_vec());
                    match peers.send(&target, ping).await {
                        Ok(reply) => {
                            info!(target = %target.id, reply_from = %reply.node, "heartbeat ok")
                        }
                        Err(e) => {
                            metrics_tick.errors.fetch_add(1, Ordering::Relaxed);
                            warn!(target = %target.id, error = %e, "heartbeat failed");
                        }
                    }
                }
                metrics_tick.log_report(peers.size());
            }
        });
    } else {
        info!("stats tick disabled (STARLING_STATS_INTERVAL_SECS=0)");
    }

    // ── gRPC server ──────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("0.0.0.0:{}", config.cluster.port).parse()?;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(starling_api::CLUSTER_DESCRIPTOR)
        .build_v1()
        .expect("failed to build gRPC reflection service");

    info!(%addr, "rpc server listening");

    tokio::select! {
        result = tonic::transport::Server::builder()
            .add_service(reflection)
            .add_service(server.into_service())
            .serve(addr) =>
        {
            if let Err(e) = result {
                error!(error = %e, "rpc server error");
                return Err(anyhow::anyhow!("{e}"));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    server.get_peers().reset();
    info!("starling node stopped");
    Ok(())
}
