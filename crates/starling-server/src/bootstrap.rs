//! Cluster bootstrapping: seed parsing and registry pre-population.
//!
//! A demo node learns its initial peers from `STARLING_SEEDS` instead of a
//! live discovery backend. Seeds enter the registry in the `WaitReady`
//! state and are replaced wholesale once a real snapshot arrives.

use std::collections::HashMap;

use tracing::info;

use starling_cluster::{LocalPeer, Meta, NodeType};

/// Parse a single seed entry.
///
/// Accepted formats:
///   `"id@host:port"` maps to (id, addr)
///   `"host:port"`    maps to (addr, addr), the address doubling as id
pub fn parse_seed(s: &str) -> (&str, &str) {
    match s.find('@') {
        Some(at) => (&s[..at], &s[at + 1..]),
        None => (s, s),
    }
}

/// Turn a CSV seed list into registry records under `name`.
pub fn seed_metas(seeds_csv: &str, name: &str) -> Vec<Meta> {
    seeds_csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            let (id, addr) = parse_seed(raw);
            Meta::new(id, name, addr, NodeType::Primary, HashMap::new())
        })
        .collect()
}

/// Register the local node and every seed peer.
pub fn seed_registry(peers: &LocalPeer, local: &Meta, seeds_csv: &str) {
    peers.upsert(local.clone());
    for seed in seed_metas(seeds_csv, &local.name) {
        info!(id = %seed.id, addr = %seed.addr, "seed peer registered");
        peers.upsert(seed);
    }
}
