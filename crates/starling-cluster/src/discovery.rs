//! Discovery snapshot feed.
//!
//! The discovery backend (a strongly consistent KV store) is an external
//! collaborator; the runtime only consumes its observed interface, a lazy
//! restartable sequence of `{id -> serialized meta}` snapshots. Each
//! complete snapshot is reconciled into the registry with
//! [`LocalPeer::sync`]; partial snapshots are ignored so a stale listing
//! never causes spurious deletions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::meta::Meta;
use crate::peer::LocalPeer;

/// One complete-or-partial listing of active node records.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Only complete snapshots are applied.
    pub complete: bool,
    /// `id -> serialized Meta` as stored in the discovery backend.
    pub records: HashMap<String, Vec<u8>>,
}

impl Snapshot {
    pub fn complete(records: HashMap<String, Vec<u8>>) -> Self {
        Self { complete: true, records }
    }
}

/// The discovery backend's observed interface.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// The next snapshot, or `None` once the feed is closed.
    async fn next(&mut self) -> Option<Snapshot>;
}

/// Reconcile one snapshot into the registry.
///
/// Malformed records are skipped with a warning and the remainder of the
/// snapshot is still applied.
pub fn apply_snapshot(peers: &LocalPeer, snapshot: Snapshot) {
    if !snapshot.complete {
        debug!("skipping partial discovery snapshot");
        return;
    }

    let mut nodes = Vec::with_capacity(snapshot.records.len());
    for (id, raw) in &snapshot.records {
        match Meta::from_json(raw) {
            Ok(meta) => nodes.push(meta),
            Err(e) => warn!(id = %id, error = %e, "skipping malformed discovery record"),
        }
    }
    peers.sync(nodes);
}

/// Consume the feed until it closes or `stop` fires.
pub(crate) fn spawn_watcher<D: Discovery>(
    mut discovery: D,
    peers: Arc<LocalPeer>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                snapshot = discovery.next() => match snapshot {
                    Some(snapshot) => apply_snapshot(&peers, snapshot),
                    None => break,
                }
            }
        }
        debug!("discovery watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerOptions;
    use crate::meta::{MetaStatus, NodeType};

    fn record(id: &str, name: &str) -> (String, Vec<u8>) {
        let meta = Meta::new(id, name, "127.0.0.1:7350", NodeType::Primary, HashMap::new());
        (id.to_string(), meta.to_json().unwrap())
    }

    #[test]
    fn complete_snapshot_is_applied() {
        let peers = LocalPeer::new(PeerOptions::default());
        let records: HashMap<_, _> = [record("a", "svc"), record("b", "svc")].into();
        apply_snapshot(&peers, Snapshot::complete(records));

        assert_eq!(peers.size(), 2);
        assert_eq!(peers.size_by_name("svc"), 2);
    }

    #[test]
    fn partial_snapshot_is_ignored() {
        let peers = LocalPeer::new(PeerOptions::default());
        apply_snapshot(&peers, Snapshot::complete([record("a", "svc")].into()));

        // A partial listing must not delete anything.
        let partial = Snapshot { complete: false, records: HashMap::new() };
        apply_snapshot(&peers, partial);
        assert_eq!(peers.size(), 1);
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let peers = LocalPeer::new(PeerOptions::default());
        let mut records: HashMap<_, _> = [record("a", "svc")].into();
        records.insert("broken".to_string(), b"not json".to_vec());
        apply_snapshot(&peers, Snapshot::complete(records));

        assert_eq!(peers.size(), 1);
        assert!(peers.get("a").is_some());
    }

    #[test]
    fn absent_ids_are_removed_on_next_snapshot() {
        let peers = LocalPeer::new(PeerOptions::default());
        apply_snapshot(&peers, Snapshot::complete([record("a", "svc"), record("b", "svc")].into()));
        apply_snapshot(&peers, Snapshot::complete([record("b", "svc")].into()));

        assert!(peers.get("a").is_none());
        assert_eq!(peers.get("b").unwrap().status, MetaStatus::WaitReady);
    }

    #[tokio::test]
    async fn watcher_applies_until_feed_closes() {
        struct FeedOnce(Option<Snapshot>);

        #[async_trait]
        impl Discovery for FeedOnce {
            async fn next(&mut self) -> Option<Snapshot> {
                self.0.take()
            }
        }

        let peers = LocalPeer::new(PeerOptions::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let snapshot = Snapshot::complete([record("a", "svc")].into());
        let handle = spawn_watcher(FeedOnce(Some(snapshot)), peers.clone(), stop_rx);

        handle.await.unwrap();
        assert_eq!(peers.size(), 1);
    }
}
