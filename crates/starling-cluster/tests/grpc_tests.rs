//! End-to-end tests for the RPC transport: unary calls, stream lifecycle,
//! and purge semantics against a real in-process gRPC server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;

use starling_cluster::pb::Envelope;
use starling_cluster::{
    ClusterError, Config, Delegate, LocalPeer, Meta, NodeType, PeerOptions, Server,
    DEFAULT_SERVICE,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Echoes every unary call and stream message back to the sender.
struct EchoDelegate;

#[async_trait]
impl Delegate for EchoDelegate {
    fn local_state(&self, _join: bool) -> Vec<u8> {
        Vec::new()
    }
    fn merge_remote_state(&self, _buf: &[u8], _join: bool) {}
    fn notify_join(&self, _meta: &Meta) {}
    fn notify_leave(&self, _meta: &Meta) {}
    fn notify_update(&self, _meta: &Meta) {}
    fn notify_msg(
        &self,
        _sender: &str,
        _envelope: Envelope,
    ) -> Result<Option<Envelope>, ClusterError> {
        Ok(None)
    }
    async fn call(&self, mut envelope: Envelope) -> Result<Envelope, ClusterError> {
        envelope.node = "echo".to_string();
        Ok(envelope)
    }
    async fn stream(
        &self,
        out: mpsc::Sender<Envelope>,
        mut envelope: Envelope,
    ) -> Result<(), ClusterError> {
        envelope.node = "echo".to_string();
        out.send(envelope)
            .await
            .map_err(|_| ClusterError::Cancelled)
    }
    fn on_stream_close(&self) {}
}

/// Start an echo server on an ephemeral port and return its address.
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let meta = Meta::new(
        "echo",
        DEFAULT_SERVICE,
        addr.to_string(),
        NodeType::Primary,
        HashMap::new(),
    );
    let server = Server::new(meta, &Config::default());
    server.on_delegate(Arc::new(EchoDelegate));
    let service = server.into_service();

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

fn peer_meta(id: &str, addr: SocketAddr) -> Meta {
    Meta::new(id, DEFAULT_SERVICE, addr.to_string(), NodeType::Primary, HashMap::new())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn unary_call_roundtrips() {
    let addr = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let target = peer_meta("p1", addr);
    peers.sync(vec![target.clone()]);

    let reply = peers
        .send(&target, Envelope::with_bytes(42, "me", vec![0xAB]))
        .await
        .unwrap();
    assert_eq!(reply.id, 42);
    assert_eq!(reply.node, "echo");
    assert_eq!(reply.bytes_payload(), Some(&[0xABu8][..]));
    assert!(peers.has_transport("p1"));
}

#[tokio::test]
async fn delete_purges_transport_and_rejects_sends() {
    let addr = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let target = peer_meta("p1", addr);
    peers.sync(vec![target.clone()]);

    peers
        .send(&target, Envelope::with_bytes(1, "me", vec![]))
        .await
        .unwrap();
    assert!(peers.has_transport("p1"));

    peers.delete("p1");
    assert!(!peers.has_transport("p1"));

    let err = peers
        .send(&target, Envelope::with_bytes(2, "me", vec![]))
        .await
        .unwrap_err();
    assert!(err.is_unknown_peer());
}

#[tokio::test]
async fn stream_is_a_singleton_per_client_id() {
    let addr = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let target = peer_meta("p1", addr);
    peers.sync(vec![target.clone()]);

    let (created, receiver) = peers
        .send_stream("c1", &target, Envelope::with_bytes(1, "me", vec![]), MetadataMap::new())
        .await
        .unwrap();
    assert!(created);
    let mut receiver = receiver.expect("first open returns the receive channel");

    let first = timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(first.id, 1);

    let (created, none) = peers
        .send_stream("c1", &target, Envelope::with_bytes(2, "me", vec![]), MetadataMap::new())
        .await
        .unwrap();
    assert!(!created);
    assert!(none.is_none());

    // The second message arrives on the same logical stream.
    let second = timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(second.id, 2);
    assert!(peers.has_stream("c1"));
}

#[tokio::test]
async fn deleting_the_peer_closes_its_streams() {
    let addr = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let target = peer_meta("p1", addr);
    peers.sync(vec![target.clone()]);

    let (_, receiver) = peers
        .send_stream("c1", &target, Envelope::with_bytes(1, "me", vec![]), MetadataMap::new())
        .await
        .unwrap();
    let mut receiver = receiver.unwrap();
    timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap().unwrap();

    peers.delete("p1");

    // Cancellation closes the caller channel within bounded time.
    let end = timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap();
    assert!(end.is_none());
    wait_until(|| !peers.has_stream("c1")).await;
}

#[tokio::test]
async fn sync_reshuffle_keeps_surviving_pools() {
    let addr_a = start_echo_server().await;
    let addr_b = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let a = peer_meta("a", addr_a);
    let b = peer_meta("b", addr_b);
    peers.sync(vec![a.clone(), b.clone()]);

    peers.send(&a, Envelope::with_bytes(1, "me", vec![])).await.unwrap();
    peers.send(&b, Envelope::with_bytes(2, "me", vec![])).await.unwrap();
    assert!(peers.has_transport("a") && peers.has_transport("b"));

    // A drops out, d appears; b's pool must survive untouched.
    let d = peer_meta("d", addr_a);
    peers.sync(vec![b.clone(), d.clone()]);
    assert!(!peers.has_transport("a"));
    assert!(peers.has_transport("b"));
    assert!(!peers.has_transport("d"));

    // d's transport is created lazily on first use.
    peers.send(&d, Envelope::with_bytes(3, "me", vec![])).await.unwrap();
    assert!(peers.has_transport("d"));
}

#[tokio::test]
async fn reset_cancels_all_streams() {
    let addr = start_echo_server().await;
    let peers = LocalPeer::new(PeerOptions::default());
    let target = peer_meta("p1", addr);
    peers.sync(vec![target.clone()]);

    let (_, receiver) = peers
        .send_stream("c1", &target, Envelope::with_bytes(1, "me", vec![]), MetadataMap::new())
        .await
        .unwrap();
    let mut receiver = receiver.unwrap();
    timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap().unwrap();

    peers.reset();
    assert_eq!(peers.size(), 0);

    let end = timeout(RECV_TIMEOUT, receiver.recv()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn saturated_pool_with_reuse_shares_a_channel() {
    let addr = start_echo_server().await;
    let options = PeerOptions {
        max_idle: 1,
        max_active: 1,
        max_concurrent_streams: 1,
        reuse: true,
        ..PeerOptions::default()
    };
    let pool = starling_cluster::ChannelPool::new("p", &addr.to_string(), options).unwrap();

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_eq!(pool.len(), 1);
    drop(first);
    drop(second);
}

#[tokio::test]
async fn saturated_pool_without_reuse_hands_out_one_shots_then_fails() {
    let addr = start_echo_server().await;
    let options = PeerOptions {
        max_idle: 1,
        max_active: 1,
        max_concurrent_streams: 1,
        reuse: false,
        ..PeerOptions::default()
    };
    let pool = starling_cluster::ChannelPool::new("p", &addr.to_string(), options).unwrap();

    let pooled = pool.acquire().await.unwrap();
    let one_shot = pool.acquire().await.unwrap();
    assert_eq!(pool.len(), 1);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, ClusterError::PoolExhausted(_)));

    // Releasing the one-shot frees its slot.
    drop(one_shot);
    let again = pool.acquire().await.unwrap();
    drop(again);
    drop(pooled);
}
