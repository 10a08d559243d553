//! Server runtime: the inbound half of a cluster member.
//!
//! [`Server`] owns this node's self-description and a registry view, and
//! serves the two-method `ApiServer` RPC surface, demultiplexing unary
//! calls to `Delegate::call` and stream messages to `Delegate::stream` /
//! `Delegate::on_stream_close`.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use starling_api::pb::api_server_server::{ApiServer, ApiServerServer};
use starling_api::pb::Envelope;

use crate::config::Config;
use crate::delegate::{Delegate, SharedDelegate};
use crate::error::ClusterError;
use crate::meta::Meta;
use crate::peer::LocalPeer;

fn to_status(err: ClusterError) -> Status {
    match err {
        ClusterError::Rpc(status) => status,
        ClusterError::UnknownPeer(id) => Status::not_found(format!("unknown peer '{id}'")),
        ClusterError::Cancelled => Status::cancelled("operation cancelled"),
        ClusterError::Malformed(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}

/// Inbound cluster runtime for one node.
pub struct Server {
    meta: Meta,
    peers: Arc<LocalPeer>,
    delegate: SharedDelegate,
    queue_size: usize,
}

impl Server {
    /// Create a server runtime with its own registry.
    pub fn new(meta: Meta, config: &Config) -> Self {
        Self::with_peers(meta, LocalPeer::new(config.peer.clone()), config)
    }

    /// Create a server runtime sharing an existing registry (typical when a
    /// client runtime lives in the same process).
    pub fn with_peers(meta: Meta, peers: Arc<LocalPeer>, config: &Config) -> Self {
        Self {
            meta,
            peers,
            delegate: Arc::new(RwLock::new(None)),
            queue_size: config.peer.message_queue_size,
        }
    }

    /// The registry view of the cluster.
    pub fn get_peers(&self) -> Arc<LocalPeer> {
        self.peers.clone()
    }

    /// This node's self-description.
    pub fn get_meta(&self) -> Meta {
        self.meta.clone()
    }

    /// Install the inbound handler. The last registration wins.
    pub fn on_delegate(&self, delegate: Arc<dyn Delegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Wrap the runtime in the generated tonic service, ready for
    /// `tonic::transport::Server::builder().add_service(..)`.
    pub fn into_service(&self) -> ApiServerServer<ApiService> {
        ApiServerServer::new(ApiService {
            delegate: self.delegate.clone(),
            queue_size: self.queue_size,
        })
    }

    /// Serve the RPC surface on `addr` until the task is cancelled.
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        info!(%addr, id = %self.meta.id, "cluster rpc server listening");
        tonic::transport::Server::builder()
            .add_service(self.into_service())
            .serve(addr)
            .await
    }
}

// ─────────────────────────────────────────────
// ApiService
// ─────────────────────────────────────────────

/// Generated-service implementation backing [`Server`].
pub struct ApiService {
    delegate: SharedDelegate,
    queue_size: usize,
}

impl ApiService {
    fn handler(&self) -> Result<Arc<dyn Delegate>, Status> {
        self.delegate
            .read()
            .clone()
            .ok_or_else(|| Status::unimplemented("no delegate registered"))
    }
}

#[tonic::async_trait]
impl ApiServer for ApiService {
    async fn call(&self, request: Request<Envelope>) -> Result<Response<Envelope>, Status> {
        let delegate = self.handler()?;
        let reply = delegate
            .call(request.into_inner())
            .await
            .map_err(to_status)?;
        Ok(Response::new(reply))
    }

    type StreamStream = ReceiverStream<Result<Envelope, Status>>;

    async fn stream(
        &self,
        request: Request<Streaming<Envelope>>,
    ) -> Result<Response<Self::StreamStream>, Status> {
        let delegate = self.handler()?;
        let mut inbound = request.into_inner();

        let (reply_tx, reply_rx) = mpsc::channel(self.queue_size);
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(self.queue_size);

        // The delegate writes plain envelopes; adapt them to the transport.
        let forward = reply_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if forward.send(Ok(envelope)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(envelope)) => {
                        if let Err(e) = delegate.stream(out_tx.clone(), envelope).await {
                            warn!(error = %e, "stream handler failed");
                            let _ = reply_tx.send(Err(to_status(e))).await;
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        debug!(error = %status, "inbound stream ended with error");
                        break;
                    }
                }
            }
            delegate.on_stream_close();
        });

        Ok(Response::new(ReceiverStream::new(reply_rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_errors_map_to_grpc_codes() {
        assert_eq!(
            to_status(ClusterError::UnknownPeer("x".into())).code(),
            tonic::Code::NotFound
        );
        assert_eq!(to_status(ClusterError::Cancelled).code(), tonic::Code::Cancelled);
        assert_eq!(
            to_status(ClusterError::Malformed("bad".into())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            to_status(ClusterError::PoolExhausted("p".into())).code(),
            tonic::Code::Internal
        );
        let passthrough = to_status(ClusterError::Rpc(Status::unavailable("down")));
        assert_eq!(passthrough.code(), tonic::Code::Unavailable);
    }
}
