//! # starling-api
//!
//! Wire schema for the starling cluster runtime, generated from
//! `proto/cluster.proto` by `tonic-build`.
//!
//! The schema is deliberately small:
//!
//! | Type        | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | `Envelope`  | Request/response/stream message with a payload `oneof` |
//! | `Bytes`     | Opaque application payload                             |
//! | `Error`     | Remote failure with code, message, and context map     |
//! | `NodeStatus`| Gossip broadcast emitted on node status changes        |
//! | `ApiServer` | The two-method RPC surface: unary `Call`, bidi `Stream`|
//!
//! Everything above the envelope (routing, membership, pooling) lives in
//! `starling-cluster`.

// Generated protobuf / tonic code (compiled by build.rs)
#[allow(clippy::all)]
#[allow(clippy::pedantic)]
pub mod proto {
    pub mod cluster {
        tonic::include_proto!("starling.cluster");
    }
}

/// Encoded protobuf file descriptor set, used to register gRPC reflection.
pub const CLUSTER_DESCRIPTOR: &[u8] =
    tonic::include_file_descriptor_set!("cluster_descriptor");

pub mod envelope;

pub use proto::cluster as pb;
