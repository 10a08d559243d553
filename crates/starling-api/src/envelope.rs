//! Constructors and accessors for [`Envelope`] payload variants.

use crate::pb::{envelope::Payload, Bytes, Envelope, Error};

impl Envelope {
    /// Build an envelope carrying an opaque application payload.
    pub fn with_bytes(id: u64, node: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id,
            node: node.into(),
            payload: Some(Payload::Bytes(Bytes { content })),
        }
    }

    /// Build an envelope carrying a serialized realtime message.
    pub fn with_realtime(id: u64, node: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            id,
            node: node.into(),
            payload: Some(Payload::Realtime(raw)),
        }
    }

    /// Build an envelope carrying a remote error.
    pub fn with_error(id: u64, node: impl Into<String>, error: Error) -> Self {
        Self {
            id,
            node: node.into(),
            payload: Some(Payload::Error(error)),
        }
    }

    /// The opaque payload, when this envelope carries one.
    pub fn bytes_payload(&self) -> Option<&[u8]> {
        match &self.payload {
            Some(Payload::Bytes(b)) => Some(&b.content),
            _ => None,
        }
    }

    /// The error payload, when this envelope carries one.
    pub fn error_payload(&self) -> Option<&Error> {
        match &self.payload {
            Some(Payload::Error(e)) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Default::default(),
        }
    }
}
