//! Authenticated Frame
//!
//! The only structure that crosses the wire. `payload` is an encoded
//! [`Transaction`](crate::Transaction); `hash` is a keyed integrity tag over
//! exactly those bytes, computed with the shared key of `coordinator_id`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedFrame {
    /// Claimed sender (inbound) or addressee (outbound) identity.
    pub coordinator_id: String,
    /// Keyed integrity tag over `payload`.
    pub hash: Vec<u8>,
    /// Encoded transaction bytes.
    pub payload: Vec<u8>,
}

impl AuthenticatedFrame {
    pub fn new(coordinator_id: impl Into<String>, hash: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            hash,
            payload,
        }
    }
}

impl fmt::Debug for AuthenticatedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedFrame")
            .field("coordinator_id", &self.coordinator_id)
            .field("hash_len", &self.hash.len())
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
