//! Message authentication: keyed HMAC-SHA3-256 over serialized payloads.
//!
//! Every frame exchanged with a local coordinator carries a tag computed with
//! the secret shared with that coordinator only. Verification recomputes the
//! tag and compares in constant time; nothing in a payload is acted upon
//! before it verifies.

use std::fmt;

use hmac::{Hmac, Mac};
use playpen_proto::AuthenticatedFrame;
use sha3::Sha3_256;
use thiserror::Error;

type HmacSha3_256 = Hmac<Sha3_256>;

/// Length of an authentication tag in bytes.
pub const TAG_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("shared key is empty")]
    EmptyKey,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

// ════════════════════════════════════════════════════════════════════════════
// SHARED KEY
// ════════════════════════════════════════════════════════════════════════════

/// Secret bytes shared between the network core and one coordinator.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SharedKey(Vec<u8>);

impl SharedKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, AuthError> {
        Ok(Self(hex::decode(hexstr.trim())?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey(<{} bytes>)", self.0.len())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// AUTH CODEC
// ════════════════════════════════════════════════════════════════════════════

/// Stateless signer/verifier for frame payloads.
pub struct AuthCodec;

impl AuthCodec {
    fn mac(key: &SharedKey) -> Result<HmacSha3_256, AuthError> {
        if key.is_empty() {
            return Err(AuthError::EmptyKey);
        }
        HmacSha3_256::new_from_slice(key.as_bytes())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))
    }

    /// Compute the tag of `payload` under `key`.
    ///
    /// # Errors
    ///
    /// `AuthError::EmptyKey` if the key has no bytes.
    pub fn sign(key: &SharedKey, payload: &[u8]) -> Result<[u8; TAG_LEN], AuthError> {
        let mut mac = Self::mac(key)?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Recompute the tag of `payload` and compare it against `tag` in
    /// constant time. Any failure, including an empty key, yields `false`.
    pub fn verify(key: &SharedKey, payload: &[u8], tag: &[u8]) -> bool {
        match Self::mac(key) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(tag).is_ok()
            }
            Err(_) => false,
        }
    }

    /// Sign `payload` and wrap it into a frame addressed to `coordinator_id`.
    pub fn seal(
        coordinator_id: &str,
        key: &SharedKey,
        payload: Vec<u8>,
    ) -> Result<AuthenticatedFrame, AuthError> {
        let tag = Self::sign(key, &payload)?;
        Ok(AuthenticatedFrame::new(coordinator_id, tag.to_vec(), payload))
    }

    pub fn verify_frame(frame: &AuthenticatedFrame, key: &SharedKey) -> bool {
        Self::verify(key, &frame.payload, &frame.hash)
    }
}
