//! Serialization Helpers
//!
//! Deterministic bincode encoding for [`Transaction`] and
//! [`AuthenticatedFrame`]. The same input always produces identical bytes,
//! which is what the authentication tag is computed over.

use thiserror::Error;

use crate::frame::AuthenticatedFrame;
use crate::transaction::Transaction;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input was empty.
    #[error("decode failed: empty data")]
    EmptyData,

    /// Bytes could not be decoded (truncated, unknown tag, bad utf-8, ...).
    #[error("decode failed: {0}")]
    Malformed(String),

    /// Value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Encode a transaction to bytes.
///
/// # Errors
///
/// `DecodeError::Encode` if bincode refuses the value.
pub fn encode_transaction(transaction: &Transaction) -> Result<Vec<u8>, DecodeError> {
    bincode::serialize(transaction).map_err(|e| DecodeError::Encode(e.to_string()))
}

/// Decode bytes produced by [`encode_transaction`].
///
/// # Roundtrip Guarantee
///
/// `decode_transaction(&encode_transaction(t)?) == t` for every transaction.
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyData);
    }
    bincode::deserialize(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encode a whole frame, for transports that ship frames as byte blobs.
pub fn encode_frame(frame: &AuthenticatedFrame) -> Result<Vec<u8>, DecodeError> {
    bincode::serialize(frame).map_err(|e| DecodeError::Encode(e.to_string()))
}

pub fn decode_frame(bytes: &[u8]) -> Result<AuthenticatedFrame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyData);
    }
    bincode::deserialize(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
}
