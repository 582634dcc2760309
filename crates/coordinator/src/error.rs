//! Error taxonomy of the network core.
//!
//! Every dispatcher and facade operation returns `Result<_, NetworkError>`.
//! Failures are logged where they are detected and any partial effect is
//! undone by the same call path before the error is returned.

use playpen_common::AuthError;
use playpen_proto::{CommandType, DecodeError};
use thiserror::Error;

use crate::transport::TransportError;

/// Coarse classification of a [`NetworkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Protocol,
    NotFound,
    Resolution,
    Serialization,
    Transport,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("unknown coordinator {0}")]
    UnknownCoordinator(String),

    #[error("unknown server {server_id} on coordinator {coordinator_id}")]
    UnknownServer {
        coordinator_id: String,
        server_id: String,
    },

    #[error("authentication failed for {coordinator_id}: {reason}")]
    AuthenticationFailed {
        coordinator_id: String,
        reason: String,
    },

    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("transaction {0} is already open")]
    DuplicateTransaction(String),

    #[error("{received} expects a previous {expected} in transaction {transaction_id}")]
    ProtocolMismatch {
        transaction_id: String,
        expected: CommandType,
        received: CommandType,
    },

    #[error("unexpected inbound command {0}")]
    UnexpectedCommand(CommandType),

    #[error("package {id} at {version} is not resolved")]
    UnresolvedPackage { id: String, version: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] DecodeError),

    #[error("coordinator {0} is not enabled")]
    CoordinatorDisabled(String),

    #[error("connection to coordinator {0} is absent or inactive")]
    ConnectionInactive(String),

    #[error("server registration failed on {coordinator_id}: {reason}")]
    Registration {
        coordinator_id: String,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl NetworkError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::AuthenticationFailed { .. } => ErrorKind::Authentication,
            NetworkError::UnknownTransaction(_)
            | NetworkError::DuplicateTransaction(_)
            | NetworkError::ProtocolMismatch { .. }
            | NetworkError::UnexpectedCommand(_) => ErrorKind::Protocol,
            NetworkError::UnknownCoordinator(_)
            | NetworkError::UnknownServer { .. }
            | NetworkError::Registration { .. } => ErrorKind::NotFound,
            NetworkError::UnresolvedPackage { .. } => ErrorKind::Resolution,
            NetworkError::Serialization(_) => ErrorKind::Serialization,
            NetworkError::CoordinatorDisabled(_)
            | NetworkError::ConnectionInactive(_)
            | NetworkError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub(crate) fn auth(coordinator_id: &str, err: AuthError) -> Self {
        NetworkError::AuthenticationFailed {
            coordinator_id: coordinator_id.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
