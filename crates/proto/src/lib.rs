//! # Playpen Proto Crate
//!
//! Wire contract between the network core and the local coordinators it
//! manages.
//!
//! ## Modules
//!
//! - [`command`]: `BaseCommand` tagged union and its payload structs
//! - [`transaction`]: `Transaction` envelope and `TransactionMode`
//! - [`frame`]: `AuthenticatedFrame`, the signed unit written to a connection
//! - [`encoding`]: deterministic bincode encode/decode helpers
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ AuthenticatedFrame { coordinator_id, hash,   │
//! │                      payload ───────────┐    │
//! └─────────────────────────────────────────┼────┘
//!                                           ▼
//!              ┌────────────────────────────────────┐
//!              │ Transaction { id, mode, command ─┐ │
//!              └──────────────────────────────────┼─┘
//!                                                 ▼
//!                         ┌───────────────────────────────┐
//!                         │ BaseCommand::{Sync, Provision, │
//!                         │   ProvisionResponse, ...}      │
//!                         └───────────────────────────────┘
//! ```

pub mod command;
pub mod encoding;
pub mod frame;
pub mod transaction;

pub use command::{
    BaseCommand, CommandType, Deprovision, PackageData, PackageMeta, PackageRequest,
    PackageResponse, Property, Provision, ProvisionResponse, Resource, ServerDescriptor,
    ServerShutdown, SyncState,
};
pub use encoding::{decode_frame, decode_transaction, encode_frame, encode_transaction, DecodeError};
pub use frame::AuthenticatedFrame;
pub use transaction::{Transaction, TransactionMode};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;
