//! # Playpen Coordinator Crate
//!
//! Network core of the control plane. It keeps an authoritative view of
//! every local coordinator (a node agent) and the servers each one runs, and
//! drives them through an authenticated, transaction-correlated protocol.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                             NETWORK CORE                              │
//! │                                                                       │
//! │  Connection ──▶ spawn_reader ──▶ ┌───────────┐                        │
//! │  (one per node)                  │  Network  │──▶ AuthCodec (verify)  │
//! │                                  │  facade   │                        │
//! │  host ─ send_provision ────────▶ └─────┬─────┘                        │
//! │         send_deprovision               │                              │
//! │         send_shutdown                  ▼                              │
//! │                        ┌────────────────────────────┐                 │
//! │                        │     TransactionStore       │                 │
//! │                        │  (id → TransactionInfo)    │◀── sweeper      │
//! │                        └─────────────┬──────────────┘                 │
//! │                                      ▼                                │
//! │                        ┌────────────────────────────┐                 │
//! │                        │  dispatcher (process_*)    │──▶ resolver     │
//! │                        └─────────────┬──────────────┘                 │
//! │                                      ▼                                │
//! │                        ┌────────────────────────────┐                 │
//! │                        │ FleetState                 │                 │
//! │                        │  id → Mutex<Coordinator>   │                 │
//! │                        └────────────────────────────┘                 │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`network`] | facade: `send`, `receive`, `process`, connection lifecycle |
//! | [`dispatcher`] | one handler per protocol command |
//! | [`fleet`] | coordinator and server records |
//! | [`transaction`] | open transaction tracking and correlation |
//! | [`sweeper`] | timeout of abandoned transactions, runtime builder |
//! | [`package`] | package resolution seam |
//! | [`transport`] | connection seam |
//! | [`error`] | `NetworkError` taxonomy |
//!
//! ## Concurrency
//!
//! Inbound frames of one connection are processed in delivery order.
//! Different coordinators are handled concurrently; their records never
//! share a lock. No lock is held across a connection write.

pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod ids;
pub mod network;
pub mod package;
pub mod sweeper;
pub mod transaction;
pub mod transport;

pub use error::{ErrorKind, NetworkError, Result};
pub use fleet::{Coordinator, CoordinatorHandle, CoordinatorSnapshot, FleetState, Server};
pub use ids::IdGenerator;
pub use network::Network;
pub use package::{LocalPackageRepository, Package, PackageResolver};
pub use sweeper::build_runtime;
pub use transaction::{TransactionInfo, TransactionStore};
pub use transport::{ChannelConnection, Connection, TransportError};
