//! Command Payloads
//!
//! Every command exchanged between the network core and a local coordinator
//! is one variant of [`BaseCommand`]. The variant index doubles as the wire
//! type tag, so adding a variant anywhere but the end breaks interop.
//!
//! # Command Types
//!
//! | Variant | Direction | Transaction mode |
//! |---------|-----------|------------------|
//! | `Sync` | node → core | CREATE / SINGLE |
//! | `Provision` | core → node | CREATE |
//! | `ProvisionResponse` | node → core | COMPLETE |
//! | `PackageRequest` | node → core | CREATE |
//! | `PackageResponse` | core → node | COMPLETE |
//! | `Deprovision` | core → node | SINGLE |
//! | `ServerShutdown` | node → core | SINGLE |
//! | `Shutdown` | core → node | SINGLE |

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════════
// COMMAND TYPE
// ════════════════════════════════════════════════════════════════════════════════

/// Plain type tag of a [`BaseCommand`], used for logging and correlation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    Sync,
    Provision,
    ProvisionResponse,
    PackageRequest,
    PackageResponse,
    Deprovision,
    ServerShutdown,
    Shutdown,
}

impl CommandType {
    /// Wire name of the command type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandType::Sync => "SYNC",
            CommandType::Provision => "PROVISION",
            CommandType::ProvisionResponse => "PROVISION_RESPONSE",
            CommandType::PackageRequest => "PACKAGE_REQUEST",
            CommandType::PackageResponse => "PACKAGE_RESPONSE",
            CommandType::Deprovision => "DEPROVISION",
            CommandType::ServerShutdown => "SERVER_SHUTDOWN",
            CommandType::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SHARED PAYLOAD TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// Identifier and version of a package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageMeta {
    pub id: String,
    pub version: String,
}

impl PackageMeta {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// Package metadata plus its binary content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageData {
    pub meta: PackageMeta,
    pub data: Vec<u8>,
}

impl fmt::Debug for PackageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageData")
            .field("meta", &self.meta)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Advertised capacity entry (e.g. memory or CPU units).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: u64,
}

/// Opaque name/value pair forwarded verbatim to the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// Description of a workload instance as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub package: PackageMeta,
    pub properties: Vec<Property>,
}

impl ServerDescriptor {
    /// Collects `properties` into a map. Later duplicates win.
    #[must_use]
    pub fn property_map(&self) -> HashMap<String, String> {
        self.properties
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COMMAND PAYLOADS
// ════════════════════════════════════════════════════════════════════════════════

/// Full self-description sent by a local coordinator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub name: Option<String>,
    pub resources: Vec<Resource>,
    pub attributes: Vec<String>,
    pub servers: Vec<ServerDescriptor>,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provision {
    pub server: ServerDescriptor,
}

/// Acknowledgement of a `Provision`. The server it refers to is the one
/// carried by the PROVISION stored in the same transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    pub ok: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub package: PackageMeta,
}

/// Reply to a `PackageRequest`. `data` is absent when `ok` is false.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResponse {
    pub ok: bool,
    pub data: Option<PackageData>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprovision {
    pub server_id: String,
    pub force: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerShutdown {
    pub server_id: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// BASE COMMAND
// ════════════════════════════════════════════════════════════════════════════════

/// Tagged union over every command of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseCommand {
    Sync(SyncState),
    Provision(Provision),
    ProvisionResponse(ProvisionResponse),
    PackageRequest(PackageRequest),
    PackageResponse(PackageResponse),
    Deprovision(Deprovision),
    ServerShutdown(ServerShutdown),
    Shutdown,
}

impl BaseCommand {
    /// Returns the type tag of this command.
    #[must_use]
    pub const fn command_type(&self) -> CommandType {
        match self {
            BaseCommand::Sync(_) => CommandType::Sync,
            BaseCommand::Provision(_) => CommandType::Provision,
            BaseCommand::ProvisionResponse(_) => CommandType::ProvisionResponse,
            BaseCommand::PackageRequest(_) => CommandType::PackageRequest,
            BaseCommand::PackageResponse(_) => CommandType::PackageResponse,
            BaseCommand::Deprovision(_) => CommandType::Deprovision,
            BaseCommand::ServerShutdown(_) => CommandType::ServerShutdown,
            BaseCommand::Shutdown => CommandType::Shutdown,
        }
    }

    /// Server id carried by a `Provision`, if this is one.
    #[must_use]
    pub fn provisioned_server_id(&self) -> Option<&str> {
        match self {
            BaseCommand::Provision(p) => Some(p.server.id.as_str()),
            _ => None,
        }
    }
}
