//! Command Dispatcher
//!
//! Protocol state machine of the core. Handlers here are the only code that
//! mutates [`FleetState`](crate::FleetState).
//!
//! # Transitions
//!
//! | Command | Direction | Effect |
//! |---------|-----------|--------|
//! | SYNC | in | disable, rebuild record wholesale, apply `enabled` last |
//! | PROVISION | out | register pending server, send CREATE |
//! | PROVISION_RESPONSE | in | activate server, or remove it (rollback) |
//! | PACKAGE_REQUEST | in | answer COMPLETE with content or `ok=false` |
//! | DEPROVISION | out | mark server inactive, send SINGLE |
//! | SERVER_SHUTDOWN | in | mark inactive and remove server |
//! | SHUTDOWN | out | disable coordinator, send SINGLE |
//!
//! # Invariants
//!
//! - No handler holds a coordinator lock while sending.
//! - A failed send undoes what the same call did before it: a pending
//!   server is removed, a flag flipped for the send is restored.
//! - `active=false` marks a pending or stopping server; absence from the
//!   map marks a failed or removed one.

use std::collections::HashMap;

use playpen_proto::{
    BaseCommand, CommandType, Deprovision, PackageData, PackageRequest, PackageResponse,
    Provision, ProvisionResponse, ServerShutdown, SyncState, TransactionMode,
};
use tracing::{error, info, warn};

use crate::error::{NetworkError, Result};
use crate::fleet::{CoordinatorHandle, Server};
use crate::network::Network;
use crate::package::Package;
use crate::transaction::TransactionInfo;

impl Network {
    fn coordinator(&self, id: &str, command: CommandType) -> Result<CoordinatorHandle> {
        self.fleet.get(id).ok_or_else(|| {
            error!(coordinator = id, command = %command, "unknown coordinator");
            NetworkError::UnknownCoordinator(id.to_string())
        })
    }

    /// Remove `server_id` from `coordinator_id` if it is still pending.
    pub(crate) fn rollback_pending_server(&self, coordinator_id: &str, server_id: &str) -> bool {
        let Some(handle) = self.fleet.get(coordinator_id) else {
            return false;
        };
        let mut coord = handle.lock();
        match coord.servers.get(server_id) {
            Some(server) if !server.active => {
                coord.servers.remove(server_id);
                warn!(
                    coordinator = coordinator_id,
                    server = server_id,
                    "pending server rolled back"
                );
                true
            }
            _ => false,
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // SYNC
    // ════════════════════════════════════════════════════════════════════════

    /// Replace the record of `from` with what the node reports.
    ///
    /// Unresolvable packages are logged and leave the server without a
    /// package; they never abort the sync.
    pub(crate) fn process_sync(
        &self,
        sync: &SyncState,
        _info: &TransactionInfo,
        from: &str,
    ) -> Result<()> {
        let handle = self.fleet.get_or_create(from);
        let mut coord = handle.lock();

        // no new provisioning while the record is rebuilt
        coord.enabled = false;

        let name = sync.name.clone().unwrap_or_else(|| coord.id().to_string());
        coord.name = name;
        coord.resources = sync
            .resources
            .iter()
            .map(|r| (r.name.clone(), r.value))
            .collect();
        coord.attributes = sync.attributes.iter().cloned().collect();

        let mut servers = HashMap::with_capacity(sync.servers.len());
        for desc in &sync.servers {
            let package = self
                .resolver
                .resolve(&desc.package.id, &desc.package.version)
                .filter(Package::is_resolved);
            let name = desc.name.clone().unwrap_or_else(|| desc.id.clone());
            if package.is_none() {
                warn!(
                    coordinator = from,
                    package = %desc.package.id,
                    version = %desc.package.version,
                    server = %name,
                    "unknown package for synced server"
                );
            }
            servers.insert(
                desc.id.clone(),
                Server {
                    id: desc.id.clone(),
                    name,
                    package,
                    properties: desc.property_map(),
                    active: true,
                },
            );
        }
        coord.servers = servers;

        coord.enabled = sync.enabled;
        info!(
            coordinator = from,
            name = %coord.name,
            servers = coord.servers.len(),
            enabled = coord.enabled,
            "coordinator synced"
        );
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // PROVISION
    // ════════════════════════════════════════════════════════════════════════

    /// Ask `target` to start a new server running `package`.
    ///
    /// The server is registered as pending before anything is sent and is
    /// removed again if the request cannot be sent. Returns the new server id.
    pub fn send_provision(
        &self,
        target: &str,
        package: &Package,
        name: Option<&str>,
        properties: HashMap<String, String>,
    ) -> Result<String> {
        if !package.is_resolved() {
            error!(package = %package.id, version = %package.version, "cannot provision an unresolved package");
            return Err(NetworkError::UnresolvedPackage {
                id: package.id.clone(),
                version: package.version.clone(),
            });
        }

        let handle = self.coordinator(target, CommandType::Provision)?;
        let descriptor = {
            let mut coord = handle.lock();
            if !coord.enabled {
                error!(coordinator = target, "coordinator is not enabled for provision");
                return Err(NetworkError::CoordinatorDisabled(target.to_string()));
            }
            if !coord.is_connection_active() {
                error!(coordinator = target, "coordinator connection is inactive for provision");
                return Err(NetworkError::ConnectionInactive(target.to_string()));
            }

            let server = coord
                .create_server(&self.ids, package, name, properties)
                .map_err(|e| {
                    error!(coordinator = target, error = %e, "unable to register server before provision");
                    e
                })?;
            match server.descriptor(name) {
                Some(descriptor) => descriptor,
                None => {
                    let id = server.id.clone();
                    coord.servers.remove(&id);
                    return Err(NetworkError::UnresolvedPackage {
                        id: package.id.clone(),
                        version: package.version.clone(),
                    });
                }
            }
        };
        let server_id = descriptor.id.clone();

        let info = self.transactions.begin();
        let command = BaseCommand::Provision(Provision { server: descriptor });
        let transaction = match self
            .transactions
            .build(&info.id, TransactionMode::Create, command)
        {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(error = %e, "unable to build provision transaction");
                self.transactions.cancel(&info.id);
                self.rollback_pending_server(target, &server_id);
                return Err(e);
            }
        };

        info!(
            package = %package.id,
            version = %package.version,
            coordinator = target,
            server = %server_id,
            "sending provision"
        );
        if let Err(e) = self.send_in_transaction(transaction, target) {
            self.rollback_pending_server(target, &server_id);
            return Err(e);
        }
        Ok(server_id)
    }

    /// Activate or roll back the server named by the PROVISION this
    /// transaction carried.
    pub(crate) fn process_provision_response(
        &self,
        response: &ProvisionResponse,
        info: &TransactionInfo,
        from: &str,
    ) -> Result<()> {
        let handle = self.coordinator(from, CommandType::ProvisionResponse)?;

        let server_id = match info.command().and_then(BaseCommand::provisioned_server_id) {
            Some(server_id) => server_id.to_string(),
            None => {
                error!(
                    transaction_id = %info.id,
                    "PROVISION_RESPONSE expects the transaction to carry a PROVISION"
                );
                return Err(NetworkError::ProtocolMismatch {
                    transaction_id: info.id.clone(),
                    expected: CommandType::Provision,
                    received: CommandType::ProvisionResponse,
                });
            }
        };

        let mut coord = handle.lock();
        let unknown = || {
            error!(coordinator = from, server = %server_id, "unknown server on PROVISION_RESPONSE");
            NetworkError::UnknownServer {
                coordinator_id: from.to_string(),
                server_id: server_id.clone(),
            }
        };

        if response.ok {
            let server = coord.servers.get_mut(&server_id).ok_or_else(unknown)?;
            server.active = true;
            info!(coordinator = from, server = %server_id, "server activated");
        } else {
            coord.servers.remove(&server_id).ok_or_else(unknown)?;
            warn!(coordinator = from, server = %server_id, "server failed to activate");
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // PACKAGES
    // ════════════════════════════════════════════════════════════════════════

    /// Answer a node asking for package content.
    pub(crate) fn process_package_request(
        &self,
        request: &PackageRequest,
        info: &TransactionInfo,
        from: &str,
    ) -> Result<()> {
        self.coordinator(from, CommandType::PackageRequest)?;

        let id = &request.package.id;
        let version = &request.package.version;
        info!(package = %id, version = %version, coordinator = from, "package requested");

        match self.resolver.resolve(id, version).filter(Package::is_resolved) {
            Some(package) => self.send_package_response(from, &info.id, &package),
            None => {
                error!(package = %id, version = %version, coordinator = from, "unable to resolve package");
                self.send_package_response_failure(from, &info.id)
            }
        }
    }

    /// Complete transaction `tid` with `ok=false`.
    pub fn send_package_response_failure(&self, target: &str, tid: &str) -> Result<()> {
        if self.transactions.get_info(tid).is_none() {
            error!(transaction_id = tid, "unknown transaction, unable to send package response");
            return Err(NetworkError::UnknownTransaction(tid.to_string()));
        }

        let command = BaseCommand::PackageResponse(PackageResponse {
            ok: false,
            data: None,
        });
        let transaction = self
            .transactions
            .build(tid, TransactionMode::Complete, command)?;
        self.send_in_transaction(transaction, target)
    }

    /// Complete transaction `tid` with the content of `package`.
    ///
    /// Content that cannot be read is answered like an unresolved package.
    pub fn send_package_response(&self, target: &str, tid: &str, package: &Package) -> Result<()> {
        if !package.is_resolved() {
            error!(package = %package.id, "cannot send an unresolved package");
            return Err(NetworkError::UnresolvedPackage {
                id: package.id.clone(),
                version: package.version.clone(),
            });
        }
        if self.transactions.get_info(tid).is_none() {
            error!(transaction_id = tid, "unknown transaction, unable to send package");
            return Err(NetworkError::UnknownTransaction(tid.to_string()));
        }

        let data = match package.read_content() {
            Ok(data) => data,
            Err(e) => {
                error!(
                    package = %package.id,
                    version = %package.version,
                    path = %package.local_path.display(),
                    error = %e,
                    "unable to read package data"
                );
                return self.send_package_response_failure(target, tid);
            }
        };

        let command = BaseCommand::PackageResponse(PackageResponse {
            ok: true,
            data: Some(PackageData {
                meta: package.meta(),
                data,
            }),
        });
        let transaction = self
            .transactions
            .build(tid, TransactionMode::Complete, command)?;
        self.send_in_transaction(transaction, target)
    }

    // ════════════════════════════════════════════════════════════════════════
    // DEPROVISION & SHUTDOWN
    // ════════════════════════════════════════════════════════════════════════

    /// Ask `target` to stop `server_id`. The server is marked inactive right
    /// away; the node reports the actual stop with SERVER_SHUTDOWN.
    pub fn send_deprovision(&self, target: &str, server_id: &str, force: bool) -> Result<()> {
        let handle = self.coordinator(target, CommandType::Deprovision)?;
        let was_active = {
            let mut coord = handle.lock();
            let server = coord.servers.get_mut(server_id).ok_or_else(|| {
                error!(coordinator = target, server = server_id, "cannot deprovision unknown server");
                NetworkError::UnknownServer {
                    coordinator_id: target.to_string(),
                    server_id: server_id.to_string(),
                }
            })?;
            std::mem::replace(&mut server.active, false)
        };

        let restore = || {
            if let Some(server) = handle.lock().servers.get_mut(server_id) {
                server.active = was_active;
            }
        };

        let info = self.transactions.begin();
        let command = BaseCommand::Deprovision(Deprovision {
            server_id: server_id.to_string(),
            force,
        });
        let transaction = match self
            .transactions
            .build(&info.id, TransactionMode::Single, command)
        {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(error = %e, "unable to build transaction for DEPROVISION");
                self.transactions.cancel(&info.id);
                restore();
                return Err(e);
            }
        };

        info!(coordinator = target, server = server_id, force, "sending deprovision");
        self.send_in_transaction(transaction, target).map_err(|e| {
            restore();
            e
        })
    }

    /// A node reports that one of its servers stopped.
    pub(crate) fn process_server_shutdown(
        &self,
        shutdown: &ServerShutdown,
        _info: &TransactionInfo,
        from: &str,
    ) -> Result<()> {
        let handle = self.coordinator(from, CommandType::ServerShutdown)?;
        let mut coord = handle.lock();

        let Some(server) = coord.servers.get_mut(&shutdown.server_id) else {
            error!(
                coordinator = from,
                server = %shutdown.server_id,
                "cannot process SERVER_SHUTDOWN on unknown server"
            );
            return Err(NetworkError::UnknownServer {
                coordinator_id: from.to_string(),
                server_id: shutdown.server_id.clone(),
            });
        };
        server.active = false;
        coord.servers.remove(&shutdown.server_id);

        info!(coordinator = from, server = %shutdown.server_id, "server shutdown");
        Ok(())
    }

    /// Ask `target` to shut down entirely. The coordinator is disabled first.
    pub fn send_shutdown(&self, target: &str) -> Result<()> {
        let handle = self.coordinator(target, CommandType::Shutdown)?;
        let was_enabled = std::mem::replace(&mut handle.lock().enabled, false);
        let restore = || {
            handle.lock().enabled = was_enabled;
        };

        let info = self.transactions.begin();
        let transaction = match self
            .transactions
            .build(&info.id, TransactionMode::Single, BaseCommand::Shutdown)
        {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(error = %e, "unable to build transaction for SHUTDOWN");
                self.transactions.cancel(&info.id);
                restore();
                return Err(e);
            }
        };

        info!(coordinator = target, "shutting down coordinator");
        self.send_in_transaction(transaction, target).map_err(|e| {
            restore();
            e
        })
    }
}
