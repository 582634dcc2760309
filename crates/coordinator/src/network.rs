//! Coordinator Facade
//!
//! [`Network`] is the single entry and exit point of the core. It owns the
//! fleet state, the transaction store and the package resolver, and it is
//! the only component that touches a [`Connection`].
//!
//! # Data Flow
//!
//! ```text
//! inbound frame
//!   │
//!   ▼
//! receive() ── resolve sender ── verify tag ── decode Transaction
//!   │
//!   ▼
//! TransactionStore::receive() ── correlate / open id
//!   │
//!   ▼
//! process() ── match on command ── process_* handler (dispatcher)
//!   │
//!   ├──▶ FleetState mutation
//!   └──▶ send_in_transaction() ── send() ── sign ── Connection::write_frame
//! ```
//!
//! # Failure Policy
//!
//! Every operation returns `Result`. The error is logged where it is
//! detected; an unknown sender, a bad tag or an undecodable payload drops
//! the frame before anything is mutated.

use std::sync::Arc;

use playpen_common::{AuthCodec, Config, ConfigError, SharedKey};
use playpen_proto::{
    decode_transaction, encode_transaction, AuthenticatedFrame, BaseCommand, Transaction,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{NetworkError, Result};
use crate::fleet::FleetState;
use crate::ids::IdGenerator;
use crate::package::PackageResolver;
use crate::transaction::{TransactionInfo, TransactionStore};
use crate::transport::Connection;

fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

pub struct Network {
    config: Config,
    pub(crate) ids: IdGenerator,
    pub(crate) fleet: FleetState,
    pub(crate) transactions: TransactionStore,
    pub(crate) resolver: Arc<dyn PackageResolver>,
}

impl Network {
    /// Build a network core from an already validated config. Coordinators
    /// listed in the config are not registered; see [`from_config`](Self::from_config).
    pub fn new(config: Config, resolver: Arc<dyn PackageResolver>) -> Self {
        let ids = IdGenerator::new(config.server_id.clone());
        Self {
            transactions: TransactionStore::new(ids.clone()),
            ids,
            fleet: FleetState::new(),
            resolver,
            config,
        }
    }

    /// Validate `config` and register every coordinator it lists.
    pub fn from_config(
        config: Config,
        resolver: Arc<dyn PackageResolver>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let entries = config.coordinators.clone();
        let network = Self::new(config, resolver);
        for entry in &entries {
            network.register_coordinator(&entry.id, entry.shared_key()?);
        }
        info!(
            server_id = network.server_id(),
            coordinators = entries.len(),
            "network core configured"
        );
        Ok(network)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server_id(&self) -> &str {
        self.ids.prefix()
    }

    /// `<server_id>-<uuid>`
    pub fn generate_id(&self) -> String {
        self.ids.generate()
    }

    pub fn fleet(&self) -> &FleetState {
        &self.fleet
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    // ════════════════════════════════════════════════════════════════════════
    // COORDINATOR REGISTRATION & CONNECTIONS
    // ════════════════════════════════════════════════════════════════════════

    /// Make `id` known with its shared key. Existing state is kept.
    pub fn register_coordinator(&self, id: &str, key: SharedKey) {
        self.fleet.register(id, key);
        info!(coordinator = id, "coordinator registered");
    }

    /// Forget `id` entirely, closing its connection.
    pub fn deregister_coordinator(&self, id: &str) -> bool {
        match self.fleet.deregister(id) {
            Some(handle) => {
                if let Some(conn) = handle.lock().detach_connection() {
                    conn.close();
                }
                info!(coordinator = id, "coordinator deregistered");
                true
            }
            None => false,
        }
    }

    pub fn attach_connection(&self, id: &str, connection: Arc<dyn Connection>) -> Result<()> {
        let handle = self.fleet.get(id).ok_or_else(|| {
            error!(coordinator = id, "cannot attach connection to unknown coordinator");
            NetworkError::UnknownCoordinator(id.to_string())
        })?;
        handle.lock().attach_connection(connection);
        debug!(coordinator = id, "connection attached");
        Ok(())
    }

    /// The channel of `id` dropped: detach it and disable the coordinator.
    /// Servers are kept until the next SYNC rebuilds them.
    pub fn connection_lost(&self, id: &str) -> Result<()> {
        let handle = self
            .fleet
            .get(id)
            .ok_or_else(|| NetworkError::UnknownCoordinator(id.to_string()))?;
        let mut coord = handle.lock();
        coord.detach_connection();
        coord.enabled = false;
        warn!(
            coordinator = id,
            servers = coord.servers.len(),
            "connection lost, coordinator disabled"
        );
        Ok(())
    }

    /// `true` if `connection` is the one currently bound to `id`.
    fn is_bound(&self, id: &str, connection: &Arc<dyn Connection>) -> bool {
        self.fleet.get(id).map_or(false, |handle| {
            handle
                .lock()
                .connection()
                .map_or(false, |c| same_connection(&c, connection))
        })
    }

    fn release_connection(&self, id: &str, connection: &Arc<dyn Connection>) {
        if self.is_bound(id, connection) {
            let _ = self.connection_lost(id);
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // SEND
    // ════════════════════════════════════════════════════════════════════════

    /// Sign `transaction` with the key of `target` and write it to its
    /// connection.
    pub fn send(&self, transaction: &Transaction, target: &str) -> Result<()> {
        self.try_send(transaction, target).map_err(|e| {
            error!(
                transaction_id = %transaction.id,
                target,
                error = %e,
                "unable to send transaction"
            );
            e
        })
    }

    fn try_send(&self, transaction: &Transaction, target: &str) -> Result<()> {
        let handle = self
            .fleet
            .get(target)
            .ok_or_else(|| NetworkError::UnknownCoordinator(target.to_string()))?;

        let (key, connection) = {
            let coord = handle.lock();
            (coord.key().clone(), coord.connection())
        };
        let connection = connection
            .filter(|c| c.is_active())
            .ok_or_else(|| NetworkError::ConnectionInactive(target.to_string()))?;

        let payload = encode_transaction(transaction)?;
        let frame =
            AuthCodec::seal(target, &key, payload).map_err(|e| NetworkError::auth(target, e))?;
        connection.write_frame(frame)?;

        debug!(
            transaction_id = %transaction.id,
            mode = %transaction.mode,
            command = %transaction.command.command_type(),
            target,
            "transaction sent"
        );
        Ok(())
    }

    /// Send a message that belongs to an open transaction.
    ///
    /// The message becomes the stored context of its id. A terminal mode
    /// closes the id after a successful send; a failed send cancels it.
    pub(crate) fn send_in_transaction(&self, transaction: Transaction, target: &str) -> Result<()> {
        self.transactions.record(&transaction, target)?;
        match self.send(&transaction, target) {
            Ok(()) => {
                if transaction.mode.is_terminal() {
                    self.transactions.close(&transaction.id);
                }
                Ok(())
            }
            Err(e) => {
                self.transactions.cancel(&transaction.id);
                Err(e)
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // RECEIVE
    // ════════════════════════════════════════════════════════════════════════

    /// Verify, decode and dispatch one inbound frame.
    ///
    /// `from` is the connection the frame arrived on; it is bound to the
    /// coordinator if that one has no active connection yet.
    pub fn receive(
        &self,
        frame: AuthenticatedFrame,
        from: Option<Arc<dyn Connection>>,
    ) -> Result<()> {
        let origin = frame.coordinator_id.clone();
        self.try_receive(frame, from).map_err(|e| {
            error!(coordinator = %origin, error = %e, "inbound frame dropped");
            e
        })
    }

    fn try_receive(
        &self,
        frame: AuthenticatedFrame,
        from: Option<Arc<dyn Connection>>,
    ) -> Result<()> {
        let origin = frame.coordinator_id.as_str();
        let handle = self
            .fleet
            .get(origin)
            .ok_or_else(|| NetworkError::UnknownCoordinator(origin.to_string()))?;

        let key = handle.lock().key().clone();
        if key.is_empty() {
            return Err(NetworkError::AuthenticationFailed {
                coordinator_id: origin.to_string(),
                reason: "no shared key registered".to_string(),
            });
        }
        if !AuthCodec::verify_frame(&frame, &key) {
            return Err(NetworkError::AuthenticationFailed {
                coordinator_id: origin.to_string(),
                reason: "invalid hash".to_string(),
            });
        }

        let transaction = decode_transaction(&frame.payload)?;

        if let Some(conn) = from {
            let mut coord = handle.lock();
            if !coord.is_connection_active() {
                coord.attach_connection(conn);
                debug!(coordinator = origin, "connection bound on first verified frame");
            }
        }

        self.transactions
            .receive(transaction, origin, |command, info, from| {
                self.process(command, info, from)
            })
    }

    /// Route a correlated command to its handler.
    pub fn process(&self, command: &BaseCommand, info: &TransactionInfo, from: &str) -> Result<()> {
        match command {
            BaseCommand::Sync(sync) => self.process_sync(sync, info, from),
            BaseCommand::ProvisionResponse(response) => {
                self.process_provision_response(response, info, from)
            }
            BaseCommand::PackageRequest(request) => {
                self.process_package_request(request, info, from)
            }
            BaseCommand::ServerShutdown(shutdown) => {
                self.process_server_shutdown(shutdown, info, from)
            }
            BaseCommand::Provision(_)
            | BaseCommand::PackageResponse(_)
            | BaseCommand::Deprovision(_)
            | BaseCommand::Shutdown => {
                let command_type = command.command_type();
                error!(
                    transaction_id = %info.id,
                    coordinator = from,
                    command = %command_type,
                    "command is not accepted from a coordinator"
                );
                Err(NetworkError::UnexpectedCommand(command_type))
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // CONNECTION READER
    // ════════════════════════════════════════════════════════════════════════

    /// Feed frames arriving on one connection to [`receive`](Self::receive),
    /// strictly in delivery order. When the inbound channel ends the
    /// connection is closed and, if it is still the one bound to its
    /// coordinator, that coordinator is marked as having lost it.
    pub fn spawn_reader(
        self: &Arc<Self>,
        connection: Arc<dyn Connection>,
        mut inbound: mpsc::UnboundedReceiver<AuthenticatedFrame>,
    ) -> JoinHandle<()> {
        let network = Arc::clone(self);
        tokio::spawn(async move {
            // only a coordinator this connection is actually bound to
            let mut peer: Option<String> = None;
            while let Some(frame) = inbound.recv().await {
                let claimed = frame.coordinator_id.clone();
                // failures are logged by receive
                let _ = network.receive(frame, Some(Arc::clone(&connection)));
                if network.is_bound(&claimed, &connection) {
                    peer = Some(claimed);
                }
            }

            connection.close();
            if let Some(id) = peer {
                network.release_connection(&id, &connection);
            }
            debug!("connection reader finished");
        })
    }
}
