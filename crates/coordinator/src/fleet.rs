//! Fleet State
//!
//! In-memory view of every local coordinator and the servers it runs.
//!
//! # Ownership & Locking
//!
//! | Level | Structure | Lock |
//! |-------|-----------|------|
//! | fleet | id → `Arc<Mutex<Coordinator>>` | `RwLock`, write only to add/remove records |
//! | coordinator | record + its `servers` map | per-coordinator `Mutex` |
//!
//! Mutating two different coordinators never contends on the same lock;
//! mutations of one coordinator are serialized by its mutex.
//!
//! # Server States
//!
//! ```text
//!  create_server()          ack ok
//! ───────────────▶ pending ─────────▶ active
//!                (active=false)         │
//!                     │ ack failed      │ shutdown / deprovision
//!                     ▼                 ▼
//!                  removed ◀──────── inactive
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use playpen_common::SharedKey;
use playpen_proto::{Property, ServerDescriptor};

use crate::error::NetworkError;
use crate::ids::IdGenerator;
use crate::package::Package;
use crate::transport::Connection;

// ════════════════════════════════════════════════════════════════════════════
// SERVER
// ════════════════════════════════════════════════════════════════════════════

/// A workload instance running on exactly one coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: String,
    pub name: String,
    /// `None` when the package could not be resolved.
    pub package: Option<Package>,
    pub properties: HashMap<String, String>,
    /// `true` once the node confirmed the workload started.
    pub active: bool,
}

impl Server {
    /// Wire description of this server. `package` must be resolved.
    pub(crate) fn descriptor(&self, name: Option<&str>) -> Option<ServerDescriptor> {
        let package = self.package.as_ref()?;
        let mut properties: Vec<Property> = self
            .properties
            .iter()
            .map(|(name, value)| Property {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        properties.sort_by(|a, b| a.name.cmp(&b.name));

        Some(ServerDescriptor {
            id: self.id.clone(),
            name: name.map(str::to_string),
            package: package.meta(),
            properties,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COORDINATOR
// ════════════════════════════════════════════════════════════════════════════

/// A remote node agent.
pub struct Coordinator {
    id: String,
    key: SharedKey,
    connection: Option<Arc<dyn Connection>>,
    pub name: String,
    pub resources: HashMap<String, u64>,
    pub attributes: HashSet<String>,
    pub servers: HashMap<String, Server>,
    pub enabled: bool,
}

impl Coordinator {
    /// New record: disabled, no connection, empty collections.
    pub fn new(id: impl Into<String>, key: SharedKey) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            key,
            connection: None,
            resources: HashMap::new(),
            attributes: HashSet::new(),
            servers: HashMap::new(),
            enabled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &SharedKey {
        &self.key
    }

    pub fn set_key(&mut self, key: SharedKey) {
        self.key = key;
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.clone()
    }

    pub fn is_connection_active(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.is_active())
    }

    pub fn attach_connection(&mut self, connection: Arc<dyn Connection>) {
        self.connection = Some(connection);
    }

    pub fn detach_connection(&mut self) -> Option<Arc<dyn Connection>> {
        self.connection.take()
    }

    /// Register a new server speculatively (`active=false`).
    ///
    /// # Errors
    ///
    /// - `UnresolvedPackage` if `package` is not resolved
    /// - `Registration` if the generated id collides with an existing server
    pub fn create_server(
        &mut self,
        ids: &IdGenerator,
        package: &Package,
        name: Option<&str>,
        properties: HashMap<String, String>,
    ) -> Result<&Server, NetworkError> {
        if !package.is_resolved() {
            return Err(NetworkError::UnresolvedPackage {
                id: package.id.clone(),
                version: package.version.clone(),
            });
        }

        let server_id = ids.generate();
        if self.servers.contains_key(&server_id) {
            return Err(NetworkError::Registration {
                coordinator_id: self.id.clone(),
                reason: format!("server id {} already registered", server_id),
            });
        }

        let server = Server {
            name: name.map_or_else(|| server_id.clone(), str::to_string),
            id: server_id.clone(),
            package: Some(package.clone()),
            properties,
            active: false,
        };
        Ok(&*self.servers.entry(server_id).or_insert(server))
    }

    /// Servers confirmed running.
    pub fn active_servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values().filter(|s| s.active)
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            resources: self.resources.clone(),
            attributes: self.attributes.clone(),
            servers: self.servers.clone(),
            enabled: self.enabled,
            connection_active: self.is_connection_active(),
        }
    }
}

/// Read-only copy of a coordinator record, without key or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub id: String,
    pub name: String,
    pub resources: HashMap<String, u64>,
    pub attributes: HashSet<String>,
    pub servers: HashMap<String, Server>,
    pub enabled: bool,
    pub connection_active: bool,
}

// ════════════════════════════════════════════════════════════════════════════
// FLEET STATE
// ════════════════════════════════════════════════════════════════════════════

pub type CoordinatorHandle = Arc<Mutex<Coordinator>>;

#[derive(Default)]
pub struct FleetState {
    coordinators: RwLock<HashMap<String, CoordinatorHandle>>,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator with its shared key.
    ///
    /// A new record starts disabled and empty. An existing record keeps its
    /// state and only has its key replaced.
    pub fn register(&self, id: &str, key: SharedKey) -> CoordinatorHandle {
        let mut map = self.coordinators.write();
        match map.get(id) {
            Some(handle) => {
                handle.lock().set_key(key);
                Arc::clone(handle)
            }
            None => {
                let handle = Arc::new(Mutex::new(Coordinator::new(id, key)));
                map.insert(id.to_string(), Arc::clone(&handle));
                handle
            }
        }
    }

    /// Returns the record for `id`, creating an unkeyed one if needed.
    pub(crate) fn get_or_create(&self, id: &str) -> CoordinatorHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }
        let mut map = self.coordinators.write();
        Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Coordinator::new(id, SharedKey::default())))),
        )
    }

    pub fn deregister(&self, id: &str) -> Option<CoordinatorHandle> {
        self.coordinators.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<CoordinatorHandle> {
        self.coordinators.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.coordinators.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.coordinators.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.coordinators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.read().is_empty()
    }

    pub fn snapshot(&self, id: &str) -> Option<CoordinatorSnapshot> {
        self.get(id).map(|handle| handle.lock().snapshot())
    }
}
