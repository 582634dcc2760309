//! Protocol Integration Tests
//!
//! Drive the network core end to end: frames signed the way a node signs
//! them go in through `Network::receive`, frames the core writes are read
//! back from the coordinator's connection, verified and decoded.
//!
//! ## Key Invariant Under Test
//!
//! **Fleet state only changes on authenticated, correlated messages, and a
//! failed send leaves no trace.**

use std::collections::HashMap;
use std::sync::Arc;

use playpen_common::{AuthCodec, Config, CoordinatorEntry, SharedKey};
use playpen_coordinator::{
    ChannelConnection, Connection, ErrorKind, LocalPackageRepository, Network, NetworkError,
    Package, PackageResolver,
};
use playpen_proto::{
    decode_transaction, encode_transaction, AuthenticatedFrame, BaseCommand, PackageMeta,
    PackageRequest, Property, ProvisionResponse, Resource, ServerDescriptor, ServerShutdown,
    SyncState, Transaction, TransactionMode,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

// ════════════════════════════════════════════════════════════════════════════
// TEST CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

const NODE: &str = "node-1";
const PACKAGE_BYTES: &[u8] = b"\x50\x33\x00playpen-package-body";

// ════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ════════════════════════════════════════════════════════════════════════════

fn node_key() -> SharedKey {
    SharedKey::new(vec![0x42; 32])
}

struct Harness {
    net: Arc<Network>,
    repo: Arc<LocalPackageRepository>,
    outbound: UnboundedReceiver<AuthenticatedFrame>,
    _dir: TempDir,
}

impl Harness {
    /// One registered, connected node with `lobby@1.0` on disk.
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lobby-1.0.p3");
        std::fs::write(&path, PACKAGE_BYTES).expect("write package");

        let repo = Arc::new(LocalPackageRepository::new());
        repo.insert("lobby", "1.0", &path);

        let net = Arc::new(Network::new(Config::default(), repo.clone()));
        net.register_coordinator(NODE, node_key());
        let (conn, outbound) = ChannelConnection::channel();
        net.attach_connection(NODE, Arc::new(conn)).expect("attach");

        Self {
            net,
            repo,
            outbound,
            _dir: dir,
        }
    }

    fn lobby(&self) -> Package {
        self.repo.resolve("lobby", "1.0").expect("lobby resolves")
    }

    /// Deliver `tx` as if `NODE` had signed and sent it.
    fn deliver(&self, tx: &Transaction) -> Result<(), NetworkError> {
        self.net.receive(signed(tx, &node_key()), None)
    }

    /// Next frame the core wrote to `NODE`, verified and decoded.
    fn sent(&mut self) -> Transaction {
        let frame = self.outbound.try_recv().expect("a frame was sent");
        assert_eq!(frame.coordinator_id, NODE);
        assert!(AuthCodec::verify_frame(&frame, &node_key()), "frame tag must verify");
        decode_transaction(&frame.payload).expect("decode")
    }

    fn nothing_sent(&mut self) -> bool {
        self.outbound.try_recv().is_err()
    }

    fn sync(&self, tid: &str, servers: Vec<ServerDescriptor>, enabled: bool) {
        let tx = Transaction::new(
            tid,
            TransactionMode::Single,
            BaseCommand::Sync(SyncState {
                name: Some("rack-a".to_string()),
                resources: vec![Resource {
                    name: "memory".to_string(),
                    value: 8192,
                }],
                attributes: vec!["ssd".to_string()],
                servers,
                enabled,
            }),
        );
        self.deliver(&tx).expect("sync");
    }

    fn provision(&mut self) -> (String, Transaction) {
        let mut props = HashMap::new();
        props.insert("port".to_string(), "25565".to_string());
        let server_id = self
            .net
            .send_provision(NODE, &self.lobby(), Some("lobby-1"), props)
            .expect("provision");
        let sent = self.sent();
        (server_id, sent)
    }
}

fn signed(tx: &Transaction, key: &SharedKey) -> AuthenticatedFrame {
    let payload = encode_transaction(tx).expect("encode");
    AuthCodec::seal(NODE, key, payload).expect("seal")
}

fn descriptor(id: &str, package: &str, port: &str) -> ServerDescriptor {
    ServerDescriptor {
        id: id.to_string(),
        name: Some(format!("{}-name", id)),
        package: PackageMeta::new(package, "1.0"),
        properties: vec![Property {
            name: "port".to_string(),
            value: port.to_string(),
        }],
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SYNC
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sync_rebuilds_coordinator() {
    let h = Harness::new();
    h.sync(
        "node-1-sync-1",
        vec![descriptor("s1", "lobby", "25565"), descriptor("s2", "missing", "25566")],
        true,
    );

    let snap = h.net.fleet().snapshot(NODE).expect("snapshot");
    assert_eq!(snap.name, "rack-a");
    assert!(snap.enabled);
    assert_eq!(snap.resources.get("memory"), Some(&8192));
    assert!(snap.attributes.contains("ssd"));
    assert_eq!(snap.servers.len(), 2);

    let s1 = &snap.servers["s1"];
    assert!(s1.active);
    assert_eq!(s1.name, "s1-name");
    assert_eq!(s1.properties.get("port").map(String::as_str), Some("25565"));
    assert_eq!(s1.package.as_ref().map(|p| p.id.as_str()), Some("lobby"));
    assert!(snap.servers["s2"].package.is_none());

    assert!(h.net.transactions().is_empty(), "SINGLE leaves no entry");
}

#[test]
fn test_sync_disabled_blocks_provision() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), false);

    let err = h
        .net
        .send_provision(NODE, &h.lobby(), None, HashMap::new())
        .unwrap_err();
    assert!(matches!(err, NetworkError::CoordinatorDisabled(_)));
    assert!(h.net.fleet().snapshot(NODE).expect("snap").servers.is_empty());
    assert!(h.net.transactions().is_empty());
    assert!(h.nothing_sent());
}

// ════════════════════════════════════════════════════════════════════════════
// PROVISION
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_provision_acknowledged() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), true);

    let (server_id, sent) = h.provision();
    assert_eq!(sent.mode, TransactionMode::Create);
    match &sent.command {
        BaseCommand::Provision(p) => {
            assert_eq!(p.server.id, server_id);
            assert_eq!(p.server.name.as_deref(), Some("lobby-1"));
            assert_eq!(p.server.package, PackageMeta::new("lobby", "1.0"));
            assert_eq!(p.server.properties[0].value, "25565");
        }
        other => panic!("expected PROVISION, got {:?}", other),
    }
    assert!(!h.net.fleet().snapshot(NODE).expect("snap").servers[&server_id].active);
    assert!(h.net.transactions().contains(&sent.id));

    let ack = Transaction::new(
        sent.id.clone(),
        TransactionMode::Complete,
        BaseCommand::ProvisionResponse(ProvisionResponse { ok: true }),
    );
    h.deliver(&ack).expect("ack");

    let snap = h.net.fleet().snapshot(NODE).expect("snap");
    assert!(snap.servers[&server_id].active);
    assert!(!h.net.transactions().contains(&sent.id));
}

#[test]
fn test_provision_rejected_rolls_back() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), true);
    let (server_id, sent) = h.provision();

    let nack = Transaction::new(
        sent.id.clone(),
        TransactionMode::Complete,
        BaseCommand::ProvisionResponse(ProvisionResponse { ok: false }),
    );
    h.deliver(&nack).expect("a failed provision is not an error");

    let snap = h.net.fleet().snapshot(NODE).expect("snap");
    assert!(!snap.servers.contains_key(&server_id));
    assert!(h.net.transactions().is_empty());
}

#[test]
fn test_provision_rollback_is_idempotent() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", vec![descriptor("s1", "lobby", "25565")], true);
    let (server_id, sent) = h.provision();
    let context = h.net.transactions().get_info(&sent.id).expect("open PROVISION");
    let nack = BaseCommand::ProvisionResponse(ProvisionResponse { ok: false });

    h.net.process(&nack, &context, NODE).expect("first rollback");
    let after_first = h.net.fleet().snapshot(NODE).expect("snap");
    assert!(!after_first.servers.contains_key(&server_id));

    let err = h.net.process(&nack, &context, NODE).unwrap_err();
    assert!(matches!(err, NetworkError::UnknownServer { .. }));
    assert_eq!(h.net.fleet().snapshot(NODE).expect("snap"), after_first);
    assert!(after_first.servers.contains_key("s1"));
}

#[test]
fn test_provision_unknown_coordinator() {
    let mut h = Harness::new();
    let err = h
        .net
        .send_provision("node-404", &h.lobby(), None, HashMap::new())
        .unwrap_err();
    assert!(matches!(err, NetworkError::UnknownCoordinator(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.net.transactions().is_empty());
    assert!(h.nothing_sent());
}

#[test]
fn test_provision_unresolved_package() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), true);
    let mut pkg = h.lobby();
    pkg.resolved = false;

    let err = h
        .net
        .send_provision(NODE, &pkg, None, HashMap::new())
        .unwrap_err();
    assert!(matches!(err, NetworkError::UnresolvedPackage { .. }));
    assert!(h.net.fleet().snapshot(NODE).expect("snap").servers.is_empty());
    assert!(h.nothing_sent());
}

#[test]
fn test_provision_response_without_open_transaction() {
    let h = Harness::new();
    let stray = Transaction::new(
        "net-never-opened",
        TransactionMode::Complete,
        BaseCommand::ProvisionResponse(ProvisionResponse { ok: true }),
    );
    let err = h.deliver(&stray).unwrap_err();
    assert!(matches!(err, NetworkError::UnknownTransaction(_)));
}

// ════════════════════════════════════════════════════════════════════════════
// DEPROVISION / SERVER_SHUTDOWN / SHUTDOWN
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_deprovision_then_server_shutdown() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", vec![descriptor("s1", "lobby", "25565")], true);

    h.net.send_deprovision(NODE, "s1", true).expect("deprovision");
    assert!(!h.net.fleet().snapshot(NODE).expect("snap").servers["s1"].active);

    let sent = h.sent();
    assert_eq!(sent.mode, TransactionMode::Single);
    match &sent.command {
        BaseCommand::Deprovision(d) => {
            assert_eq!(d.server_id, "s1");
            assert!(d.force);
        }
        other => panic!("expected DEPROVISION, got {:?}", other),
    }
    assert!(!h.net.transactions().contains(&sent.id), "no residual entry");

    let stopped = Transaction::new(
        "node-1-stop-1",
        TransactionMode::Single,
        BaseCommand::ServerShutdown(ServerShutdown {
            server_id: "s1".to_string(),
        }),
    );
    h.deliver(&stopped).expect("server shutdown");
    assert!(h.net.fleet().snapshot(NODE).expect("snap").servers.is_empty());
}

#[test]
fn test_deprovision_unknown_server() {
    let mut h = Harness::new();
    let err = h.net.send_deprovision(NODE, "ghost", false).unwrap_err();
    assert!(matches!(err, NetworkError::UnknownServer { .. }));
    assert!(h.nothing_sent());
}

#[test]
fn test_shutdown_disables_coordinator() {
    let mut h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), true);

    h.net.send_shutdown(NODE).expect("shutdown");
    assert!(!h.net.fleet().snapshot(NODE).expect("snap").enabled);
    let sent = h.sent();
    assert_eq!(sent.mode, TransactionMode::Single);
    assert_eq!(sent.command, BaseCommand::Shutdown);
    assert!(h.net.transactions().is_empty());
}

#[test]
fn test_shutdown_failed_send_restores_enabled() {
    let h = Harness::new();
    h.sync("node-1-sync-1", Vec::new(), true);
    h.net.connection_lost(NODE).expect("lost");
    h.net.fleet().get(NODE).expect("coord").lock().enabled = true;

    let err = h.net.send_shutdown(NODE).unwrap_err();
    assert!(matches!(err, NetworkError::ConnectionInactive(_)));
    assert!(h.net.fleet().snapshot(NODE).expect("snap").enabled);
    assert!(h.net.transactions().is_empty());
}

// ════════════════════════════════════════════════════════════════════════════
// PACKAGE_REQUEST
// ════════════════════════════════════════════════════════════════════════════

fn package_request(tid: &str, id: &str) -> Transaction {
    Transaction::new(
        tid,
        TransactionMode::Create,
        BaseCommand::PackageRequest(PackageRequest {
            package: PackageMeta::new(id, "1.0"),
        }),
    )
}

#[test]
fn test_package_request_served() {
    let mut h = Harness::new();
    h.deliver(&package_request("node-1-pkg-1", "lobby"))
        .expect("package request");

    let reply = h.sent();
    assert_eq!(reply.id, "node-1-pkg-1");
    assert_eq!(reply.mode, TransactionMode::Complete);
    match reply.command {
        BaseCommand::PackageResponse(resp) => {
            assert!(resp.ok);
            let data = resp.data.expect("data");
            assert_eq!(data.meta, PackageMeta::new("lobby", "1.0"));
            assert_eq!(data.data, PACKAGE_BYTES);
        }
        other => panic!("expected PACKAGE_RESPONSE, got {:?}", other),
    }
    assert!(h.net.transactions().is_empty());
}

#[test]
fn test_package_request_unresolved() {
    let mut h = Harness::new();
    h.deliver(&package_request("node-1-pkg-2", "missing"))
        .expect("answered with failure");

    match h.sent().command {
        BaseCommand::PackageResponse(resp) => {
            assert!(!resp.ok);
            assert!(resp.data.is_none());
        }
        other => panic!("expected PACKAGE_RESPONSE, got {:?}", other),
    }
    assert!(h.net.transactions().is_empty());
}

#[test]
fn test_package_request_without_connection_cancels() {
    let mut h = Harness::new();
    h.net.connection_lost(NODE).expect("lost");
    let err = h
        .deliver(&package_request("node-1-pkg-4", "lobby"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(h.net.transactions().is_empty());
    assert!(h.nothing_sent());
}

#[test]
fn test_package_request_unreadable() {
    let mut h = Harness::new();
    h.repo.insert("broken", "1.0", "/nonexistent/broken-1.0.p3");
    h.deliver(&package_request("node-1-pkg-3", "broken"))
        .expect("answered with failure");

    match h.sent().command {
        BaseCommand::PackageResponse(resp) => assert!(!resp.ok),
        other => panic!("expected PACKAGE_RESPONSE, got {:?}", other),
    }
}

#[test]
fn test_duplicate_create_dropped() {
    let mut h = Harness::new();
    let tx = Transaction::new(
        "node-1-open",
        TransactionMode::Create,
        BaseCommand::Sync(SyncState::default()),
    );
    h.deliver(&tx).expect("first create");
    let err = h.deliver(&tx).unwrap_err();
    assert!(matches!(err, NetworkError::DuplicateTransaction(_)));
    assert!(h.nothing_sent());
}

// ════════════════════════════════════════════════════════════════════════════
// AUTHENTICATION & PROTOCOL ERRORS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_wrong_key_rejected_without_mutation() {
    let h = Harness::new();
    let tx = Transaction::new(
        "node-1-sync-x",
        TransactionMode::Single,
        BaseCommand::Sync(SyncState {
            enabled: true,
            ..SyncState::default()
        }),
    );
    let frame = signed(&tx, &SharedKey::new(vec![0x13; 32]));

    let err = h.net.receive(frame, None).unwrap_err();
    assert!(matches!(err, NetworkError::AuthenticationFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!h.net.fleet().snapshot(NODE).expect("snap").enabled);
}

#[test]
fn test_tampered_payload_rejected() {
    let h = Harness::new();
    h.sync("node-1-sync-1", vec![descriptor("s1", "lobby", "1")], true);

    let stop = Transaction::new(
        "node-1-stop-x",
        TransactionMode::Single,
        BaseCommand::ServerShutdown(ServerShutdown {
            server_id: "s1".to_string(),
        }),
    );
    let mut frame = signed(&stop, &node_key());
    let last = frame.payload.len() - 1;
    frame.payload[last] ^= 0xff;

    let err = h.net.receive(frame, None).unwrap_err();
    assert!(matches!(err, NetworkError::AuthenticationFailed { .. }));
    assert!(h.net.fleet().snapshot(NODE).expect("snap").servers.contains_key("s1"));
}

#[test]
fn test_unknown_sender_rejected() {
    let h = Harness::new();
    let tx = Transaction::new("x-1", TransactionMode::Single, BaseCommand::Sync(SyncState::default()));
    let payload = encode_transaction(&tx).expect("encode");
    let frame = AuthCodec::seal("node-404", &node_key(), payload).expect("seal");

    let err = h.net.receive(frame, None).unwrap_err();
    assert!(matches!(err, NetworkError::UnknownCoordinator(_)));
    assert!(!h.net.fleet().contains("node-404"));
}

#[test]
fn test_garbage_payload_rejected() {
    let h = Harness::new();
    let frame = AuthCodec::seal(NODE, &node_key(), vec![0xde, 0xad]).expect("seal");
    let err = h.net.receive(frame, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
    assert!(h.net.transactions().is_empty());
}

#[test]
fn test_outbound_only_command_refused() {
    let mut h = Harness::new();
    let tx = Transaction::new("node-1-bad", TransactionMode::Single, BaseCommand::Shutdown);
    let err = h.deliver(&tx).unwrap_err();
    assert!(matches!(err, NetworkError::UnexpectedCommand(_)));
    assert!(h.net.transactions().is_empty());
    assert!(h.nothing_sent());
}

#[test]
fn test_failed_create_leaves_no_entry() {
    let mut h = Harness::new();
    let tx = Transaction::new("node-1-bad-create", TransactionMode::Create, BaseCommand::Shutdown);
    let err = h.deliver(&tx).unwrap_err();
    assert!(matches!(err, NetworkError::UnexpectedCommand(_)));
    assert!(h.net.transactions().is_empty());

    // a retry is refused for the same reason, not as a duplicate
    let err = h.deliver(&tx).unwrap_err();
    assert!(matches!(err, NetworkError::UnexpectedCommand(_)));
    assert!(h.nothing_sent());
}

#[test]
fn test_uncorrelated_provision_response_leaves_no_entry() {
    let h = Harness::new();
    let tx = Transaction::new(
        "node-1-y",
        TransactionMode::Create,
        BaseCommand::ProvisionResponse(ProvisionResponse { ok: true }),
    );
    let err = h.deliver(&tx).unwrap_err();
    assert!(matches!(err, NetworkError::ProtocolMismatch { .. }));
    assert!(h.net.transactions().is_empty());
}

// ════════════════════════════════════════════════════════════════════════════
// CONFIG & CONNECTIONS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_from_config_registers_coordinators() {
    let config = Config {
        server_id: "hub".to_string(),
        coordinators: vec![CoordinatorEntry {
            id: NODE.to_string(),
            key: hex::encode([0x42u8; 32]),
        }],
        ..Config::default()
    };
    let net = Network::from_config(config, Arc::new(LocalPackageRepository::new()))
        .expect("network");
    assert!(net.fleet().contains(NODE));
    assert_eq!(net.server_id(), "hub");
    assert!(net.generate_id().starts_with("hub-"));

    let handle = net.fleet().get(NODE).expect("coord");
    assert_eq!(handle.lock().key(), &node_key());
}

#[test]
fn test_receive_binds_inbound_connection() {
    let net = Network::new(Config::default(), Arc::new(LocalPackageRepository::new()));
    net.register_coordinator(NODE, node_key());

    let (conn, _rx) = ChannelConnection::channel();
    let conn: Arc<dyn Connection> = Arc::new(conn);
    let tx = Transaction::new("node-1-s", TransactionMode::Single, BaseCommand::Sync(SyncState::default()));
    net.receive(signed(&tx, &node_key()), Some(Arc::clone(&conn)))
        .expect("sync");
    assert!(net.fleet().snapshot(NODE).expect("snap").connection_active);

    assert!(net.deregister_coordinator(NODE));
    assert!(!conn.is_active(), "deregistration closes the connection");
}
