//! End-to-end scenarios from spec §8, driven entirely through the client
//! façade rather than the peer trait directly (the per-crate unit tests
//! already cover the peer-level mechanics).

use fruina_client::{connect_peer, Client};
use fruina_core::error::Error;
use fruina_core::peer::{memory_peer, Peer};
use fruina_sharedfs::SharedFsPeer;
use fruina_tiered::TieredPeer;
use fruina_transport::uds::{UdsClient, UdsServer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Scenario 1: create, write, seal, get, read, delete, get -> NotFound.
#[test]
fn scenario_one_hello_fruina_roundtrip() {
    let client = connect_peer(Arc::new(memory_peer()));

    let mut created = client.create(None, None).unwrap();
    created.write(b"Hello, Fruina!").unwrap();
    created.seal().unwrap();
    let object_id = created.id();
    created.close();

    let mut read = client.get(object_id).unwrap();
    assert_eq!(read.buffer().unwrap(), b"Hello, Fruina!");
    read.close();

    client.delete(object_id).unwrap();
    let err = client.get(object_id).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

/// Scenario 2: two peers sharing a directory see each other's sealed
/// objects and metadata.
#[test]
fn scenario_two_shared_directory_visible_across_peers() {
    let dir = tempdir().unwrap();
    let client_a = connect_peer(Arc::new(SharedFsPeer::new(dir.path()).unwrap()));
    let client_b = connect_peer(Arc::new(SharedFsPeer::new(dir.path()).unwrap()));

    let mut meta = std::collections::BTreeMap::new();
    meta.insert("author".to_string(), serde_json::Value::String("demo".into()));
    let mut created = client_a
        .create_with_ttl(None, None, Some(meta), Some(Duration::from_secs(60)))
        .unwrap();
    created.write(b"Hello, Shared World!").unwrap();
    created.seal().unwrap();
    let object_id = created.id();
    created.close();

    let mut read = client_b.get(object_id).unwrap();
    assert_eq!(read.buffer().unwrap(), b"Hello, Shared World!");
    assert_eq!(read.get_meta("author").unwrap(), "demo");
    read.close();
}

/// Scenario 3: a shared-FS object with a short object TTL disappears from
/// a second peer once that TTL has elapsed, even though its lease TTL was
/// longer.
#[test]
fn scenario_three_shared_fs_ttl_expiry_is_visible_cross_peer() {
    let dir = tempdir().unwrap();
    let peer_a = Arc::new(SharedFsPeer::new(dir.path()).unwrap());
    let client_a = connect_peer(peer_a.clone());
    peer_a.start_maintenance(Duration::from_millis(200));
    let client_b = connect_peer(Arc::new(SharedFsPeer::new(dir.path()).unwrap()));

    let mut meta = std::collections::BTreeMap::new();
    meta.insert("ttl".to_string(), serde_json::Value::from(2));
    let mut created = client_a
        .create_with_ttl(None, None, Some(meta), Some(Duration::from_secs(60)))
        .unwrap();
    created.write(b"x").unwrap();
    created.seal().unwrap();
    let object_id = created.id();
    created.close();

    std::thread::sleep(Duration::from_millis(3500));

    let err = client_b.get(object_id).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

/// Scenario 4: a tiered peer with `max_items = 2` keeps the two most
/// recently created objects hot and the oldest cold, but still serves it.
#[test]
fn scenario_four_tiered_peer_keeps_oldest_cold_but_reachable() {
    let dir = tempdir().unwrap();
    let hot = Box::new(memory_peer());
    let cold = Box::new(fruina_core::peer::filesystem_peer(dir.path().to_path_buf()));
    let tiered: Arc<dyn Peer> = Arc::new(TieredPeer::new(hot, cold, 2));
    let client = connect_peer(tiered.clone());

    let mut ids = Vec::new();
    for payload in [b"one".as_slice(), b"two", b"three"] {
        let mut obj = client.create(None, None).unwrap();
        obj.write(payload).unwrap();
        obj.seal().unwrap();
        ids.push(obj.id());
        obj.close();
    }

    let mut oldest = client.get(ids[0]).unwrap();
    assert_eq!(oldest.buffer().unwrap(), b"one");
    oldest.close();
}

/// Scenario 5: client and server talk over a local-socket transport; the
/// acquire response's FD is mapped directly by the client.
#[test]
fn scenario_five_local_socket_transport_roundtrip() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("fruina.sock");

    let server_peer: Arc<dyn Peer> = Arc::new(memory_peer());
    let mut server = UdsServer::new(server_peer, &socket_path);
    server.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let client = connect_peer(Arc::new(UdsClient::new(&socket_path)));

    let mut created = client.create(Some(28), None).unwrap();
    created.write(b"Hello from separate process!").unwrap();
    created.seal().unwrap();
    let object_id = created.id();
    created.close();

    let mut read = client.get(object_id).unwrap();
    assert_eq!(read.buffer().unwrap(), b"Hello from separate process!");
    read.close();

    server.stop();
}

/// Scenario 6: sealing via a READ lease and reading a CREATING object are
/// both rejected with the documented error kinds.
#[test]
fn scenario_six_bad_lease_and_not_sealed_errors() {
    let client: Client = connect_peer(Arc::new(memory_peer()));

    let created = client.create(None, None).unwrap();
    let object_id = created.id();
    let not_sealed_err = client.get(object_id).unwrap_err();
    assert!(matches!(not_sealed_err, Error::NotSealed(_)));
    created.close();

    let mut created = client.create(None, None).unwrap();
    created.seal().unwrap();
    let object_id = created.id();
    created.close();

    let mut read = client.get(object_id).unwrap();
    let bad_lease_err = read.seal().unwrap_err();
    assert!(matches!(bad_lease_err, Error::BadLease(_)));
    read.close();
}
