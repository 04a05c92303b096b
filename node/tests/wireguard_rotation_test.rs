#![cfg(feature = "mock-node")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;

use tpn_model::entities::wireguard_leases;
use tpn_node::config::WireGuardConfig;
use tpn_node::container::WireGuardDriver;
use tpn_node::mock::MockRuntime;
use tpn_node::services::database::DatabaseService;

async fn test_db() -> DatabaseService {
    let db = DatabaseService::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn seed_peer(root: &Path, id: i32) {
    let dir = root.join(format!("peer{id}"));
    std::fs::create_dir_all(&dir).unwrap();

    let conf = format!(
        "[Interface]\n\
         Address = 10.13.13.{}/32\n\
         PrivateKey = old-private-{id}=\n\
         DNS = 10.13.13.1\n\n\
         [Peer]\n\
         PublicKey = server-public=\n\
         PresharedKey = old-psk-{id}=\n\
         AllowedIPs = 0.0.0.0/0\n\
         Endpoint = 203.0.113.9:51820\n",
        id + 1
    );
    std::fs::write(dir.join(format!("peer{id}.conf")), conf).unwrap();
    std::fs::write(dir.join(format!("privatekey-peer{id}")), format!("old-private-{id}=")).unwrap();
    std::fs::write(dir.join(format!("publickey-peer{id}")), format!("old-public-{id}=")).unwrap();
    std::fs::write(dir.join(format!("presharedkey-peer{id}")), format!("old-psk-{id}=")).unwrap();
}

fn seed_server_conf(root: &Path, ids: &[i32]) {
    let dir = root.join("wg_confs");
    std::fs::create_dir_all(&dir).unwrap();

    let mut conf = String::from(
        "[Interface]\nAddress = 10.13.13.1/24\nPrivateKey = server-private=\nListenPort = 51820\n",
    );
    for id in ids {
        conf.push_str(&format!(
            "\n[Peer]\nPublicKey = old-public-{id}=\nPresharedKey = old-psk-{id}=\nAllowedIPs = 10.13.13.{}/32\n",
            id + 1
        ));
    }
    std::fs::write(dir.join("wg0.conf"), conf).unwrap();
}

fn seed_tree(root: &Path, ids: &[i32]) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join(".wg_ready"), "").unwrap();
    for id in ids {
        seed_peer(root, *id);
    }
    seed_server_conf(root, ids);
}

fn driver(root: &Path, db: DatabaseConnection, runtime: Arc<MockRuntime>) -> WireGuardDriver {
    let config = WireGuardConfig {
        config_dir: root.to_path_buf(),
        peer_count: 10,
        ..Default::default()
    };
    WireGuardDriver::new(runtime, db, config, "203.0.113.9".to_string())
}

#[tokio::test]
async fn rotation_rewrites_keys_conf_and_interface() {
    let tmp = tempfile::tempdir().unwrap();
    seed_tree(tmp.path(), &[5]);

    let db = test_db().await;
    wireguard_leases::Model::insert_lease(&db.connection, 5, 1).await.unwrap();

    let runtime = Arc::new(MockRuntime::new());
    let driver = driver(tmp.path(), db.connection.clone(), runtime.clone());

    let outcome = driver.replace_config(5).await.unwrap();
    assert!(outcome.success);
    let keys = outcome.new_keys.expect("new keys on success");

    // Key files hold the fresh material.
    let private =
        std::fs::read_to_string(tmp.path().join("peer5/privatekey-peer5")).unwrap();
    let public = std::fs::read_to_string(tmp.path().join("peer5/publickey-peer5")).unwrap();
    assert_eq!(private, keys.private_key);
    assert_eq!(public, keys.public_key);
    assert_eq!(public, format!("pub({private})"));

    // Client conf carries the new private key and psk; the server peer
    // stanza carries the matching public key.
    let client = std::fs::read_to_string(tmp.path().join("peer5/peer5.conf")).unwrap();
    assert!(client.contains(&format!("PrivateKey = {}", keys.private_key)));
    assert!(client.contains(&format!("PresharedKey = {}", keys.preshared_key)));

    let server = std::fs::read_to_string(tmp.path().join("wg_confs/wg0.conf")).unwrap();
    assert!(server.contains(&format!("PublicKey = {}", keys.public_key)));
    assert!(!server.contains("old-public-5="));

    // Old peer removed from the live interface, new one added on the same
    // allowed ip.
    let calls = runtime.calls().join("\n");
    assert!(calls.contains("peer old-public-5= remove"));
    assert!(calls.contains(&format!("peer {}", keys.public_key)));
    assert!(calls.contains("allowed-ips 10.13.13.6/32"));

    // Lease row deleted only after keys were stable.
    let rows = wireguard_leases::Model::open_leases(&db.connection, 0).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn failed_peer_add_rolls_back_files_and_row() {
    let tmp = tempfile::tempdir().unwrap();
    seed_tree(tmp.path(), &[5]);

    let db = test_db().await;
    wireguard_leases::Model::insert_lease(&db.connection, 5, 9_999_999_999_999)
        .await
        .unwrap();

    let before_client = std::fs::read_to_string(tmp.path().join("peer5/peer5.conf")).unwrap();
    let before_server = std::fs::read_to_string(tmp.path().join("wg_confs/wg0.conf")).unwrap();

    let runtime = Arc::new(MockRuntime::new());
    // Every command touching a generated public key fails: the new-peer add
    // blows up mid-rotation, while old-peer restoration still succeeds.
    runtime.fail_on("peer pub(");

    let driver = driver(tmp.path(), db.connection.clone(), runtime.clone());
    let outcome = driver.replace_config(5).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.new_keys.is_none());

    let after_client = std::fs::read_to_string(tmp.path().join("peer5/peer5.conf")).unwrap();
    let after_server = std::fs::read_to_string(tmp.path().join("wg_confs/wg0.conf")).unwrap();
    assert_eq!(before_client, after_client);
    assert_eq!(before_server, after_server);

    let private =
        std::fs::read_to_string(tmp.path().join("peer5/privatekey-peer5")).unwrap();
    assert_eq!(private, "old-private-5=");

    // The old peer was restored on the interface.
    let calls = runtime.calls().join("\n");
    assert!(calls.contains("peer old-public-5= preshared-key"));

    // Lease row untouched.
    let rows = wireguard_leases::Model::open_leases(&db.connection, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 5);
}

#[tokio::test]
async fn count_configs_sees_only_in_range_peers() {
    let tmp = tempfile::tempdir().unwrap();
    seed_tree(tmp.path(), &[1, 2, 3]);
    // Out of range for peer_count = 10.
    seed_peer(tmp.path(), 42);

    let db = test_db().await;
    let driver = driver(tmp.path(), db.connection, Arc::new(MockRuntime::new()));

    assert_eq!(driver.count_configs().await.unwrap(), 3);
    assert_eq!(driver.existing_peer_ids().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn server_ready_requires_marker_and_peer_conf() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path()).unwrap();

    let db = test_db().await;
    let driver = driver(tmp.path(), db.connection, Arc::new(MockRuntime::new()));

    let budget = Duration::from_millis(50);
    let poll = Duration::from_millis(10);

    // No marker yet.
    assert!(!driver.server_ready(None, budget, poll).await.unwrap());

    std::fs::write(tmp.path().join(".wg_ready"), "").unwrap();
    assert!(driver.server_ready(None, budget, poll).await.unwrap());

    // Specific peer conf still missing.
    assert!(!driver.server_ready(Some(3), budget, poll).await.unwrap());

    seed_peer(tmp.path(), 3);
    assert!(driver.server_ready(Some(3), budget, poll).await.unwrap());
}

#[tokio::test]
async fn bulk_replace_is_sequential_over_all_peers() {
    let tmp = tempfile::tempdir().unwrap();
    seed_tree(tmp.path(), &[1, 2]);

    let db = test_db().await;
    let runtime = Arc::new(MockRuntime::new());
    let driver = driver(tmp.path(), db.connection, runtime.clone());

    let outcomes = driver.replace_configs(&[]).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.success));

    // Peer 1's swap completed before peer 2's began.
    let calls = runtime.calls();
    let remove_1 = calls
        .iter()
        .position(|call| call.contains("peer old-public-1= remove"))
        .unwrap();
    let remove_2 = calls
        .iter()
        .position(|call| call.contains("peer old-public-2= remove"))
        .unwrap();
    assert!(remove_1 < remove_2);
}
