#![cfg(feature = "mock-node")]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tpn_model::entities::wireguard_leases;
use tpn_node::config::WireGuardConfig;
use tpn_node::container::WireGuardDriver;
use tpn_node::error::NodeError;
use tpn_node::lease::WireGuardLeaseStore;
use tpn_node::mock::MockRuntime;
use tpn_node::services::database::DatabaseService;
use tpn_node::sync::LockRegistry;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

async fn test_db() -> DatabaseService {
    let db = DatabaseService::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn seed_tree(root: &Path, peer_count: i32) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join(".wg_ready"), "").unwrap();

    for id in 1..=peer_count {
        let dir = root.join(format!("peer{id}"));
        std::fs::create_dir_all(&dir).unwrap();
        let conf = format!(
            "[Interface]\nAddress = 10.13.13.{}/32\nPrivateKey = key-{id}=\n\n\
             [Peer]\nPublicKey = server=\nPresharedKey = psk-{id}=\nAllowedIPs = 0.0.0.0/0\n",
            id + 1
        );
        std::fs::write(dir.join(format!("peer{id}.conf")), conf).unwrap();
        std::fs::write(dir.join(format!("privatekey-peer{id}")), format!("key-{id}=")).unwrap();
        std::fs::write(dir.join(format!("publickey-peer{id}")), format!("pub-{id}=")).unwrap();
        std::fs::write(dir.join(format!("presharedkey-peer{id}")), format!("psk-{id}=")).unwrap();
    }

    let confs = root.join("wg_confs");
    std::fs::create_dir_all(&confs).unwrap();
    let mut server = String::from("[Interface]\nAddress = 10.13.13.1/24\nPrivateKey = srv=\n");
    for id in 1..=peer_count {
        server.push_str(&format!(
            "\n[Peer]\nPublicKey = pub-{id}=\nPresharedKey = psk-{id}=\nAllowedIPs = 10.13.13.{}/32\n",
            id + 1
        ));
    }
    std::fs::write(confs.join("wg0.conf"), server).unwrap();
}

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    db: DatabaseService,
    runtime: Arc<MockRuntime>,
    store: WireGuardLeaseStore,
}

async fn fixture(peer_count: u16, priority_slots: u16) -> Fixture {
    fixture_with(peer_count, priority_slots, false).await
}

async fn fixture_with(peer_count: u16, priority_slots: u16, refresh: bool) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    seed_tree(&root, i32::from(peer_count));

    let db = test_db().await;
    let runtime = Arc::new(MockRuntime::new());
    let config = WireGuardConfig {
        config_dir: root.clone(),
        peer_count,
        refresh_lease_instead_of_delete: refresh,
        ..Default::default()
    };

    let driver = Arc::new(WireGuardDriver::new(
        runtime.clone(),
        db.connection.clone(),
        config.clone(),
        "203.0.113.9".to_string(),
    ));
    let store = WireGuardLeaseStore::new(
        db.connection.clone(),
        Arc::new(LockRegistry::new()),
        driver,
        config,
        priority_slots,
    );

    Fixture {
        _tmp: tmp,
        root,
        db,
        runtime,
        store,
    }
}

#[tokio::test]
async fn allocates_smallest_free_id() {
    let fixture = fixture(5, 0).await;
    let expires = now_ms() + 60_000;

    assert_eq!(
        fixture.store.register_wireguard_lease(1, 5, expires).await.unwrap(),
        1
    );
    assert_eq!(
        fixture.store.register_wireguard_lease(1, 5, expires).await.unwrap(),
        2
    );

    // Free the first slot; it becomes the next grant again.
    fixture.store.mark_config_as_free(1).await.unwrap();
    assert_eq!(
        fixture.store.register_wireguard_lease(1, 5, expires).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn priority_and_standard_ranges_are_disjoint() {
    let fixture = fixture(10, 2).await;

    assert_eq!(fixture.store.range_for(true), (1, 2));
    assert_eq!(fixture.store.range_for(false), (3, 10));

    let expires = now_ms() + 60_000;
    let standard = fixture.store.range_for(false);
    let id = fixture
        .store
        .register_wireguard_lease(standard.0, standard.1, expires)
        .await
        .unwrap();
    assert_eq!(id, 3);
}

#[tokio::test]
async fn degenerate_priority_config_collapses_to_full_range() {
    let fixture = fixture(3, 5).await;
    assert_eq!(fixture.store.range_for(true), (1, 3));
    assert_eq!(fixture.store.range_for(false), (1, 3));
}

#[tokio::test]
async fn full_pool_recovers_after_expiry() {
    let fixture = fixture(3, 0).await;

    // Three leases, all already lapsed.
    for id in 1..=3 {
        wireguard_leases::Model::insert_lease(&fixture.db.connection, id, now_ms() - 2_000)
            .await
            .unwrap();
    }

    // Delete-mode cleanup removes peer dirs and restarts the container,
    // which in production regenerates the tree.
    let root = fixture.root.clone();
    fixture.runtime.set_restart_hook(move |_| seed_tree(&root, 3));

    let id = fixture
        .store
        .register_wireguard_lease(1, 3, now_ms() + 60_000)
        .await
        .unwrap();
    assert!((1..=3).contains(&id));

    // Only the new lease remains.
    let open = fixture.store.check_open_leases().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, id);
    assert_eq!(fixture.runtime.restart_count("wireguard"), 1);
}

#[tokio::test]
async fn exhausted_pool_reports_soonest_expiry() {
    let fixture = fixture(2, 0).await;
    let soonest = now_ms() + 30_000;

    wireguard_leases::Model::insert_lease(&fixture.db.connection, 1, soonest)
        .await
        .unwrap();
    wireguard_leases::Model::insert_lease(&fixture.db.connection, 2, soonest + 10_000)
        .await
        .unwrap();

    let result = fixture
        .store
        .register_wireguard_lease(1, 2, now_ms() + 60_000)
        .await;

    match result {
        Err(NodeError::LeaseExhausted {
            pool,
            soonest_expiry_ms,
        }) => {
            assert_eq!(pool, "wireguard");
            assert_eq!(soonest_expiry_ms, Some(soonest));
        }
        other => panic!("expected LeaseExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn refresh_mode_rotates_in_place_without_restart() {
    let fixture = fixture_with(3, 0, true).await;

    wireguard_leases::Model::insert_lease(&fixture.db.connection, 1, now_ms() - 2_000)
        .await
        .unwrap();
    wireguard_leases::Model::insert_lease(&fixture.db.connection, 2, now_ms() - 2_000)
        .await
        .unwrap();

    let reclaimed = fixture.store.cleanup_expired().await.unwrap();
    assert_eq!(reclaimed, 2);

    // Keys rotated on disk, no disruptive restart, slots free again.
    let conf = std::fs::read_to_string(fixture.root.join("peer1/peer1.conf")).unwrap();
    assert!(!conf.contains("PrivateKey = key-1="));
    assert_eq!(fixture.runtime.restart_count("wireguard"), 0);

    let leased =
        wireguard_leases::Model::leased_ids_in_range(&fixture.db.connection, 1, 3)
            .await
            .unwrap();
    assert!(leased.is_empty());
}

#[tokio::test]
async fn refresh_mode_keeps_rows_whose_rotation_failed() {
    let fixture = fixture_with(3, 0, true).await;

    wireguard_leases::Model::insert_lease(&fixture.db.connection, 1, now_ms() - 2_000)
        .await
        .unwrap();
    wireguard_leases::Model::insert_lease(&fixture.db.connection, 2, now_ms() - 2_000)
        .await
        .unwrap();

    // Peer 2's live-interface swap fails mid-rotation and rolls back.
    fixture.runtime.fail_on("peer pub-2= remove");

    let reclaimed = fixture.store.cleanup_expired().await.unwrap();
    assert_eq!(reclaimed, 1);

    // The rolled-back peer keeps its old key material AND its lease row:
    // the slot must not be re-leased while the old credentials are live.
    let conf = std::fs::read_to_string(fixture.root.join("peer2/peer2.conf")).unwrap();
    assert!(conf.contains("PrivateKey = key-2="));
    let leased =
        wireguard_leases::Model::leased_ids_in_range(&fixture.db.connection, 1, 3)
            .await
            .unwrap();
    assert_eq!(leased, vec![2]);

    // Only the successfully rotated slot is allocatable again.
    let id = fixture
        .store
        .register_wireguard_lease(1, 2, now_ms() + 60_000)
        .await
        .unwrap();
    assert_eq!(id, 1);
}

#[tokio::test]
async fn cleanup_skips_restart_while_leases_are_open() {
    let fixture = fixture(3, 0).await;

    wireguard_leases::Model::insert_lease(&fixture.db.connection, 1, now_ms() - 2_000)
        .await
        .unwrap();
    wireguard_leases::Model::insert_lease(&fixture.db.connection, 2, now_ms() + 60_000)
        .await
        .unwrap();

    let reclaimed = fixture.store.cleanup_expired().await.unwrap();
    assert_eq!(reclaimed, 1);

    // An open lease would be disconnected by a restart.
    assert_eq!(fixture.runtime.restart_count("wireguard"), 0);

    let open = fixture.store.check_open_leases().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, 2);
}
