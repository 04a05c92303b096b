#![cfg(feature = "mock-node")]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;

use tpn_model::entities::socks;
use tpn_node::config::DanteConfig;
use tpn_node::container::DanteDriver;
use tpn_node::lease::Socks5LeaseStore;
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

fn seed_passwords(dir: &Path, count: usize) {
    for index in 1..=count {
        std::fs::write(
            dir.join(format!("user{index:04}.password")),
            format!("secret-{index:04}"),
        )
        .unwrap();
    }
}

struct Fixture {
    _passwords: tempfile::TempDir,
    _regen: tempfile::TempDir,
    password_dir: PathBuf,
    regen_dir: PathBuf,
    db: DatabaseService,
    dante: Arc<DanteDriver>,
    store: Socks5LeaseStore,
}

async fn fixture(user_count: usize, priority_slots: u16) -> Fixture {
    let passwords = tempfile::tempdir().unwrap();
    let regen = tempfile::tempdir().unwrap();
    seed_passwords(passwords.path(), user_count);

    let db = test_db().await;
    let config = DanteConfig {
        password_dir: passwords.path().to_path_buf(),
        regen_request_dir: regen.path().to_path_buf(),
        ..Default::default()
    };

    let dante = Arc::new(
        DanteDriver::new(
            Arc::new(MockRuntime::new()),
            db.connection.clone(),
            config,
            "203.0.113.9".to_string(),
        )
        .with_regen_timeout(Duration::from_millis(500)),
    );
    dante.load_from_disk().await.unwrap();

    let store = Socks5LeaseStore::new(
        db.connection.clone(),
        Arc::new(LockRegistry::new()),
        dante.clone(),
        priority_slots,
    );

    Fixture {
        password_dir: passwords.path().to_path_buf(),
        regen_dir: regen.path().to_path_buf(),
        _passwords: passwords,
        _regen: regen,
        db,
        dante,
        store,
    }
}

#[tokio::test]
async fn disk_load_mirrors_files_and_is_idempotent() {
    let fixture = fixture(5, 2).await;

    let first = socks::Model::priority_rows(&fixture.db.connection, 100).await.unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(first[0].username, "user0001");
    assert_eq!(first[0].password, "secret-0001");

    // Re-running the load is a no-op: db state is a function of the files.
    fixture.dante.load_from_disk().await.unwrap();
    let second = socks::Model::priority_rows(&fixture.db.connection, 100).await.unwrap();
    assert_eq!(
        first.iter().map(|row| (&row.username, &row.password)).collect::<Vec<_>>(),
        second.iter().map(|row| (&row.username, &row.password)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn standard_lease_is_exclusive_and_writes_used_marker() {
    let fixture = fixture(5, 2).await;
    let expires = now_ms() + 60_000;

    let lease = fixture.store.get_socks5_config(expires, false).await.unwrap();
    // Priority rows are user0001/user0002; the standard pool starts after.
    assert_eq!(lease.username, "user0003");
    assert!(!lease.available);
    assert_eq!(lease.expires_at, expires);

    let marker = fixture.password_dir.join("user0003.password.used");
    let contents = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(contents, expires.to_string());

    // Same caller again gets the next exclusive row.
    let second = fixture.store.get_socks5_config(expires, false).await.unwrap();
    assert_eq!(second.username, "user0004");
}

#[tokio::test]
async fn concurrent_priority_leases_share_rows_without_flipping() {
    let fixture = fixture(4, 2).await;
    let store = Arc::new(fixture.store);
    let expires = now_ms() + 60_000;

    let results = join_all((0..10).map(|_| {
        let store = store.clone();
        async move { store.get_socks5_config(expires, true).await }
    }))
    .await;

    let mut usernames = Vec::new();
    for result in results {
        let row = result.expect("priority lease always succeeds");
        assert!(
            row.username == "user0001" || row.username == "user0002",
            "priority lease outside priority pool: {}",
            row.username
        );
        usernames.push(row.username);
    }

    // Ten requests over two rows: at least one row served multiple callers.
    let firsts = usernames.iter().filter(|name| *name == "user0001").count();
    assert!(firsts.max(usernames.len() - firsts) >= 2);

    // Priority rows never flip available.
    let rows = socks::Model::priority_rows(&fixture.db.connection, 2).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.available));
}

#[tokio::test]
async fn count_available_skips_priority_slots() {
    let fixture = fixture(6, 2).await;

    assert_eq!(fixture.store.count_available().await.unwrap(), 4);

    let expires = now_ms() + 60_000;
    fixture.store.get_socks5_config(expires, false).await.unwrap();
    assert_eq!(fixture.store.count_available().await.unwrap(), 3);
}

#[tokio::test]
async fn cleanup_rotates_expired_credentials() {
    let fixture = fixture(4, 1).await;

    // Lease user0002 with an already-lapsed expiry.
    let lease = fixture
        .store
        .get_socks5_config(now_ms() - 5_000, false)
        .await
        .unwrap();
    assert_eq!(lease.username, "user0002");

    // Pretend to be the daemon: consume the trigger and rewrite the
    // password file.
    let regen_dir = fixture.regen_dir.clone();
    let password_dir = fixture.password_dir.clone();
    let daemon = tokio::spawn(async move {
        let trigger = regen_dir.join("user0002");
        for _ in 0..100 {
            if trigger.exists() {
                std::fs::write(password_dir.join("user0002.password"), "rotated-secret")
                    .unwrap();
                std::fs::remove_file(&trigger).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("trigger file never appeared");
    });

    let report = fixture.store.cleanup_expired().await.unwrap();
    daemon.await.unwrap();

    assert_eq!(report.rotated, 1);
    assert_eq!(report.deleted, 0);

    let rows = socks::Model::priority_rows(&fixture.db.connection, 100).await.unwrap();
    let rotated = rows.iter().find(|row| row.username == "user0002").unwrap();
    assert!(rotated.available);
    assert_eq!(rotated.expires_at, 0);
    assert_eq!(rotated.password, "rotated-secret");

    // Marker gone: the credential is leasable again.
    assert!(!fixture.password_dir.join("user0002.password.used").exists());
}

#[tokio::test]
async fn failed_rotation_deletes_the_row() {
    let fixture = fixture(3, 1).await;

    let lease = fixture
        .store
        .get_socks5_config(now_ms() - 5_000, false)
        .await
        .unwrap();
    assert_eq!(lease.username, "user0002");

    // Nobody consumes the trigger; regeneration times out.
    let report = fixture.store.cleanup_expired().await.unwrap();
    assert_eq!(report.rotated, 0);
    assert_eq!(report.deleted, 1);

    let rows = socks::Model::priority_rows(&fixture.db.connection, 100).await.unwrap();
    assert!(rows.iter().all(|row| row.username != "user0002"));

    // Stale trigger removed on timeout.
    assert!(!fixture.regen_dir.join("user0002").exists());
}

#[tokio::test]
async fn empty_write_clears_the_table() {
    let fixture = fixture(3, 1).await;

    // Remove every password file and re-mirror.
    for entry in std::fs::read_dir(&fixture.password_dir).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }
    fixture.dante.load_from_disk().await.unwrap();

    let rows = socks::Model::priority_rows(&fixture.db.connection, 100).await.unwrap();
    assert!(rows.is_empty());
}
