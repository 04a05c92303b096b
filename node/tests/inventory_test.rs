#![cfg(feature = "mock-node")]

use tpn_model::entities::socks;
use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::{SocksWrite, WorkerQuery, WorkerWrite};
use tpn_node::services::database::DatabaseService;

async fn test_db() -> DatabaseService {
    let db = DatabaseService::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn worker(ip: &str) -> WorkerWrite {
    WorkerWrite {
        ip: ip.to_string(),
        public_port: 3000,
        mining_pool_url: "http://pool.example".to_string(),
        payment_address_evm: None,
        payment_address_bittensor: None,
        wireguard_config: None,
        socks5_config: None,
        version: Some("1.0.0".to_string()),
    }
}

fn sock(username: &str, password: &str) -> SocksWrite {
    SocksWrite {
        ip_address: "203.0.113.9".to_string(),
        port: 1080,
        username: username.to_string(),
        password: password.to_string(),
        available: true,
    }
}

#[tokio::test]
async fn rebroadcast_sweeps_absent_workers_per_pool() {
    let db = test_db().await;

    workers::Model::write_workers(
        &db.connection,
        "7",
        Some("203.0.113.7"),
        vec![worker("10.0.0.1"), worker("10.0.0.2")],
    )
    .await
    .unwrap();
    workers::Model::write_workers(&db.connection, "8", None, vec![worker("10.0.0.1")])
        .await
        .unwrap();

    // Pool 7 re-broadcasts without 10.0.0.2.
    workers::Model::write_workers(
        &db.connection,
        "7",
        Some("203.0.113.7"),
        vec![worker("10.0.0.1")],
    )
    .await
    .unwrap();

    let pool_7 = workers::Model::get_workers(
        &db.connection,
        WorkerQuery {
            mining_pool_uid: Some("7".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(pool_7.len(), 1);
    assert_eq!(pool_7[0].ip, "10.0.0.1");

    // Pool 8's identically-addressed worker is untouched.
    let pool_8 = workers::Model::get_workers(
        &db.connection,
        WorkerQuery {
            mining_pool_uid: Some("8".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(pool_8.len(), 1);
}

#[tokio::test]
async fn duplicate_ips_in_broadcast_are_deduplicated() {
    let db = test_db().await;

    let written = workers::Model::write_workers(
        &db.connection,
        "7",
        None,
        vec![worker("10.0.0.1"), worker("10.0.0.1"), worker("10.0.0.2")],
    )
    .await
    .unwrap();

    assert_eq!(written, 2);
}

#[tokio::test]
async fn get_workers_filters_compose() {
    let db = test_db().await;

    workers::Model::write_workers(
        &db.connection,
        "7",
        None,
        vec![worker("10.0.0.1"), worker("10.0.0.2"), worker("10.0.0.3")],
    )
    .await
    .unwrap();

    let rows = workers::Model::get_workers(
        &db.connection,
        WorkerQuery {
            mining_pool_uid: Some("7".to_string()),
            status: Some(WorkerStatus::Tbd),
            limit: Some(2),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    let none = workers::Model::get_workers(
        &db.connection,
        WorkerQuery {
            status: Some(WorkerStatus::Up),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn write_socks_mirrors_incoming_set_exactly() {
    let db = test_db().await;

    socks::Model::write_socks(
        &db.connection,
        vec![sock("alice", "pw1"), sock("bob", "pw2"), sock("alice", "ignored")],
    )
    .await
    .unwrap();

    let rows = socks::Model::priority_rows(&db.connection, 100).await.unwrap();
    assert_eq!(rows.len(), 2);
    // First occurrence wins on duplicate usernames.
    assert_eq!(rows[0].username, "alice");
    assert_eq!(rows[0].password, "pw1");

    // Re-write with a rotated password and a shrunk set.
    socks::Model::write_socks(&db.connection, vec![sock("alice", "pw9")]).await.unwrap();

    let rows = socks::Model::priority_rows(&db.connection, 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].username, "alice");
    assert_eq!(rows[0].password, "pw9");

    // Empty input clears the table.
    socks::Model::write_socks(&db.connection, Vec::new()).await.unwrap();
    let rows = socks::Model::priority_rows(&db.connection, 100).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn count_available_matches_rows_past_priority_slots() {
    let db = test_db().await;
    let priority_slots = 3;

    socks::Model::write_socks(
        &db.connection,
        (1..=10).map(|i| sock(&format!("user{i:04}"), "pw")).collect(),
    )
    .await
    .unwrap();

    let count = socks::Model::count_available(&db.connection, priority_slots).await.unwrap();
    assert_eq!(count, 7);

    // Lease one standard row; availability drops by one.
    let row = socks::Model::first_available_standard(&db.connection, priority_slots)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.username, "user0004");
    socks::Model::mark_leased(&db.connection, row, 1).await.unwrap();

    let count = socks::Model::count_available(&db.connection, priority_slots).await.unwrap();
    assert_eq!(count, 6);
}
