#![cfg(feature = "mock-node")]

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};

use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::{WorkerQuery, WorkerWrite};
use tpn_node::config::{Config, RunMode};
use tpn_node::federation::{FederationClient, TicketStore, ValidatorRegistry};
use tpn_node::geo::GeoResolver;
use tpn_node::mock::MockProber;
use tpn_node::scoring::WorkerScorer;
use tpn_node::services::database::DatabaseService;
use tpn_node::sync::LockRegistry;

const POOL_URL: &str = "http://pool.example";

const WG_CONF: &str = "[Interface]\nAddress = 10.0.0.2/32\nPrivateKey = k=\n\n\
                       [Peer]\nPublicKey = p=\nAllowedIPs = 0.0.0.0/0\n";

/// Stand-in for a worker's identity endpoint.
async fn spawn_worker_stub(version: &'static str, pool_url: &'static str) -> u16 {
    let app = Router::new().route(
        "/",
        get(move || async move {
            Json(serde_json::json!({
                "branch": "main",
                "version": version,
                "hash": "abc123",
                "MINING_POOL_URL": pool_url,
            }))
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

struct Fixture {
    db: DatabaseService,
    locks: Arc<LockRegistry>,
    prober: Arc<MockProber>,
    scorer: WorkerScorer,
}

async fn fixture(run_mode: RunMode) -> Fixture {
    let db = DatabaseService::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();

    let mut config = Config::default();
    config.run_mode = run_mode;
    config.federation.mining_pool_url = Some(POOL_URL.to_string());
    let config = Arc::new(config);

    let locks = Arc::new(LockRegistry::new());
    let client = Arc::new(
        FederationClient::new(
            db.connection.clone(),
            config.clone(),
            Arc::new(TicketStore::new()),
            Arc::new(ValidatorRegistry::new()),
        )
        .unwrap(),
    );

    let prober = Arc::new(MockProber::new("203.0.113.1"));
    prober.set_wireguard_egress(Some("198.51.100.99"));
    prober.set_socks5_egress(Some("198.51.100.98"));

    let scorer = WorkerScorer::new(
        db.connection.clone(),
        locks.clone(),
        client,
        prober.clone(),
        Arc::new(GeoResolver::new(&config.geo).unwrap()),
        config,
    );

    Fixture {
        db,
        locks,
        prober,
        scorer,
    }
}

async fn insert_worker(db: &DatabaseService, port: u16) -> workers::Model {
    workers::Model::upsert(
        &db.connection,
        "internal",
        None,
        WorkerWrite {
            ip: "127.0.0.1".to_string(),
            public_port: i32::from(port),
            mining_pool_url: POOL_URL.to_string(),
            payment_address_evm: None,
            payment_address_bittensor: None,
            wireguard_config: Some(WG_CONF.to_string()),
            socks5_config: Some("socks5://u:p@127.0.0.1:1080".to_string()),
            version: None,
        },
    )
    .await
    .unwrap()
}

async fn worker_status(db: &DatabaseService) -> WorkerStatus {
    let rows = workers::Model::get_workers(&db.connection, WorkerQuery::default())
        .await
        .unwrap();
    rows[0].status
}

#[tokio::test]
async fn healthy_worker_scores_up() {
    let fixture = fixture(RunMode::Miner).await;
    let port = spawn_worker_stub(env!("CARGO_PKG_VERSION"), POOL_URL).await;
    let worker = insert_worker(&fixture.db, port).await;
    assert_eq!(worker.status, WorkerStatus::Tbd);

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.up, 1);
    assert_eq!(summary.down, 0);
    assert_eq!(worker_status(&fixture.db).await, WorkerStatus::Up);

    let rows = workers::Model::get_workers(&fixture.db.connection, WorkerQuery::default())
        .await
        .unwrap();
    assert!(rows[0].last_tested_at.is_some());
}

#[tokio::test]
async fn tunnel_that_does_not_move_egress_scores_down() {
    let fixture = fixture(RunMode::Miner).await;
    let port = spawn_worker_stub(env!("CARGO_PKG_VERSION"), POOL_URL).await;
    insert_worker(&fixture.db, port).await;

    // The tunnel leaks: egress equals the direct address.
    fixture.prober.set_wireguard_egress(Some("203.0.113.1"));

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.down, 1);
    assert_eq!(worker_status(&fixture.db).await, WorkerStatus::Down);
}

#[tokio::test]
async fn worker_mode_expects_unchanged_egress() {
    let fixture = fixture(RunMode::Worker).await;
    let port = spawn_worker_stub(env!("CARGO_PKG_VERSION"), POOL_URL).await;
    insert_worker(&fixture.db, port).await;

    // A worker verifying its own tunnel sees its own public address.
    fixture.prober.set_wireguard_egress(Some("203.0.113.1"));
    fixture.prober.set_socks5_egress(Some("203.0.113.1"));

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.up, 1);
}

#[tokio::test]
async fn stale_version_scores_down() {
    let fixture = fixture(RunMode::Miner).await;
    let port = spawn_worker_stub("0.0.1", POOL_URL).await;
    insert_worker(&fixture.db, port).await;

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.down, 1);
}

#[tokio::test]
async fn pool_mismatch_scores_down() {
    let fixture = fixture(RunMode::Miner).await;
    let port = spawn_worker_stub(env!("CARGO_PKG_VERSION"), "http://other-pool.example").await;
    insert_worker(&fixture.db, port).await;

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.down, 1);
}

#[tokio::test]
async fn unparseable_config_goes_to_invalid_bucket() {
    let fixture = fixture(RunMode::Miner).await;
    let port = spawn_worker_stub(env!("CARGO_PKG_VERSION"), POOL_URL).await;

    workers::Model::upsert(
        &fixture.db.connection,
        "internal",
        None,
        WorkerWrite {
            ip: "127.0.0.1".to_string(),
            public_port: i32::from(port),
            mining_pool_url: POOL_URL.to_string(),
            payment_address_evm: None,
            payment_address_bittensor: None,
            wireguard_config: Some("definitely not a wireguard config".to_string()),
            socks5_config: None,
            version: None,
        },
    )
    .await
    .unwrap();

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.down, 1);
    assert_eq!(worker_status(&fixture.db).await, WorkerStatus::Down);
}

#[tokio::test]
async fn concurrent_sweep_is_skipped() {
    let fixture = fixture(RunMode::Miner).await;

    let guard = fixture
        .locks
        .try_acquire(tpn_node::sync::names::SCORE_ALL_KNOWN_WORKERS)
        .unwrap();

    let summary = fixture
        .scorer
        .score_all_known_workers(Duration::from_secs(5))
        .await
        .unwrap();

    assert!(summary.skipped_lock);
    drop(guard);
}
