use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;

use tpn_model::entities::challenges;
use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::WorkerQuery;

use crate::config::RunMode;
use crate::federation::client::INTERNAL_POOL_UID;
use crate::federation::{MiningPoolAnnouncement, WorkerBroadcastEntry, WorkersBroadcast};
use crate::manager::Manager;

const SCORE_WORKERS_INTERVAL: Duration = Duration::from_secs(15 * 60);
const SCORE_POOLS_INTERVAL: Duration = Duration::from_secs(5 * 60);
const REGISTER_POOL_INTERVAL: Duration = Duration::from_secs(60 * 60);
const REGISTER_WORKER_INTERVAL: Duration = Duration::from_secs(15 * 60);
const BROADCAST_WORKERS_INTERVAL: Duration = Duration::from_secs(15 * 60);
const TICKET_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const CHALLENGE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

const SCORE_WORKERS_BUDGET: Duration = Duration::from_secs(10 * 60);
const CHALLENGE_TTL_SECS: i64 = 60 * 60;

/// Spawns the role-appropriate recurring jobs. Every job either takes its
/// named lock via `try_acquire` internally or is idempotent; a tick that
/// finds the previous run still going simply skips.
pub fn spawn_recurring_tasks(manager: Arc<Manager>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let run_mode = manager.config().run_mode;

    match run_mode {
        RunMode::Miner => {
            handles.push(spawn_job(
                "score_all_known_workers",
                SCORE_WORKERS_INTERVAL,
                manager.clone(),
                |manager| async move {
                    manager
                        .worker_scorer()
                        .score_all_known_workers(SCORE_WORKERS_BUDGET)
                        .await
                        .map(|_| ())
                },
            ));
            handles.push(spawn_job(
                "register_mining_pool_with_validators",
                REGISTER_POOL_INTERVAL,
                manager.clone(),
                register_mining_pool,
            ));
            handles.push(spawn_job(
                "register_mining_pool_workers_with_validators",
                BROADCAST_WORKERS_INTERVAL,
                manager.clone(),
                broadcast_workers,
            ));
        }
        RunMode::Validator => {
            handles.push(spawn_job(
                "score_mining_pools",
                SCORE_POOLS_INTERVAL,
                manager.clone(),
                |manager| async move { manager.pool_scorer().score_mining_pools().await.map(|_| ()) },
            ));
        }
        RunMode::Worker => {
            if manager.config().federation.mining_pool_url.is_some() {
                handles.push(spawn_job(
                    "register_worker_with_pool",
                    REGISTER_WORKER_INTERVAL,
                    manager.clone(),
                    |manager| async move {
                        if manager.client().wait_for_local_server().await {
                            manager.client().register_worker_with_pool().await?;
                        }
                        Ok(())
                    },
                ));
            }
        }
    }

    handles.push(spawn_job(
        "ticket_sweep",
        TICKET_SWEEP_INTERVAL,
        manager.clone(),
        |manager| async move {
            manager.tickets().sweep();
            Ok(())
        },
    ));
    handles.push(spawn_job(
        "challenge_sweep",
        CHALLENGE_SWEEP_INTERVAL,
        manager,
        |manager| async move {
            challenges::Model::sweep_expired(manager.db(), CHALLENGE_TTL_SECS).await?;
            Ok(())
        },
    ));

    tracing::info!(%run_mode, jobs = handles.len(), "recurring tasks spawned");
    handles
}

fn spawn_job<F, Fut>(
    name: &'static str,
    every: Duration,
    manager: Arc<Manager>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Manager>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = crate::error::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = job(manager.clone()).await {
                tracing::warn!(job = name, error = %e, "recurring job failed");
            }
        }
    })
}

async fn register_mining_pool(manager: Arc<Manager>) -> crate::error::Result<()> {
    let config = manager.config();
    let Some(uid) = config.federation.mining_pool_uid else {
        tracing::debug!("no mining pool uid configured, skipping registration");
        return Ok(());
    };

    if !manager.client().wait_for_local_server().await {
        return Ok(());
    }

    let workers = workers::Model::get_workers(
        manager.db(),
        WorkerQuery {
            mining_pool_uid: Some(INTERNAL_POOL_UID.to_string()),
            ..Default::default()
        },
    )
    .await?;

    let announcement = MiningPoolAnnouncement {
        mining_pool_uid: uid,
        url: config
            .federation
            .mining_pool_url
            .clone()
            .unwrap_or_else(|| config.public_base_url()),
        worker_pool_size: workers.len() as i32,
    };

    manager
        .client()
        .register_mining_pool_with_validators(&announcement)
        .await;
    Ok(())
}

async fn broadcast_workers(manager: Arc<Manager>) -> crate::error::Result<()> {
    let config = manager.config();
    let Some(uid) = config.federation.mining_pool_uid else {
        return Ok(());
    };

    let workers = workers::Model::get_workers(
        manager.db(),
        WorkerQuery {
            mining_pool_uid: Some(INTERNAL_POOL_UID.to_string()),
            status: Some(WorkerStatus::Up),
            ..Default::default()
        },
    )
    .await?;

    if workers.is_empty() {
        return Ok(());
    }

    let broadcast = WorkersBroadcast {
        mining_pool_uid: uid,
        mining_pool_url: config
            .federation
            .mining_pool_url
            .clone()
            .unwrap_or_else(|| config.public_base_url()),
        workers: workers.into_iter().map(broadcast_entry).collect(),
    };

    manager
        .client()
        .register_mining_pool_workers_with_validators(&broadcast)
        .await;
    Ok(())
}

fn broadcast_entry(worker: workers::Model) -> WorkerBroadcastEntry {
    WorkerBroadcastEntry {
        ip: worker.ip,
        public_port: worker.public_port,
        wireguard_config: worker.wireguard_config,
        socks5_config: worker.socks5_config,
        payment_address_evm: worker.payment_address_evm,
        payment_address_bittensor: worker.payment_address_bittensor,
        version: worker.version,
    }
}
