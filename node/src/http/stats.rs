use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tpn_model::entities::mining_pools;
use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::WorkerQuery;

use crate::error::{NodeError, Result};
use crate::manager::Manager;

#[derive(Debug, Deserialize)]
pub struct ApiKeyQuery {
    pub api_key: Option<String>,
}

/// Dashboards are readable with the admin key or from a validator address;
/// everyone else gets 403.
fn require_stats_access(
    manager: &Manager,
    remote: SocketAddr,
    api_key: Option<&str>,
) -> Result<()> {
    if let (Some(expected), Some(provided)) = (
        manager.config().federation.admin_api_key.as_deref(),
        api_key,
    ) {
        if expected == provided {
            return Ok(());
        }
    }

    if manager.validators().is_validator(remote.ip()).is_some() {
        return Ok(());
    }

    Err(NodeError::Unauthorized {
        message: "stats require an api key or a validator origin".to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatsBody {
    pub run_mode: String,
    pub workers_total: usize,
    pub workers_up: usize,
    pub workers_down: usize,
    pub mining_pools: usize,
    pub open_wireguard_leases: usize,
    pub available_socks5: u64,
    pub validators_known: usize,
    pub wireguard_reachable: bool,
}

/// `GET /api/stats`
pub async fn stats(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiKeyQuery>,
) -> Result<Json<StatsBody>> {
    require_stats_access(&manager, remote, query.api_key.as_deref())?;

    let workers =
        workers::Model::get_workers(manager.db(), WorkerQuery::default()).await.map_err(NodeError::from)?;
    let pools = mining_pools::Model::all(manager.db()).await.map_err(NodeError::from)?;
    let open_leases = manager.wg_leases().check_open_leases().await?;
    let available_socks5 = manager.socks_leases().count_available().await?;
    let wireguard_reachable = manager.wireguard().check_reachable().await;

    Ok(Json(StatsBody {
        run_mode: manager.config().run_mode.to_string(),
        workers_total: workers.len(),
        workers_up: workers
            .iter()
            .filter(|worker| worker.status == WorkerStatus::Up)
            .count(),
        workers_down: workers
            .iter()
            .filter(|worker| worker.status == WorkerStatus::Down)
            .count(),
        mining_pools: pools.len(),
        open_wireguard_leases: open_leases.len(),
        available_socks5,
        validators_known: manager.validators().validator_count(),
        wireguard_reachable,
    }))
}

/// `GET /api/stats/pools`
pub async fn stats_pools(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiKeyQuery>,
) -> Result<Json<Vec<mining_pools::Model>>> {
    require_stats_access(&manager, remote, query.api_key.as_deref())?;

    let pools = mining_pools::Model::all(manager.db()).await.map_err(NodeError::from)?;
    Ok(Json(pools))
}

#[derive(Debug, Serialize)]
pub struct WorkerStatsEntry {
    pub ip: String,
    pub mining_pool_uid: String,
    pub country_code: Option<String>,
    pub status: WorkerStatus,
    pub last_tested_at: Option<chrono::NaiveDateTime>,
    pub version: Option<String>,
}

/// `GET /api/stats/workers`
pub async fn stats_workers(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiKeyQuery>,
) -> Result<Json<Vec<WorkerStatsEntry>>> {
    require_stats_access(&manager, remote, query.api_key.as_deref())?;

    let workers =
        workers::Model::get_workers(manager.db(), WorkerQuery::default()).await.map_err(NodeError::from)?;

    Ok(Json(
        workers
            .into_iter()
            .map(|worker| WorkerStatsEntry {
                ip: worker.ip,
                mining_pool_uid: worker.mining_pool_uid,
                country_code: worker.country_code,
                status: worker.status,
                last_tested_at: worker.last_tested_at,
                version: worker.version,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct PoolAuditBody {
    pub pool: mining_pools::Model,
    pub workers: Vec<workers::Model>,
}

/// `GET /validator/score/audit/{pool_uid}` — full audit of one pool.
pub async fn pool_audit(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(pool_uid): Path<i32>,
    Query(query): Query<ApiKeyQuery>,
) -> Result<Json<PoolAuditBody>> {
    require_stats_access(&manager, remote, query.api_key.as_deref())?;

    let pool = mining_pools::Model::by_uid(manager.db(), pool_uid)
        .await
        .map_err(NodeError::from)?
        .ok_or_else(|| NodeError::NotFound {
            what: format!("mining pool {pool_uid}"),
        })?;

    let workers = workers::Model::get_workers(
        manager.db(),
        WorkerQuery {
            mining_pool_uid: Some(pool_uid.to_string()),
            ..Default::default()
        },
    )
    .await
    .map_err(NodeError::from)?;

    Ok(Json(PoolAuditBody { pool, workers }))
}
