use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tpn_model::entities::challenges;
use tpn_model::entities::mining_pools;
use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::{WorkerPerformance, WorkerWrite};

use crate::error::{NodeError, Result};
use crate::federation::client::INTERNAL_POOL_UID;
use crate::federation::{
    ConfigFormat, MiningPoolAnnouncement, NeuronInfo, VpnRequestParams, WorkersBroadcast,
};
use crate::manager::Manager;
use crate::utils::net::canonical_ip;

/// `GET /` — node identity, consumed by peers to learn version and the
/// preferred public endpoint.
pub async fn identity(State(manager): State<Arc<Manager>>) -> Json<serde_json::Value> {
    let config = manager.config();

    Json(serde_json::json!({
        "branch": option_env!("TPN_GIT_BRANCH").unwrap_or("unknown"),
        "version": env!("CARGO_PKG_VERSION"),
        "hash": option_env!("TPN_GIT_HASH").unwrap_or("unknown"),
        "SERVER_PUBLIC_PROTOCOL": config.server.public_protocol,
        "SERVER_PUBLIC_HOST": config.server.public_host,
        "SERVER_PUBLIC_PORT": config.server.public_port,
        "MINING_POOL_URL": config.federation.mining_pool_url,
        "MINING_POOL_REWARDS": config.federation.mining_pool_rewards,
        "MINING_POOL_WEBSITE_URL": config.federation.mining_pool_website_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VpnQuery {
    pub geo: Option<String>,
    #[serde(rename = "type")]
    pub config_type: Option<String>,
    pub format: Option<String>,
    pub lease_seconds: Option<u64>,
    pub priority: Option<bool>,
    pub whitelist: Option<String>,
    pub blacklist: Option<String>,
    pub feedback_url: Option<String>,
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// `GET /vpn` — provision a lease (role-dispatched).
pub async fn vpn(
    State(manager): State<Arc<Manager>>,
    Query(query): Query<VpnQuery>,
) -> Result<Response> {
    let params = VpnRequestParams {
        geo: query.geo.filter(|geo| !geo.trim().is_empty()),
        config_type: query
            .config_type
            .as_deref()
            .unwrap_or("wireguard")
            .parse()?,
        format: query.format.as_deref().unwrap_or("json").parse()?,
        lease_seconds: query.lease_seconds.unwrap_or(3600),
        priority: query.priority.unwrap_or(false),
        whitelist: split_list(query.whitelist),
        blacklist: split_list(query.blacklist),
    };

    let response = manager
        .pipeline()
        .handle_vpn_request(&params, query.feedback_url.as_deref())
        .await?;

    if params.format == ConfigFormat::Text && !response.cancelled {
        return Ok(response.config.into_response());
    }
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct WorkerRegistration {
    #[serde(default)]
    pub wireguard_config: Option<String>,
    #[serde(default)]
    pub socks5_config: Option<String>,
    #[serde(default)]
    pub mining_pool_url: Option<String>,
    #[serde(default)]
    pub public_port: Option<i32>,
    #[serde(default)]
    pub payment_address_evm: Option<String>,
    #[serde(default)]
    pub payment_address_bittensor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkerRegistered {
    pub registered: bool,
    pub worker: workers::Model,
}

/// `POST /worker` — a worker announces itself to its pool. The row is keyed
/// by the unspoofable source address; broadcast configs are stored for the
/// scorer. Missing configs are tolerated (the scorer fetches directly).
pub async fn worker_register(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<WorkerRegistration>,
) -> Result<Json<WorkerRegistered>> {
    let ip = canonical_ip(remote.ip()).to_string();
    let mining_pool_url = body
        .mining_pool_url
        .or_else(|| manager.config().federation.mining_pool_url.clone())
        .unwrap_or_else(|| manager.config().public_base_url());

    let worker = workers::Model::upsert(
        manager.db(),
        INTERNAL_POOL_UID,
        None,
        WorkerWrite {
            ip: ip.clone(),
            public_port: body.public_port.unwrap_or(3000),
            mining_pool_url,
            payment_address_evm: body.payment_address_evm,
            payment_address_bittensor: body.payment_address_bittensor,
            wireguard_config: body.wireguard_config,
            socks5_config: body.socks5_config,
            version: body.version.clone(),
        },
    )
    .await?;

    // Annotate with geodata right away; the scorer refines later.
    let geodata = ip.parse().ok().map(|ip| manager.geo().ip_geodata(ip));
    workers::Model::write_worker_performance(
        manager.db(),
        vec![WorkerPerformance {
            id: worker.id,
            status: WorkerStatus::Up,
            country_code: geodata.as_ref().and_then(|geo| geo.country_code.clone()),
            connection_type: geodata.as_ref().map(|geo| geo.connection_type),
            datacenter: geodata.as_ref().map(|geo| geo.datacenter),
            version: body.version,
        }],
    )
    .await?;

    let worker = workers::Model::find_by_natural_key(manager.db(), &ip, INTERNAL_POOL_UID)
        .await?
        .ok_or_else(|| NodeError::internal("worker row vanished after upsert"))?;

    Ok(Json(WorkerRegistered {
        registered: true,
        worker,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WorkerFeedbackEntry {
    pub ip: String,
    pub status: WorkerStatus,
}

#[derive(Debug, Deserialize)]
pub struct WorkerFeedback {
    pub workers: Vec<WorkerFeedbackEntry>,
}

/// `POST /worker/feedback` — a validator posts per-worker verdicts to the
/// pool. Validator origin is established from the remote address only.
pub async fn worker_feedback(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<WorkerFeedback>,
) -> Result<Json<serde_json::Value>> {
    require_validator(&manager, remote)?;

    let mut updated = 0;
    for entry in body.workers {
        let row =
            workers::Model::find_by_natural_key(manager.db(), &entry.ip, INTERNAL_POOL_UID)
                .await?;
        if let Some(row) = row {
            workers::Model::set_status(manager.db(), row.id, entry.status).await?;
            updated += 1;
        }
    }

    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// `POST /validator/broadcast/mining_pool` — a pool registers itself with
/// this validator. The recorded ip is the unspoofable source address; the
/// pool scorer later cross-checks it against the neuron map.
pub async fn broadcast_mining_pool(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<MiningPoolAnnouncement>,
) -> Result<Json<serde_json::Value>> {
    let ip = canonical_ip(remote.ip()).to_string();

    let pool = mining_pools::Model::register(
        manager.db(),
        body.mining_pool_uid,
        &body.url,
        &ip,
        body.worker_pool_size,
    )
    .await
    .map_err(NodeError::from)?;

    Ok(Json(serde_json::json!({
        "registered": true,
        "mining_pool_uid": pool.mining_pool_uid,
    })))
}

/// `POST /validator/broadcast/workers` — a pool publishes its worker list.
pub async fn broadcast_workers(
    State(manager): State<Arc<Manager>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<WorkersBroadcast>,
) -> Result<Json<serde_json::Value>> {
    let pool_ip = canonical_ip(remote.ip()).to_string();
    let pool_url = body.mining_pool_url.clone();

    let incoming: Vec<WorkerWrite> = body
        .workers
        .into_iter()
        .map(|entry| WorkerWrite {
            ip: entry.ip,
            public_port: entry.public_port,
            mining_pool_url: pool_url.clone(),
            payment_address_evm: entry.payment_address_evm,
            payment_address_bittensor: entry.payment_address_bittensor,
            wireguard_config: entry.wireguard_config,
            socks5_config: entry.socks5_config,
            version: entry.version,
        })
        .collect();

    let written = workers::Model::write_workers(
        manager.db(),
        &body.mining_pool_uid.to_string(),
        Some(&pool_ip),
        incoming,
    )
    .await
    .map_err(NodeError::from)?;

    Ok(Json(serde_json::json!({ "written": written })))
}

/// `POST /protocol/broadcast/neurons` — the upstream neuron publishes the
/// validator/miner identity set.
pub async fn neurons(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<Vec<NeuronInfo>>,
) -> Json<serde_json::Value> {
    manager.validators().apply_neuron_broadcast(&body);

    Json(serde_json::json!({
        "received": body.len(),
        "validators": manager.validators().validator_count(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PoolScoreBody {
    pub score: f64,
    pub stability: f64,
    pub size: f64,
    pub performance: f64,
    pub geo: f64,
}

/// `GET /validator/score/mining_pools` — scores per pool uid, polled by the
/// upstream neuron to set chain weights.
pub async fn pool_scores(
    State(manager): State<Arc<Manager>>,
) -> Result<Json<HashMap<String, PoolScoreBody>>> {
    let pools = mining_pools::Model::all(manager.db()).await.map_err(NodeError::from)?;

    let scores: HashMap<String, PoolScoreBody> = pools
        .into_iter()
        .map(|pool| {
            (
                pool.mining_pool_uid.to_string(),
                PoolScoreBody {
                    score: pool.score_composite,
                    stability: pool.score_stability,
                    size: pool.score_size,
                    performance: pool.score_performance,
                    geo: pool.score_geo,
                },
            )
        })
        .collect();

    Ok(Json(scores))
}

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub miner_uid: Option<String>,
}

/// `GET /challenge/new` — mint a challenge/solution pair.
pub async fn challenge_new(
    State(manager): State<Arc<Manager>>,
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<serde_json::Value>> {
    let row = challenges::Model::create(manager.db(), query.miner_uid)
        .await
        .map_err(NodeError::from)?;

    Ok(Json(serde_json::json!({
        "challenge": row.challenge,
        "challenge_url": format!(
            "{}/protocol/challenge/{}",
            manager.config().public_base_url(),
            row.challenge
        ),
    })))
}

/// `GET /protocol/challenge/{id}` — resolve a previously minted challenge.
pub async fn challenge_solution(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<Uuid>,
) -> Result<Json<challenges::Model>> {
    let row = challenges::Model::find(manager.db(), id)
        .await
        .map_err(NodeError::from)?
        .ok_or_else(|| NodeError::NotFound {
            what: format!("challenge {id}"),
        })?;

    Ok(Json(row))
}

/// `GET /api/status/request/{request_id}` — fan-out feedback endpoint.
pub async fn request_status(
    State(manager): State<Arc<Manager>>,
    Path(request_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let status = manager
        .tickets()
        .status(&request_id)
        .ok_or_else(|| NodeError::NotFound {
            what: format!("request {request_id}"),
        })?;

    Ok(Json(serde_json::json!({ "status": status })))
}

pub(crate) fn require_validator(manager: &Manager, remote: SocketAddr) -> Result<()> {
    manager
        .validators()
        .is_validator(remote.ip())
        .map(|_| ())
        .ok_or_else(|| NodeError::Unauthorized {
            message: format!("{} is not a known validator", canonical_ip(remote.ip())),
        })
}
