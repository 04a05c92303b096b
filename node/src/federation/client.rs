use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use rand::Rng;
use sea_orm::DatabaseConnection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tpn_model::entities::mining_pools;
use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::WorkerQuery;

use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::federation::tickets::{TicketStatus, TicketStore};
use crate::federation::validators::ValidatorRegistry;
use crate::utils::net::is_valid_ipv4;

/// Workers a miner provisions directly carry this pool uid.
pub const INTERNAL_POOL_UID: &str = "internal";

/// Miner → worker fan-out width.
const MINER_CHUNK_SIZE: usize = 10;
/// Validator → mining-pool fan-out width.
const VALIDATOR_CHUNK_SIZE: usize = 3;
const FAN_OUT_CANDIDATE_LIMIT: u64 = 50;

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);
const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(60);
const VPN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const RETRY_JITTER_MAX_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Wireguard,
    Socks5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    Text,
    #[default]
    Json,
}

impl std::str::FromStr for ConfigType {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "wireguard" => Ok(ConfigType::Wireguard),
            "socks5" => Ok(ConfigType::Socks5),
            other => Err(NodeError::ValidationFailed {
                field: "type".to_string(),
                message: format!("unknown config type '{other}'"),
            }),
        }
    }
}

impl std::str::FromStr for ConfigFormat {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ConfigFormat::Text),
            "json" => Ok(ConfigFormat::Json),
            other => Err(NodeError::ValidationFailed {
                field: "format".to_string(),
                message: format!("unknown config format '{other}'"),
            }),
        }
    }
}

/// A "get config" request as it travels down the federation tree.
#[derive(Debug, Clone)]
pub struct VpnRequestParams {
    pub geo: Option<String>,
    pub config_type: ConfigType,
    pub format: ConfigFormat,
    pub lease_seconds: u64,
    pub priority: bool,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl Default for VpnRequestParams {
    fn default() -> Self {
        Self {
            geo: None,
            config_type: ConfigType::Wireguard,
            format: ConfigFormat::Json,
            lease_seconds: 3600,
            priority: false,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

/// Identity payload served at `GET /` by every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(rename = "SERVER_PUBLIC_PROTOCOL", default)]
    pub public_protocol: Option<String>,
    #[serde(rename = "SERVER_PUBLIC_HOST", default)]
    pub public_host: Option<String>,
    #[serde(rename = "SERVER_PUBLIC_PORT", default)]
    pub public_port: Option<u16>,
    #[serde(rename = "MINING_POOL_URL", default)]
    pub mining_pool_url: Option<String>,
    #[serde(rename = "MINING_POOL_REWARDS", default)]
    pub mining_pool_rewards: Option<String>,
    #[serde(rename = "MINING_POOL_WEBSITE_URL", default)]
    pub mining_pool_website_url: Option<String>,
}

impl NodeIdentity {
    /// Preferred base url, with the probed address as fallback host.
    pub fn base_url(&self, fallback_host: &str) -> String {
        let protocol = self.public_protocol.as_deref().unwrap_or("http");
        let host = self.public_host.as_deref().unwrap_or(fallback_host);
        let port = self.public_port.unwrap_or(3000);
        format!("{protocol}://{host}:{port}")
    }
}

/// Body a worker returns from its `/vpn` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerVpnPayload {
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub peer_id: Option<i32>,
    #[serde(default)]
    pub peer_slots: Option<i32>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub cancelled: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedConfig {
    pub config: String,
    pub peer_id: Option<i32>,
    pub expires_at: Option<i64>,
    /// Node that won the race.
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningPoolAnnouncement {
    pub mining_pool_uid: i32,
    pub url: String,
    pub worker_pool_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerBroadcastEntry {
    pub ip: String,
    pub public_port: i32,
    #[serde(default)]
    pub wireguard_config: Option<String>,
    #[serde(default)]
    pub socks5_config: Option<String>,
    #[serde(default)]
    pub payment_address_evm: Option<String>,
    #[serde(default)]
    pub payment_address_bittensor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersBroadcast {
    pub mining_pool_uid: i32,
    pub mining_pool_url: String,
    pub workers: Vec<WorkerBroadcastEntry>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BroadcastReport {
    pub successes: usize,
    pub failures: usize,
}

/// Directed-HTTP federation client: chunked first-success fan-out downward,
/// all-settled broadcasts upward.
pub struct FederationClient {
    http: reqwest::Client,
    db: DatabaseConnection,
    config: Arc<Config>,
    tickets: Arc<TicketStore>,
    validators: Arc<ValidatorRegistry>,
}

impl FederationClient {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<Config>,
        tickets: Arc<TicketStore>,
        validators: Arc<ValidatorRegistry>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NodeError::internal(format!("http client: {e}")))?;

        Ok(Self {
            http,
            db,
            config,
            tickets,
            validators,
        })
    }

    /// Single-shot GET with an explicit timeout. Probes use this: a slow
    /// node is a failed node.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> Result<T> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NodeError::upstream(url, e))?;

        if !response.status().is_success() {
            return Err(NodeError::upstream(
                url,
                format!("status {}", response.status()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| NodeError::upstream(url, e))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NodeError::upstream(url, e))?;

        if !response.status().is_success() {
            return Err(NodeError::upstream(
                url,
                format!("status {}", response.status()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| NodeError::upstream(url, e))
    }

    /// POST with exponential backoff and jitter. Used for registration and
    /// broadcast calls where the receiver being briefly down is routine.
    pub async fn post_json_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> Result<T> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match self.post_json(url, body, timeout).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(url, attempt = attempt + 1, error = %e, "request failed");
                    last_error = Some(e);
                }
            }

            if attempt + 1 < MAX_RETRIES {
                let jitter =
                    Duration::from_millis(rand::rng().random_range(0..=RETRY_JITTER_MAX_MS));
                tokio::time::sleep((delay + jitter).min(MAX_RETRY_DELAY)).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }

        Err(last_error.unwrap_or_else(|| NodeError::upstream(url, "retries exhausted")))
    }

    /// `GET /` on a node: 5 s budget, no retry.
    pub async fn probe_identity(&self, base_url: &str) -> Result<NodeIdentity> {
        self.get_json(&format!("{base_url}/"), IDENTITY_TIMEOUT).await
    }

    /// Poll a feedback url. Unreachable feedback is treated as "no verdict":
    /// the worker keeps its lease rather than cancelling on a network blip.
    pub async fn check_feedback(&self, feedback_url: &str) -> Option<TicketStatus> {
        #[derive(Deserialize)]
        struct FeedbackBody {
            status: TicketStatus,
        }

        match self
            .get_json::<FeedbackBody>(feedback_url, FEEDBACK_TIMEOUT)
            .await
        {
            Ok(body) => Some(body.status),
            Err(e) => {
                tracing::debug!(feedback_url, error = %e, "feedback poll failed");
                None
            }
        }
    }

    fn mint_feedback_url(&self, request_id: &str) -> String {
        format!(
            "{}/api/status/request/{request_id}",
            self.config.public_base_url()
        )
    }

    /// Miner-side fan-out: race chunks of own workers, first non-empty
    /// config wins, losers release via the feedback url.
    pub async fn get_worker_config_as_miner(
        &self,
        params: &VpnRequestParams,
    ) -> Result<ProvisionedConfig> {
        let workers = workers::Model::get_workers(
            &self.db,
            WorkerQuery {
                country_code: params.geo.clone(),
                status: Some(WorkerStatus::Up),
                mining_pool_uid: Some(INTERNAL_POOL_UID.to_string()),
                connection_type: None,
                randomize: true,
                limit: Some(FAN_OUT_CANDIDATE_LIMIT),
            },
        )
        .await?;

        let mut candidates: Vec<(String, i32)> = workers
            .into_iter()
            .filter(|worker| {
                (params.whitelist.is_empty() || params.whitelist.contains(&worker.ip))
                    && !params.blacklist.contains(&worker.ip)
                    && is_valid_ipv4(&worker.ip)
            })
            .map(|worker| (worker.ip, worker.public_port))
            .collect();
        candidates.shuffle(&mut rand::rng());

        if candidates.is_empty() {
            return Err(NodeError::FanOutExhausted {
                message: "no eligible workers for this request".to_string(),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        self.tickets.mark_pending(&request_id);
        let feedback_url = self.mint_feedback_url(&request_id);

        for chunk in candidates.chunks(MINER_CHUNK_SIZE) {
            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(|(ip, port)| {
                    let base = format!("http://{ip}:{port}");
                    self.fetch_vpn_config(base, ip.clone(), params, &feedback_url)
                })
                .collect();

            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(Some(config)) => {
                        // First success terminates the race; dropping the
                        // stream aborts the chunk's stragglers.
                        self.tickets.mark_complete(&request_id);
                        metrics::counter!("fan_out_wins_total", "role" => "miner").increment(1);
                        return Ok(config);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "worker attempt failed"),
                }
            }
        }

        self.tickets.mark_complete(&request_id);
        Err(NodeError::FanOutExhausted {
            message: format!("all {} workers failed to provision", candidates.len()),
        })
    }

    /// Validator-side fan-out: race chunks of mining pools; each pool in
    /// turn races its own workers and honours the same feedback url.
    pub async fn get_worker_config_as_validator(
        &self,
        params: &VpnRequestParams,
    ) -> Result<ProvisionedConfig> {
        let mut pools = mining_pools::Model::all(&self.db).await?;
        pools.shuffle(&mut rand::rng());

        if pools.is_empty() {
            return Err(NodeError::FanOutExhausted {
                message: "no known mining pools".to_string(),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        self.tickets.mark_pending(&request_id);
        let feedback_url = self.mint_feedback_url(&request_id);

        for chunk in pools.chunks(VALIDATOR_CHUNK_SIZE) {
            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(|pool| {
                    self.fetch_vpn_config(
                        pool.url.trim_end_matches('/').to_string(),
                        pool.ip.clone(),
                        params,
                        &feedback_url,
                    )
                })
                .collect();

            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(Some(config)) => {
                        self.tickets.mark_complete(&request_id);
                        metrics::counter!("fan_out_wins_total", "role" => "validator")
                            .increment(1);
                        return Ok(config);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "mining pool attempt failed"),
                }
            }
        }

        self.tickets.mark_complete(&request_id);
        Err(NodeError::FanOutExhausted {
            message: format!("all {} mining pools failed to provision", pools.len()),
        })
    }

    async fn fetch_vpn_config(
        &self,
        base_url: String,
        source: String,
        params: &VpnRequestParams,
        feedback_url: &str,
    ) -> Result<Option<ProvisionedConfig>> {
        let url = format!("{base_url}/vpn");
        let mut query: Vec<(&str, String)> = vec![
            ("type", config_type_name(params.config_type)),
            ("format", "json".to_string()),
            ("lease_seconds", params.lease_seconds.to_string()),
            ("priority", params.priority.to_string()),
            ("feedback_url", feedback_url.to_string()),
        ];
        if let Some(geo) = &params.geo {
            query.push(("geo", geo.clone()));
        }

        let response = self
            .http
            .get(&url)
            .query(&query)
            .timeout(VPN_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| NodeError::upstream(&url, e))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let payload = response
            .json::<WorkerVpnPayload>()
            .await
            .map_err(|e| NodeError::upstream(&url, e))?;

        if payload.cancelled.unwrap_or(false) {
            return Ok(None);
        }
        let Some(config) = payload.config.filter(|config| !config.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(ProvisionedConfig {
            config,
            peer_id: payload.peer_id,
            expires_at: payload.expires_at,
            source,
        }))
    }

    /// All-settled announcement of this pool to every known validator.
    pub async fn register_mining_pool_with_validators(
        &self,
        announcement: &MiningPoolAnnouncement,
    ) -> BroadcastReport {
        self.broadcast_to_validators(
            "validator/broadcast/mining_pool",
            announcement,
            REGISTRATION_TIMEOUT,
        )
        .await
    }

    /// All-settled publication of this pool's worker list to every validator.
    pub async fn register_mining_pool_workers_with_validators(
        &self,
        broadcast: &WorkersBroadcast,
    ) -> BroadcastReport {
        self.broadcast_to_validators("validator/broadcast/workers", broadcast, BROADCAST_TIMEOUT)
            .await
    }

    async fn broadcast_to_validators(
        &self,
        path: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> BroadcastReport {
        let ips = self.validators.validator_ips();

        let attempts = ips.iter().map(|ip| async move {
            // Learn each validator's preferred protocol/host/port before
            // posting the payload.
            let probe_base = format!("http://{ip}:3000");
            let base = match self.probe_identity(&probe_base).await {
                Ok(identity) => identity.base_url(&ip.to_string()),
                Err(_) => probe_base,
            };

            let url = format!("{base}/{path}");
            self.post_json_with_retry::<serde_json::Value>(&url, body, timeout)
                .await
                .map(|_| ())
        });

        let results = join_all(attempts).await;
        let successes = results.iter().filter(|result| result.is_ok()).count();
        let report = BroadcastReport {
            successes,
            failures: results.len() - successes,
        };

        tracing::info!(
            path,
            successes = report.successes,
            failures = report.failures,
            "validator broadcast settled"
        );
        report
    }

    /// Worker-mode: announce this node to its mining pool. Configs are
    /// omitted; the pool's scorer fetches them directly from us.
    pub async fn register_worker_with_pool(&self) -> Result<()> {
        let Some(pool_url) = self.config.federation.mining_pool_url.as_deref() else {
            return Err(NodeError::ValidationFailed {
                field: "MINING_POOL_URL".to_string(),
                message: "worker mode requires a mining pool url".to_string(),
            });
        };

        let url = format!("{}/worker", pool_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "public_port": self.config.server.public_port,
            "mining_pool_url": pool_url,
            "version": env!("CARGO_PKG_VERSION"),
        });

        self.post_json_with_retry::<serde_json::Value>(&url, &body, REGISTRATION_TIMEOUT)
            .await?;
        tracing::info!(pool_url, "registered with mining pool");
        Ok(())
    }

    /// Wait for this node's own HTTP surface to come up before announcing
    /// it to the federation. Bounded; logs and gives up rather than blocking
    /// the scheduler forever.
    pub async fn wait_for_local_server(&self) -> bool {
        let url = format!("{}/", self.config.public_base_url());
        for _ in 0..10 {
            if self
                .get_json::<serde_json::Value>(&url, IDENTITY_TIMEOUT)
                .await
                .is_ok()
            {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        tracing::error!(url, "local server never became ready");
        false
    }
}

fn config_type_name(config_type: ConfigType) -> String {
    match config_type {
        ConfigType::Wireguard => "wireguard".to_string(),
        ConfigType::Socks5 => "socks5".to_string(),
    }
}

impl std::fmt::Debug for FederationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationClient")
            .field("base", &self.config.public_base_url())
            .finish()
    }
}
