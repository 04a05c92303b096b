use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use sea_orm::DatabaseConnection;

use tpn_model::entities::workers::{self, WorkerStatus};
use tpn_model::methods::{WorkerPerformance, WorkerQuery};

use crate::config::{Config, RunMode};
use crate::error::{NodeError, Result};
use crate::federation::client::{WorkerVpnPayload, INTERNAL_POOL_UID};
use crate::federation::FederationClient;
use crate::geo::GeoResolver;
use crate::probes::TunnelProber;
use crate::scoring::version::version_accepted;
use crate::sync::{names, LockRegistry};
use crate::utils::time::now_ms;
use crate::wireguard::parse_wireguard_config;

const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Lease length for the throwaway configs minted during scoring.
const PROBE_LEASE_SECONDS: u64 = 600;

/// Commit timestamp baked in at build time, for the version grace window.
fn local_commit_ms() -> i64 {
    option_env!("TPN_COMMIT_TIMESTAMP_MS")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct ScoreSummary {
    pub scored: usize,
    pub up: usize,
    pub down: usize,
    pub skipped_lock: bool,
}

struct WorkerUnderTest {
    worker: workers::Model,
    wireguard_config: Option<String>,
    socks5_config: Option<String>,
}

/// Probes every internal worker end-to-end and persists up/down verdicts.
pub struct WorkerScorer {
    db: DatabaseConnection,
    locks: Arc<LockRegistry>,
    client: Arc<FederationClient>,
    prober: Arc<dyn TunnelProber>,
    geo: Arc<GeoResolver>,
    config: Arc<Config>,
}

impl WorkerScorer {
    pub fn new(
        db: DatabaseConnection,
        locks: Arc<LockRegistry>,
        client: Arc<FederationClient>,
        prober: Arc<dyn TunnelProber>,
        geo: Arc<GeoResolver>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            locks,
            client,
            prober,
            geo,
            config,
        }
    }

    /// One scoring sweep over all internal workers, bounded by
    /// `max_duration`. Serialized; a sweep already in flight makes this a
    /// no-op.
    pub async fn score_all_known_workers(&self, max_duration: Duration) -> Result<ScoreSummary> {
        let Some(_guard) = self.locks.try_acquire(names::SCORE_ALL_KNOWN_WORKERS) else {
            tracing::info!("worker scoring already in progress, skipping");
            return Ok(ScoreSummary {
                skipped_lock: true,
                ..Default::default()
            });
        };

        let workers = workers::Model::get_workers(
            &self.db,
            WorkerQuery {
                mining_pool_uid: Some(INTERNAL_POOL_UID.to_string()),
                ..Default::default()
            },
        )
        .await?;

        if workers.is_empty() {
            return Ok(ScoreSummary::default());
        }

        let sweep = async {
            let under_test = join_all(workers.into_iter().map(|worker| self.attach_configs(worker)))
                .await;
            self.validate_and_annotate(under_test).await
        };

        let verdicts = match tokio::time::timeout(max_duration, sweep).await {
            Ok(verdicts) => verdicts,
            Err(_) => {
                tracing::warn!(?max_duration, "worker scoring sweep hit its budget");
                return Ok(ScoreSummary::default());
            }
        };

        let summary = ScoreSummary {
            scored: verdicts.len(),
            up: verdicts
                .iter()
                .filter(|verdict| verdict.status == WorkerStatus::Up)
                .count(),
            down: verdicts
                .iter()
                .filter(|verdict| verdict.status == WorkerStatus::Down)
                .count(),
            skipped_lock: false,
        };

        workers::Model::write_worker_performance(&self.db, verdicts).await?;

        metrics::gauge!("workers_up").set(summary.up as f64);
        metrics::gauge!("workers_down").set(summary.down as f64);
        tracing::info!(
            scored = summary.scored,
            up = summary.up,
            down = summary.down,
            "worker scoring sweep finished"
        );

        Ok(summary)
    }

    /// Use the configs the worker broadcast; fall back to asking the worker
    /// to provision fresh ones.
    async fn attach_configs(&self, worker: workers::Model) -> WorkerUnderTest {
        let mut wireguard_config = worker.wireguard_config.clone();
        let mut socks5_config = worker.socks5_config.clone();

        if wireguard_config.is_none() {
            wireguard_config = self
                .fetch_config(&worker, "wireguard")
                .await
                .unwrap_or_default();
        }
        if socks5_config.is_none() {
            socks5_config = self.fetch_config(&worker, "socks5").await.unwrap_or_default();
        }

        WorkerUnderTest {
            worker,
            wireguard_config,
            socks5_config,
        }
    }

    async fn fetch_config(
        &self,
        worker: &workers::Model,
        config_type: &str,
    ) -> Result<Option<String>> {
        let url = format!(
            "http://{}:{}/vpn?type={config_type}&format=json&lease_seconds={PROBE_LEASE_SECONDS}",
            worker.ip, worker.public_port
        );
        let payload = self
            .client
            .get_json::<WorkerVpnPayload>(&url, CONFIG_FETCH_TIMEOUT)
            .await?;

        Ok(payload.config.filter(|config| !config.trim().is_empty()))
    }

    /// Shape + parse gate, then the full probe battery per valid worker in
    /// parallel. Every thrown error lands the worker in the down bucket with
    /// its reason.
    async fn validate_and_annotate(
        &self,
        under_test: Vec<WorkerUnderTest>,
    ) -> Vec<WorkerPerformance> {
        let mut verdicts = Vec::with_capacity(under_test.len());
        let mut valid = Vec::new();

        for item in under_test {
            match self.precheck(&item) {
                Ok(()) => valid.push(item),
                Err(reason) => {
                    tracing::debug!(ip = %item.worker.ip, %reason, "worker failed validation");
                    verdicts.push(self.verdict(&item.worker, WorkerStatus::Down));
                }
            }
        }

        let probed = join_all(valid.iter().map(|item| async move {
            let outcome = self.evaluate(item).await;
            (item, outcome)
        }))
        .await;

        for (item, outcome) in probed {
            let status = match outcome {
                Ok(()) => WorkerStatus::Up,
                Err(e) => {
                    tracing::info!(ip = %item.worker.ip, error = %e, "worker probe failed");
                    WorkerStatus::Down
                }
            };
            verdicts.push(self.verdict(&item.worker, status));
        }

        verdicts
    }

    fn precheck(&self, item: &WorkerUnderTest) -> std::result::Result<(), String> {
        if item.worker.ip.parse::<Ipv4Addr>().is_err() {
            return Err(format!("invalid worker ip '{}'", item.worker.ip));
        }
        let Some(config) = &item.wireguard_config else {
            return Err("no wireguard config available".to_string());
        };
        parse_wireguard_config(config).map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn evaluate(&self, item: &WorkerUnderTest) -> Result<()> {
        let worker = &item.worker;
        let base_url = format!("http://{}:{}", worker.ip, worker.public_port);

        // Identity: version floor and pool-membership consent.
        let identity = self.client.probe_identity(&base_url).await?;
        self.score_node_version(identity.version.as_deref())?;
        self.check_worker_matches_miner(identity.mining_pool_url.as_deref(), worker)?;

        // Worker mode verifies its own tunnel: egress must match. Every
        // other role expects the tunnel to move the egress elsewhere.
        let expect_same = self.config.run_mode == RunMode::Worker;
        let direct = self.prober.direct_egress_ip().await?;

        if let Some(config) = &item.wireguard_config {
            let tunneled = self.prober.wireguard_egress_ip(config).await?;
            check_egress("wireguard", &direct, &tunneled, expect_same)?;
        }

        if let Some(socks_url) = &item.socks5_config {
            let proxied = self.prober.socks5_egress_ip(socks_url).await?;
            check_egress("socks5", &direct, &proxied, expect_same)?;
        }

        Ok(())
    }

    fn score_node_version(&self, remote: Option<&str>) -> Result<()> {
        let Some(remote) = remote else {
            return Err(NodeError::ValidationFailed {
                field: "version".to_string(),
                message: "worker reported no version".to_string(),
            });
        };

        let local = env!("CARGO_PKG_VERSION");
        if !version_accepted(remote, local, local_commit_ms(), now_ms()) {
            return Err(NodeError::ValidationFailed {
                field: "version".to_string(),
                message: format!("worker version {remote} below floor for local {local}"),
            });
        }

        Ok(())
    }

    fn check_worker_matches_miner(
        &self,
        broadcast_pool: Option<&str>,
        worker: &workers::Model,
    ) -> Result<()> {
        let expected = self
            .config
            .federation
            .mining_pool_url
            .as_deref()
            .unwrap_or(worker.mining_pool_url.as_str());

        match broadcast_pool {
            Some(url) if url.trim_end_matches('/') == expected.trim_end_matches('/') => Ok(()),
            other => Err(NodeError::ValidationFailed {
                field: "mining_pool_url".to_string(),
                message: format!(
                    "worker broadcasts pool {other:?}, expected '{expected}'"
                ),
            }),
        }
    }

    fn verdict(&self, worker: &workers::Model, status: WorkerStatus) -> WorkerPerformance {
        let geodata = worker
            .ip
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| self.geo.ip_geodata(ip));

        match geodata {
            Some(geo) => WorkerPerformance {
                id: worker.id,
                status,
                country_code: geo.country_code,
                connection_type: Some(geo.connection_type),
                datacenter: Some(geo.datacenter),
                version: None,
            },
            None => WorkerPerformance {
                id: worker.id,
                status,
                country_code: None,
                connection_type: None,
                datacenter: None,
                version: None,
            },
        }
    }
}

fn check_egress(tunnel: &str, direct: &str, observed: &str, expect_same: bool) -> Result<()> {
    let same = direct == observed;
    if same == expect_same {
        return Ok(());
    }

    Err(NodeError::ValidationFailed {
        field: tunnel.to_string(),
        message: if expect_same {
            format!("egress moved from {direct} to {observed}, expected unchanged")
        } else {
            format!("egress {observed} matches direct egress, tunnel is not routing")
        },
    })
}

impl std::fmt::Debug for WorkerScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScorer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::check_egress;

    #[test]
    fn tunnel_must_move_egress_for_non_workers() {
        assert!(check_egress("wireguard", "1.1.1.1", "2.2.2.2", false).is_ok());
        assert!(check_egress("wireguard", "1.1.1.1", "1.1.1.1", false).is_err());
    }

    #[test]
    fn worker_mode_expects_unchanged_egress() {
        assert!(check_egress("socks5", "1.1.1.1", "1.1.1.1", true).is_ok());
        assert!(check_egress("socks5", "1.1.1.1", "2.2.2.2", true).is_err());
    }
}
