use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use sea_orm::DatabaseConnection;

use tpn_model::entities::mining_pools;
use tpn_model::entities::workers;
use tpn_model::methods::{PoolScore, WorkerQuery};

use crate::error::Result;
use crate::federation::{FederationClient, ValidatorRegistry};
use crate::sync::{names, LockRegistry};

/// Sub-scores feeding the composite. All in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubScores {
    pub stability: f64,
    pub size: f64,
    pub performance: f64,
    pub geo: f64,
}

// Externally-owned weighting policy; keep the signature stable. The weights
// below reproduce the reference behavior.
const WEIGHT_STABILITY: f64 = 0.25;
const WEIGHT_SIZE: f64 = 0.30;
const WEIGHT_PERFORMANCE: f64 = 0.25;
const WEIGHT_GEO: f64 = 0.20;

/// Half-saturation point of the size curve: a pool this large scores 0.5.
const SIZE_HALFWAY: f64 = 32.0;
/// Country count at which geographic diversity saturates.
const GEO_TARGET_COUNTRIES: f64 = 8.0;
/// Latency at or above which performance scores zero.
const PERFORMANCE_CEILING: Duration = Duration::from_secs(2);
/// EMA factor for stability: weight of the previous value.
const STABILITY_DECAY: f64 = 0.8;

pub fn compute_composite_score(sub: &SubScores) -> f64 {
    WEIGHT_STABILITY * sub.stability
        + WEIGHT_SIZE * sub.size
        + WEIGHT_PERFORMANCE * sub.performance
        + WEIGHT_GEO * sub.geo
}

/// Scores every known mining pool: membership-consent filter against the
/// neuron map, then size, diversity, latency, and stability.
pub struct MiningPoolScorer {
    db: DatabaseConnection,
    locks: Arc<LockRegistry>,
    client: Arc<FederationClient>,
    validators: Arc<ValidatorRegistry>,
}

#[derive(Debug, Default)]
pub struct PoolScoreSummary {
    pub scored: usize,
    pub skipped_ip_mismatch: usize,
    pub skipped_lock: bool,
}

impl MiningPoolScorer {
    pub fn new(
        db: DatabaseConnection,
        locks: Arc<LockRegistry>,
        client: Arc<FederationClient>,
        validators: Arc<ValidatorRegistry>,
    ) -> Self {
        Self {
            db,
            locks,
            client,
            validators,
        }
    }

    /// One scoring cycle. Serialized; an in-flight cycle makes this a no-op.
    pub async fn score_mining_pools(&self) -> Result<PoolScoreSummary> {
        let Some(_guard) = self.locks.try_acquire(names::SCORE_MINING_POOLS) else {
            tracing::info!("pool scoring already in progress, skipping");
            return Ok(PoolScoreSummary {
                skipped_lock: true,
                ..Default::default()
            });
        };

        let pools = mining_pools::Model::all(&self.db).await?;
        let mut summary = PoolScoreSummary::default();

        let mut eligible = Vec::new();
        for pool in pools {
            // Only pools whose self-reported address matches the chain's
            // view of that uid are scored; anything else is impersonation.
            let expected = self.validators.miner_ip(pool.mining_pool_uid);
            match expected {
                Some(ip) if ip.to_string() == pool.ip => eligible.push(pool),
                _ => {
                    tracing::warn!(
                        uid = pool.mining_pool_uid,
                        reported = %pool.ip,
                        "pool ip does not match neuron map, skipping"
                    );
                    summary.skipped_ip_mismatch += 1;
                }
            }
        }

        let results = join_all(eligible.iter().map(|pool| self.score_pool(pool))).await;
        for result in results {
            match result {
                Ok(()) => summary.scored += 1,
                Err(e) => tracing::warn!(error = %e, "pool scoring failed"),
            }
        }

        tracing::info!(
            scored = summary.scored,
            skipped = summary.skipped_ip_mismatch,
            "pool scoring cycle finished"
        );
        Ok(summary)
    }

    async fn score_pool(&self, pool: &mining_pools::Model) -> Result<()> {
        let started = Instant::now();
        let identity = self
            .client
            .probe_identity(pool.url.trim_end_matches('/'))
            .await;
        let latency = started.elapsed();
        let responded = identity.is_ok();

        let workers = workers::Model::get_workers(
            &self.db,
            WorkerQuery {
                mining_pool_uid: Some(pool.mining_pool_uid.to_string()),
                ..Default::default()
            },
        )
        .await?;

        let sub = SubScores {
            size: size_score(workers.len()),
            geo: geo_score(&workers),
            performance: performance_score(responded, latency),
            stability: stability_score(pool.score_stability, responded),
        };
        let score = PoolScore {
            stability: sub.stability,
            size: sub.size,
            performance: sub.performance,
            geo: sub.geo,
            composite: compute_composite_score(&sub),
        };

        mining_pools::Model::update_score(
            &self.db,
            pool.mining_pool_uid,
            score,
            workers.len() as i32,
        )
        .await?;

        Ok(())
    }
}

/// Monotonic in worker count, saturating toward 1.
fn size_score(worker_count: usize) -> f64 {
    let n = worker_count as f64;
    n / (n + SIZE_HALFWAY)
}

fn geo_score(workers: &[workers::Model]) -> f64 {
    let mut countries: Vec<&str> = workers
        .iter()
        .filter_map(|worker| worker.country_code.as_deref())
        .collect();
    countries.sort_unstable();
    countries.dedup();

    (countries.len() as f64 / GEO_TARGET_COUNTRIES).min(1.0)
}

fn performance_score(responded: bool, latency: Duration) -> f64 {
    if !responded {
        return 0.0;
    }
    let ratio = latency.as_secs_f64() / PERFORMANCE_CEILING.as_secs_f64();
    (1.0 - ratio).clamp(0.0, 1.0)
}

fn stability_score(previous: f64, up: bool) -> f64 {
    let observation = if up { 1.0 } else { 0.0 };
    STABILITY_DECAY * previous + (1.0 - STABILITY_DECAY) * observation
}

impl std::fmt::Debug for MiningPoolScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningPoolScorer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_score_is_monotonic() {
        assert!(size_score(0) < size_score(1));
        assert!(size_score(10) < size_score(100));
        assert!(size_score(10_000) < 1.0);
    }

    #[test]
    fn performance_degrades_with_latency() {
        let fast = performance_score(true, Duration::from_millis(50));
        let slow = performance_score(true, Duration::from_millis(1500));
        assert!(fast > slow);
        assert_eq!(performance_score(false, Duration::ZERO), 0.0);
        assert_eq!(performance_score(true, Duration::from_secs(5)), 0.0);
    }

    #[test]
    fn stability_converges() {
        let mut value = 0.0;
        for _ in 0..50 {
            value = stability_score(value, true);
        }
        assert!(value > 0.99);

        value = stability_score(value, false);
        assert!(value < 0.99);
    }

    #[test]
    fn composite_is_weighted_sum() {
        let sub = SubScores {
            stability: 1.0,
            size: 1.0,
            performance: 1.0,
            geo: 1.0,
        };
        let composite = compute_composite_score(&sub);
        assert!((composite - 1.0).abs() < 1e-9);

        let zero = compute_composite_score(&SubScores::default());
        assert_eq!(zero, 0.0);
    }
}
