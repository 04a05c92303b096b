use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use sea_orm::DatabaseConnection;

use tpn_model::entities::socks;

use crate::container::DanteDriver;
use crate::error::{NodeError, Result};
use crate::sync::{names, LockRegistry};
use crate::utils::time::now_ms;

const DANTE_READY_BUDGET: Duration = Duration::from_secs(30);
const DANTE_REFRESH_BUDGET: Duration = Duration::from_secs(90);

/// Report of one reclamation sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub rotated: usize,
    pub deleted: usize,
}

/// Credential leases over two disjoint pools: the first `P` rows by id are
/// shared (priority), the rest are exclusive. Standard-path transitions are
/// serialized by the `get_socks5_config` lock.
pub struct Socks5LeaseStore {
    db: DatabaseConnection,
    locks: Arc<LockRegistry>,
    dante: Arc<DanteDriver>,
    priority_slots: u16,
}

impl Socks5LeaseStore {
    pub fn new(
        db: DatabaseConnection,
        locks: Arc<LockRegistry>,
        dante: Arc<DanteDriver>,
        priority_slots: u16,
    ) -> Self {
        Self {
            db,
            locks,
            dante,
            priority_slots,
        }
    }

    /// Top-level entry: make sure the daemon is up and the table mirrors the
    /// disk, refresh the container once if the standard pool ran dry, then
    /// lease.
    pub async fn get_valid_socks5_config(
        &self,
        lease_seconds: u64,
        priority: bool,
    ) -> Result<socks::Model> {
        if !self.dante.server_ready(DANTE_READY_BUDGET).await? {
            return Err(NodeError::NotReady {
                what: "dante".to_string(),
                budget: DANTE_READY_BUDGET,
            });
        }
        if !self.dante.is_initialised() {
            self.dante.load_from_disk().await?;
        }

        if !priority && self.count_available().await? == 0 {
            // One shot at recovering capacity: bounce the daemon so it
            // re-reads its user database, then re-mirror.
            self.locks
                .with_lock(names::DANTE_REFRESH, Some(DANTE_REFRESH_BUDGET), || async {
                    self.dante.restart().await?;
                    self.dante.server_ready(DANTE_READY_BUDGET).await?;
                    self.dante.load_from_disk().await?;
                    Ok(())
                })
                .await?;
        }

        let expires_at = now_ms() + (lease_seconds as i64) * 1000;
        self.get_socks5_config(expires_at, priority).await
    }

    /// Lease a credential. Priority requests share the first `P` rows and
    /// never flip `available`; standard requests take an exclusive row under
    /// the lock, with one cleanup-and-retry on exhaustion.
    pub async fn get_socks5_config(
        &self,
        expires_at: i64,
        priority: bool,
    ) -> Result<socks::Model> {
        if priority {
            return self.lease_priority(expires_at).await;
        }

        self.locks
            .with_lock(names::GET_SOCKS5_CONFIG, None, || async {
                self.lease_standard(expires_at).await
            })
            .await
    }

    async fn lease_priority(&self, expires_at: i64) -> Result<socks::Model> {
        let rows = socks::Model::priority_rows(&self.db, u64::from(self.priority_slots)).await?;

        let Some(row) = rows.choose(&mut rand::rng()).cloned() else {
            return Err(NodeError::LeaseExhausted {
                pool: "socks5-priority".to_string(),
                soonest_expiry_ms: socks::Model::soonest_expiry(&self.db).await?,
            });
        };

        let row = socks::Model::touch_expiry(&self.db, row, expires_at).await?;
        metrics::counter!("socks5_leases_granted_total", "pool" => "priority").increment(1);

        Ok(row)
    }

    async fn lease_standard(&self, expires_at: i64) -> Result<socks::Model> {
        let skip = u64::from(self.priority_slots);

        let mut candidate = socks::Model::first_available_standard(&self.db, skip).await?;

        if candidate.is_none() {
            self.cleanup_expired().await?;
            candidate = socks::Model::first_available_standard(&self.db, skip).await?;
        }

        let Some(row) = candidate else {
            metrics::counter!("socks5_leases_exhausted_total").increment(1);
            return Err(NodeError::LeaseExhausted {
                pool: "socks5".to_string(),
                soonest_expiry_ms: socks::Model::soonest_expiry(&self.db).await?,
            });
        };

        let row = socks::Model::mark_leased(&self.db, row, expires_at).await?;
        self.dante.mark_used(&row.username, expires_at).await?;

        metrics::counter!("socks5_leases_granted_total", "pool" => "standard").increment(1);
        Ok(row)
    }

    /// Reclaim lapsed leases: rotate each credential through the daemon.
    /// Rotation failures delete the row (the credential is unusable until
    /// the next disk reload); successes return to the pool with the fresh
    /// password.
    pub async fn cleanup_expired(&self) -> Result<CleanupReport> {
        let expired = socks::Model::expired(&self.db, now_ms()).await?;
        let mut report = CleanupReport::default();

        for row in expired {
            match self.dante.regenerate(&row.username).await {
                Ok(new_password) => {
                    socks::Model::release(&self.db, row, new_password).await?;
                    report.rotated += 1;
                }
                Err(e) => {
                    tracing::warn!(username = %row.username, error = %e, "credential rotation failed, dropping row");
                    socks::Model::delete_by_username(&self.db, &row.username).await?;
                    report.deleted += 1;
                }
            }
        }

        if report.rotated + report.deleted > 0 {
            tracing::info!(
                rotated = report.rotated,
                deleted = report.deleted,
                "socks5 lease sweep finished"
            );
        }

        Ok(report)
    }

    /// Standard-pool availability (available rows past the priority slots).
    pub async fn count_available(&self) -> Result<u64> {
        socks::Model::count_available(&self.db, u64::from(self.priority_slots))
            .await
            .map_err(Into::into)
    }
}

impl std::fmt::Debug for Socks5LeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5LeaseStore")
            .field("priority_slots", &self.priority_slots)
            .finish()
    }
}
