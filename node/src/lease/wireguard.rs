use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;

use tpn_model::entities::wireguard_leases;

use crate::config::WireGuardConfig;
use crate::container::WireGuardDriver;
use crate::error::{NodeError, Result};
use crate::sync::{names, LockRegistry};
use crate::utils::time::now_ms;

const SERVER_READY_BUDGET: Duration = Duration::from_secs(60);
const SERVER_READY_POLL: Duration = Duration::from_millis(500);

/// Allocates peer-id leases over `[1..N]`. Allocation is linearizable via
/// the `register_wireguard_lease` lock; cleanup and the readiness wait run
/// outside it so the critical section never spans container I/O.
pub struct WireGuardLeaseStore {
    db: DatabaseConnection,
    locks: Arc<LockRegistry>,
    driver: Arc<WireGuardDriver>,
    config: WireGuardConfig,
    priority_slots: u16,
}

impl WireGuardLeaseStore {
    pub fn new(
        db: DatabaseConnection,
        locks: Arc<LockRegistry>,
        driver: Arc<WireGuardDriver>,
        config: WireGuardConfig,
        priority_slots: u16,
    ) -> Self {
        Self {
            db,
            locks,
            driver,
            config,
            priority_slots,
        }
    }

    /// Priority requests draw from `[1..P]`, standard from `[P+1..N]`.
    /// Degenerate configurations (P >= N) collapse to the full range.
    pub fn range_for(&self, priority: bool) -> (i32, i32) {
        let n = i32::from(self.config.peer_count);
        let p = i32::from(self.priority_slots);

        if p >= n {
            (1, n)
        } else if priority {
            (1, p)
        } else {
            (p + 1, n)
        }
    }

    async fn try_allocate(
        &self,
        start_id: i32,
        end_id: i32,
        expires_at: i64,
    ) -> Result<Option<i32>> {
        let leased =
            wireguard_leases::Model::leased_ids_in_range(&self.db, start_id, end_id).await?;

        let mut candidate = start_id;
        for id in &leased {
            if *id == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        if candidate > end_id {
            return Ok(None);
        }

        wireguard_leases::Model::insert_lease(&self.db, candidate, expires_at).await?;
        metrics::counter!("wireguard_leases_granted_total").increment(1);

        Ok(Some(candidate))
    }

    /// Allocate the smallest free peer id in `[start_id..=end_id]`. On a full
    /// pool, reclaims expired leases once and retries; then fails with the
    /// soonest-upcoming-expiry diagnostic. Finally waits (outside the lock)
    /// for the daemon to materialise the peer's config.
    pub async fn register_wireguard_lease(
        &self,
        start_id: i32,
        end_id: i32,
        expires_at: i64,
    ) -> Result<i32> {
        let first = self
            .locks
            .with_lock(names::REGISTER_WIREGUARD_LEASE, None, || async {
                self.try_allocate(start_id, end_id, expires_at).await
            })
            .await?;

        let peer_id = match first {
            Some(id) => id,
            None => {
                // Pool full: reclaim outside the lock, then one more attempt.
                self.cleanup_expired().await?;

                let second = self
                    .locks
                    .with_lock(names::REGISTER_WIREGUARD_LEASE, None, || async {
                        self.try_allocate(start_id, end_id, expires_at).await
                    })
                    .await?;

                match second {
                    Some(id) => id,
                    None => {
                        metrics::counter!("wireguard_leases_exhausted_total").increment(1);
                        let soonest =
                            wireguard_leases::Model::soonest_expiry(&self.db).await?;
                        return Err(NodeError::LeaseExhausted {
                            pool: "wireguard".to_string(),
                            soonest_expiry_ms: soonest,
                        });
                    }
                }
            }
        };

        let ready = self
            .driver
            .server_ready(Some(peer_id), SERVER_READY_BUDGET, SERVER_READY_POLL)
            .await?;
        if !ready {
            // Slot granted but the daemon never produced the config; give
            // the id back rather than stranding it until expiry.
            self.mark_config_as_free(peer_id).await?;
            return Err(NodeError::NotReady {
                what: format!("wireguard peer{peer_id} config"),
                budget: SERVER_READY_BUDGET,
            });
        }

        Ok(peer_id)
    }

    /// Reclaim expired leases. Delete mode removes configs and restarts the
    /// container only when no live lease would be disrupted; refresh mode
    /// rotates keys in place and never restarts.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = now_ms();
        let expired = wireguard_leases::Model::expired(&self.db, now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = expired.iter().map(|row| row.id).collect();
        tracing::info!(?ids, refresh = self.config.refresh_lease_instead_of_delete, "reclaiming expired wireguard leases");

        let reclaimed = if self.config.refresh_lease_instead_of_delete {
            let outcomes = self.driver.replace_configs(&ids).await?;

            // A failed rotation rolled back to the old keys; its row must
            // stay so the slot cannot be re-leased while the previous
            // lessee's credentials are still live. The next sweep retries.
            let rotated: Vec<i32> = outcomes
                .iter()
                .filter(|outcome| outcome.success)
                .map(|outcome| outcome.peer_id)
                .collect();
            for outcome in &outcomes {
                if !outcome.success {
                    tracing::warn!(
                        peer_id = outcome.peer_id,
                        "refresh-mode rotation failed, keeping lease row"
                    );
                }
            }

            // Rotation deletes each row as its keys stabilise; this sweep
            // is idempotent over the successful subset only.
            wireguard_leases::Model::delete_by_ids(&self.db, &rotated).await?;
            rotated.len()
        } else {
            self.driver.delete_configs(&ids).await?;

            let open = wireguard_leases::Model::open_leases(&self.db, now).await?;
            if open.is_empty() {
                self.driver.restart().await?;
            } else {
                tracing::debug!(
                    open = open.len(),
                    "skipping container restart, open leases present"
                );
            }

            wireguard_leases::Model::delete_by_ids(&self.db, &ids).await?;
            ids.len()
        };

        metrics::counter!("wireguard_leases_reclaimed_total").increment(reclaimed as u64);
        Ok(reclaimed)
    }

    pub async fn check_open_leases(&self) -> Result<Vec<wireguard_leases::Model>> {
        wireguard_leases::Model::open_leases(&self.db, now_ms())
            .await
            .map_err(Into::into)
    }

    /// Release a slot explicitly (losing racer, failed provisioning).
    pub async fn mark_config_as_free(&self, peer_id: i32) -> Result<()> {
        wireguard_leases::Model::delete_by_ids(&self.db, &[peer_id]).await?;
        metrics::counter!("wireguard_leases_freed_total").increment(1);
        Ok(())
    }
}

impl std::fmt::Debug for WireGuardLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuardLeaseStore")
            .field("peer_count", &self.config.peer_count)
            .field("priority_slots", &self.priority_slots)
            .finish()
    }
}
