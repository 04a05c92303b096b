use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::{IntoActiveModel, Order, QueryOrder};

use crate::entities::wireguard_leases;
use crate::Result;

impl wireguard_leases::Model {
    /// Leased peer ids within `[start_id..=end_id]`, ascending. One query;
    /// the caller computes the set difference against the full range.
    #[tracing::instrument(skip(db))]
    pub async fn leased_ids_in_range(
        db: &impl ConnectionTrait,
        start_id: i32,
        end_id: i32,
    ) -> Result<Vec<i32>> {
        let rows = wireguard_leases::Entity::find()
            .filter(wireguard_leases::Column::Id.between(start_id, end_id))
            .order_by(wireguard_leases::Column::Id, Order::Asc)
            .all(db)
            .await?;

        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    pub async fn insert_lease(
        db: &impl ConnectionTrait,
        peer_id: i32,
        expires_at: i64,
    ) -> Result<wireguard_leases::Model> {
        let row = wireguard_leases::Model {
            id: peer_id,
            expires_at,
            updated_at: Utc::now().naive_utc(),
        };

        Ok(row.into_active_model().insert(db).await?)
    }

    pub async fn expired(db: &impl ConnectionTrait, now_ms: i64) -> Result<Vec<wireguard_leases::Model>> {
        Ok(wireguard_leases::Entity::find()
            .filter(wireguard_leases::Column::ExpiresAt.lt(now_ms))
            .order_by(wireguard_leases::Column::Id, Order::Asc)
            .all(db)
            .await?)
    }

    /// Leases that are still live (not yet expired).
    pub async fn open_leases(db: &impl ConnectionTrait, now_ms: i64) -> Result<Vec<wireguard_leases::Model>> {
        Ok(wireguard_leases::Entity::find()
            .filter(wireguard_leases::Column::ExpiresAt.gte(now_ms))
            .order_by(wireguard_leases::Column::Id, Order::Asc)
            .all(db)
            .await?)
    }

    /// Soonest `expires_at` across all rows, for exhaustion diagnostics.
    pub async fn soonest_expiry(db: &impl ConnectionTrait) -> Result<Option<i64>> {
        let row = wireguard_leases::Entity::find()
            .order_by(wireguard_leases::Column::ExpiresAt, Order::Asc)
            .one(db)
            .await?;

        Ok(row.map(|row| row.expires_at))
    }

    pub async fn delete_by_ids(db: &impl ConnectionTrait, ids: &[i32]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = wireguard_leases::Entity::delete_many()
            .filter(wireguard_leases::Column::Id.is_in(ids.to_vec()))
            .exec(db)
            .await?;

        Ok(deleted.rows_affected)
    }
}
