use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{IntoActiveModel, Order, PaginatorTrait, QueryOrder, QuerySelect, Set};

use crate::entities::socks;
use crate::Result;

/// One credential as loaded from disk by the Dante driver.
#[derive(Debug, Clone)]
pub struct SocksWrite {
    pub ip_address: String,
    pub port: i32,
    pub username: String,
    pub password: String,
    pub available: bool,
}

impl socks::Model {
    /// The first `priority_slots` available rows by id — the shared priority
    /// pool. The caller picks one at random.
    pub async fn priority_rows(
        db: &impl ConnectionTrait,
        priority_slots: u64,
    ) -> Result<Vec<socks::Model>> {
        Ok(socks::Entity::find()
            .filter(socks::Column::Available.eq(true))
            .order_by(socks::Column::Id, Order::Asc)
            .limit(priority_slots)
            .all(db)
            .await?)
    }

    /// First available row past the priority pool, by id.
    pub async fn first_available_standard(
        db: &impl ConnectionTrait,
        skip_slots: u64,
    ) -> Result<Option<socks::Model>> {
        Ok(socks::Entity::find()
            .filter(socks::Column::Available.eq(true))
            .order_by(socks::Column::Id, Order::Asc)
            .offset(skip_slots)
            .limit(1)
            .one(db)
            .await?)
    }

    /// Exclusive lease: flip `available` and stamp the expiry.
    pub async fn mark_leased(
        db: &impl ConnectionTrait,
        row: socks::Model,
        expires_at: i64,
    ) -> Result<socks::Model> {
        let mut row = row.into_active_model();
        row.available = Set(false);
        row.expires_at = Set(expires_at);
        row.updated_at = Set(Utc::now().naive_utc());

        Ok(row.update(db).await?)
    }

    /// Priority lease: expiry only, `available` never flips.
    pub async fn touch_expiry(
        db: &impl ConnectionTrait,
        row: socks::Model,
        expires_at: i64,
    ) -> Result<socks::Model> {
        let mut row = row.into_active_model();
        row.expires_at = Set(expires_at);
        row.updated_at = Set(Utc::now().naive_utc());

        Ok(row.update(db).await?)
    }

    /// Mirror the on-disk credential set: dedupe by username, upsert, then
    /// drop rows absent from the incoming set. An empty set clears the table.
    #[tracing::instrument(skip(db, incoming), fields(count = incoming.len()))]
    pub async fn write_socks(db: &impl ConnectionTrait, incoming: Vec<SocksWrite>) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut usernames: Vec<String> = Vec::with_capacity(incoming.len());
        let mut rows = Vec::with_capacity(incoming.len());

        for sock in incoming {
            if usernames.contains(&sock.username) {
                continue;
            }
            usernames.push(sock.username.clone());
            rows.push(socks::ActiveModel {
                id: sea_orm::ActiveValue::NotSet,
                username: Set(sock.username),
                ip_address: Set(sock.ip_address),
                port: Set(sock.port),
                password: Set(sock.password),
                available: Set(sock.available),
                expires_at: Set(0),
                updated_at: Set(now),
            });
        }

        if !rows.is_empty() {
            socks::Entity::insert_many(rows)
                .on_conflict(
                    OnConflict::column(socks::Column::Username)
                        .update_columns([socks::Column::Password, socks::Column::UpdatedAt])
                        .to_owned(),
                )
                .exec(db)
                .await?;
        }

        if usernames.is_empty() {
            socks::Entity::delete_many().exec(db).await?;
        } else {
            socks::Entity::delete_many()
                .filter(socks::Column::Username.is_not_in(usernames))
                .exec(db)
                .await?;
        }

        Ok(())
    }

    /// Rows whose lease has lapsed: `0 < expires_at <= now`.
    pub async fn expired(db: &impl ConnectionTrait, now_ms: i64) -> Result<Vec<socks::Model>> {
        Ok(socks::Entity::find()
            .filter(socks::Column::ExpiresAt.gt(0))
            .filter(socks::Column::ExpiresAt.lte(now_ms))
            .order_by(socks::Column::Id, Order::Asc)
            .all(db)
            .await?)
    }

    /// Return a reclaimed credential to the pool with its rotated password.
    pub async fn release(
        db: &impl ConnectionTrait,
        row: socks::Model,
        new_password: String,
    ) -> Result<socks::Model> {
        let mut row = row.into_active_model();
        row.available = Set(true);
        row.expires_at = Set(0);
        row.password = Set(new_password);
        row.updated_at = Set(Utc::now().naive_utc());

        Ok(row.update(db).await?)
    }

    pub async fn delete_by_username(db: &impl ConnectionTrait, username: &str) -> Result<u64> {
        let deleted = socks::Entity::delete_many()
            .filter(socks::Column::Username.eq(username))
            .exec(db)
            .await?;

        Ok(deleted.rows_affected)
    }

    pub async fn soonest_expiry(db: &impl ConnectionTrait) -> Result<Option<i64>> {
        let row = socks::Entity::find()
            .filter(socks::Column::ExpiresAt.gt(0))
            .order_by(socks::Column::ExpiresAt, Order::Asc)
            .one(db)
            .await?;

        Ok(row.map(|row| row.expires_at))
    }

    /// Available rows, ordered by id, after skipping `skip_slots`.
    pub async fn count_available(db: &impl ConnectionTrait, skip_slots: u64) -> Result<u64> {
        let available = socks::Entity::find()
            .filter(socks::Column::Available.eq(true))
            .count(db)
            .await?;

        Ok(available.saturating_sub(skip_slots))
    }
}
