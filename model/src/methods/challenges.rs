use chrono::{Duration, Utc};
use sea_orm::prelude::*;
use sea_orm::IntoActiveModel;

use crate::entities::challenges;
use crate::Result;

impl challenges::Model {
    /// Mint a new challenge/solution pair.
    pub async fn create(
        db: &impl ConnectionTrait,
        tag: Option<String>,
    ) -> Result<challenges::Model> {
        let row = challenges::Model {
            challenge: Uuid::new_v4(),
            solution: Uuid::new_v4(),
            tag,
            created_at: Utc::now().naive_utc(),
        };

        Ok(row.into_active_model().insert(db).await?)
    }

    pub async fn find(
        db: &impl ConnectionTrait,
        challenge: Uuid,
    ) -> Result<Option<challenges::Model>> {
        Ok(challenges::Entity::find_by_id(challenge).one(db).await?)
    }

    /// Drop rows older than `ttl_secs`.
    pub async fn sweep_expired(db: &impl ConnectionTrait, ttl_secs: i64) -> Result<u64> {
        let cutoff = Utc::now().naive_utc() - Duration::seconds(ttl_secs);
        let deleted = challenges::Entity::delete_many()
            .filter(challenges::Column::CreatedAt.lt(cutoff))
            .exec(db)
            .await?;

        Ok(deleted.rows_affected)
    }
}
