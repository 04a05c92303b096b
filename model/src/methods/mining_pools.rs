use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::{IntoActiveModel, Set};

use crate::entities::mining_pools;
use crate::{Error, Result};

/// Sub-scores written by the pool scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolScore {
    pub stability: f64,
    pub size: f64,
    pub performance: f64,
    pub geo: f64,
    pub composite: f64,
}

impl mining_pools::Model {
    /// Upsert a pool from its registration call.
    #[tracing::instrument(skip(db))]
    pub async fn register(
        db: &impl ConnectionTrait,
        mining_pool_uid: i32,
        url: &str,
        ip: &str,
        worker_pool_size: i32,
    ) -> Result<mining_pools::Model> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::validation("url", "Mining pool url is required"));
        }

        let now = Utc::now().naive_utc();
        let existing = mining_pools::Entity::find_by_id(mining_pool_uid).one(db).await?;

        match existing {
            Some(pool) => {
                let mut pool = pool.into_active_model();
                pool.url = Set(url.to_owned());
                pool.ip = Set(ip.to_owned());
                pool.last_known_worker_pool_size = Set(worker_pool_size);
                pool.updated_at = Set(now);
                Ok(pool.update(db).await?)
            }
            None => {
                let pool = mining_pools::Model {
                    mining_pool_uid,
                    url: url.to_owned(),
                    ip: ip.to_owned(),
                    last_known_worker_pool_size: worker_pool_size,
                    last_scored_at: None,
                    score_stability: 0.0,
                    score_size: 0.0,
                    score_performance: 0.0,
                    score_geo: 0.0,
                    score_composite: 0.0,
                    created_at: now,
                    updated_at: now,
                };
                Ok(pool.into_active_model().insert(db).await?)
            }
        }
    }

    pub async fn all(db: &impl ConnectionTrait) -> Result<Vec<mining_pools::Model>> {
        Ok(mining_pools::Entity::find().all(db).await?)
    }

    pub async fn by_uid(
        db: &impl ConnectionTrait,
        mining_pool_uid: i32,
    ) -> Result<Option<mining_pools::Model>> {
        Ok(mining_pools::Entity::find_by_id(mining_pool_uid).one(db).await?)
    }

    /// Persist a scoring cycle's verdict for one pool.
    #[tracing::instrument(skip(db))]
    pub async fn update_score(
        db: &impl ConnectionTrait,
        mining_pool_uid: i32,
        score: PoolScore,
        worker_pool_size: i32,
    ) -> Result<()> {
        let Some(pool) = mining_pools::Entity::find_by_id(mining_pool_uid).one(db).await? else {
            return Ok(());
        };

        let now = Utc::now().naive_utc();
        let mut pool = pool.into_active_model();
        pool.score_stability = Set(score.stability);
        pool.score_size = Set(score.size);
        pool.score_performance = Set(score.performance);
        pool.score_geo = Set(score.geo);
        pool.score_composite = Set(score.composite);
        pool.last_known_worker_pool_size = Set(worker_pool_size);
        pool.last_scored_at = Set(Some(now));
        pool.updated_at = Set(now);
        pool.update(db).await?;

        Ok(())
    }
}
