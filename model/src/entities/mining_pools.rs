use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Known mining pool, keyed by its subnet uid. Updated by registration and
/// by the pool scorer.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mining_pools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub mining_pool_uid: i32,
    pub url: String,
    pub ip: String,
    pub last_known_worker_pool_size: i32,
    pub last_scored_at: Option<NaiveDateTime>,
    pub score_stability: f64,
    pub score_size: f64,
    pub score_performance: f64,
    pub score_geo: f64,
    pub score_composite: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
