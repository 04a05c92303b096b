use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// SOCKS5 credential row. `username` is the stable external id; `password`
/// rotates on reclamation. Rows ordered by `id` — the first `PRIORITY_SLOTS`
/// rows form the shared priority pool and never flip `available`.
/// `expires_at` is epoch milliseconds, 0 when unleased.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "worker_socks5_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    pub ip_address: String,
    pub port: i32,
    pub password: String,
    pub available: bool,
    pub expires_at: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
