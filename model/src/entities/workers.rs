use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Worker inventory row. Natural key is `(ip, mining_pool_uid)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "workers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub ip: String,
    pub public_port: i32,
    pub country_code: Option<String>,
    pub connection_type: ConnectionType,
    pub mining_pool_url: String,
    pub mining_pool_uid: String,
    pub mining_pool_ip: Option<String>,
    pub payment_address_evm: Option<String>,
    pub payment_address_bittensor: Option<String>,
    pub status: WorkerStatus,
    pub last_tested_at: Option<NaiveDateTime>,
    #[sea_orm(column_type = "Text", nullable)]
    pub wireguard_config: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub socks5_config: Option<String>,
    pub datacenter: Option<bool>,
    pub version: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[sea_orm(string_value = "tbd")]
    Tbd,
    #[sea_orm(string_value = "up")]
    Up,
    #[sea_orm(string_value = "down")]
    Down,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[sea_orm(string_value = "datacenter")]
    Datacenter,
    #[sea_orm(string_value = "residential")]
    Residential,
    #[sea_orm(string_value = "unknown")]
    Unknown,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
