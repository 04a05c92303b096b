use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{IntoActiveModel, Order, QueryOrder, QuerySelect, Set};

use crate::entities::workers::{self, ConnectionType, WorkerStatus};
use crate::Result;

/// Filter set for the worker inventory query surface.
#[derive(Debug, Clone, Default)]
pub struct WorkerQuery {
    pub country_code: Option<String>,
    pub status: Option<WorkerStatus>,
    pub mining_pool_uid: Option<String>,
    pub connection_type: Option<ConnectionType>,
    pub randomize: bool,
    pub limit: Option<u64>,
}

/// One worker as broadcast by a mining pool.
#[derive(Debug, Clone)]
pub struct WorkerWrite {
    pub ip: String,
    pub public_port: i32,
    pub mining_pool_url: String,
    pub payment_address_evm: Option<String>,
    pub payment_address_bittensor: Option<String>,
    pub wireguard_config: Option<String>,
    pub socks5_config: Option<String>,
    pub version: Option<String>,
}

/// Scorer verdict for one worker.
#[derive(Debug, Clone)]
pub struct WorkerPerformance {
    pub id: Uuid,
    pub status: WorkerStatus,
    pub country_code: Option<String>,
    pub connection_type: Option<ConnectionType>,
    pub datacenter: Option<bool>,
    pub version: Option<String>,
}

impl workers::Model {
    #[tracing::instrument(skip(db))]
    pub async fn get_workers(
        db: &impl ConnectionTrait,
        query: WorkerQuery,
    ) -> Result<Vec<workers::Model>> {
        let mut find = workers::Entity::find();

        if let Some(country) = &query.country_code {
            find = find.filter(workers::Column::CountryCode.eq(country.to_uppercase()));
        }
        if let Some(status) = query.status {
            find = find.filter(workers::Column::Status.eq(status));
        }
        if let Some(uid) = &query.mining_pool_uid {
            find = find.filter(workers::Column::MiningPoolUid.eq(uid));
        }
        if let Some(connection) = query.connection_type {
            find = find.filter(workers::Column::ConnectionType.eq(connection));
        }

        find = if query.randomize {
            find.order_by(Expr::cust("RANDOM()"), Order::Asc)
        } else {
            find.order_by(workers::Column::UpdatedAt, Order::Desc)
        };

        if let Some(limit) = query.limit {
            find = find.limit(limit);
        }

        Ok(find.all(db).await?)
    }

    pub async fn find_by_natural_key(
        db: &impl ConnectionTrait,
        ip: &str,
        mining_pool_uid: &str,
    ) -> Result<Option<workers::Model>> {
        Ok(workers::Entity::find()
            .filter(workers::Column::Ip.eq(ip))
            .filter(workers::Column::MiningPoolUid.eq(mining_pool_uid))
            .one(db)
            .await?)
    }

    /// Upsert a single worker by natural key. Used by direct self-registration
    /// and by the pool broadcast path.
    #[tracing::instrument(skip(db, worker), fields(ip = %worker.ip))]
    pub async fn upsert(
        db: &impl ConnectionTrait,
        mining_pool_uid: &str,
        mining_pool_ip: Option<&str>,
        worker: WorkerWrite,
    ) -> Result<workers::Model> {
        let now = Utc::now().naive_utc();
        let existing = Self::find_by_natural_key(db, &worker.ip, mining_pool_uid).await?;

        match existing {
            Some(row) => {
                let mut row = row.into_active_model();
                row.public_port = Set(worker.public_port);
                row.mining_pool_url = Set(worker.mining_pool_url);
                row.mining_pool_ip = Set(mining_pool_ip.map(str::to_owned));
                row.payment_address_evm = Set(worker.payment_address_evm);
                row.payment_address_bittensor = Set(worker.payment_address_bittensor);
                row.wireguard_config = Set(worker.wireguard_config);
                row.socks5_config = Set(worker.socks5_config);
                row.version = Set(worker.version);
                row.updated_at = Set(now);
                Ok(row.update(db).await?)
            }
            None => {
                let row = workers::Model {
                    id: Uuid::new_v4(),
                    ip: worker.ip,
                    public_port: worker.public_port,
                    country_code: None,
                    connection_type: ConnectionType::Unknown,
                    mining_pool_url: worker.mining_pool_url,
                    mining_pool_uid: mining_pool_uid.to_owned(),
                    mining_pool_ip: mining_pool_ip.map(str::to_owned),
                    payment_address_evm: worker.payment_address_evm,
                    payment_address_bittensor: worker.payment_address_bittensor,
                    status: WorkerStatus::Tbd,
                    last_tested_at: None,
                    wireguard_config: worker.wireguard_config,
                    socks5_config: worker.socks5_config,
                    datacenter: None,
                    version: worker.version,
                    created_at: now,
                    updated_at: now,
                };
                Ok(row.into_active_model().insert(db).await?)
            }
        }
    }

    /// Replace-in-place by natural key `(ip, mining_pool_uid)`: upsert every
    /// incoming worker, then sweep rows of this pool that were absent from
    /// the broadcast.
    #[tracing::instrument(skip(db, incoming), fields(count = incoming.len()))]
    pub async fn write_workers(
        db: &impl ConnectionTrait,
        mining_pool_uid: &str,
        mining_pool_ip: Option<&str>,
        incoming: Vec<WorkerWrite>,
    ) -> Result<usize> {
        let mut kept_ips: Vec<String> = Vec::with_capacity(incoming.len());

        for worker in incoming {
            if kept_ips.contains(&worker.ip) {
                continue;
            }
            kept_ips.push(worker.ip.clone());
            Self::upsert(db, mining_pool_uid, mining_pool_ip, worker).await?;
        }

        // A full re-broadcast is authoritative for its pool: absent workers
        // are swept.
        let swept = workers::Entity::delete_many()
            .filter(workers::Column::MiningPoolUid.eq(mining_pool_uid))
            .filter(workers::Column::Ip.is_not_in(kept_ips.clone()))
            .exec(db)
            .await?;

        tracing::debug!(
            kept = kept_ips.len(),
            swept = swept.rows_affected,
            "worker broadcast applied"
        );

        Ok(kept_ips.len())
    }

    pub async fn set_status(
        db: &impl ConnectionTrait,
        id: Uuid,
        status: WorkerStatus,
    ) -> Result<Option<workers::Model>> {
        let Some(row) = workers::Entity::find_by_id(id).one(db).await? else {
            return Ok(None);
        };

        let mut row = row.into_active_model();
        row.status = Set(status);
        row.updated_at = Set(Utc::now().naive_utc());

        Ok(Some(row.update(db).await?))
    }

    /// Persist scorer verdicts. Rows that vanished between scoring and
    /// persistence are skipped.
    #[tracing::instrument(skip(db, results), fields(count = results.len()))]
    pub async fn write_worker_performance(
        db: &impl ConnectionTrait,
        results: Vec<WorkerPerformance>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();

        for result in results {
            let Some(row) = workers::Entity::find_by_id(result.id).one(db).await? else {
                continue;
            };

            let mut row = row.into_active_model();
            row.status = Set(result.status);
            row.last_tested_at = Set(Some(now));
            row.updated_at = Set(now);
            if let Some(country) = result.country_code {
                row.country_code = Set(Some(country));
            }
            if let Some(connection) = result.connection_type {
                row.connection_type = Set(connection);
            }
            if let Some(datacenter) = result.datacenter {
                row.datacenter = Set(Some(datacenter));
            }
            if let Some(version) = result.version {
                row.version = Set(Some(version));
            }
            row.update(db).await?;
        }

        Ok(())
    }
}
