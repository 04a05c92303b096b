use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Worker::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Worker::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Worker::Ip).string().not_null())
                    .col(ColumnDef::new(Worker::PublicPort).integer().not_null())
                    .col(ColumnDef::new(Worker::CountryCode).string_len(8))
                    .col(
                        ColumnDef::new(Worker::ConnectionType)
                            .string_len(16)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(ColumnDef::new(Worker::MiningPoolUrl).string().not_null())
                    .col(ColumnDef::new(Worker::MiningPoolUid).string().not_null())
                    .col(ColumnDef::new(Worker::MiningPoolIp).string())
                    .col(ColumnDef::new(Worker::PaymentAddressEvm).string())
                    .col(ColumnDef::new(Worker::PaymentAddressBittensor).string())
                    .col(
                        ColumnDef::new(Worker::Status)
                            .string_len(16)
                            .not_null()
                            .default("tbd"),
                    )
                    .col(ColumnDef::new(Worker::LastTestedAt).timestamp())
                    .col(ColumnDef::new(Worker::WireguardConfig).text())
                    .col(ColumnDef::new(Worker::Socks5Config).text())
                    .col(ColumnDef::new(Worker::Datacenter).boolean())
                    .col(ColumnDef::new(Worker::Version).string())
                    .col(ColumnDef::new(Worker::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Worker::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::NaturalKey.to_string())
                    .table(Worker::Table)
                    .col(Worker::Ip)
                    .col(Worker::MiningPoolUid)
                    .unique()
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::MiningPoolUid.to_string())
                    .table(Worker::Table)
                    .col(Worker::MiningPoolUid)
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::Status.to_string())
                    .table(Worker::Table)
                    .col(Worker::Status)
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WorkerIndex::CountryCode.to_string())
                    .table(Worker::Table)
                    .col(Worker::CountryCode)
                    .take(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Worker::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Worker {
    #[sea_orm(iden = "workers")]
    Table,
    Id,
    Ip,
    PublicPort,
    CountryCode,
    ConnectionType,
    MiningPoolUrl,
    MiningPoolUid,
    MiningPoolIp,
    PaymentAddressEvm,
    PaymentAddressBittensor,
    Status,
    LastTestedAt,
    WireguardConfig,
    Socks5Config,
    Datacenter,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkerIndex {
    #[sea_orm(iden = "idx_workers_ip_mining_pool_uid")]
    NaturalKey,
    #[sea_orm(iden = "idx_workers_mining_pool_uid")]
    MiningPoolUid,
    #[sea_orm(iden = "idx_workers_status")]
    Status,
    #[sea_orm(iden = "idx_workers_country_code")]
    CountryCode,
}
