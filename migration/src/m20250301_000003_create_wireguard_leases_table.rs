use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WireguardLease::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WireguardLease::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WireguardLease::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WireguardLease::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(WireguardLeaseIndex::ExpiresAt.to_string())
                    .table(WireguardLease::Table)
                    .col(WireguardLease::ExpiresAt)
                    .take(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WireguardLease::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum WireguardLease {
    #[sea_orm(iden = "worker_wireguard_configs")]
    Table,
    Id,
    ExpiresAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WireguardLeaseIndex {
    #[sea_orm(iden = "idx_worker_wireguard_configs_expires_at")]
    ExpiresAt,
}
