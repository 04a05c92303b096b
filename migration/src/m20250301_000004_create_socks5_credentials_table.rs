use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Socks5Credential::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Socks5Credential::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Socks5Credential::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Socks5Credential::IpAddress).string().not_null())
                    .col(ColumnDef::new(Socks5Credential::Port).integer().not_null())
                    .col(ColumnDef::new(Socks5Credential::Password).string().not_null())
                    .col(
                        ColumnDef::new(Socks5Credential::Available)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Socks5Credential::ExpiresAt)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Socks5Credential::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Socks5CredentialIndex::Available.to_string())
                    .table(Socks5Credential::Table)
                    .col(Socks5Credential::Available)
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Socks5CredentialIndex::ExpiresAt.to_string())
                    .table(Socks5Credential::Table)
                    .col(Socks5Credential::ExpiresAt)
                    .take(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Socks5Credential::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Socks5Credential {
    #[sea_orm(iden = "worker_socks5_configs")]
    Table,
    Id,
    Username,
    IpAddress,
    Port,
    Password,
    Available,
    ExpiresAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Socks5CredentialIndex {
    #[sea_orm(iden = "idx_worker_socks5_configs_available")]
    Available,
    #[sea_orm(iden = "idx_worker_socks5_configs_expires_at")]
    ExpiresAt,
}
