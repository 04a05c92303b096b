use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MiningPool::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MiningPool::MiningPoolUid)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MiningPool::Url).string().not_null())
                    .col(ColumnDef::new(MiningPool::Ip).string().not_null())
                    .col(
                        ColumnDef::new(MiningPool::LastKnownWorkerPoolSize)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MiningPool::LastScoredAt).timestamp())
                    .col(
                        ColumnDef::new(MiningPool::ScoreStability)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MiningPool::ScoreSize)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MiningPool::ScorePerformance)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MiningPool::ScoreGeo)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MiningPool::ScoreComposite)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(MiningPool::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(MiningPool::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MiningPool::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MiningPool {
    #[sea_orm(iden = "mining_pools")]
    Table,
    MiningPoolUid,
    Url,
    Ip,
    LastKnownWorkerPoolSize,
    LastScoredAt,
    ScoreStability,
    ScoreSize,
    ScorePerformance,
    ScoreGeo,
    ScoreComposite,
    CreatedAt,
    UpdatedAt,
}
