use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChallengeResponse::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChallengeResponse::Challenge)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChallengeResponse::Solution).uuid().not_null())
                    .col(ColumnDef::new(ChallengeResponse::Tag).string())
                    .col(
                        ColumnDef::new(ChallengeResponse::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(ChallengeResponseIndex::CreatedAt.to_string())
                    .table(ChallengeResponse::Table)
                    .col(ChallengeResponse::CreatedAt)
                    .take(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChallengeResponse::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ChallengeResponse {
    #[sea_orm(iden = "challenge_response")]
    Table,
    Challenge,
    Solution,
    Tag,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ChallengeResponseIndex {
    #[sea_orm(iden = "idx_challenge_response_created_at")]
    CreatedAt,
}
