//! Create `poll` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Poll::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Poll::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Poll::Question).string_len(500).not_null())
                    .col(
                        ColumnDef::new(Poll::PollType)
                            .string_len(16)
                            .not_null()
                            .default("SINGLE_CHOICE"),
                    )
                    .col(
                        ColumnDef::new(Poll::Status)
                            .string_len(16)
                            .not_null()
                            .default("DRAFT"),
                    )
                    .col(
                        ColumnDef::new(Poll::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Poll::StartTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(Poll::EndTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(Poll::CreatedBy).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Poll::IsPublic)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Poll::AllowMultipleVotes)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Poll::ShortCode)
                            .string_len(16)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index on status for the active list and scheduler
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_status")
                    .table(Poll::Table)
                    .col(Poll::Status)
                    .to_owned(),
            )
            .await?;

        // Index on created_at for newest-first listings
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_created_at")
                    .table(Poll::Table)
                    .col(Poll::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Poll::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
    Question,
    PollType,
    Status,
    CreatedAt,
    StartTime,
    EndTime,
    CreatedBy,
    IsPublic,
    AllowMultipleVotes,
    ShortCode,
}
