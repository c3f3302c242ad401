//! Create `file` table.
//!
//! One row per stored blob. `chunk_ids` holds the chunk order; it is written
//! once when an upload finishes and never changed afterwards.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(File::Table)
                    .if_not_exists()
                    .col(uuid(File::Id).primary_key())
                    .col(
                        ColumnDef::new(File::Size)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(File::ChunkIds)
                            .array(ColumnType::Uuid)
                            .not_null()
                            .default(Expr::cust("'{}'::uuid[]")),
                    )
                    .col(ColumnDef::new(File::Metadata).binary().null())
                    .col(timestamp_with_time_zone(File::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(File::UpdatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(File::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum File { Table, Id, Size, ChunkIds, Metadata, CreatedAt, UpdatedAt }
