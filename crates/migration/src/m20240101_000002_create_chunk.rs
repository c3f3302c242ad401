//! Create `chunk` table with FK to `file`.
//!
//! Chunks are owned by exactly one file and go away with it.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Chunk::Table)
                    .if_not_exists()
                    .col(uuid(Chunk::Id).primary_key())
                    .col(uuid(Chunk::FileId).not_null())
                    .col(ColumnDef::new(Chunk::Bytes).binary().not_null())
                    .col(timestamp_with_time_zone(Chunk::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Chunk::UpdatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chunk_file")
                            .from(Chunk::Table, Chunk::FileId)
                            .to(File::Table, File::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Chunk::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Chunk { Table, Id, FileId, Bytes, CreatedAt, UpdatedAt }

#[derive(DeriveIden)]
enum File { Table, Id }
