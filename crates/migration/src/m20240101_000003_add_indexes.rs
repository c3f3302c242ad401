use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Chunk: index on file_id for cascade and bulk delete
        manager
            .create_index(
                Index::create()
                    .name("idx_chunk_file")
                    .table(Chunk::Table)
                    .col(Chunk::FileId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_chunk_file").table(Chunk::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Chunk { Table, FileId }
