use async_trait::async_trait;
use chrono::Utc;
use models::errors::ModelError;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::storage::domain::FileRecord;
use crate::storage::repository::{ChunkStore, ChunkTransaction};

/// Postgres-backed store over the `file` and `chunk` tables.
#[derive(Clone)]
pub struct SeaOrmChunkStore {
    pub db: DatabaseConnection,
}

impl SeaOrmChunkStore {
    pub fn new(db: DatabaseConnection) -> Self { Self { db } }
}

pub struct SeaOrmTransaction {
    txn: DatabaseTransaction,
}

fn db_err(context: &'static str) -> impl FnOnce(DbErr) -> StorageError {
    move |e| match e {
        DbErr::RecordNotFound(_) => StorageError::NotFound,
        other => StorageError::unknown(context, other),
    }
}

fn model_err(context: &'static str) -> impl FnOnce(ModelError) -> StorageError {
    move |e| match e {
        ModelError::Db(db) => db_err(context)(db),
        other => StorageError::unknown(context, other),
    }
}

fn to_record(m: models::file::Model) -> FileRecord {
    FileRecord {
        id: m.id,
        size: m.size,
        chunk_ids: m.chunk_ids,
        metadata: m.metadata,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

#[async_trait]
impl ChunkStore for SeaOrmChunkStore {
    type Tx = SeaOrmTransaction;

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        let txn = self.db.begin().await.map_err(db_err("begin tx"))?;
        Ok(SeaOrmTransaction { txn })
    }

    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, StorageError> {
        let found = models::file::find(&self.db, id).await.map_err(model_err("get file info"))?;
        Ok(found.map(to_record))
    }

    async fn find_chunk(&self, id: Uuid) -> Result<Option<Vec<u8>>, StorageError> {
        models::chunk::find_bytes(&self.db, id).await.map_err(model_err("get chunk"))
    }

    async fn update_metadata(&self, id: Uuid, metadata: Option<Vec<u8>>) -> Result<u64, StorageError> {
        models::file::set_metadata(&self.db, id, metadata).await.map_err(model_err("update metadata"))
    }
}

#[async_trait]
impl ChunkTransaction for SeaOrmTransaction {
    async fn insert_file(&mut self) -> Result<Uuid, StorageError> {
        let f = models::file::create_empty(&self.txn).await.map_err(model_err("save file info"))?;
        Ok(f.id)
    }

    async fn insert_chunk(&mut self, file_id: Uuid, bytes: &[u8]) -> Result<Uuid, StorageError> {
        let c = models::chunk::create(&self.txn, file_id, bytes).await.map_err(model_err("save file chunk"))?;
        Ok(c.id)
    }

    async fn finish_file(&mut self, file_id: Uuid, size: i64, chunk_ids: &[Uuid]) -> Result<(), StorageError> {
        let rows = models::file::finish(&self.txn, file_id, size, chunk_ids)
            .await
            .map_err(model_err("update file size and chunk_ids"))?;
        if rows == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_chunks(&mut self, file_id: Uuid) -> Result<u64, StorageError> {
        models::chunk::delete_by_file(&self.txn, file_id).await.map_err(model_err("delete chunks"))
    }

    async fn delete_file(&mut self, file_id: Uuid) -> Result<u64, StorageError> {
        models::file::hard_delete(&self.txn, file_id).await.map_err(model_err("delete file"))
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.txn.commit().await.map_err(db_err("commit"))
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.txn.rollback().await.map_err(db_err("rollback"))
    }
}
