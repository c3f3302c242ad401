use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StorageError;
use super::domain::FileRecord;

/// Narrow persistence port used by the writer, reader and point operations.
///
/// Reads outside a transaction are independent point queries: a reader sees
/// whatever is committed at the moment it fetches each chunk.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    type Tx: ChunkTransaction;

    async fn begin(&self) -> Result<Self::Tx, StorageError>;
    async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, StorageError>;
    async fn find_chunk(&self, id: Uuid) -> Result<Option<Vec<u8>>, StorageError>;
    /// Returns rows affected.
    async fn update_metadata(&self, id: Uuid, metadata: Option<Vec<u8>>) -> Result<u64, StorageError>;
}

/// Unit of atomic work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait ChunkTransaction: Send + Sized {
    async fn insert_file(&mut self) -> Result<Uuid, StorageError>;
    async fn insert_chunk(&mut self, file_id: Uuid, bytes: &[u8]) -> Result<Uuid, StorageError>;
    async fn finish_file(&mut self, file_id: Uuid, size: i64, chunk_ids: &[Uuid]) -> Result<(), StorageError>;
    async fn delete_chunks(&mut self, file_id: Uuid) -> Result<u64, StorageError>;
    async fn delete_file(&mut self, file_id: Uuid) -> Result<u64, StorageError>;
    async fn commit(self) -> Result<(), StorageError>;
    async fn rollback(self) -> Result<(), StorageError>;
}

/// In-memory store for tests and local runs.
///
/// Transactions buffer their writes and apply them under one lock on commit,
/// so uncommitted rows are never observable. Fault switches let tests fail
/// individual port calls.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Tables {
        files: HashMap<Uuid, FileRecord>,
        chunks: HashMap<Uuid, StoredChunk>,
    }

    struct StoredChunk {
        file_id: Uuid,
        bytes: Vec<u8>,
    }

    #[derive(Default)]
    struct Faults {
        /// Fail the n-th (0-based) chunk insert of every transaction.
        insert_chunk_at: Mutex<Option<usize>>,
        fail_commit: AtomicBool,
        fail_fetch: AtomicBool,
        /// Fired once a commit has started, before it applies.
        cancel_during_commit: Mutex<Option<CancellationToken>>,
    }

    #[derive(Default)]
    struct Shared {
        tables: Mutex<Tables>,
        faults: Faults,
        chunk_fetches: AtomicUsize,
        chunk_inserts: AtomicUsize,
    }

    impl Shared {
        fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
            self.tables
                .lock()
                .map_err(|_| StorageError::unknown("memory store", anyhow::anyhow!("lock poisoned")))
        }
    }

    #[derive(Default, Clone)]
    pub struct MemoryChunkStore {
        shared: Arc<Shared>,
    }

    impl MemoryChunkStore {
        pub fn new() -> Self { Self::default() }

        /// Make the n-th chunk insert of each transaction fail.
        pub fn fail_insert_chunk_at(&self, n: usize) {
            if let Ok(mut slot) = self.shared.faults.insert_chunk_at.lock() {
                *slot = Some(n);
            }
        }

        pub fn fail_commit(&self, fail: bool) { self.shared.faults.fail_commit.store(fail, Ordering::SeqCst); }

        pub fn fail_chunk_fetch(&self, fail: bool) { self.shared.faults.fail_fetch.store(fail, Ordering::SeqCst); }

        /// Cancel `token` from inside the next commit, then yield once before applying.
        pub fn cancel_during_commit(&self, token: CancellationToken) {
            if let Ok(mut slot) = self.shared.faults.cancel_during_commit.lock() {
                *slot = Some(token);
            }
        }

        /// Chunk inserts accepted by any transaction, committed or not.
        pub fn chunk_inserts(&self) -> usize { self.shared.chunk_inserts.load(Ordering::SeqCst) }

        /// Number of `find_chunk` calls served so far.
        pub fn chunk_fetches(&self) -> usize { self.shared.chunk_fetches.load(Ordering::SeqCst) }

        pub fn file_count(&self) -> usize { self.shared.tables().map(|t| t.files.len()).unwrap_or(0) }

        pub fn chunk_count(&self) -> usize { self.shared.tables().map(|t| t.chunks.len()).unwrap_or(0) }

        /// Byte lengths of a file's chunks in stored order.
        pub fn chunk_lengths(&self, file_id: Uuid) -> Vec<usize> {
            let Ok(t) = self.shared.tables() else { return Vec::new() };
            t.files
                .get(&file_id)
                .map(|f| f.chunk_ids.iter().filter_map(|id| t.chunks.get(id)).map(|c| c.bytes.len()).collect())
                .unwrap_or_default()
        }

        /// Drop a single chunk row behind the file's back.
        pub fn remove_chunk(&self, chunk_id: Uuid) -> bool {
            self.shared.tables().map(|mut t| t.chunks.remove(&chunk_id).is_some()).unwrap_or(false)
        }
    }

    #[async_trait]
    impl ChunkStore for MemoryChunkStore {
        type Tx = MemoryTransaction;

        async fn begin(&self) -> Result<Self::Tx, StorageError> {
            Ok(MemoryTransaction { shared: Arc::clone(&self.shared), ops: Vec::new(), chunk_inserts: 0 })
        }

        async fn find_file(&self, id: Uuid) -> Result<Option<FileRecord>, StorageError> {
            Ok(self.shared.tables()?.files.get(&id).cloned())
        }

        async fn find_chunk(&self, id: Uuid) -> Result<Option<Vec<u8>>, StorageError> {
            self.shared.chunk_fetches.fetch_add(1, Ordering::SeqCst);
            if self.shared.faults.fail_fetch.load(Ordering::SeqCst) {
                return Err(StorageError::unknown("find chunk", anyhow::anyhow!("injected fetch failure")));
            }
            Ok(self.shared.tables()?.chunks.get(&id).map(|c| c.bytes.clone()))
        }

        async fn update_metadata(&self, id: Uuid, metadata: Option<Vec<u8>>) -> Result<u64, StorageError> {
            let mut t = self.shared.tables()?;
            match t.files.get_mut(&id) {
                Some(f) => {
                    f.metadata = metadata;
                    f.updated_at = Utc::now();
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    enum Op {
        InsertFile(FileRecord),
        InsertChunk { id: Uuid, file_id: Uuid, bytes: Vec<u8> },
        FinishFile { id: Uuid, size: i64, chunk_ids: Vec<Uuid> },
        DeleteChunks(Uuid),
        DeleteFile(Uuid),
    }

    pub struct MemoryTransaction {
        shared: Arc<Shared>,
        ops: Vec<Op>,
        chunk_inserts: usize,
    }

    impl MemoryTransaction {
        fn file_visible(&self, t: &Tables, id: Uuid) -> bool {
            let mut visible = t.files.contains_key(&id);
            for op in &self.ops {
                match op {
                    Op::InsertFile(f) if f.id == id => visible = true,
                    Op::DeleteFile(fid) if *fid == id => visible = false,
                    _ => {}
                }
            }
            visible
        }

        fn chunks_visible(&self, t: &Tables, file_id: Uuid) -> u64 {
            let mut count = t.chunks.values().filter(|c| c.file_id == file_id).count() as u64;
            for op in &self.ops {
                match op {
                    Op::InsertChunk { file_id: fid, .. } if *fid == file_id => count += 1,
                    Op::DeleteChunks(fid) | Op::DeleteFile(fid) if *fid == file_id => count = 0,
                    _ => {}
                }
            }
            count
        }
    }

    #[async_trait]
    impl ChunkTransaction for MemoryTransaction {
        async fn insert_file(&mut self) -> Result<Uuid, StorageError> {
            let now = Utc::now();
            let record = FileRecord { id: Uuid::new_v4(), size: 0, chunk_ids: Vec::new(), metadata: None, created_at: now, updated_at: now };
            let id = record.id;
            self.ops.push(Op::InsertFile(record));
            Ok(id)
        }

        async fn insert_chunk(&mut self, file_id: Uuid, bytes: &[u8]) -> Result<Uuid, StorageError> {
            let at = self.chunk_inserts;
            self.chunk_inserts += 1;
            let fail_at = self.shared.faults.insert_chunk_at.lock().ok().and_then(|slot| *slot);
            if fail_at == Some(at) {
                return Err(StorageError::unknown("save file chunk", anyhow::anyhow!("injected insert failure")));
            }
            {
                let t = self.shared.tables()?;
                if !self.file_visible(&t, file_id) {
                    return Err(StorageError::unknown("save file chunk", anyhow::anyhow!("foreign key violation: file {file_id}")));
                }
            }
            let id = Uuid::new_v4();
            self.shared.chunk_inserts.fetch_add(1, Ordering::SeqCst);
            self.ops.push(Op::InsertChunk { id, file_id, bytes: bytes.to_vec() });
            Ok(id)
        }

        async fn finish_file(&mut self, file_id: Uuid, size: i64, chunk_ids: &[Uuid]) -> Result<(), StorageError> {
            let visible = {
                let t = self.shared.tables()?;
                self.file_visible(&t, file_id)
            };
            if !visible {
                return Err(StorageError::NotFound);
            }
            self.ops.push(Op::FinishFile { id: file_id, size, chunk_ids: chunk_ids.to_vec() });
            Ok(())
        }

        async fn delete_chunks(&mut self, file_id: Uuid) -> Result<u64, StorageError> {
            let n = {
                let t = self.shared.tables()?;
                self.chunks_visible(&t, file_id)
            };
            self.ops.push(Op::DeleteChunks(file_id));
            Ok(n)
        }

        async fn delete_file(&mut self, file_id: Uuid) -> Result<u64, StorageError> {
            let existed = {
                let t = self.shared.tables()?;
                self.file_visible(&t, file_id)
            };
            self.ops.push(Op::DeleteFile(file_id));
            Ok(u64::from(existed))
        }

        async fn commit(self) -> Result<(), StorageError> {
            if self.shared.faults.fail_commit.load(Ordering::SeqCst) {
                return Err(StorageError::unknown("commit", anyhow::anyhow!("injected commit failure")));
            }
            let token = self.shared.faults.cancel_during_commit.lock().ok().and_then(|mut slot| slot.take());
            if let Some(token) = token {
                token.cancel();
                tokio::task::yield_now().await;
            }
            let mut t = self.shared.tables()?;
            for op in self.ops {
                match op {
                    Op::InsertFile(f) => {
                        t.files.insert(f.id, f);
                    }
                    Op::InsertChunk { id, file_id, bytes } => {
                        t.chunks.insert(id, StoredChunk { file_id, bytes });
                    }
                    Op::FinishFile { id, size, chunk_ids } => {
                        if let Some(f) = t.files.get_mut(&id) {
                            f.size = size;
                            f.chunk_ids = chunk_ids;
                            f.updated_at = Utc::now();
                        }
                    }
                    Op::DeleteChunks(file_id) => t.chunks.retain(|_, c| c.file_id != file_id),
                    Op::DeleteFile(id) => {
                        t.files.remove(&id);
                        // cascade
                        t.chunks.retain(|_, c| c.file_id != id);
                    }
                }
            }
            Ok(())
        }

        async fn rollback(self) -> Result<(), StorageError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryChunkStore;
    use super::*;

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryChunkStore::new();
        let mut tx = store.begin().await.unwrap();
        let fid = tx.insert_file().await.unwrap();
        let cid = tx.insert_chunk(fid, b"abc").await.unwrap();
        assert!(store.find_file(fid).await.unwrap().is_none());
        assert!(store.find_chunk(cid).await.unwrap().is_none());
        tx.rollback().await.unwrap();
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn commit_applies_in_order() {
        let store = MemoryChunkStore::new();
        let mut tx = store.begin().await.unwrap();
        let fid = tx.insert_file().await.unwrap();
        let c1 = tx.insert_chunk(fid, b"ab").await.unwrap();
        let c2 = tx.insert_chunk(fid, b"c").await.unwrap();
        tx.finish_file(fid, 3, &[c1, c2]).await.unwrap();
        tx.commit().await.unwrap();

        let f = store.find_file(fid).await.unwrap().unwrap();
        assert_eq!(f.size, 3);
        assert_eq!(f.chunk_ids, vec![c1, c2]);
        assert_eq!(store.chunk_lengths(fid), vec![2, 1]);
    }

    #[tokio::test]
    async fn chunk_requires_visible_file() {
        let store = MemoryChunkStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_chunk(Uuid::new_v4(), b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::Unknown(_)));
    }

    #[tokio::test]
    async fn delete_counts_rows() {
        let store = MemoryChunkStore::new();
        let mut tx = store.begin().await.unwrap();
        let fid = tx.insert_file().await.unwrap();
        let c = tx.insert_chunk(fid, b"x").await.unwrap();
        tx.finish_file(fid, 1, &[c]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_chunks(fid).await.unwrap(), 1);
        assert_eq!(tx.delete_file(fid).await.unwrap(), 1);
        assert_eq!(tx.delete_file(fid).await.unwrap(), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }
}
