use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::metrics;
use super::domain::{FileInfo, StoredFile};
use super::reader::ChunkReader;
use super::repository::{ChunkStore, ChunkTransaction};
use super::{until_cancelled, writer};

/// File operations over a `ChunkStore`: save, open, set metadata, delete.
///
/// # Examples
/// ```
/// use service::storage::{FileStorage, repository::memory::MemoryChunkStore};
/// use std::sync::Arc;
/// let storage = FileStorage::new(Arc::new(MemoryChunkStore::new()));
/// let id = tokio_test::block_on(storage.save(&b"hello chunks"[..])).unwrap();
/// let mut file = tokio_test::block_on(storage.open(id)).unwrap();
/// assert_eq!(file.info.size, 12);
/// assert_eq!(tokio_test::block_on(file.reader.read_to_end()).unwrap(), b"hello chunks");
/// ```
pub struct FileStorage<S: ChunkStore> {
    store: Arc<S>,
}

impl<S: ChunkStore> FileStorage<S> {
    pub fn new(store: Arc<S>) -> Self { Self { store } }

    /// Persist `source` as a new file. Errors: unknown, cancelled.
    pub async fn save<R>(&self, source: R) -> Result<Uuid, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.save_with_cancel(source, &CancellationToken::new()).await
    }

    /// All-or-nothing: on any failure the transaction is rolled back and no
    /// file id is returned.
    #[instrument(skip(self, source, cancel))]
    pub async fn save_with_cancel<R>(&self, mut source: R, cancel: &CancellationToken) -> Result<Uuid, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        metrics::collect("save", async {
            let mut tx = until_cancelled(cancel, self.store.begin()).await.map_err(|e| e.into_unknown("begin tx"))?;
            match writer::write_file(&mut tx, &mut source, cancel).await {
                Ok(_) if cancel.is_cancelled() => {
                    rollback(tx).await;
                    warn!("save cancelled before commit");
                    Err(StorageError::Cancelled)
                }
                Ok((file_id, written)) => {
                    // once started, the commit's own outcome is what the caller sees
                    tx.commit().await.map_err(|e| e.into_unknown("commit"))?;
                    info!(%file_id, size = written.size, chunks = written.chunk_ids.len(), "file_saved");
                    Ok(file_id)
                }
                Err(e) => {
                    rollback(tx).await;
                    warn!(error = %e, "save failed");
                    Err(e.into_unknown("save"))
                }
            }
        })
        .await
    }

    /// Resolve `file_id` to its info and a reader at position 0. Errors: not found, unknown.
    pub async fn open(&self, file_id: Uuid) -> Result<StoredFile<S>, StorageError> {
        self.open_with_cancel(file_id, CancellationToken::new()).await
    }

    /// `cancel` also governs every chunk fetch the returned reader performs.
    #[instrument(skip(self, cancel), fields(file_id = %file_id))]
    pub async fn open_with_cancel(&self, file_id: Uuid, cancel: CancellationToken) -> Result<StoredFile<S>, StorageError> {
        metrics::collect("open", async {
            let record = until_cancelled(&cancel, self.store.find_file(file_id))
                .await?
                .ok_or(StorageError::NotFound)?;
            let info = FileInfo::from(&record);
            let reader = ChunkReader::new(Arc::clone(&self.store), record.size, record.chunk_ids, cancel);
            Ok(StoredFile { info, reader })
        })
        .await
    }

    /// Replace the metadata blob. Errors: not found, unknown.
    #[instrument(skip(self, metadata), fields(file_id = %file_id, len = metadata.len()))]
    pub async fn set_metadata(&self, file_id: Uuid, metadata: Vec<u8>) -> Result<(), StorageError> {
        metrics::collect("set_metadata", async {
            let rows = self.store.update_metadata(file_id, Some(metadata)).await.map_err(|e| e.into_unknown("update metadata"))?;
            if rows == 0 {
                return Err(StorageError::NotFound);
            }
            info!(%file_id, "metadata_updated");
            Ok(())
        })
        .await
    }

    /// Remove the file and its chunks. A missing file is not an error.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn delete(&self, file_id: Uuid) -> Result<(), StorageError> {
        metrics::collect("delete", async {
            let mut tx = self.store.begin().await.map_err(|e| e.into_unknown("begin tx"))?;
            let res = async {
                let chunks = tx.delete_chunks(file_id).await?;
                let files = tx.delete_file(file_id).await?;
                Ok::<_, StorageError>((chunks, files))
            }
            .await;
            match res {
                Ok((chunks, files)) => {
                    tx.commit().await.map_err(|e| e.into_unknown("commit"))?;
                    info!(%file_id, existed = files > 0, chunks, "file_deleted");
                    Ok(())
                }
                Err(e) => {
                    rollback(tx).await;
                    Err(e.into_unknown("delete"))
                }
            }
        })
        .await
    }
}

async fn rollback<T: ChunkTransaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::memory::MemoryChunkStore;
    use crate::storage::{Whence, MAX_CHUNK_SIZE};
    use crate::test_support::{patterned, FailingReader, ShortReads, StallingReader};

    fn storage() -> (MemoryChunkStore, FileStorage<MemoryChunkStore>) {
        let store = MemoryChunkStore::new();
        (store.clone(), FileStorage::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn round_trip_various_lengths() {
        let (_, storage) = storage();
        for len in [0, 1, MAX_CHUNK_SIZE - 1, MAX_CHUNK_SIZE, MAX_CHUNK_SIZE + 1, 10_000, 5 * MAX_CHUNK_SIZE + 17] {
            let data = patterned(len);
            let id = storage.save(data.as_slice()).await.unwrap();
            let mut file = storage.open(id).await.unwrap();
            assert_eq!(file.info.size, len as i64);
            assert_eq!(file.reader.read_to_end().await.unwrap(), data, "len {len}");
        }
    }

    #[tokio::test]
    async fn ten_thousand_bytes_make_three_chunks() {
        let (store, storage) = storage();
        let id = storage.save(patterned(10_000).as_slice()).await.unwrap();
        assert_eq!(store.chunk_lengths(id), vec![4096, 4096, 1808]);
        let lengths: usize = store.chunk_lengths(id).iter().sum();
        assert_eq!(lengths as i64, storage.open(id).await.unwrap().info.size);
    }

    #[tokio::test]
    async fn empty_source_makes_empty_file() {
        let (store, storage) = storage();
        let id = storage.save(&b""[..]).await.unwrap();
        let rec = store.find_file(id).await.unwrap().unwrap();
        assert_eq!(rec.size, 0);
        assert!(rec.chunk_ids.is_empty());

        let mut file = storage.open(id).await.unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(file.reader.read(&mut buf).await, Err(StorageError::EndOfStream)));
    }

    #[tokio::test]
    async fn short_source_reads_still_fill_chunks() {
        let (store, storage) = storage();
        let data = patterned(10_000);
        let id = storage.save(ShortReads::new(&data, 1000)).await.unwrap();
        assert_eq!(store.chunk_lengths(id), vec![4096, 4096, 1808]);
        assert_eq!(storage.open(id).await.unwrap().reader.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn source_failure_rolls_back() {
        let (store, storage) = storage();
        let err = storage.save(FailingReader::new(3 * MAX_CHUNK_SIZE)).await.unwrap_err();
        assert!(matches!(err, StorageError::Unknown(_)));
        assert!(err.to_string().contains("client went away"), "{err}");
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn insert_failure_rolls_back() {
        let (store, storage) = storage();
        store.fail_insert_chunk_at(1);
        let err = storage.save(patterned(10_000).as_slice()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unknown(_)));
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn commit_failure_is_unknown() {
        let (store, storage) = storage();
        store.fail_commit(true);
        let err = storage.save(patterned(10).as_slice()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unknown(_)));
        assert_eq!(store.file_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_save_returns_no_id() {
        let (store, storage) = storage();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = storage.save_with_cancel(patterned(100).as_slice(), &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(store.file_count(), 0);
    }

    #[tokio::test]
    async fn cancel_mid_upload_rolls_back_written_chunks() {
        let (store, storage) = storage();
        let cancel = CancellationToken::new();
        // two full chunks, then the source stalls and the token fires
        let source = StallingReader::new(patterned(2 * MAX_CHUNK_SIZE + 10), cancel.clone());
        let err = storage.save_with_cancel(source, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(store.chunk_inserts(), 2);
        assert_eq!(store.file_count(), 0);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn cancel_during_commit_keeps_committed_file() {
        let (store, storage) = storage();
        let cancel = CancellationToken::new();
        store.cancel_during_commit(cancel.clone());
        let data = patterned(MAX_CHUNK_SIZE + 1);
        let id = storage.save_with_cancel(data.as_slice(), &cancel).await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(store.file_count(), 1);
        assert_eq!(storage.open(id).await.unwrap().reader.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn metadata_and_delete_asymmetry() {
        let (_, storage) = storage();
        let missing = Uuid::new_v4();
        assert!(matches!(storage.set_metadata(missing, b"{}".to_vec()).await, Err(StorageError::NotFound)));
        assert!(storage.delete(missing).await.is_ok());
    }

    #[tokio::test]
    async fn metadata_is_independently_mutable() {
        let (_, storage) = storage();
        let id = storage.save(&b"payload"[..]).await.unwrap();
        assert!(storage.open(id).await.unwrap().info.metadata.is_none());

        storage.set_metadata(id, br#"{"a":1}"#.to_vec()).await.unwrap();
        storage.set_metadata(id, br#"{"a":2}"#.to_vec()).await.unwrap();
        let mut file = storage.open(id).await.unwrap();
        assert_eq!(file.info.metadata.as_deref(), Some(br#"{"a":2}"#.as_slice()));
        assert_eq!(file.reader.read_to_end().await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn delete_removes_file_and_chunks() {
        let (store, storage) = storage();
        let keep = storage.save(patterned(5000).as_slice()).await.unwrap();
        let id = storage.save(patterned(9000).as_slice()).await.unwrap();
        assert_eq!(store.chunk_count(), 5);

        storage.delete(id).await.unwrap();
        assert!(matches!(storage.open(id).await, Err(StorageError::NotFound)));
        assert_eq!(store.chunk_count(), 2);
        assert!(storage.open(keep).await.is_ok());

        storage.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_while_reading_surfaces_not_found() {
        let (_, storage) = storage();
        let data = patterned(3 * MAX_CHUNK_SIZE);
        let id = storage.save(data.as_slice()).await.unwrap();
        let mut file = storage.open(id).await.unwrap();

        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        assert_eq!(file.reader.read(&mut buf).await.unwrap().copied, MAX_CHUNK_SIZE);
        storage.delete(id).await.unwrap();
        assert!(matches!(file.reader.read(&mut buf).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn negative_seek_then_read_prior_byte() {
        let (_, storage) = storage();
        let data = patterned(6000);
        let id = storage.save(data.as_slice()).await.unwrap();
        let mut file = storage.open(id).await.unwrap();
        file.reader.seek(4500, Whence::Start).unwrap();
        assert!(matches!(file.reader.seek(-1, Whence::Start), Err(StorageError::InvalidPosition)));
        let mut one = [0u8; 1];
        file.reader.read(&mut one).await.unwrap();
        assert_eq!(one[0], data[4500]);
    }

    #[tokio::test]
    async fn open_missing_is_not_found() {
        let (_, storage) = storage();
        assert!(matches!(storage.open(Uuid::new_v4()).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn concurrent_saves_are_independent() {
        let (store, storage) = storage();
        let storage = Arc::new(storage);
        let mut handles = Vec::new();
        for i in 0..8usize {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let data = patterned(1000 * (i + 1));
                let id = storage.save(data.as_slice()).await.unwrap();
                (id, data)
            }));
        }
        for h in handles {
            let (id, data) = h.await.unwrap();
            assert_eq!(storage.open(id).await.unwrap().reader.read_to_end().await.unwrap(), data);
        }
        assert_eq!(store.file_count(), 8);
    }
}
