use std::io::SeekFrom;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::metrics;
use super::domain::{ReadOutcome, Whence};
use super::repository::ChunkStore;
use super::{until_cancelled, MAX_CHUNK_SIZE};

#[derive(Debug, Clone)]
enum ReaderState {
    Open,
    /// Position reached the end; `seek` may reopen.
    Drained,
    /// A chunk fetch failed or was cancelled; terminal.
    Failed(StorageError),
}

/// Seekable view over a file's chunks, fetching and caching one chunk at a time.
///
/// Not shareable: the cursor and cache are per caller. Each fetch is an
/// independent point query, so a file deleted while a reader is open shows up
/// as `NotFound` on the next uncached chunk even after earlier reads succeeded.
pub struct ChunkReader<S: ChunkStore> {
    store: Arc<S>,
    chunk_ids: Vec<Uuid>,
    size: i64,
    position: i64,
    cached_index: Option<usize>,
    cache: Vec<u8>,
    state: ReaderState,
    closed: bool,
    cancel: CancellationToken,
}

impl<S: ChunkStore> ChunkReader<S> {
    pub fn new(store: Arc<S>, size: i64, chunk_ids: Vec<Uuid>, cancel: CancellationToken) -> Self {
        Self {
            store,
            chunk_ids,
            size,
            position: 0,
            cached_index: None,
            cache: Vec::with_capacity(MAX_CHUNK_SIZE),
            state: ReaderState::Open,
            closed: false,
            cancel,
        }
    }

    pub fn size(&self) -> i64 { self.size }

    pub fn position(&self) -> i64 { self.position }

    pub fn is_closed(&self) -> bool { self.closed }

    /// Copy bytes at the current position into `dst`, at most up to the end of
    /// the current chunk; callers loop to cross chunk boundaries.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, StorageError> {
        // a latched condition outranks close
        match &self.state {
            ReaderState::Failed(err) => return Err(err.clone()),
            ReaderState::Drained => return Err(StorageError::EndOfStream),
            ReaderState::Open if self.closed => return Err(StorageError::ClosedResource),
            ReaderState::Open => {}
        }
        if self.position >= self.size {
            self.state = ReaderState::Drained;
            return Err(StorageError::EndOfStream);
        }
        if self.position < 0 {
            return Err(StorageError::InvalidPosition);
        }

        let index = (self.position / MAX_CHUNK_SIZE as i64) as usize;
        let offset = (self.position % MAX_CHUNK_SIZE as i64) as usize;
        if self.cached_index != Some(index) {
            self.load_chunk(index).await?;
        }

        let available = self.cache.get(offset..).unwrap_or_default();
        if available.is_empty() && !dst.is_empty() {
            return Err(self.fail(StorageError::unknown(
                "read chunk",
                anyhow::anyhow!("chunk {index} shorter than file size implies"),
            )));
        }
        let n = dst.len().min(available.len());
        dst[..n].copy_from_slice(&available[..n]);
        self.position += n as i64;

        if self.position >= self.size {
            self.state = ReaderState::Drained;
            return Ok(ReadOutcome { copied: n, end_of_stream: true });
        }
        Ok(ReadOutcome { copied: n, end_of_stream: false })
    }

    /// Move the cursor. Positions past the end are accepted; the next `read`
    /// then reports end of stream. Seeking a drained reader reopens it.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64, StorageError> {
        match &self.state {
            ReaderState::Failed(err) => return Err(err.clone()),
            ReaderState::Drained if self.closed => return Err(StorageError::EndOfStream),
            _ if self.closed => return Err(StorageError::ClosedResource),
            ReaderState::Open | ReaderState::Drained => {}
        }
        let candidate = match whence {
            Whence::Start => Some(offset),
            Whence::Current => self.position.checked_add(offset),
            Whence::End => self.size.checked_add(offset),
        };
        let position = match candidate {
            Some(p) if p >= 0 => p,
            _ => return Err(StorageError::InvalidPosition),
        };
        self.position = position;
        self.state = ReaderState::Open;
        Ok(position)
    }

    /// `seek` with a numeric origin (0 start, 1 current, 2 end).
    pub fn seek_raw(&mut self, offset: i64, whence: i32) -> Result<i64, StorageError> {
        let whence = Whence::try_from(whence)?;
        self.seek(offset, whence)
    }

    pub fn seek_from(&mut self, pos: SeekFrom) -> Result<i64, StorageError> {
        match pos {
            SeekFrom::Start(n) => {
                let n = i64::try_from(n).map_err(|_| StorageError::InvalidPosition)?;
                self.seek(n, Whence::Start)
            }
            SeekFrom::Current(n) => self.seek(n, Whence::Current),
            SeekFrom::End(n) => self.seek(n, Whence::End),
        }
    }

    /// First call closes; later calls report `ClosedResource`. Closing keeps
    /// an earlier failure or end of stream, which later calls still return.
    pub fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::ClosedResource);
        }
        self.closed = true;
        self.cached_index = None;
        self.cache = Vec::new();
        Ok(())
    }

    /// Drain from the current position into memory. Convenience for small
    /// files and tests; streaming callers use `read` or `into_stream`.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StorageError> {
        let remaining = usize::try_from(self.size.saturating_sub(self.position)).unwrap_or(0);
        let mut out = Vec::with_capacity(remaining);
        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        loop {
            match self.read(&mut buf).await {
                Ok(outcome) => {
                    out.extend_from_slice(&buf[..outcome.copied]);
                    if outcome.end_of_stream {
                        break;
                    }
                }
                Err(StorageError::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Stream at most `limit` bytes (or everything) from the current position,
    /// one chunk-sized piece per item.
    pub fn into_stream(self, limit: Option<u64>) -> impl Stream<Item = Result<Vec<u8>, StorageError>> + Send {
        stream::try_unfold((self, limit), |(mut reader, remaining)| async move {
            if remaining == Some(0) {
                return Ok(None);
            }
            let want = remaining.map_or(MAX_CHUNK_SIZE, |r| r.min(MAX_CHUNK_SIZE as u64) as usize);
            let mut buf = vec![0u8; want];
            match reader.read(&mut buf).await {
                Ok(outcome) if outcome.copied == 0 => Ok(None),
                Ok(outcome) => {
                    buf.truncate(outcome.copied);
                    let remaining = remaining.map(|r| r - outcome.copied as u64);
                    Ok(Some((buf, (reader, remaining))))
                }
                Err(StorageError::EndOfStream) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    async fn load_chunk(&mut self, index: usize) -> Result<(), StorageError> {
        let Some(&chunk_id) = self.chunk_ids.get(index) else {
            return Err(self.fail(StorageError::unknown(
                "read chunk",
                anyhow::anyhow!("chunk index {index} out of range ({} chunks)", self.chunk_ids.len()),
            )));
        };
        let fetched = until_cancelled(&self.cancel, metrics::collect("fetch_chunk", self.store.find_chunk(chunk_id))).await;
        match fetched {
            Ok(Some(bytes)) => {
                debug!(%chunk_id, index, len = bytes.len(), "chunk_cached");
                self.cache = bytes;
                self.cached_index = Some(index);
                Ok(())
            }
            Ok(None) => {
                warn!(%chunk_id, index, "chunk missing");
                Err(self.fail(StorageError::NotFound))
            }
            Err(e) => {
                warn!(%chunk_id, index, error = %e, "chunk fetch failed");
                Err(self.fail(e))
            }
        }
    }

    fn fail(&mut self, err: StorageError) -> StorageError {
        self.state = ReaderState::Failed(err.clone());
        err
    }
}
