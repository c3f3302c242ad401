//! Chunked blob storage: domain, port, writer, reader, and service layers.
//!
//! Content is persisted as an ordered list of chunks of at most
//! [`MAX_CHUNK_SIZE`] bytes; only the last chunk of a file may be shorter.
//! Readers fetch one chunk at a time, so neither path ever holds more than a
//! chunk of a file in memory.

pub mod domain;
pub mod reader;
pub mod repo;
pub mod repository;
pub mod service;
mod writer;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::errors::StorageError;

pub use domain::{FileInfo, FileRecord, ReadOutcome, StoredFile, Whence};
pub use reader::ChunkReader;
pub use repository::{ChunkStore, ChunkTransaction};
pub use service::FileStorage;

/// Upper bound on a chunk's byte length; also the streaming increment.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        res = fut => res,
    }
}
