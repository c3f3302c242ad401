use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::errors::StorageError;
use super::repository::ChunkTransaction;
use super::{until_cancelled, MAX_CHUNK_SIZE};

/// Size and ordered chunk ids produced by one upload.
#[derive(Debug)]
pub(crate) struct Written {
    pub size: i64,
    pub chunk_ids: Vec<Uuid>,
}

/// Insert the file row, stream `source` into chunk rows, then record size and order.
///
/// Runs entirely inside `tx`; the caller owns commit/rollback.
pub(crate) async fn write_file<T, R>(tx: &mut T, source: &mut R, cancel: &CancellationToken) -> Result<(Uuid, Written), StorageError>
where
    T: ChunkTransaction,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let file_id = until_cancelled(cancel, tx.insert_file()).await?;
    let written = write_chunks(tx, file_id, source, cancel).await?;
    until_cancelled(cancel, tx.finish_file(file_id, written.size, &written.chunk_ids)).await?;
    Ok((file_id, written))
}

async fn write_chunks<T, R>(tx: &mut T, file_id: Uuid, source: &mut R, cancel: &CancellationToken) -> Result<Written, StorageError>
where
    T: ChunkTransaction,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    let mut written = Written { size: 0, chunk_ids: Vec::new() };
    loop {
        let n = until_cancelled(cancel, async {
            fill_chunk(source, &mut buf).await.map_err(|e| StorageError::unknown("file read", e))
        })
        .await?;
        if n == 0 {
            break;
        }

        let chunk_id = until_cancelled(cancel, tx.insert_chunk(file_id, &buf[..n])).await?;
        written.chunk_ids.push(chunk_id);
        written.size += n as i64;
        debug!(%file_id, %chunk_id, len = n, "chunk_written");

        // A short chunk means the source is exhausted.
        if n < MAX_CHUNK_SIZE {
            break;
        }
    }
    Ok(written)
}

/// Read until `buf` is full or the source ends; returns bytes read.
///
/// Sources may hand out fewer bytes than asked for, so a single `read` is not
/// enough to keep every non-final chunk at exactly `MAX_CHUNK_SIZE`.
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
