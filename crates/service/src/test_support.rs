#![cfg(test)]
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use migration::MigratorTrait;
use models::db::{connect_with_config, DatabaseConfig};
use sea_orm::DatabaseConnection;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::repository::memory::MemoryChunkStore;
use crate::storage::{ChunkStore, ChunkTransaction};

// Ensure migrations run only once across the entire test process
static MIGRATED: OnceCell<bool> = OnceCell::const_new();

/// Migrated connection, or `None` when no database is reachable.
pub async fn get_db() -> Option<DatabaseConnection> {
    if std::env::var("SKIP_DB_TESTS").is_ok() {
        return None;
    }
    let migrated = *MIGRATED
        .get_or_init(|| async {
            let cfg = DatabaseConfig { min_connections: 1, ..DatabaseConfig::default() };
            match connect_with_config(&cfg).await {
                Ok(db) => match migration::Migrator::up(&db, None).await {
                    Ok(()) => true,
                    Err(e) => {
                        eprintln!("skip: migrate up failed: {}", e);
                        false
                    }
                },
                Err(e) => {
                    eprintln!("skip: cannot connect to db: {}", e);
                    false
                }
            }
        })
        .await;
    if !migrated {
        return None;
    }

    // Fresh connection for the current test's runtime
    let cfg = DatabaseConfig { min_connections: 1, acquire_timeout_secs: 10, ..DatabaseConfig::default() };
    connect_with_config(&cfg).await.ok()
}

/// Deterministic, non-repeating-per-chunk test content.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Commit `data` as one file through the raw port, bypassing the service.
pub async fn save_bytes(store: &MemoryChunkStore, data: &[u8]) -> Uuid {
    let mut tx = store.begin().await.unwrap();
    let file_id = tx.insert_file().await.unwrap();
    let mut ids = Vec::new();
    for chunk in data.chunks(crate::MAX_CHUNK_SIZE) {
        ids.push(tx.insert_chunk(file_id, chunk).await.unwrap());
    }
    tx.finish_file(file_id, data.len() as i64, &ids).await.unwrap();
    tx.commit().await.unwrap();
    file_id
}

/// Source that hands out at most `step` bytes per read.
pub struct ShortReads<'a> {
    data: &'a [u8],
    step: usize,
}

impl<'a> ShortReads<'a> {
    pub fn new(data: &'a [u8], step: usize) -> Self { Self { data, step } }
}

impl AsyncRead for ShortReads<'_> {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let data = self.data;
        let n = self.step.min(data.len()).min(buf.remaining());
        let (head, tail) = data.split_at(n);
        buf.put_slice(head);
        self.data = tail;
        Poll::Ready(Ok(()))
    }
}

/// Source that hands out `data`, then cancels `cancel` and never completes.
pub struct StallingReader {
    data: Vec<u8>,
    pos: usize,
    cancel: CancellationToken,
}

impl StallingReader {
    pub fn new(data: Vec<u8>, cancel: CancellationToken) -> Self { Self { data, pos: 0, cancel } }
}

impl AsyncRead for StallingReader {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.pos == self.data.len() {
            self.cancel.cancel();
            return Poll::Pending;
        }
        let n = (self.data.len() - self.pos).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Source that yields `ok_bytes` zero bytes, then fails.
pub struct FailingReader {
    ok_bytes: usize,
}

impl FailingReader {
    pub fn new(ok_bytes: usize) -> Self { Self { ok_bytes } }
}

impl AsyncRead for FailingReader {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.ok_bytes == 0 {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")));
        }
        let n = self.ok_bytes.min(buf.remaining());
        buf.put_slice(&vec![0u8; n]);
        self.ok_bytes -= n;
        Poll::Ready(Ok(()))
    }
}
