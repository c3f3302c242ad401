use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StorageError;
use super::reader::ChunkReader;
use super::repository::ChunkStore;

/// File row as seen through the storage port.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    /// Sum of the chunk lengths; never negative.
    pub size: i64,
    /// Chunk order == byte order of the content.
    pub chunk_ids: Vec<Uuid>,
    pub metadata: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-facing view of a file (no chunk layout).
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub id: Uuid,
    pub size: i64,
    pub metadata: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileInfo {
    fn from(r: &FileRecord) -> Self {
        Self { id: r.id, size: r.size, metadata: r.metadata.clone(), created_at: r.created_at, updated_at: r.updated_at }
    }
}

/// Resolved file plus a reader positioned at byte 0.
pub struct StoredFile<S: ChunkStore> {
    pub info: FileInfo,
    pub reader: ChunkReader<S>,
}

/// Result of one `ChunkReader::read` call.
///
/// `end_of_stream` is set on the call that copies the final bytes; those bytes
/// are still valid and must be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub copied: usize,
    pub end_of_stream: bool,
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Numeric origins as used on the wire: 0 = start, 1 = current, 2 = end.
impl TryFrom<i32> for Whence {
    type Error = StorageError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            other => Err(StorageError::UnexpectedWhence(other)),
        }
    }
}
