//! File storage engine.
//! - Splits uploaded byte streams into bounded chunks persisted through a `ChunkStore`.
//! - Serves stored files back through a seekable, lazily-fetching `ChunkReader`.
//! - Ships a SeaORM adapter for Postgres and an in-memory adapter for tests.

pub mod errors;
pub mod metrics;
pub mod storage;
#[cfg(test)]
pub mod test_support;

pub use storage::{FileStorage, MAX_CHUNK_SIZE};
