use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the storage engine and its chunk reader.
///
/// `Clone` so a reader can latch one and hand it back on every later call.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("invalid position: resulting offset is negative")]
    InvalidPosition,
    #[error("unexpected whence: {0}")]
    UnexpectedWhence(i32),
    #[error("resource already closed")]
    ClosedResource,
    #[error("end of stream")]
    EndOfStream,
    #[error("operation cancelled")]
    Cancelled,
    #[error("unknown: {0:#}")]
    Unknown(Arc<anyhow::Error>),
}

impl StorageError {
    /// Wrap a storage or I/O failure, keeping the cause chain.
    pub fn unknown<E>(context: &'static str, err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Unknown(Arc::new(err.into().context(context)))
    }

    /// Collapse everything except cancellation into `Unknown`.
    pub fn into_unknown(self, context: &'static str) -> Self {
        match self {
            Self::Unknown(_) | Self::Cancelled => self,
            other => Self::unknown(context, other),
        }
    }

    /// Underlying cause of an `Unknown` error.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Unknown(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool { matches!(self, Self::EndOfStream) }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            StorageError::NotFound => 2001,
            StorageError::InvalidPosition => 2002,
            StorageError::UnexpectedWhence(_) => 2003,
            StorageError::ClosedResource => 2004,
            StorageError::EndOfStream => 2005,
            StorageError::Cancelled => 2006,
            StorageError::Unknown(_) => 2100,
        }
    }
}

impl From<StorageError> for std::io::Error {
    fn from(err: StorageError) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            StorageError::NotFound => ErrorKind::NotFound,
            StorageError::InvalidPosition | StorageError::UnexpectedWhence(_) => ErrorKind::InvalidInput,
            StorageError::EndOfStream => ErrorKind::UnexpectedEof,
            StorageError::Cancelled => ErrorKind::Interrupted,
            StorageError::ClosedResource | StorageError::Unknown(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
