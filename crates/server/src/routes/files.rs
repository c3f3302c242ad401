use std::io;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;
use service::storage::{ChunkStore, FileStorage, StoredFile, Whence};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::routes::range::{parse_range, ByteRange};

pub struct ServerState<S: ChunkStore> {
    pub storage: Arc<FileStorage<S>>,
    /// Cancelled on shutdown; aborts in-flight uploads and download streams.
    pub shutdown: CancellationToken,
}

impl<S: ChunkStore> ServerState<S> {
    pub fn new(storage: Arc<FileStorage<S>>, shutdown: CancellationToken) -> Self { Self { storage, shutdown } }
}

impl<S: ChunkStore> Clone for ServerState<S> {
    fn clone(&self) -> Self { Self { storage: Arc::clone(&self.storage), shutdown: self.shutdown.clone() } }
}

#[derive(Debug, Serialize)]
pub struct UploadOutput {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FileInfoOutput {
    pub id: Uuid,
    pub size: i64,
    /// Base64 of the raw metadata blob.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("not valid file id"))
}

/// Stream the request body into a new file.
pub async fn upload<S: ChunkStore>(State(state): State<ServerState<S>>, body: Body) -> Result<(StatusCode, Json<UploadOutput>), ApiError> {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let id = state.storage.save_with_cancel(StreamReader::new(stream), &state.shutdown.child_token()).await?;
    info!(file_id = %id, "file_uploaded");
    Ok((StatusCode::CREATED, Json(UploadOutput { id })))
}

/// Stream file content, honouring a single byte range.
pub async fn download<S: ChunkStore>(
    State(state): State<ServerState<S>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw)?;
    let StoredFile { info, mut reader } = state.storage.open_with_cancel(id, state.shutdown.child_token()).await?;
    let size = u64::try_from(info.size).unwrap_or(0);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, size));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::ACCEPT_RANGES, "bytes");

    let response = match range {
        Some(ByteRange::Unsatisfiable) => {
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, [(header::CONTENT_RANGE, format!("bytes */{size}"))]).into_response());
        }
        Some(ByteRange::Partial { start, end }) => {
            let offset = i64::try_from(start).map_err(|_| ApiError::bad_request("range start out of bounds"))?;
            reader.seek(offset, Whence::Start)?;
            let len = end - start + 1;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, len)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .body(Body::from_stream(reader.into_stream(Some(len))))
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(reader.into_stream(None))),
    };
    response.map_err(|e| {
        warn!(file_id = %id, error = %e, "build download response failed");
        ApiError::internal()
    })
}

pub async fn info<S: ChunkStore>(State(state): State<ServerState<S>>, Path(raw): Path<String>) -> Result<Json<FileInfoOutput>, ApiError> {
    let id = parse_id(&raw)?;
    let file = state.storage.open_with_cancel(id, state.shutdown.child_token()).await?;
    let info = file.info;
    Ok(Json(FileInfoOutput {
        id: info.id,
        size: info.size,
        metadata: info.metadata.map(|m| base64::engine::general_purpose::STANDARD.encode(m)),
        created_at: info.created_at,
        updated_at: info.updated_at,
    }))
}

/// Replace metadata with the raw request body.
pub async fn set_metadata<S: ChunkStore>(
    State(state): State<ServerState<S>>,
    Path(raw): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw)?;
    state.storage.set_metadata(id, body.to_vec()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always 204, whether or not the file existed.
pub async fn delete<S: ChunkStore>(State(state): State<ServerState<S>>, Path(raw): Path<String>) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw)?;
    state.storage.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
