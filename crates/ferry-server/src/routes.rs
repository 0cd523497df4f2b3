use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};

use crate::assemble;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::range::{ByteRange, resolve_range};
use crate::session::SessionRegistry;
use crate::storage::{ChunkStore, human_size, is_plain_filename, sanitize_filename};

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<ChunkStore>,
    pub config: Arc<Config>,
}

// ── Request/response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub filesize: u64,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub success: bool,
    pub upload_id: String,
    pub chunk_size: u64,
}

#[derive(Debug, Serialize)]
pub struct ChunkAck {
    pub success: bool,
    /// Bytes persisted so far across all chunk indices.
    pub uploaded: u64,
    /// The session's declared total size.
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub success: bool,
    pub message: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadStatusResponse {
    pub success: bool,
    pub upload_id: String,
    pub filename: String,
    pub state: crate::session::SessionState,
    pub filesize: u64,
    pub bytes_received: u64,
    pub total_chunks: Option<u32>,
    pub received_chunks: u32,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST /api/upload/init — allocate an upload session.
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> ApiResult<Json<InitUploadResponse>> {
    let filename = sanitize_filename(&req.filename).ok_or_else(|| {
        ApiError::InvalidArgument(format!("unusable filename {:?}", req.filename))
    })?;

    let session = state.registry.create(filename, req.filesize).await?;

    Ok(Json(InitUploadResponse {
        success: true,
        upload_id: session.id.clone(),
        chunk_size: state.config.chunk_size,
    }))
}

/// POST /api/upload/chunk — receive one chunk (multipart form-data).
///
/// Fields: `upload_id`, `chunk_index`, `total_chunks`, and the payload as
/// `chunk`. The payload is size-capped while it streams in, before anything
/// touches the disk. The disk write itself runs outside the session lock;
/// counters are committed afterwards, re-validated against whatever happened
/// while the write was in flight.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkAck>> {
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<u32> = None;
    let mut total_chunks: Option<u32> = None;
    let mut payload: Option<Bytes> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidArgument(format!("bad multipart body: {e}")))?
    {
        match field.name() {
            Some("upload_id") => upload_id = Some(read_text_field(field).await?),
            Some("chunk_index") => {
                chunk_index = Some(parse_field(read_text_field(field).await?, "chunk_index")?)
            }
            Some("total_chunks") => {
                total_chunks = Some(parse_field(read_text_field(field).await?, "total_chunks")?)
            }
            Some("chunk") => {
                let limit = state.config.chunk_size;
                let mut buf = Vec::new();
                while let Some(piece) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::InvalidArgument(format!("bad chunk field: {e}")))?
                {
                    if (buf.len() + piece.len()) as u64 > limit {
                        return Err(ApiError::PayloadTooLarge {
                            got: (buf.len() + piece.len()) as u64,
                            limit,
                        });
                    }
                    buf.extend_from_slice(&piece);
                }
                payload = Some(buf.into());
            }
            _ => {}
        }
    }

    let upload_id =
        upload_id.ok_or_else(|| ApiError::InvalidArgument("missing upload_id field".into()))?;
    let index =
        chunk_index.ok_or_else(|| ApiError::InvalidArgument("missing chunk_index field".into()))?;
    let total = total_chunks
        .ok_or_else(|| ApiError::InvalidArgument("missing total_chunks field".into()))?;
    let payload =
        payload.ok_or_else(|| ApiError::InvalidArgument("missing chunk field".into()))?;

    let session = state.registry.lookup(&upload_id).await?;
    let payload_len = payload.len() as u64;

    // Precheck under the session lock, then write with no lock held. A
    // failed write leaves the session untouched; the client retries.
    session.begin_chunk(index, total, payload_len).await?;
    let part = state
        .store
        .stage_chunk(&session.id, index, &payload)
        .await
        .map_err(|e| {
            warn!("Chunk {} write failed for session {}: {}", index, session.id, e);
            ApiError::from(e)
        })?;

    // Commit re-validates what may have changed while the write ran and
    // renames the staged file into place inside the critical section.
    let promote = state.store.promote_chunk(&part, &session.id, index);
    match session.commit_chunk(index, payload_len, promote).await {
        Ok((uploaded, total_bytes)) => Ok(Json(ChunkAck {
            success: true,
            uploaded,
            total: total_bytes,
        })),
        Err(e) => {
            // Not counted: a racing commit filled the declared size, or the
            // session left Receiving while the disk write ran.
            state.store.discard_part(&part).await;
            Err(e)
        }
    }
}

/// POST /api/upload/complete — merge all chunks and publish the artifact.
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(req): Json<CompleteRequest>,
) -> ApiResult<Json<CompleteResponse>> {
    let session = state.registry.lookup(&req.upload_id).await?;
    let artifact = assemble::assemble(&session, &state.store).await?;

    Ok(Json(CompleteResponse {
        success: true,
        message: "upload complete".into(),
        filename: artifact.name,
        size: artifact.size,
    }))
}

/// GET /api/upload/status/{upload_id} — session progress snapshot.
pub async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let session = state.registry.lookup(&upload_id).await?;
    let p = session.progress().await;

    Ok(Json(UploadStatusResponse {
        success: true,
        upload_id: session.id.clone(),
        filename: session.filename.clone(),
        state: p.state,
        filesize: session.declared_size,
        bytes_received: p.bytes_received,
        total_chunks: p.total_chunks,
        received_chunks: p.received.len() as u32,
        created_at: session.created_at.to_rfc3339(),
    }))
}

/// GET /api/list — enumerate downloadable artifacts.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<ListResponse>> {
    let artifacts = state
        .store
        .list_artifacts()
        .await
        .map_err(|e| ApiError::Internal(format!("cannot read download directory: {e}")))?;

    let files = artifacts
        .into_iter()
        .map(|a| FileEntry {
            size_human: human_size(a.size),
            name: a.name,
            size: a.size,
            modified: a.modified.map(|t| t.to_rfc3339()),
        })
        .collect();

    Ok(Json(ListResponse {
        success: true,
        files,
    }))
}

/// GET /api/download/{name} — stream an artifact, honoring `Range`.
pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    if !is_plain_filename(&name) {
        return Err(ApiError::InvalidArgument(format!("unusable filename {name:?}")));
    }

    let path = state.store.artifact_path(&name);
    let len = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(ApiError::NotFound(format!("no artifact named {name}"))),
    };

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let (status, range) = match range_header {
        Some(value) => (StatusCode::PARTIAL_CONTENT, Some(resolve_range(value, len)?)),
        None => (StatusCode::OK, None),
    };

    let span = range.unwrap_or(ByteRange {
        start: 0,
        end: len.saturating_sub(1),
    });
    let content_length = if len == 0 { 0 } else { span.len() };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
    response_headers.insert(header::CONTENT_LENGTH, content_length.to_string().parse().unwrap());
    response_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    if let Ok(value) = format!("attachment; filename=\"{name}\"").parse() {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(r) = range {
        response_headers.insert(
            header::CONTENT_RANGE,
            r.content_range(len).parse().unwrap(),
        );
        info!("Serving {} bytes {}-{} of {}", name, r.start, r.end, len);
    }

    // Stream the requested span from disk in 64 KB reads.
    let stream = async_stream::stream! {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        if span.start > 0 {
            if let Err(e) = file.seek(std::io::SeekFrom::Start(span.start)).await {
                yield Err(e);
                return;
            }
        }

        let mut remaining = content_length;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let to_read = (remaining as usize).min(buf.len());
            match file.read(&mut buf[..to_read]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    Ok((status, response_headers, Body::from_stream(stream)))
}

/// DELETE /api/delete/{name} — remove an artifact.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    if !is_plain_filename(&name) {
        return Err(ApiError::InvalidArgument(format!("unusable filename {name:?}")));
    }

    let deleted = state
        .store
        .delete_artifact(&name)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !deleted {
        return Err(ApiError::NotFound(format!("no artifact named {name}")));
    }

    Ok(Json(MessageResponse {
        success: true,
        message: format!("{name} deleted"),
    }))
}

/// GET /api/health — liveness check.
pub async fn health() -> &'static str {
    "ok"
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidArgument(format!("bad multipart field: {e}")))
}

fn parse_field<T: std::str::FromStr>(value: String, name: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidArgument(format!("{name} is not a valid number: {value:?}")))
}
