//! Chunk merge: turns a fully-received session into a published artifact.

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::session::{SessionState, UploadSession};
use crate::storage::ChunkStore;

/// A published artifact.
pub struct AssembledArtifact {
    pub name: String,
    pub size: u64,
}

/// Merge a session's staged chunks, in index order, into its final artifact.
///
/// The session moves `Receiving` → `Assembling` up front, so no further chunk
/// writes and no second `complete` can interleave with the merge. Output goes
/// to a dot-prefixed `.part` file and is renamed into the download directory
/// only after the byte count matches the declared size, so a partially merged
/// artifact is never visible.
///
/// A size mismatch or merge I/O failure is terminal (`Failed`); staged chunks
/// are kept for diagnosis until the reaper expires the session.
pub async fn assemble(session: &UploadSession, store: &ChunkStore) -> ApiResult<AssembledArtifact> {
    let total = session.begin_assembly().await?;

    // No lock is held past this point; the Assembling state is the guard.
    let part_path = store.artifact_path(&format!(".{}.{}.part", session.filename, session.id));

    let result = merge_chunks(session, store, total, &part_path).await;

    match result {
        Ok(written) if written == session.declared_size => {
            let final_path = store.artifact_path(&session.filename);
            if let Err(e) = fs::rename(&part_path, &final_path).await {
                warn!("Publish failed for session {}: {}", session.id, e);
                let _ = fs::remove_file(&part_path).await;
                session.finish_assembly(SessionState::Failed).await;
                return Err(e.into());
            }
            store.remove_session_dir(&session.id).await;
            session.finish_assembly(SessionState::Complete).await;
            info!(
                "Session {} assembled into {} ({} bytes, {} chunks)",
                session.id, session.filename, written, total
            );
            Ok(AssembledArtifact {
                name: session.filename.clone(),
                size: written,
            })
        }
        Ok(written) => {
            let _ = fs::remove_file(&part_path).await;
            session.finish_assembly(SessionState::Failed).await;
            warn!(
                "Session {} size mismatch: declared {}, assembled {}",
                session.id, session.declared_size, written
            );
            Err(ApiError::SizeMismatch {
                declared: session.declared_size,
                actual: written,
            })
        }
        Err(e) => {
            let _ = fs::remove_file(&part_path).await;
            session.finish_assembly(SessionState::Failed).await;
            warn!("Session {} merge failed: {}", session.id, e);
            Err(e.into())
        }
    }
}

/// Concatenate chunks 0..total into `part_path`, returning the byte count.
async fn merge_chunks(
    session: &UploadSession,
    store: &ChunkStore,
    total: u32,
    part_path: &std::path::Path,
) -> std::io::Result<u64> {
    let mut out = fs::File::create(part_path).await?;
    let mut written: u64 = 0;

    for index in 0..total {
        let mut chunk = fs::File::open(store.chunk_path(&session.id, index)).await?;
        written += tokio::io::copy(&mut chunk, &mut out).await?;
    }

    out.flush().await?;
    Ok(written)
}
