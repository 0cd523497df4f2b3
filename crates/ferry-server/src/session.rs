//! Upload session state machine and the in-memory session registry.
//!
//! Locking is two-tier: the registry's `RwLock` guards only the id→session
//! map (lookup/insert/remove), while each session carries its own `Mutex`
//! over its mutable progress. Payload writes never happen under either lock:
//! a chunk prechecks under the session lock, writes to a staging file
//! unlocked, then re-locks to commit — re-validating what may have changed
//! in between, with only the rename-into-place inside the critical section.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Lifecycle of an upload session. Sessions are created directly in
/// `Receiving`; `Complete`, `Failed`, and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Receiving,
    Assembling,
    Complete,
    Failed,
    Expired,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Expired)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Receiving => "receiving",
            Self::Assembling => "assembling",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Mutable per-session progress, guarded by the session's own lock.
#[derive(Debug)]
pub struct SessionProgress {
    pub state: SessionState,
    /// Declared chunk count; established by the first chunk request.
    pub total_chunks: Option<u32>,
    /// Index → persisted byte length of that index's latest write. Keyed per
    /// index so a retried chunk replaces its earlier contribution instead of
    /// double-counting.
    pub received: HashMap<u32, u64>,
    pub bytes_received: u64,
    pub last_activity: Instant,
}

impl SessionProgress {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// One in-progress chunked upload.
#[derive(Debug)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub declared_size: u64,
    pub created_at: DateTime<Utc>,
    progress: Mutex<SessionProgress>,
}

impl UploadSession {
    fn new(id: String, filename: String, declared_size: u64) -> Self {
        Self {
            id,
            filename,
            declared_size,
            created_at: Utc::now(),
            progress: Mutex::new(SessionProgress {
                state: SessionState::Receiving,
                total_chunks: None,
                received: HashMap::new(),
                bytes_received: 0,
                last_activity: Instant::now(),
            }),
        }
    }

    pub async fn progress(&self) -> MutexGuard<'_, SessionProgress> {
        self.progress.lock().await
    }

    /// Precheck for an incoming chunk, under the session lock. Validates the
    /// session state, establishes or checks `total_chunks`, bounds the index,
    /// and verifies the payload still fits within the declared size.
    pub async fn begin_chunk(
        &self,
        index: u32,
        total_chunks: u32,
        payload_len: u64,
    ) -> ApiResult<()> {
        let mut p = self.progress.lock().await;

        if p.state != SessionState::Receiving {
            return Err(ApiError::Conflict(format!(
                "session {} is {}, not accepting chunks",
                self.id, p.state
            )));
        }

        if total_chunks == 0 {
            return Err(ApiError::InvalidArgument(
                "total_chunks must be at least 1".into(),
            ));
        }
        match p.total_chunks {
            None => p.total_chunks = Some(total_chunks),
            Some(t) if t != total_chunks => {
                return Err(ApiError::InvalidArgument(format!(
                    "total_chunks {} does not match the session's declared {}",
                    total_chunks, t
                )));
            }
            Some(_) => {}
        }

        let total = p.total_chunks.unwrap_or(0);
        if index >= total {
            return Err(ApiError::InvalidArgument(format!(
                "chunk_index {} out of range 0..{}",
                index, total
            )));
        }

        self.check_fit(&p, index, payload_len)?;
        Ok(())
    }

    /// Record a staged chunk, under the session lock. The session may have
    /// changed while the disk write ran, so the state and the size invariant
    /// are verified again; `promote` (an atomic rename moving the staged file
    /// into place) runs inside the critical section, so a chunk file can
    /// never appear or change once assembly has locked the session out of
    /// `Receiving`. On error the caller must discard the staged file.
    pub async fn commit_chunk(
        &self,
        index: u32,
        payload_len: u64,
        promote: impl Future<Output = std::io::Result<()>>,
    ) -> ApiResult<(u64, u64)> {
        let mut p = self.progress.lock().await;

        if p.state != SessionState::Receiving {
            return Err(ApiError::Conflict(format!(
                "session {} became {} during the chunk write",
                self.id, p.state
            )));
        }
        self.check_fit(&p, index, payload_len)?;

        promote.await?;

        let previous = p.received.insert(index, payload_len).unwrap_or(0);
        p.bytes_received = p.bytes_received - previous + payload_len;
        p.touch();
        Ok((p.bytes_received, self.declared_size))
    }

    /// `bytes_received` must never exceed `declared_size`. A duplicate index
    /// only counts its latest length, so its previous contribution is
    /// subtracted before checking.
    fn check_fit(&self, p: &SessionProgress, index: u32, payload_len: u64) -> ApiResult<()> {
        let previous = p.received.get(&index).copied().unwrap_or(0);
        let prospective = p.bytes_received - previous + payload_len;
        if prospective > self.declared_size {
            return Err(ApiError::InvalidArgument(format!(
                "chunk would grow the upload to {} bytes, past the declared {}",
                prospective, self.declared_size
            )));
        }
        Ok(())
    }

    /// Transition `Receiving` → `Assembling`, locking out further chunk
    /// writes. Fails `Incomplete` with the exact missing indices if not every
    /// chunk has arrived; a second caller observes `Conflict`.
    pub async fn begin_assembly(&self) -> ApiResult<u32> {
        let mut p = self.progress.lock().await;

        match p.state {
            SessionState::Receiving => {}
            SessionState::Assembling => {
                return Err(ApiError::Conflict(format!(
                    "session {} is already being assembled",
                    self.id
                )));
            }
            state => {
                return Err(ApiError::Conflict(format!(
                    "session {} is {}",
                    self.id, state
                )));
            }
        }

        let Some(total) = p.total_chunks else {
            return Err(ApiError::Incomplete { missing: vec![] });
        };
        let missing: Vec<u32> = (0..total).filter(|i| !p.received.contains_key(i)).collect();
        if !missing.is_empty() {
            return Err(ApiError::Incomplete { missing });
        }

        p.state = SessionState::Assembling;
        p.touch();
        Ok(total)
    }

    /// Terminal transition out of `Assembling`.
    pub async fn finish_assembly(&self, state: SessionState) {
        debug_assert!(state.is_terminal());
        let mut p = self.progress.lock().await;
        p.state = state;
        p.touch();
    }

    /// Time since the last successful activity on this session.
    pub async fn idle_for(&self) -> Duration {
        self.progress.lock().await.last_activity.elapsed()
    }
}

/// In-memory table of live upload sessions.
///
/// Insert, lookup, and removal are all O(1) map operations under a
/// read-mostly lock; lookups by concurrent workers never block each other.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Allocate a new session. The id is a wall-clock timestamp plus a random
    /// suffix, unique across restarts and concurrent callers.
    pub async fn create(&self, filename: String, declared_size: u64) -> ApiResult<Arc<UploadSession>> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(ApiError::ResourceExhausted);
        }

        let mut id = new_session_id();
        while sessions.contains_key(&id) {
            id = new_session_id();
        }

        let session = Arc::new(UploadSession::new(id.clone(), filename, declared_size));
        sessions.insert(id, session.clone());
        info!(
            "Session {} created: {} ({} bytes declared)",
            session.id, session.filename, session.declared_size
        );
        Ok(session)
    }

    pub async fn lookup(&self, id: &str) -> ApiResult<Arc<UploadSession>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown upload session {id}")))
    }

    /// Drop a session from the table. Idempotent.
    pub async fn remove(&self, id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.write().await.remove(id)
    }

    /// Snapshot of all live sessions, for the reaper's sweep.
    pub async fn snapshot(&self) -> Vec<Arc<UploadSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn new_session_id() -> String {
    format!("{}_{}", Utc::now().timestamp(), Uuid::new_v4().simple())
}
