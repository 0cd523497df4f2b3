use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Manages on-disk storage: staged chunks and completed artifacts.
///
/// Staged chunks live under `{staging_dir}/{session_id}/chunk_{index}`, one
/// directory per session so concurrent sessions can never collide on paths.
/// Completed artifacts live flat in `{download_dir}`, named by their final
/// filename.
pub struct ChunkStore {
    staging_dir: PathBuf,
    download_dir: PathBuf,
}

impl ChunkStore {
    pub async fn new(staging_dir: PathBuf, download_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&staging_dir).await?;
        fs::create_dir_all(&download_dir).await?;
        info!("Staging directory: {}", staging_dir.display());
        info!("Download directory: {}", download_dir.display());
        Ok(Self {
            staging_dir,
            download_dir,
        })
    }

    /// Directory holding one session's staged chunks.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.staging_dir.join(session_id)
    }

    /// Path of one staged chunk.
    pub fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("chunk_{index}"))
    }

    /// Path of a completed artifact.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.download_dir.join(name)
    }

    /// Write one chunk payload to a uniquely named `.part` file. This is the
    /// slow half of chunk reception and runs with no lock held; the payload
    /// only becomes the chunk once `promote_chunk` renames it into place.
    pub async fn stage_chunk(
        &self,
        session_id: &str,
        index: u32,
        payload: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;

        let part_path = dir.join(format!("chunk_{index}.{}.part", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&part_path).await?;
        file.write_all(payload).await?;
        file.flush().await?;

        Ok(part_path)
    }

    /// Atomically move a staged `.part` file into place as its chunk. A
    /// retried index replaces its previous write wholesale; a torn write is
    /// never observable under the final name.
    pub async fn promote_chunk(
        &self,
        part_path: &Path,
        session_id: &str,
        index: u32,
    ) -> std::io::Result<()> {
        fs::rename(part_path, self.chunk_path(session_id, index)).await
    }

    /// Best-effort removal of a staged `.part` file that will not be promoted.
    pub async fn discard_part(&self, part_path: &Path) {
        if let Err(e) = fs::remove_file(part_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to discard {}: {}", part_path.display(), e);
            }
        }
    }

    /// Delete a session's entire staging directory.
    pub async fn remove_session_dir(&self, session_id: &str) {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => info!("Removed staging for session {}", session_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging for {}: {}", session_id, e),
        }
    }

    /// Delete an artifact. Returns false if no such artifact exists.
    pub async fn delete_artifact(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.artifact_path(name)).await {
            Ok(()) => {
                info!("Deleted artifact {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate completed artifacts (regular files only).
    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactEntry>> {
        let mut entries = fs::read_dir(&self.download_dir).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // In-flight assembly output is dot-prefixed; never list it.
            if name.starts_with('.') {
                continue;
            }
            out.push(ArtifactEntry {
                name,
                size: meta.len(),
                modified: meta.modified().ok().map(chrono::DateTime::from),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// One listed artifact.
pub struct ArtifactEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Format a byte count the way the UI expects it, e.g. `3.50 MB`.
pub fn human_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// True if `name` is safe to use as a flat artifact filename. Dot-prefixed
/// names are rejected so clients can never address in-flight `.part` output.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
}

/// Reduce a client-supplied filename to its final path component.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if is_plain_filename(name) {
        Some(name.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0.00 B");
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(1024), "1.00 KB");
        assert_eq!(human_size(3 * 1024 * 1024 + 512 * 1024), "3.50 MB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), Some("report.pdf".into()));
        assert_eq!(
            sanitize_filename("/etc/passwd"),
            Some("passwd".into()),
            "path components are stripped"
        );
        assert_eq!(sanitize_filename("dir/file.bin"), Some("file.bin".into()));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(".hidden"), None);
        assert_eq!(sanitize_filename("/"), None);
    }

    #[test]
    fn test_is_plain_filename() {
        assert!(is_plain_filename("movie.mkv"));
        assert!(!is_plain_filename("../movie.mkv"));
        assert!(!is_plain_filename("a/b"));
        assert!(!is_plain_filename(""));
    }
}
