//! Per-session archive folders.
//!
//! Layout: `<root>/<isoStart>/` where `isoStart` is the session start
//! time as a filesystem-safe ISO-8601 stamp. Each folder holds the
//! finalized `video.webm` and a `trace.json` mirroring the upload
//! payload, so a session survives on disk even when ingest is down.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::utils::errors::{EngineError, Result};
use crate::utils::time::iso_folder_name;

pub const VIDEO_FILE: &str = "video.webm";
pub const TRACE_FILE: &str = "trace.json";

pub struct ArchiveWriter {
    root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder for a session that started at `started_at_ms`.
    pub fn session_dir(&self, started_at_ms: u64) -> PathBuf {
        self.root.join(iso_folder_name(started_at_ms))
    }

    pub async fn write_video(&self, started_at_ms: u64, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.session_dir(started_at_ms);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("create archive dir: {e}")))?;
        let path = dir.join(VIDEO_FILE);
        fs::write(&path, bytes)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("write video: {e}")))?;
        info!(path = %path.display(), bytes = bytes.len(), "video archived");
        Ok(path)
    }

    pub async fn write_trace<T: Serialize>(
        &self,
        started_at_ms: u64,
        trace: &T,
    ) -> Result<PathBuf> {
        let dir = self.session_dir(started_at_ms);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("create archive dir: {e}")))?;
        let path = dir.join(TRACE_FILE);
        let json = serde_json::to_vec_pretty(trace)?;
        fs::write(&path, &json)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("write trace: {e}")))?;
        info!(path = %path.display(), bytes = json.len(), "trace archived");
        Ok(path)
    }
}
