//! Local persistence.
//!
//! One SQLite connection backs both the task history and the blob
//! metadata; large payloads live as zstd files next to it and the
//! archive writer lays out the per-session export folder. The
//! coordinator is the only writer; everything here just has to be
//! durable and awaitable.

pub mod archive;
pub mod blobs;
pub mod tasks;

pub use archive::{ArchiveWriter, TRACE_FILE, VIDEO_FILE};
pub use blobs::{BlobStats, BlobStore};
pub use tasks::{TaskRecord, TaskStatus, TaskStore};

use std::sync::Arc;

use rusqlite::Connection;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::capture::records::{EventPayload, EventRecord};
use crate::config::engine::EngineConfig;
use crate::utils::errors::{EngineError, Result};

/// Shared handle to the metadata connection.
pub(crate) type DbHandle = Arc<Mutex<Connection>>;

pub struct StorageGateway {
    pub tasks: TaskStore,
    pub blobs: BlobStore,
    pub archive: ArchiveWriter,
}

impl StorageGateway {
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.storage.root_dir)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("create storage root: {e}")))?;
        let blobs_dir = config.storage.root_dir.join("blobs");
        fs::create_dir_all(&blobs_dir)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("create blob directory: {e}")))?;

        let conn = Connection::open(config.database_path())
            .map_err(|e| EngineError::StorageFailed(format!("open database: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db: DbHandle = Arc::new(Mutex::new(conn));

        let tasks = TaskStore::attach(Arc::clone(&db)).await?;
        let blobs = BlobStore::attach(Arc::clone(&db), blobs_dir).await?;
        let archive = ArchiveWriter::new(config.archive_root());

        info!(root = %config.storage.root_dir.display(), "storage gateway ready");
        Ok(Self {
            tasks,
            blobs,
            archive,
        })
    }

    /// Re-inlines offloaded HTML into capture records before export.
    /// A missing blob is logged and leaves the record unchanged.
    pub async fn reconstruct(&self, events: &mut [EventRecord]) -> Result<()> {
        for event in events.iter_mut() {
            let EventPayload::HtmlCapture(capture) = &mut event.payload else {
                continue;
            };
            if capture.html.is_some() {
                continue;
            }
            let Some(key) = capture.document_key.clone() else {
                continue;
            };
            match self.blobs.get(&key).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(html) => capture.html = Some(html),
                    Err(e) => warn!(key, error = %e, "stored html is not utf-8"),
                },
                Err(EngineError::BlobNotFound(_)) => {
                    warn!(key, "html blob missing during reconstruction");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Removes a task and everything stored under it.
    pub async fn purge_task(&self, task_id: &str) -> Result<()> {
        self.blobs.delete_task_blobs(task_id).await?;
        self.tasks.delete_task(task_id).await
    }
}
