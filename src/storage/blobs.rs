//! Keyed blob store.
//!
//! HTML documents and video bytes leave the event stream as early as
//! possible; records keep only the key. Payloads are zstd-compressed
//! files on disk with metadata rows in the shared database. Document
//! keys follow `task_<taskId>_doc_<N>` with `N` assigned per task in
//! capture order.

use std::path::PathBuf;

use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};
use tokio::fs;
use tracing::debug;

use crate::storage::DbHandle;
use crate::utils::errors::{EngineError, Result};

const ZSTD_LEVEL: i32 = 3;

pub struct BlobStore {
    db: DbHandle,
    dir: PathBuf,
    doc_counters: DashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStats {
    pub count: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
}

impl BlobStore {
    pub(crate) async fn attach(db: DbHandle, dir: PathBuf) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS blobs (
                    key TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    raw_size INTEGER NOT NULL,
                    compressed_size INTEGER NOT NULL,
                    created_at_ms INTEGER NOT NULL
                )
                "#,
                [],
            )
            .map_err(|e| EngineError::StorageFailed(format!("blob schema: {e}")))?;
        }
        Ok(Self {
            db,
            dir,
            doc_counters: DashMap::new(),
        })
    }

    /// Allocates the next `task_<taskId>_doc_<N>` key for a task.
    pub async fn next_document_key(&self, task_id: &str) -> Result<String> {
        let seed = match self.doc_counters.get(task_id) {
            Some(n) => *n,
            None => {
                let db = self.db.lock().await;
                let pattern = format!("task_{task_id}_doc_%");
                let count: i64 = db.query_row(
                    "SELECT COUNT(*) FROM blobs WHERE key LIKE ?1",
                    params![pattern],
                    |row| row.get(0),
                )?;
                count as u64
            }
        };
        self.doc_counters.insert(task_id.to_string(), seed + 1);
        Ok(format!("task_{task_id}_doc_{seed}"))
    }

    /// Compresses and stores `bytes` under `key`, replacing any
    /// previous value.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let compressed = zstd::encode_all(bytes, ZSTD_LEVEL)
            .map_err(|e| EngineError::CompressionFailed(format!("compress {key}: {e}")))?;
        let file_path = self.dir.join(format!("{key}.zst"));
        fs::write(&file_path, &compressed)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("write blob {key}: {e}")))?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO blobs
             (key, file_path, raw_size, compressed_size, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                file_path.to_string_lossy(),
                bytes.len() as i64,
                compressed.len() as i64,
                chrono::Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| EngineError::StorageFailed(format!("record blob {key}: {e}")))?;
        debug!(key, raw = bytes.len(), compressed = compressed.len(), "blob stored");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let file_path: Option<String> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT file_path FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(file_path) = file_path else {
            return Err(EngineError::BlobNotFound(key.to_string()));
        };
        let compressed = fs::read(&file_path)
            .await
            .map_err(|e| EngineError::StorageFailed(format!("read blob {key}: {e}")))?;
        zstd::decode_all(compressed.as_slice())
            .map_err(|e| EngineError::CompressionFailed(format!("decompress {key}: {e}")))
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let found: Option<i64> = db
            .query_row("SELECT 1 FROM blobs WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let file_path: Option<String> = {
            let db = self.db.lock().await;
            let path = db
                .query_row(
                    "SELECT file_path FROM blobs WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            db.execute("DELETE FROM blobs WHERE key = ?1", params![key])?;
            path
        };
        if let Some(path) = file_path {
            // Metadata row is already gone; a missing file is fine.
            let _ = fs::remove_file(path).await;
        }
        Ok(())
    }

    /// Deletes every blob stored under a task's key prefix. Returns
    /// how many were removed.
    pub async fn delete_task_blobs(&self, task_id: &str) -> Result<u64> {
        let files: Vec<String> = {
            let db = self.db.lock().await;
            let pattern = format!("task_{task_id}_%");
            let mut stmt = db.prepare("SELECT file_path FROM blobs WHERE key LIKE ?1")?;
            let files = stmt
                .query_map(params![pattern], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            db.execute("DELETE FROM blobs WHERE key LIKE ?1", params![pattern])?;
            files
        };
        let removed = files.len() as u64;
        // Metadata rows are already gone; missing files are fine.
        let _ = futures::future::join_all(files.into_iter().map(fs::remove_file)).await;
        self.doc_counters.remove(task_id);
        debug!(task_id, removed, "task blobs purged");
        Ok(removed)
    }

    /// Keys stored for one task, capture order preserved.
    pub async fn task_keys(&self, task_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let pattern = format!("task_{task_id}_%");
        let mut stmt = db.prepare(
            "SELECT key FROM blobs WHERE key LIKE ?1 ORDER BY created_at_ms, key",
        )?;
        let keys = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub async fn stats(&self) -> Result<BlobStats> {
        let db = self.db.lock().await;
        let (count, raw, compressed): (i64, i64, i64) = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(raw_size), 0), COALESCE(SUM(compressed_size), 0)
             FROM blobs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(BlobStats {
            count: count as u64,
            raw_bytes: raw as u64,
            compressed_bytes: compressed as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn store(dir: &std::path::Path) -> BlobStore {
        let conn = Connection::open_in_memory().unwrap();
        BlobStore::attach(Arc::new(Mutex::new(conn)), dir.to_path_buf())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_round_trip_compresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let html = "<html><body>".to_string() + &"<div>row</div>".repeat(500) + "</body></html>";

        store.put("task_t1_doc_0", html.as_bytes()).await.unwrap();
        let back = store.get("task_t1_doc_0").await.unwrap();
        assert_eq!(back, html.as_bytes());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.compressed_bytes < stats.raw_bytes);
    }

    #[tokio::test]
    async fn test_document_keys_count_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert_eq!(store.next_document_key("t1").await.unwrap(), "task_t1_doc_0");
        assert_eq!(store.next_document_key("t1").await.unwrap(), "task_t1_doc_1");
        assert_eq!(store.next_document_key("t2").await.unwrap(), "task_t2_doc_0");
    }

    #[tokio::test]
    async fn test_counter_reseeds_from_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store.put("task_t1_doc_0", b"a").await.unwrap();
        store.put("task_t1_doc_1", b"b").await.unwrap();
        // Fresh counter map, existing rows: allocation continues at 2.
        assert_eq!(store.next_document_key("t1").await.unwrap(), "task_t1_doc_2");
    }

    #[tokio::test]
    async fn test_missing_key_is_blob_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert!(matches!(
            store.get("task_x_doc_9").await,
            Err(EngineError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store.put("task_t1_doc_0", b"bytes").await.unwrap();
        store.delete("task_t1_doc_0").await.unwrap();
        assert!(!store.contains("task_t1_doc_0").await.unwrap());
        assert!(!dir.path().join("task_t1_doc_0.zst").exists());
    }

    #[tokio::test]
    async fn test_task_keys_lists_in_capture_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for i in 0..3 {
            let key = store.next_document_key("t1").await.unwrap();
            store.put(&key, format!("doc {i}").as_bytes()).await.unwrap();
        }
        let keys = store.task_keys("t1").await.unwrap();
        assert_eq!(
            keys,
            vec!["task_t1_doc_0", "task_t1_doc_1", "task_t1_doc_2"]
        );
    }

    #[tokio::test]
    async fn test_delete_task_blobs_spares_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for _ in 0..2 {
            let key = store.next_document_key("t1").await.unwrap();
            store.put(&key, b"one").await.unwrap();
        }
        let other = store.next_document_key("t2").await.unwrap();
        store.put(&other, b"two").await.unwrap();

        assert_eq!(store.delete_task_blobs("t1").await.unwrap(), 2);
        assert!(store.task_keys("t1").await.unwrap().is_empty());
        assert!(store.contains("task_t2_doc_0").await.unwrap());
        // Counter restarts cleanly for a future task with the same id.
        assert_eq!(store.next_document_key("t1").await.unwrap(), "task_t1_doc_0");
    }
}
