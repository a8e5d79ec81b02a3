//! Task history and transient session state.
//!
//! Each recording task gets one row whose event list is stored as a
//! JSON column; events are appended in batches while the task runs so
//! a crash mid-session loses at most the batch in flight. A key/value
//! table carries the transient recording keys the coordinator consults
//! on startup to detect and clear a torn session.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::records::EventRecord;
use crate::storage::DbHandle;
use crate::utils::errors::{EngineError, Result};

pub const KEY_IS_RECORDING: &str = "isRecording";
pub const KEY_CURRENT_TASK: &str = "currentTaskId";
pub const KEY_RECORDING_TAB: &str = "recordingTabId";
pub const KEY_RECORDING_START: &str = "recordingStartTime";
pub const KEY_VIDEO_STARTED_AT: &str = "videoStartedAtMs";
pub const KEY_LAST_COMPLETED_TASK: &str = "lastCompletedTaskId";
pub const KEY_LAST_INGEST_FOLDER: &str = "lastIngestResponse.folderIso";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Recording,
    Completed,
    Cancelled,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Recording => "recording",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => TaskStatus::Completed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Recording,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub title: String,
    pub started_at_ms: u64,
    pub stopped_at_ms: Option<u64>,
    pub start_url: String,
    pub end_url: Option<String>,
    pub status: TaskStatus,
    pub event_count: u64,
    pub video_local_path: Option<String>,
    pub video_server_path: Option<String>,
    pub pushed: bool,
    pub pushed_at_ms: Option<u64>,
}

pub struct TaskStore {
    db: DbHandle,
}

impl TaskStore {
    pub(crate) async fn attach(db: DbHandle) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    task_id TEXT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT '',
                    started_at_ms INTEGER NOT NULL,
                    stopped_at_ms INTEGER,
                    start_url TEXT NOT NULL DEFAULT '',
                    end_url TEXT,
                    status TEXT NOT NULL,
                    event_count INTEGER NOT NULL DEFAULT 0,
                    events TEXT NOT NULL DEFAULT '[]',
                    video_local_path TEXT,
                    video_server_path TEXT,
                    pushed INTEGER NOT NULL DEFAULT 0,
                    pushed_at_ms INTEGER
                )
                "#,
                [],
            )
            .map_err(|e| EngineError::StorageFailed(format!("task schema: {e}")))?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS session_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#,
                [],
            )
            .map_err(|e| EngineError::StorageFailed(format!("state schema: {e}")))?;
        }
        Ok(Self { db })
    }

    pub async fn create_task(
        &self,
        task_id: &str,
        title: &str,
        started_at_ms: u64,
        start_url: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tasks (task_id, title, started_at_ms, start_url, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_id,
                title,
                started_at_ms as i64,
                start_url,
                TaskStatus::Recording.as_str()
            ],
        )
        .map_err(|e| EngineError::StorageFailed(format!("create task {task_id}: {e}")))?;
        debug!(task_id, started_at_ms, "task created");
        Ok(())
    }

    /// Appends a batch to the task's stored event list. Returns the
    /// new total.
    pub async fn append_events(&self, task_id: &str, batch: &[EventRecord]) -> Result<u64> {
        if batch.is_empty() {
            return self.get_task(task_id).await.map(|t| t.event_count);
        }
        let db = self.db.lock().await;
        let stored: Option<String> = db
            .query_row(
                "SELECT events FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        };
        let mut events: Vec<EventRecord> = serde_json::from_str(&stored)?;
        events.extend_from_slice(batch);
        let count = events.len() as u64;
        db.execute(
            "UPDATE tasks SET events = ?1, event_count = ?2 WHERE task_id = ?3",
            params![serde_json::to_string(&events)?, count as i64, task_id],
        )
        .map_err(|e| EngineError::StorageFailed(format!("append events: {e}")))?;
        debug!(task_id, appended = batch.len(), total = count, "events appended");
        Ok(count)
    }

    /// Replaces the task's event list wholesale, used when finalization
    /// rewrites records with video alignment.
    pub async fn replace_events(&self, task_id: &str, events: &[EventRecord]) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET events = ?1, event_count = ?2 WHERE task_id = ?3",
                params![
                    serde_json::to_string(events)?,
                    events.len() as i64,
                    task_id
                ],
            )
            .map_err(|e| EngineError::StorageFailed(format!("replace events: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub async fn task_events(&self, task_id: &str) -> Result<Vec<EventRecord>> {
        let db = self.db.lock().await;
        let stored: Option<String> = db
            .query_row(
                "SELECT events FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        };
        Ok(serde_json::from_str(&stored)?)
    }

    pub async fn complete_task(
        &self,
        task_id: &str,
        stopped_at_ms: u64,
        end_url: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET stopped_at_ms = ?1, end_url = ?2, status = ?3
                 WHERE task_id = ?4",
                params![
                    stopped_at_ms as i64,
                    end_url,
                    TaskStatus::Completed.as_str(),
                    task_id
                ],
            )
            .map_err(|e| EngineError::StorageFailed(format!("complete task: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id, "task completed");
        Ok(())
    }

    pub async fn cancel_task(&self, task_id: &str, stopped_at_ms: u64) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET stopped_at_ms = ?1, status = ?2 WHERE task_id = ?3",
                params![stopped_at_ms as i64, TaskStatus::Cancelled.as_str(), task_id],
            )
            .map_err(|e| EngineError::StorageFailed(format!("cancel task: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id, "task cancelled");
        Ok(())
    }

    /// Records where the finalized video landed, locally and remotely.
    pub async fn set_video_paths(
        &self,
        task_id: &str,
        local: Option<&str>,
        server: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET
                     video_local_path = COALESCE(?1, video_local_path),
                     video_server_path = COALESCE(?2, video_server_path)
                 WHERE task_id = ?3",
                params![local, server, task_id],
            )
            .map_err(|e| EngineError::StorageFailed(format!("set video paths: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_pushed(&self, task_id: &str, pushed_at_ms: u64) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                "UPDATE tasks SET pushed = 1, pushed_at_ms = ?1 WHERE task_id = ?2",
                params![pushed_at_ms as i64, task_id],
            )
            .map_err(|e| EngineError::StorageFailed(format!("mark pushed: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id, "task marked pushed");
        Ok(())
    }

    /// Removes the task row. Blob cleanup is the caller's job.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])
            .map_err(|e| EngineError::StorageFailed(format!("delete task: {e}")))?;
        if changed == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        debug!(task_id, "task deleted");
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("{TASK_COLUMNS} WHERE task_id = ?1"),
            params![task_id],
            row_to_task,
        )
        .optional()?
        .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("{TASK_COLUMNS} ORDER BY started_at_ms"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ---- transient session keys ----

    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO session_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| EngineError::StorageFailed(format!("set state {key}: {e}")))?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn clear_state(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM session_state WHERE key = ?1", params![key])
            .map_err(|e| EngineError::StorageFailed(format!("clear state {key}: {e}")))?;
        Ok(())
    }
}

const TASK_COLUMNS: &str = "SELECT task_id, title, started_at_ms, stopped_at_ms, start_url, \
     end_url, status, event_count, video_local_path, video_server_path, pushed, pushed_at_ms \
     FROM tasks";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(6)?;
    Ok(TaskRecord {
        task_id: row.get(0)?,
        title: row.get(1)?,
        started_at_ms: row.get::<_, i64>(2)? as u64,
        stopped_at_ms: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        start_url: row.get(4)?,
        end_url: row.get(5)?,
        status: TaskStatus::parse(&status),
        event_count: row.get::<_, i64>(7)? as u64,
        video_local_path: row.get(8)?,
        video_server_path: row.get(9)?,
        pushed: row.get::<_, i64>(10)? != 0,
        pushed_at_ms: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
    })
}
