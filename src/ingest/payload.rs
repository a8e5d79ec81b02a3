//! Wire types for the ingest service.
//!
//! The events endpoint takes one JSON document per completed task; the video
//! endpoint takes a multipart form keyed by the folder identifier the events
//! call returned. Field casing is fixed by the server and must not drift.

use serde::{Deserialize, Serialize};

use crate::capture::EventRecord;

/// Body of `POST /api/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Task identifier the records were captured under.
    pub task: String,
    /// Wall-clock capture duration in milliseconds.
    pub duration: u64,
    pub events_recorded: u64,
    pub start_url: String,
    pub end_url: String,
    /// The emitted records, in sequence order.
    pub data: Vec<EventRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_server_path: Option<String>,
}

impl SessionPayload {
    /// Capture duration in whole seconds, rounded up so sub-second tasks do
    /// not report zero.
    pub fn duration_seconds(&self) -> u64 {
        self.duration.div_ceil(1_000)
    }
}

/// Response from `POST /api/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub success: bool,
    /// Server-side folder the task was filed under, ISO-timestamp shaped.
    pub folder_iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Response from `POST /api/events/video`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAck {
    /// Server-side path of the stored video file.
    pub path: String,
}
