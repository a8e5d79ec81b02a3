//! Router message set for the background coordinator.
//!
//! One enum covers everything the coordinator loop accepts on its
//! command channel: popup start/stop, offscreen video lifecycle,
//! capture records, ingest acknowledgements, reconstruction requests,
//! and task housekeeping. [`RouterMessage::wire_name`] reports the
//! protocol constant a message corresponds to, which is what the
//! router logs while dispatching.

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::capture::records::EventRecord;
use crate::storage::tasks::TaskRecord;
use crate::utils::errors::Result;

use super::controller::StopOutcome;

#[derive(Debug)]
pub enum RouterMessage {
    /// `POPUP_START_VIDEO`: begin a session on a registered tab.
    StartRecording {
        tab_id: String,
        title: String,
        reply: oneshot::Sender<Result<String>>,
    },
    /// `POPUP_STOP_VIDEO`: stop the active session and finalize it.
    StopRecording {
        reply: oneshot::Sender<Result<StopOutcome>>,
    },
    /// Re-arm capture after a navigation landed on a registered tab.
    ResumeRecording {
        tab_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// `OFFSCREEN_STARTED`: the screen recorder reported its epoch.
    VideoStarted { started_at_ms: u64 },
    /// `OFFSCREEN_STOPPED`.
    VideoStopped,
    /// `OFFSCREEN_BLOB_READY`: finished WebM bytes.
    VideoBlobReady { bytes: Bytes },
    /// `INGEST_DONE`: the server acknowledged a session folder.
    IngestDone { folder_iso: String },
    /// `recordedEvent`: a finalized capture record from an external
    /// producer. Records from registered tabs flow in directly.
    RecordedEvent { event: EventRecord },
    /// `htmlCapture`: same, for snapshot records.
    HtmlCapture { event: EventRecord },
    /// `RECONSTRUCT_HTML_EVENTS`: re-inline offloaded snapshot HTML.
    ReconstructHtml {
        events: Vec<EventRecord>,
        reply: oneshot::Sender<Result<Vec<EventRecord>>>,
    },
    /// Attach a recorder's event stream to the router.
    RegisterTab {
        tab_id: String,
        events: mpsc::UnboundedReceiver<EventRecord>,
    },
    /// Detach a tab and shut its recorder down.
    UnregisterTab { tab_id: String },
    GetTask {
        task_id: String,
        reply: oneshot::Sender<Result<TaskRecord>>,
    },
    ListTasks {
        reply: oneshot::Sender<Result<Vec<TaskRecord>>>,
    },
    /// Build the trace document for a stored task.
    ExportTrace {
        task_id: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Remove a task row and every blob filed under it.
    DeleteTask {
        task_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Retry the upload of a stored task.
    PushTask {
        task_id: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Shutdown,
}

impl RouterMessage {
    /// Protocol constant for dispatch logging.
    pub fn wire_name(&self) -> &'static str {
        match self {
            RouterMessage::StartRecording { .. } => "POPUP_START_VIDEO",
            RouterMessage::StopRecording { .. } => "POPUP_STOP_VIDEO",
            RouterMessage::ResumeRecording { .. } => "resumeRecording",
            RouterMessage::VideoStarted { .. } => "OFFSCREEN_STARTED",
            RouterMessage::VideoStopped => "OFFSCREEN_STOPPED",
            RouterMessage::VideoBlobReady { .. } => "OFFSCREEN_BLOB_READY",
            RouterMessage::IngestDone { .. } => "INGEST_DONE",
            RouterMessage::RecordedEvent { .. } => "recordedEvent",
            RouterMessage::HtmlCapture { .. } => "htmlCapture",
            RouterMessage::ReconstructHtml { .. } => "RECONSTRUCT_HTML_EVENTS",
            RouterMessage::RegisterTab { .. } => "registerTab",
            RouterMessage::UnregisterTab { .. } => "unregisterTab",
            RouterMessage::GetTask { .. } => "getTask",
            RouterMessage::ListTasks { .. } => "listTasks",
            RouterMessage::ExportTrace { .. } => "exportTrace",
            RouterMessage::DeleteTask { .. } => "deleteTask",
            RouterMessage::PushTask { .. } => "pushTask",
            RouterMessage::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_protocol_constants() {
        assert_eq!(
            RouterMessage::VideoStarted { started_at_ms: 0 }.wire_name(),
            "OFFSCREEN_STARTED"
        );
        assert_eq!(
            RouterMessage::IngestDone {
                folder_iso: String::new()
            }
            .wire_name(),
            "INGEST_DONE"
        );
        assert_eq!(
            RouterMessage::HtmlCapture {
                event: EventRecord::default()
            }
            .wire_name(),
            "htmlCapture"
        );
    }
}
