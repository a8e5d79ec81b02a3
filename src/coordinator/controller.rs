//! Background coordinator: session lifecycle over the capture, video,
//! storage, and upload components.
//!
//! One spawned task owns the state machine (`Idle -> Arming ->
//! Recording -> Stopping -> Finalizing -> Idle`) and processes router
//! messages to completion, one at a time, so transitions never
//! interleave. Tab
//! event streams and video lifecycle events are polled on a short tick
//! between messages; a stop handler drains both inline, which is what
//! guarantees flushed debounces and the finished video blob are in hand
//! before finalization begins.
//!
//! Records persist incrementally while recording. Finalization rewrites
//! them once with video alignment applied, archives `video.webm` and
//! `trace.json` under the session folder, and pushes the payload to the
//! ingest service when a client is configured. Upload failures leave
//! the task unpushed and retryable; they never discard local data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::capture::records::{EventPayload, EventRecord};
use crate::capture::session::{SessionRecorder, SessionStats};
use crate::config::engine::EngineConfig;
use crate::ingest::IngestClient;
use crate::storage::tasks::{
    TaskRecord, KEY_CURRENT_TASK, KEY_IS_RECORDING, KEY_LAST_COMPLETED_TASK,
    KEY_LAST_INGEST_FOLDER, KEY_RECORDING_START, KEY_RECORDING_TAB, KEY_VIDEO_STARTED_AT,
};
use crate::storage::StorageGateway;
use crate::trace;
use crate::utils::errors::{EngineError, Result};
use crate::utils::time::SharedClock;
use crate::video::recorder::{VideoEvent, VideoHandle};

use super::messages::RouterMessage;

/// Poll cadence for tab and video event streams between messages.
const ROUTER_TICK_MS: u64 = 25;

/// Consecutive persistence failures tolerated before the in-flight
/// event stream is copied to a local backup file.
const STORAGE_ERROR_BACKUP_THRESHOLD: u32 = 3;

/// Lifecycle of the single active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Arming,
    Recording,
    Stopping,
    Finalizing,
}

/// Summary handed back when a session finishes.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub task_id: String,
    pub duration_ms: u64,
    pub events_recorded: u64,
    /// Server session folder, when the upload went through.
    pub folder_iso: Option<String>,
    pub video_local_path: Option<String>,
    pub video_server_path: Option<String>,
    pub trace_path: Option<PathBuf>,
    pub capture: SessionStats,
}

struct TabEntry {
    recorder: Arc<SessionRecorder>,
    consumer: tokio::task::JoinHandle<()>,
}

struct ActiveSession {
    task_id: String,
    tab_id: String,
    started_at_ms: u64,
    start_url: String,
    video_started_at_ms: Option<u64>,
    video_bytes: Option<Bytes>,
    events: Vec<EventRecord>,
    storage_errors: u32,
}

/// Video archived locally but not yet pushed; uploaded once the server
/// folder becomes known through `INGEST_DONE`.
struct DeferredVideo {
    task_id: String,
    path: PathBuf,
}

pub struct Coordinator {
    config: EngineConfig,
    storage: Arc<StorageGateway>,
    ingest: Option<IngestClient>,
    video: VideoHandle,
    video_events: mpsc::UnboundedReceiver<VideoEvent>,
    clock: SharedClock,
    tabs: Arc<DashMap<String, TabEntry>>,
    streams: HashMap<String, mpsc::UnboundedReceiver<EventRecord>>,
    state: CoordinatorState,
    session: Option<ActiveSession>,
    deferred_video: Option<DeferredVideo>,
}

/// Cloneable command side of a spawned coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<RouterMessage>,
    tabs: Arc<DashMap<String, TabEntry>>,
}

impl Coordinator {
    /// Spawns the coordinator task. Dropping every handle (and closing
    /// the channel) ends it; so does [`CoordinatorHandle::shutdown`].
    pub fn spawn(
        config: EngineConfig,
        storage: Arc<StorageGateway>,
        video: VideoHandle,
        video_events: mpsc::UnboundedReceiver<VideoEvent>,
        ingest: Option<IngestClient>,
        clock: SharedClock,
    ) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let tabs = Arc::new(DashMap::new());
        let coordinator = Coordinator {
            config,
            storage,
            ingest,
            video,
            video_events,
            clock,
            tabs: Arc::clone(&tabs),
            streams: HashMap::new(),
            state: CoordinatorState::Idle,
            session: None,
            deferred_video: None,
        };
        tokio::spawn(coordinator.run(rx));
        CoordinatorHandle { tx, tabs }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterMessage>) {
        let mut tick = interval(Duration::from_millis(ROUTER_TICK_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(RouterMessage::Shutdown) | None => break,
                    Some(msg) => self.dispatch(msg).await,
                },
                _ = tick.tick() => {
                    self.drain_video().await;
                    self.drain_streams().await;
                }
            }
        }
        debug!("coordinator loop ended");
    }

    async fn dispatch(&mut self, msg: RouterMessage) {
        debug!(message = msg.wire_name(), "routing");
        match msg {
            RouterMessage::StartRecording {
                tab_id,
                title,
                reply,
            } => {
                let _ = reply.send(self.on_start(tab_id, title).await);
            }
            RouterMessage::StopRecording { reply } => {
                let _ = reply.send(self.on_stop().await);
            }
            RouterMessage::ResumeRecording { tab_id, reply } => {
                let _ = reply.send(self.on_resume(tab_id).await);
            }
            RouterMessage::VideoStarted { started_at_ms } => {
                self.on_video_started(started_at_ms).await;
            }
            RouterMessage::VideoStopped => debug!("screen recorder stopped"),
            RouterMessage::VideoBlobReady { bytes } => self.on_video_blob(bytes),
            RouterMessage::IngestDone { folder_iso } => self.on_ingest_done(folder_iso).await,
            RouterMessage::RecordedEvent { event } | RouterMessage::HtmlCapture { event } => {
                self.route_record(event).await;
            }
            RouterMessage::ReconstructHtml { mut events, reply } => {
                let result = match self.storage.reconstruct(&mut events).await {
                    Ok(()) => Ok(events),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            RouterMessage::RegisterTab { tab_id, events } => {
                debug!(tab = %tab_id, "tab event stream attached");
                self.streams.insert(tab_id, events);
            }
            RouterMessage::UnregisterTab { tab_id } => self.on_unregister(tab_id).await,
            RouterMessage::GetTask { task_id, reply } => {
                let _ = reply.send(self.storage.tasks.get_task(&task_id).await);
            }
            RouterMessage::ListTasks { reply } => {
                let _ = reply.send(self.storage.tasks.list_tasks().await);
            }
            RouterMessage::ExportTrace { task_id, reply } => {
                let _ = reply.send(self.on_export(task_id).await);
            }
            RouterMessage::DeleteTask { task_id, reply } => {
                let _ = reply.send(self.on_delete(task_id).await);
            }
            RouterMessage::PushTask { task_id, reply } => {
                let _ = reply.send(self.on_push_task(task_id).await);
            }
            RouterMessage::Shutdown => {}
        }
    }

    // ---- session lifecycle ----

    async fn on_start(&mut self, tab_id: String, title: String) -> Result<String> {
        if self.state != CoordinatorState::Idle {
            return Err(EngineError::InvalidState(format!(
                "cannot start while {:?}",
                self.state
            )));
        }
        let recorder = self.recorder_for(&tab_id)?;
        let task_id = Ulid::new().to_string();
        let started_at_ms = self.clock.now_ms();
        let start_url = recorder.page().lock().main_url();

        self.storage
            .tasks
            .create_task(&task_id, &title, started_at_ms, &start_url)
            .await?;
        self.state = CoordinatorState::Arming;
        self.persist_session_keys(&task_id, &tab_id, started_at_ms)
            .await;

        let video_started_at_ms = if self.config.video.enabled {
            match self.video.start_with_retry().await {
                Ok(at_ms) => {
                    self.set_state_key(KEY_VIDEO_STARTED_AT, &at_ms.to_string())
                        .await;
                    Some(at_ms)
                }
                Err(e) => {
                    warn!(error = %e, task = %task_id, "video acquisition failed, session cancelled");
                    self.cancel_aborted(&task_id).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        if let Err(e) = recorder.arm(&task_id, started_at_ms, 0) {
            warn!(error = %e, task = %task_id, "capture arm failed, session cancelled");
            if video_started_at_ms.is_some() {
                if let Err(stop_err) = self.video.stop().await {
                    debug!(error = %stop_err, "video stop after failed arm");
                }
                self.discard_video_events();
            }
            self.cancel_aborted(&task_id).await;
            return Err(e);
        }

        self.session = Some(ActiveSession {
            task_id: task_id.clone(),
            tab_id,
            started_at_ms,
            start_url,
            video_started_at_ms,
            video_bytes: None,
            events: Vec::new(),
            storage_errors: 0,
        });
        self.state = CoordinatorState::Recording;
        info!(task = %task_id, video = video_started_at_ms.is_some(), "session recording");
        Ok(task_id)
    }

    async fn on_stop(&mut self) -> Result<StopOutcome> {
        if self.state != CoordinatorState::Recording {
            return Err(EngineError::InvalidState(format!(
                "cannot stop while {:?}",
                self.state
            )));
        }
        let stop_time = self.clock.now_ms();
        self.state = CoordinatorState::Stopping;

        let Some(tab_id) = self.session.as_ref().map(|s| s.tab_id.clone()) else {
            self.state = CoordinatorState::Idle;
            return Err(EngineError::InvalidState("no active session".to_string()));
        };

        // Flushing the recorder lands every pending debounce on its
        // event stream before stop() returns; the drain right after
        // pulls them in while no other message can interleave.
        let recorder = self.recorder_for(&tab_id).ok();
        let capture = match &recorder {
            Some(recorder) => recorder.stop().await,
            None => {
                warn!(tab = %tab_id, "recording tab vanished before stop");
                SessionStats::default()
            }
        };
        self.drain_tab(&tab_id).await;
        let end_url = match &recorder {
            Some(recorder) => recorder.page().lock().main_url(),
            None => self
                .session
                .as_ref()
                .map(|s| s.start_url.clone())
                .unwrap_or_default(),
        };

        let video_active = self
            .session
            .as_ref()
            .is_some_and(|s| s.video_started_at_ms.is_some());
        if video_active {
            match self.video.stop().await {
                Ok(()) => self.drain_video().await,
                Err(e) => warn!(error = %e, "video stop failed, finalizing without a recording"),
            }
        }

        self.state = CoordinatorState::Finalizing;
        let outcome = self.finalize(stop_time, end_url, capture).await;
        self.clear_session_keys().await;
        if let Ok(outcome) = &outcome {
            self.set_state_key(KEY_LAST_COMPLETED_TASK, &outcome.task_id)
                .await;
        }
        self.session = None;
        self.state = CoordinatorState::Idle;
        outcome
    }

    async fn finalize(
        &mut self,
        stop_time: u64,
        end_url: String,
        capture: SessionStats,
    ) -> Result<StopOutcome> {
        let Some(mut session) = self.session.take() else {
            return Err(EngineError::InvalidState("no active session".to_string()));
        };
        let task_id = session.task_id.clone();
        let duration_ms = stop_time.saturating_sub(session.started_at_ms);

        if let Some(video_epoch) = session.video_started_at_ms {
            for event in &mut session.events {
                event.align_to_video(video_epoch);
            }
        }
        if let Err(e) = self
            .storage
            .tasks
            .replace_events(&task_id, &session.events)
            .await
        {
            warn!(error = %e, task = %task_id, "aligned event rewrite failed");
            self.backup_events(&task_id, &session.events).await;
        }
        if let Err(e) = self
            .storage
            .tasks
            .complete_task(&task_id, stop_time, &end_url)
            .await
        {
            warn!(error = %e, task = %task_id, "task completion row update failed");
        }

        let mut video_local_path: Option<String> = None;
        let mut video_file: Option<PathBuf> = None;
        if let Some(bytes) = &session.video_bytes {
            match self
                .storage
                .archive
                .write_video(session.started_at_ms, bytes)
                .await
            {
                Ok(path) => {
                    let stored = self.archive_relative(&path);
                    if let Err(e) = self
                        .storage
                        .tasks
                        .set_video_paths(&task_id, Some(&stored), None)
                        .await
                    {
                        warn!(error = %e, task = %task_id, "video path row update failed");
                    }
                    video_local_path = Some(stored);
                    video_file = Some(path);
                }
                Err(e) => warn!(error = %e, "video archive write failed"),
            }
        }

        // The archive and the upload both carry inline HTML; stored
        // records keep only the blob key.
        let mut upload_events = session.events.clone();
        if let Err(e) = self.storage.reconstruct(&mut upload_events).await {
            warn!(error = %e, "snapshot reconstruction failed, exporting offloaded records");
        }
        let mut payload = trace::build_payload(
            &task_id,
            duration_ms,
            session.start_url.clone(),
            end_url.clone(),
            upload_events,
            video_local_path.clone(),
            None,
        );

        let mut folder_iso: Option<String> = None;
        let mut video_server_path: Option<String> = None;
        if let Some(client) = &self.ingest {
            match client.push_events(&payload).await {
                Ok(ack) => {
                    folder_iso = Some(ack.folder_iso.clone());
                    let pushed_at = self.clock.now_ms();
                    if let Err(e) = self.storage.tasks.mark_pushed(&task_id, pushed_at).await {
                        warn!(error = %e, task = %task_id, "pushed flag update failed");
                    }
                    self.set_state_key(KEY_LAST_INGEST_FOLDER, &ack.folder_iso)
                        .await;
                    if let Some(bytes) = session.video_bytes.take() {
                        match client.push_video(&ack.folder_iso, bytes).await {
                            Ok(video_ack) => {
                                if let Err(e) = self
                                    .storage
                                    .tasks
                                    .set_video_paths(&task_id, None, Some(&video_ack.path))
                                    .await
                                {
                                    warn!(error = %e, "server video path update failed");
                                }
                                video_server_path = Some(video_ack.path);
                            }
                            Err(e) => warn!(error = %e, "video upload failed, local copy kept"),
                        }
                    }
                    info!(task = %task_id, folder = %ack.folder_iso, "session uploaded");
                }
                Err(e) => {
                    warn!(error = %e, task = %task_id, "event upload failed, payload archived locally");
                    if let Some(path) = video_file.clone() {
                        self.deferred_video = Some(DeferredVideo {
                            task_id: task_id.clone(),
                            path,
                        });
                    }
                }
            }
        }
        payload.video_server_path = video_server_path.clone();

        let trace_path = match trace::trace_document(&payload) {
            Ok(doc) => match self
                .storage
                .archive
                .write_trace(session.started_at_ms, &doc)
                .await
            {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "trace archive write failed");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "trace document build failed");
                None
            }
        };

        Ok(StopOutcome {
            task_id,
            duration_ms,
            events_recorded: payload.events_recorded,
            folder_iso,
            video_local_path,
            video_server_path,
            trace_path,
            capture,
        })
    }

    async fn on_resume(&mut self, tab_id: String) -> Result<()> {
        if self.state != CoordinatorState::Recording {
            return Err(EngineError::InvalidState(format!(
                "cannot resume while {:?}",
                self.state
            )));
        }
        let recorder = self.recorder_for(&tab_id)?;
        let (task_id, next_seq) = {
            let Some(session) = self.session.as_mut() else {
                return Err(EngineError::InvalidState("no active session".to_string()));
            };
            session.tab_id = tab_id.clone();
            (session.task_id.clone(), session.events.len() as u64)
        };
        let resumed_at = self.clock.now_ms();
        recorder.arm(&task_id, resumed_at, next_seq)?;
        self.set_state_key(KEY_RECORDING_TAB, &tab_id).await;
        info!(task = %task_id, tab = %tab_id, next_seq, "capture resumed after navigation");
        Ok(())
    }

    // ---- record ingestion ----

    async fn route_record(&mut self, event: EventRecord) {
        if self.state == CoordinatorState::Recording {
            self.ingest_record(event).await;
        } else {
            debug!(kind = %event.kind, "record dropped outside a session");
        }
    }

    async fn ingest_record(&mut self, mut event: EventRecord) {
        let (task_id, video_started) = match &self.session {
            Some(session) => (session.task_id.clone(), session.video_started_at_ms),
            None => return,
        };
        if let Some(started) = video_started {
            event.align_to_video(started);
        }
        if event.is_html_capture() {
            // The record still persists with its html inline, so an
            // offload failure does not count toward the append-error
            // burst.
            if let Err(e) = self.offload_snapshot(&task_id, &mut event).await {
                warn!(error = %e, "snapshot offload failed, keeping html inline");
            }
        }
        let append = self
            .storage
            .tasks
            .append_events(&task_id, std::slice::from_ref(&event))
            .await;
        if let Some(session) = self.session.as_mut() {
            session.events.push(event);
        }
        match append {
            Ok(_) => {
                if let Some(session) = self.session.as_mut() {
                    session.storage_errors = 0;
                }
            }
            Err(e) => {
                warn!(error = %e, "event append failed");
                self.note_storage_error().await;
            }
        }
    }

    /// Moves inline snapshot HTML into the blob store, leaving only the
    /// document key on the record. The HTML stays inline when the store
    /// rejects it.
    async fn offload_snapshot(&self, task_id: &str, event: &mut EventRecord) -> Result<()> {
        let EventPayload::HtmlCapture(payload) = &mut event.payload else {
            return Ok(());
        };
        let Some(html) = payload.html.take() else {
            return Ok(());
        };
        let key = match self.storage.blobs.next_document_key(task_id).await {
            Ok(key) => key,
            Err(e) => {
                payload.html = Some(html);
                return Err(e);
            }
        };
        if let Err(e) = self.storage.blobs.put(&key, html.as_bytes()).await {
            payload.html = Some(html);
            return Err(e);
        }
        payload.document_key = Some(key);
        Ok(())
    }

    async fn note_storage_error(&mut self) {
        let snapshot = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.storage_errors += 1;
            if session.storage_errors < STORAGE_ERROR_BACKUP_THRESHOLD {
                return;
            }
            session.storage_errors = 0;
            (
                session.task_id.clone(),
                session.tab_id.clone(),
                session.events.clone(),
                session.events.len() as u64,
            )
        };
        let (task_id, tab_id, events, next_seq) = snapshot;
        self.backup_events(&task_id, &events).await;
        // Refresh the instrumentation so the listener set is known-good
        // after the failure burst.
        if let Ok(recorder) = self.recorder_for(&tab_id) {
            let now = self.clock.now_ms();
            if let Err(e) = recorder.arm(&task_id, now, next_seq) {
                warn!(error = %e, "re-arm after storage failures failed");
            }
        }
    }

    /// Best-effort copy of the in-flight event stream next to the
    /// archive tree, for manual recovery when the metadata store is
    /// failing.
    async fn backup_events(&self, task_id: &str, events: &[EventRecord]) {
        let dir = match self.storage.archive.root().parent() {
            Some(parent) => parent.to_path_buf(),
            None => self.storage.archive.root().to_path_buf(),
        };
        let path = dir.join(format!("events-backup-{task_id}.json"));
        let bytes = match serde_json::to_vec_pretty(events) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "event backup serialization failed");
                return;
            }
        };
        match fs::write(&path, bytes).await {
            Ok(()) => {
                warn!(path = %path.display(), count = events.len(), "event stream backed up")
            }
            Err(e) => warn!(error = %e, "event backup write failed"),
        }
    }

    // ---- video lifecycle ----

    async fn drain_video(&mut self) {
        loop {
            let event = match self.video_events.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            match event {
                VideoEvent::Started { at_ms } => self.on_video_started(at_ms).await,
                VideoEvent::Stopped => debug!("screen recorder stopped"),
                VideoEvent::BlobReady { bytes } => self.on_video_blob(bytes),
            }
        }
    }

    fn discard_video_events(&mut self) {
        while self.video_events.try_recv().is_ok() {}
    }

    async fn on_video_started(&mut self, at_ms: u64) {
        let fresh = match self.session.as_mut() {
            Some(session) if session.video_started_at_ms.is_none() => {
                session.video_started_at_ms = Some(at_ms);
                true
            }
            _ => false,
        };
        if fresh {
            self.set_state_key(KEY_VIDEO_STARTED_AT, &at_ms.to_string())
                .await;
            info!(at_ms, "video epoch recorded");
        }
    }

    fn on_video_blob(&mut self, bytes: Bytes) {
        match self.session.as_mut() {
            Some(session) => {
                debug!(len = bytes.len(), "video blob buffered");
                session.video_bytes = Some(bytes);
            }
            None => warn!(len = bytes.len(), "video blob arrived with no active session"),
        }
    }

    // ---- ingest + task housekeeping ----

    async fn on_ingest_done(&mut self, folder_iso: String) {
        self.set_state_key(KEY_LAST_INGEST_FOLDER, &folder_iso).await;
        let Some(deferred) = self.deferred_video.take() else {
            debug!(folder = %folder_iso, "ingest acknowledged");
            return;
        };
        let Some(client) = &self.ingest else {
            return;
        };
        match fs::read(&deferred.path).await {
            Ok(bytes) => match client.push_video(&folder_iso, Bytes::from(bytes)).await {
                Ok(ack) => {
                    if let Err(e) = self
                        .storage
                        .tasks
                        .set_video_paths(&deferred.task_id, None, Some(&ack.path))
                        .await
                    {
                        warn!(error = %e, "server video path update failed");
                    }
                    info!(task = %deferred.task_id, folder = %folder_iso, "deferred video uploaded");
                }
                Err(e) => {
                    warn!(error = %e, "deferred video upload failed");
                    self.deferred_video = Some(deferred);
                }
            },
            Err(e) => {
                warn!(error = %e, path = %deferred.path.display(), "deferred video read failed")
            }
        }
    }

    async fn on_export(&self, task_id: String) -> Result<Value> {
        let task = self.storage.tasks.get_task(&task_id).await?;
        let mut events = self.storage.tasks.task_events(&task_id).await?;
        self.storage.reconstruct(&mut events).await?;
        let stopped = task.stopped_at_ms.unwrap_or_else(|| self.clock.now_ms());
        let payload = trace::build_payload(
            &task_id,
            stopped.saturating_sub(task.started_at_ms),
            task.start_url.clone(),
            task.end_url.clone().unwrap_or_else(|| task.start_url.clone()),
            events,
            task.video_local_path,
            task.video_server_path,
        );
        trace::trace_document(&payload)
    }

    async fn on_delete(&self, task_id: String) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| s.task_id == task_id) {
            return Err(EngineError::InvalidState("task is recording".to_string()));
        }
        self.storage.purge_task(&task_id).await
    }

    async fn on_push_task(&self, task_id: String) -> Result<String> {
        let client = self
            .ingest
            .as_ref()
            .ok_or_else(|| EngineError::ConfigError("no ingest endpoint configured".to_string()))?;
        let task = self.storage.tasks.get_task(&task_id).await?;
        let mut events = self.storage.tasks.task_events(&task_id).await?;
        self.storage.reconstruct(&mut events).await?;
        let stopped = task.stopped_at_ms.unwrap_or_else(|| self.clock.now_ms());
        let payload = trace::build_payload(
            &task_id,
            stopped.saturating_sub(task.started_at_ms),
            task.start_url.clone(),
            task.end_url.clone().unwrap_or_else(|| task.start_url.clone()),
            events,
            task.video_local_path.clone(),
            task.video_server_path.clone(),
        );
        let ack = client.push_events(&payload).await?;
        self.storage
            .tasks
            .mark_pushed(&task_id, self.clock.now_ms())
            .await?;
        self.set_state_key(KEY_LAST_INGEST_FOLDER, &ack.folder_iso)
            .await;
        if task.video_server_path.is_none() {
            if let Some(local) = &task.video_local_path {
                let full = self.resolve_archive_path(local);
                match fs::read(&full).await {
                    Ok(bytes) => match client.push_video(&ack.folder_iso, Bytes::from(bytes)).await {
                        Ok(video_ack) => {
                            self.storage
                                .tasks
                                .set_video_paths(&task_id, None, Some(&video_ack.path))
                                .await?;
                        }
                        Err(e) => warn!(error = %e, "video upload failed, local copy kept"),
                    },
                    Err(e) => {
                        warn!(error = %e, path = %full.display(), "archived video read failed")
                    }
                }
            }
        }
        info!(task = %task_id, folder = %ack.folder_iso, "task pushed");
        Ok(ack.folder_iso)
    }

    async fn on_unregister(&mut self, tab_id: String) {
        self.drain_tab(&tab_id).await;
        self.streams.remove(&tab_id);
        if let Some((_, entry)) = self.tabs.remove(&tab_id) {
            entry.recorder.shutdown();
            entry.consumer.abort();
        }
        debug!(tab = %tab_id, "tab detached");
    }

    // ---- plumbing ----

    async fn drain_streams(&mut self) {
        let mut harvested = Vec::new();
        for rx in self.streams.values_mut() {
            while let Ok(event) = rx.try_recv() {
                harvested.push(event);
            }
        }
        for event in harvested {
            self.route_record(event).await;
        }
    }

    async fn drain_tab(&mut self, tab_id: &str) {
        let mut drained = Vec::new();
        if let Some(rx) = self.streams.get_mut(tab_id) {
            while let Ok(event) = rx.try_recv() {
                drained.push(event);
            }
        }
        for event in drained {
            self.ingest_record(event).await;
        }
    }

    fn recorder_for(&self, tab_id: &str) -> Result<Arc<SessionRecorder>> {
        self.tabs
            .get(tab_id)
            .map(|entry| Arc::clone(&entry.recorder))
            .ok_or_else(|| EngineError::InvalidState(format!("tab {tab_id} is not registered")))
    }

    async fn persist_session_keys(&self, task_id: &str, tab_id: &str, started_at_ms: u64) {
        self.set_state_key(KEY_IS_RECORDING, "true").await;
        self.set_state_key(KEY_CURRENT_TASK, task_id).await;
        self.set_state_key(KEY_RECORDING_TAB, tab_id).await;
        self.set_state_key(KEY_RECORDING_START, &started_at_ms.to_string())
            .await;
    }

    async fn clear_session_keys(&self) {
        for key in [
            KEY_IS_RECORDING,
            KEY_CURRENT_TASK,
            KEY_RECORDING_TAB,
            KEY_RECORDING_START,
            KEY_VIDEO_STARTED_AT,
        ] {
            if let Err(e) = self.storage.tasks.clear_state(key).await {
                debug!(key, error = %e, "session key clear failed");
            }
        }
    }

    /// Session keys mirror live state for crash recovery; failures to
    /// write them never fail the operation that set them.
    async fn set_state_key(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.tasks.set_state(key, value).await {
            debug!(key, error = %e, "session key write failed");
        }
    }

    async fn cancel_aborted(&mut self, task_id: &str) {
        if let Err(e) = self
            .storage
            .tasks
            .cancel_task(task_id, self.clock.now_ms())
            .await
        {
            warn!(error = %e, "cancel row update failed");
        }
        self.clear_session_keys().await;
        self.state = CoordinatorState::Idle;
    }

    /// Stored video paths are relative to the archive parent so the
    /// data directory can move wholesale.
    fn archive_relative(&self, path: &Path) -> String {
        match self.storage.archive.root().parent() {
            Some(base) => match path.strip_prefix(base) {
                Ok(rel) => rel.display().to_string(),
                Err(_) => path.display().to_string(),
            },
            None => path.display().to_string(),
        }
    }

    fn resolve_archive_path(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.storage.archive.root().parent() {
            Some(parent) => parent.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl CoordinatorHandle {
    /// Attaches a page recorder to the router and starts its consumer.
    pub fn register_tab(
        &self,
        tab_id: &str,
        recorder: Arc<SessionRecorder>,
        events: mpsc::UnboundedReceiver<EventRecord>,
    ) {
        let consumer = recorder.spawn_consumer();
        self.tabs
            .insert(tab_id.to_string(), TabEntry { recorder, consumer });
        let _ = self.tx.send(RouterMessage::RegisterTab {
            tab_id: tab_id.to_string(),
            events,
        });
    }

    pub fn unregister_tab(&self, tab_id: &str) {
        let _ = self.tx.send(RouterMessage::UnregisterTab {
            tab_id: tab_id.to_string(),
        });
    }

    pub async fn start_recording(&self, tab_id: &str, title: &str) -> Result<String> {
        self.request(|reply| RouterMessage::StartRecording {
            tab_id: tab_id.to_string(),
            title: title.to_string(),
            reply,
        })
        .await
    }

    pub async fn stop_recording(&self) -> Result<StopOutcome> {
        self.request(|reply| RouterMessage::StopRecording { reply })
            .await
    }

    pub async fn resume_recording(&self, tab_id: &str) -> Result<()> {
        self.request(|reply| RouterMessage::ResumeRecording {
            tab_id: tab_id.to_string(),
            reply,
        })
        .await
    }

    /// Feeds one finalized record through the router, same as a record
    /// arriving from a registered tab.
    pub fn submit_record(&self, event: EventRecord) {
        let msg = if event.is_html_capture() {
            RouterMessage::HtmlCapture { event }
        } else {
            RouterMessage::RecordedEvent { event }
        };
        let _ = self.tx.send(msg);
    }

    pub fn notify_ingest_done(&self, folder_iso: &str) {
        let _ = self.tx.send(RouterMessage::IngestDone {
            folder_iso: folder_iso.to_string(),
        });
    }

    pub async fn reconstruct(&self, events: Vec<EventRecord>) -> Result<Vec<EventRecord>> {
        self.request(|reply| RouterMessage::ReconstructHtml { events, reply })
            .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        self.request(|reply| RouterMessage::GetTask {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.request(|reply| RouterMessage::ListTasks { reply }).await
    }

    pub async fn export_trace(&self, task_id: &str) -> Result<Value> {
        self.request(|reply| RouterMessage::ExportTrace {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.request(|reply| RouterMessage::DeleteTask {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn push_task(&self, task_id: &str) -> Result<String> {
        self.request(|reply| RouterMessage::PushTask {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RouterMessage::Shutdown);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> RouterMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| EngineError::ChannelClosed("coordinator"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("coordinator"))?
    }
}
