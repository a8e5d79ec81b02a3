//! Video recorder task.
//!
//! Owns a [`ScreenSource`] and walks `idle → acquiring → recording →
//! stopping → blob-ready → idle`. Commands carry a reply channel so a
//! caller can await the acknowledgement with its own deadline; state
//! changes are additionally announced on the event stream the
//! coordinator consumes. `start` is idempotent while recording, which
//! makes the caller's ack-timeout retry safe.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::utils::errors::{EngineError, Result};
use crate::utils::time::SharedClock;
use crate::video::source::ScreenSource;

/// Ack window for a start command before it is retried once.
pub const START_ACK_MS: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoState {
    Idle,
    Acquiring,
    Recording,
    Stopping,
    BlobReady,
}

#[derive(Debug)]
pub enum VideoCommand {
    Start { reply: oneshot::Sender<Result<u64>> },
    Stop { reply: oneshot::Sender<Result<()>> },
}

/// Announcements on the coordinator-facing event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    Started { at_ms: u64 },
    Stopped,
    BlobReady { bytes: Bytes },
}

pub struct VideoRecorder {
    source: Box<dyn ScreenSource>,
    clock: SharedClock,
    state: VideoState,
    started_at_ms: Option<u64>,
}

/// Cloneable command side of a spawned recorder.
#[derive(Clone)]
pub struct VideoHandle {
    tx: mpsc::Sender<VideoCommand>,
}

impl VideoRecorder {
    /// Spawns the recorder task. The returned receiver carries its
    /// lifecycle events; dropping every handle ends the task.
    pub fn spawn(
        source: Box<dyn ScreenSource>,
        clock: SharedClock,
    ) -> (VideoHandle, mpsc::UnboundedReceiver<VideoEvent>) {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut recorder = VideoRecorder {
                source,
                clock,
                state: VideoState::Idle,
                started_at_ms: None,
            };
            while let Some(cmd) = cmd_rx.recv().await {
                recorder.handle(cmd, &evt_tx).await;
            }
            debug!("video recorder task ended");
        });
        (VideoHandle { tx: cmd_tx }, evt_rx)
    }

    async fn handle(&mut self, cmd: VideoCommand, events: &mpsc::UnboundedSender<VideoEvent>) {
        match cmd {
            VideoCommand::Start { reply } => {
                if self.state == VideoState::Recording {
                    // Retry after a slow ack lands here.
                    let at = self.started_at_ms.unwrap_or_else(|| self.clock.now_ms());
                    let _ = reply.send(Ok(at));
                    return;
                }
                if self.state != VideoState::Idle {
                    let _ = reply.send(Err(EngineError::InvalidState(format!(
                        "video start while {:?}",
                        self.state
                    ))));
                    return;
                }
                self.state = VideoState::Acquiring;
                if let Some(delay) = self.source.startup_delay() {
                    tokio::time::sleep(delay).await;
                }
                match self.source.acquire() {
                    Ok(()) => {
                        let at = self.clock.now_ms();
                        self.started_at_ms = Some(at);
                        self.state = VideoState::Recording;
                        info!(started_at_ms = at, "video recording started");
                        let _ = events.send(VideoEvent::Started { at_ms: at });
                        let _ = reply.send(Ok(at));
                    }
                    Err(e) => {
                        warn!(error = %e, "display stream acquisition failed");
                        self.state = VideoState::Idle;
                        let _ = reply.send(Err(e));
                    }
                }
            }
            VideoCommand::Stop { reply } => {
                if self.state != VideoState::Recording {
                    let _ = reply.send(Err(EngineError::InvalidState(format!(
                        "video stop while {:?}",
                        self.state
                    ))));
                    return;
                }
                self.state = VideoState::Stopping;
                let _ = events.send(VideoEvent::Stopped);
                match self.source.finalize() {
                    Ok(bytes) => {
                        self.state = VideoState::BlobReady;
                        info!(bytes = bytes.len(), "video blob finalized");
                        let _ = events.send(VideoEvent::BlobReady {
                            bytes: Bytes::from(bytes),
                        });
                        self.state = VideoState::Idle;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        warn!(error = %e, "video finalize failed");
                        self.state = VideoState::Idle;
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }
}

impl VideoHandle {
    pub async fn start(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(VideoCommand::Start { reply: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed("video commands"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("video start reply"))?
    }

    /// Start with the ack deadline and single retry the coordinator
    /// uses. A retry that lands while recording succeeds immediately.
    pub async fn start_with_retry(&self) -> Result<u64> {
        for attempt in 0..2u8 {
            let (tx, rx) = oneshot::channel();
            self.tx
                .send(VideoCommand::Start { reply: tx })
                .await
                .map_err(|_| EngineError::ChannelClosed("video commands"))?;
            match tokio::time::timeout(Duration::from_millis(START_ACK_MS), rx).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return Err(EngineError::ChannelClosed("video start reply")),
                Err(_) => warn!(attempt, "video start ack timed out"),
            }
        }
        Err(EngineError::Timeout("video start acknowledgement"))
    }

    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(VideoCommand::Stop { reply: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed("video commands"))?;
        rx.await
            .map_err(|_| EngineError::ChannelClosed("video stop reply"))?
    }
}
