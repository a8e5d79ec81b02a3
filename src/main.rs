//! Capture engine demo runner.
//!
//! Wires the full stack against the in-process page host: records a
//! short scripted session, archives it under the configured archive
//! root, and reports where the trace landed. Pass a settings file path
//! or set `TRACECAP_INGEST__ENDPOINT` to exercise the upload path
//! against a live ingest service.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tracecap_engine::capture::SessionRecorder;
use tracecap_engine::config::engine::EngineConfig;
use tracecap_engine::coordinator::Coordinator;
use tracecap_engine::host::dom::DocId;
use tracecap_engine::host::page::Page;
use tracecap_engine::ingest::IngestClient;
use tracecap_engine::marker::ScriptedMarker;
use tracecap_engine::observability::{self, LogFormat};
use tracecap_engine::storage::StorageGateway;
use tracecap_engine::utils::time::system_clock;
use tracecap_engine::video::recorder::VideoRecorder;
use tracecap_engine::video::source::SyntheticScreen;
use tracecap_engine::Result;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init("tracecap_engine=info", LogFormat::Text);
    info!("starting capture engine v{}", tracecap_engine::VERSION);

    let settings_path = std::env::args().nth(1);
    let config = EngineConfig::load(settings_path.as_deref())?;
    // Upload only when an endpoint was configured explicitly; the
    // default points at a dev server that is usually absent.
    let ingest = if settings_path.is_some()
        || std::env::var_os("TRACECAP_INGEST__ENDPOINT").is_some()
    {
        Some(IngestClient::new(&config.ingest)?)
    } else {
        None
    };

    let clock = system_clock();
    let storage = Arc::new(StorageGateway::open(&config).await?);
    let (video, video_events) =
        VideoRecorder::spawn(Box::new(SyntheticScreen::new()), Arc::clone(&clock));
    let coordinator = Coordinator::spawn(
        config.clone(),
        Arc::clone(&storage),
        video,
        video_events,
        ingest,
        Arc::clone(&clock),
    );

    // A small scripted page stands in for a live tab.
    let page = Page::with_html(
        Arc::clone(&clock),
        "https://demo.tracecap.dev/checkout",
        "<form id=\"order\">\
           <input id=\"qty\" type=\"text\" value=\"\">\
           <button id=\"buy\">Buy now</button>\
         </form>",
    );
    let (recorder, events) = SessionRecorder::new(
        page,
        Box::new(ScriptedMarker::new()),
        config.capture_config_path.clone(),
    );
    coordinator.register_tab("demo-tab", Arc::clone(&recorder), events);

    let task_id = coordinator
        .start_recording("demo-tab", "demo-session")
        .await?;
    info!(task = %task_id, "recording");

    drive_demo(&recorder).await;

    let outcome = coordinator.stop_recording().await?;
    info!(
        task = %outcome.task_id,
        events = outcome.events_recorded,
        duration_ms = outcome.duration_ms,
        "session finished"
    );
    if let Some(path) = &outcome.trace_path {
        info!(path = %path.display(), "trace archived");
    }
    if let Some(folder) = &outcome.folder_iso {
        info!(folder = %folder, "uploaded to ingest");
    }
    coordinator.shutdown();
    Ok(())
}

/// Types a quantity, clicks the buy button, and leaves time for the
/// input debounce and the queue consumer to run.
async fn drive_demo(recorder: &Arc<SessionRecorder>) {
    let page = recorder.page();
    let (qty, buy) = {
        let page = page.lock();
        let dom = page.dom(DocId::MAIN);
        (dom.find_by_id("qty"), dom.find_by_id("buy"))
    };
    if let Some(qty) = qty {
        page.lock().type_text(DocId::MAIN, qty, "2");
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    if let Some(buy) = buy {
        page.lock().click_gesture(DocId::MAIN, buy, 120.0, 48.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
