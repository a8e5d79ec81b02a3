//! End-to-end recording scenarios driven through the coordinator.
//!
//! Each test wires a synthetic page, a session recorder, and the
//! coordinator together the way the engine runs in production, then
//! replays one user story against a manual clock and asserts on the
//! rows the task store ends up with.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use tracecap_engine::capture::html::NEW_PAGE_TRIGGER;
use tracecap_engine::capture::records::EventPayload;
use tracecap_engine::capture::SessionRecorder;
use tracecap_engine::config::engine::EngineConfig;
use tracecap_engine::coordinator::{Coordinator, CoordinatorHandle};
use tracecap_engine::host::page::{Page, PageHandle};
use tracecap_engine::host::{DocId, DomEvent, EventDetail, NodeId};
use tracecap_engine::marker::{ScriptedMarker, ScriptedMarkerHandle};
use tracecap_engine::storage::tasks::TaskStatus;
use tracecap_engine::storage::StorageGateway;
use tracecap_engine::utils::time::ManualClock;
use tracecap_engine::video::recorder::VideoRecorder;
use tracecap_engine::video::source::SyntheticScreen;

struct Rig {
    clock: Arc<ManualClock>,
    handle: CoordinatorHandle,
    storage: Arc<StorageGateway>,
    dir: TempDir,
}

struct Tab {
    recorder: Arc<SessionRecorder>,
    marker: ScriptedMarkerHandle,
}

/// Coordinator with storage under a tempdir and video disabled; the
/// scenarios here are about event capture, not the screen track.
async fn rig(start_ms: u64) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.storage.root_dir = dir.path().join("data");
    config.archive.root_dir = dir.path().to_path_buf();
    config.video.enabled = false;
    let clock = ManualClock::new(start_ms);
    let storage = Arc::new(StorageGateway::open(&config).await.unwrap());
    let (video, video_events) =
        VideoRecorder::spawn(Box::new(SyntheticScreen::new()), clock.clone());
    let handle = Coordinator::spawn(
        config,
        Arc::clone(&storage),
        video,
        video_events,
        None,
        clock.clone(),
    );
    Rig {
        clock,
        handle,
        storage,
        dir,
    }
}

/// Builds a page and recorder for one tab and registers it with the
/// coordinator. `rules` lands in a capture rule file when given;
/// `None` leaves the default rules (HTML capture on) in force.
fn attach(rig: &Rig, tab_id: &str, url: &str, html: &str, rules: Option<serde_json::Value>) -> Tab {
    let rules_path = rules.map(|overrides| {
        let path = rig.dir.path().join(format!("{tab_id}-rules.json"));
        std::fs::write(&path, overrides.to_string()).unwrap();
        path
    });
    let page = Page::with_html(rig.clock.clone(), url, html);
    let marker = ScriptedMarker::new();
    let handle = marker.handle();
    let (recorder, rx) = SessionRecorder::new(page, Box::new(marker), rules_path);
    rig.handle.register_tab(tab_id, Arc::clone(&recorder), rx);
    Tab {
        recorder,
        marker: handle,
    }
}

fn no_html() -> serde_json::Value {
    json!({ "htmlCapture": { "enabled": false } })
}

fn find(page: &PageHandle, doc: DocId, id: &str) -> NodeId {
    page.lock().dom(doc).find_by_id(id).unwrap()
}

#[tokio::test]
async fn test_single_click_without_video() {
    let rig = rig(1_000).await;
    let tab = attach(
        &rig,
        "tab-1",
        "https://shop.example.com/a",
        "<button id=\"buy\">Buy</button>",
        Some(no_html()),
    );
    // No marker script ever answers: the recorder must fall back to
    // the deterministic identifier.
    tab.marker.mute_injection();

    let task_id = rig.handle.start_recording("tab-1", "buy-flow").await.unwrap();
    let page = tab.recorder.page();
    let buy = find(&page, DocId::MAIN, "buy");

    rig.clock.set(1_200);
    page.lock().click(DocId::MAIN, buy, 10.0, 10.0);
    tab.recorder.pump().await;

    rig.clock.set(1_500);
    let outcome = rig.handle.stop_recording().await.unwrap();
    assert_eq!(outcome.task_id, task_id);
    assert_eq!(outcome.duration_ms, 500);
    assert_eq!(outcome.events_recorded, 1);
    assert!(outcome.video_local_path.is_none());

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 1);
    let record = &events[0];
    assert_eq!(record.kind, "click");
    assert_eq!(record.sequence_number, 0);
    assert_eq!(record.timestamp, 1_200);
    assert!(record.video_time_ms.is_none());
    let target = record.target.as_ref().unwrap();
    assert_eq!(target.tag, "BUTTON");
    assert_eq!(target.id.as_deref(), Some("buy"));
    assert!(target.is_interactive);
    assert_eq!(target.bid, "id-buy");

    let task = rig.storage.tasks.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.event_count, 1);
}

#[tokio::test]
async fn test_double_click_keeps_first_only() {
    let rig = rig(0).await;
    let tab = attach(
        &rig,
        "tab-1",
        "https://shop.example.com/a",
        "<button id=\"buy\">Buy</button>",
        Some(no_html()),
    );

    let task_id = rig.handle.start_recording("tab-1", "dedup").await.unwrap();
    let page = tab.recorder.page();
    let buy = find(&page, DocId::MAIN, "buy");

    rig.clock.set(5_000);
    page.lock().click(DocId::MAIN, buy, 100.0, 100.0);
    rig.clock.set(5_100);
    page.lock().click(DocId::MAIN, buy, 100.0, 100.0);
    tab.recorder.pump().await;

    rig.clock.set(5_500);
    let outcome = rig.handle.stop_recording().await.unwrap();
    assert_eq!(outcome.events_recorded, 1);
    assert_eq!(outcome.capture.captured, 1);
    assert_eq!(outcome.capture.ignored, 1);

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "click");
    assert_eq!(events[0].timestamp, 5_000);
    assert_eq!(events[0].sequence_number, 0);
}

#[tokio::test]
async fn test_typing_debounces_to_final_value() {
    let rig = rig(0).await;
    let tab = attach(
        &rig,
        "tab-1",
        "https://shop.example.com/search",
        "<input id=\"q\">",
        Some(no_html()),
    );

    let task_id = rig.handle.start_recording("tab-1", "typing").await.unwrap();
    let page = tab.recorder.page();
    let q = find(&page, DocId::MAIN, "q");

    rig.clock.set(100);
    page.lock().press_key(DocId::MAIN, q, "a");
    page.lock().set_input_value(DocId::MAIN, q, "a", "insertText", Some("a"));
    rig.clock.set(150);
    page.lock().press_key(DocId::MAIN, q, "b");
    page.lock().set_input_value(DocId::MAIN, q, "ab", "insertText", Some("b"));
    rig.clock.set(200);
    page.lock().press_key(DocId::MAIN, q, "c");
    page.lock().set_input_value(DocId::MAIN, q, "abc", "insertText", Some("c"));
    tab.recorder.pump().await;

    // Trailing window elapses; the next pass flushes one input record.
    rig.clock.set(600);
    tab.recorder.pump().await;

    rig.clock.set(1_000);
    rig.handle.stop_recording().await.unwrap();

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 2);
    // Repeat keydowns inside the generic window collapse to the first.
    assert_eq!(events[0].kind, "keydown");
    assert_eq!(events[0].timestamp, 100);
    assert_eq!(events[0].sequence_number, 0);
    let input = &events[1];
    assert_eq!(input.kind, "input");
    assert_eq!(input.timestamp, 200);
    assert_eq!(input.sequence_number, 1);
    match &input.payload {
        EventPayload::Input(p) => {
            assert_eq!(p.value, "abc");
            assert_eq!(p.old_value, "");
            assert_eq!(p.data.as_deref(), Some("c"));
        }
        other => panic!("wrong payload: {other:?}"),
    }
}

#[tokio::test]
async fn test_pushstate_after_click_is_user_navigation() {
    let rig = rig(0).await;
    let tab = attach(
        &rig,
        "tab-1",
        "https://shop.example.com/a",
        "<button id=\"go\">Go</button>",
        Some(no_html()),
    );

    let task_id = rig.handle.start_recording("tab-1", "spa-nav").await.unwrap();
    let page = tab.recorder.page();
    let go = find(&page, DocId::MAIN, "go");

    rig.clock.set(1_500);
    page.lock().click(DocId::MAIN, go, 5.0, 5.0);
    rig.clock.set(2_000);
    page.lock().push_state(DocId::MAIN, "https://shop.example.com/b");
    tab.recorder.pump().await;

    rig.clock.set(2_500);
    rig.handle.stop_recording().await.unwrap();

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "click");
    let nav = &events[1];
    assert_eq!(nav.kind, "pushState");
    assert_eq!(nav.timestamp, 2_000);
    assert_eq!(nav.sequence_number, 1);
    match &nav.payload {
        EventPayload::Navigation(p) => {
            assert_eq!(p.category, "navigation");
            assert!(p.from_url.ends_with("/a"));
            assert!(p.to_url.ends_with("/b"));
            assert!(p.from_user_input);
        }
        other => panic!("wrong payload: {other:?}"),
    }

    let task = rig.storage.tasks.get_task(&task_id).await.unwrap();
    assert_eq!(task.end_url.as_deref(), Some("https://shop.example.com/b"));
}

#[tokio::test]
async fn test_load_and_change_snapshots_offloaded() {
    let rig = rig(0).await;
    let tab = attach(
        &rig,
        "tab-1",
        "https://app.example.com/settings",
        "<select id=\"plan\"><option>basic</option></select>",
        None,
    );

    let task_id = rig.handle.start_recording("tab-1", "snapshots").await.unwrap();
    // First pass takes the page-load snapshot at t=0.
    tab.recorder.pump().await;

    let page = tab.recorder.page();
    let plan = find(&page, DocId::MAIN, "plan");
    rig.clock.set(1_000);
    {
        let mut p = page.lock();
        let event = DomEvent::new("change", DocId::MAIN, plan, 1_000, EventDetail::None);
        p.dispatch(event);
    }
    tab.recorder.pump().await;

    rig.clock.set(1_500);
    rig.handle.stop_recording().await.unwrap();

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 3);

    let captures: Vec<_> = events.iter().filter(|e| e.is_html_capture()).collect();
    assert_eq!(captures.len(), 2);
    for capture in &captures {
        match &capture.payload {
            EventPayload::HtmlCapture(p) => {
                // Bytes went to the blob store; only the key travels.
                let key = p.document_key.as_deref().unwrap();
                assert!(!key.is_empty());
                assert!(p.html.is_none());
                let html = rig.storage.blobs.get(key).await.unwrap();
                assert!(String::from_utf8(html).unwrap().contains("plan"));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }
    match (&captures[0].payload, &captures[1].payload) {
        (EventPayload::HtmlCapture(first), EventPayload::HtmlCapture(second)) => {
            assert_eq!(first.event_type, NEW_PAGE_TRIGGER);
            // 1000 ms after the load capture is well inside the
            // cooldown; only the change override admits this one.
            assert_eq!(second.event_type, "change");
        }
        _ => unreachable!(),
    }
    assert_eq!(captures[0].timestamp, 0);
    assert_eq!(captures[1].timestamp, 1_000);
}

#[tokio::test]
async fn test_iframe_click_carries_frame_context() {
    let rig = rig(0).await;
    let tab = attach(&rig, "tab-1", "https://shop.example.com/a", "", Some(no_html()));

    let page = tab.recorder.page();
    let frame = {
        let mut p = page.lock();
        let body = p.dom(DocId::MAIN).find_by_tag("body").unwrap();
        let (_, frame) = p.create_frame(DocId::MAIN, body, "https://shop.example.com/widget");
        p.load_frame_html(frame, "<button id=\"go\">go</button>");
        frame
    };

    let task_id = rig.handle.start_recording("tab-1", "widget").await.unwrap();
    let go = find(&page, frame, "go");

    rig.clock.set(3_000);
    page.lock().click(frame, go, 3.0, 3.0);
    tab.recorder.pump().await;

    rig.clock.set(3_500);
    let outcome = rig.handle.stop_recording().await.unwrap();
    assert_eq!(outcome.events_recorded, 1);

    let events = rig.storage.tasks.task_events(&task_id).await.unwrap();
    assert_eq!(events.len(), 1);
    let record = &events[0];
    assert!(record.is_in_iframe);
    assert_eq!(record.timestamp, 3_000);
    assert_eq!(
        record.iframe_url.as_deref(),
        Some("https://shop.example.com/widget")
    );
    assert_eq!(record.top_url.as_deref(), Some("https://shop.example.com/a"));
    let bid = &record.target.as_ref().unwrap().bid;
    assert!(bid.starts_with("iframe0_"), "got {bid}");
}
