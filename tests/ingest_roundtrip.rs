//! Upload flows against an in-process ingest stub: the happy path,
//! the archive-locally-then-retry path, and the deferred video upload
//! released by an ingest acknowledgement.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use tracecap_engine::capture::SessionRecorder;
use tracecap_engine::config::engine::EngineConfig;
use tracecap_engine::coordinator::{Coordinator, CoordinatorHandle};
use tracecap_engine::host::page::{Page, PageHandle};
use tracecap_engine::host::{DocId, NodeId};
use tracecap_engine::ingest::IngestClient;
use tracecap_engine::marker::ScriptedMarker;
use tracecap_engine::storage::tasks::KEY_LAST_INGEST_FOLDER;
use tracecap_engine::storage::StorageGateway;
use tracecap_engine::utils::time::ManualClock;
use tracecap_engine::video::recorder::VideoRecorder;
use tracecap_engine::video::source::{SyntheticScreen, WEBM_MAGIC};

/// Everything the stub saw, for assertions after the drive.
#[derive(Default)]
struct ServerLog {
    event_posts: Vec<Value>,
    api_keys: Vec<Option<String>>,
    video_posts: Vec<(String, Vec<u8>)>,
    fail_events: u32,
}

/// One-connection-at-a-time HTTP stub for the two ingest endpoints.
/// `fail_events` makes that many `/api/events` calls answer 500 first.
async fn spawn_stub(folder: &'static str, fail_events: u32) -> (String, Arc<Mutex<ServerLog>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(ServerLog {
        fail_events,
        ..Default::default()
    }));
    let state = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let service =
                    service_fn(move |req| handle(req, Arc::clone(&state), folder));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    (format!("http://{addr}"), log)
}

async fn handle(
    req: Request<Incoming>,
    log: Arc<Mutex<ServerLog>>,
    folder: &'static str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let reply = match path.as_str() {
        "/api/events" => {
            let mut log = log.lock();
            if log.fail_events > 0 {
                log.fail_events -= 1;
                return Ok(respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false }),
                ));
            }
            log.api_keys.push(api_key);
            log.event_posts
                .push(serde_json::from_slice(&body).unwrap());
            json!({ "success": true, "folderIso": folder, "documentId": "doc-1" })
        }
        "/api/events/video" => {
            log.lock().video_posts.push((content_type, body.to_vec()));
            json!({ "path": format!("/srv/captures/{folder}/video.webm") })
        }
        _ => return Ok(respond(StatusCode::NOT_FOUND, json!({ "success": false }))),
    };
    Ok(respond(StatusCode::OK, reply))
}

fn respond(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn contains_slice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

struct Rig {
    clock: Arc<ManualClock>,
    handle: CoordinatorHandle,
    storage: Arc<StorageGateway>,
    dir: TempDir,
}

async fn rig(endpoint: &str) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.storage.root_dir = dir.path().join("data");
    config.archive.root_dir = dir.path().to_path_buf();
    config.video.enabled = true;
    config.ingest.endpoint = endpoint.to_string();
    config.ingest.api_key = Some("test-key".to_string());
    config.ingest.timeout_secs = 5;
    // The stub either answers or fails on purpose; retry delays would
    // only slow the test down.
    config.ingest.max_retries = 0;
    let ingest = IngestClient::new(&config.ingest).unwrap();
    let clock = ManualClock::new(1_000);
    let storage = Arc::new(StorageGateway::open(&config).await.unwrap());
    let (video, video_events) = VideoRecorder::spawn(
        Box::new(SyntheticScreen::new().with_frames(4)),
        clock.clone(),
    );
    let handle = Coordinator::spawn(
        config,
        Arc::clone(&storage),
        video,
        video_events,
        Some(ingest),
        clock.clone(),
    );
    Rig {
        clock,
        handle,
        storage,
        dir,
    }
}

fn attach(rig: &Rig, tab_id: &str) -> Arc<SessionRecorder> {
    let rules = rig.dir.path().join(format!("{tab_id}-rules.json"));
    std::fs::write(
        &rules,
        json!({ "htmlCapture": { "enabled": false } }).to_string(),
    )
    .unwrap();
    let page = Page::with_html(
        rig.clock.clone(),
        "https://shop.example.com/a",
        "<button id=\"buy\">Buy</button>",
    );
    let (recorder, rx) =
        SessionRecorder::new(page, Box::new(ScriptedMarker::new()), Some(rules));
    rig.handle.register_tab(tab_id, Arc::clone(&recorder), rx);
    recorder
}

fn find(page: &PageHandle, id: &str) -> NodeId {
    page.lock().dom(DocId::MAIN).find_by_id(id).unwrap()
}

#[tokio::test]
async fn test_stop_uploads_events_then_video() {
    let (endpoint, log) = spawn_stub("2026-08-01T10-00-00-000Z", 0).await;
    let rig = rig(&endpoint).await;
    let recorder = attach(&rig, "tab-1");

    let task_id = rig.handle.start_recording("tab-1", "upload").await.unwrap();
    let page = recorder.page();
    let buy = find(&page, "buy");

    rig.clock.set(1_400);
    page.lock().click(DocId::MAIN, buy, 10.0, 10.0);
    recorder.pump().await;

    rig.clock.set(2_000);
    let outcome = rig.handle.stop_recording().await.unwrap();
    assert_eq!(outcome.folder_iso.as_deref(), Some("2026-08-01T10-00-00-000Z"));
    assert_eq!(
        outcome.video_server_path.as_deref(),
        Some("/srv/captures/2026-08-01T10-00-00-000Z/video.webm")
    );

    let log = log.lock();
    assert_eq!(log.event_posts.len(), 1);
    let posted = &log.event_posts[0];
    assert_eq!(posted["task"], Value::String(task_id.clone()));
    assert_eq!(posted["duration"], 1_000);
    assert_eq!(posted["events_recorded"], 1);
    assert_eq!(posted["start_url"], "https://shop.example.com/a");
    assert_eq!(posted["end_url"], "https://shop.example.com/a");
    assert_eq!(posted["data"][0]["type"], "click");
    assert_eq!(posted["data"][0]["videoTimeMs"], 400);
    // The events payload goes out before the video does, so it can
    // only name the local copy.
    assert!(posted["video_local_path"]
        .as_str()
        .unwrap()
        .ends_with("video.webm"));
    assert!(posted.get("video_server_path").is_none());
    assert_eq!(log.api_keys[0].as_deref(), Some("test-key"));

    assert_eq!(log.video_posts.len(), 1);
    let (content_type, body) = &log.video_posts[0];
    assert!(content_type.starts_with("multipart/form-data"));
    assert!(contains_slice(body, b"folderIso"));
    assert!(contains_slice(body, b"2026-08-01T10-00-00-000Z"));
    assert!(contains_slice(body, b"video.webm"));
    assert!(contains_slice(body, &WEBM_MAGIC));
    drop(log);

    let task = rig.handle.get_task(&task_id).await.unwrap();
    assert!(task.pushed);
    assert_eq!(
        task.video_server_path.as_deref(),
        Some("/srv/captures/2026-08-01T10-00-00-000Z/video.webm")
    );
    assert_eq!(
        rig.storage
            .tasks
            .get_state(KEY_LAST_INGEST_FOLDER)
            .await
            .unwrap()
            .as_deref(),
        Some("2026-08-01T10-00-00-000Z")
    );
}

#[tokio::test]
async fn test_failed_upload_keeps_archive_then_manual_push() {
    let (endpoint, log) = spawn_stub("2026-08-02T09-00-00-000Z", 1).await;
    let rig = rig(&endpoint).await;
    let recorder = attach(&rig, "tab-1");

    let task_id = rig.handle.start_recording("tab-1", "retry").await.unwrap();
    let page = recorder.page();
    let buy = find(&page, "buy");

    rig.clock.set(1_300);
    page.lock().click(DocId::MAIN, buy, 10.0, 10.0);
    recorder.pump().await;

    rig.clock.set(1_800);
    let outcome = rig.handle.stop_recording().await.unwrap();
    // Upload refused: everything still lands locally and the stop
    // itself succeeds.
    assert!(outcome.folder_iso.is_none());
    assert!(outcome.video_server_path.is_none());
    assert!(outcome.video_local_path.is_some());
    assert!(outcome.trace_path.as_ref().unwrap().exists());

    let task = rig.handle.get_task(&task_id).await.unwrap();
    assert!(!task.pushed);

    let folder = rig.handle.push_task(&task_id).await.unwrap();
    assert_eq!(folder, "2026-08-02T09-00-00-000Z");

    let task = rig.handle.get_task(&task_id).await.unwrap();
    assert!(task.pushed);
    assert_eq!(
        task.video_server_path.as_deref(),
        Some("/srv/captures/2026-08-02T09-00-00-000Z/video.webm")
    );

    let log = log.lock();
    // Only the accepted upload is logged; the first call answered 500.
    assert_eq!(log.event_posts.len(), 1);
    assert_eq!(log.event_posts[0]["task"], Value::String(task_id));
    assert_eq!(log.video_posts.len(), 1);
}

#[tokio::test]
async fn test_ingest_ack_releases_deferred_video() {
    let (endpoint, log) = spawn_stub("2026-08-03T08-00-00-000Z", 10).await;
    let rig = rig(&endpoint).await;
    let recorder = attach(&rig, "tab-1");

    let task_id = rig.handle.start_recording("tab-1", "deferred").await.unwrap();
    let page = recorder.page();
    let buy = find(&page, "buy");

    rig.clock.set(1_200);
    page.lock().click(DocId::MAIN, buy, 10.0, 10.0);
    recorder.pump().await;

    rig.clock.set(1_700);
    let outcome = rig.handle.stop_recording().await.unwrap();
    assert!(outcome.folder_iso.is_none());
    assert!(outcome.video_server_path.is_none());

    // The popup's ingest acknowledgement names the server folder; the
    // video held back at stop time goes up now.
    rig.handle.notify_ingest_done("2026-08-03T08-00-00-000Z");

    let task = rig.handle.get_task(&task_id).await.unwrap();
    assert_eq!(
        task.video_server_path.as_deref(),
        Some("/srv/captures/2026-08-03T08-00-00-000Z/video.webm")
    );
    assert_eq!(
        rig.storage
            .tasks
            .get_state(KEY_LAST_INGEST_FOLDER)
            .await
            .unwrap()
            .as_deref(),
        Some("2026-08-03T08-00-00-000Z")
    );

    let log = log.lock();
    assert_eq!(log.video_posts.len(), 1);
    let (_, body) = &log.video_posts[0];
    assert!(contains_slice(body, b"2026-08-03T08-00-00-000Z"));
    assert!(contains_slice(body, &WEBM_MAGIC));
}
