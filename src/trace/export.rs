//! Builds the upload payload and the archived `trace.json` document.
//!
//! The trace document carries the same fields as the upload payload plus
//! `durationSeconds`, and every event additionally mirrors `videoTimeMs`
//! into `video_timestamp` so offline tooling never needs the live field
//! name. A stripped variant with all `html` fields removed exists for
//! inspection of large traces.

use serde_json::{json, Map, Value};

use crate::capture::EventRecord;
use crate::ingest::SessionPayload;
use crate::utils::errors::Result;

/// Assembles the body uploaded to the ingest service.
#[allow(clippy::too_many_arguments)]
pub fn build_payload(
    task_id: &str,
    duration_ms: u64,
    start_url: String,
    end_url: String,
    records: Vec<EventRecord>,
    video_local_path: Option<String>,
    video_server_path: Option<String>,
) -> SessionPayload {
    let events_recorded = records.len() as u64;
    SessionPayload {
        task: task_id.to_string(),
        duration: duration_ms,
        events_recorded,
        start_url,
        end_url,
        data: records,
        video_local_path,
        video_server_path,
    }
}

/// Renders the payload into the `trace.json` document.
pub fn trace_document(payload: &SessionPayload) -> Result<Value> {
    let mut doc = serde_json::to_value(payload)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(
            "durationSeconds".to_string(),
            json!(payload.duration_seconds()),
        );
        if let Some(events) = obj.get_mut("data").and_then(Value::as_array_mut) {
            for event in events {
                mirror_video_timestamp(event);
            }
        }
    }
    Ok(doc)
}

fn mirror_video_timestamp(event: &mut Value) {
    let Some(obj) = event.as_object_mut() else {
        return;
    };
    if let Some(stamp) = obj.get("videoTimeMs").cloned() {
        obj.insert("video_timestamp".to_string(), stamp);
    }
}

/// Returns a copy of `value` with every `html` field removed, at any
/// depth. Everything else is preserved verbatim.
pub fn without_html(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                if key == "html" {
                    continue;
                }
                out.insert(key.clone(), without_html(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(without_html).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{EventPayload, HtmlCapturePayload};

    fn click_at(ts: u64) -> EventRecord {
        let mut record = EventRecord {
            kind: "click".into(),
            timestamp: ts,
            url: "https://shop.test/a".into(),
            ..Default::default()
        };
        record.align_to_video(500);
        record
    }

    fn capture_at(ts: u64) -> EventRecord {
        EventRecord {
            kind: "htmlCapture".into(),
            timestamp: ts,
            url: "https://shop.test/a".into(),
            payload: EventPayload::HtmlCapture(HtmlCapturePayload {
                event_type: "load".into(),
                document_key: Some("task_t1_doc_1".into()),
                html: Some("<html><body>big</body></html>".into()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_trace_document_adds_duration_and_video_mirrors() {
        let payload = build_payload(
            "t1",
            4_250,
            "https://shop.test/a".into(),
            "https://shop.test/b".into(),
            vec![click_at(1_700)],
            Some("/tmp/video.webm".into()),
            None,
        );
        let doc = trace_document(&payload).unwrap();

        assert_eq!(doc["task"], "t1");
        assert_eq!(doc["durationSeconds"], 5);
        assert_eq!(doc["events_recorded"], 1);
        let event = &doc["data"][0];
        assert_eq!(event["videoTimeMs"], 1_200);
        assert_eq!(event["video_timestamp"], 1_200);
        assert_eq!(event["video_event_start_ms"], 1_200);
    }

    #[test]
    fn test_unaligned_events_get_no_video_mirror() {
        let record = EventRecord {
            kind: "click".into(),
            timestamp: 1_200,
            ..Default::default()
        };
        let payload = build_payload("t1", 500, "a".into(), "a".into(), vec![record], None, None);
        let doc = trace_document(&payload).unwrap();
        let event = &doc["data"][0];
        assert!(event.get("videoTimeMs").is_none());
        assert!(event.get("video_timestamp").is_none());
    }

    #[test]
    fn test_without_html_strips_at_every_depth() {
        let payload = build_payload(
            "t1",
            1_000,
            "a".into(),
            "b".into(),
            vec![capture_at(100), click_at(200)],
            None,
            None,
        );
        let doc = trace_document(&payload).unwrap();
        assert!(doc["data"][0].get("html").is_some());

        let stripped = without_html(&doc);
        assert!(stripped["data"][0].get("html").is_none());
        assert_eq!(stripped["data"][0]["documentKey"], "task_t1_doc_1");
        assert_eq!(stripped["data"][1]["type"], "click");
        assert_eq!(stripped["durationSeconds"], 1);
    }
}
