//! Structural verification of archived trace documents.
//!
//! Each check produces a named pass/fail result with a human-readable
//! message and machine-readable details; the report aggregates them.
//! Thresholds are tolerant because a live capture session legitimately
//! produces the occasional out-of-order timestamp or unidentified
//! target.

use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

/// Event types the engine emits. Anything else in a trace is suspect.
const VALID_EVENT_TYPES: &[&str] = &[
    "click",
    "dblclick",
    "pointerdown",
    "pointerup",
    "mousedown",
    "mouseup",
    "keydown",
    "keyup",
    "keypress",
    "input",
    "change",
    "submit",
    "focus",
    "blur",
    "mouseover",
    "scroll",
    "selectstart",
    "popstate",
    "pushState",
    "replaceState",
    "beforeunload",
    "load",
    "unload",
    "htmlCapture",
];

const REQUIRED_TOP_LEVEL_FIELDS: &[&str] = &["task", "data", "start_url"];
const REQUIRED_EVENT_FIELDS: &[&str] = &["type", "timestamp"];
const REQUIRED_TARGET_FIELDS: &[&str] = &["bid", "tag"];

/// Share of malformed events a trace may contain and still pass.
const MAX_INVALID_EVENT_RATIO: f64 = 0.10;
/// Share of out-of-order timestamps tolerated.
const MAX_OUT_OF_ORDER_RATIO: f64 = 0.05;
/// Required share of targeted events carrying a non-empty bid.
const MIN_BID_COVERAGE: f64 = 0.90;
/// Required share of HTML captures that are usable.
const MIN_VALID_CAPTURE_RATIO: f64 = 0.80;
/// Required share of targeted events carrying accessibility data.
const MIN_A11Y_COVERAGE: f64 = 0.50;
/// Inline HTML shorter than this is considered a broken capture.
const MIN_VIABLE_HTML_LEN: usize = 100;

/// One verification check outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TraceCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Aggregated verification results for one trace document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceReport {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub warnings: Vec<String>,
    pub results: Vec<TraceCheck>,
}

impl TraceReport {
    pub fn is_valid(&self) -> bool {
        self.failed_checks == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.passed_checks as f64 / self.total_checks as f64 * 100.0
    }
}

/// Runs every check against an in-memory trace document.
pub fn verify_document(doc: &Value) -> TraceReport {
    let mut v = Verifier::default();
    v.check_top_level(doc);
    if v.check_events_array(doc) {
        v.check_event_schemas(doc);
        v.check_timestamps(doc);
        v.check_bids(doc);
        v.check_html_captures(doc);
        v.check_a11y(doc);
    }
    v.finish()
}

/// Reads and verifies a `trace.json` on disk. I/O and parse failures
/// become failing checks rather than errors, so the report always
/// exists.
pub fn verify_file(path: &Path) -> TraceReport {
    let mut v = Verifier::default();
    let bytes = match std::fs::read(path) {
        Ok(bytes) => {
            v.push("file exists", true, format!("trace found at {}", path.display()), Value::Null);
            bytes
        }
        Err(err) => {
            v.push("file exists", false, format!("cannot read {}: {err}", path.display()), Value::Null);
            return v.finish();
        }
    };
    let doc: Value = match serde_json::from_slice(&bytes) {
        Ok(doc) => {
            v.push("valid json", true, "trace parses as JSON".into(), Value::Null);
            doc
        }
        Err(err) => {
            v.push("valid json", false, format!("invalid JSON: {err}"), Value::Null);
            return v.finish();
        }
    };
    let mut report = verify_document(&doc);
    let mut results = v.results;
    results.append(&mut report.results);
    report.results = results;
    report.total_checks = report.results.len();
    report.passed_checks = report.results.iter().filter(|r| r.passed).count();
    report.failed_checks = report.total_checks - report.passed_checks;
    report
}

#[derive(Default)]
struct Verifier {
    results: Vec<TraceCheck>,
    warnings: Vec<String>,
}

impl Verifier {
    fn push(&mut self, name: &str, passed: bool, message: String, details: Value) {
        self.results.push(TraceCheck {
            name: name.to_string(),
            passed,
            message,
            details,
        });
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(self) -> TraceReport {
        let passed = self.results.iter().filter(|r| r.passed).count();
        TraceReport {
            total_checks: self.results.len(),
            passed_checks: passed,
            failed_checks: self.results.len() - passed,
            warnings: self.warnings,
            results: self.results,
        }
    }

    fn check_top_level(&mut self, doc: &Value) {
        let missing: Vec<&str> = REQUIRED_TOP_LEVEL_FIELDS
            .iter()
            .copied()
            .filter(|f| doc.get(f).is_none())
            .collect();
        let passed = missing.is_empty();
        let message = if passed {
            "all required fields present".to_string()
        } else {
            format!("missing fields: {missing:?}")
        };
        self.push("top-level structure", passed, message, json!({ "missing": missing }));
    }

    fn check_events_array(&mut self, doc: &Value) -> bool {
        let count = doc
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let passed = count > 0;
        let message = if passed {
            format!("{count} events")
        } else {
            "data is missing, not an array, or empty".to_string()
        };
        self.push("events array", passed, message, json!({ "event_count": count }));
        passed
    }

    fn check_event_schemas(&mut self, doc: &Value) {
        let events = events_of(doc);
        let mut invalid: Vec<Value> = Vec::new();
        let mut type_counts = serde_json::Map::new();
        let mut unknown_types = 0usize;

        for (idx, event) in events.iter().enumerate() {
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
            let slot = type_counts.entry(kind.to_string()).or_insert(json!(0));
            if let Some(n) = slot.as_u64() {
                *slot = json!(n + 1);
            }

            let mut missing: Vec<String> = REQUIRED_EVENT_FIELDS
                .iter()
                .filter(|f| event.get(**f).is_none())
                .map(|f| f.to_string())
                .collect();
            if !VALID_EVENT_TYPES.contains(&kind) {
                unknown_types += 1;
                missing.push(format!("unknown type {kind:?}"));
            }
            if kind != "htmlCapture" {
                if let Some(target) = event.get("target") {
                    for field in REQUIRED_TARGET_FIELDS {
                        if target.get(field).is_none() {
                            missing.push(format!("target.{field}"));
                        }
                    }
                }
            }
            if !missing.is_empty() {
                invalid.push(json!({ "index": idx, "type": kind, "problems": missing }));
            }
        }

        let ratio = ratio(invalid.len(), events.len());
        let passed = ratio < MAX_INVALID_EVENT_RATIO;
        let message = format!("{}/{} events valid", events.len() - invalid.len(), events.len());
        self.push(
            "event schemas",
            passed,
            message,
            json!({
                "invalid_events": invalid.len(),
                "unknown_types": unknown_types,
                "event_type_counts": Value::Object(type_counts),
                "sample_invalid": invalid.into_iter().take(5).collect::<Vec<_>>(),
            }),
        );
    }

    fn check_timestamps(&mut self, doc: &Value) {
        let timestamps: Vec<u64> = events_of(doc)
            .iter()
            .filter_map(|e| e.get("timestamp").and_then(Value::as_u64))
            .collect();
        if timestamps.is_empty() {
            self.push(
                "timestamp consistency",
                false,
                "no timestamps found".to_string(),
                Value::Null,
            );
            return;
        }

        let mut out_of_order = 0usize;
        let mut max_gap = 0u64;
        for pair in timestamps.windows(2) {
            if pair[1] < pair[0] {
                out_of_order += 1;
            } else {
                max_gap = max_gap.max(pair[1] - pair[0]);
            }
        }
        let ratio = ratio(out_of_order, timestamps.len());
        let passed = ratio < MAX_OUT_OF_ORDER_RATIO;
        let duration_ms = timestamps[timestamps.len() - 1].saturating_sub(timestamps[0]);
        self.push(
            "timestamp consistency",
            passed,
            format!("{out_of_order} of {} out of order", timestamps.len()),
            json!({
                "out_of_order": out_of_order,
                "duration_ms": duration_ms,
                "max_gap_ms": max_gap,
            }),
        );
    }

    fn check_bids(&mut self, doc: &Value) {
        let targeted = targeted_events(doc);
        let mut missing = 0usize;
        let mut empty = 0usize;
        let mut unique: Vec<String> = Vec::new();
        for event in &targeted {
            match event["target"].get("bid").and_then(Value::as_str) {
                None => missing += 1,
                Some("") => empty += 1,
                Some(bid) => {
                    if !unique.iter().any(|b| b == bid) {
                        unique.push(bid.to_string());
                    }
                }
            }
        }
        let valid = targeted.len() - missing - empty;
        let coverage = ratio(valid, targeted.len());
        let passed = targeted.is_empty() || coverage > MIN_BID_COVERAGE;
        self.push(
            "bid coverage",
            passed,
            format!("{valid}/{} targeted events carry a bid ({} unique)", targeted.len(), unique.len()),
            json!({
                "missing_bid": missing,
                "empty_bid": empty,
                "unique_bids": unique.len(),
                "sample_bids": unique.into_iter().take(10).collect::<Vec<_>>(),
            }),
        );
    }

    fn check_html_captures(&mut self, doc: &Value) {
        let captures: Vec<&Value> = events_of(doc)
            .iter()
            .filter(|e| e.get("type").and_then(Value::as_str) == Some("htmlCapture"))
            .copied()
            .collect();
        if captures.is_empty() {
            self.warn("no HTML captures in trace".to_string());
            self.push(
                "html captures",
                true,
                "no HTML captures (may be disabled)".to_string(),
                json!({ "capture_count": 0 }),
            );
            return;
        }

        let mut valid = 0usize;
        let mut offloaded = 0usize;
        let mut empty = 0usize;
        let mut total_bytes = 0usize;
        for capture in &captures {
            let html_len = capture
                .get("html")
                .and_then(Value::as_str)
                .map(str::len)
                .unwrap_or(0);
            if html_len > MIN_VIABLE_HTML_LEN {
                valid += 1;
                total_bytes += html_len;
            } else if capture.get("documentKey").is_some() {
                // Bytes live in the blob store under that key.
                offloaded += 1;
                valid += 1;
            } else {
                empty += 1;
            }
        }
        let passed = ratio(valid, captures.len()) > MIN_VALID_CAPTURE_RATIO;
        self.push(
            "html captures",
            passed,
            format!("{valid}/{} captures usable", captures.len()),
            json!({
                "capture_count": captures.len(),
                "offloaded": offloaded,
                "empty": empty,
                "inline_bytes": total_bytes,
            }),
        );
    }

    fn check_a11y(&mut self, doc: &Value) {
        let targeted = targeted_events(doc);
        let mut with_a11y = 0usize;
        let mut with_role = 0usize;
        let mut with_name = 0usize;
        for event in &targeted {
            let Some(a11y) = event["target"].get("a11y").and_then(Value::as_object) else {
                continue;
            };
            if a11y.is_empty() {
                continue;
            }
            with_a11y += 1;
            if a11y.get("role").and_then(Value::as_str).is_some_and(|r| !r.is_empty()) {
                with_role += 1;
            }
            if a11y.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty()) {
                with_name += 1;
            }
        }
        let coverage = ratio(with_a11y, targeted.len());
        let passed = targeted.is_empty() || coverage > MIN_A11Y_COVERAGE;
        self.push(
            "accessibility data",
            passed,
            format!("{with_a11y}/{} targeted events carry a11y data", targeted.len()),
            json!({
                "with_role": with_role,
                "with_name": with_name,
            }),
        );
    }
}

fn events_of(doc: &Value) -> Vec<&Value> {
    doc.get("data")
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

/// Non-capture events that carry a target object.
fn targeted_events(doc: &Value) -> Vec<&Value> {
    events_of(doc)
        .into_iter()
        .filter(|e| {
            e.get("type").and_then(Value::as_str) != Some("htmlCapture")
                && e.get("target").is_some()
        })
        .collect()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, ts: u64, bid: &str) -> Value {
        json!({
            "type": kind,
            "timestamp": ts,
            "sequenceNumber": 0,
            "url": "https://shop.test/a",
            "target": {
                "bid": bid,
                "tag": "BUTTON",
                "a11y": { "role": "button", "name": "Buy", "path": "", "tag": "BUTTON" }
            }
        })
    }

    fn capture(ts: u64) -> Value {
        json!({
            "type": "htmlCapture",
            "timestamp": ts,
            "url": "https://shop.test/a",
            "eventType": "load",
            "html": "x".repeat(500),
        })
    }

    fn good_trace() -> Value {
        json!({
            "task": "t1",
            "duration": 3000,
            "events_recorded": 3,
            "start_url": "https://shop.test/a",
            "end_url": "https://shop.test/b",
            "data": [capture(100), event("click", 200, "m1"), event("input", 300, "m2")],
        })
    }

    #[test]
    fn test_clean_trace_passes_every_check() {
        let report = verify_document(&good_trace());
        assert!(report.is_valid(), "failures: {:?}", report.results);
        assert_eq!(report.failed_checks, 0);
        assert!(report.success_rate() > 99.0);
    }

    #[test]
    fn test_missing_top_level_field_fails() {
        let mut doc = good_trace();
        doc.as_object_mut().unwrap().remove("start_url");
        let report = verify_document(&doc);
        let check = report.results.iter().find(|c| c.name == "top-level structure").unwrap();
        assert!(!check.passed);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_empty_events_short_circuits() {
        let mut doc = good_trace();
        doc["data"] = json!([]);
        let report = verify_document(&doc);
        assert!(!report.is_valid());
        // Per-event checks are skipped when there is nothing to inspect.
        assert!(report.results.iter().all(|c| c.name != "bid coverage"));
    }

    #[test]
    fn test_reversed_timestamps_fail_monotonicity() {
        let doc = json!({
            "task": "t1",
            "start_url": "a",
            "data": [event("click", 300, "m1"), event("click", 200, "m2"), event("click", 100, "m3")],
        });
        let report = verify_document(&doc);
        let check = report.results.iter().find(|c| c.name == "timestamp consistency").unwrap();
        assert!(!check.passed);
    }

    #[test]
    fn test_empty_bids_fail_coverage() {
        let doc = json!({
            "task": "t1",
            "start_url": "a",
            "data": [event("click", 100, ""), event("click", 200, "")],
        });
        let report = verify_document(&doc);
        let check = report.results.iter().find(|c| c.name == "bid coverage").unwrap();
        assert!(!check.passed);
        assert_eq!(check.details["empty_bid"], 2);
    }

    #[test]
    fn test_offloaded_capture_counts_as_usable() {
        let doc = json!({
            "task": "t1",
            "start_url": "a",
            "data": [
                { "type": "htmlCapture", "timestamp": 100, "eventType": "load",
                  "documentKey": "task_t1_doc_1" },
                event("click", 200, "m1"),
            ],
        });
        let report = verify_document(&doc);
        let check = report.results.iter().find(|c| c.name == "html captures").unwrap();
        assert!(check.passed);
        assert_eq!(check.details["offloaded"], 1);
    }

    #[test]
    fn test_absent_captures_pass_with_warning() {
        let doc = json!({
            "task": "t1",
            "start_url": "a",
            "data": [event("click", 100, "m1")],
        });
        let report = verify_document(&doc);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_unknown_event_type_flagged() {
        let doc = json!({
            "task": "t1",
            "start_url": "a",
            "data": [
                { "type": "teleport", "timestamp": 100 },
                event("click", 200, "m1"),
            ],
        });
        let report = verify_document(&doc);
        let check = report.results.iter().find(|c| c.name == "event schemas").unwrap();
        assert!(!check.passed);
        assert_eq!(check.details["unknown_types"], 1);
    }

    #[test]
    fn test_verify_file_reports_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        std::fs::write(&path, b"{not json").unwrap();
        let report = verify_file(&path);
        assert!(!report.is_valid());
        assert_eq!(report.results.len(), 2);
        assert!(report.results[1].name == "valid json" && !report.results[1].passed);

        let missing = verify_file(&dir.path().join("absent.json"));
        assert_eq!(missing.results.len(), 1);
        assert!(!missing.is_valid());
    }
}
