//! Distills a raw event stream into replayable key actions.
//!
//! A session trace interleaves page observations (`htmlCapture`) with
//! fine-grained interaction events. Task mining wants neither: it wants
//! one action per user intent, each tied to the page state the user was
//! looking at. The pipeline here splits the stream, collapses
//! consecutive events on the same element into a single key event, maps
//! key events to replay actions, and pairs each action with the closest
//! preceding observation.

use serde::Serialize;

use crate::capture::identity::MARKER_ATTR;
use crate::capture::{EventPayload, EventRecord};
use crate::ingest::SessionPayload;

/// A replayable action distilled from one element's event run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayAction {
    Fill { data_bid: String, value: String },
    SelectOption { data_bid: String, option: String },
    Click { data_bid: String },
}

impl ReplayAction {
    pub fn data_bid(&self) -> &str {
        match self {
            ReplayAction::Fill { data_bid, .. }
            | ReplayAction::SelectOption { data_bid, .. }
            | ReplayAction::Click { data_bid } => data_bid,
        }
    }
}

/// Role, accessible name, and tag of the acted-on element.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ElementInfo {
    pub role: String,
    pub name: String,
    pub tag: String,
}

/// One distilled action in task order.
#[derive(Debug, Clone, Serialize)]
pub struct KeyEvent {
    pub step: usize,
    #[serde(flatten)]
    pub action: ReplayAction,
    pub timestamp: u64,
    pub url: String,
    pub event_type: String,
    pub element: ElementInfo,
}

/// The observation backing one trajectory step.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationRef {
    pub timestamp: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_key: Option<String>,
    pub html_length: usize,
}

/// An action paired with the page state it was performed against.
#[derive(Debug, Clone, Serialize)]
pub struct PairedStep {
    pub step: usize,
    pub action: ReplayAction,
    /// Whether the action's bid is present in the paired observation.
    pub bid_found_in_html: bool,
    pub event_type: String,
    pub event_timestamp: u64,
    pub element: ElementInfo,
    pub observation: ObservationRef,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DistillStats {
    pub raw_events: usize,
    pub observations: usize,
    pub key_events: usize,
    pub pairs: usize,
    pub valid_pairs: usize,
}

/// Full distillation output for one task.
#[derive(Debug, Clone, Serialize)]
pub struct DistilledTrace {
    pub task: String,
    pub start_url: String,
    pub end_url: String,
    pub duration_seconds: u64,
    pub stats: DistillStats,
    pub actions: Vec<KeyEvent>,
    pub trajectory: Vec<PairedStep>,
}

/// Distills a finalized payload into key actions and a paired
/// trajectory.
pub fn distill(payload: &SessionPayload) -> DistilledTrace {
    let mut observations: Vec<&EventRecord> =
        payload.data.iter().filter(|r| r.is_html_capture()).collect();
    let mut interactions: Vec<&EventRecord> =
        payload.data.iter().filter(|r| !r.is_html_capture()).collect();
    // The stream is emission-ordered; pairing wants timeline order.
    observations.sort_by_key(|r| r.timestamp);
    interactions.sort_by_key(|r| r.timestamp);

    let chosen = combine_runs(&interactions);
    let pairs = pair_closest_before(&chosen, &observations);

    let mut actions = Vec::new();
    for &record in &chosen {
        let Some(action) = action_for(record) else {
            continue;
        };
        actions.push(KeyEvent {
            step: actions.len() + 1,
            action,
            timestamp: record.timestamp,
            url: record.url.clone(),
            event_type: record.kind.clone(),
            element: element_info(record),
        });
    }

    let mut valid_pairs = 0usize;
    let mut trajectory = Vec::new();
    for (observation, event) in &pairs {
        let Some(action) = action_for(event) else {
            continue;
        };
        let found = observation_html(observation)
            .map(|html| bid_in_html(html, action.data_bid()))
            .unwrap_or(false);
        if found {
            valid_pairs += 1;
        }
        trajectory.push(PairedStep {
            step: trajectory.len() + 1,
            action,
            bid_found_in_html: found,
            event_type: event.kind.clone(),
            event_timestamp: event.timestamp,
            element: element_info(event),
            observation: observation_ref(observation),
        });
    }

    DistilledTrace {
        task: payload.task.clone(),
        start_url: payload.start_url.clone(),
        end_url: payload.end_url.clone(),
        duration_seconds: payload.duration_seconds(),
        stats: DistillStats {
            raw_events: interactions.len(),
            observations: observations.len(),
            key_events: chosen.len(),
            pairs: pairs.len(),
            valid_pairs,
        },
        actions,
        trajectory,
    }
}

/// Collapses consecutive interactions on the same bid into one chosen
/// record per run. Targetless or unidentified events never form runs.
fn combine_runs<'a>(interactions: &[&'a EventRecord]) -> Vec<&'a EventRecord> {
    let mut chosen = Vec::new();
    let mut run: Vec<&'a EventRecord> = Vec::new();
    for &record in interactions {
        let Some(target) = record.target.as_ref() else {
            continue;
        };
        if target.bid.is_empty() {
            continue;
        }
        let same_run = run
            .last()
            .and_then(|r| r.target.as_ref())
            .is_some_and(|t| t.bid == target.bid);
        if !same_run && !run.is_empty() {
            chosen.extend(choose(&run));
            run.clear();
        }
        run.push(record);
    }
    if !run.is_empty() {
        chosen.extend(choose(&run));
    }
    chosen
}

/// Picks the representative event of one same-bid run.
///
/// Text fields keep the last `input` event provided the run actually
/// typed something; selects keep the last click; everything else keeps
/// the last committing event. Runs with no committing event (hover
/// noise, lone keydowns) produce nothing.
fn choose<'a>(run: &[&'a EventRecord]) -> Option<&'a EventRecord> {
    let tag = run
        .first()
        .and_then(|r| r.target.as_ref())
        .map(|t| t.tag.to_ascii_lowercase())
        .unwrap_or_default();
    match tag.as_str() {
        "input" | "textarea" => {
            let mut typed = String::new();
            let mut last = None;
            for &record in run {
                if record.kind != "input" {
                    continue;
                }
                if let EventPayload::Input(p) = &record.payload {
                    if let Some(data) = &p.data {
                        typed.push_str(data);
                    }
                }
                last = Some(record);
            }
            if typed.is_empty() {
                None
            } else {
                last
            }
        }
        "select" => run.iter().rev().find(|r| r.kind == "click").copied(),
        _ => run
            .iter()
            .rev()
            .find(|r| matches!(r.kind.as_str(), "click" | "submit" | "pointerdown"))
            .copied(),
    }
}

/// For each key event, the latest observation strictly before it (or
/// the earliest observation when none precedes it).
fn pair_closest_before<'a>(
    key_events: &[&'a EventRecord],
    observations: &[&'a EventRecord],
) -> Vec<(&'a EventRecord, &'a EventRecord)> {
    let mut pairs = Vec::new();
    let mut j = 0usize;
    for &event in key_events {
        while j + 1 < observations.len() && observations[j + 1].timestamp < event.timestamp {
            j += 1;
        }
        if let Some(&observation) = observations.get(j) {
            pairs.push((observation, event));
        }
    }
    pairs
}

fn action_for(record: &EventRecord) -> Option<ReplayAction> {
    let target = record.target.as_ref()?;
    let data_bid = target.bid.clone();
    Some(match target.tag.to_ascii_lowercase().as_str() {
        "select" => ReplayAction::SelectOption {
            data_bid,
            option: target.value.clone(),
        },
        "input" | "textarea" => ReplayAction::Fill {
            data_bid,
            value: target.value.clone(),
        },
        _ => ReplayAction::Click { data_bid },
    })
}

fn element_info(record: &EventRecord) -> ElementInfo {
    let Some(target) = record.target.as_ref() else {
        return ElementInfo::default();
    };
    ElementInfo {
        role: target.a11y.role.clone().unwrap_or_default(),
        name: target.a11y.name.clone().unwrap_or_default(),
        tag: target.tag.clone(),
    }
}

fn observation_html(record: &EventRecord) -> Option<&str> {
    match &record.payload {
        EventPayload::HtmlCapture(p) => p.html.as_deref(),
        _ => None,
    }
}

fn observation_ref(record: &EventRecord) -> ObservationRef {
    let (document_key, html_length) = match &record.payload {
        EventPayload::HtmlCapture(p) => (
            p.document_key.clone(),
            p.html.as_ref().map(String::len).unwrap_or(0),
        ),
        _ => (None, 0),
    };
    ObservationRef {
        timestamp: record.timestamp,
        url: record.url.clone(),
        video_timestamp: record.video_time_ms,
        document_key,
        html_length,
    }
}

/// Serializer output always double-quotes attributes, so a plain
/// substring probe is exact.
fn bid_in_html(html: &str, bid: &str) -> bool {
    html.contains(&format!("{MARKER_ATTR}=\"{bid}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{A11yInfo, HtmlCapturePayload, InputPayload, TargetInfo};

    fn target(bid: &str, tag: &str, value: &str) -> TargetInfo {
        TargetInfo {
            tag: tag.into(),
            value: value.into(),
            bid: bid.into(),
            a11y: A11yInfo {
                role: Some("button".into()),
                name: Some("Buy".into()),
                tag: tag.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn interaction(kind: &str, ts: u64, bid: &str, tag: &str) -> EventRecord {
        EventRecord {
            kind: kind.into(),
            timestamp: ts,
            url: "https://shop.test/a".into(),
            target: Some(target(bid, tag, "")),
            ..Default::default()
        }
    }

    fn typed_input(ts: u64, bid: &str, value: &str, data: Option<&str>) -> EventRecord {
        EventRecord {
            kind: "input".into(),
            timestamp: ts,
            url: "https://shop.test/a".into(),
            target: Some(target(bid, "INPUT", value)),
            payload: EventPayload::Input(InputPayload {
                data: data.map(str::to_string),
                value: value.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn observation(ts: u64, html: &str) -> EventRecord {
        EventRecord {
            kind: "htmlCapture".into(),
            timestamp: ts,
            url: "https://shop.test/a".into(),
            payload: EventPayload::HtmlCapture(HtmlCapturePayload {
                event_type: "load".into(),
                document_key: None,
                html: Some(html.into()),
            }),
            ..Default::default()
        }
    }

    fn payload(data: Vec<EventRecord>) -> SessionPayload {
        SessionPayload {
            task: "t1".into(),
            duration: 5_000,
            events_recorded: data.len() as u64,
            start_url: "https://shop.test/a".into(),
            end_url: "https://shop.test/b".into(),
            data,
            video_local_path: None,
            video_server_path: None,
        }
    }

    #[test]
    fn test_click_fill_click_becomes_three_actions() {
        let html = r#"<button data-bid="m1"></button><input data-bid="m2"><a data-bid="m3"></a>"#;
        let trace = distill(&payload(vec![
            observation(50, html),
            interaction("click", 100, "m1", "BUTTON"),
            typed_input(200, "m2", "a", Some("a")),
            typed_input(250, "m2", "ab", Some("b")),
            interaction("click", 300, "m3", "A"),
        ]));

        assert_eq!(trace.stats.key_events, 3);
        assert_eq!(trace.actions.len(), 3);
        assert_eq!(trace.actions[0].action, ReplayAction::Click { data_bid: "m1".into() });
        assert_eq!(
            trace.actions[1].action,
            ReplayAction::Fill { data_bid: "m2".into(), value: "ab".into() }
        );
        assert_eq!(trace.actions[1].timestamp, 250);
        assert_eq!(trace.actions[2].step, 3);
        assert_eq!(trace.stats.valid_pairs, 3);
        assert_eq!(trace.duration_seconds, 5);
    }

    #[test]
    fn test_consecutive_same_bid_clicks_collapse() {
        let trace = distill(&payload(vec![
            interaction("pointerdown", 100, "m1", "BUTTON"),
            interaction("click", 120, "m1", "BUTTON"),
            interaction("click", 400, "m1", "BUTTON"),
        ]));
        assert_eq!(trace.actions.len(), 1);
        assert_eq!(trace.actions[0].timestamp, 400);
    }

    #[test]
    fn test_select_keeps_last_click_and_maps_to_select_option() {
        let mut change = interaction("change", 130, "m1", "SELECT");
        if let Some(t) = change.target.as_mut() {
            t.value = "Large".into();
        }
        let mut click = interaction("click", 120, "m1", "SELECT");
        if let Some(t) = click.target.as_mut() {
            t.value = "Large".into();
        }
        let trace = distill(&payload(vec![
            interaction("pointerdown", 100, "m1", "SELECT"),
            click,
            change,
        ]));
        assert_eq!(trace.actions.len(), 1);
        assert_eq!(trace.actions[0].timestamp, 120);
        assert_eq!(
            trace.actions[0].action,
            ReplayAction::SelectOption { data_bid: "m1".into(), option: "Large".into() }
        );
    }

    #[test]
    fn test_input_run_without_typed_data_is_dropped() {
        let trace = distill(&payload(vec![
            typed_input(100, "m2", "", None),
            interaction("keydown", 120, "m2", "INPUT"),
        ]));
        assert!(trace.actions.is_empty());
        assert_eq!(trace.stats.key_events, 0);
    }

    #[test]
    fn test_hover_only_run_is_dropped() {
        let trace = distill(&payload(vec![
            interaction("mouseover", 100, "m1", "DIV"),
            interaction("mouseover", 150, "m1", "DIV"),
        ]));
        assert!(trace.actions.is_empty());
    }

    #[test]
    fn test_pairs_with_closest_preceding_observation() {
        let trace = distill(&payload(vec![
            observation(50, r#"<b data-bid="m1"></b>"#),
            observation(250, r#"<b data-bid="m2"></b>"#),
            interaction("click", 200, "m1", "BUTTON"),
            interaction("click", 300, "m2", "BUTTON"),
        ]));
        assert_eq!(trace.trajectory.len(), 2);
        assert_eq!(trace.trajectory[0].observation.timestamp, 50);
        assert_eq!(trace.trajectory[1].observation.timestamp, 250);
        assert!(trace.trajectory[0].bid_found_in_html);
        assert!(trace.trajectory[1].bid_found_in_html);
        assert_eq!(trace.stats.valid_pairs, 2);
    }

    #[test]
    fn test_missing_bid_in_observation_is_flagged() {
        let trace = distill(&payload(vec![
            observation(50, r#"<b data-bid="other"></b>"#),
            interaction("click", 200, "m1", "BUTTON"),
        ]));
        assert_eq!(trace.trajectory.len(), 1);
        assert!(!trace.trajectory[0].bid_found_in_html);
        assert_eq!(trace.stats.valid_pairs, 0);
    }

    #[test]
    fn test_wire_shape_of_actions() {
        let trace = distill(&payload(vec![
            observation(50, r#"<input data-bid="m2">"#),
            typed_input(100, "m2", "abc", Some("abc")),
        ]));
        let v = serde_json::to_value(&trace.actions[0]).unwrap();
        assert_eq!(v["action"], "fill");
        assert_eq!(v["data_bid"], "m2");
        assert_eq!(v["value"], "abc");
        assert_eq!(v["step"], 1);
        assert_eq!(v["element"]["tag"], "INPUT");
    }
}
