//! Finalized event records and their wire shape.
//!
//! Field names follow the trace format consumed downstream, camelCase
//! with a handful of historical snake_case video fields. Kind-specific
//! payloads flatten into the record object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::host::dom::Rect;
use crate::host::event::Modifiers;

/// Accessibility identifiers of a target element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A11yInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tag: String,
}

/// Element geometry mirrored into the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl From<Rect> for BoundingBox {
    fn from(r: Rect) -> Self {
        Self {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
            top: r.y,
            right: r.right(),
            bottom: r.bottom(),
            left: r.x,
        }
    }
}

/// Target element metadata carried on every interaction record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub text: String,
    pub value: String,
    pub is_interactive: bool,
    pub xpath: String,
    pub css_path: String,
    pub bid: String,
    pub a11y: A11yInfo,
    pub attributes: BTreeMap<String, String>,
    pub bounding_box: BoundingBox,
    #[serde(rename = "outerHTMLSnippet")]
    pub outer_html_snippet: String,
    #[serde(rename = "outerHTMLFull")]
    pub outer_html_full: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickPayload {
    pub x: f64,
    pub y: f64,
    pub screen_x: f64,
    pub screen_y: f64,
    pub button: i16,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardPayload {
    pub key: String,
    pub code: String,
    pub repeat: bool,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub value: String,
    pub old_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPayload {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub delta_y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPayload {
    pub category: String,
    pub from_url: String,
    pub to_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub from_user_input: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlCapturePayload {
    /// The DOM event that triggered this capture.
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_key: Option<String>,
    /// Inline bytes, present only between capture and blob offload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Kind-specific fields, flattened into the record object.
///
/// Untagged: deserialization picks the first variant whose required
/// fields are present, so variants are ordered most- to
/// least-discriminating. `Empty` matches anything and must stay last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    HtmlCapture(HtmlCapturePayload),
    Navigation(NavigationPayload),
    Input(InputPayload),
    Click(ClickPayload),
    Keyboard(KeyboardPayload),
    Scroll(ScrollPayload),
    Selection(SelectionPayload),
    Empty {},
}

impl Default for EventPayload {
    fn default() -> Self {
        EventPayload::Empty {}
    }
}

/// A finalized event as persisted and uploaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: u64,
    pub sequence_number: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,
    pub is_in_iframe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iframe_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_time_ms: Option<u64>,
    #[serde(rename = "video_event_start_ms", skip_serializing_if = "Option::is_none")]
    pub video_event_start_ms: Option<u64>,
    #[serde(rename = "video_event_end_ms", skip_serializing_if = "Option::is_none")]
    pub video_event_end_ms: Option<u64>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Frame context attached while building a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IframeInfo {
    pub iframe_url: String,
    pub top_url: Option<String>,
}

impl EventRecord {
    pub fn is_html_capture(&self) -> bool {
        self.kind == "htmlCapture"
    }

    /// Stamps video alignment: `max(0, timestamp - startedAt)` mirrored
    /// into the start/end range fields.
    pub fn align_to_video(&mut self, video_started_at_ms: u64) {
        let t = self.timestamp.saturating_sub(video_started_at_ms);
        self.video_time_ms = Some(t);
        self.video_event_start_ms = Some(t);
        self.video_event_end_ms = Some(t);
    }
}
