//! Capture rule set.
//!
//! Controls which DOM events are recorded and how each one is handled.
//! Loaded fresh from disk on every read so an operator can adjust rules
//! between sessions without restarting anything. User values deep-merge
//! onto defaults: nested objects merge key by key, arrays and scalars
//! replace.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::utils::errors::{EngineError, Result};

/// How a DOM event kind is turned into recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandlerKind {
    /// Record every accepted occurrence.
    Record,
    /// Trailing debounce keyed by target, gated on value change.
    DebouncedInput,
    /// Trailing debounce keyed by target for scroll streams.
    DebouncedScroll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomEventRule {
    pub name: String,
    pub enabled: bool,
    pub handler: HandlerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationRule {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverRules {
    /// Watch for dynamically added frames and late subtrees.
    pub dynamic_dom: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlCaptureRules {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub dom_events: Vec<DomEventRule>,
    pub navigation_events: Vec<NavigationRule>,
    pub observers: ObserverRules,
    pub html_capture: HtmlCaptureRules,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let rule = |name: &str, enabled: bool, handler: HandlerKind| DomEventRule {
            name: name.to_string(),
            enabled,
            handler,
        };
        Self {
            dom_events: vec![
                rule("click", true, HandlerKind::Record),
                rule("dblclick", true, HandlerKind::Record),
                rule("pointerdown", true, HandlerKind::Record),
                rule("mousedown", true, HandlerKind::Record),
                rule("mouseup", true, HandlerKind::Record),
                rule("keydown", true, HandlerKind::Record),
                rule("input", true, HandlerKind::DebouncedInput),
                rule("change", true, HandlerKind::Record),
                rule("submit", true, HandlerKind::Record),
                rule("scroll", true, HandlerKind::DebouncedScroll),
                rule("selectstart", true, HandlerKind::Record),
                rule("focus", false, HandlerKind::Record),
                rule("mouseover", false, HandlerKind::Record),
            ],
            navigation_events: vec![
                NavigationRule {
                    name: "popstate".to_string(),
                    enabled: true,
                },
                NavigationRule {
                    name: "pushState".to_string(),
                    enabled: true,
                },
                NavigationRule {
                    name: "replaceState".to_string(),
                    enabled: true,
                },
                NavigationRule {
                    name: "beforeunload".to_string(),
                    enabled: true,
                },
            ],
            observers: ObserverRules { dynamic_dom: true },
            html_capture: HtmlCaptureRules { enabled: true },
        }
    }
}

impl CaptureConfig {
    /// Reads the rule file and merges it onto defaults. A missing file
    /// yields plain defaults; malformed JSON is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "capture config missing, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let user: Value = serde_json::from_str(&raw)
            .map_err(|e| EngineError::ConfigError(format!("capture config parse: {e}")))?;
        Self::from_overrides(user)
    }

    /// Merges a JSON override object onto defaults.
    pub fn from_overrides(user: Value) -> Result<Self> {
        let mut base = serde_json::to_value(Self::default())?;
        deep_merge(&mut base, user);
        let merged: Self = serde_json::from_value(base)
            .map_err(|e| EngineError::ConfigError(format!("capture config shape: {e}")))?;
        Ok(merged)
    }

    /// DOM event names currently enabled, with their handler kinds.
    pub fn enabled_dom_events(&self) -> Vec<(String, HandlerKind)> {
        self.dom_events
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.name.clone(), r.handler))
            .collect()
    }

    pub fn handler_for(&self, name: &str) -> Option<HandlerKind> {
        self.dom_events
            .iter()
            .find(|r| r.name == name && r.enabled)
            .map(|r| r.handler)
    }

    pub fn enabled_navigation_events(&self) -> Vec<String> {
        self.navigation_events
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn navigation_enabled(&self, name: &str) -> bool {
        self.navigation_events
            .iter()
            .any(|r| r.enabled && r.name == name)
    }

    pub fn dynamic_dom(&self) -> bool {
        self.observers.dynamic_dom
    }

    pub fn html_capture_enabled(&self) -> bool {
        self.html_capture.enabled
    }

    /// Handler lookup table keyed by event name.
    pub fn handler_map(&self) -> HashMap<String, HandlerKind> {
        self.enabled_dom_events().into_iter().collect()
    }
}

/// Recursive merge: objects merge per key, everything else replaces.
fn deep_merge(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Object(base_map), Value::Object(user_map)) => {
            for (k, v) in user_map {
                match base_map.get_mut(&k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, user) => {
            if slot.is_object() && !user.is_object() {
                warn!("config override replaces object with scalar");
            }
            *slot = user;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults_enable_core_interaction_events() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.handler_for("click"), Some(HandlerKind::Record));
        assert_eq!(cfg.handler_for("input"), Some(HandlerKind::DebouncedInput));
        assert_eq!(cfg.handler_for("scroll"), Some(HandlerKind::DebouncedScroll));
        assert_eq!(cfg.handler_for("mouseover"), None);
        assert!(cfg.navigation_enabled("pushState"));
        assert!(cfg.html_capture_enabled());
    }

    #[test]
    fn test_overrides_deep_merge_objects_and_replace_arrays() {
        let cfg = CaptureConfig::from_overrides(json!({
            "observers": {"dynamicDom": false},
            "domEvents": [
                {"name": "click", "enabled": true, "handler": "record"}
            ]
        }))
        .unwrap();
        // Nested object merged without touching htmlCapture.
        assert!(!cfg.dynamic_dom());
        assert!(cfg.html_capture_enabled());
        // Array replaced wholesale.
        assert_eq!(cfg.dom_events.len(), 1);
        assert_eq!(cfg.handler_for("input"), None);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CaptureConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.dom_events.len(), CaptureConfig::default().dom_events.len());
    }

    #[test]
    fn test_load_reads_fresh_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");

        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", json!({"htmlCapture": {"enabled": false}})).unwrap();
        drop(f);
        let first = CaptureConfig::load_from(&path).unwrap();
        assert!(!first.html_capture_enabled());

        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", json!({"htmlCapture": {"enabled": true}})).unwrap();
        drop(f);
        let second = CaptureConfig::load_from(&path).unwrap();
        assert!(second.html_capture_enabled());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(CaptureConfig::load_from(&path).is_err());
    }
}
