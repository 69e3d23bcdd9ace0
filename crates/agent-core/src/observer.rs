//! Produces an immutable `UiState` snapshot: accessibility-tree extraction,
//! depth-first parse, element-type inference, and conditional overlay
//! capture (spec.md §4.B).
//!
//! The observer is pure with respect to the device: two snapshots taken in
//! the same UI state must be semantically equivalent modulo timestamps and
//! transient transitions.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::device::DeviceSession;
use crate::errors::ObserverError;
use crate::overlay;
use crate::types::{Bounds, CaptureMode, DeviceInfo, ElementType, UiElement, UiState};

static BOUNDS_RE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("static regex is valid")
});

/// Minimal tag + attribute shape extracted from one XML-like element line.
/// A dedicated struct rather than a full XML DOM keeps the parser small and
/// matches what the accessibility dump actually is: a flat sequence of
/// self-describing `<node .../>` tags (Android `uiautomator` dump shape).
struct RawNode {
    attrs: HashMap<String, String>,
}

/// Parse the raw accessibility dump into a depth-first sequence of
/// `UiElement`s. Deliberately tolerant: a node missing an attribute gets a
/// sane default rather than aborting the whole parse, since a single
/// malformed node must not cost the rest of the tree (spec.md §4.B step 1:
/// "on parse failure, return an empty sequence but keep the raw source").
fn parse_elements(xml: &str) -> Vec<UiElement> {
    let attr_re = Regex::new(r#"(\w[\w:-]*)="([^"]*)""#).expect("static regex is valid");
    let mut elements = Vec::new();
    let mut next_id: u64 = 0;

    for line in xml.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("<node") && !trimmed.starts_with("<Node") {
            continue;
        }
        let mut attrs = HashMap::new();
        for cap in attr_re.captures_iter(trimmed) {
            attrs.insert(cap[1].to_string(), cap[2].to_string());
        }
        let node = RawNode { attrs };
        next_id += 1;
        elements.push(to_ui_element(next_id.to_string(), &node));
    }
    elements
}

fn bool_attr(attrs: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match attrs.get(key).map(|s| s.as_str()) {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

fn parse_bounds(attrs: &HashMap<String, String>) -> Option<Bounds> {
    let raw = attrs.get("bounds")?;
    let caps = BOUNDS_RE.captures(raw)?;
    Some(Bounds {
        x1: caps[1].parse().ok()?,
        y1: caps[2].parse().ok()?,
        x2: caps[3].parse().ok()?,
        y2: caps[4].parse().ok()?,
    })
}

fn to_ui_element(element_id: String, node: &RawNode) -> UiElement {
    let class_name = node.attrs.get("class").cloned();
    let element_type = class_name
        .as_deref()
        .map(ElementType::infer)
        .unwrap_or(ElementType::Unknown);

    UiElement {
        element_id,
        text: node.attrs.get("text").cloned().unwrap_or_default(),
        resource_id: node.attrs.get("resource-id").cloned(),
        class_name,
        content_desc: node.attrs.get("content-desc").cloned(),
        bounds: parse_bounds(&node.attrs),
        element_type,
        clickable: bool_attr(&node.attrs, "clickable", false),
        scrollable: bool_attr(&node.attrs, "scrollable", false),
        focusable: bool_attr(&node.attrs, "focusable", false),
        long_clickable: bool_attr(&node.attrs, "long-clickable", false),
        checked: bool_attr(&node.attrs, "checked", false),
        // enabled and visible default to true when unspecified (spec.md
        // §4.B step 2).
        enabled: bool_attr(&node.attrs, "enabled", true),
        visible: bool_attr(&node.attrs, "visible-to-user", true),
    }
}

/// Takes one immutable `UiState` snapshot (spec.md §4.B).
pub struct UiObserver<'a> {
    device: &'a dyn DeviceSession,
}

impl<'a> UiObserver<'a> {
    pub fn new(device: &'a dyn DeviceSession) -> Self {
        Self { device }
    }

    pub async fn snapshot(&self, mode: CaptureMode, grid_size: u32) -> Result<UiState, ObserverError> {
        let xml = self
            .device
            .get_page_source()
            .await
            .unwrap_or_else(|e| {
                warn!("accessibility dump failed, continuing with empty tree: {e}");
                String::new()
            });

        let elements = if xml.is_empty() {
            Vec::new()
        } else {
            parse_elements(&xml)
        };

        let activity = self
            .device
            .get_current_activity()
            .await
            .unwrap_or_else(|_| "Unknown".to_string());

        let device_info = {
            let caps = self.device.capabilities();
            DeviceInfo {
                platform: caps.platform_name,
                platform_version: caps.platform_version,
                device_name: caps.device_name,
            }
        };

        let mut state = UiState {
            activity,
            elements,
            xml_source: xml,
            screenshot_base64: None,
            tag_mapping: None,
            grid_map: None,
            device_info,
            timestamp: chrono::Utc::now(),
        };

        if mode == CaptureMode::None {
            return Ok(state);
        }

        let screenshot = self
            .device
            .take_screenshot()
            .await
            .map_err(ObserverError::Transport)?;

        match mode {
            CaptureMode::None => unreachable!(),
            CaptureMode::Screenshot => {
                state.screenshot_base64 = Some(screenshot);
            }
            CaptureMode::Tagged => {
                let window = self
                    .device
                    .get_window_size()
                    .await
                    .map_err(ObserverError::Transport)?;
                let (overlaid, mapping) =
                    overlay::numeric_tag_overlay(&screenshot, window, &state.elements)?;
                debug!("tagged overlay produced {} tags", mapping.len());
                state.screenshot_base64 = Some(overlaid);
                state.tag_mapping = Some(mapping);
            }
            CaptureMode::Grid => {
                let window = self
                    .device
                    .get_window_size()
                    .await
                    .map_err(ObserverError::Transport)?;
                let (overlaid, grid_map) = overlay::grid_overlay(&screenshot, window, grid_size)?;
                state.screenshot_base64 = Some(overlaid);
                state.grid_map = Some(grid_map);
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"
        <hierarchy>
          <node index="0" text="" resource-id="" class="android.widget.FrameLayout" clickable="false" bounds="[0,0][1080,2280]" />
          <node index="1" text="Login" resource-id="com.app:id/login_btn" class="android.widget.Button" clickable="true" enabled="true" visible-to-user="true" bounds="[100,200][300,260]" />
          <node index="2" text="" resource-id="com.app:id/spinner" class="android.widget.ProgressBar" clickable="false" visible-to-user="false" />
        </hierarchy>
    "#;

    #[test]
    fn parses_elements_depth_first_with_sequential_ids() {
        let elements = parse_elements(SAMPLE_XML);
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].element_id, "1");
        assert_eq!(elements[1].element_id, "2");
        assert_eq!(elements[1].text, "Login");
        assert!(elements[1].clickable);
        assert_eq!(elements[1].element_type, ElementType::Button);
    }

    #[test]
    fn bounds_less_element_is_not_coordinate_targetable() {
        let elements = parse_elements(SAMPLE_XML);
        let progress = &elements[2];
        assert!(progress.bounds.is_none());
        assert!(!progress.is_coordinate_targetable());
        // visible defaults to true even though this node set it false
        // explicitly to false here - confirm explicit false is honored.
        assert!(!progress.visible);
    }

    #[test]
    fn enabled_and_visible_default_true_when_unspecified() {
        let xml = r#"<node class="android.widget.Button" clickable="true" bounds="[0,0][10,10]" />"#;
        let elements = parse_elements(xml);
        assert!(elements[0].enabled);
        assert!(elements[0].visible);
    }

    #[test]
    fn malformed_bounds_yields_no_bounds_not_a_parse_abort() {
        let xml = r#"<node class="android.widget.Button" clickable="true" bounds="garbage" />
                     <node class="android.widget.TextView" text="still parsed" />"#;
        let elements = parse_elements(xml);
        assert_eq!(elements.len(), 2);
        assert!(elements[0].bounds.is_none());
        assert_eq!(elements[1].text, "still parsed");
    }
}
