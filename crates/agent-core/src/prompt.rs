//! Tier-specific prompt templates and response-schema contracts (spec.md
//! §4.D). Kept as data - format strings plus a literal example response -
//! rather than code, so the prompts can be versioned and A/B tested
//! without touching the engine (spec.md §9 design note).

use crate::types::{UiElement, UiState};

/// Bounded action history injected into every tier prompt, per spec.md
/// §4.D. Owned by the session controller, which already tracks steps.
pub fn format_history(history: &[String]) -> String {
    if history.is_empty() {
        return "(no prior actions this session)".to_string();
    }
    history
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {h}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn element_line(e: &UiElement) -> String {
    let bounds = e
        .bounds
        .map(|b| format!("[{:.0},{:.0}][{:.0},{:.0}]", b.x1, b.y1, b.x2, b.y2))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "id={} text=\"{}\" type={:?} bounds={}",
        e.element_id, e.text, e.element_type, bounds
    )
}

/// Tier 1 (hierarchy): activity, platform, and the filtered
/// clickable-and-visible element list (spec.md §4.D table).
pub fn hierarchy_prompt(instruction: &str, state: &UiState, history: &[String]) -> String {
    let elements: String = state
        .clickable_visible()
        .map(|e| format!("- {}\n", element_line(e)))
        .collect();

    format!(
        "You are controlling a mobile UI through its accessibility tree.\n\
         Instruction: \"{instruction}\"\n\
         Current activity: {activity}\n\
         Platform: {platform}\n\n\
         Clickable, visible elements:\n{elements}\n\
         Recent actions this session:\n{history}\n\n\
         Respond with exactly one JSON object, no prose, matching this schema:\n\
         {{\"action\": \"click|type_text|swipe|scroll|...\", \"element_id\": \"<id from the list above, or null>\", \
         \"parameters\": {{}}, \"reasoning\": \"<why>\", \"confidence\": <0..1>}}\n\n\
         Example:\n\
         {{\"action\": \"click\", \"element_id\": \"7\", \"parameters\": {{}}, \
         \"reasoning\": \"element 7 is the labeled Login button\", \"confidence\": 0.95}}",
        activity = state.activity,
        platform = state.device_info.platform,
        history = format_history(history),
    )
}

/// Tier 2 (vision + numeric tags): the overlaid screenshot plus the
/// `"[id] label"` list (spec.md §4.D table).
pub fn tagged_prompt(instruction: &str, state: &UiState, history: &[String]) -> String {
    let tags: String = state
        .tag_mapping
        .as_ref()
        .map(|m| {
            let mut entries: Vec<_> = m.iter().collect();
            entries.sort_by_key(|(id, _)| **id);
            entries
                .into_iter()
                .map(|(id, el)| format!("- [{id}] {}\n", el.text))
                .collect()
        })
        .unwrap_or_default();

    format!(
        "You see a screenshot with numbered circles overlaid on clickable elements.\n\
         Instruction: \"{instruction}\"\n\n\
         Tags:\n{tags}\n\
         Recent actions this session:\n{history}\n\n\
         Respond with exactly one JSON object, no prose, matching this schema:\n\
         {{\"action\": \"click|type_text|swipe|scroll|...\", \"tag_id\": <integer>, \
         \"parameters\": {{}}, \"reasoning\": \"<why>\", \"confidence\": <0..1>}}\n\n\
         Example:\n\
         {{\"action\": \"click\", \"tag_id\": 2, \"parameters\": {{}}, \
         \"reasoning\": \"tag 2 is the circled Submit button\", \"confidence\": 0.85}}",
        history = format_history(history),
    )
}

/// Tier 3 (grid overlay): the `N x N` labeled grid screenshot (spec.md
/// §4.D table).
pub fn grid_prompt(instruction: &str, grid_size: u32, history: &[String]) -> String {
    format!(
        "You see a screenshot with a {grid_size}x{grid_size} lettered/numbered grid overlaid \
         (columns A.., rows 1..{grid_size}; a cell label is \"{{column}}{{row}}\", e.g. \"E5\").\n\
         Instruction: \"{instruction}\"\n\n\
         Recent actions this session:\n{history}\n\n\
         Respond with exactly one JSON object, no prose, matching this schema:\n\
         {{\"action\": \"click|type_text|swipe|scroll|...\", \"grid_position\": \"<cell label>\", \
         \"parameters\": {{}}, \"reasoning\": \"<why>\", \"confidence\": <0..1>}}\n\n\
         Example:\n\
         {{\"action\": \"click\", \"grid_position\": \"E5\", \"parameters\": {{}}, \
         \"reasoning\": \"the button sits in cell E5\", \"confidence\": 0.7}}",
        history = format_history(history),
    )
}

/// Tier 4 (pure vision): raw screenshot + screen dimensions (spec.md §4.D
/// table).
pub fn pure_vision_prompt(instruction: &str, width: u32, height: u32, history: &[String]) -> String {
    format!(
        "You see a raw screenshot of a mobile screen, {width}x{height} logical pixels.\n\
         Instruction: \"{instruction}\"\n\n\
         Recent actions this session:\n{history}\n\n\
         Respond with exactly one JSON object, no prose, matching this schema:\n\
         {{\"element\": \"<description of the target>\", \
         \"location\": {{\"x_percent\": <0..100>, \"y_percent\": <0..100>}}, \
         \"action\": \"click|type_text|swipe|scroll|...\", \"parameters\": {{}}, \
         \"reasoning\": \"<why>\", \"confidence\": <0..1>}}\n\n\
         Example:\n\
         {{\"element\": \"Login button\", \"location\": {{\"x_percent\": 50, \"y_percent\": 85}}, \
         \"action\": \"click\", \"parameters\": {{}}, \
         \"reasoning\": \"the login button sits near the bottom center\", \"confidence\": 0.75}}",
        history = format_history(history),
    )
}

/// Verification prompt: up to 50 visible elements plus the condition
/// (spec.md §4.D).
pub fn verification_prompt(condition: &str, state: &UiState) -> String {
    let elements: String = state
        .elements
        .iter()
        .filter(|e| e.visible)
        .take(50)
        .map(|e| format!("- {}\n", element_line(e)))
        .collect();

    format!(
        "Visible elements on screen (up to 50):\n{elements}\n\
         Condition to verify: \"{condition}\"\n\n\
         Respond with exactly one JSON object, no prose, matching this schema:\n\
         {{\"passed\": <bool>, \"assertions\": [\"<supporting observation>\", ...], \
         \"issues\": [\"<problem found>\", ...], \"confidence\": <0..1>}}\n\n\
         Example:\n\
         {{\"passed\": true, \"assertions\": [\"Home screen title is visible\"], \
         \"issues\": [], \"confidence\": 0.9}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureMode, DeviceInfo};
    use std::collections::HashMap;

    fn empty_state() -> UiState {
        UiState {
            activity: "MainActivity".into(),
            elements: Vec::new(),
            xml_source: String::new(),
            screenshot_base64: None,
            tag_mapping: None,
            grid_map: None,
            device_info: DeviceInfo {
                platform: "android".into(),
                platform_version: None,
                device_name: None,
            },
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn history_formats_empty_as_placeholder() {
        assert_eq!(format_history(&[]), "(no prior actions this session)");
    }

    #[test]
    fn hierarchy_prompt_includes_instruction_and_activity() {
        let p = hierarchy_prompt("tap login", &empty_state(), &[]);
        assert!(p.contains("tap login"));
        assert!(p.contains("MainActivity"));
        assert!(p.contains("\"element_id\""));
    }

    #[test]
    fn tagged_prompt_lists_tags_in_id_order() {
        let mut state = empty_state();
        let mut mapping = HashMap::new();
        mapping.insert(2u32, UiElement {
            element_id: "9".into(), text: "B".into(), resource_id: None, class_name: None,
            content_desc: None, bounds: None, element_type: crate::types::ElementType::Button,
            clickable: true, scrollable: false, focusable: true, long_clickable: false,
            checked: false, enabled: true, visible: true,
        });
        mapping.insert(1u32, UiElement {
            element_id: "7".into(), text: "A".into(), resource_id: None, class_name: None,
            content_desc: None, bounds: None, element_type: crate::types::ElementType::Button,
            clickable: true, scrollable: false, focusable: true, long_clickable: false,
            checked: false, enabled: true, visible: true,
        });
        state.tag_mapping = Some(mapping);
        let p = tagged_prompt("tap", &state, &[]);
        let pos_1 = p.find("[1] A").unwrap();
        let pos_2 = p.find("[2] B").unwrap();
        assert!(pos_1 < pos_2);
        let _ = CaptureMode::Tagged;
    }

    #[test]
    fn grid_prompt_mentions_configured_size() {
        let p = grid_prompt("tap", 20, &[]);
        assert!(p.contains("20x20"));
        assert!(p.contains("1..20"));
    }
}
