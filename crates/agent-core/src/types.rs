//! Data model shared across the observer, overlay, prompt builder, and
//! decision engine (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A point in the device's window-size coordinate space. This is the only
/// space gesture execution consumes (spec.md §9: "represent physical and
/// logical coordinates as distinct types").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Logical {
    pub x: f64,
    pub y: f64,
}

impl Logical {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in the screenshot's pixel space. Overlay drawing happens here;
/// it is never passed to a gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Physical {
    pub x: f64,
    pub y: f64,
}

impl Physical {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A percentage-of-screen point in `[0, 100]` on each axis, as returned by
/// the pure-vision tier (spec.md §4.D tier 4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percent {
    pub x_percent: f64,
    pub y_percent: f64,
}

impl Percent {
    /// Convert to logical pixels given the device window size:
    /// `x = floor(W * x_percent/100)`, `y = floor(H * y_percent/100)`.
    pub fn to_logical(self, width: u32, height: u32) -> Logical {
        Logical::new(
            (width as f64 * self.x_percent / 100.0).floor(),
            (height as f64 * self.y_percent / 100.0).floor(),
        )
    }
}

/// Axis-aligned rectangle in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Bounds {
    pub fn center(&self) -> Logical {
        Logical::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// Inferred widget category, derived from the accessibility class name by
/// ordered substring match (spec.md §4.B step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    TextView,
    EditText,
    ImageView,
    ListView,
    RecyclerView,
    WebView,
    Dialog,
    Toggle,
    Spinner,
    Unknown,
}

impl ElementType {
    /// Ordered, case-insensitive substring search against the class name,
    /// per spec.md §4.B: button → edit_text → text_view → image_view →
    /// recycler_view → list_view → webview → dialog → toggle → spinner →
    /// unknown.
    pub fn infer(class_name: &str) -> Self {
        let c = class_name.to_lowercase();
        const ORDER: &[(&str, ElementType)] = &[
            ("button", ElementType::Button),
            ("edittext", ElementType::EditText),
            ("textview", ElementType::TextView),
            ("imageview", ElementType::ImageView),
            ("recyclerview", ElementType::RecyclerView),
            ("listview", ElementType::ListView),
            ("webview", ElementType::WebView),
            ("dialog", ElementType::Dialog),
            ("toggle", ElementType::Toggle),
            ("switch", ElementType::Toggle),
            ("spinner", ElementType::Spinner),
        ];
        for (needle, ty) in ORDER {
            if c.contains(needle) {
                return *ty;
            }
        }
        ElementType::Unknown
    }
}

/// A single node parsed from the device accessibility tree (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiElement {
    /// Opaque string unique within a snapshot (sequential traversal index).
    pub element_id: String,
    pub text: String,
    pub resource_id: Option<String>,
    pub class_name: Option<String>,
    pub content_desc: Option<String>,
    pub bounds: Option<Bounds>,
    pub element_type: ElementType,
    pub clickable: bool,
    pub scrollable: bool,
    pub focusable: bool,
    pub long_clickable: bool,
    pub checked: bool,
    pub enabled: bool,
    pub visible: bool,
}

impl UiElement {
    /// An element is targetable by coordinate only when it has bounds;
    /// `visible` and `bounds` need not correlate (spec.md §3 invariant).
    pub fn is_coordinate_targetable(&self) -> bool {
        self.bounds.is_some()
    }

    /// Eligible for the numeric tag overlay: clickable, visible, and has
    /// bounds (spec.md §4.A).
    pub fn is_tag_eligible(&self) -> bool {
        self.clickable && self.visible && self.bounds.is_some()
    }
}

/// Best-effort device identity (spec.md §3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub platform_version: Option<String>,
    pub device_name: Option<String>,
}

/// The window size of the device in logical pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// Which capture mode the observer should use for a given snapshot
/// (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    None,
    Screenshot,
    Tagged,
    Grid,
}

/// Immutable snapshot for one decision cycle (spec.md §3).
///
/// Never mutated after creation; a decision cycle may produce up to four of
/// these, one per attempted tier (spec.md §8 invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiState {
    pub activity: String,
    /// Depth-first traversal order; order is meaningful only for
    /// disambiguating otherwise-identical elements.
    pub elements: Vec<UiElement>,
    /// Raw accessibility dump, retained for UI-settle comparison.
    pub xml_source: String,
    pub screenshot_base64: Option<String>,
    /// Present iff captured in `tagged` mode.
    pub tag_mapping: Option<HashMap<u32, UiElement>>,
    /// Present iff captured in `grid` mode; label -> logical center.
    pub grid_map: Option<HashMap<String, Logical>>,
    pub device_info: DeviceInfo,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UiState {
    /// Elements that are clickable and visible, used as tier-1 prompt
    /// input (spec.md §4.D tier 1).
    pub fn clickable_visible(&self) -> impl Iterator<Item = &UiElement> {
        self.elements.iter().filter(|e| e.clickable && e.visible)
    }

    pub fn find_by_id(&self, element_id: &str) -> Option<&UiElement> {
        self.elements.iter().find(|e| e.element_id == element_id)
    }
}

/// Which tier produced an `ActionDecision` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Hierarchy,
    VisionTagging,
    GridOverlay,
    PureVision,
}

/// The action kind an `ActionDecision` / `ActionStep` carries (spec.md §3,
/// §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    Tap,
    DoubleTap,
    LongPress,
    TypeText,
    Swipe,
    Scroll,
    Pinch,
    Zoom,
    Error,
}

impl ActionType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "click" => ActionType::Click,
            "tap" => ActionType::Tap,
            "double_tap" => ActionType::DoubleTap,
            "long_press" => ActionType::LongPress,
            "type_text" => ActionType::TypeText,
            "swipe" => ActionType::Swipe,
            "scroll" => ActionType::Scroll,
            "pinch" => ActionType::Pinch,
            "zoom" => ActionType::Zoom,
            "error" => ActionType::Error,
            _ => return None,
        })
    }
}

/// Swipe/scroll direction (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "up" => Direction::Up,
            "down" => Direction::Down,
            "left" => Direction::Left,
            "right" => Direction::Right,
            _ => return None,
        })
    }
}

/// Free-form parameters recognized by the dispatcher (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParameters {
    pub text: Option<String>,
    pub direction: Option<Direction>,
    /// 0..1, default 0.3 when acting as a scroll (spec.md §4.E).
    pub distance: Option<f64>,
}

/// Output of the decision engine for one instruction (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: ActionType,
    /// Resolves to a `UiElement` in the current snapshot; meaningful only
    /// for tier 1 and occasionally tier 2.
    pub element_id: Option<String>,
    pub coordinates: Option<Logical>,
    pub parameters: ActionParameters,
    pub reasoning: String,
    /// `0` on parse failure; otherwise whatever the LLM returned, absent
    /// when the LLM didn't say (spec.md §4.C, §8 invariant 1, §9 "three
    /// confidence states").
    pub confidence: Option<f64>,
    pub method: Method,
    pub tag_id: Option<u32>,
    pub grid_position: Option<String>,
    /// Free-text element description, tier-4 only.
    pub location: Option<String>,
}

impl ActionDecision {
    pub fn error(method: Method) -> Self {
        Self {
            action: ActionType::Error,
            element_id: None,
            coordinates: None,
            parameters: ActionParameters::default(),
            reasoning: String::new(),
            confidence: Some(0.0),
            method,
            tag_id: None,
            grid_position: None,
            location: None,
        }
    }
}

/// Recorded per action (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub action_type: ActionType,
    pub target_element_id: Option<String>,
    pub parameters: ActionParameters,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    pub before_screenshot_path: Option<String>,
    pub after_screenshot_path: Option<String>,
    pub method: Method,
}

/// Status of a `VerificationPoint` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Error,
}

/// Per `assert()` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPoint {
    pub condition: String,
    pub expected: bool,
    pub actual: bool,
    pub status: VerificationStatus,
    pub issues: Vec<String>,
}

/// Terminal status a caller supplies when sealing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Passed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_infers_in_documented_order() {
        assert_eq!(ElementType::infer("android.widget.Button"), ElementType::Button);
        assert_eq!(ElementType::infer("android.widget.EditText"), ElementType::EditText);
        assert_eq!(ElementType::infer("android.widget.TextView"), ElementType::TextView);
        assert_eq!(ElementType::infer("com.example.FancyWebView"), ElementType::WebView);
        assert_eq!(ElementType::infer("java.lang.Object"), ElementType::Unknown);
    }

    #[test]
    fn percent_to_logical_floors() {
        let p = Percent { x_percent: 50.0, y_percent: 85.0 };
        let l = p.to_logical(375, 812);
        assert_eq!(l.x, 187.0);
        assert_eq!(l.y, 690.0);
    }

    #[test]
    fn bounds_center_is_midpoint() {
        let b = Bounds { x1: 100.0, y1: 200.0, x2: 300.0, y2: 260.0 };
        let c = b.center();
        assert_eq!(c.x, 200.0);
        assert_eq!(c.y, 230.0);
    }

    #[test]
    fn tag_eligibility_requires_clickable_visible_and_bounds() {
        let mut e = UiElement {
            element_id: "1".into(),
            text: String::new(),
            resource_id: None,
            class_name: None,
            content_desc: None,
            bounds: None,
            element_type: ElementType::Button,
            clickable: true,
            scrollable: false,
            focusable: true,
            long_clickable: false,
            checked: false,
            enabled: true,
            visible: true,
        };
        assert!(!e.is_tag_eligible());
        e.bounds = Some(Bounds { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 });
        assert!(e.is_tag_eligible());
        e.visible = false;
        assert!(!e.is_tag_eligible());
    }
}
