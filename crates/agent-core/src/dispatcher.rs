//! Executes gestures and waits for the UI to settle afterward (spec.md
//! §4.E, §5).

use tracing::{debug, warn};

use crate::device::{DeviceSession, TouchAction};
use crate::errors::DispatchError;
use crate::types::{ActionDecision, ActionParameters, ActionType, Direction, Logical, UiElement};

const DOUBLE_TAP_GAP_MS: u64 = 75;
const LONG_PRESS_HOLD_MS: u64 = 1000;
const LONG_PRESS_SETTLE_MS: u64 = 500;
const PINCH_ZOOM_DURATION_MS: u64 = 250;
const GESTURE_STEP_MS: u64 = 100;

/// Resolve the coordinate a gesture should target: an explicit coordinate
/// wins over a resolved element's bounds center when both are present
/// (spec.md §4.E; the tier-2/re-resolution precedence open question in
/// spec.md §9 is resolved the same way for consistency).
fn resolve_target(
    coordinates: Option<Logical>,
    element: Option<&UiElement>,
) -> Option<Logical> {
    coordinates.or_else(|| element.and_then(|e| e.bounds).map(|b| b.center()))
}

pub struct ActionDispatcher<'a> {
    device: &'a dyn DeviceSession,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(device: &'a dyn DeviceSession) -> Self {
        Self { device }
    }

    /// Execute one gesture. `element` is the re-resolved target (spec.md
    /// §4.F), if any; `coordinates`/`parameters` come from the decision.
    ///
    /// Does not itself wait for the UI to settle afterward - the caller
    /// (the session controller) owns that, once per `execute()` call, with
    /// its configured poll/timeout (spec.md §5). `long_press` is the one
    /// exception: its fixed post-gesture pause is part of the gesture
    /// itself, for dialog-open compatibility, not the polling settle wait.
    pub async fn execute(
        &self,
        action: ActionType,
        element: Option<&UiElement>,
        coordinates: Option<Logical>,
        parameters: &ActionParameters,
        window_width: u32,
        window_height: u32,
    ) -> Result<(), DispatchError> {
        match action {
            ActionType::Click | ActionType::Tap => {
                let target = self.require_target(action, coordinates, element)?;
                self.device
                    .tap(target.x, target.y)
                    .await
                    .map_err(DispatchError::Transport)?;
            }
            ActionType::DoubleTap => {
                let target = self.require_target(action, coordinates, element)?;
                self.device
                    .tap(target.x, target.y)
                    .await
                    .map_err(DispatchError::Transport)?;
                self.device
                    .pause(DOUBLE_TAP_GAP_MS)
                    .await
                    .map_err(DispatchError::Transport)?;
                self.device
                    .tap(target.x, target.y)
                    .await
                    .map_err(DispatchError::Transport)?;
            }
            ActionType::LongPress => {
                let target = self.require_target(action, coordinates, element)?;
                self.device
                    .long_press(target.x, target.y, LONG_PRESS_HOLD_MS)
                    .await
                    .map_err(DispatchError::Transport)?;
                self.device
                    .pause(LONG_PRESS_SETTLE_MS)
                    .await
                    .map_err(DispatchError::Transport)?;
            }
            ActionType::TypeText => {
                let target = self.require_target(action, coordinates, element)?;
                let text = parameters
                    .text
                    .clone()
                    .ok_or_else(|| DispatchError::NoTarget { action: "type_text (no text parameter)".into() })?;
                self.device
                    .tap(target.x, target.y)
                    .await
                    .map_err(DispatchError::Transport)?;
                let chars: Vec<String> = text.chars().map(|c| c.to_string()).collect();
                self.device
                    .type_keys(&chars)
                    .await
                    .map_err(DispatchError::Transport)?;
            }
            ActionType::Swipe => {
                let direction = parameters
                    .direction
                    .ok_or_else(|| DispatchError::NoTarget { action: "swipe (no direction parameter)".into() })?;
                let distance = parameters.distance.unwrap_or(0.5);
                self.swipe(direction, distance, window_width, window_height).await?;
            }
            ActionType::Scroll => {
                let direction = parameters
                    .direction
                    .ok_or_else(|| DispatchError::NoTarget { action: "scroll (no direction parameter)".into() })?;
                // scroll = swipe with distance 0.3 (spec.md §4.E).
                self.swipe(direction, 0.3, window_width, window_height).await?;
            }
            ActionType::Pinch => {
                self.pinch_or_zoom(coordinates, 100.0, 10.0).await?;
            }
            ActionType::Zoom => {
                self.pinch_or_zoom(coordinates, 10.0, 100.0).await?;
            }
            ActionType::Error => {
                return Err(DispatchError::NoTarget { action: "error".into() });
            }
        }
        Ok(())
    }

    fn require_target(
        &self,
        action: ActionType,
        coordinates: Option<Logical>,
        element: Option<&UiElement>,
    ) -> Result<Logical, DispatchError> {
        resolve_target(coordinates, element).ok_or_else(|| DispatchError::NoTarget {
            action: format!("{action:?}").to_lowercase(),
        })
    }

    async fn swipe(
        &self,
        direction: Direction,
        distance: f64,
        window_width: u32,
        window_height: u32,
    ) -> Result<(), DispatchError> {
        // Start/end across the screen center; deflection = windowHeight *
        // distance for vertical directions (spec.md §4.E).
        let center_x = window_width as f64 / 2.0;
        let center_y = window_height as f64 / 2.0;
        let deflection = window_height as f64 * distance;

        let (start, end) = match direction {
            Direction::Up => ((center_x, center_y + deflection / 2.0), (center_x, center_y - deflection / 2.0)),
            Direction::Down => ((center_x, center_y - deflection / 2.0), (center_x, center_y + deflection / 2.0)),
            Direction::Left => ((center_x + deflection / 2.0, center_y), (center_x - deflection / 2.0, center_y)),
            Direction::Right => ((center_x - deflection / 2.0, center_y), (center_x + deflection / 2.0, center_y)),
        };

        self.device
            .swipe_gesture(&[start, end], GESTURE_STEP_MS)
            .await
            .map_err(DispatchError::Transport)
    }

    async fn pinch_or_zoom(
        &self,
        coordinates: Option<Logical>,
        start_offset: f64,
        end_offset: f64,
    ) -> Result<(), DispatchError> {
        let center = coordinates.ok_or_else(|| DispatchError::NoTarget {
            action: "pinch/zoom (no center coordinate)".into(),
        })?;

        let finger_a = vec![
            TouchAction::Press { x: center.x - start_offset, y: center.y },
            TouchAction::Wait { ms: PINCH_ZOOM_DURATION_MS },
            TouchAction::Move { x: center.x - end_offset, y: center.y },
            TouchAction::Release,
        ];
        let finger_b = vec![
            TouchAction::Press { x: center.x + start_offset, y: center.y },
            TouchAction::Wait { ms: PINCH_ZOOM_DURATION_MS },
            TouchAction::Move { x: center.x + end_offset, y: center.y },
            TouchAction::Release,
        ];

        self.device
            .multi_touch(&[finger_a, finger_b])
            .await
            .map_err(DispatchError::Transport)
    }

    /// UI-settle wait (spec.md §5): sample `pageSource` every `pollMs` up
    /// to `timeoutMs`. Settled when two consecutive samples are
    /// byte-identical (after volatile-attribute normalization, spec.md §9
    /// open question resolution). The timebox always wins.
    pub async fn wait_for_settle(&self) {
        self.wait_for_settle_with(150, 1200).await;
    }

    pub async fn wait_for_settle_with(&self, poll_ms: u64, timeout_ms: u64) {
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(timeout_ms);
        let mut previous: Option<String> = None;

        while tokio::time::Instant::now() < deadline {
            match self.device.get_page_source().await {
                Ok(raw) => {
                    let normalized = normalize_settle_source(&raw);
                    if let Some(prev) = &previous {
                        if *prev == normalized {
                            debug!("UI settled: two consecutive samples identical");
                            return;
                        }
                    }
                    previous = Some(normalized);
                }
                Err(e) => {
                    // Transient read errors are ignored; the sample is
                    // skipped (spec.md §5).
                    warn!("settle sample read failed, skipping: {e}");
                }
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(poll_ms)).await;
        }
        debug!("UI-settle timebox elapsed without two identical samples");
    }
}

/// Normalize obviously-volatile attributes (timestamps, monotonic
/// counters) out of the accessibility dump before the settle comparison,
/// so a platform that embeds a clock in every dump never defeats settle
/// detection (spec.md §9 open question).
fn normalize_settle_source(xml: &str) -> String {
    static VOLATILE_ATTR: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r#"(timestamp|time|counter|seq|epoch)="[^"]*""#)
            .expect("static regex is valid")
    });
    VOLATILE_ATTR.replace_all(xml, "$1=\"\"").into_owned()
}
