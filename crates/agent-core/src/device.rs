//! The abstract capability the core depends on for all device I/O
//! (spec.md §6, "External interfaces"). The decision engine and action
//! dispatcher are polymorphic over any type implementing `DeviceSession`;
//! a concrete WebDriver-over-HTTP client to an Appium server is an external
//! collaborator and out of scope here (spec.md §1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::WindowSize;

/// Best-effort vendor/platform identity for a connected device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub platform_name: String,
    pub platform_version: Option<String>,
    pub device_name: Option<String>,
}

/// One finger's timeline for a `multiTouch` gesture: a sequence of
/// press/move/wait/release actions in logical coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TouchAction {
    Press { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Wait { ms: u64 },
    Release,
}

/// The only interface the decision engine and action dispatcher require
/// from the outside world (spec.md §6). All coordinates passed in are
/// logical; the implementation is responsible for any device-specific
/// translation to its own wire protocol.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// UTF-8 accessibility dump (may fail; transport error).
    async fn get_page_source(&self) -> Result<String, String>;

    /// Current foreground activity/identifier (may fail).
    async fn get_current_activity(&self) -> Result<String, String>;

    /// Window size in logical pixels.
    async fn get_window_size(&self) -> Result<WindowSize, String>;

    /// Base64-encoded PNG screenshot.
    async fn take_screenshot(&self) -> Result<String, String>;

    /// Single touch at logical `(x, y)`.
    async fn tap(&self, x: f64, y: f64) -> Result<(), String>;

    /// Press at `(x, y)`, hold for `duration_ms`, release.
    async fn long_press(&self, x: f64, y: f64, duration_ms: u64) -> Result<(), String>;

    /// A single-finger press/wait/move/release timeline in logical
    /// coordinates, e.g. `[(x1,y1), (x2,y2)]` with intervening waits.
    async fn swipe_gesture(&self, points: &[(f64, f64)], wait_ms: u64) -> Result<(), String>;

    /// Per-finger timelines for multi-touch gestures (pinch/zoom).
    async fn multi_touch(&self, fingers: &[Vec<TouchAction>]) -> Result<(), String>;

    /// Inject characters (after a tap-to-focus by the caller).
    async fn type_keys(&self, chars: &[String]) -> Result<(), String>;

    /// Pause for `ms` milliseconds (device-side, e.g. an IME settle).
    async fn pause(&self, ms: u64) -> Result<(), String>;

    /// Best-effort vendor/platform identity.
    fn capabilities(&self) -> DeviceCapabilities;
}
