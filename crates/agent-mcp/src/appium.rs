//! A thin WebDriver-over-HTTP client to an Appium server, implementing
//! `mobile_agent_core::DeviceSession` (spec.md §1, §6: "the
//! device-automation transport... the core depends only on an abstract
//! `DeviceSession` capability set").
//!
//! This is deliberately minimal: it exists so `mobile-agent-mcp` has a real
//! transport to wire into `SessionController`, not as a full Appium client.
//! Every operation maps onto exactly one W3C WebDriver (or Appium mobile
//! extension) endpoint.

use async_trait::async_trait;
use mobile_agent_core::device::{DeviceCapabilities, DeviceSession, TouchAction};
use mobile_agent_core::types::WindowSize;
use serde_json::{json, Value};
use tracing::debug;

pub struct AppiumSession {
    http: reqwest::Client,
    server_url: String,
    session_id: String,
    capabilities: DeviceCapabilities,
}

impl AppiumSession {
    /// Create a new Appium session against `server_url` (e.g.
    /// `http://127.0.0.1:4723`) with the given W3C `capabilities` payload.
    pub async fn connect(server_url: impl Into<String>, capabilities: Value) -> anyhow::Result<Self> {
        let server_url = server_url.into();
        let http = reqwest::Client::new();

        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let resp: Value = http
            .post(format!("{server_url}/session"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let session_id = resp["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Appium did not return a sessionId: {resp}"))?
            .to_string();

        let caps = &resp["value"]["capabilities"];
        let capabilities = DeviceCapabilities {
            platform_name: caps["platformName"].as_str().unwrap_or_default().to_string(),
            platform_version: caps["platformVersion"].as_str().map(|s| s.to_string()),
            device_name: caps["deviceName"].as_str().map(|s| s.to_string()),
        };

        debug!("Appium session {session_id} established: {capabilities:?}");
        Ok(Self { http, server_url, session_id, capabilities })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.server_url, self.session_id, path)
    }

    async fn perform_actions(&self, actions: Value) -> Result<(), String> {
        self.http
            .post(self.endpoint("/actions"))
            .json(&json!({ "actions": actions }))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// One finger's W3C "pointer" input-source action sequence for a simple
/// press/(wait)/move/release gesture at logical coordinates.
fn pointer_source(id: &str, points: &[(f64, f64)], wait_ms: u64) -> Value {
    let mut actions = Vec::new();
    for (i, (x, y)) in points.iter().enumerate() {
        actions.push(json!({"type": "pointerMove", "duration": 0, "x": x, "y": y}));
        if i == 0 {
            actions.push(json!({"type": "pointerDown", "button": 0}));
        }
        if wait_ms > 0 {
            actions.push(json!({"type": "pause", "duration": wait_ms}));
        }
    }
    actions.push(json!({"type": "pointerUp", "button": 0}));
    json!({
        "type": "pointer",
        "id": id,
        "parameters": {"pointerType": "touch"},
        "actions": actions,
    })
}

fn touch_action_to_pointer_step(action: &TouchAction) -> Value {
    match action {
        TouchAction::Press { x, y } => json!({"type": "pointerMove", "duration": 0, "x": x, "y": y}),
        TouchAction::Move { x, y } => json!({"type": "pointerMove", "duration": 100, "x": x, "y": y}),
        TouchAction::Wait { ms } => json!({"type": "pause", "duration": ms}),
        TouchAction::Release => json!({"type": "pointerUp", "button": 0}),
    }
}

#[async_trait]
impl DeviceSession for AppiumSession {
    async fn get_page_source(&self) -> Result<String, String> {
        let resp: Value = self
            .http
            .get(self.endpoint("/source"))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        resp["value"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "Appium /source returned no value".to_string())
    }

    async fn get_current_activity(&self) -> Result<String, String> {
        let resp: Value = self
            .http
            .get(self.endpoint("/appium/device/current_activity"))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        resp["value"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "Appium returned no current_activity".to_string())
    }

    async fn get_window_size(&self) -> Result<WindowSize, String> {
        let resp: Value = self
            .http
            .get(self.endpoint("/window/rect"))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        let width = resp["value"]["width"].as_u64().ok_or("missing width")? as u32;
        let height = resp["value"]["height"].as_u64().ok_or("missing height")? as u32;
        Ok(WindowSize { width, height })
    }

    async fn take_screenshot(&self) -> Result<String, String> {
        let resp: Value = self
            .http
            .get(self.endpoint("/screenshot"))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        resp["value"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "Appium /screenshot returned no value".to_string())
    }

    async fn tap(&self, x: f64, y: f64) -> Result<(), String> {
        let source = pointer_source("finger1", &[(x, y)], 0);
        self.perform_actions(json!([source])).await
    }

    async fn long_press(&self, x: f64, y: f64, duration_ms: u64) -> Result<(), String> {
        let source = pointer_source("finger1", &[(x, y)], duration_ms);
        self.perform_actions(json!([source])).await
    }

    async fn swipe_gesture(&self, points: &[(f64, f64)], wait_ms: u64) -> Result<(), String> {
        let source = pointer_source("finger1", points, wait_ms);
        self.perform_actions(json!([source])).await
    }

    async fn multi_touch(&self, fingers: &[Vec<TouchAction>]) -> Result<(), String> {
        let sources: Vec<Value> = fingers
            .iter()
            .enumerate()
            .map(|(i, timeline)| {
                let actions: Vec<Value> = timeline.iter().map(touch_action_to_pointer_step).collect();
                json!({
                    "type": "pointer",
                    "id": format!("finger{i}"),
                    "parameters": {"pointerType": "touch"},
                    "actions": actions,
                })
            })
            .collect();
        self.perform_actions(Value::Array(sources)).await
    }

    async fn type_keys(&self, chars: &[String]) -> Result<(), String> {
        let mut actions = Vec::new();
        for c in chars {
            actions.push(json!({"type": "keyDown", "value": c}));
            actions.push(json!({"type": "keyUp", "value": c}));
        }
        let source = json!({"type": "key", "id": "keyboard", "actions": actions});
        self.perform_actions(json!([source])).await
    }

    async fn pause(&self, ms: u64) -> Result<(), String> {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        Ok(())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.clone()
    }
}
