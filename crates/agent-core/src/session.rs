//! Session lifecycle, the public entry point most callers (and
//! `agent-mcp`) use (spec.md §4.G).
//!
//! Owns the append-only action/verification history, the bounded
//! action-history ring fed into every tier prompt, and the optional
//! before/after artifact capture. `execute`/`assert` mutate session state;
//! `waitForCondition`/`executeAndWait` deliberately do not, per spec.md
//! Scenario S6.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::device::DeviceSession;
use crate::dispatcher::ActionDispatcher;
use crate::engine::DecisionEngine;
use crate::errors::SessionError;
use crate::llm::LlmClient;
use crate::observer::UiObserver;
use crate::prompt;
use crate::types::{
    ActionStep, ActionType, CaptureMode, Method, SessionStatus, UiState, VerificationPoint,
    VerificationStatus,
};

/// Bounded ring of human-readable action summaries injected into every
/// tier prompt (SPEC_FULL.md supplement). Past a fixed capacity, the
/// oldest entry is dropped - the LLM only needs recent context, and an
/// unbounded history would make prompts grow without limit across a long
/// session.
const HISTORY_CAPACITY: usize = 20;

struct ActionHistory {
    entries: std::collections::VecDeque<String>,
}

impl ActionHistory {
    fn new() -> Self {
        Self { entries: std::collections::VecDeque::with_capacity(HISTORY_CAPACITY) }
    }

    fn push(&mut self, entry: String) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn as_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Open,
    Closed,
}

/// Parameters for `execute_and_wait` (spec.md §4.G).
pub struct ExecuteAndWaitOptions {
    pub timeout_ms: u64,
    pub poll_ms: u64,
}

impl Default for ExecuteAndWaitOptions {
    fn default() -> Self {
        Self { timeout_ms: 5000, poll_ms: 150 }
    }
}

/// Owns one automation session end to end. Generic over the device and
/// LLM client so a caller can swap either without touching the engine
/// (spec.md §6).
pub struct SessionController<D: DeviceSession, L: LlmClient> {
    device: D,
    llm: L,
    config: EngineConfig,
    phase: Phase,
    history: ActionHistory,
    steps: Vec<ActionStep>,
    verifications: Vec<VerificationPoint>,
    artifact_counter: AtomicU64,
}

impl<D: DeviceSession, L: LlmClient> SessionController<D, L> {
    pub fn new(device: D, llm: L, config: EngineConfig) -> Self {
        Self {
            device,
            llm,
            config,
            phase: Phase::Idle,
            history: ActionHistory::new(),
            steps: Vec::new(),
            verifications: Vec::new(),
            artifact_counter: AtomicU64::new(0),
        }
    }

    pub fn start_session(&mut self) -> Result<(), SessionError> {
        if self.phase == Phase::Open {
            return Err(SessionError::SessionAlreadyOpen);
        }
        if let Some(dir) = &self.config.artifacts_dir {
            std::fs::create_dir_all(dir)?;
        }
        self.phase = Phase::Open;
        self.steps.clear();
        self.verifications.clear();
        self.history = ActionHistory::new();
        self.artifact_counter.store(0, Ordering::SeqCst);
        info!("session started");
        Ok(())
    }

    pub fn stop_session(&mut self, status: SessionStatus) -> Result<(), SessionError> {
        self.require_open()?;
        self.phase = Phase::Closed;
        info!("session stopped with status {status:?}");
        Ok(())
    }

    fn require_open(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Closed => Err(SessionError::SessionClosed),
            Phase::Idle => Err(SessionError::NoActiveSession),
        }
    }

    /// One instruction through the decision engine, the dispatcher, and
    /// recorded history (spec.md §4.G `execute`).
    pub async fn execute(&mut self, instruction: &str) -> Result<ActionStep, SessionError> {
        self.require_open()?;

        let before_path = self.capture_artifact("before").await;

        let engine = DecisionEngine::new(&self.device, &self.llm, &self.config);
        let history = self.history.as_vec();
        let outcome = match engine.decide(instruction, &history).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // All four tiers exhausted: no gesture ran, but the attempt
                // still counts as one failed step (spec.md Scenario S5,
                // §8 invariant 4 "CLICK sentinel on catastrophic failure").
                drop(engine);
                self.record_catastrophic_failure(e.to_string(), before_path);
                return Err(SessionError::Engine(e));
            }
        };

        let window = self
            .device
            .get_window_size()
            .await
            .map_err(|e| SessionError::Engine(crate::errors::ObserverError::Transport(e).into()))?;

        let dispatcher = ActionDispatcher::new(&self.device);
        let dispatch_result = dispatcher
            .execute(
                outcome.decision.action,
                outcome.target_element.as_ref(),
                outcome.decision.coordinates,
                &outcome.decision.parameters,
                window.width,
                window.height,
            )
            .await;

        dispatcher
            .wait_for_settle_with(self.config.settle_poll_ms, self.config.settle_timeout_ms)
            .await;

        let after_path = self.capture_artifact("after").await;
        self.advance_artifact_counter();

        let (success, error_message) = match &dispatch_result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        let step = ActionStep {
            action_type: outcome.decision.action,
            target_element_id: outcome.decision.element_id.clone(),
            parameters: outcome.decision.parameters.clone(),
            timestamp: chrono::Utc::now(),
            success,
            error_message,
            before_screenshot_path: before_path,
            after_screenshot_path: after_path,
            method: outcome.decision.method,
        };

        self.history.push(format!(
            "{:?} ({:?}) -> {}",
            step.action_type,
            step.method,
            if step.success { "ok" } else { "failed" }
        ));
        self.steps.push(step.clone());

        if let Err(e) = dispatch_result {
            warn!("dispatch failed: {e}");
            return Err(SessionError::Engine(e.into()));
        }

        Ok(step)
    }

    /// Record the CLICK sentinel step for a `decide()` failure: no gesture
    /// ever ran, so there is no real `ActionDecision` to describe, but the
    /// step ledger must still grow by exactly one entry (spec.md §8
    /// invariant 4).
    fn record_catastrophic_failure(
        &mut self,
        error_message: String,
        before_path: Option<String>,
    ) -> ActionStep {
        let step = ActionStep {
            action_type: ActionType::Click,
            target_element_id: None,
            parameters: crate::types::ActionParameters::default(),
            timestamp: chrono::Utc::now(),
            success: false,
            error_message: Some(error_message),
            before_screenshot_path: before_path,
            after_screenshot_path: None,
            method: Method::PureVision,
        };
        self.history.push(format!("{:?} (all tiers exhausted) -> failed", step.action_type));
        self.steps.push(step.clone());
        step
    }

    /// Verify a condition against the freshest state, recording the
    /// result permanently (spec.md §4.G `assert`). Unlike
    /// `wait_for_condition`, this DOES mutate `verifications`.
    pub async fn assert(&mut self, condition: &str) -> Result<VerificationPoint, SessionError> {
        self.require_open()?;
        let point = self.evaluate_condition(condition).await?;
        self.verifications.push(point.clone());
        Ok(point)
    }

    /// Poll a condition until it passes or the deadline elapses. Never
    /// mutates `verifications` - this is a one-shot helper, not an
    /// assertion (spec.md Scenario S6).
    pub async fn wait_for_condition(
        &self,
        condition: &str,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> Result<VerificationPoint, SessionError> {
        self.require_open()?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let point = self.evaluate_condition(condition).await?;
            if point.status == VerificationStatus::Passed || Instant::now() >= deadline {
                return Ok(point);
            }
            sleep(Duration::from_millis(poll_ms)).await;
        }
    }

    /// `execute` followed by a non-recording `wait_for_condition` (spec.md
    /// §4.G `executeAndWait`). The action's own step IS recorded; the
    /// verification poll is not.
    pub async fn execute_and_wait(
        &mut self,
        instruction: &str,
        condition: &str,
        opts: ExecuteAndWaitOptions,
    ) -> Result<(ActionStep, VerificationPoint), SessionError> {
        let step = self.execute(instruction).await?;
        let point = self
            .wait_for_condition(condition, opts.timeout_ms, opts.poll_ms)
            .await?;
        Ok((step, point))
    }

    pub async fn get_current_state(&self) -> Result<UiState, SessionError> {
        self.require_open()?;
        let observer = UiObserver::new(&self.device);
        observer
            .snapshot(CaptureMode::None, self.config.vision.grid_size)
            .await
            .map_err(|e| SessionError::Engine(e.into()))
    }

    /// Same as `get_current_state`, but also captures a plain screenshot
    /// (no overlay) - used by callers that want `get_state(includeScreenshot)`
    /// (spec.md §6 tool surface) without paying for a tagged/grid capture.
    pub async fn get_current_state_with_screenshot(&self) -> Result<UiState, SessionError> {
        self.require_open()?;
        let observer = UiObserver::new(&self.device);
        observer
            .snapshot(CaptureMode::Screenshot, self.config.vision.grid_size)
            .await
            .map_err(|e| SessionError::Engine(e.into()))
    }

    /// Raw screenshot of the current screen, independent of any decision
    /// cycle (spec.md §6 tool surface `take_screenshot`).
    pub async fn take_screenshot(&self) -> Result<String, SessionError> {
        self.require_open()?;
        self.device
            .take_screenshot()
            .await
            .map_err(|e| SessionError::Engine(crate::errors::ObserverError::Transport(e).into()))
    }

    /// Read/write access to the live configuration, for callers (such as
    /// the MCP tool surface's `configure` operation, spec.md §6) that need
    /// to adjust vision settings between `execute` calls.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn verifications(&self) -> &[VerificationPoint] {
        &self.verifications
    }

    async fn evaluate_condition(&self, condition: &str) -> Result<VerificationPoint, SessionError> {
        let observer = UiObserver::new(&self.device);
        let state = observer
            .snapshot(CaptureMode::None, self.config.vision.grid_size)
            .await
            .map_err(|e| SessionError::Engine(e.into()))?;

        let prompt = prompt::verification_prompt(condition, &state);
        let raw = self.llm.query(&prompt, None).await;

        let point = match raw {
            Ok(text) => match crate::llm::parse_json_response(&text) {
                Ok(value) => {
                    let passed = value["passed"].as_bool().unwrap_or(false);
                    let issues = value["issues"]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default();
                    VerificationPoint {
                        condition: condition.to_string(),
                        expected: true,
                        actual: passed,
                        status: if passed { VerificationStatus::Passed } else { VerificationStatus::Failed },
                        issues,
                    }
                }
                Err(e) => VerificationPoint {
                    condition: condition.to_string(),
                    expected: true,
                    actual: false,
                    status: VerificationStatus::Error,
                    issues: vec![e.to_string()],
                },
            },
            Err(e) => VerificationPoint {
                condition: condition.to_string(),
                expected: true,
                actual: false,
                status: VerificationStatus::Error,
                issues: vec![e.to_string()],
            },
        };
        Ok(point)
    }

    /// Writes `{ARTIFACTS_DIR}/step_{n}_{before|after}.png` when
    /// `artifacts_dir` is configured; silently skipped otherwise (spec.md
    /// §4.G, SPEC_FULL.md supplement). Screenshot failures are logged, not
    /// propagated - an artifact is a diagnostic aid, never load-bearing.
    async fn capture_artifact(&self, phase: &str) -> Option<String> {
        let dir = self.config.artifacts_dir.as_ref()?;
        let screenshot = match self.device.take_screenshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!("artifact screenshot failed: {e}");
                return None;
            }
        };

        let n = self.artifact_counter.load(Ordering::SeqCst);
        let path = format!("{dir}/step_{n}_{phase}.png");
        match decode_and_write(&screenshot, &path) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("failed to write artifact {path}: {e}");
                None
            }
        }
    }

    /// Call once per completed step (after both before/after artifacts are
    /// captured) to advance the counter.
    fn advance_artifact_counter(&self) {
        self.artifact_counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn decode_and_write(base64_png: &str, path: &str) -> std::io::Result<()> {
    use base64::{engine::general_purpose, Engine};
    let bytes = general_purpose::STANDARD
        .decode(base64_png)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCapabilities, TouchAction};
    use crate::errors::LlmError;
    use crate::types::WindowSize;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubDevice {
        xml: Mutex<String>,
        window: WindowSize,
    }

    #[async_trait]
    impl DeviceSession for StubDevice {
        async fn get_page_source(&self) -> Result<String, String> {
            Ok(self.xml.lock().unwrap().clone())
        }
        async fn get_current_activity(&self) -> Result<String, String> {
            Ok("MainActivity".into())
        }
        async fn get_window_size(&self) -> Result<WindowSize, String> {
            Ok(self.window)
        }
        async fn take_screenshot(&self) -> Result<String, String> {
            use base64::{engine::general_purpose, Engine};
            Ok(general_purpose::STANDARD.encode(b"not-really-a-png"))
        }
        async fn tap(&self, _x: f64, _y: f64) -> Result<(), String> {
            Ok(())
        }
        async fn long_press(&self, _x: f64, _y: f64, _duration_ms: u64) -> Result<(), String> {
            Ok(())
        }
        async fn swipe_gesture(&self, _points: &[(f64, f64)], _wait_ms: u64) -> Result<(), String> {
            Ok(())
        }
        async fn multi_touch(&self, _fingers: &[Vec<TouchAction>]) -> Result<(), String> {
            Ok(())
        }
        async fn type_keys(&self, _chars: &[String]) -> Result<(), String> {
            Ok(())
        }
        async fn pause(&self, _ms: u64) -> Result<(), String> {
            Ok(())
        }
        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities { platform_name: "android".into(), platform_version: None, device_name: None }
        }
    }

    struct StubLlm {
        text: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn query(&self, _prompt: &str, _system_prompt: Option<&str>) -> Result<String, LlmError> {
            let mut t = self.text.lock().unwrap();
            if t.is_empty() {
                return Err(LlmError::Request("exhausted".into()));
            }
            Ok(t.remove(0))
        }
        async fn query_with_vision(
            &self,
            _prompt: &str,
            _image_base64: &str,
            _system_prompt: Option<&str>,
        ) -> Result<String, LlmError> {
            Err(LlmError::Request("vision not scripted".into()))
        }
    }

    const XML: &str = r#"<hierarchy>
        <node text="Login" class="android.widget.Button" clickable="true" visible-to-user="true" bounds="[100,200][300,260]" />
    </hierarchy>"#;

    fn controller(responses: Vec<&str>) -> SessionController<StubDevice, StubLlm> {
        let device = StubDevice { xml: Mutex::new(XML.to_string()), window: WindowSize { width: 390, height: 844 } };
        let llm = StubLlm { text: Mutex::new(responses.into_iter().map(String::from).collect()) };
        SessionController::new(device, llm, EngineConfig::default())
    }

    #[test]
    fn execute_before_start_session_errors() {
        let mut sc = controller(vec![]);
        let result = futures_block_on(sc.execute("tap login"));
        assert!(matches!(result, Err(SessionError::NoActiveSession)));
    }

    #[tokio::test]
    async fn execute_records_step_and_history() {
        let mut sc = controller(vec![r#"{"action":"click","element_id":"1","confidence":0.95,"reasoning":"clear"}"#]);
        sc.start_session().unwrap();
        let step = sc.execute("tap login").await.unwrap();
        assert!(step.success);
        assert_eq!(sc.steps().len(), 1);
        assert_eq!(sc.history.as_vec().len(), 1);
    }

    #[tokio::test]
    async fn stop_session_then_execute_errors_closed() {
        let mut sc = controller(vec![]);
        sc.start_session().unwrap();
        sc.stop_session(SessionStatus::Passed).unwrap();
        let result = sc.execute("tap login").await;
        assert!(matches!(result, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn wait_for_condition_does_not_record_verification() {
        let mut sc = controller(vec![r#"{"passed":true,"assertions":[],"issues":[],"confidence":0.9}"#]);
        sc.start_session().unwrap();
        let before = sc.verifications().len();
        let point = sc.wait_for_condition("login button visible", 200, 20).await.unwrap();
        assert_eq!(point.status, VerificationStatus::Passed);
        assert_eq!(sc.verifications().len(), before);
    }

    #[tokio::test]
    async fn assert_records_verification() {
        let mut sc = controller(vec![r#"{"passed":false,"assertions":[],"issues":["missing button"],"confidence":0.6}"#]);
        sc.start_session().unwrap();
        let point = sc.assert("login button visible").await.unwrap();
        assert_eq!(point.status, VerificationStatus::Failed);
        assert_eq!(sc.verifications().len(), 1);
        assert_eq!(point.issues, vec!["missing button".to_string()]);
    }

    #[tokio::test]
    async fn history_ring_drops_oldest_past_capacity() {
        let responses = vec![r#"{"action":"click","element_id":"1","confidence":0.95,"reasoning":"r"}"#; HISTORY_CAPACITY + 3];
        let mut sc = controller(responses);
        sc.start_session().unwrap();
        for _ in 0..(HISTORY_CAPACITY + 3) {
            sc.execute("tap login").await.unwrap();
        }
        assert_eq!(sc.history.as_vec().len(), HISTORY_CAPACITY);
    }

    fn futures_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }
}
