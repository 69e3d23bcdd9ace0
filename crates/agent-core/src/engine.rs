//! The cascading four-tier decision engine (spec.md §4.F) — mode
//! selection, the fallback predicate, target re-resolution, and the state
//! machine's `decide` transition.
//!
//! Each tier strategy consumes its own `UiState` rather than reading a
//! mutable engine field, per spec.md §9's "snapshot freshness" design
//! note: this removes the stale-reference re-resolution bug class at the
//! type level.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::device::DeviceSession;
use crate::errors::{EngineError, LlmError};
use crate::llm::{parse_json_response, LlmClient};
use crate::observer::UiObserver;
use crate::prompt;
use crate::types::{
    ActionDecision, ActionParameters, ActionType, CaptureMode, Direction, Logical, Method,
    Percent, UiElement, UiState,
};

/// Outcome of one `decide` call: the decision plus the freshest snapshot it
/// was resolved against (spec.md §3 lifecycle: the re-resolution rule).
pub struct DecisionOutcome {
    pub decision: ActionDecision,
    pub state: UiState,
    pub target_element: Option<UiElement>,
    /// Number of LLM queries issued this cycle (spec.md §8 invariant 5).
    pub llm_calls: u32,
    /// Number of snapshots taken this cycle (spec.md §8 invariant 5).
    pub snapshots: u32,
}

pub struct DecisionEngine<'a> {
    device: &'a dyn DeviceSession,
    llm: &'a dyn LlmClient,
    config: &'a EngineConfig,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(device: &'a dyn DeviceSession, llm: &'a dyn LlmClient, config: &'a EngineConfig) -> Self {
        Self { device, llm, config }
    }

    /// Orchestrate tiers 1-4 for one instruction.
    pub async fn decide(&self, instruction: &str, history: &[String]) -> Result<DecisionOutcome, EngineError> {
        let observer = UiObserver::new(self.device);
        let mut llm_calls = 0u32;
        let mut snapshots = 0u32;

        if self.config.vision.pure_vision_only {
            let outcome = self
                .tier4_pure_vision(&observer, instruction, history, &mut llm_calls, &mut snapshots)
                .await?;
            return Ok(outcome);
        }

        // Tier 1: hierarchy.
        let state1 = observer.snapshot(CaptureMode::None, self.config.vision.grid_size).await?;
        snapshots += 1;
        let prompt1 = prompt::hierarchy_prompt(instruction, &state1, history);
        let raw1 = self.llm.query(&prompt1, None).await;
        llm_calls += 1;
        let decision1 = match raw1 {
            Ok(text) => parse_decision(&text, Method::Hierarchy),
            Err(e) => {
                warn!("tier 1 LLM query failed: {e}");
                ActionDecision::error(Method::Hierarchy)
            }
        };

        let target1 = decision1
            .element_id
            .as_deref()
            .and_then(|id| state1.find_by_id(id))
            .cloned();

        if !self.should_fallback_to_vision(&decision1, target1.is_some()) {
            info!("tier 1 decision accepted: confidence={:?}", decision1.confidence);
            return Ok(DecisionOutcome {
                decision: decision1,
                state: state1,
                target_element: target1,
                llm_calls,
                snapshots,
            });
        }

        // Tier 2: vision + numeric tags.
        match self
            .tier2_vision_tagging(&observer, instruction, history, &mut llm_calls, &mut snapshots)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(e) => debug!("tier 2 fell through: {e}"),
        }

        // Tier 3: grid overlay.
        match self
            .tier3_grid_overlay(&observer, instruction, history, &mut llm_calls, &mut snapshots)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                if !self.config.vision.pure_vision_config.enabled {
                    return Err(e);
                }
                debug!("tier 3 fell through to tier 4: {e}");
            }
        }

        // Tier 4: pure vision, the last resort.
        self.tier4_pure_vision(&observer, instruction, history, &mut llm_calls, &mut snapshots)
            .await
            .map_err(|e| EngineError::AllTiersExhausted(e.to_string()))
    }

    /// Fallback gate (spec.md §4.F). Triggered when any of:
    /// - vision enabled and `always_use_vision`; or
    /// - `fallback_on_element_not_found` and an `element_id` was given but
    ///   didn't resolve; or
    /// - `fallback_on_low_confidence` and confidence is defined and below
    ///   threshold; or
    /// - the action is `error`.
    fn should_fallback_to_vision(&self, decision: &ActionDecision, target_resolved: bool) -> bool {
        if !self.config.vision_enabled() {
            return false;
        }
        if self.config.vision.always_use_vision {
            return true;
        }
        if self.config.vision.fallback_on_element_not_found
            && decision.element_id.is_some()
            && !target_resolved
        {
            return true;
        }
        if self.config.vision.fallback_on_low_confidence {
            if let Some(confidence) = decision.confidence {
                if confidence < self.config.vision.confidence_threshold {
                    return true;
                }
            }
        }
        if decision.action == ActionType::Error {
            return true;
        }
        false
    }

    async fn tier2_vision_tagging(
        &self,
        observer: &UiObserver<'_>,
        instruction: &str,
        history: &[String],
        llm_calls: &mut u32,
        snapshots: &mut u32,
    ) -> Result<DecisionOutcome, EngineError> {
        let state = observer.snapshot(CaptureMode::Tagged, self.config.vision.grid_size).await?;
        *snapshots += 1;
        let screenshot = state
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| EngineError::Resolution("tagged snapshot produced no screenshot".into()))?;

        let prompt = prompt::tagged_prompt(instruction, &state, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, None)
            .await
            .map_err(EngineError::Llm)?;
        *llm_calls += 1;

        let mut decision = parse_decision(&raw, Method::VisionTagging);
        if decision.action == ActionType::Error {
            return Err(EngineError::Resolution("tier 2 parse failure".into()));
        }

        let tag_id = decision
            .tag_id
            .ok_or_else(|| EngineError::Resolution("tier 2 decision missing tag_id".into()))?;
        let mapping = state
            .tag_mapping
            .as_ref()
            .ok_or_else(|| EngineError::Resolution("tier 2 snapshot missing tag_mapping".into()))?;
        let element = mapping
            .get(&tag_id)
            .ok_or_else(|| EngineError::Resolution(format!("tag_id {tag_id}")))?
            .clone();

        // Default confidence 0.8 when the LLM omits it (spec.md §4.F
        // tier 2 step 3).
        if decision.confidence.is_none() {
            decision.confidence = Some(0.8);
        }
        decision.element_id = Some(element.element_id.clone());
        if decision.coordinates.is_none() {
            decision.coordinates = element.bounds.map(|b| b.center());
        }

        Ok(DecisionOutcome {
            decision,
            state,
            target_element: Some(element),
            llm_calls: *llm_calls,
            snapshots: *snapshots,
        })
    }

    async fn tier3_grid_overlay(
        &self,
        observer: &UiObserver<'_>,
        instruction: &str,
        history: &[String],
        llm_calls: &mut u32,
        snapshots: &mut u32,
    ) -> Result<DecisionOutcome, EngineError> {
        let state = observer.snapshot(CaptureMode::Grid, self.config.vision.grid_size).await?;
        *snapshots += 1;
        let screenshot = state
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| EngineError::Resolution("grid snapshot produced no screenshot".into()))?;

        let prompt = prompt::grid_prompt(instruction, self.config.vision.grid_size, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, None)
            .await
            .map_err(EngineError::Llm)?;
        *llm_calls += 1;

        let mut decision = parse_decision(&raw, Method::GridOverlay);
        if decision.action == ActionType::Error {
            return Err(EngineError::Resolution("tier 3 parse failure".into()));
        }

        let grid_position = decision
            .grid_position
            .clone()
            .ok_or_else(|| EngineError::Resolution("tier 3 decision missing grid_position".into()))?;
        let grid_map = state
            .grid_map
            .as_ref()
            .ok_or_else(|| EngineError::Resolution("tier 3 snapshot missing grid_map".into()))?;
        let logical = grid_map
            .get(&grid_position)
            .copied()
            .ok_or_else(|| EngineError::Resolution(format!("grid_position {grid_position}")))?;

        if decision.confidence.is_none() {
            decision.confidence = Some(0.7);
        }
        decision.coordinates = Some(logical);
        // Coordinate-based decision: no element reference carries over
        // (spec.md §4.F target re-resolution rule).
        decision.element_id = None;

        Ok(DecisionOutcome { decision, state, target_element: None, llm_calls: *llm_calls, snapshots: *snapshots })
    }

    async fn tier4_pure_vision(
        &self,
        observer: &UiObserver<'_>,
        instruction: &str,
        history: &[String],
        llm_calls: &mut u32,
        snapshots: &mut u32,
    ) -> Result<DecisionOutcome, EngineError> {
        // Exactly one raw screenshot per tier-4 decision (spec.md §9 open
        // question resolution).
        let state = observer.snapshot(CaptureMode::Screenshot, self.config.vision.grid_size).await?;
        *snapshots += 1;
        let screenshot = state
            .screenshot_base64
            .as_deref()
            .ok_or_else(|| EngineError::Resolution("screenshot snapshot produced no screenshot".into()))?;
        let window = self
            .device
            .get_window_size()
            .await
            .map_err(|e| EngineError::Observer(crate::errors::ObserverError::Transport(e)))?;

        let prompt = prompt::pure_vision_prompt(instruction, window.width, window.height, history);
        let raw = self
            .llm
            .query_with_vision(&prompt, screenshot, None)
            .await
            .map_err(EngineError::Llm)?;
        *llm_calls += 1;

        let value = parse_json_response(&raw).map_err(EngineError::Llm)?;
        let action = value["action"]
            .as_str()
            .and_then(ActionType::parse)
            .unwrap_or(ActionType::Error);
        let confidence = value["confidence"].as_f64();
        let percent = value["location"]["x_percent"]
            .as_f64()
            .zip(value["location"]["y_percent"].as_f64())
            .map(|(x, y)| Percent { x_percent: x, y_percent: y });

        let minimum = self.config.vision.pure_vision_config.minimum_confidence;
        let confidence = confidence.unwrap_or(0.0);
        if confidence < minimum {
            return Err(EngineError::BelowMinimumConfidence { confidence, minimum });
        }

        let coordinates = percent.map(|p| p.to_logical(window.width, window.height));
        let decision = ActionDecision {
            action,
            element_id: None,
            coordinates,
            parameters: parse_parameters(&value["parameters"]),
            reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
            confidence: Some(confidence),
            method: Method::PureVision,
            tag_id: None,
            grid_position: None,
            location: value["element"].as_str().map(|s| s.to_string()),
        };

        Ok(DecisionOutcome { decision, state, target_element: None, llm_calls: *llm_calls, snapshots: *snapshots })
    }
}

fn parse_parameters(value: &Value) -> ActionParameters {
    ActionParameters {
        text: value["text"].as_str().map(|s| s.to_string()),
        direction: value["direction"].as_str().and_then(Direction::parse),
        distance: value["distance"].as_f64(),
    }
}

/// Parse one tier's raw LLM text into an `ActionDecision`. On any parse
/// failure the decision is recorded as `action=error, confidence=0` — the
/// universal "proceed to next tier" signal (spec.md §4.C, §8 invariant 1).
///
/// Confidence precedence (spec.md §4.F): the parser propagates the
/// LLM-supplied `confidence` verbatim; its absence means `None` (no
/// fallback forced by confidence alone), while a parse error means an
/// explicit `Some(0.0)` (always forces fallback).
fn parse_decision(raw: &str, method: Method) -> ActionDecision {
    let value = match parse_json_response(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!("tier {method:?} parse failure: {e}");
            return ActionDecision::error(method);
        }
    };

    let action = match value["action"].as_str().and_then(ActionType::parse) {
        Some(a) => a,
        None => return ActionDecision::error(method),
    };

    ActionDecision {
        action,
        element_id: value["element_id"].as_str().map(|s| s.to_string()),
        coordinates: None,
        parameters: parse_parameters(&value["parameters"]),
        reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
        confidence: value["confidence"].as_f64(),
        method,
        tag_id: value["tag_id"].as_u64().map(|n| n as u32),
        grid_position: value["grid_position"].as_str().map(|s| s.to_string()),
        location: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::device::{DeviceCapabilities, TouchAction};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedDevice {
        xml: String,
        window: crate::types::WindowSize,
    }

    #[async_trait]
    impl DeviceSession for ScriptedDevice {
        async fn get_page_source(&self) -> Result<String, String> {
            Ok(self.xml.clone())
        }
        async fn get_current_activity(&self) -> Result<String, String> {
            Ok("MainActivity".into())
        }
        async fn get_window_size(&self) -> Result<crate::types::WindowSize, String> {
            Ok(self.window)
        }
        async fn take_screenshot(&self) -> Result<String, String> {
            use base64::{engine::general_purpose, Engine};
            use image::{DynamicImage, ImageBuffer, Rgba};
            let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_pixel(self.window.width, self.window.height, Rgba([255, 255, 255, 255]));
            let mut bytes = Vec::new();
            DynamicImage::ImageRgba8(img)
                .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
                .unwrap();
            Ok(general_purpose::STANDARD.encode(bytes))
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

    struct ScriptedLlm {
        text_responses: Mutex<Vec<String>>,
        vision_responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn query(&self, _prompt: &str, _system_prompt: Option<&str>) -> Result<String, LlmError> {
            let mut r = self.text_responses.lock().unwrap();
            if r.is_empty() {
                return Err(LlmError::Request("no more scripted text responses".into()));
            }
            Ok(r.remove(0))
        }
        async fn query_with_vision(
            &self,
            _prompt: &str,
            _image_base64: &str,
            _system_prompt: Option<&str>,
        ) -> Result<String, LlmError> {
            let mut r = self.vision_responses.lock().unwrap();
            if r.is_empty() {
                return Err(LlmError::Request("no more scripted vision responses".into()));
            }
            Ok(r.remove(0))
        }
    }

    const XML_WITH_BUTTON: &str = r#"<hierarchy>
        <node text="Login" class="android.widget.Button" clickable="true" enabled="true" visible-to-user="true" bounds="[100,200][300,260]" />
    </hierarchy>"#;

    #[tokio::test]
    async fn scenario_s1_high_confidence_tier1_no_fallback() {
        let device = ScriptedDevice { xml: XML_WITH_BUTTON.into(), window: crate::types::WindowSize { width: 390, height: 844 } };
        let llm = ScriptedLlm {
            text_responses: Mutex::new(vec![r#"{"action":"click","element_id":"1","confidence":0.95,"reasoning":"obvious"}"#.into()]),
            vision_responses: Mutex::new(vec![]),
        };
        let config = EngineConfig::default();
        let engine = DecisionEngine::new(&device, &llm, &config);
        let outcome = engine.decide("tap login", &[]).await.unwrap();
        assert_eq!(outcome.decision.method, Method::Hierarchy);
        assert_eq!(outcome.llm_calls, 1);
        assert_eq!(outcome.snapshots, 1);
        let target = outcome.target_element.unwrap();
        assert_eq!(target.bounds.unwrap().center(), Logical::new(200.0, 230.0));
    }

    #[tokio::test]
    async fn scenario_s2_low_confidence_falls_back_to_tier2() {
        let xml = r#"<hierarchy>
            <node text="Login" class="android.widget.Button" clickable="true" visible-to-user="true" bounds="[100,200][300,260]" />
            <node text="Cancel" class="android.widget.Button" clickable="true" visible-to-user="true" bounds="[310,200][400,260]" />
        </hierarchy>"#;
        let device = ScriptedDevice { xml: xml.into(), window: crate::types::WindowSize { width: 390, height: 844 } };
        let llm = ScriptedLlm {
            text_responses: Mutex::new(vec![r#"{"action":"click","element_id":"1","confidence":0.4,"reasoning":"maybe"}"#.into()]),
            vision_responses: Mutex::new(vec![r#"{"action":"click","tag_id":2,"confidence":0.85,"reasoning":"tag 2 looks right"}"#.into()]),
        };
        let config = EngineConfig::default();
        let engine = DecisionEngine::new(&device, &llm, &config);
        let outcome = engine.decide("tap cancel", &[]).await.unwrap();
        assert_eq!(outcome.decision.method, Method::VisionTagging);
        assert_eq!(outcome.llm_calls, 2);
        assert_eq!(outcome.snapshots, 2);
    }

    #[tokio::test]
    async fn scenario_s4_pure_vision_only_single_call() {
        let device = ScriptedDevice { xml: String::new(), window: crate::types::WindowSize { width: 375, height: 812 } };
        let llm = ScriptedLlm {
            text_responses: Mutex::new(vec![]),
            vision_responses: Mutex::new(vec![
                r#"{"element":"Login button","location":{"x_percent":50,"y_percent":85},"action":"click","confidence":0.75,"reasoning":"near bottom"}"#.into(),
            ]),
        };
        let mut config = EngineConfig::default();
        config.vision.pure_vision_only = true;
        let engine = DecisionEngine::new(&device, &llm, &config);
        let outcome = engine.decide("click login", &[]).await.unwrap();
        assert_eq!(outcome.decision.method, Method::PureVision);
        assert_eq!(outcome.llm_calls, 1);
        assert_eq!(outcome.snapshots, 1);
        assert_eq!(outcome.decision.coordinates, Some(Logical::new(187.0, 690.0)));
    }

    #[tokio::test]
    async fn scenario_s5_all_tiers_fail() {
        let device = ScriptedDevice { xml: String::new(), window: crate::types::WindowSize { width: 390, height: 844 } };
        let llm = ScriptedLlm {
            text_responses: Mutex::new(vec!["not json at all".into()]),
            vision_responses: Mutex::new(vec![
                // tier 2: parses but no tag_id.
                r#"{"action":"click","confidence":0.5,"reasoning":"guess"}"#.into(),
                // tier 3: parses but grid_position points nowhere relevant
                // (still a valid cell so resolution succeeds structurally,
                // so make tier 3 fail by omitting grid_position instead).
                r#"{"action":"click","confidence":0.5,"reasoning":"guess"}"#.into(),
                // tier 4: below minimum confidence.
                r#"{"element":"?","location":{"x_percent":50,"y_percent":50},"action":"click","confidence":0.3,"reasoning":"low"}"#.into(),
            ]),
        };
        let config = EngineConfig::default();
        let engine = DecisionEngine::new(&device, &llm, &config);
        let err = engine.decide("tap something", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::AllTiersExhausted(_)));
    }

    #[test]
    fn confidence_precedence_parse_error_forces_zero_llm_says_nothing_is_none() {
        let parsed_ok_no_confidence = parse_decision(r#"{"action":"click","element_id":"1"}"#, Method::Hierarchy);
        assert_eq!(parsed_ok_no_confidence.confidence, None);

        let parsed_error = parse_decision("garbage, not json", Method::Hierarchy);
        assert_eq!(parsed_error.confidence, Some(0.0));
        assert_eq!(parsed_error.action, ActionType::Error);
    }
}
