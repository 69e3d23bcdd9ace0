//! Public configuration surface (spec.md §6).

use serde::{Deserialize, Serialize};

/// Which model vendor the engine binds an `LlmClient` implementation to.
/// Construction-time concern; the engine itself is generic over the trait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

impl Default for LlmProvider {
    fn default() -> Self {
        LlmProvider::OpenAi
    }
}

/// Tier-4 (pure vision) specific knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PureVisionConfig {
    /// Enable tier 4 as a last resort.
    pub enabled: bool,
    /// Confidences below this raise an error that terminates the cascade.
    pub minimum_confidence: f64,
}

impl Default for PureVisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_confidence: 0.5,
        }
    }
}

/// Vision-fallback configuration (spec.md §6, §4.F fallback predicate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Master vision-fallback toggle; takes precedence over the legacy
    /// `enable_vision_fallback` flag on `EngineConfig`.
    pub enabled: bool,
    pub fallback_on_element_not_found: bool,
    pub fallback_on_low_confidence: bool,
    pub confidence_threshold: f64,
    /// NxN grid, configurable 5..20.
    pub grid_size: u32,
    /// Force fallback on every action.
    pub always_use_vision: bool,
    /// Skip tiers 1-3 entirely; run tier 4 only.
    pub pure_vision_only: bool,
    pub pure_vision_config: PureVisionConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_on_element_not_found: true,
            fallback_on_low_confidence: true,
            confidence_threshold: 0.7,
            grid_size: 10,
            always_use_vision: false,
            pure_vision_only: false,
            pure_vision_config: PureVisionConfig::default(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub llm_provider: LlmProvider,
    pub model: String,
    /// Elevates log level to debug.
    pub verbose: bool,
    /// Legacy coarse toggle; superseded by `vision.enabled` when set.
    pub enable_vision_fallback: bool,
    pub vision: VisionConfig,
    /// When set, enables per-step before/after screenshot persistence.
    pub artifacts_dir: Option<String>,
    /// Default poll/timeout for the UI-settle wait (spec.md §5).
    pub settle_poll_ms: u64,
    pub settle_timeout_ms: u64,
    /// Default deadline for the verification-as-wait primitive.
    pub verification_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::default(),
            model: "gpt-4o".to_string(),
            verbose: false,
            enable_vision_fallback: true,
            vision: VisionConfig::default(),
            artifacts_dir: std::env::var("ARTIFACTS_DIR").ok(),
            settle_poll_ms: 150,
            settle_timeout_ms: 1200,
            verification_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Master vision toggle resolution: `vision.enabled` takes precedence
    /// over the legacy `enable_vision_fallback` (spec.md §6 table).
    pub fn vision_enabled(&self) -> bool {
        self.vision.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.vision.confidence_threshold, 0.7);
        assert_eq!(cfg.vision.grid_size, 10);
        assert!(!cfg.vision.always_use_vision);
        assert!(!cfg.vision.pure_vision_only);
        assert!(cfg.vision.pure_vision_config.enabled);
        assert_eq!(cfg.vision.pure_vision_config.minimum_confidence, 0.5);
    }
}
