//! Error taxonomy for the decision engine and its supporting components.
//!
//! Each concern gets its own small `thiserror` enum, mirroring the shape a
//! lower layer's error naturally takes; `EngineError` aggregates the ones
//! the decision engine can actually surface to a caller (spec.md §7).

use thiserror::Error;

/// Errors from the image overlay renderer (spec.md §4.A).
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("screenshot has zero or missing dimensions")]
    InvalidImageDimensions,
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("font load error: {0}")]
    Font(String),
}

/// Errors from the UI observer (spec.md §4.B).
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("device transport error: {0}")]
    Transport(String),
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),
}

/// Errors from the LLM adapter (spec.md §4.C).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(String),
    #[error("no JSON object found in response: {snippet}")]
    NoJsonFound { snippet: String },
    #[error("response JSON did not match expected schema: {0}")]
    SchemaMismatch(String),
}

/// Errors from the action dispatcher (spec.md §4.E).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no element or coordinates to {action}")]
    NoTarget { action: String },
    #[error("device transport error: {0}")]
    Transport(String),
}

/// Errors from the decision engine cascade (spec.md §4.F, §7).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("observer error: {0}")]
    Observer(#[from] ObserverError),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("resolution error: {0} referenced by decision does not exist in the snapshot")]
    Resolution(String),
    #[error("tier-4 confidence {confidence} is below the configured minimum {minimum}")]
    BelowMinimumConfidence { confidence: f64, minimum: f64 },
    #[error("all tiers exhausted; last error: {0}")]
    AllTiersExhausted(String),
}

/// Errors from the session controller (spec.md §4.G, §7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session is open; call start_session first")]
    NoActiveSession,
    #[error("session is already open")]
    SessionAlreadyOpen,
    #[error("session has already been stopped")]
    SessionClosed,
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("io error writing artifact: {0}")]
    Artifact(#[from] std::io::Error),
}
