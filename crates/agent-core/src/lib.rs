//! `mobile_agent_core` - the adaptive four-tier decision engine for mobile
//! UI automation agents.
//!
//! The crate is organized bottom-up: [`types`] and [`errors`] define the
//! shared vocabulary; [`device`] and [`llm`] are the two abstract
//! capabilities the rest of the crate is polymorphic over; [`overlay`],
//! [`observer`], and [`prompt`] build one tier's inputs; [`dispatcher`]
//! executes a decision's gesture; [`engine`] runs the tier cascade; and
//! [`session`] is the stateful entry point most callers use.
//!
//! A concrete WebDriver/Appium transport and vendor LLM SDKs are external
//! collaborators implementing [`device::DeviceSession`] and [`llm::LlmClient`]
//! respectively - this crate only depends on the traits.

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod llm;
pub mod observer;
pub mod overlay;
pub mod prompt;
pub mod session;
pub mod types;

pub use config::EngineConfig;
pub use device::DeviceSession;
pub use dispatcher::ActionDispatcher;
pub use engine::DecisionEngine;
pub use llm::LlmClient;
pub use session::{ExecuteAndWaitOptions, SessionController};
pub use types::{ActionDecision, ActionStep, SessionStatus, UiState, VerificationPoint};
