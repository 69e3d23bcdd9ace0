//! Maps the seven MCP tool operations from spec.md §6 ("Tool surface")
//! directly onto `SessionController` methods. Contains no decision logic of
//! its own - every tool body is a thin translation between JSON-RPC
//! arguments and the core's public API, the way the teacher repo keeps
//! `terminator-mcp-agent` a pure front-end over the `terminator` crate.

use std::sync::Arc;

use mobile_agent_core::config::EngineConfig;
use mobile_agent_core::session::SessionController;
use mobile_agent_core::types::SessionStatus;
use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_router, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::appium::AppiumSession;
use crate::llm_select::AnyLlmClient;

type Session = SessionController<AppiumSession, AnyLlmClient>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StopSessionArgs {
    /// "passed" or "failed".
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteArgs {
    /// Natural-language instruction, e.g. "tap the blue login button".
    pub instruction: String,
    /// Optional per-call override: "pure_vision" skips tiers 1-3 for this
    /// one instruction, restoring the prior setting afterward (spec.md §6
    /// tool surface: `execute(instruction, visionMode?)`).
    pub vision_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssertArgs {
    /// Natural-language condition, e.g. "home screen is visible".
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TakeScreenshotArgs {
    pub save_to_file: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetStateArgs {
    pub include_screenshot: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConfigureArgs {
    pub confidence_threshold: Option<f64>,
    pub grid_size: Option<u32>,
    pub always_use_vision: Option<bool>,
    pub pure_vision_only: Option<bool>,
    pub verbose: Option<bool>,
}

#[derive(Clone)]
pub struct McpServer {
    inner: Arc<Mutex<Session>>,
    tool_router: ToolRouter<McpServer>,
}

#[tool_router]
impl McpServer {
    pub fn new(device: AppiumSession, llm: AnyLlmClient, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionController::new(device, llm, config))),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Start a new automation session. Must be called before execute/assert.")]
    pub async fn start_session(&self) -> Result<CallToolResult, McpError> {
        let mut session = self.inner.lock().await;
        session.start_session().map_err(session_error)?;
        info!("session started via MCP");
        Ok(CallToolResult::success(vec![Content::text("session started")]))
    }

    #[tool(description = "Seal the current session with a final status (\"passed\" or \"failed\").")]
    pub async fn stop_session(
        &self,
        Parameters(args): Parameters<StopSessionArgs>,
    ) -> Result<CallToolResult, McpError> {
        let status = match args.status.to_lowercase().as_str() {
            "passed" => SessionStatus::Passed,
            "failed" => SessionStatus::Failed,
            other => {
                return Err(McpError::invalid_params(
                    format!("status must be \"passed\" or \"failed\", got \"{other}\""),
                    None,
                ))
            }
        };
        let mut session = self.inner.lock().await;
        session.stop_session(status).map_err(session_error)?;
        Ok(CallToolResult::success(vec![Content::text("session stopped")]))
    }

    #[tool(description = "Decide and execute one action for a natural-language instruction, \
        then wait for the UI to settle.")]
    pub async fn execute(
        &self,
        Parameters(args): Parameters<ExecuteArgs>,
    ) -> Result<CallToolResult, McpError> {
        let mut session = self.inner.lock().await;

        let restore_pure_vision = match args.vision_mode.as_deref() {
            Some("pure_vision") => {
                let prior = session.config().vision.pure_vision_only;
                session.config_mut().vision.pure_vision_only = true;
                Some(prior)
            }
            _ => None,
        };

        let result = session.execute(&args.instruction).await;

        if let Some(prior) = restore_pure_vision {
            session.config_mut().vision.pure_vision_only = prior;
        }

        let step = result.map_err(session_error)?;
        Ok(CallToolResult::success(vec![Content::json(step)?]))
    }

    #[tool(description = "Verify a natural-language condition against the current UI, recording it \
        permanently in the session's verification history.")]
    pub async fn assert(
        &self,
        Parameters(args): Parameters<AssertArgs>,
    ) -> Result<CallToolResult, McpError> {
        let mut session = self.inner.lock().await;
        let point = session.assert(&args.condition).await.map_err(session_error)?;
        Ok(CallToolResult::success(vec![Content::json(point)?]))
    }

    #[tool(description = "Capture a raw screenshot of the current screen.")]
    pub async fn take_screenshot(
        &self,
        Parameters(args): Parameters<TakeScreenshotArgs>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.inner.lock().await;
        let screenshot = session.take_screenshot().await.map_err(session_error)?;

        if args.save_to_file.unwrap_or(false) {
            Ok(CallToolResult::success(vec![Content::image(screenshot, "image/png".to_string())]))
        } else {
            Ok(CallToolResult::success(vec![Content::json(json!({
                "screenshot_base64": screenshot,
            }))?]))
        }
    }

    #[tool(description = "Get the current UI state: activity, element count, device info, and \
        optionally a screenshot.")]
    pub async fn get_state(
        &self,
        Parameters(args): Parameters<GetStateArgs>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.inner.lock().await;
        let state = if args.include_screenshot.unwrap_or(false) {
            session.get_current_state_with_screenshot().await
        } else {
            session.get_current_state().await
        }
        .map_err(session_error)?;
        Ok(CallToolResult::success(vec![Content::json(state)?]))
    }

    #[tool(description = "Adjust the vision-fallback configuration (confidence threshold, grid \
        size, always/pure vision, verbosity) for subsequent execute() calls.")]
    pub async fn configure(
        &self,
        Parameters(args): Parameters<ConfigureArgs>,
    ) -> Result<CallToolResult, McpError> {
        let mut session = self.inner.lock().await;
        let cfg = session.config_mut();
        if let Some(v) = args.confidence_threshold {
            cfg.vision.confidence_threshold = v;
        }
        if let Some(v) = args.grid_size {
            cfg.vision.grid_size = v;
        }
        if let Some(v) = args.always_use_vision {
            cfg.vision.always_use_vision = v;
        }
        if let Some(v) = args.pure_vision_only {
            cfg.vision.pure_vision_only = v;
        }
        if let Some(v) = args.verbose {
            cfg.verbose = v;
        }
        Ok(CallToolResult::success(vec![Content::text("configuration updated")]))
    }
}

fn session_error(e: mobile_agent_core::errors::SessionError) -> McpError {
    error!("session operation failed: {e}");
    McpError::internal_error(e.to_string(), None)
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Mobile UI automation agent: start_session, then execute()/assert() natural-\
                 language instructions against a live device session."
                    .to_string(),
            ),
        }
    }

    async fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        use rmcp::handler::server::tool::ToolCallContext;
        let tcc = ToolCallContext::new(self, request, context);
        self.tool_router.call(tcc).await
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<rmcp::model::ListToolsResult, McpError> {
        Ok(rmcp::model::ListToolsResult::with_all_items(self.tool_router.list_all()))
    }
}
