//! stdio entry point for the mobile automation MCP server. Wires a real
//! `AppiumSession` transport and an `AnyLlmClient` vendor pick into a
//! `SessionController`, then hands the resulting `McpServer` to `rmcp`'s
//! stdio transport. Contains no decision logic - every tool call is
//! delegated straight to `mobile-agent-core`.

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use serde_json::json;
use tracing::info;

use mobile_agent_core::config::{EngineConfig, LlmProvider};
use mobile_agent_mcp::appium::AppiumSession;
use mobile_agent_mcp::llm_select::AnyLlmClient;
use mobile_agent_mcp::server::McpServer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mobile UI automation agent - Model Context Protocol server")]
struct Args {
    /// Appium server URL, e.g. http://127.0.0.1:4723
    #[arg(long, env = "APPIUM_URL", default_value = "http://127.0.0.1:4723")]
    appium_url: String,

    /// Accessibility-platform name passed as the W3C `platformName` capability.
    #[arg(long, env = "APPIUM_PLATFORM", default_value = "Android")]
    platform: String,

    /// Appium `automationName` capability, e.g. UiAutomator2 or XCUITest.
    #[arg(long, env = "APPIUM_AUTOMATION_NAME", default_value = "UiAutomator2")]
    automation_name: String,

    /// Which vendor backs the decision engine's LLM calls.
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "openai")]
    llm_provider: LlmProviderArg,

    /// Model name passed to the LLM provider, e.g. gpt-4o or claude-3-5-sonnet-20241022.
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o")]
    model: String,

    /// API key for the selected LLM provider.
    #[arg(long, env = "LLM_API_KEY")]
    api_key: String,

    /// Directory for before/after step screenshots (spec.md §5 ARTIFACTS_DIR).
    #[arg(long, env = "ARTIFACTS_DIR")]
    artifacts_dir: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LlmProviderArg {
    Openai,
    Anthropic,
}

impl From<LlmProviderArg> for LlmProvider {
    fn from(v: LlmProviderArg) -> Self {
        match v {
            LlmProviderArg::Openai => LlmProvider::OpenAi,
            LlmProviderArg::Anthropic => LlmProvider::Anthropic,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    info!("connecting to Appium at {}", args.appium_url);
    let capabilities = json!({
        "platformName": args.platform,
        "appium:automationName": args.automation_name,
    });
    let device = AppiumSession::connect(&args.appium_url, capabilities).await?;

    let llm_provider: LlmProvider = args.llm_provider.into();
    let llm = AnyLlmClient::from_provider(&llm_provider, args.api_key.clone(), args.model.clone());

    let mut config = EngineConfig {
        llm_provider,
        model: args.model,
        verbose: args.verbose,
        ..EngineConfig::default()
    };
    if args.artifacts_dir.is_some() {
        config.artifacts_dir = args.artifacts_dir;
    }

    let server = McpServer::new(device, llm, config);

    info!("starting stdio transport");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {e}");
    })?;
    service.waiting().await?;

    Ok(())
}
