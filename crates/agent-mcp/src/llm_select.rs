//! Binds `EngineConfig.llm_provider` (spec.md §6) to a concrete
//! `LlmClient` at construction time, the way the teacher's CLI picks a
//! vision backend from a flag rather than baking the choice into the
//! engine.

use async_trait::async_trait;
use mobile_agent_core::config::LlmProvider;
use mobile_agent_core::errors::LlmError;
use mobile_agent_core::llm::{AnthropicClient, LlmClient, OpenAiClient};

pub enum AnyLlmClient {
    OpenAi(OpenAiClient),
    Anthropic(AnthropicClient),
}

impl AnyLlmClient {
    pub fn from_provider(provider: &LlmProvider, api_key: String, model: String) -> Self {
        match provider {
            LlmProvider::OpenAi => AnyLlmClient::OpenAi(OpenAiClient::new(api_key, model)),
            LlmProvider::Anthropic => AnyLlmClient::Anthropic(AnthropicClient::new(api_key, model)),
        }
    }
}

#[async_trait]
impl LlmClient for AnyLlmClient {
    async fn query(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LlmError> {
        match self {
            AnyLlmClient::OpenAi(c) => c.query(prompt, system_prompt).await,
            AnyLlmClient::Anthropic(c) => c.query(prompt, system_prompt).await,
        }
    }

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        match self {
            AnyLlmClient::OpenAi(c) => c.query_with_vision(prompt, image_base64, system_prompt).await,
            AnyLlmClient::Anthropic(c) => c.query_with_vision(prompt, image_base64, system_prompt).await,
        }
    }
}
