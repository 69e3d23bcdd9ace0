//! Uniform text + vision query interface and the structured-response
//! parser every tier depends on (spec.md §4.C).

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::LlmError;

/// The capability the decision engine consumes. Model selection and auth
/// are construction-time concerns of the implementing type.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn query(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LlmError>;

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError>;
}

/// Temperature fixed at a deterministic-leaning value (spec.md §4.C);
/// implementations MAY use 0 for reproducible testing.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Sized for short JSON objects, not free-form prose.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Adapter over an OpenAI-shaped chat-completions API, reached with a plain
/// `reqwest` client rather than a vendor SDK (spec.md §1: vendor SDKs are
/// an external collaborator; the core only needs the HTTP shape).
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    async fn chat(&self, messages: Value) -> Result<String, LlmError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": DEFAULT_MAX_TOKENS,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Request(format!("{status}: {text}")));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Request(e.to_string()))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::SchemaMismatch("missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn query(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));
        self.chat(Value::Array(messages)).await
    }

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": prompt},
                {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{image_base64}")}}
            ]
        }));
        self.chat(Value::Array(messages)).await
    }
}

/// Adapter over an Anthropic-shaped messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn messages(&self, content: Value, system_prompt: Option<&str>) -> Result<String, LlmError> {
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "temperature": DEFAULT_TEMPERATURE,
            "messages": [{"role": "user", "content": content}],
        });
        if let Some(sys) = system_prompt {
            payload["system"] = Value::String(sys.to_string());
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Request(format!("{status}: {text}")));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Request(e.to_string()))?;
        body["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::SchemaMismatch("missing content[0].text".into()))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn query(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LlmError> {
        self.messages(Value::String(prompt.to_string()), system_prompt)
            .await
    }

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        let content = serde_json::json!([
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": image_base64}},
            {"type": "text", "text": prompt}
        ]);
        self.messages(content, system_prompt).await
    }
}

/// Recursive-descent-flavored response parser (spec.md §4.C, design note
/// in §9): strict parse -> fenced strip -> first-object extraction ->
/// backtick strip, in that order, each falling through to the next on
/// failure. Fails with the original snippet for diagnostics.
pub fn parse_json_response(raw: &str) -> Result<Value, LlmError> {
    let trimmed = raw.trim();

    // 1. Raw JSON.
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    // 2. JSON fenced in a markdown code fence (``` or ```json).
    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced.trim()) {
            return Ok(v);
        }
        // 4. Identical content with stray backticks inside the fence.
        let backtick_stripped = fenced.trim().trim_matches('`');
        if let Ok(v) = serde_json::from_str::<Value>(backtick_stripped) {
            return Ok(v);
        }
    }

    // 3. JSON embedded in surrounding prose - recover the first {...} or
    // [...] block.
    if let Some(extracted) = extract_first_json_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(&extracted) {
            return Ok(v);
        }
    }

    // 4. Stray backticks with no fence markers at all.
    let backtick_stripped = trimmed.trim_matches('`');
    if backtick_stripped != trimmed {
        if let Ok(v) = serde_json::from_str::<Value>(backtick_stripped) {
            return Ok(v);
        }
    }

    debug!("failed to parse LLM response as JSON: {trimmed}");
    Err(LlmError::NoJsonFound {
        snippet: trimmed.chars().take(300).collect(),
    })
}

fn strip_code_fence(s: &str) -> Option<&str> {
    let s = s.strip_prefix("```")?;
    let s = s.strip_prefix("json").unwrap_or(s);
    let s = s.strip_prefix('\n').unwrap_or(s);
    s.rfind("```").map(|idx| &s[..idx])
}

/// Scan for the first balanced `{...}` or `[...]` block, whichever opening
/// bracket appears first, respecting string literals so braces inside
/// quoted text don't throw off the balance count.
fn extract_first_json_block(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{' || b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_json() {
        let v = parse_json_response(r#"{"action":"click","confidence":0.9}"#).unwrap();
        assert_eq!(v["action"], "click");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"action\":\"click\"}\n```";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["action"], "click");
    }

    #[test]
    fn parses_bare_fenced_json() {
        let raw = "```\n{\"action\":\"tap\"}\n```";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["action"], "tap");
    }

    #[test]
    fn extracts_json_from_surrounding_prose() {
        let raw = "Sure, here is the decision: {\"action\":\"swipe\",\"parameters\":{\"direction\":\"up\"}} hope that helps!";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["action"], "swipe");
    }

    #[test]
    fn ignores_braces_inside_string_literals_when_extracting() {
        let raw = r#"note: {"reasoning": "the button says {submit}", "action": "click"}"#;
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["action"], "click");
    }

    #[test]
    fn strips_stray_backticks() {
        let raw = "`{\"action\":\"click\"}`";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["action"], "click");
    }

    #[test]
    fn fails_with_original_snippet_on_total_garbage() {
        let err = parse_json_response("not json at all, sorry").unwrap_err();
        match err {
            LlmError::NoJsonFound { snippet } => assert!(snippet.contains("not json at all")),
            _ => panic!("expected NoJsonFound"),
        }
    }

    #[test]
    fn idempotent_on_supported_shapes() {
        let shapes = [
            r#"{"a":1}"#,
            "```json\n{\"a\":1}\n```",
            "prose {\"a\":1} more prose",
            "`{\"a\":1}`",
        ];
        for shape in shapes {
            let first = parse_json_response(shape).unwrap();
            let repr = serde_json::to_string(&first).unwrap();
            let second = parse_json_response(&repr).unwrap();
            assert_eq!(first, second);
        }
    }
}
