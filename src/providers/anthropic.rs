//! Anthropic provider implementation using the `/v1/messages` API.
//!
//! The messages API takes the system prompt as a top-level field, so the
//! system and developer messages are folded into one. Structured output is
//! not native; `parse` injects the schema and extracts JSON from the reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, extract_json_object, inject_schema, validate_against_schema,
    ChatMessage, ChatRole, GenerationConfig, LlmProvider, ProviderError, TokenUsage,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Messages API request body.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

/// A message in Anthropic format.
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

/// Messages API response body.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

/// A content block in a response.
#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

/// Token usage block.
#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Anthropic messages API adapter.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic adapter.
    pub fn new(api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.into(),
            client,
        }
    }

    fn build_request(messages: &[ChatMessage], cfg: &GenerationConfig) -> AnthropicRequest {
        // System and developer messages collapse into the top-level system
        // field; user messages keep their role.
        let mut system_parts: Vec<&str> = Vec::new();
        let mut wire_messages: Vec<AnthropicMessage> = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::User => wire_messages.push(AnthropicMessage {
                    role: "user",
                    content: message.content.clone(),
                }),
            }
        }

        AnthropicRequest {
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: cfg.temperature,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            messages: wire_messages,
        }
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let body = Self::build_request(messages, cfg);
        let response = self
            .client
            .post(ANTHROPIC_API_BASE)
            .timeout(cfg.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let parsed: AnthropicResponse = serde_json::from_str(&payload)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            let usage = TokenUsage {
                input: usage.input_tokens.unwrap_or(0),
                output: usage.output_tokens.unwrap_or(0),
            };
            tracing::debug!(
                vendor = "anthropic",
                model = %cfg.model,
                input_tokens = usage.input,
                output_tokens = usage.output,
                "provider call completed"
            );
        }

        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<String>()
            .trim()
            .to_owned();

        if text.is_empty() {
            return Err(ProviderError::Malformed("empty completion".to_owned()));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        self.request(messages, cfg).await
    }

    async fn parse(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let injected = inject_schema(messages, schema);
        let text = self.request(&injected, cfg).await?;
        let value = extract_json_object(&text)?;
        validate_against_schema(&value, schema)?;
        Ok(value)
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    fn vendor(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::build_messages;

    #[test]
    fn test_system_messages_fold_into_system_field() {
        let messages = build_messages("persona", Some("strict rules"), "pregunta");
        let cfg = GenerationConfig::for_model("claude-3-haiku-20240307");
        let request = AnthropicProvider::build_request(&messages, &cfg);

        assert_eq!(
            request.system.as_deref(),
            Some("persona\n\nstrict rules")
        );
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.messages[0].content, "pregunta");
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_response_parsing_joins_text_blocks() {
        let payload = serde_json::json!({
            "content": [
                {"type": "text", "text": "Els castells "},
                {"type": "text", "text": "són patrimoni."}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let parsed: AnthropicResponse = serde_json::from_value(payload).expect("deserialize");
        let text: String = parsed.content.into_iter().map(|b| b.text).collect();
        assert_eq!(text, "Els castells són patrimoni.");
    }

    #[test]
    fn test_no_structured_output() {
        let provider = AnthropicProvider::new("key", reqwest::Client::new());
        assert!(!provider.supports_structured_output());
        assert_eq!(provider.vendor(), "anthropic");
    }
}
