//! Generic adapter for `/chat/completions`-shaped endpoints.
//!
//! One instance per vendor: OpenAI itself plus the compatible endpoints of
//! Groq, DeepSeek, Cerebras, SambaNova, and Gemini. Vendors differ only in
//! base URL, API key, and whether they enforce JSON schemas natively; the
//! wire format is shared.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    check_http_response, extract_json_object, inject_schema, validate_against_schema,
    ChatMessage, ChatRole, GenerationConfig, LlmProvider, ProviderError, TokenUsage,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// A message in chat completions format.
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Chat completions response body.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

/// A response choice.
#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

/// Assistant message in a response choice.
#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

/// Token usage block.
#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
    }
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: wire_role(m.role),
            content: m.content.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Adapter for an OpenAI-compatible vendor endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    vendor: String,
    base_url: String,
    api_key: String,
    structured_output: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create an adapter for one vendor.
    ///
    /// `base_url` is the API root up to and including the version segment
    /// (e.g. `https://api.groq.com/openai/v1`). `structured_output` marks
    /// vendors that enforce `json_schema` response formats natively.
    pub fn new(
        vendor: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        structured_output: bool,
        client: reqwest::Client,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            structured_output,
            client,
        }
    }

    async fn request(
        &self,
        body: &ChatCompletionRequest,
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(cfg.timeout)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&payload)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            let usage = TokenUsage {
                input: usage.prompt_tokens.unwrap_or(0),
                output: usage.completion_tokens.unwrap_or(0),
            };
            tracing::debug!(
                vendor = %self.vendor,
                model = %cfg.model,
                input_tokens = usage.input,
                output_tokens = usage.output,
                "provider call completed"
            );
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_owned())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::Malformed("empty completion".to_owned()));
        }
        Ok(content)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let body = ChatCompletionRequest {
            model: cfg.model.clone(),
            messages: to_wire_messages(messages),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            response_format: None,
        };
        self.request(&body, cfg).await
    }

    async fn parse(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let (wire_messages, response_format) = if self.structured_output {
            (
                to_wire_messages(messages),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "schema": schema,
                    },
                }),
            )
        } else {
            (
                to_wire_messages(&inject_schema(messages, schema)),
                json!({"type": "json_object"}),
            )
        };

        let body = ChatCompletionRequest {
            model: cfg.model.clone(),
            messages: wire_messages,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            response_format: Some(response_format),
        };

        let text = self.request(&body, cfg).await?;
        let value = extract_json_object(&text)?;
        validate_against_schema(&value, schema)?;
        Ok(value)
    }

    fn supports_structured_output(&self) -> bool {
        self.structured_output
    }

    fn vendor(&self) -> &str {
        &self.vendor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini".to_owned(),
            messages: vec![WireMessage {
                role: "user",
                content: "hola".to_owned(),
            }],
            temperature: 0.0,
            max_tokens: None,
            response_format: None,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let payload = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Bon dia!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed: ChatCompletionResponse =
            serde_json::from_value(payload).expect("deserialize");
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Bon dia!")
        );
        let usage = parsed.usage.expect("usage present");
        assert_eq!(usage.prompt_tokens, Some(12));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let payload = serde_json::json!({
            "choices": [{"message": {"content": "x"}}]
        });
        let parsed: ChatCompletionResponse =
            serde_json::from_value(payload).expect("deserialize");
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_capability_flag() {
        let client = reqwest::Client::new();
        let native = OpenAiCompatProvider::new("openai", "https://x", "k", true, client.clone());
        let injected = OpenAiCompatProvider::new("sambanova", "https://y", "k", false, client);
        assert!(native.supports_structured_output());
        assert!(!injected.supports_structured_output());
        assert_eq!(injected.vendor(), "sambanova");
    }
}
