//! Ollama provider implementation using the `/api/chat` API.
//!
//! Local models need no API key. JSON mode is requested via the `format`
//! field; the schema is still injected into the prompt since Ollama does not
//! validate against it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, extract_json_object, inject_schema, validate_against_schema,
    ChatMessage, ChatRole, GenerationConfig, LlmProvider, ProviderError,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Ollama chat request body.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

/// A message in Ollama chat format.
#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

/// Ollama chat response body.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
}

/// Assistant message in an Ollama response.
#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|m| OllamaMessage {
            role: match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
            },
            content: m.content.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Ollama local-model adapter.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create an adapter against a local Ollama server.
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn request(
        &self,
        body: &OllamaRequest,
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(cfg.timeout)
            .json(body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let parsed: OllamaResponse = serde_json::from_str(&payload)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let content = parsed.message.content.trim().to_owned();
        if content.is_empty() {
            return Err(ProviderError::Malformed("empty completion".to_owned()));
        }
        Ok(content)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError> {
        let body = OllamaRequest {
            model: cfg.model.clone(),
            messages: to_wire_messages(messages),
            stream: false,
            format: None,
        };
        self.request(&body, cfg).await
    }

    async fn parse(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let body = OllamaRequest {
            model: cfg.model.clone(),
            messages: to_wire_messages(&inject_schema(messages, schema)),
            stream: false,
            format: Some("json"),
        };
        let text = self.request(&body, cfg).await?;
        let value = extract_json_object(&text)?;
        validate_against_schema(&value, schema)?;
        Ok(value)
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    fn vendor(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let body = OllamaRequest {
            model: "llama3.1:8b".to_owned(),
            messages: vec![OllamaMessage {
                role: "user",
                content: "hola".to_owned(),
            }],
            stream: false,
            format: Some("json"),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["model"], "llama3.1:8b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
    }

    #[test]
    fn test_response_parsing() {
        let payload = serde_json::json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": "Bon dia"},
            "done": true
        });
        let parsed: OllamaResponse = serde_json::from_value(payload).expect("deserialize");
        assert_eq!(parsed.message.content, "Bon dia");
    }
}
