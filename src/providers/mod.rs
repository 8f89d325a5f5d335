//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the shared request/response types
//! used by all provider implementations.
//!
//! Three wire protocols are implemented:
//! - [`openai_compat::OpenAiCompatProvider`] — any `/chat/completions`-shaped
//!   endpoint (OpenAI, Groq, DeepSeek, Cerebras, SambaNova, Gemini)
//! - [`anthropic::AnthropicProvider`] — Anthropic `/v1/messages` API
//! - [`ollama::OllamaProvider`] — Ollama `/api/chat` API
//!
//! The [`registry::ProviderRegistry`] resolves `vendor:model` spec strings to
//! shared adapter instances; [`registry::LlmClient`] is the facade the
//! pipeline calls, applying the retry policy uniformly.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod anthropic;
pub mod ollama;
pub mod openai_compat;
pub mod registry;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
///
/// The pipeline only ever sends system and user messages; a "developer"
/// message is carried as a second system message for vendors without that
/// role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System message (persona or strict formatting rules).
    System,
    /// Human user message carrying the question and data.
    User,
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: ChatRole,
    /// Plain text content.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Build the `{system, developer?, user}` message triplet.
///
/// The developer message, when present, becomes a second system message so
/// the contract is uniform across vendors that lack a developer role.
pub fn build_messages(
    system: &str,
    developer: Option<&str>,
    user: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];
    if let Some(dev) = developer {
        messages.push(ChatMessage::system(dev));
    }
    messages.push(ChatMessage::user(user));
    messages
}

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Model name, without the vendor prefix.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens, when capped.
    pub max_tokens: Option<u32>,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl GenerationConfig {
    /// Settings for a model with the default temperature and timeout.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Token usage reported by a vendor for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub input: u64,
    /// Tokens generated.
    pub output: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure (includes client-side timeouts).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Rate limit still hit after the full retry budget.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The vendor rejected the configured credentials.
    #[error("provider authentication failed: {0}")]
    Auth(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Response did not match the expected shape or schema.
    #[error("provider response parse error: {0}")]
    Malformed(String),
    /// Provider cannot satisfy the request with current configuration.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// True for errors the retry policy treats as rate limiting.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 429, .. })
    }

    /// True for transient transport errors retried once when idempotent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by all adapters
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// 401/403 map to [`ProviderError::Auth`]; other non-2xx to
/// [`ProviderError::HttpStatus`] with a sanitized body.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::Auth(sanitize_error_body(&body)));
    }
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"gsk_[A-Za-z0-9]{20,}",
        r"Bearer [A-Za-z0-9._\-]{16,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Structured-output helpers
// ---------------------------------------------------------------------------

/// Flatten a JSON schema to a field-name → type map for prompt injection.
///
/// Vendors without native structured output get this compact rendering
/// instead of the full schema, which small models follow more reliably.
/// Arrays render as `"[itemtype]"`.
pub fn simplify_schema(schema: &Value) -> String {
    let mut simplified = serde_json::Map::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, field) in properties {
            let field_type = field.get("type").and_then(Value::as_str).unwrap_or("string");
            if field_type == "array" {
                let items = field
                    .get("items")
                    .and_then(|i| i.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("string");
                simplified.insert(name.clone(), Value::String(format!("[{items}]")));
            } else {
                simplified.insert(name.clone(), Value::String(field_type.to_owned()));
            }
        }
    }
    serde_json::to_string_pretty(&Value::Object(simplified)).unwrap_or_else(|_| "{}".to_owned())
}

/// The Catalan instruction appended to the user message when a schema is
/// injected rather than natively enforced.
pub fn schema_injection_suffix(schema: &Value) -> String {
    format!(
        "\n\nRESPON OBLIGATÒRIAMENT en format JSON seguint EXACTAMENT aquest esquema:\n{}\n\nNomés retorna el JSON, sense explicacions.",
        simplify_schema(schema)
    )
}

/// Append the schema injection suffix to the final user message.
pub fn inject_schema(messages: &[ChatMessage], schema: &Value) -> Vec<ChatMessage> {
    let mut injected = messages.to_vec();
    if let Some(last) = injected.last_mut() {
        if last.role == ChatRole::User {
            last.content.push_str(&schema_injection_suffix(schema));
        }
    }
    injected
}

/// Extract the first JSON object from model output.
///
/// Strips `<think>…</think>` reasoning tags and code fences, then takes the
/// widest `{…}` span.
///
/// # Errors
///
/// Returns `ProviderError::Malformed` when no parseable object is found.
pub fn extract_json_object(text: &str) -> Result<Value, ProviderError> {
    let without_think = Regex::new(r"(?s)<think>.*?</think>")
        .map(|re| re.replace_all(text, "").into_owned())
        .unwrap_or_else(|_| text.to_owned());
    let cleaned = strip_code_fences(&without_think);

    let start = cleaned
        .find('{')
        .ok_or_else(|| ProviderError::Malformed("no JSON object in response".to_owned()))?;
    let end = cleaned
        .rfind('}')
        .ok_or_else(|| ProviderError::Malformed("unterminated JSON object".to_owned()))?;
    if end < start {
        return Err(ProviderError::Malformed(
            "unterminated JSON object".to_owned(),
        ));
    }

    serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| ProviderError::Malformed(format!("invalid JSON in response: {e}")))
}

/// Validate that a parsed value carries every `required` field of `schema`.
///
/// # Errors
///
/// Returns `ProviderError::Malformed` naming the first missing field.
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), ProviderError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let object = value
        .as_object()
        .ok_or_else(|| ProviderError::Malformed("expected a JSON object".to_owned()))?;
    for field in required.iter().filter_map(Value::as_str) {
        if !object.contains_key(field) {
            return Err(ProviderError::Malformed(format!(
                "missing required field '{field}'"
            )));
        }
    }
    Ok(())
}

/// Strip leading/trailing markdown code fences (```sql, ```json, bare ```).
pub fn strip_code_fences(text: &str) -> String {
    let mut out = text.trim();
    if let Some(rest) = out.strip_prefix("```") {
        // Drop the language tag line if present.
        out = rest;
        if let Some(newline) = out.find('\n') {
            let (tag, body) = out.split_at(newline);
            if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                out = body;
            }
        }
    }
    if let Some(rest) = out.strip_suffix("```") {
        out = rest;
    }
    out.trim().to_owned()
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
///
/// All implementations must be `Send + Sync`; one shared instance serves
/// every request task.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request plain-text generation.
    ///
    /// The returned text is trimmed and guaranteed non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
    ) -> Result<String, ProviderError>;

    /// Request a value conforming to `schema`.
    ///
    /// Adapters with native structured output enforce the schema on the
    /// wire; others inject it into the prompt and parse the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Malformed`] when the reply cannot be coerced
    /// to the schema.
    async fn parse(
        &self,
        messages: &[ChatMessage],
        cfg: &GenerationConfig,
        schema: &Value,
    ) -> Result<Value, ProviderError>;

    /// Whether this vendor enforces JSON schemas natively.
    fn supports_structured_output(&self) -> bool;

    /// Vendor identifier (`"openai"`, `"anthropic"`, ...).
    fn vendor(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry an idempotent provider call.
///
/// Rate-limit responses retry with exponential backoff (base doubling per
/// attempt) up to `retries` total attempts, then surface
/// [`ProviderError::RateLimitExceeded`]. Transient transport errors retry
/// once. Everything else surfaces immediately.
///
/// # Errors
///
/// The final error once the budget is spent.
pub async fn call_with_retry<T, F, Fut>(
    retries: u32,
    backoff_base: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let attempts = retries.max(1);
    let mut transient_retried = false;
    let mut attempt = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limit() => {
                attempt = attempt.saturating_add(1);
                if attempt >= attempts {
                    return Err(ProviderError::RateLimitExceeded { attempts });
                }
                let delay =
                    backoff_base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "rate limit hit, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() && !transient_retried => {
                transient_retried = true;
                tracing::warn!(error = %e, "transient provider error, retrying once");
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Parse a model spec like `"sambanova:Meta-Llama-3.3-70B-Instruct"` into
/// `(vendor, model)`.
///
/// # Errors
///
/// Returns an error unless the string has a non-empty vendor and model
/// separated by the first `:`.
pub fn parse_model_spec(spec: &str) -> Result<(&str, &str), ProviderError> {
    let (vendor, model) = spec.split_once(':').ok_or_else(|| {
        ProviderError::Unavailable(format!(
            "invalid model spec '{spec}', expected 'vendor:model'"
        ))
    })?;
    if vendor.is_empty() || model.is_empty() {
        return Err(ProviderError::Unavailable(format!(
            "invalid model spec '{spec}', vendor and model must be non-empty"
        )));
    }
    Ok((vendor, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_messages_triplet() {
        let messages = build_messages("persona", Some("rules"), "question");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::System);
        assert_eq!(messages[1].content, "rules");
        assert_eq!(messages[2].role, ChatRole::User);
    }

    #[test]
    fn test_build_messages_without_developer() {
        let messages = build_messages("persona", None, "question");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ChatRole::User);
    }

    #[test]
    fn test_parse_model_spec() {
        let (vendor, model) = parse_model_spec("groq:llama-3.1-8b-instant").expect("valid");
        assert_eq!(vendor, "groq");
        assert_eq!(model, "llama-3.1-8b-instant");

        // Model names may themselves contain colons (ollama tags).
        let (vendor, model) = parse_model_spec("ollama:llama3.1:8b").expect("valid");
        assert_eq!(vendor, "ollama");
        assert_eq!(model, "llama3.1:8b");

        assert!(parse_model_spec("no-separator").is_err());
        assert!(parse_model_spec(":model").is_err());
        assert!(parse_model_spec("vendor:").is_err());
    }

    #[test]
    fn test_simplify_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tool": {"type": "string"},
                "teams": {"type": "array", "items": {"type": "string"}},
                "positions": {"type": "array", "items": {"type": "integer"}}
            },
            "required": ["tool"]
        });
        let simplified = simplify_schema(&schema);
        assert!(simplified.contains("\"tool\": \"string\""));
        assert!(simplified.contains("\"teams\": \"[string]\""));
        assert!(simplified.contains("\"positions\": \"[integer]\""));
    }

    #[test]
    fn test_inject_schema_appends_to_user() {
        let schema = json!({"properties": {"x": {"type": "string"}}});
        let messages = build_messages("sys", None, "question");
        let injected = inject_schema(&messages, &schema);
        assert!(injected[1].content.contains("format JSON"));
        assert!(injected[0].content == "sys");
    }

    #[test]
    fn test_extract_json_object_plain() {
        let value = extract_json_object("{\"a\": 1}").expect("parse");
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_extract_json_object_with_noise() {
        let text = "<think>let me reason about this</think>\nHere you go:\n```json\n{\"tool\": \"sql\"}\n```";
        let value = extract_json_object(text).expect("parse");
        assert_eq!(value["tool"], "sql");
    }

    #[test]
    fn test_extract_json_object_missing() {
        assert!(extract_json_object("no json here").is_err());
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = json!({"required": ["tool", "direct_response"]});
        let ok = json!({"tool": "rag", "direct_response": ""});
        assert!(validate_against_schema(&ok, &schema).is_ok());

        let missing = json!({"tool": "rag"});
        let err = validate_against_schema(&missing, &schema).expect_err("should fail");
        assert!(err.to_string().contains("direct_response"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_sanitize_error_body_redacts_keys() {
        let body = "error sk-ant-REDACTED and more";
        let sanitized = sanitize_error_body(body);
        assert!(!sanitized.contains("sk-ant-REDACTED"));
        assert!(sanitized.contains("[REDACTED]"));
    }

    #[test]
    fn test_sanitize_error_body_truncates() {
        let body = "x".repeat(1000);
        let sanitized = sanitize_error_body(&body);
        assert!(sanitized.ends_with("...[truncated]"));
        assert!(sanitized.chars().count() < 300);
    }

    #[tokio::test]
    async fn test_retry_passes_through_success() {
        let result = call_with_retry(3, Duration::from_millis(1), || async {
            Ok::<_, ProviderError>(42)
        })
        .await
        .expect("should succeed");
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_retry_exhausts_on_rate_limit() {
        let result: Result<(), _> = call_with_retry(3, Duration::from_millis(1), || async {
            Err(ProviderError::HttpStatus {
                status: 429,
                body: "slow down".to_owned(),
            })
        })
        .await;
        assert!(matches!(
            result,
            Err(ProviderError::RateLimitExceeded { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_auth() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ProviderError::Auth("bad key".to_owned())) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
