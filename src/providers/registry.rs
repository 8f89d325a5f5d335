//! Provider registry and the pipeline-facing client facade.
//!
//! Adapters are constructed once at startup from environment credentials and
//! shared across all request tasks. The [`LlmClient`] facade resolves
//! `vendor:model` spec strings, builds the message triplet, and applies the
//! retry policy uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::ProviderConfig;

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::{
    build_messages, call_with_retry, parse_model_spec, GenerationConfig, LlmProvider,
    ProviderError,
};

/// Default Ollama base URL for local models.
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// OpenAI-compatible vendors: `(name, env key, base URL, native structured output)`.
const COMPAT_VENDORS: &[(&str, &str, &str, bool)] = &[
    ("openai", "OPENAI_API_KEY", "https://api.openai.com/v1", true),
    ("groq", "GROQ_API_KEY", "https://api.groq.com/openai/v1", false),
    ("deepseek", "DEEPSEEK_API_KEY", "https://api.deepseek.com/v1", false),
    ("cerebras", "CEREBRAS_API_KEY", "https://api.cerebras.ai/v1", false),
    ("sambanova", "SAMBANOVA_API_KEY", "https://api.sambanova.ai/v1", false),
    (
        "gemini",
        "GEMINI_API_KEY",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        false,
    ),
];

/// Registry of adapter instances keyed by vendor name.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Build the registry from environment credentials.
    ///
    /// Each OpenAI-compatible vendor and Anthropic are registered only when
    /// their `{VENDOR}_API_KEY` is present; Ollama is always registered.
    /// One HTTP client per vendor, reused across requests.
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for (vendor, env_key, base_url, structured) in COMPAT_VENDORS {
            if let Some(api_key) = env(env_key) {
                providers.insert(
                    (*vendor).to_owned(),
                    Arc::new(OpenAiCompatProvider::new(
                        *vendor,
                        *base_url,
                        api_key,
                        *structured,
                        reqwest::Client::new(),
                    )),
                );
            }
        }

        if let Some(api_key) = env("ANTHROPIC_API_KEY") {
            providers.insert(
                "anthropic".to_owned(),
                Arc::new(AnthropicProvider::new(api_key, reqwest::Client::new())),
            );
        }

        let ollama_url = env("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_owned());
        providers.insert(
            "ollama".to_owned(),
            Arc::new(OllamaProvider::new(ollama_url, reqwest::Client::new())),
        );

        let mut vendors: Vec<&str> = providers.keys().map(String::as_str).collect();
        vendors.sort_unstable();
        tracing::info!(?vendors, "provider registry initialized");

        Self { providers }
    }

    /// Create a registry backed by a single adapter, for tests.
    #[doc(hidden)]
    pub fn for_testing(vendor: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert(vendor.into(), provider);
        Self { providers }
    }

    /// Resolve a `vendor:model` spec to an adapter and bare model name.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] for malformed specs and for
    /// vendors whose credentials were absent at startup.
    pub fn resolve(&self, spec: &str) -> Result<(Arc<dyn LlmProvider>, String), ProviderError> {
        let (vendor, model) = parse_model_spec(spec)?;
        let provider = self.providers.get(vendor).ok_or_else(|| {
            ProviderError::Unavailable(format!(
                "vendor '{vendor}' is not configured; set {}_API_KEY",
                vendor.to_uppercase()
            ))
        })?;
        Ok((Arc::clone(provider), model.to_owned()))
    }

    /// Verify that a spec's vendor is configured, for startup validation.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::resolve`].
    pub fn check_spec(&self, spec: &str) -> Result<(), ProviderError> {
        self.resolve(spec).map(|_| ())
    }

    /// Number of configured vendors.
    pub fn vendor_count(&self) -> usize {
        self.providers.len()
    }
}

/// Pipeline-facing LLM facade.
///
/// Wraps the registry with message assembly and the retry policy so call
/// sites deal only in prompt triplets and model specs.
#[derive(Clone)]
pub struct LlmClient {
    registry: Arc<ProviderRegistry>,
    limits: ProviderConfig,
}

impl LlmClient {
    /// Create a client over a shared registry.
    pub fn new(registry: Arc<ProviderRegistry>, limits: ProviderConfig) -> Self {
        Self { registry, limits }
    }

    fn generation_config(&self, model: String) -> GenerationConfig {
        GenerationConfig {
            model,
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(self.limits.timeout_seconds),
        }
    }

    /// Plain-text generation against `model_spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] after the retry budget is spent.
    pub async fn generate(
        &self,
        model_spec: &str,
        system: &str,
        developer: Option<&str>,
        user: &str,
    ) -> Result<String, ProviderError> {
        let (provider, model) = self.registry.resolve(model_spec)?;
        let messages = build_messages(system, developer, user);
        let cfg = self.generation_config(model);
        call_with_retry(
            self.limits.retries,
            Duration::from_secs(self.limits.backoff_base_seconds),
            || provider.generate(&messages, &cfg),
        )
        .await
    }

    /// Schema-conforming generation against `model_spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] after the retry budget is spent, or
    /// [`ProviderError::Malformed`] when the reply cannot be coerced.
    pub async fn parse(
        &self,
        model_spec: &str,
        system: &str,
        developer: Option<&str>,
        user: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let (provider, model) = self.registry.resolve(model_spec)?;
        let messages = build_messages(system, developer, user);
        let cfg = self.generation_config(model);
        call_with_retry(
            self.limits.retries,
            Duration::from_secs(self.limits.backoff_base_seconds),
            || provider.parse(&messages, &cfg, schema),
        )
        .await
    }
}
