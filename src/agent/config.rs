//! Agent configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::time::Duration;

use crate::error::AgentError;
use crate::retrieval::RetrievalConfig;

/// Default primary provider.
pub const DEFAULT_PROVIDER: &str = "openai";
/// Default Ollama endpoint (`OpenAI`-compatible API).
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
/// Default per-call provider timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default maximum tool-calling loop iterations.
const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;
/// Default number of history messages fed into the prompt.
const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_CHAT_MAX_TOKENS: u32 = 2048;
const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.3;
/// How long a selected provider stays preferred.
const DEFAULT_PREFERENCE_TTL_SECS: u64 = 30 * 60;

/// Configuration for the chat agent and its retrieval layer.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Primary provider name (`openai` or `ollama`).
    pub provider: String,
    /// Provider tried when the primary is unhealthy.
    pub fallback_provider: Option<String>,
    /// API key for `openai`.
    pub api_key: Option<String>,
    /// Base URL override for `openai` (proxies, compatible servers).
    pub base_url: Option<String>,
    /// Endpoint for `ollama`.
    pub ollama_url: String,
    /// Model answering the user.
    pub chat_model: String,
    /// Model writing digests and summaries.
    pub summary_model: String,
    /// Model used when the `ollama` provider is selected.
    pub ollama_model: String,
    /// Per-call provider timeout.
    pub timeout: Duration,
    /// Maximum tool-calling loop iterations per attempt.
    pub max_tool_iterations: usize,
    /// History messages included in the prompt.
    pub history_limit: usize,
    /// Completion cap for chat answers.
    pub chat_max_tokens: u32,
    /// Completion cap for summaries.
    pub summary_max_tokens: u32,
    /// Sampling temperature for chat answers.
    pub temperature: f32,
    /// How long a selected provider stays preferred.
    pub preference_ttl: Duration,
    /// Retrieval policy.
    pub retrieval: RetrievalConfig,
}

impl AgentConfig {
    /// Creates a new builder for `AgentConfig`.
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if `openai` is selected against
    /// the hosted endpoint without a key.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Provider names in selection order.
    #[must_use]
    pub fn provider_order(&self) -> Vec<&str> {
        let mut order = vec![self.provider.as_str()];
        if let Some(fallback) = self.fallback_provider.as_deref()
            && fallback != self.provider
        {
            order.push(fallback);
        }
        order
    }

    /// Chat model to request from `provider`.
    #[must_use]
    pub fn chat_model_for(&self, provider: &str) -> &str {
        if provider == "ollama" {
            &self.ollama_model
        } else {
            &self.chat_model
        }
    }

    /// Summary model to request from `provider`.
    #[must_use]
    pub fn summary_model_for(&self, provider: &str) -> &str {
        if provider == "ollama" {
            &self.ollama_model
        } else {
            &self.summary_model
        }
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    provider: Option<String>,
    fallback_provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    ollama_url: Option<String>,
    chat_model: Option<String>,
    summary_model: Option<String>,
    ollama_model: Option<String>,
    timeout: Option<Duration>,
    max_tool_iterations: Option<usize>,
    history_limit: Option<usize>,
    temperature: Option<f32>,
    batch_threshold: Option<usize>,
    batch_size: Option<usize>,
    max_batches: Option<usize>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = env_string("KB_PROVIDER");
        }
        if self.fallback_provider.is_none() {
            self.fallback_provider = env_string("KB_FALLBACK_PROVIDER");
        }
        if self.api_key.is_none() {
            self.api_key = env_string("OPENAI_API_KEY").or_else(|| env_string("KB_API_KEY"));
        }
        if self.base_url.is_none() {
            self.base_url = env_string("OPENAI_BASE_URL").or_else(|| env_string("KB_BASE_URL"));
        }
        if self.ollama_url.is_none() {
            self.ollama_url = env_string("KB_OLLAMA_URL");
        }
        if self.chat_model.is_none() {
            self.chat_model = env_string("KB_CHAT_MODEL");
        }
        if self.summary_model.is_none() {
            self.summary_model = env_string("KB_SUMMARY_MODEL");
        }
        if self.ollama_model.is_none() {
            self.ollama_model = env_string("KB_OLLAMA_MODEL");
        }
        if self.timeout.is_none() {
            self.timeout = env_parse("KB_TIMEOUT_SECS").map(Duration::from_secs);
        }
        if self.max_tool_iterations.is_none() {
            self.max_tool_iterations = env_parse("KB_MAX_TOOL_ITERATIONS");
        }
        if self.history_limit.is_none() {
            self.history_limit = env_parse("KB_HISTORY_LIMIT");
        }
        if self.batch_threshold.is_none() {
            self.batch_threshold = env_parse("KB_BATCH_THRESHOLD");
        }
        if self.batch_size.is_none() {
            self.batch_size = env_parse("KB_BATCH_SIZE");
        }
        if self.max_batches.is_none() {
            self.max_batches = env_parse("KB_MAX_BATCHES");
        }
        self
    }

    /// Sets the primary provider.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the fallback provider.
    #[must_use]
    pub fn fallback_provider(mut self, provider: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the Ollama endpoint.
    #[must_use]
    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = Some(url.into());
        self
    }

    /// Sets the chat model.
    #[must_use]
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    /// Sets the summary model.
    #[must_use]
    pub fn summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = Some(model.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the maximum tool-calling loop iterations.
    #[must_use]
    pub const fn max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = Some(n);
        self
    }

    /// Sets how many history messages feed the prompt.
    #[must_use]
    pub const fn history_limit(mut self, n: usize) -> Self {
        self.history_limit = Some(n);
        self
    }

    /// Sets the chat temperature.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the batching threshold.
    #[must_use]
    pub const fn batch_threshold(mut self, n: usize) -> Self {
        self.batch_threshold = Some(n);
        self
    }

    /// Sets the map batch size.
    #[must_use]
    pub const fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    /// Sets the batch cap.
    #[must_use]
    pub const fn max_batches(mut self, n: usize) -> Self {
        self.max_batches = Some(n);
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if `openai` is selected against
    /// the hosted endpoint without a key.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let provider = self
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
            .to_lowercase();
        let fallback_provider = self.fallback_provider.map(|p| p.to_lowercase());

        let needs_key = self.base_url.is_none()
            && (provider == "openai" || fallback_provider.as_deref() == Some("openai"));
        if needs_key && self.api_key.is_none() {
            return Err(AgentError::ApiKeyMissing);
        }

        let mut retrieval = RetrievalConfig::default();
        if let Some(n) = self.batch_threshold {
            retrieval = retrieval.with_batch_threshold(n);
        }
        if let Some(n) = self.batch_size {
            retrieval = retrieval.with_batch_size(n);
        }
        if let Some(n) = self.max_batches {
            retrieval = retrieval.with_max_batches(n);
        }

        Ok(AgentConfig {
            provider,
            fallback_provider,
            api_key: self.api_key,
            base_url: self.base_url,
            ollama_url: self
                .ollama_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            chat_model: self
                .chat_model
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            summary_model: self
                .summary_model
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            ollama_model: self
                .ollama_model
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_tool_iterations: self
                .max_tool_iterations
                .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS)
                .max(1),
            history_limit: self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            chat_max_tokens: DEFAULT_CHAT_MAX_TOKENS,
            summary_max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            preference_ttl: Duration::from_secs(DEFAULT_PREFERENCE_TTL_SECS),
            retrieval,
        })
    }
}
