//! Model-backed [`Summarize`] implementation.
//!
//! Each call selects a provider from the pool and runs a one-shot
//! [`PromptAgent`]. Errors are returned to the batched summarizer, which
//! falls back to extractive text.

use async_trait::async_trait;
use tracing::debug;

use super::client::ProviderPool;
use super::config::AgentConfig;
use super::prompt::{
    BATCH_SYSTEM_PROMPT, DIGEST_SYSTEM_PROMPT, SEARCH_SUMMARY_SYSTEM_PROMPT, build_batch_prompt,
    build_combine_prompt, build_digest_prompt, build_search_summary_prompt, with_language,
};
use super::provider::with_timeout;
use super::traits::{Agent, PromptAgent};
use crate::core::Language;
use crate::error::AgentError;
use crate::retrieval::{RetrievalResult, Summarize};

/// Summaries written by the configured summary model.
#[derive(Debug, Clone)]
pub struct LlmSummarizer {
    pool: ProviderPool,
    config: AgentConfig,
}

impl LlmSummarizer {
    /// Creates a summarizer drawing providers from `pool`.
    #[must_use]
    pub const fn new(pool: ProviderPool, config: AgentConfig) -> Self {
        Self { pool, config }
    }

    /// Runs one summary agent.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when no provider is available or the call fails.
    pub async fn run(
        &self,
        name: &'static str,
        system_prompt: &str,
        language: Language,
        prompt: &str,
    ) -> Result<String, AgentError> {
        let provider = self.pool.select().await?;
        let agent = PromptAgent::new(
            name,
            self.config.summary_model_for(provider.name()),
            with_language(system_prompt, language),
            self.config.summary_max_tokens,
        );
        let response = with_timeout(
            provider.name(),
            self.config.timeout,
            agent.execute(provider.as_ref(), prompt),
        )
        .await?;
        debug!(
            agent = name,
            provider = provider.name(),
            tokens = response.usage.total_tokens,
            "summary agent finished"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl Summarize for LlmSummarizer {
    async fn digest(
        &self,
        docs: &[RetrievalResult],
        period: Option<&str>,
        language: Language,
    ) -> Result<String, AgentError> {
        self.run(
            "digest",
            DIGEST_SYSTEM_PROMPT,
            language,
            &build_digest_prompt(docs, period),
        )
        .await
    }

    async fn summarize(
        &self,
        docs: &[RetrievalResult],
        language: Language,
    ) -> Result<String, AgentError> {
        self.run(
            "search_summary",
            SEARCH_SUMMARY_SYSTEM_PROMPT,
            language,
            &build_search_summary_prompt(docs),
        )
        .await
    }

    async fn summarize_batch(
        &self,
        docs: &[RetrievalResult],
        batch_number: usize,
        language: Language,
    ) -> Result<String, AgentError> {
        self.run(
            "batch_summary",
            BATCH_SYSTEM_PROMPT,
            language,
            &build_batch_prompt(docs, batch_number),
        )
        .await
    }

    async fn combine(
        &self,
        partials: &[String],
        period: Option<&str>,
        language: Language,
    ) -> Result<String, AgentError> {
        self.run(
            "combine",
            DIGEST_SYSTEM_PROMPT,
            language,
            &build_combine_prompt(partials, period),
        )
        .await
    }
}
