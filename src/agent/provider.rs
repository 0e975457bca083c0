//! Pluggable LLM provider trait.
//!
//! Providers decode their wire format once, at this boundary, into
//! [`ProviderChunk`]. Nothing downstream inspects provider-specific shapes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse};
use super::tool::ToolCall;
use crate::error::AgentError;

/// One decoded streaming chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChunk {
    /// Incremental text fragment.
    Delta(String),
    /// Full response text so far.
    Cumulative(String),
    /// A complete tool call announcement.
    ToolCall(ToolCall),
    /// Final full output of the attempt.
    Final(String),
    /// Anything else; skipped.
    Unknown,
}

/// Boxed stream of decoded chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, AgentError>> + Send>>;

/// LLM provider backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (`"openai"`, `"ollama"`, ...).
    fn name(&self) -> &str;

    /// Non-streaming completion.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;

    /// Streaming completion.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if the stream cannot be opened. Failures after
    /// that arrive as stream items.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, AgentError>;

    /// Cheap reachability probe used during provider selection.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the provider is unreachable.
    async fn health_check(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Runs `call` under `limit`, mapping expiry to [`AgentError::Timeout`].
pub async fn with_timeout<T, F>(provider: &str, limit: Duration, call: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>> + Send,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(AgentError::Timeout {
                provider: provider.to_string(),
                secs: limit.as_secs(),
            })
        })
}
