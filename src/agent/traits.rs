//! Agent trait definition.
//!
//! Single-shot agents (batch summaries, digests, rolling conversation
//! summaries) implement [`Agent`]: a fixed system prompt and model run
//! against one user message without tools.

use async_trait::async_trait;

use super::message::{ChatRequest, TokenUsage, system_message, user_message};
use super::provider::LlmProvider;
use crate::error::AgentError;

/// Response from an agent execution.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The agent's text output.
    pub content: String,
    /// Token usage for this call.
    pub usage: TokenUsage,
    /// Why the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
}

/// A single-purpose, tool-free agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name for logging.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// System prompt that defines the agent's role.
    fn system_prompt(&self) -> &str;

    /// Sampling temperature.
    fn temperature(&self) -> f32 {
        0.3
    }

    /// Maximum tokens for the response.
    fn max_tokens(&self) -> u32 {
        512
    }

    /// Runs the agent on `user_msg`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures.
    async fn execute(
        &self,
        provider: &dyn LlmProvider,
        user_msg: &str,
    ) -> Result<AgentResponse, AgentError> {
        let request = ChatRequest {
            model: self.model().to_string(),
            messages: vec![system_message(self.system_prompt()), user_message(user_msg)],
            temperature: Some(self.temperature()),
            max_tokens: Some(self.max_tokens()),
            json_mode: false,
            stream: false,
            tools: Vec::new(),
        };

        let response = provider.chat(&request).await?;

        Ok(AgentResponse {
            content: response.content.trim().to_string(),
            usage: response.usage,
            finish_reason: response.finish_reason,
        })
    }
}

/// An [`Agent`] defined entirely by its settings.
#[derive(Debug, Clone)]
pub struct PromptAgent {
    name: &'static str,
    model: String,
    system_prompt: String,
    max_tokens: u32,
}

impl PromptAgent {
    /// Creates an agent.
    #[must_use]
    pub fn new(
        name: &'static str,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            name,
            model: model.into(),
            system_prompt: system_prompt.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl Agent for PromptAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::agent::message::{ChatResponse, Role};
    use crate::agent::provider::ChunkStream;

    /// Records the last request and echoes a padded reply.
    #[derive(Default)]
    struct RecordingProvider {
        last: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            *self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
                Some(request.clone());
            Ok(ChatResponse {
                content: "  summary text \n".to_string(),
                ..ChatResponse::default()
            })
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> Result<ChunkStream, AgentError> {
            Err(AgentError::Stream {
                message: "not used".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_prompt_agent_builds_request() {
        let provider = RecordingProvider::default();
        let agent = PromptAgent::new("digest", "small-model", "be brief", 128);

        let response = agent
            .execute(&provider, "summarize this")
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));
        assert_eq!(response.content, "summary text");

        let request = provider
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| panic!("no request recorded"));
        assert_eq!(request.model, "small-model");
        assert_eq!(request.max_tokens, Some(128));
        assert!(request.tools.is_empty());
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "summarize this");
    }
}
