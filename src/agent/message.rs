//! Chat message types shared by providers, agents, and the history store.

use serde::{Deserialize, Serialize};

use super::tool::{ToolCall, ToolDefinition};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and stored summaries.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// Tool output.
    Tool,
}

impl Role {
    /// Lowercase name, as stored in history.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parses a stored role name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call this tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain text message with `role`.
    #[must_use]
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 to 2.0).
    pub temperature: Option<f32>,
    /// Completion token cap.
    pub max_tokens: Option<u32>,
    /// Ask for a JSON object response.
    pub json_mode: bool,
    /// Stream the response.
    pub stream: bool,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u32,
    /// Completion tokens.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Adds `other` into `self`, saturating.
    pub const fn accumulate(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Provider-agnostic completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Generated text.
    pub content: String,
    /// Token accounting.
    pub usage: TokenUsage,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped (`"stop"`, `"tool_calls"`, ...).
    pub finish_reason: Option<String>,
}

/// System message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage::text(Role::System, content)
}

/// User message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage::text(Role::User, content)
}

/// Assistant text message.
#[must_use]
pub fn assistant_message(content: &str) -> ChatMessage {
    ChatMessage::text(Role::Assistant, content)
}

/// Assistant message carrying tool calls and any text streamed before them.
#[must_use]
pub fn assistant_tool_calls_message(content: &str, tool_calls: Vec<ToolCall>) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
        tool_calls,
        tool_call_id: None,
    }
}

/// Tool result message.
#[must_use]
pub fn tool_message(tool_call_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Tool,
        content: content.to_string(),
        tool_calls: Vec::new(),
        tool_call_id: Some(tool_call_id.to_string()),
    }
}
