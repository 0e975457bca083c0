//! Per-utterance turn context.
//!
//! A [`ConversationTurn`] is created when a user utterance arrives, is never
//! mutated afterwards, and is dropped when the turn is finalized.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lang::Language;

/// Unique identifier of one turn. Scopes the retrieval cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generates a fresh random turn id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Explicit knowledge-scope preference stored in the user's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ScopePreference {
    /// No restriction; defer to thread or personal knowledge bases.
    #[default]
    All,
    /// Search only the archives of these groups.
    Groups {
        /// Group identifiers.
        group_ids: Vec<i64>,
    },
}

/// Knowledge bases reachable from a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeScopes {
    /// The user's explicit preference.
    pub preference: ScopePreference,
    /// Knowledge bases attached to the current thread.
    pub thread_bases: Vec<String>,
}

/// Immutable context for one user utterance.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// Turn identifier.
    pub turn_id: TurnId,
    /// Author of the utterance.
    pub user_id: i64,
    /// Conversation thread the turn belongs to.
    pub thread_id: String,
    /// Reply language.
    pub language: Language,
    /// Tool names the agent may call. Empty means every registered tool.
    pub enabled_tools: Vec<String>,
    /// Knowledge scopes for retrieval tools.
    pub scopes: KnowledgeScopes,
}

impl ConversationTurn {
    /// Creates a turn with a fresh id, English replies, and all tools enabled.
    #[must_use]
    pub fn new(user_id: i64, thread_id: impl Into<String>) -> Self {
        Self {
            turn_id: TurnId::new(),
            user_id,
            thread_id: thread_id.into(),
            language: Language::default(),
            enabled_tools: Vec::new(),
            scopes: KnowledgeScopes::default(),
        }
    }

    /// Sets the reply language.
    #[must_use]
    pub const fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Restricts the tools the agent may call.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.enabled_tools = tools;
        self
    }

    /// Sets the knowledge scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: KnowledgeScopes) -> Self {
        self.scopes = scopes;
        self
    }

    /// Whether the named tool may be called in this turn.
    #[must_use]
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == name)
    }
}
