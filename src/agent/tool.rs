//! Tool definitions exposed to the chat model.
//!
//! Two retrieval tools are available: `search_knowledge_base` and
//! `list_recent_messages`. A turn sees only the tools named in its
//! [`ConversationTurn::enabled_tools`](crate::core::ConversationTurn).

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Knowledge-base search tool name.
pub const SEARCH_KNOWLEDGE_BASE: &str = "search_knowledge_base";
/// Recent-messages listing tool name.
pub const LIST_RECENT_MESSAGES: &str = "list_recent_messages";

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Dispatch name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Call this result answers.
    pub tool_call_id: String,
    /// Rendered output, or an error message.
    pub content: String,
    /// Whether `content` is an error.
    pub is_error: bool,
}

/// Tool definitions offered on a request.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Definitions in this set.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Consumes the set.
    #[must_use]
    pub fn into_definitions(self) -> Vec<ToolDefinition> {
        self.definitions
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Number of tools.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Every retrieval tool.
    #[must_use]
    pub fn knowledge_tools() -> Self {
        Self {
            definitions: vec![def_search_knowledge_base(), def_list_recent_messages()],
        }
    }

    /// Retrieval tools whose names appear in `enabled`; all when empty.
    #[must_use]
    pub fn enabled(enabled: &[String]) -> Self {
        if enabled.is_empty() {
            return Self::knowledge_tools();
        }
        Self {
            definitions: Self::knowledge_tools()
                .definitions
                .into_iter()
                .filter(|d| enabled.iter().any(|name| *name == d.name))
                .collect(),
        }
    }

    /// Empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Short label a UI shows while `tool_name` runs.
#[must_use]
pub fn tool_notification(tool_name: &str) -> String {
    let (icon, label) = match tool_name {
        SEARCH_KNOWLEDGE_BASE => ("🔍", "Searching the knowledge base"),
        LIST_RECENT_MESSAGES => ("🗂", "Listing recent messages"),
        other => ("🔧", other),
    };
    format!("{icon} {label}...")
}

fn def_search_knowledge_base() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_KNOWLEDGE_BASE.to_string(),
        description: "Search the user's message knowledge base. Use query \"*\" with a date \
                      range for digests of a period. Omit dates unless the user names a period; \
                      without dates the entire history is searched."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search text, or \"*\" to match every message in range."
                },
                "from_user": {
                    "type": "string",
                    "description": "Only messages from this sender."
                },
                "date_from": {
                    "type": "string",
                    "description": "Start date: YYYY-MM-DD or relative like 7d, 2w, 1m."
                },
                "date_to": {
                    "type": "string",
                    "description": "End date, inclusive: YYYY-MM-DD or relative."
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 20,
                    "description": "Results to return. Defaults to 5."
                },
                "min_score": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Minimum relevance score. Defaults to 0.1."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn def_list_recent_messages() -> ToolDefinition {
    ToolDefinition {
        name: LIST_RECENT_MESSAGES.to_string(),
        description: "List the most recent messages in the knowledge base, newest first."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "minimum": 5,
                    "maximum": 50,
                    "description": "Messages to list. Defaults to 10."
                }
            },
            "additionalProperties": false
        }),
    }
}
