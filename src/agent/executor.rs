//! Tool executor that dispatches tool calls to the retrieval layer.
//!
//! Every call goes through the turn's [`RetrievalCoordinator`], so repeated
//! identical searches within a turn hit the turn cache. The executor also
//! remembers which rendered result blocks the model saw, for finalization.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use tracing::debug;

use super::tool::{LIST_RECENT_MESSAGES, SEARCH_KNOWLEDGE_BASE, ToolCall, ToolResult, ToolSet};
use crate::core::ConversationTurn;
use crate::error::AgentError;
use crate::retrieval::render::contains_result_block;
use crate::retrieval::{RetrievalCoordinator, SearchParams};

/// Maximum raw byte length of tool argument JSON from the LLM.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// What the knowledge tools returned during a turn.
#[derive(Debug, Default, Clone)]
struct KnowledgeLog {
    blocks: Vec<String>,
    saw_no_results: bool,
}

/// Executes tool calls for one turn.
pub struct ToolExecutor {
    coordinator: Arc<RetrievalCoordinator>,
    turn: Arc<ConversationTurn>,
    log: Mutex<KnowledgeLog>,
}

impl ToolExecutor {
    /// Creates an executor for `turn`.
    #[must_use]
    pub fn new(coordinator: Arc<RetrievalCoordinator>, turn: Arc<ConversationTurn>) -> Self {
        Self {
            coordinator,
            turn,
            log: Mutex::new(KnowledgeLog::default()),
        }
    }

    /// Tool definitions enabled for this turn.
    #[must_use]
    pub fn tools(&self) -> ToolSet {
        ToolSet::enabled(&self.turn.enabled_tools)
    }

    /// Rendered result blocks returned this turn, deduplicated, in call order.
    #[must_use]
    pub fn knowledge_blocks(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocks
            .clone()
    }

    /// Whether a knowledge search came back empty and none found anything.
    #[must_use]
    pub fn knowledge_base_empty(&self) -> bool {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.saw_no_results && log.blocks.is_empty()
    }

    /// Dispatches a tool call.
    ///
    /// Failures become error results handed back to the model; they never
    /// abort the turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return ToolResult {
                tool_call_id: call.id.clone(),
                content: format!(
                    "tool arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
                is_error: true,
            };
        }

        let result = if self.turn.tool_enabled(&call.name) {
            match call.name.as_str() {
                SEARCH_KNOWLEDGE_BASE => self.search_knowledge_base(&call.arguments).await,
                LIST_RECENT_MESSAGES => self.list_recent_messages(&call.arguments).await,
                other => Err(AgentError::ToolExecution {
                    name: other.to_string(),
                    message: "unknown tool".to_string(),
                }),
            }
        } else {
            Err(AgentError::ToolExecution {
                name: call.name.clone(),
                message: "tool not enabled for this conversation".to_string(),
            })
        };

        match result {
            Ok(content) => ToolResult {
                tool_call_id: call.id.clone(),
                content,
                is_error: false,
            },
            Err(e) => {
                debug!(tool = %call.name, error = %e, "tool call rejected");
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: e.to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn search_knowledge_base(&self, args: &str) -> Result<String, AgentError> {
        let params: SearchParams = parse_args(SEARCH_KNOWLEDGE_BASE, args)?;
        let result = self
            .coordinator
            .get_or_fetch_result(&self.turn, &params)
            .await;

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if result.is_empty() {
            log.saw_no_results = true;
        } else if contains_result_block(&result.rendered)
            && !log.blocks.contains(&result.rendered)
        {
            log.blocks.push(result.rendered.clone());
        }
        Ok(result.rendered.clone())
    }

    async fn list_recent_messages(&self, args: &str) -> Result<String, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            limit: Option<i64>,
        }
        let args: Args = parse_args(LIST_RECENT_MESSAGES, args)?;
        Ok(self.coordinator.recent_messages(&self.turn, args.limit).await)
    }
}

/// Parses tool arguments, treating a blank payload as `{}`.
fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: &str) -> Result<T, AgentError> {
    let args = if args.trim().is_empty() { "{}" } else { args };
    serde_json::from_str(args).map_err(|e| AgentError::ToolExecution {
        name: tool.to_string(),
        message: format!("invalid arguments: {e}"),
    })
}
