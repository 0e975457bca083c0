//! Chat agent for the message knowledge base.
//!
//! Answers one utterance per turn with a tool-calling LLM whose tools query
//! the retrieval layer. Provider output is reconciled into a single event
//! shape and every turn ends with non-empty text.
//!
//! # Architecture
//!
//! ```text
//! utterance → TurnController
//!   ├── ProviderPool (preferred provider, health-checked fallback)
//!   ├── stream_agentic_loop → Reconciler → CanonicalEvent stream
//!   │   └── ToolExecutor → RetrievalCoordinator (per-turn cache)
//!   │       └── BatchedSummarizer → LlmSummarizer
//!   ├── EmptyFallback (agentic_loop) → RetryOnceIfEmpty → fixed fallback
//!   └── HistoryStore + SummaryUpdater (spawned)
//! ```
//!
//! # Feature Gate
//!
//! The OpenAI-compatible provider requires the `openai` feature (default).

pub mod agentic_loop;
pub mod client;
pub mod config;
pub mod executor;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod reconcile;
pub mod summarizer;
pub mod tool;
pub mod traits;
pub mod turn;

pub use agentic_loop::{LoopLimits, agentic_loop, stream_agentic_loop};
pub use client::{InMemoryPreference, ProviderPool, ProviderPreference, create_provider};
pub use config::AgentConfig;
pub use executor::ToolExecutor;
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use prompt::PromptSet;
pub use provider::{LlmProvider, ProviderChunk};
pub use reconcile::{CanonicalEvent, Reconciler, reconcile};
pub use summarizer::LlmSummarizer;
pub use tool::{ToolCall, ToolDefinition, ToolResult, ToolSet, tool_notification};
pub use traits::{Agent, PromptAgent};
pub use turn::{FALLBACK_MESSAGE, RETRY_INSTRUCTION, TurnController, TurnHandle, TurnOutcome, TurnState};
