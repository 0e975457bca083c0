//! Core domain types shared by the agent, retrieval, and storage layers.

pub mod document;
pub mod lang;
pub mod turn;

pub use document::MessageDocument;
pub use lang::Language;
pub use turn::{ConversationTurn, KnowledgeScopes, ScopePreference, TurnId};
