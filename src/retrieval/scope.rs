//! Knowledge-scope resolution.
//!
//! Precedence: an explicit group preference wins, then knowledge bases
//! attached to the thread, then the user's personal knowledge base.

use serde::Serialize;

use super::config::RetrievalConfig;
use crate::core::{KnowledgeScopes, ScopePreference};

/// Which rule produced the scope list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    /// The user's explicit group preference.
    UserPreference,
    /// Knowledge bases attached to the thread.
    Thread,
    /// The user's personal knowledge base.
    Personal,
}

/// Scopes a retrieval runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedScopes {
    /// Rule that selected the scopes.
    pub source: ScopeSource,
    /// Scope names, in search order.
    pub scopes: Vec<String>,
}

/// Resolves the scopes for `user_id`.
#[must_use]
pub fn resolve_scopes(
    user_id: i64,
    scopes: &KnowledgeScopes,
    config: &RetrievalConfig,
) -> ResolvedScopes {
    if let ScopePreference::Groups { group_ids } = &scopes.preference
        && !group_ids.is_empty()
    {
        return ResolvedScopes {
            source: ScopeSource::UserPreference,
            scopes: group_ids.iter().map(|id| config.group_scope(*id)).collect(),
        };
    }

    if !scopes.thread_bases.is_empty() {
        return ResolvedScopes {
            source: ScopeSource::Thread,
            scopes: scopes.thread_bases.clone(),
        };
    }

    ResolvedScopes {
        source: ScopeSource::Personal,
        scopes: vec![config.user_scope(user_id)],
    }
}
