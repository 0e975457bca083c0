//! Per-turn retrieval cache and tool invocation coordinator.
//!
//! Rendered results are memoized by [`Fingerprint`] inside a map keyed by
//! [`TurnId`]. Concurrent calls with the same fingerprint in the same turn
//! share one in-flight fetch. A turn's entries are dropped when its
//! [`TurnGuard`] is dropped; other turns are unaffected.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::backend::{
    DateRange, FilterExpr, QueryText, SearchBackend, SearchRequest, SortOrder,
};
use super::config::RetrievalConfig;
use super::planner::{QueryPlanner, SearchParams};
use super::render::{NO_RESULTS, escape_html, format_timestamp, truncate_graphemes};
use super::scope::{ResolvedScopes, resolve_scopes};
use super::summarizer::{BatchedSummarizer, RenderedResult, Summarize};
use crate::core::{ConversationTurn, KnowledgeScopes, TurnId};

/// Lower bound for `list_recent_messages`.
pub const RECENT_MIN: usize = 5;
/// Upper bound for `list_recent_messages`.
pub const RECENT_MAX: usize = 50;
const RECENT_PREVIEW_CHARS: usize = 200;

/// Stable hash over planner inputs and scope resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct FingerprintInput<'a> {
    user_id: i64,
    params: &'a SearchParams,
    scopes: &'a KnowledgeScopes,
    resolved: &'a ResolvedScopes,
}

impl Fingerprint {
    /// Hashes the canonical JSON form of every input.
    #[must_use]
    pub fn compute(
        user_id: i64,
        params: &SearchParams,
        scopes: &KnowledgeScopes,
        resolved: &ResolvedScopes,
    ) -> Self {
        let input = FingerprintInput {
            user_id,
            params,
            scopes,
            resolved,
        };
        let canonical = serde_json::to_vec(&input).unwrap_or_default();
        Self(blake3::hash(&canonical).to_hex().to_string())
    }

    /// Hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

type Slot = Arc<OnceCell<Arc<RenderedResult>>>;

/// Turn-scoped memo table.
#[derive(Debug, Default)]
pub struct TurnCache {
    turns: Mutex<HashMap<TurnId, HashMap<Fingerprint, Slot>>>,
}

impl TurnCache {
    /// Returns the slot for `fingerprint`, creating it if absent.
    fn slot(&self, turn_id: TurnId, fingerprint: &Fingerprint) -> Slot {
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            turns
                .entry(turn_id)
                .or_default()
                .entry(fingerprint.clone())
                .or_default(),
        )
    }

    /// Number of fingerprints cached for `turn_id`.
    #[must_use]
    pub fn entries(&self, turn_id: TurnId) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&turn_id)
            .map_or(0, HashMap::len)
    }

    /// Number of turns holding entries.
    #[must_use]
    pub fn active_turns(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every entry of `turn_id`, returning how many were removed.
    pub fn clear_turn(&self, turn_id: TurnId) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&turn_id)
            .map_or(0, |entries| entries.len())
    }
}

/// Routes retrieval tool calls through the turn cache.
pub struct RetrievalCoordinator {
    cache: TurnCache,
    planner: QueryPlanner,
    summarizer: BatchedSummarizer,
    backend: Arc<dyn SearchBackend>,
    config: RetrievalConfig,
}

impl RetrievalCoordinator {
    /// Creates a coordinator over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        summarize: Arc<dyn Summarize>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            cache: TurnCache::default(),
            planner: QueryPlanner::new(&config),
            summarizer: BatchedSummarizer::new(Arc::clone(&backend), summarize, config.clone()),
            backend,
            config,
        }
    }

    /// Retrieval settings.
    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Opens a cache scope for `turn_id`, cleared when the guard drops.
    #[must_use]
    pub fn begin_turn(self: &Arc<Self>, turn_id: TurnId) -> TurnGuard {
        TurnGuard {
            coordinator: Arc::clone(self),
            turn_id,
        }
    }

    /// Number of cached fingerprints for `turn_id`.
    #[must_use]
    pub fn cached_entries(&self, turn_id: TurnId) -> usize {
        self.cache.entries(turn_id)
    }

    /// Number of turns with live cache entries.
    #[must_use]
    pub fn active_turns(&self) -> usize {
        self.cache.active_turns()
    }

    /// Rendered search result for `params`, fetched at most once per turn.
    pub async fn get_or_fetch(&self, turn: &ConversationTurn, params: &SearchParams) -> String {
        self.get_or_fetch_result(turn, params).await.rendered.clone()
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), returning the full result.
    pub async fn get_or_fetch_result(
        &self,
        turn: &ConversationTurn,
        params: &SearchParams,
    ) -> Arc<RenderedResult> {
        let resolved = resolve_scopes(turn.user_id, &turn.scopes, &self.config);
        let fingerprint = Fingerprint::compute(turn.user_id, params, &turn.scopes, &resolved);
        let slot = self.cache.slot(turn.turn_id, &fingerprint);

        let result = slot
            .get_or_init(|| async {
                let query = self.planner.plan(params, &resolved.scopes, Utc::now());
                debug!(
                    turn = %turn.turn_id,
                    fingerprint = fingerprint.as_str(),
                    scope_source = ?resolved.source,
                    scopes = resolved.scopes.len(),
                    is_digest = query.is_digest,
                    "retrieval cache miss"
                );
                Arc::new(self.summarizer.retrieve(&query, turn.language).await)
            })
            .await;
        Arc::clone(result)
    }

    /// Most recent messages across the turn's scopes, newest first.
    pub async fn recent_messages(&self, turn: &ConversationTurn, limit: Option<i64>) -> String {
        let limit = limit
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(RECENT_MIN * 2)
            .clamp(RECENT_MIN, RECENT_MAX);
        let resolved = resolve_scopes(turn.user_id, &turn.scopes, &self.config);
        let request = SearchRequest {
            filter: FilterExpr {
                text: QueryText::MatchAll,
                sender: None,
                range: DateRange::default(),
            },
            min_score: None,
            sort: SortOrder::RecencyDesc,
            page_size: limit,
            cursor: None,
        };

        let mut hits = Vec::new();
        for scope in &resolved.scopes {
            match self.backend.search(scope, &request).await {
                Ok(page) => hits.extend(page),
                Err(e) => debug!(scope = %scope, error = %e, "recent messages query failed"),
            }
        }
        if hits.is_empty() {
            return NO_RESULTS.to_string();
        }
        hits.sort_by(|a, b| b.document.message_date.cmp(&a.document.message_date));
        hits.truncate(limit);

        let mut out = String::new();
        for hit in &hits {
            let doc = &hit.document;
            let _ = writeln!(
                out,
                "• {} ({}): {}",
                escape_html(&doc.sender_name),
                format_timestamp(doc, turn.language),
                escape_html(&truncate_graphemes(
                    &doc.message_text.replace('\n', " "),
                    RECENT_PREVIEW_CHARS
                )),
            );
        }
        out
    }
}

/// Clears a turn's cache entries when dropped.
pub struct TurnGuard {
    coordinator: Arc<RetrievalCoordinator>,
    turn_id: TurnId,
}

impl TurnGuard {
    /// Turn this guard scopes.
    #[must_use]
    pub const fn turn_id(&self) -> TurnId {
        self.turn_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let removed = self.coordinator.cache.clear_turn(self.turn_id);
        debug!(turn = %self.turn_id, removed, "turn cache cleared");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::MessageDocument;
    use crate::error::RetrievalError;
    use crate::retrieval::backend::RetrievalResult;
    use crate::retrieval::memory::MemoryIndex;
    use crate::retrieval::summarizer::ExtractiveSummarizer;

    /// Counts backend round-trips and slows them down to widen races.
    struct CountingBackend {
        inner: MemoryIndex,
        counts: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for CountingBackend {
        async fn count(&self, scope: &str, filter: &FilterExpr) -> Result<u64, RetrievalError> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.inner.count(scope, filter).await
        }

        async fn search(
            &self,
            scope: &str,
            request: &SearchRequest,
        ) -> Result<Vec<RetrievalResult>, RetrievalError> {
            self.inner.search(scope, request).await
        }

        async fn simple_search(
            &self,
            scope: &str,
            text: &str,
            page_size: usize,
        ) -> Result<Vec<RetrievalResult>, RetrievalError> {
            self.inner.simple_search(scope, text, page_size).await
        }
    }

    fn coordinator() -> (Arc<RetrievalCoordinator>, Arc<CountingBackend>) {
        let index = MemoryIndex::new();
        for i in 0..3 {
            index.insert(
                "user-kb-7",
                MessageDocument::new(format!("m{i}"), "alice", format!("budget review {i}")),
            );
        }
        let backend = Arc::new(CountingBackend {
            inner: index,
            counts: AtomicUsize::new(0),
        });
        let coordinator = Arc::new(RetrievalCoordinator::new(
            Arc::clone(&backend) as Arc<dyn SearchBackend>,
            Arc::new(ExtractiveSummarizer),
            RetrievalConfig::default(),
        ));
        (coordinator, backend)
    }

    #[tokio::test]
    async fn test_identical_calls_fetch_once() {
        let (coordinator, backend) = coordinator();
        let turn = ConversationTurn::new(7, "thread");
        let params = SearchParams::text("budget");

        let first = coordinator.get_or_fetch(&turn, &params).await;
        let second = coordinator.get_or_fetch(&turn, &params).await;

        assert_eq!(first, second);
        assert_eq!(backend.counts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.cached_entries(turn.turn_id), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch() {
        let (coordinator, backend) = coordinator();
        let turn = ConversationTurn::new(7, "thread");
        let params = SearchParams::text("budget");

        let (a, b) = tokio::join!(
            coordinator.get_or_fetch(&turn, &params),
            coordinator.get_or_fetch(&turn, &params)
        );

        assert_eq!(a, b);
        assert_eq!(backend.counts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_turns_do_not_share_entries() {
        let (coordinator, backend) = coordinator();
        let params = SearchParams::text("budget");
        let first = ConversationTurn::new(7, "thread");
        let second = ConversationTurn::new(7, "thread");

        let guard = coordinator.begin_turn(first.turn_id);
        coordinator.get_or_fetch(&first, &params).await;
        coordinator.get_or_fetch(&second, &params).await;
        assert_eq!(backend.counts.load(Ordering::SeqCst), 2);

        drop(guard);
        assert_eq!(coordinator.cached_entries(first.turn_id), 0);
        assert_eq!(coordinator.cached_entries(second.turn_id), 1);
    }

    #[test]
    fn test_fingerprint_includes_scope_resolution() {
        let params = SearchParams::text("budget");
        let config = RetrievalConfig::default();
        let personal = KnowledgeScopes::default();
        let thread = KnowledgeScopes {
            thread_bases: vec!["kb-x".to_string()],
            ..KnowledgeScopes::default()
        };
        let a = Fingerprint::compute(1, &params, &personal, &resolve_scopes(1, &personal, &config));
        let b = Fingerprint::compute(1, &params, &thread, &resolve_scopes(1, &thread, &config));
        let c = Fingerprint::compute(1, &params, &personal, &resolve_scopes(1, &personal, &config));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[tokio::test]
    async fn test_recent_messages_clamps_and_lists() {
        let (coordinator, _) = coordinator();
        let turn = ConversationTurn::new(7, "thread");

        let listing = coordinator.recent_messages(&turn, Some(1)).await;
        assert_eq!(listing.lines().count(), 3);
        assert!(listing.lines().all(|l| l.starts_with("• alice (Unknown date): budget review")));

        let empty = coordinator
            .recent_messages(&ConversationTurn::new(99, "t"), None)
            .await;
        assert_eq!(empty, NO_RESULTS);
    }
}
