//! Count-first retrieval with map-reduce digests.
//!
//! For each scope the exact match count decides the strategy:
//!
//! ```text
//! count ≤ threshold            → one ranked fetch (+ digest or short summary)
//! count > threshold, digest    → recency batches → summarize each → combine
//! count > threshold, no digest → one ranked fetch of the top hits only
//! ```
//!
//! Batching stops at `max_batches`; when matches remain, the result says so
//! through [`RenderedResult::cap_reached`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::backend::{
    QueryText, RetrievalResult, SearchBackend, SearchRequest, SortOrder, sort_results,
};
use super::config::RetrievalConfig;
use super::planner::RetrievalQuery;
use super::render::{NO_RESULTS, SummaryBlock, render_results};
use crate::core::Language;
use crate::error::{AgentError, RetrievalError};

/// Topics listed by the extractive fallback.
const EXTRACTIVE_MAX_TOPICS: usize = 5;
/// Documents inspected by the extractive fallback.
const EXTRACTIVE_MAX_DOCS: usize = 10;
/// Leading words taken from each document.
const EXTRACTIVE_WORDS: usize = 3;

/// Produces the natural-language parts of a rendered result.
#[async_trait]
pub trait Summarize: Send + Sync {
    /// Single-shot digest of a time window.
    async fn digest(
        &self,
        docs: &[RetrievalResult],
        period: Option<&str>,
        language: Language,
    ) -> Result<String, AgentError>;

    /// Short overview of a plain search result.
    async fn summarize(
        &self,
        docs: &[RetrievalResult],
        language: Language,
    ) -> Result<String, AgentError>;

    /// Factual summary of one map batch (1-based `batch_number`).
    async fn summarize_batch(
        &self,
        docs: &[RetrievalResult],
        batch_number: usize,
        language: Language,
    ) -> Result<String, AgentError>;

    /// Reduces batch summaries into one digest.
    async fn combine(
        &self,
        partials: &[String],
        period: Option<&str>,
        language: Language,
    ) -> Result<String, AgentError>;
}

/// Model-free [`Summarize`] that lists leading words of each message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarize for ExtractiveSummarizer {
    async fn digest(
        &self,
        docs: &[RetrievalResult],
        _period: Option<&str>,
        _language: Language,
    ) -> Result<String, AgentError> {
        Ok(extractive_summary(docs))
    }

    async fn summarize(
        &self,
        docs: &[RetrievalResult],
        _language: Language,
    ) -> Result<String, AgentError> {
        Ok(extractive_summary(docs))
    }

    async fn summarize_batch(
        &self,
        docs: &[RetrievalResult],
        _batch_number: usize,
        _language: Language,
    ) -> Result<String, AgentError> {
        Ok(extractive_summary(docs))
    }

    async fn combine(
        &self,
        partials: &[String],
        _period: Option<&str>,
        _language: Language,
    ) -> Result<String, AgentError> {
        Ok(partials.join("\n\n"))
    }
}

/// Naive summary: `Discussed: ` followed by the first words of the first messages.
#[must_use]
pub fn extractive_summary(docs: &[RetrievalResult]) -> String {
    let mut topics: Vec<String> = Vec::new();
    for result in docs.iter().take(EXTRACTIVE_MAX_DOCS) {
        let topic = result
            .document
            .message_text
            .split_whitespace()
            .take(EXTRACTIVE_WORDS)
            .collect::<Vec<_>>()
            .join(" ");
        if !topic.is_empty() && !topics.contains(&topic) {
            topics.push(topic);
        }
        if topics.len() == EXTRACTIVE_MAX_TOPICS {
            break;
        }
    }

    if topics.is_empty() {
        "Discussed: various topics".to_string()
    } else {
        format!("Discussed: {}", topics.join(", "))
    }
}

/// Outcome of one retrieval.
#[derive(Debug, Clone, Default)]
pub struct RenderedResult {
    /// Matches across scopes (exact counts, plus fallback hits).
    pub total: usize,
    /// Scored results, best first.
    pub results: Vec<RetrievalResult>,
    /// Text handed back to the agent.
    pub rendered: String,
    /// Summary section, if one was produced.
    pub summary: Option<SummaryBlock>,
    /// Map batches summarized across scopes.
    pub batches_processed: usize,
    /// Whether the batch cap stopped a digest before all matches were read.
    pub cap_reached: bool,
    /// Scopes whose primary and fallback queries both failed.
    pub failed_scopes: Vec<String>,
}

impl RenderedResult {
    fn no_results(failed_scopes: Vec<String>) -> Self {
        Self {
            rendered: NO_RESULTS.to_string(),
            failed_scopes,
            ..Self::default()
        }
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Batch digest for one scope.
#[derive(Debug, Clone)]
struct BatchDigest {
    text: String,
    batches: usize,
    processed: usize,
    total: usize,
    cap_reached: bool,
}

#[derive(Debug, Default)]
struct ScopeOutcome {
    total: usize,
    results: Vec<RetrievalResult>,
    digest: Option<BatchDigest>,
    over_threshold: bool,
}

/// Runs the count/fetch/batch strategy and renders the result.
pub struct BatchedSummarizer {
    backend: Arc<dyn SearchBackend>,
    summarizer: Arc<dyn Summarize>,
    config: RetrievalConfig,
}

impl BatchedSummarizer {
    /// Creates a summarizer over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        summarizer: Arc<dyn Summarize>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            summarizer,
            config,
        }
    }

    /// Retrieves `query` across its scopes and renders the result.
    ///
    /// Never fails: scope errors degrade to the simplified query, and a
    /// retrieval with no usable hits renders [`NO_RESULTS`].
    pub async fn retrieve(&self, query: &RetrievalQuery, language: Language) -> RenderedResult {
        let mut total = 0usize;
        let mut results = Vec::new();
        let mut digests = Vec::new();
        let mut over_threshold = false;
        let mut failed_scopes = Vec::new();

        for scope in &query.scopes {
            match self.retrieve_scope(scope, query, language).await {
                Ok(outcome) => {
                    total = total.saturating_add(outcome.total);
                    over_threshold |= outcome.over_threshold;
                    results.extend(outcome.results);
                    digests.extend(outcome.digest);
                }
                Err(e) => {
                    warn!(scope = %scope, error = %e, "scope query failed, using simplified query");
                    match self.fallback_scope(scope, query).await {
                        Ok(hits) => {
                            total = total.saturating_add(hits.len());
                            results.extend(hits);
                        }
                        Err(e) => {
                            warn!(scope = %scope, error = %e, "simplified query failed");
                            failed_scopes.push(scope.clone());
                        }
                    }
                }
            }
        }

        results.retain(|r| r.score.is_some());
        if !query.text.is_match_all() {
            results.retain(|r| r.score.is_some_and(|s| s >= query.min_score));
        }
        if results.is_empty() {
            info!(scopes = query.scopes.len(), "retrieval found no messages");
            return RenderedResult::no_results(failed_scopes);
        }
        sort_results(&mut results);

        let display_count = query.display_count(self.config.display_limit);
        let summary = self
            .summary_block(query, total, display_count, &results, &digests, over_threshold, language)
            .await;
        let display = &results[..display_count.min(results.len())];
        let rendered = render_results(
            total,
            display,
            summary.as_ref(),
            language,
            self.config.preview_chars,
        );

        RenderedResult {
            total,
            rendered,
            summary,
            batches_processed: digests.iter().map(|d| d.batches).sum(),
            cap_reached: digests.iter().any(|d| d.cap_reached),
            failed_scopes,
            results,
        }
    }

    async fn retrieve_scope(
        &self,
        scope: &str,
        query: &RetrievalQuery,
        language: Language,
    ) -> Result<ScopeOutcome, RetrievalError> {
        let filter = query.filter();
        let total = usize::try_from(self.backend.count(scope, &filter).await?).unwrap_or(usize::MAX);
        debug!(scope, total, is_digest = query.is_digest, "scope match count");

        if total == 0 {
            return Ok(ScopeOutcome::default());
        }

        let over_threshold = total > self.config.batch_threshold;
        if over_threshold && query.is_digest {
            let (digest, results) = self.run_batches(scope, query, total, language).await?;
            return Ok(ScopeOutcome {
                total,
                results,
                digest: Some(digest),
                over_threshold,
            });
        }

        let request = SearchRequest {
            filter,
            min_score: Some(query.min_score),
            sort: SortOrder::Relevance,
            page_size: query.max_results.saturating_mul(self.config.page_multiplier),
            cursor: None,
        };
        let mut results = self.backend.search(scope, &request).await?;
        normalize_scores(&mut results);

        Ok(ScopeOutcome {
            total,
            results,
            digest: None,
            over_threshold,
        })
    }

    async fn run_batches(
        &self,
        scope: &str,
        query: &RetrievalQuery,
        total: usize,
        language: Language,
    ) -> Result<(BatchDigest, Vec<RetrievalResult>), RetrievalError> {
        let batch_size = self.config.batch_size;
        let mut cursor = None;
        let mut partials = Vec::new();
        let mut collected: Vec<RetrievalResult> = Vec::new();
        let mut batches = 0usize;

        while batches < self.config.max_batches {
            let request = SearchRequest {
                filter: query.filter(),
                min_score: None,
                sort: SortOrder::RecencyDesc,
                page_size: batch_size,
                cursor: cursor.take(),
            };
            let mut page = self.backend.search(scope, &request).await?;
            if page.is_empty() {
                break;
            }
            normalize_scores(&mut page);
            batches += 1;

            let partial = self.accept_summary(
                self.summarizer
                    .summarize_batch(&page, batches, language)
                    .await,
                &page,
                "batch",
            );
            debug!(scope, batch = batches, size = page.len(), "batch summarized");
            partials.push(partial);

            let exhausted = page.len() < batch_size;
            cursor = page.last().and_then(|hit| hit.cursor.clone());
            collected.extend(page);
            if exhausted || cursor.is_none() {
                break;
            }
        }

        let processed = collected.len();
        let cap_reached = batches >= self.config.max_batches && processed < total;
        if cap_reached {
            info!(
                scope,
                batches,
                processed,
                total,
                "batch cap reached, digest covers the most recent messages only"
            );
        }

        let text = match self
            .summarizer
            .combine(&partials, query.period.as_deref(), language)
            .await
        {
            Ok(text) if self.is_acceptable(&text) => text.trim().to_string(),
            Ok(_) => {
                warn!(scope, "combined digest too short, joining batch summaries");
                partials.join("\n\n")
            }
            Err(e) => {
                warn!(scope, error = %e, "combine failed, joining batch summaries");
                partials.join("\n\n")
            }
        };

        Ok((
            BatchDigest {
                text,
                batches,
                processed,
                total,
                cap_reached,
            },
            collected,
        ))
    }

    async fn fallback_scope(
        &self,
        scope: &str,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let text = match &query.text {
            QueryText::MatchAll => "",
            QueryText::Text(text) => text.as_str(),
        };
        let page_size = query.max_results.saturating_mul(self.config.page_multiplier);
        self.backend.simple_search(scope, text, page_size).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn summary_block(
        &self,
        query: &RetrievalQuery,
        total: usize,
        display_count: usize,
        results: &[RetrievalResult],
        digests: &[BatchDigest],
        over_threshold: bool,
        language: Language,
    ) -> Option<SummaryBlock> {
        if !digests.is_empty() {
            let text = digests
                .iter()
                .map(|d| {
                    if d.cap_reached {
                        format!(
                            "{}\n{}",
                            d.text,
                            language.partial_digest_note(d.processed, d.total)
                        )
                    } else {
                        d.text.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            return Some(SummaryBlock::Comprehensive(text));
        }

        if query.is_digest {
            let digest = self
                .summarizer
                .digest(results, query.period.as_deref(), language)
                .await;
            return Some(SummaryBlock::Digest(
                self.accept_summary(digest, results, "digest"),
            ));
        }

        if !over_threshold && total > display_count {
            let summary = self.summarizer.summarize(results, language).await;
            return Some(SummaryBlock::Summary(
                self.accept_summary(summary, results, "summary"),
            ));
        }

        None
    }

    fn accept_summary(
        &self,
        outcome: Result<String, AgentError>,
        docs: &[RetrievalResult],
        kind: &str,
    ) -> String {
        match outcome {
            Ok(text) if self.is_acceptable(&text) => text.trim().to_string(),
            Ok(text) => {
                warn!(kind, chars = text.trim().chars().count(), "summary too short, using extractive fallback");
                extractive_summary(docs)
            }
            Err(e) => {
                warn!(kind, error = %e, "summary failed, using extractive fallback");
                extractive_summary(docs)
            }
        }
    }

    fn is_acceptable(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.config.min_summary_chars
    }
}

fn normalize_scores(results: &mut [RetrievalResult]) {
    for result in results {
        if result.score.is_none() {
            result.score = Some(1.0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::core::MessageDocument;
    use crate::retrieval::backend::FilterExpr;
    use crate::retrieval::memory::MemoryIndex;
    use crate::retrieval::planner::{QueryPlanner, SearchParams};
    use crate::retrieval::render::{CARD_OPEN, HORIZONTAL_RULE};

    /// Counts calls; optionally fails every call.
    #[derive(Default)]
    struct CountingSummarizer {
        digests: AtomicUsize,
        summaries: AtomicUsize,
        batches: AtomicUsize,
        combines: AtomicUsize,
        fail: bool,
    }

    impl CountingSummarizer {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn reply(&self, counter: &AtomicUsize, text: String) -> Result<String, AgentError> {
            counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AgentError::ApiRequest {
                    message: "boom".to_string(),
                    status: Some(500),
                })
            } else {
                Ok(text)
            }
        }
    }

    #[async_trait]
    impl Summarize for CountingSummarizer {
        async fn digest(
            &self,
            docs: &[RetrievalResult],
            _period: Option<&str>,
            _language: Language,
        ) -> Result<String, AgentError> {
            self.reply(&self.digests, format!("Digest over {} messages.", docs.len()))
        }

        async fn summarize(
            &self,
            docs: &[RetrievalResult],
            _language: Language,
        ) -> Result<String, AgentError> {
            self.reply(&self.summaries, format!("Summary of {} messages.", docs.len()))
        }

        async fn summarize_batch(
            &self,
            docs: &[RetrievalResult],
            batch_number: usize,
            _language: Language,
        ) -> Result<String, AgentError> {
            self.reply(
                &self.batches,
                format!("Batch {batch_number} covered {} messages.", docs.len()),
            )
        }

        async fn combine(
            &self,
            partials: &[String],
            _period: Option<&str>,
            _language: Language,
        ) -> Result<String, AgentError> {
            self.reply(
                &self.combines,
                format!("Combined digest of {} batches.", partials.len()),
            )
        }
    }

    /// Fails primary queries for selected scopes, optionally the fallback too.
    struct FlakyBackend {
        inner: MemoryIndex,
        broken: HashSet<String>,
        fallback_broken: bool,
    }

    #[async_trait]
    impl SearchBackend for FlakyBackend {
        async fn count(&self, scope: &str, filter: &FilterExpr) -> Result<u64, RetrievalError> {
            if self.broken.contains(scope) {
                return Err(RetrievalError::Backend {
                    scope: scope.to_string(),
                    message: "parse exception".to_string(),
                });
            }
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
            if self.fallback_broken {
                return Err(RetrievalError::Backend {
                    scope: scope.to_string(),
                    message: "down".to_string(),
                });
            }
            self.inner.simple_search(scope, text, page_size).await
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn seeded_index(scope: &str, n: usize) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.extend(
            scope,
            (0..n).map(|i| {
                let minutes = i64::try_from(i).unwrap_or_default() * 10;
                MessageDocument::new(
                    format!("m{i:04}"),
                    format!("user{}", i % 3),
                    format!("deploy note number {i} about the rollout"),
                )
                .at(now() - Duration::hours(1) - Duration::minutes(minutes))
            }),
        );
        index
    }

    fn digest_query(scope: &str) -> RetrievalQuery {
        let params = SearchParams {
            query: "*".to_string(),
            date_from: Some("7d".to_string()),
            ..SearchParams::default()
        };
        QueryPlanner::new(&RetrievalConfig::default()).plan(&params, &[scope.to_string()], now())
    }

    fn text_query(scopes: &[&str], text: &str, max_results: i64) -> RetrievalQuery {
        let params = SearchParams {
            query: text.to_string(),
            max_results: Some(max_results),
            ..SearchParams::default()
        };
        let scopes: Vec<String> = scopes.iter().map(ToString::to_string).collect();
        QueryPlanner::new(&RetrievalConfig::default()).plan(&params, &scopes, now())
    }

    fn summarizer_over(
        backend: Arc<dyn SearchBackend>,
        summarize: Arc<CountingSummarizer>,
    ) -> BatchedSummarizer {
        BatchedSummarizer::new(backend, summarize, RetrievalConfig::default())
    }

    fn card_count(text: &str) -> usize {
        text.lines().filter(|l| l.starts_with(CARD_OPEN)).count()
    }

    #[tokio::test]
    async fn test_threshold_boundary_is_single_fetch() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 30)), Arc::clone(&fake));

        let result = summarizer.retrieve(&digest_query("s"), Language::En).await;

        assert_eq!(result.total, 30);
        assert_eq!(result.batches_processed, 0);
        assert_eq!(fake.digests.load(Ordering::SeqCst), 1);
        assert_eq!(fake.batches.load(Ordering::SeqCst), 0);
        assert!(matches!(result.summary, Some(SummaryBlock::Digest(ref t)) if t == "Digest over 15 messages."));
    }

    #[tokio::test]
    async fn test_digest_within_threshold_fetches_one_ranked_page() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 25)), Arc::clone(&fake));
        let query = digest_query("s");

        let result = summarizer.retrieve(&query, Language::En).await;

        assert_eq!(query.max_results, 5);
        assert_eq!(result.total, 25);
        assert_eq!(result.results.len(), 15);
        assert_eq!(fake.digests.load(Ordering::SeqCst), 1);
        assert!(matches!(result.summary, Some(SummaryBlock::Digest(ref t)) if t == "Digest over 15 messages."));
    }

    #[tokio::test]
    async fn test_one_past_threshold_is_batched() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 31)), Arc::clone(&fake));

        let result = summarizer.retrieve(&digest_query("s"), Language::En).await;

        assert_eq!(result.batches_processed, 2);
        assert_eq!(fake.digests.load(Ordering::SeqCst), 0);
        assert!(matches!(result.summary, Some(SummaryBlock::Comprehensive(_))));
    }

    #[tokio::test]
    async fn test_batched_digest_end_to_end() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 45)), Arc::clone(&fake));
        let query = digest_query("s");

        let result = summarizer.retrieve(&query, Language::En).await;

        assert_eq!(fake.batches.load(Ordering::SeqCst), 2);
        assert_eq!(fake.combines.load(Ordering::SeqCst), 1);
        assert_eq!(result.batches_processed, 2);
        assert!(!result.cap_reached);
        assert_eq!(result.total, 45);
        assert!(result.rendered.contains("📚 Found 45 messages"));
        assert!(result.rendered.contains("📊 <b>Comprehensive Digest:</b>\nCombined digest of 2 batches."));
        assert_eq!(card_count(&result.rendered), query.max_results.min(5));
    }

    #[tokio::test]
    async fn test_batch_cap_is_reported() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 200)), Arc::clone(&fake));

        let result = summarizer.retrieve(&digest_query("s"), Language::En).await;

        assert_eq!(fake.batches.load(Ordering::SeqCst), 5);
        assert_eq!(result.batches_processed, 5);
        assert!(result.cap_reached);
        assert!(result.rendered.contains("summarized 150 of 200 messages"));
    }

    #[tokio::test]
    async fn test_small_plain_search_has_no_summary() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 4)), Arc::clone(&fake));

        let result = summarizer
            .retrieve(&text_query(&["s"], "deploy", 5), Language::En)
            .await;

        assert!(result.summary.is_none());
        assert!(result.rendered.starts_with(&format!("\n{HORIZONTAL_RULE}")));
        assert_eq!(card_count(&result.rendered), 4);
    }

    #[tokio::test]
    async fn test_larger_plain_search_has_one_summary() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 12)), Arc::clone(&fake));

        let result = summarizer
            .retrieve(&text_query(&["s"], "deploy", 5), Language::En)
            .await;

        assert_eq!(fake.summaries.load(Ordering::SeqCst), 1);
        assert_eq!(result.rendered.matches("📊").count(), 1);
        let summary_at = result.rendered.find("📊").unwrap_or(usize::MAX);
        let header_at = result.rendered.find("📚").unwrap_or(0);
        assert!(summary_at < header_at);
        assert_eq!(card_count(&result.rendered), 5);
    }

    #[tokio::test]
    async fn test_large_plain_search_is_not_batched() {
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 80)), Arc::clone(&fake));

        let result = summarizer
            .retrieve(&text_query(&["s"], "deploy", 3), Language::En)
            .await;

        assert_eq!(result.batches_processed, 0);
        assert_eq!(fake.batches.load(Ordering::SeqCst), 0);
        assert!(result.summary.is_none());
        assert_eq!(result.total, 80);
        assert_eq!(result.results.len(), 9);
        assert_eq!(card_count(&result.rendered), 3);
    }

    #[tokio::test]
    async fn test_scores_respect_min_score() {
        let index = MemoryIndex::new();
        index.insert("s", MessageDocument::new("1", "a", "kubernetes upgrade tonight"));
        index.insert("s", MessageDocument::new("2", "b", "upgrade"));
        index.insert("s", MessageDocument::new("3", "c", "unrelated chatter"));
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(index), fake);

        let mut query = text_query(&["s"], "kubernetes upgrade", 5);
        query.min_score = 0.4;
        let result = summarizer.retrieve(&query, Language::En).await;

        assert!(!result.is_empty());
        assert!(result.results.iter().all(|r| r.score.is_some_and(|s| s >= 0.4)));
    }

    #[tokio::test]
    async fn test_failed_scope_falls_back_and_others_contribute() {
        let inner = seeded_index("good", 3);
        inner.insert("bad", MessageDocument::new("b1", "x", "deploy from the bad scope"));
        let backend = FlakyBackend {
            inner,
            broken: HashSet::from(["bad".to_string()]),
            fallback_broken: false,
        };
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(backend), fake);

        let result = summarizer
            .retrieve(&text_query(&["bad", "good"], "deploy", 10), Language::En)
            .await;

        assert!(result.failed_scopes.is_empty());
        assert_eq!(result.results.len(), 4);
        assert!(result.results.iter().any(|r| r.document.message_id == "b1"));
    }

    #[tokio::test]
    async fn test_total_failure_yields_sentinel() {
        let backend = FlakyBackend {
            inner: seeded_index("a", 3),
            broken: HashSet::from(["a".to_string(), "b".to_string()]),
            fallback_broken: true,
        };
        let fake = Arc::new(CountingSummarizer::default());
        let summarizer = summarizer_over(Arc::new(backend), fake);

        let result = summarizer
            .retrieve(&text_query(&["a", "b"], "deploy", 5), Language::En)
            .await;

        assert_eq!(result.rendered, NO_RESULTS);
        assert!(!result.rendered.is_empty());
        assert_eq!(result.failed_scopes, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_summary_failure_uses_extractive_fallback() {
        let fake = Arc::new(CountingSummarizer::failing());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 10)), Arc::clone(&fake));

        let result = summarizer.retrieve(&digest_query("s"), Language::En).await;

        let Some(SummaryBlock::Digest(text)) = result.summary else {
            panic!("expected digest block");
        };
        assert!(text.starts_with("Discussed: deploy note number"));
    }

    #[tokio::test]
    async fn test_combine_failure_joins_partials() {
        let fake = Arc::new(CountingSummarizer::failing());
        let summarizer = summarizer_over(Arc::new(seeded_index("s", 40)), Arc::clone(&fake));

        let result = summarizer.retrieve(&digest_query("s"), Language::En).await;

        let Some(SummaryBlock::Comprehensive(text)) = result.summary else {
            panic!("expected comprehensive digest");
        };
        assert_eq!(text.matches("Discussed:").count(), 2);
    }

    #[test]
    fn test_extractive_summary() {
        let docs = vec![
            RetrievalResult::new(Some(1.0), MessageDocument::new("1", "a", "Release train leaves Friday")),
            RetrievalResult::new(Some(1.0), MessageDocument::new("2", "b", "Release train leaves Friday")),
            RetrievalResult::new(Some(1.0), MessageDocument::new("3", "c", "Lunch")),
        ];
        assert_eq!(extractive_summary(&docs), "Discussed: Release train leaves, Lunch");
        assert_eq!(extractive_summary(&[]), "Discussed: various topics");
    }
}
