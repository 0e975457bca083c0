//! In-process [`SearchBackend`] over a map of scopes.
//!
//! Scoring is a weighted term match across body, sender, mentions, and
//! hashtags, normalized to `[0, 1]`. A term matches a field word when it
//! is a prefix of the word or within one edit of it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::backend::{
    BODY_WEIGHT, BatchCursor, FilterExpr, HASHTAG_WEIGHT, MENTION_WEIGHT, QueryText, RecencyKey,
    RetrievalResult, SENDER_WEIGHT, SearchBackend, SearchRequest, SortOrder, sort_results,
};
use crate::core::MessageDocument;
use crate::error::RetrievalError;

const TOTAL_WEIGHT: f64 = BODY_WEIGHT + SENDER_WEIGHT + MENTION_WEIGHT + HASHTAG_WEIGHT;

/// Thread-safe in-memory message index.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    scopes: RwLock<HashMap<String, Vec<MessageDocument>>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document to `scope`.
    pub fn insert(&self, scope: &str, doc: MessageDocument) {
        self.scopes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope.to_string())
            .or_default()
            .push(doc);
    }

    /// Adds many documents to `scope`.
    pub fn extend(&self, scope: &str, docs: impl IntoIterator<Item = MessageDocument>) {
        self.scopes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope.to_string())
            .or_default()
            .extend(docs);
    }

    /// Number of documents in `scope`.
    #[must_use]
    pub fn len(&self, scope: &str) -> usize {
        self.scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .map_or(0, Vec::len)
    }

    /// Whether `scope` holds no documents.
    #[must_use]
    pub fn is_empty(&self, scope: &str) -> bool {
        self.len(scope) == 0
    }

    fn matches(&self, scope: &str, filter: &FilterExpr) -> Vec<RetrievalResult> {
        let guard = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = guard.get(scope) else {
            return Vec::new();
        };

        docs.iter()
            .filter(|doc| filter.range.contains(doc.message_date))
            .filter(|doc| {
                filter
                    .sender
                    .as_deref()
                    .is_none_or(|s| fuzzy_contains(&doc.sender_name, s))
            })
            .filter_map(|doc| {
                let score = match &filter.text {
                    QueryText::MatchAll => 1.0,
                    QueryText::Text(text) => score_document(doc, text),
                };
                (score > 0.0).then(|| RetrievalResult {
                    score: Some(score),
                    document: doc.clone(),
                    cursor: Some(BatchCursor::recency(doc)),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchBackend for MemoryIndex {
    async fn count(&self, scope: &str, filter: &FilterExpr) -> Result<u64, RetrievalError> {
        Ok(self.matches(scope, filter).len() as u64)
    }

    async fn search(
        &self,
        scope: &str,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let mut hits = self.matches(scope, &request.filter);
        if let Some(min) = request.min_score {
            hits.retain(|h| h.score.is_some_and(|s| s >= min));
        }

        match request.sort {
            SortOrder::Relevance => sort_results(&mut hits),
            SortOrder::RecencyDesc => {
                hits.sort_by(|a, b| recency_key(&b.document).cmp(&recency_key(&a.document)));
            }
        }

        if let Some(cursor) = &request.cursor {
            let after = cursor.parse_recency()?;
            hits.retain(|h| recency_key(&h.document) < after);
        }

        hits.truncate(request.page_size);
        Ok(hits)
    }

    async fn simple_search(
        &self,
        scope: &str,
        text: &str,
        page_size: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let terms = tokenize(text);
        let guard = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = guard.get(scope) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<RetrievalResult> = docs
            .iter()
            .filter_map(|doc| {
                let body = doc.message_text.to_lowercase();
                let found = terms.iter().filter(|t| body.contains(t.as_str())).count();
                #[allow(clippy::cast_precision_loss)]
                let score = if terms.is_empty() {
                    1.0
                } else {
                    found as f64 / terms.len() as f64
                };
                (score > 0.0).then(|| RetrievalResult::new(Some(score), doc.clone()))
            })
            .collect();
        sort_results(&mut hits);
        hits.truncate(page_size);
        Ok(hits)
    }
}

fn recency_key(doc: &MessageDocument) -> RecencyKey {
    (doc.message_date, doc.message_id.clone())
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '#' && c != '@')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn score_document(doc: &MessageDocument, text: &str) -> f64 {
    let terms = tokenize(text);
    if terms.is_empty() {
        return 0.0;
    }

    let body = tokenize(&doc.message_text);
    let sender = tokenize(&doc.sender_name);
    let mentions: Vec<String> = doc.mentions.iter().flat_map(|m| tokenize(m)).collect();
    let hashtags: Vec<String> = doc.hashtags.iter().flat_map(|h| tokenize(h)).collect();

    let mut weight = 0.0;
    for term in &terms {
        for (words, w) in [
            (&body, BODY_WEIGHT),
            (&sender, SENDER_WEIGHT),
            (&mentions, MENTION_WEIGHT),
            (&hashtags, HASHTAG_WEIGHT),
        ] {
            if words.iter().any(|word| term_matches(term, word)) {
                weight += w;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let max = TOTAL_WEIGHT * terms.len() as f64;
    weight / max
}

fn fuzzy_contains(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    haystack.to_lowercase().contains(&needle)
        || tokenize(haystack)
            .iter()
            .any(|word| term_matches(&needle, word))
}

fn term_matches(term: &str, word: &str) -> bool {
    word.starts_with(term) || (term.chars().count() > 3 && within_one_edit(term, word))
}

fn within_one_edit(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if long.len() - short.len() > 1 {
        return false;
    }

    let (mut i, mut j, mut edits) = (0, 0, 0);
    while i < short.len() && j < long.len() {
        if short[i] == long[j] {
            i += 1;
            j += 1;
            continue;
        }
        edits += 1;
        if edits > 1 {
            return false;
        }
        if short.len() == long.len() {
            i += 1;
        }
        j += 1;
    }
    edits + (long.len() - j) + (short.len() - i) <= 1
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::retrieval::backend::DateRange;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn index_with(n: usize) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.extend(
            "s",
            (0..n).map(|i| {
                MessageDocument::new(format!("m{i:03}"), "alice", format!("status update {i}"))
                    .at(base() + Duration::hours(i64::try_from(i).unwrap_or_default()))
            }),
        );
        index
    }

    fn match_all() -> FilterExpr {
        FilterExpr {
            text: QueryText::MatchAll,
            sender: None,
            range: DateRange::default(),
        }
    }

    #[tokio::test]
    async fn test_recency_cursor_walks_all_pages() {
        let index = index_with(7);
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let request = SearchRequest {
                filter: match_all(),
                min_score: None,
                sort: SortOrder::RecencyDesc,
                page_size: 3,
                cursor: cursor.clone(),
            };
            let page = index
                .search("s", &request)
                .await
                .unwrap_or_else(|e| panic!("search failed: {e}"));
            if page.is_empty() {
                break;
            }
            cursor = page.last().and_then(|h| h.cursor.clone());
            seen.extend(page.into_iter().map(|h| h.document.message_id));
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.first().map(String::as_str), Some("m006"));
        assert_eq!(seen.last().map(String::as_str), Some("m000"));
    }

    #[tokio::test]
    async fn test_weighted_scoring() {
        let index = MemoryIndex::new();
        index.insert("s", MessageDocument::new("1", "bob", "the release shipped"));
        index.insert("s", MessageDocument::new("2", "release-bot", "nightly done"));
        index.insert("s", MessageDocument::new("3", "carol", "lunch?"));

        let request = SearchRequest {
            filter: FilterExpr {
                text: QueryText::Text("release".to_string()),
                sender: None,
                range: DateRange::default(),
            },
            min_score: Some(0.1),
            sort: SortOrder::Relevance,
            page_size: 10,
            cursor: None,
        };
        let hits = index
            .search("s", &request)
            .await
            .unwrap_or_else(|e| panic!("search failed: {e}"));
        let ids: Vec<&str> = hits.iter().map(|h| h.document.message_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_fuzzy_term_and_sender_filter() {
        let index = MemoryIndex::new();
        index.insert("s", MessageDocument::new("1", "Alice Smith", "migration plan"));
        index.insert("s", MessageDocument::new("2", "Bob", "migration plan"));

        let filter = FilterExpr {
            text: QueryText::Text("migraton".to_string()),
            sender: Some("alice".to_string()),
            range: DateRange::default(),
        };
        let count = index
            .count("s", &filter)
            .await
            .unwrap_or_else(|e| panic!("count failed: {e}"));
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_invalid_cursor() {
        let index = index_with(2);
        let request = SearchRequest {
            filter: match_all(),
            min_score: None,
            sort: SortOrder::RecencyDesc,
            page_size: 3,
            cursor: Some(BatchCursor::new("garbage")),
        };
        let result = index.search("s", &request).await;
        assert!(matches!(result, Err(RetrievalError::InvalidCursor { .. })));
    }

    #[test]
    fn test_within_one_edit() {
        assert!(within_one_edit("release", "relase"));
        assert!(within_one_edit("release", "releases"));
        assert!(!within_one_edit("release", "relaese"));
        assert!(!within_one_edit("cat", "dogs"));
    }
}
