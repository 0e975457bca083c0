//! Search backend contract.
//!
//! A backend serves one or more named scopes and answers exact counts,
//! ranked or recency-ordered pages, and a simplified fallback query. Scores
//! are normalized to `[0, 1]`; backends that cannot score a hit return
//! `None` and let the caller decide.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::MessageDocument;
use crate::error::RetrievalError;

/// Field weight of the message body in ranked queries.
pub const BODY_WEIGHT: f64 = 3.0;
/// Field weight of the sender name.
pub const SENDER_WEIGHT: f64 = 2.0;
/// Field weight of mentions.
pub const MENTION_WEIGHT: f64 = 1.0;
/// Field weight of hashtags.
pub const HASHTAG_WEIGHT: f64 = 1.0;

/// Text part of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum QueryText {
    /// Every document in range.
    MatchAll,
    /// Fuzzy multi-field full-text query.
    Text(String),
}

impl QueryText {
    /// Whether this is the match-all query.
    #[must_use]
    pub const fn is_match_all(&self) -> bool {
        matches!(self, Self::MatchAll)
    }
}

/// Inclusive timestamp range. Unset bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Whether either bound is set.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Whether `date` lies in the range. Undated documents only match an
    /// unbounded range.
    #[must_use]
    pub fn contains(&self, date: Option<DateTime<Utc>>) -> bool {
        if !self.is_bounded() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Complete filter expression for one backend query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Full-text or match-all.
    pub text: QueryText,
    /// Fuzzy sender-name match.
    pub sender: Option<String>,
    /// Date range.
    pub range: DateRange,
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Score descending, then recency descending.
    Relevance,
    /// Newest first; the order batch cursors walk.
    RecencyDesc,
}

/// Opaque pagination token. Valid only within one batched run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchCursor(String);

impl BatchCursor {
    /// Wraps a backend-specific token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cursor positioned at `doc` in recency order: `<unix millis>|<message id>`.
    #[must_use]
    pub fn recency(doc: &MessageDocument) -> Self {
        let millis = doc
            .message_date
            .map_or_else(String::new, |d| d.timestamp_millis().to_string());
        Self(format!("{millis}|{}", doc.message_id))
    }

    /// Decodes a [`recency`](Self::recency) cursor.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidCursor`] for foreign tokens.
    pub fn parse_recency(&self) -> Result<RecencyKey, RetrievalError> {
        let invalid = || RetrievalError::InvalidCursor {
            cursor: self.0.clone(),
        };
        let (millis, id) = self.0.split_once('|').ok_or_else(invalid)?;
        let date = if millis.is_empty() {
            None
        } else {
            let ms: i64 = millis.parse().map_err(|_| invalid())?;
            Some(DateTime::from_timestamp_millis(ms).ok_or_else(invalid)?)
        };
        Ok((date, id.to_string()))
    }
}

/// Position in recency order. Undated documents sort before dated ones.
pub type RecencyKey = (Option<DateTime<Utc>>, String);

/// One page request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Filter.
    pub filter: FilterExpr,
    /// Hits scoring below this are dropped by the backend.
    pub min_score: Option<f64>,
    /// Ordering.
    pub sort: SortOrder,
    /// Maximum hits to return.
    pub page_size: usize,
    /// Continue after this cursor (recency order only).
    pub cursor: Option<BatchCursor>,
}

/// A scored hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Relevance in `[0, 1]`, when the backend produced one.
    pub score: Option<f64>,
    /// The matched document.
    pub document: MessageDocument,
    /// Cursor pointing just past this hit in recency order.
    pub cursor: Option<BatchCursor>,
}

impl RetrievalResult {
    /// Creates a hit without a cursor.
    #[must_use]
    pub const fn new(score: Option<f64>, document: MessageDocument) -> Self {
        Self {
            score,
            document,
            cursor: None,
        }
    }
}

/// Orders results by score descending, ties by recency descending.
///
/// Missing scores sort last; undated documents sort after dated ones.
pub fn sort_results(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        let by_score = match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_score.then_with(|| b.document.message_date.cmp(&a.document.message_date))
    });
}

/// Full-text index backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Exact number of documents in `scope` matching `filter`.
    async fn count(&self, scope: &str, filter: &FilterExpr) -> Result<u64, RetrievalError>;

    /// One page of matches.
    async fn search(
        &self,
        scope: &str,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;

    /// Simplified query used when [`search`](Self::search) fails for a scope.
    async fn simple_search(
        &self,
        scope: &str,
        text: &str,
        page_size: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;
}
