//! `SQLite` message index and conversation history.
//!
//! One connection guarded by a mutex; every call runs on the blocking pool.
//! Full-text queries go through FTS5 with per-field bm25 weights matching
//! the retrieval layer (body 3, sender 2, mentions 1, hashtags 1).

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};
use tracing::{debug, info};

use super::schema;
use crate::agent::message::Role;
use crate::core::MessageDocument;
use crate::error::{RetrievalError, StorageError};
use crate::history::{HistoryEntry, HistoryStore};
use crate::retrieval::backend::{
    BODY_WEIGHT, BatchCursor, FilterExpr, HASHTAG_WEIGHT, MENTION_WEIGHT, QueryText,
    RetrievalResult, SENDER_WEIGHT, SearchBackend, SearchRequest, SortOrder, sort_results,
};

/// Separator for list columns (mentions, hashtags).
const LIST_SEPARATOR: char = '\n';

/// Lowest score a full-text match can get.
///
/// FTS5 clamps the idf of very common terms to almost zero, so a raw bm25
/// normalization would drop genuine matches in small scopes.
const MATCH_FLOOR: f64 = 0.1;

/// Rows scanned by the simplified LIKE query.
const SIMPLE_SCAN_LIMIT: i64 = 1000;

const DOCUMENT_COLUMNS: &str = "m.message_id, m.sender_name, m.message_text, m.message_date, \
     m.group_id, m.mentions, m.hashtags";

/// `SQLite`-backed [`SearchBackend`] and [`HistoryStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory, file, or schema cannot be
    /// created.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::migrate(&conn)?;
        info!(path = %path.display(), "database opened");
        Ok(Self::from_connection(conn))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task {
            message: e.to_string(),
        })?
    }

    /// Inserts or replaces documents in `scope`. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the transaction fails.
    pub async fn insert_documents(
        &self,
        scope: &str,
        docs: Vec<MessageDocument>,
    ) -> Result<usize, StorageError> {
        let scope = scope.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages
                        (scope, message_id, sender_name, message_text, message_date,
                         group_id, mentions, hashtags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (scope, message_id) DO UPDATE SET
                        sender_name = excluded.sender_name,
                        message_text = excluded.message_text,
                        message_date = excluded.message_date,
                        group_id = excluded.group_id,
                        mentions = excluded.mentions,
                        hashtags = excluded.hashtags",
                )?;
                for doc in &docs {
                    written += stmt.execute(params![
                        scope,
                        doc.message_id,
                        doc.sender_name,
                        doc.message_text,
                        doc.message_date.map(|d| d.timestamp_millis()),
                        doc.group_id,
                        join_list(&doc.mentions),
                        join_list(&doc.hashtags),
                    ])?;
                }
            }
            tx.commit()?;
            debug!(scope = %scope, written, "documents indexed");
            Ok(written)
        })
        .await
    }

    /// Scopes with their document counts, by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    pub async fn scopes(&self) -> Result<Vec<(String, u64)>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT scope, COUNT(*) FROM messages GROUP BY scope ORDER BY scope")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (scope, count) = row?;
                out.push((scope, u64::try_from(count).unwrap_or_default()));
            }
            Ok(out)
        })
        .await
    }

    /// Schema version of the open database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        self.with_conn(|conn| schema::version(conn)).await
    }
}

/// SQL predicate and bound values.
#[derive(Debug, Default)]
struct Clause {
    sql: Vec<String>,
    values: Vec<Value>,
}

impl Clause {
    fn push(&mut self, sql: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        self.sql.push(sql.into());
        self.values.extend(values);
    }

    fn render(&self) -> String {
        self.sql.join(" AND ")
    }
}

/// Scope, sender, and date predicates over alias `m`.
fn filter_clause(scope: &str, filter: &FilterExpr) -> Clause {
    let mut clause = Clause::default();
    clause.push("m.scope = ?", [Value::Text(scope.to_string())]);
    if let Some(sender) = filter
        .sender
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        clause.push(
            "m.sender_name LIKE ? ESCAPE '\\'",
            [Value::Text(format!("%{}%", escape_like(sender)))],
        );
    }
    if let Some(from) = filter.range.from {
        clause.push("m.message_date >= ?", [Value::Integer(from.timestamp_millis())]);
    }
    if let Some(to) = filter.range.to {
        clause.push("m.message_date <= ?", [Value::Integer(to.timestamp_millis())]);
    }
    clause
}

/// Rows strictly after `cursor` in recency order.
fn cursor_clause(clause: &mut Clause, cursor: &BatchCursor) -> Result<(), RetrievalError> {
    let (date, id) = cursor.parse_recency()?;
    match date {
        Some(date) => {
            let ms = date.timestamp_millis();
            clause.push(
                "(m.message_date IS NULL OR m.message_date < ? \
                 OR (m.message_date = ? AND m.message_id < ?))",
                [Value::Integer(ms), Value::Integer(ms), Value::Text(id)],
            );
        }
        None => clause.push(
            "(m.message_date IS NULL AND m.message_id < ?)",
            [Value::Text(id)],
        ),
    }
    Ok(())
}

/// FTS5 expression: every term as a prefix query, any term may match.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

/// Maps a negative bm25 rank to `(MATCH_FLOOR, 1)`.
fn normalize_rank(rank: f64) -> f64 {
    let r = (-rank).max(0.0);
    MATCH_FLOOR + (1.0 - MATCH_FLOOR) * (r / (1.0 + r))
}

fn bm25_expr() -> String {
    format!(
        "bm25(messages_fts, {BODY_WEIGHT:.1}, {SENDER_WEIGHT:.1}, {MENTION_WEIGHT:.1}, {HASHTAG_WEIGHT:.1})"
    )
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn join_list(items: &[String]) -> String {
    items.join(&LIST_SEPARATOR.to_string())
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(LIST_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decodes [`DOCUMENT_COLUMNS`] starting at column 0.
fn read_document(row: &Row<'_>) -> rusqlite::Result<MessageDocument> {
    let date: Option<i64> = row.get(3)?;
    let mentions: String = row.get(5)?;
    let hashtags: String = row.get(6)?;
    Ok(MessageDocument {
        message_id: row.get(0)?,
        sender_name: row.get(1)?,
        message_text: row.get(2)?,
        message_date: date.and_then(DateTime::from_timestamp_millis),
        group_id: row.get(4)?,
        mentions: split_list(&mentions),
        hashtags: split_list(&hashtags),
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn backend_error(scope: &str, e: &StorageError) -> RetrievalError {
    RetrievalError::Backend {
        scope: scope.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl SearchBackend for SqliteStore {
    async fn count(&self, scope: &str, filter: &FilterExpr) -> Result<u64, RetrievalError> {
        let mut clause = filter_clause(scope, filter);
        let sql = match &filter.text {
            QueryText::MatchAll => {
                format!("SELECT COUNT(*) FROM messages m WHERE {}", clause.render())
            }
            QueryText::Text(text) => {
                let Some(query) = fts_query(text) else {
                    return Ok(0);
                };
                clause.sql.insert(0, "messages_fts MATCH ?".to_string());
                clause.values.insert(0, Value::Text(query));
                format!(
                    "SELECT COUNT(*) FROM messages_fts JOIN messages m ON m.id = messages_fts.rowid \
                     WHERE {}",
                    clause.render()
                )
            }
        };

        let count = self
            .with_conn(move |conn| {
                let n: i64 =
                    conn.query_row(&sql, params_from_iter(clause.values.iter()), |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(|e| backend_error(scope, &e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn search(
        &self,
        scope: &str,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let mut clause = filter_clause(scope, &request.filter);
        if let Some(cursor) = &request.cursor {
            cursor_clause(&mut clause, cursor)?;
        }

        let inner = match &request.filter.text {
            QueryText::MatchAll => format!(
                "SELECT {DOCUMENT_COLUMNS}, NULL AS rank FROM messages m WHERE {}",
                clause.render()
            ),
            QueryText::Text(text) => {
                let Some(query) = fts_query(text) else {
                    return Ok(Vec::new());
                };
                clause.sql.insert(0, "messages_fts MATCH ?".to_string());
                clause.values.insert(0, Value::Text(query));
                format!(
                    "SELECT {DOCUMENT_COLUMNS}, {} AS rank \
                     FROM messages_fts JOIN messages m ON m.id = messages_fts.rowid WHERE {}",
                    bm25_expr(),
                    clause.render()
                )
            }
        };
        let order = match request.sort {
            SortOrder::Relevance => "rank ASC, message_date DESC, message_id DESC",
            SortOrder::RecencyDesc => "message_date DESC, message_id DESC",
        };
        let sql = format!("SELECT * FROM ({inner}) ORDER BY {order}");

        let match_all = request.filter.text.is_match_all();
        let min_score = request.min_score;
        let page_size = request.page_size;
        let mut hits = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(clause.values.iter()), |row| {
                    Ok((read_document(row)?, row.get::<_, Option<f64>>(7)?))
                })?;
                let mut hits = Vec::new();
                for row in rows {
                    let (document, rank) = row?;
                    let score = if match_all {
                        1.0
                    } else {
                        normalize_rank(rank.unwrap_or_default())
                    };
                    if min_score.is_some_and(|min| score < min) {
                        continue;
                    }
                    hits.push(RetrievalResult {
                        score: Some(score),
                        cursor: Some(BatchCursor::recency(&document)),
                        document,
                    });
                    if hits.len() >= page_size {
                        break;
                    }
                }
                Ok(hits)
            })
            .await
            .map_err(|e| backend_error(scope, &e))?;

        if request.sort == SortOrder::Relevance {
            sort_results(&mut hits);
        }
        Ok(hits)
    }

    async fn simple_search(
        &self,
        scope: &str,
        text: &str,
        page_size: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut clause = Clause::default();
        clause.push("m.scope = ?", [Value::Text(scope.to_string())]);
        if !terms.is_empty() {
            let likes = vec!["m.message_text LIKE ? ESCAPE '\\'"; terms.len()].join(" OR ");
            clause.push(
                format!("({likes})"),
                terms
                    .iter()
                    .map(|t| Value::Text(format!("%{}%", escape_like(t)))),
            );
        }
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM messages m WHERE {} \
             ORDER BY m.message_date DESC, m.message_id DESC LIMIT {SIMPLE_SCAN_LIMIT}",
            clause.render()
        );

        let docs = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(clause.values.iter()), read_document)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(|e| backend_error(scope, &e))?;

        let mut hits: Vec<RetrievalResult> = docs
            .into_iter()
            .filter_map(|doc| {
                let body = doc.message_text.to_lowercase();
                let found = terms.iter().filter(|t| body.contains(t.as_str())).count();
                #[allow(clippy::cast_precision_loss)]
                let score = if terms.is_empty() {
                    1.0
                } else {
                    found as f64 / terms.len() as f64
                };
                (score > 0.0).then(|| RetrievalResult::new(Some(score), doc))
            })
            .collect();
        sort_results(&mut hits);
        hits.truncate(page_size);
        Ok(hits)
    }
}

/// Decodes `role, text, created_at`.
fn read_entry(row: &Row<'_>) -> rusqlite::Result<(String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn to_entry((role, text, created_at): (String, String, i64)) -> Result<HistoryEntry, StorageError> {
    let role = Role::parse(&role).ok_or_else(|| StorageError::InvalidRecord {
        message: format!("unknown role '{role}'"),
    })?;
    Ok(HistoryEntry {
        role,
        text,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
    })
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, thread: &str, role: Role, text: &str) -> Result<(), StorageError> {
        let thread = thread.to_string();
        let text = text.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO history (thread, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![thread, role.as_str(), text, Utc::now().timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_last(
        &self,
        thread: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let thread = thread.to_string();
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, text, created_at FROM history
                     WHERE thread = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![thread, to_i64(limit)], read_entry)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        rows.into_iter().rev().map(to_entry).collect()
    }

    async fn latest_summary(&self, thread: &str) -> Result<Option<String>, StorageError> {
        let thread = thread.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT text FROM history
                 WHERE thread = ?1 AND role = 'system' ORDER BY id DESC LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![thread], |row| row.get::<_, String>(0))?;
            Ok(rows.next().transpose()?)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::retrieval::backend::DateRange;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn text_filter(text: &str) -> FilterExpr {
        FilterExpr {
            text: QueryText::Text(text.to_string()),
            sender: None,
            range: DateRange::default(),
        }
    }

    fn match_all() -> FilterExpr {
        FilterExpr {
            text: QueryText::MatchAll,
            sender: None,
            range: DateRange::default(),
        }
    }

    fn request(filter: FilterExpr, sort: SortOrder, page_size: usize) -> SearchRequest {
        SearchRequest {
            filter,
            min_score: None,
            sort,
            page_size,
            cursor: None,
        }
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let mut tagged = MessageDocument::new("4", "dan", "weekly sync notes").at(base() + Duration::hours(3));
        tagged.hashtags = vec!["#release".to_string()];
        let docs = vec![
            MessageDocument::new("1", "ann", "release checklist is ready").at(base()),
            MessageDocument::new("2", "release-bot", "nightly build green")
                .at(base() + Duration::hours(1)),
            MessageDocument::new("3", "bob", "lunch at noon?").at(base() + Duration::hours(2)),
            tagged,
            MessageDocument::new("5", "eve", "undated release musings"),
        ];
        store
            .insert_documents("s", docs)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        store
    }

    #[tokio::test]
    async fn test_count_text_and_match_all() {
        let store = seeded().await;
        let all = store
            .count("s", &match_all())
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(all, 5);
        let release = store
            .count("s", &text_filter("release"))
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(release, 4);
        let none = store
            .count("other", &match_all())
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_relevance_scores_are_normalized() {
        let store = seeded().await;
        let hits = store
            .search("s", &request(text_filter("checklist"), SortOrder::Relevance, 10))
            .await
            .unwrap_or_else(|e| panic!("search: {e}"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.sender_name, "ann");
        let score = hits[0].score.unwrap_or_default();
        assert!(score > MATCH_FLOOR && score < 1.0, "score {score}");
    }

    #[tokio::test]
    async fn test_prefix_matching() {
        let store = seeded().await;
        let hits = store
            .search("s", &request(text_filter("check"), SortOrder::Relevance, 10))
            .await
            .unwrap_or_else(|e| panic!("search: {e}"));
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_recency_cursor_pages() {
        let store = seeded().await;
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let mut req = request(match_all(), SortOrder::RecencyDesc, 2);
            req.cursor = cursor.clone();
            let page = store
                .search("s", &req)
                .await
                .unwrap_or_else(|e| panic!("search: {e}"));
            if page.is_empty() {
                break;
            }
            cursor = page.last().and_then(|h| h.cursor.clone());
            seen.extend(page.into_iter().map(|h| h.document.message_id));
        }
        assert_eq!(seen, vec!["4", "3", "2", "1", "5"]);
    }

    #[tokio::test]
    async fn test_date_range_and_sender_filters() {
        let store = seeded().await;
        let mut filter = text_filter("release");
        filter.range = DateRange {
            from: Some(base()),
            to: Some(base() + Duration::hours(2)),
        };
        let dated = store
            .count("s", &filter)
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(dated, 2);

        let mut filter = match_all();
        filter.sender = Some("BOT".to_string());
        let by_sender = store
            .count("s", &filter)
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(by_sender, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_document() {
        let store = seeded().await;
        store
            .insert_documents("s", vec![MessageDocument::new("3", "bob", "dinner instead")])
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        let lunch = store
            .count("s", &text_filter("lunch"))
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(lunch, 0);
        let scopes = store.scopes().await.unwrap_or_else(|e| panic!("scopes: {e}"));
        assert_eq!(scopes, vec![("s".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_simple_search_scores_term_fraction() {
        let store = seeded().await;
        let hits = store
            .simple_search("s", "release ready", 10)
            .await
            .unwrap_or_else(|e| panic!("simple: {e}"));
        assert_eq!(hits[0].document.message_id, "1");
        assert_eq!(hits[0].score, Some(1.0));
        assert!(hits.iter().all(|h| h.score.unwrap_or_default() > 0.0));
    }

    #[tokio::test]
    async fn test_invalid_cursor_rejected() {
        let store = seeded().await;
        let mut req = request(match_all(), SortOrder::RecencyDesc, 2);
        req.cursor = Some(BatchCursor::new("nope"));
        let result = store.search("s", &req).await;
        assert!(matches!(result, Err(RetrievalError::InvalidCursor { .. })));
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = SqliteStore::in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        for (role, text) in [
            (Role::User, "hi"),
            (Role::Assistant, "hello"),
            (Role::System, "greeting exchanged"),
            (Role::User, "bye"),
        ] {
            store
                .append("t", role, text)
                .await
                .unwrap_or_else(|e| panic!("append: {e}"));
        }
        let last = store
            .read_last("t", 2)
            .await
            .unwrap_or_else(|e| panic!("read: {e}"));
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].role, Role::System);
        assert_eq!(last[1].text, "bye");

        let summary = store
            .latest_summary("t")
            .await
            .unwrap_or_else(|e| panic!("summary: {e}"));
        assert_eq!(summary.as_deref(), Some("greeting exchanged"));
        assert!(
            store
                .read_last("other", 5)
                .await
                .unwrap_or_else(|e| panic!("read: {e}"))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("nested").join("kb.db");
        {
            let store = SqliteStore::open(&path).unwrap_or_else(|e| panic!("open: {e}"));
            store
                .insert_documents("s", vec![MessageDocument::new("1", "ann", "persisted")])
                .await
                .unwrap_or_else(|e| panic!("insert: {e}"));
        }
        let reopened = SqliteStore::open(&path).unwrap_or_else(|e| panic!("reopen: {e}"));
        let n = reopened
            .count("s", &text_filter("persisted"))
            .await
            .unwrap_or_else(|e| panic!("count: {e}"));
        assert_eq!(n, 1);
        assert_eq!(
            reopened
                .schema_version()
                .await
                .unwrap_or_else(|e| panic!("version: {e}")),
            schema::SCHEMA_VERSION
        );
    }
}
