//! Conversation history and the rolling conversation summary.
//!
//! Turns append the user utterance and the final answer to a
//! [`HistoryStore`]. A [`SummaryUpdater`] runs after each turn, off the
//! response path, and periodically stores a compact recap of the thread as a
//! system record that later prompts include.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::message::Role;
use crate::agent::prompt::{CONVERSATION_SUMMARY_SYSTEM_PROMPT, build_conversation_summary_prompt};
use crate::agent::summarizer::LlmSummarizer;
use crate::core::Language;
use crate::error::{Error, StorageError};

/// Stored messages since the last summary that trigger a new one.
pub const SUMMARY_INTERVAL: usize = 10;

/// How far back [`HistoryStore::latest_summary`] looks by default.
const SUMMARY_SCAN: usize = 200;

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author role. Summaries are stored as [`Role::System`].
    pub role: Role,
    /// Message text.
    pub text: String,
    /// When the message was stored.
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(role: Role, text: &str) -> Self {
        Self {
            role,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Per-thread message log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a message to `thread`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    async fn append(&self, thread: &str, role: Role, text: &str) -> Result<(), StorageError>;

    /// The last `limit` messages of `thread`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    async fn read_last(&self, thread: &str, limit: usize)
    -> Result<Vec<HistoryEntry>, StorageError>;

    /// Text of the most recent summary record of `thread`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    async fn latest_summary(&self, thread: &str) -> Result<Option<String>, StorageError> {
        let entries = self.read_last(thread, SUMMARY_SCAN).await?;
        Ok(latest_summary(&entries).map(str::to_string))
    }
}

/// Text of the last summary record in `entries`.
#[must_use]
pub fn latest_summary(entries: &[HistoryEntry]) -> Option<&str> {
    entries
        .iter()
        .rev()
        .find(|e| e.role == Role::System)
        .map(|e| e.text.as_str())
}

/// Conversation messages in `entries` after the last summary record.
#[must_use]
pub fn since_last_summary(entries: &[HistoryEntry]) -> &[HistoryEntry] {
    let start = entries
        .iter()
        .rposition(|e| e.role == Role::System)
        .map_or(0, |i| i + 1);
    &entries[start..]
}

/// In-process [`HistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistory {
    threads: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl MemoryHistory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages in `thread`, summaries included.
    #[must_use]
    pub fn len(&self, thread: &str) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread)
            .map_or(0, Vec::len)
    }

    /// Whether `thread` has no messages.
    #[must_use]
    pub fn is_empty(&self, thread: &str) -> bool {
        self.len(thread) == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, thread: &str, role: Role, text: &str) -> Result<(), StorageError> {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread.to_string())
            .or_default()
            .push(HistoryEntry::new(role, text));
        Ok(())
    }

    async fn read_last(
        &self,
        thread: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = threads.get(thread) else {
            return Ok(Vec::new());
        };
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

/// Post-turn summary maintenance.
#[async_trait]
pub trait SummaryUpdater: Send + Sync {
    /// Refreshes the summary of `thread` if it is due.
    ///
    /// Returns whether a new summary was stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] if history or the summary model fails.
    async fn update(&self, thread: &str, language: Language) -> Result<bool, Error>;
}

/// Summarizes a thread every [`SUMMARY_INTERVAL`] stored messages.
pub struct RollingSummary {
    store: Arc<dyn HistoryStore>,
    summarizer: LlmSummarizer,
    interval: usize,
}

impl RollingSummary {
    /// Creates an updater writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, summarizer: LlmSummarizer) -> Self {
        Self {
            store,
            summarizer,
            interval: SUMMARY_INTERVAL,
        }
    }

    /// Overrides the message interval (minimum 1).
    #[must_use]
    pub fn with_interval(mut self, interval: usize) -> Self {
        self.interval = interval.max(1);
        self
    }
}

#[async_trait]
impl SummaryUpdater for RollingSummary {
    async fn update(&self, thread: &str, language: Language) -> Result<bool, Error> {
        let entries = self.store.read_last(thread, SUMMARY_SCAN).await?;
        let pending = since_last_summary(&entries);
        if pending.len() < self.interval {
            debug!(thread, pending = pending.len(), "summary not due");
            return Ok(false);
        }

        let prompt = build_conversation_summary_prompt(latest_summary(&entries), pending);
        let summary = self
            .summarizer
            .run(
                "conversation_summary",
                CONVERSATION_SUMMARY_SYSTEM_PROMPT,
                language,
                &prompt,
            )
            .await?;
        if summary.trim().is_empty() {
            return Ok(false);
        }
        self.store.append(thread, Role::System, &summary).await?;
        info!(thread, messages = pending.len(), "conversation summary updated");
        Ok(true)
    }
}
