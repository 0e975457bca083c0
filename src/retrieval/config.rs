//! Retrieval policy settings.
//!
//! Thresholds and caps are policy, not structure: every value here can be
//! tuned through [`AgentConfigBuilder`](crate::agent::config::AgentConfigBuilder)
//! or the `KB_*` environment variables.

/// Result-count boundary between single-fetch and batched digests.
pub const DEFAULT_BATCH_THRESHOLD: usize = 30;
/// Documents per map batch.
pub const DEFAULT_BATCH_SIZE: usize = 30;
/// Hard cap on map batches per scope.
pub const DEFAULT_MAX_BATCHES: usize = 5;
/// Maximum cards rendered per result.
pub const DEFAULT_DISPLAY_LIMIT: usize = 5;
/// `max_results` when the caller omits it.
pub const DEFAULT_MAX_RESULTS: usize = 5;
/// `min_score` when the caller omits it.
pub const DEFAULT_MIN_SCORE: f64 = 0.1;
/// Ranked fetch size as a multiple of `max_results`.
pub const DEFAULT_PAGE_MULTIPLIER: usize = 3;
/// Card body preview length in grapheme clusters.
pub const DEFAULT_PREVIEW_CHARS: usize = 150;
/// Summaries shorter than this (in chars, trimmed) count as failures.
pub const DEFAULT_MIN_SUMMARY_CHARS: usize = 20;

/// Policy settings for planning, batching, and rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// Largest count answered with a single ranked fetch.
    pub batch_threshold: usize,
    /// Documents per map batch.
    pub batch_size: usize,
    /// Maximum map batches per scope.
    pub max_batches: usize,
    /// Maximum rendered cards.
    pub display_limit: usize,
    /// Default `max_results`.
    pub default_max_results: usize,
    /// Default `min_score`.
    pub default_min_score: f64,
    /// Ranked fetch size multiplier.
    pub page_multiplier: usize,
    /// Card body preview length.
    pub preview_chars: usize,
    /// Minimum acceptable summary length.
    pub min_summary_chars: usize,
    /// Scope name prefix for personal knowledge bases.
    pub user_scope_prefix: String,
    /// Scope name prefix for group archives.
    pub group_scope_prefix: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
            display_limit: DEFAULT_DISPLAY_LIMIT,
            default_max_results: DEFAULT_MAX_RESULTS,
            default_min_score: DEFAULT_MIN_SCORE,
            page_multiplier: DEFAULT_PAGE_MULTIPLIER,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            min_summary_chars: DEFAULT_MIN_SUMMARY_CHARS,
            user_scope_prefix: "user-kb-".to_string(),
            group_scope_prefix: "group-kb-".to_string(),
        }
    }
}

impl RetrievalConfig {
    /// Sets the batch threshold.
    #[must_use]
    pub const fn with_batch_threshold(mut self, n: usize) -> Self {
        self.batch_threshold = n;
        self
    }

    /// Sets the batch size (at least 1).
    #[must_use]
    pub const fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = if n == 0 { 1 } else { n };
        self
    }

    /// Sets the batch cap (at least 1).
    #[must_use]
    pub const fn with_max_batches(mut self, n: usize) -> Self {
        self.max_batches = if n == 0 { 1 } else { n };
        self
    }

    /// Defaults with `KB_BATCH_THRESHOLD`, `KB_BATCH_SIZE`, and
    /// `KB_MAX_BATCHES` applied.
    #[must_use]
    pub fn from_env() -> Self {
        let env = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
        };
        let mut config = Self::default();
        if let Some(n) = env("KB_BATCH_THRESHOLD") {
            config = config.with_batch_threshold(n);
        }
        if let Some(n) = env("KB_BATCH_SIZE") {
            config = config.with_batch_size(n);
        }
        if let Some(n) = env("KB_MAX_BATCHES") {
            config = config.with_max_batches(n);
        }
        config
    }

    /// Personal knowledge-base scope for a user.
    #[must_use]
    pub fn user_scope(&self, user_id: i64) -> String {
        format!("{}{user_id}", self.user_scope_prefix)
    }

    /// Archive scope for a group.
    #[must_use]
    pub fn group_scope(&self, group_id: i64) -> String {
        format!("{}{group_id}", self.group_scope_prefix)
    }
}
