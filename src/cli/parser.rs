//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// kb-chat: retrieval-augmented chat over an archived message knowledge base.
///
/// Index chat exports into named scopes, search them with the same
/// planner the agent uses, and ask questions that stream back answers.
#[derive(Parser, Debug)]
#[command(name = "kb-chat")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the knowledge-base database file.
    ///
    /// Defaults to `kb-chat/kb.db` under the user data directory.
    #[arg(short, long, env = "KB_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Knowledge scopes a search or turn runs against.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// User the request is made for; selects `user-kb-<id>` when nothing else applies.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub user: i64,

    /// Restrict to these group archives (`group-kb-<id>`). Repeatable.
    #[arg(short, long = "group", allow_negative_numbers = true)]
    pub groups: Vec<i64>,

    /// Knowledge bases attached to the thread. Repeatable.
    #[arg(short, long = "scope")]
    pub scopes: Vec<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the knowledge-base database.
    ///
    /// Creates the database file and schema if they don't exist.
    #[command(after_help = r#"Examples:
  kb-chat init                    # Initialize at the default path
  kb-chat init --force            # Re-initialize (destroys existing data)
  kb-chat --db-path ./kb.db init  # Initialize with custom path
"#)]
    Init {
        /// Force re-initialization (destroys existing data).
        #[arg(short, long)]
        force: bool,
    },

    /// Show schema version and indexed scopes.
    Status,

    /// Index messages from a JSON Lines file into a scope.
    ///
    /// Each line is one message object with `message_id`, `sender_name`,
    /// `message_text`, and optional `message_date`, `group_id`, `mentions`,
    /// `hashtags`. Existing ids in the scope are replaced.
    #[command(after_help = r#"Examples:
  kb-chat index export.jsonl --scope group-kb--1001234567890
  cat export.jsonl | kb-chat index - --scope user-kb-42
"#)]
    Index {
        /// JSON Lines file, or `-` for stdin.
        file: PathBuf,

        /// Scope (index) name to write to.
        #[arg(short, long)]
        scope: String,
    },

    /// Search the knowledge base the way the agent's search tool does.
    #[command(after_help = r#"Examples:
  kb-chat search "release date" --scope team-kb
  kb-chat search "*" --date-from 7d --group -1001234567890   # Weekly digest
  kb-chat search "deploy" --from-user alice -k 10
  kb-chat --format json search "budget" --user 42 | jq '.total'
"#)]
    Search {
        /// Search query text, or `*` for everything in range.
        query: String,

        /// Knowledge scopes to search.
        #[command(flatten)]
        scope: ScopeArgs,

        /// Only messages from this sender (fuzzy match).
        #[arg(long)]
        from_user: Option<String>,

        /// Lower date bound: `YYYY-MM-DD` or `<N>d`, `<N>w`, `<N>m`.
        #[arg(long)]
        date_from: Option<String>,

        /// Upper date bound, inclusive of its whole day.
        #[arg(long)]
        date_to: Option<String>,

        /// Maximum number of results (clamped to 1..=20).
        #[arg(short = 'k', long)]
        max_results: Option<i64>,

        /// Minimum relevance score (clamped to 0.0..=1.0).
        #[arg(short, long)]
        min_score: Option<f64>,

        /// Language for headers and summaries (en, ru).
        #[arg(short, long, default_value = "en")]
        lang: String,

        /// Use the extractive summarizer even when a provider is configured.
        #[arg(long)]
        extractive: bool,
    },

    /// Ask a question; the answer streams to stdout.
    #[command(after_help = r#"Examples:
  kb-chat ask "what did we decide about the launch?" --scope team-kb
  kb-chat ask "summarize this week" --group -1001234567890 --thread standup
  kb-chat ask "hi" --tool list_recent_messages
"#)]
    Ask {
        /// The user utterance.
        utterance: String,

        /// Knowledge scopes to search.
        #[command(flatten)]
        scope: ScopeArgs,

        /// Conversation thread; history and summaries are kept per thread.
        #[arg(short, long, default_value = "cli")]
        thread: String,

        /// Reply language (en, ru).
        #[arg(short, long, default_value = "en")]
        lang: String,

        /// Tools the agent may call. Repeatable; empty means all.
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// Directory with prompt overrides.
        #[arg(long, env = "KB_PROMPT_DIR")]
        prompt_dir: Option<PathBuf>,
    },

    /// Show the stored history of a thread.
    History {
        /// Conversation thread.
        thread: String,

        /// Number of most recent messages.
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    /// Returns the database path, using the default if not specified.
    #[must_use]
    pub fn get_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(crate::storage::default_db_path)
    }
}
