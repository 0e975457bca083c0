//! Persistent storage: the `SQLite` message index and conversation history.

pub mod schema;
pub mod sqlite;

use std::path::PathBuf;

pub use sqlite::SqliteStore;

/// Database file name under the data directory.
pub const DEFAULT_DB_FILE: &str = "kb-chat/kb.db";

/// Default database path: the user data dir, or `.kb-chat/kb.db` locally.
#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from(".kb-chat").join("kb.db"),
        |dir| dir.join(DEFAULT_DB_FILE),
    )
}
