//! Database schema migrations.
//!
//! Version 1 creates the message table, its FTS5 index with sync triggers,
//! and the conversation history table.

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Applies pending migrations.
///
/// # Errors
///
/// Returns [`StorageError::Database`] if a statement fails.
pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < 1 {
        apply_v1(conn)?;
        info!(version = 1, "applied schema migration");
    }
    Ok(())
}

/// Current schema version of `conn`.
///
/// # Errors
///
/// Returns [`StorageError::Database`] if the query fails.
pub fn version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn apply_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY,
            scope           TEXT NOT NULL,
            message_id      TEXT NOT NULL,
            sender_name     TEXT NOT NULL DEFAULT '',
            message_text    TEXT NOT NULL DEFAULT '',
            message_date    INTEGER,
            group_id        TEXT,
            mentions        TEXT NOT NULL DEFAULT '',
            hashtags        TEXT NOT NULL DEFAULT '',
            UNIQUE (scope, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_recency
            ON messages (scope, message_date DESC, message_id DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            message_text,
            sender_name,
            mentions,
            hashtags,
            content = 'messages',
            content_rowid = 'id',
            tokenize = 'unicode61 remove_diacritics 2'
        );

        CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts (rowid, message_text, sender_name, mentions, hashtags)
            VALUES (new.id, new.message_text, new.sender_name, new.mentions, new.hashtags);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts (messages_fts, rowid, message_text, sender_name, mentions, hashtags)
            VALUES ('delete', old.id, old.message_text, old.sender_name, old.mentions, old.hashtags);
        END;

        CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
            INSERT INTO messages_fts (messages_fts, rowid, message_text, sender_name, mentions, hashtags)
            VALUES ('delete', old.id, old.message_text, old.sender_name, old.mentions, old.hashtags);
            INSERT INTO messages_fts (rowid, message_text, sender_name, mentions, hashtags)
            VALUES (new.id, new.message_text, new.sender_name, new.mentions, new.hashtags);
        END;

        CREATE TABLE IF NOT EXISTS history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread      TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant', 'tool')),
            text        TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_thread
            ON history (thread, id DESC);

        INSERT INTO schema_migrations (version) VALUES (1);
        ",
    )?;
    Ok(())
}
