//! Output formatting for CLI commands.

use std::fmt::Write as _;

use serde::Serialize;

use crate::history::HistoryEntry;
use crate::retrieval::{RenderedResult, SummaryBlock};

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name. Unknown names fall back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    /// Serializes `value` as pretty JSON with a trailing newline.
    #[must_use]
    pub fn to_json<T: Serialize>(self, value: &T) -> String {
        serde_json::to_string_pretty(value).map_or_else(
            |e| format!("{{\"error\": \"serialization failed: {e}\"}}\n"),
            |json| json + "\n",
        )
    }
}

/// Formats a retrieval outcome.
#[must_use]
pub fn format_search(query: &str, result: &RenderedResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = result.rendered.clone();
            if !output.ends_with('\n') {
                output.push('\n');
            }
            if result.cap_reached {
                let _ = writeln!(
                    output,
                    "\n(batch cap reached after {} batches)",
                    result.batches_processed
                );
            }
            for scope in &result.failed_scopes {
                let _ = writeln!(output, "warning: scope '{scope}' could not be searched");
            }
            output
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "query": query,
                "total": result.total,
                "batches_processed": result.batches_processed,
                "cap_reached": result.cap_reached,
                "failed_scopes": result.failed_scopes,
                "summary": result.summary.as_ref().map(SummaryBlock::text),
                "results": result.results.iter().map(|r| serde_json::json!({
                    "score": r.score,
                    "message_id": r.document.message_id,
                    "sender_name": r.document.sender_name,
                    "message_date": r.document.message_date,
                    "message_text": r.document.message_text,
                })).collect::<Vec<_>>(),
                "rendered": result.rendered,
            });
            format.to_json(&json)
        }
    }
}

/// Formats a thread's history, oldest first.
#[must_use]
pub fn format_history(thread: &str, entries: &[HistoryEntry], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                return format!("No history for thread: {thread}\n");
            }
            let mut output = String::new();
            for entry in entries {
                let _ = writeln!(
                    output,
                    "[{}] {}: {}",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.role.as_str(),
                    entry.text
                );
            }
            output
        }
        OutputFormat::Json => format.to_json(&serde_json::json!({
            "thread": thread,
            "count": entries.len(),
            "messages": entries,
        })),
    }
}

/// Formats the indexed scopes with their document counts.
#[must_use]
pub fn format_status(
    path: &std::path::Path,
    version: i64,
    scopes: &[(String, u64)],
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = format!("Database: {}\nSchema version: {version}\n", path.display());
            if scopes.is_empty() {
                output.push_str("No scopes indexed.\n");
                return output;
            }
            let _ = writeln!(output, "\n{:<40} {:>10}", "Scope", "Messages");
            output.push_str(&"-".repeat(51));
            output.push('\n');
            for (scope, count) in scopes {
                let _ = writeln!(output, "{scope:<40} {count:>10}");
            }
            output
        }
        OutputFormat::Json => format.to_json(&serde_json::json!({
            "path": path.to_string_lossy(),
            "schema_version": version,
            "scopes": scopes
                .iter()
                .map(|(scope, count)| serde_json::json!({ "scope": scope, "messages": count }))
                .collect::<Vec<_>>(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::Role;

    #[test]
    fn test_parse_format() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse(" JSON "), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Text);
    }

    #[test]
    fn test_history_text() {
        let entries = vec![
            HistoryEntry::new(Role::User, "hi"),
            HistoryEntry::new(Role::Assistant, "hello"),
        ];
        let text = format_history("t", &entries, OutputFormat::Text);
        assert!(text.contains("user: hi"));
        assert!(text.contains("assistant: hello"));
        assert!(format_history("t", &[], OutputFormat::Text).contains("No history"));
    }

    #[test]
    fn test_status_json() {
        let scopes = vec![("team-kb".to_string(), 3)];
        let json = format_status(
            std::path::Path::new("kb.db"),
            1,
            &scopes,
            OutputFormat::Json,
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["scopes"][0]["messages"], 3);
    }
}
