//! Rendering of retrieval results.
//!
//! The card framing is relied on downstream: a block bracketed by
//! [`HORIZONTAL_RULE`] with cards opening on [`CARD_OPEN`] and closing on
//! [`CARD_CLOSE`] is treated as already-safe markup and passed through
//! unescaped. Everything interpolated into a card is HTML-escaped here.

use std::fmt::Write;

use unicode_segmentation::UnicodeSegmentation;

use super::backend::RetrievalResult;
use crate::core::{Language, MessageDocument};

/// Rule bracketing a rendered result block.
pub const HORIZONTAL_RULE: &str = "━━━━━━━━━━━━━━━━━━━━";
/// First characters of a card's opening line.
pub const CARD_OPEN: &str = "┌─";
/// A card's closing line.
pub const CARD_CLOSE: &str = "└─────";
/// Returned instead of an empty string when nothing matched.
pub const NO_RESULTS: &str = "[No messages found in knowledge base - please answer the user's question using your general knowledge]";

const ELLIPSIS: &str = "...";
const PERMALINK_GROUP_PREFIX: &str = "-100";

/// Summary section placed above the cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryBlock {
    /// Map-reduce digest over batches.
    Comprehensive(String),
    /// Single-shot digest.
    Digest(String),
    /// Short non-digest summary.
    Summary(String),
}

impl SummaryBlock {
    fn heading(&self, language: Language) -> &'static str {
        match self {
            Self::Comprehensive(_) => language.comprehensive_digest_heading(),
            Self::Digest(_) => language.digest_heading(),
            Self::Summary(_) => language.summary_heading(),
        }
    }

    /// Summary text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Comprehensive(t) | Self::Digest(t) | Self::Summary(t) => t,
        }
    }
}

/// Renders a summary block, count header, and one card per displayed result.
#[must_use]
pub fn render_results(
    total: usize,
    display: &[RetrievalResult],
    summary: Option<&SummaryBlock>,
    language: Language,
    preview_chars: usize,
) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(display.len() * 3 + 6);

    if let Some(block) = summary {
        lines.push(format!("\n{}", block.heading(language)));
        lines.push(block.text().trim().to_string());
    }

    lines.push(format!("\n{HORIZONTAL_RULE}"));
    lines.push(format!("{}\n", language.found_header(total, display.len())));

    for result in display {
        lines.push(render_card(&result.document, language, preview_chars));
    }

    lines.push(format!("{HORIZONTAL_RULE}\n"));
    lines.join("\n")
}

/// Renders one card.
#[must_use]
pub fn render_card(doc: &MessageDocument, language: Language, preview_chars: usize) -> String {
    let sender = if doc.sender_name.trim().is_empty() {
        "Unknown"
    } else {
        doc.sender_name.trim()
    };
    let date = format_timestamp(doc, language);
    let date_display = permalink(doc).map_or_else(
        || date.clone(),
        |url| format!("<a href=\"{url}\">{date}</a>"),
    );
    let body = truncate_graphemes(&doc.message_text.replace('\n', " "), preview_chars);

    let mut card = String::new();
    let _ = writeln!(
        card,
        "{CARD_OPEN} 👤 <b>{}</b> • {date_display}",
        escape_html(sender)
    );
    let _ = writeln!(card, "\"{}\"", escape_html(&body));
    card.push_str(CARD_CLOSE);
    card
}

/// Formats the document timestamp as `YYYY-MM-DD HH:MM`.
#[must_use]
pub fn format_timestamp(doc: &MessageDocument, language: Language) -> String {
    doc.message_date.map_or_else(
        || language.unknown_date().to_string(),
        |d| d.format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Deep link for chat-archive messages.
///
/// Derivable when the group id is a `-100`-prefixed supergroup id and the
/// message id ends in `_<digits>`.
#[must_use]
pub fn permalink(doc: &MessageDocument) -> Option<String> {
    let channel = doc.group_id.as_deref()?.strip_prefix(PERMALINK_GROUP_PREFIX)?;
    if channel.is_empty() || !channel.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let message = doc.message_id.rsplit('_').next()?;
    if message.is_empty()
        || message == doc.message_id
        || !message.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(format!("https://t.me/c/{channel}/{message}"))
}

/// Truncates to `max` grapheme clusters, appending `...` when cut.
#[must_use]
pub fn truncate_graphemes(text: &str, max: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{head}{ELLIPSIS}")
    } else {
        head
    }
}

/// Escapes `&`, `<`, `>`, and `"` for HTML bodies.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether `text` already contains a rendered result block.
#[must_use]
pub fn contains_result_block(text: &str) -> bool {
    text.contains(HORIZONTAL_RULE)
}
