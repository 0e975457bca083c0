//! System prompts and template builders for the chat and summary agents.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::core::Language;
use crate::history::HistoryEntry;
use crate::retrieval::RetrievalResult;

/// System prompt for the chat agent.
pub const CHAT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to the user's message knowledge base.

## Tools

- `search_knowledge_base`: search archived messages. Use query "*" together with `date_from`/`date_to` for digests of a period. Only pass dates when the user names a period ("last week", "in March"); without dates the whole history is searched.
- `list_recent_messages`: the latest messages, newest first.

## Rules

- Search before answering questions about past conversations, people, decisions, or links.
- Tool results already contain formatted message cards. Refer to them briefly; do not copy the cards.
- If the knowledge base has nothing relevant, say so and answer from general knowledge.
- Always reply with text. Never end a turn silently.

## Formatting

Use HTML for emphasis (<b>, <i>) and plain newlines. Do not use markdown."#;

/// System prompt for one map batch.
pub const BATCH_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes conversations. Be concise and factual.";

/// System prompt for digests and the combine step.
pub const DIGEST_SYSTEM_PROMPT: &str = "You are an expert digest writer. Create clear, engaging, \
     well-structured summaries using HTML formatting (use <b>, <i>, no markdown).";

/// System prompt for short search summaries.
pub const SEARCH_SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful knowledge base assistant. \
     Provide clear, informative summaries. Be conversational and helpful.";

/// System prompt for rolling conversation summaries.
pub const CONVERSATION_SUMMARY_SYSTEM_PROMPT: &str = "You compress conversations into compact notes \
     that preserve facts, decisions, open questions, and user preferences.";

const HTML_FORMAT_RULES: &str = "IMPORTANT: Format using HTML tags:\n\
     - Use <b>bold</b> for emphasis\n\
     - Use <i>italic</i> for secondary emphasis\n\
     - Use bullet points with • or numbered lists\n\
     - Use line breaks (just newlines, no <br>)\n\
     - Do NOT use markdown (**, ##, ###) - use HTML only";

/// Directory for prompt overrides under the user config dir.
const DEFAULT_PROMPT_DIR: &str = "kb-chat/prompts";
/// Override file for the chat prompt.
const CHAT_FILENAME: &str = "chat.md";

/// Message text characters shown per line in batch prompts.
const BATCH_TEXT_CHARS: usize = 200;
/// Message text characters shown per line in digest prompts.
const DIGEST_TEXT_CHARS: usize = 300;

/// Prompts the chat agent runs with.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// Chat system prompt.
    pub chat: String,
}

impl PromptSet {
    /// Loads overrides from `prompt_dir`, `KB_PROMPT_DIR`, or the config dir,
    /// falling back to compiled-in defaults.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved = prompt_dir
            .map(PathBuf::from)
            .or_else(|| std::env::var("KB_PROMPT_DIR").ok().map(PathBuf::from))
            .or_else(Self::default_dir);
        let chat = resolved
            .map(|dir| dir.join(CHAT_FILENAME))
            .and_then(|path| std::fs::read_to_string(path).ok())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| CHAT_SYSTEM_PROMPT.to_string());
        Self { chat }
    }

    /// Compiled-in defaults.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            chat: CHAT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Default override directory.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(DEFAULT_PROMPT_DIR))
    }
}

/// Appends the reply-language instruction and any stored conversation summary.
#[must_use]
pub fn build_chat_system_prompt(base: &str, language: Language, summary: Option<&str>) -> String {
    let mut prompt = format!(
        "{base}\n\nAlways reply in {}.",
        language.display_name()
    );
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = write!(prompt, "\n\n<conversation_summary>\n{summary}\n</conversation_summary>");
    }
    prompt
}

/// System prompt for a summary agent, with the reply language.
#[must_use]
pub fn with_language(system_prompt: &str, language: Language) -> String {
    format!("{system_prompt} Write in {}.", language.display_name())
}

fn format_documents(docs: &[RetrievalResult], text_chars: usize, date_len: usize) -> String {
    let mut out = String::new();
    for (i, result) in docs.iter().enumerate() {
        let doc = &result.document;
        let date = doc
            .message_date
            .map(|d| {
                let full = d.format("%Y-%m-%d %H:%M").to_string();
                full.chars().take(date_len).collect::<String>()
            })
            .unwrap_or_default();
        let text: String = doc.message_text.chars().take(text_chars).collect();
        let sender = if doc.sender_name.is_empty() {
            "Unknown"
        } else {
            &doc.sender_name
        };
        let _ = writeln!(out, "{}. [{sender}, {date}]: {text}", i + 1);
    }
    out
}

fn period_suffix(period: Option<&str>) -> String {
    period.map(|p| format!(" {p}")).unwrap_or_default()
}

/// Map step: summary of one batch.
#[must_use]
pub fn build_batch_prompt(docs: &[RetrievalResult], batch_number: usize) -> String {
    format!(
        "Summarize this batch of messages (Batch {batch_number}):\n\n\
         {}\n\
         Provide a concise summary (max 100 words) covering:\n\
         1. Main topics discussed\n\
         2. Key points or decisions\n\
         3. Notable participants if relevant\n\n\
         Be factual and specific.",
        format_documents(docs, BATCH_TEXT_CHARS, 10)
    )
}

/// Reduce step: one digest from batch summaries.
#[must_use]
pub fn build_combine_prompt(partials: &[String], period: Option<&str>) -> String {
    format!(
        "Create a comprehensive digest{} from these batch summaries:\n\n\
         {}\n\n\
         Provide a well-structured digest (max 200 words) that:\n\
         1. Identifies overall themes across all batches\n\
         2. Highlights most important discussions\n\
         3. Notes key participants if relevant\n\
         4. Maintains chronological flow if relevant\n\n\
         {HTML_FORMAT_RULES}\n\n\
         Be engaging and well-organized.",
        period_suffix(period),
        partials.join("\n\n")
    )
}

/// Single-shot digest over a time window.
#[must_use]
pub fn build_digest_prompt(docs: &[RetrievalResult], period: Option<&str>) -> String {
    format!(
        "Create a comprehensive digest from these {} messages{}:\n\n\
         {}\n\
         Provide a well-structured digest (max 200 words) that:\n\
         1. Identifies main themes and topics discussed\n\
         2. Highlights important discussions, decisions, or notable events\n\
         3. Notes key participants and their contributions if relevant\n\
         4. Maintains chronological flow where appropriate\n\
         5. Uses clear sections or bullet points for readability\n\n\
         {HTML_FORMAT_RULES}\n\n\
         Be engaging, well-organized, and factual.",
        docs.len(),
        period_suffix(period),
        format_documents(docs, DIGEST_TEXT_CHARS, 16)
    )
}

/// Short overview of a plain search result.
#[must_use]
pub fn build_search_summary_prompt(docs: &[RetrievalResult]) -> String {
    format!(
        "Based on these search results:\n\n\
         {}\n\
         Provide a clear, informative summary (2-3 sentences, max 400 characters) that \
         highlights the most important information. Be specific and factual.\n\nSummary:",
        format_documents(docs, BATCH_TEXT_CHARS, 10)
    )
}

/// Rolling conversation summary over recent history.
#[must_use]
pub fn build_conversation_summary_prompt(
    previous: Option<&str>,
    entries: &[HistoryEntry],
) -> String {
    let mut prompt = String::new();
    if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
        let _ = write!(prompt, "<previous_summary>\n{previous}\n</previous_summary>\n\n");
    }
    prompt.push_str("<messages>\n");
    for entry in entries {
        let _ = writeln!(prompt, "{}: {}", entry.role, entry.text);
    }
    prompt.push_str(
        "</messages>\n\nUpdate the summary of this conversation in at most 150 words. \
         Keep names, dates, decisions, and unresolved questions.",
    );
    prompt
}
