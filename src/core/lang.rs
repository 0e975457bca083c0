//! Reply language and the fixed user-facing strings that depend on it.

use serde::{Deserialize, Serialize};

/// Language a turn is answered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English (default).
    #[default]
    En,
    /// Russian.
    Ru,
}

impl Language {
    /// Parses a language code (case-insensitive). Unknown codes map to English.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ru" | "rus" | "russian" => Self::Ru,
            _ => Self::En,
        }
    }

    /// Returns the ISO 639-1 code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
        }
    }

    /// Language name used in prompt instructions.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Ru => "Russian",
        }
    }

    /// Result count header line (without trailing newline).
    #[must_use]
    pub fn found_header(self, total: usize, shown: usize) -> String {
        match self {
            Self::En => {
                let noun = if total == 1 { "message" } else { "messages" };
                format!("📚 Found {total} {noun} (showing {shown} samples)")
            }
            Self::Ru => format!("📚 Найдено сообщений: {total} (показано {shown})"),
        }
    }

    /// Heading for a batched (map-reduce) digest.
    #[must_use]
    pub const fn comprehensive_digest_heading(self) -> &'static str {
        match self {
            Self::En => "📊 <b>Comprehensive Digest:</b>",
            Self::Ru => "📊 <b>Подробный дайджест:</b>",
        }
    }

    /// Heading for a single-shot digest.
    #[must_use]
    pub const fn digest_heading(self) -> &'static str {
        match self {
            Self::En => "📊 <b>Digest:</b>",
            Self::Ru => "📊 <b>Дайджест:</b>",
        }
    }

    /// Heading for a non-digest summary.
    #[must_use]
    pub const fn summary_heading(self) -> &'static str {
        match self {
            Self::En => "📊 <b>Summary:</b>",
            Self::Ru => "📊 <b>Сводка:</b>",
        }
    }

    /// Placeholder for documents without a timestamp.
    #[must_use]
    pub const fn unknown_date(self) -> &'static str {
        match self {
            Self::En => "Unknown date",
            Self::Ru => "Дата неизвестна",
        }
    }

    /// Note appended to a digest when the batch cap stopped processing early.
    #[must_use]
    pub fn partial_digest_note(self, processed: usize, total: usize) -> String {
        match self {
            Self::En => format!("<i>(summarized {processed} of {total} messages)</i>"),
            Self::Ru => format!("<i>(обработано {processed} из {total} сообщений)</i>"),
        }
    }

    /// Answer used when the knowledge base had nothing and the model was silent.
    #[must_use]
    pub const fn empty_knowledge_base(self) -> &'static str {
        match self {
            Self::En => {
                "I don't have any messages in the knowledge base matching that query yet. \
                 This might be a new topic, or try using different keywords."
            }
            Self::Ru => {
                "В базе знаний пока нет сообщений по этому запросу. \
                 Возможно, это новая тема, или попробуйте другие ключевые слова."
            }
        }
    }

    /// Intro placed before appended result cards when the model gave no text.
    #[must_use]
    pub const fn cards_intro(self) -> &'static str {
        match self {
            Self::En => "Here is what I found in the knowledge base:",
            Self::Ru => "Вот что я нашёл в базе знаний:",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
