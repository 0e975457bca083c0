//! Indexed chat message document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archived chat message as stored in a knowledge scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDocument {
    /// Backend-unique message id (chat-archive ids look like `<chat>_<msg>`).
    pub message_id: String,
    /// Display name of the author.
    pub sender_name: String,
    /// Message body.
    pub message_text: String,
    /// When the message was sent.
    #[serde(default)]
    pub message_date: Option<DateTime<Utc>>,
    /// Originating group, if the message came from a group chat.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Mentioned user names.
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Hashtags found in the body.
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl MessageDocument {
    /// Creates a document with only the required fields set.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        sender_name: impl Into<String>,
        message_text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender_name: sender_name.into(),
            message_text: message_text.into(),
            message_date: None,
            group_id: None,
            mentions: Vec::new(),
            hashtags: Vec::new(),
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn at(mut self, date: DateTime<Utc>) -> Self {
        self.message_date = Some(date);
        self
    }

    /// Sets the originating group.
    #[must_use]
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}
