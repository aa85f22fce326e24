//! Context builder for assembling the model's message sequence

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use super::preamble::system_preamble;
use crate::db::ConversationTurn;

/// Message role in a chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a `system` message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a `user` message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an `assistant` message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered messages for one model call; rebuilt for every call, never stored
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextWindow {
    messages: Vec<ChatMessage>,
}

impl ContextWindow {
    /// The messages in send order
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the window has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of history turns included (user/assistant pairs)
    #[must_use]
    pub fn history_turns(&self) -> usize {
        // Preamble and current utterance are not history
        self.messages.len().saturating_sub(2) / 2
    }
}

/// Builds context windows for the model
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    wake_word: String,
    utc_offset: FixedOffset,
}

impl ContextBuilder {
    /// Create a builder for a wake word and the assistant's fixed UTC offset
    #[must_use]
    pub fn new(wake_word: impl Into<String>, utc_offset: FixedOffset) -> Self {
        Self {
            wake_word: wake_word.into(),
            utc_offset,
        }
    }

    /// Render the system preamble for a point in time
    #[must_use]
    pub fn preamble_at(&self, now: DateTime<Utc>) -> String {
        system_preamble(now.with_timezone(&self.utc_offset), &self.wake_word)
    }

    /// Assemble `preamble`, `history` and the current utterance
    ///
    /// `history` is newest first, as returned by the store; it is reversed
    /// so the model reads it oldest first, one user/assistant pair per turn.
    #[must_use]
    pub fn build(
        &self,
        preamble: &str,
        history: &[ConversationTurn],
        utterance: &str,
    ) -> ContextWindow {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(preamble));

        for turn in history.iter().rev() {
            messages.push(ChatMessage::user(turn.user_message.as_str()));
            messages.push(ChatMessage::assistant(turn.assistant_response.as_str()));
        }

        messages.push(ChatMessage::user(utterance));

        ContextWindow { messages }
    }

    /// Assemble a window using a preamble for the current time
    #[must_use]
    pub fn build_now(&self, history: &[ConversationTurn], utterance: &str) -> ContextWindow {
        self.build(&self.preamble_at(Utc::now()), history, utterance)
    }
}
