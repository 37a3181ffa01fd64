use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inputs to the state machine. Each carries the time it happened so the
/// transition never reads the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationEvent {
    UserMessage {
        text: String,
        at: DateTime<Utc>,
    },
    WelcomeSent {
        at: DateTime<Utc>,
    },
    SearchCompleted {
        query: String,
        offset: u32,
        at: DateTime<Utc>,
    },
    PaginationRequested {
        offset: u32,
        at: DateTime<Utc>,
    },
    Timeout {
        at: DateTime<Utc>,
    },
}

impl ConversationEvent {
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::UserMessage {
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ConversationEvent::UserMessage { at, .. }
            | ConversationEvent::WelcomeSent { at }
            | ConversationEvent::SearchCompleted { at, .. }
            | ConversationEvent::PaginationRequested { at, .. }
            | ConversationEvent::Timeout { at } => *at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConversationEvent::UserMessage { .. } => "USER_MESSAGE",
            ConversationEvent::WelcomeSent { .. } => "WELCOME_SENT",
            ConversationEvent::SearchCompleted { .. } => "SEARCH_COMPLETED",
            ConversationEvent::PaginationRequested { .. } => "PAGINATION_REQUESTED",
            ConversationEvent::Timeout { .. } => "TIMEOUT",
        }
    }
}
