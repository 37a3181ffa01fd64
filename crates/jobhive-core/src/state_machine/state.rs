use std::fmt;

use chrono::{DateTime, Utc};
use jobhive_schema::{RequestId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    #[default]
    Idle,
    Welcomed,
    AwaitingJobTitle,
    SearchingJobs,
    DisplayingResults,
    Browsing,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Welcomed => "welcomed",
            ConversationState::AwaitingJobTitle => "awaitingJobTitle",
            ConversationState::SearchingJobs => "searchingJobs",
            ConversationState::DisplayingResults => "displayingResults",
            ConversationState::Browsing => "browsing",
        }
    }

    /// States in which free text is read as a job title or a pagination request.
    pub fn accepts_queries(&self) -> bool {
        matches!(
            self,
            ConversationState::AwaitingJobTitle
                | ConversationState::DisplayingResults
                | ConversationState::Browsing
        )
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-user conversation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub user_id: UserId,
    pub session_id: String,
    pub current_state: ConversationState,
    #[serde(default)]
    pub welcome_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_offset: Option<u32>,
    #[serde(default)]
    pub latest_request_id: Option<RequestId>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Fresh session: new `session_id`, `idle`, nothing sent or searched yet.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            session_id: Uuid::new_v4().to_string(),
            current_state: ConversationState::Idle,
            welcome_sent_at: None,
            last_query: None,
            last_offset: None,
            latest_request_id: None,
            last_message_at: now,
            created_at: now,
        }
    }

    pub fn welcome_already_sent(&self) -> bool {
        self.welcome_sent_at.is_some()
    }

    pub(crate) fn reset_to_idle(&mut self) {
        self.current_state = ConversationState::Idle;
        self.welcome_sent_at = None;
        self.last_query = None;
        self.last_offset = None;
        self.latest_request_id = None;
    }
}
