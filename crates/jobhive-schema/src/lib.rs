use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const WHATSAPP_USER_SUFFIX: &str = "@s.whatsapp.net";

/// Stable identifier of a chat user. For WhatsApp this is the phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Normalize a WhatsApp JID (`33612345678:12@s.whatsapp.net`) to the bare phone number.
    pub fn from_whatsapp_jid(jid: &str) -> Self {
        let without_server = jid.strip_suffix(WHATSAPP_USER_SUFFIX).unwrap_or(jid);
        let without_device = without_server
            .split_once(':')
            .map(|(number, _)| number)
            .unwrap_or(without_server);
        Self(without_device.trim_start_matches('+').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a triggered asynchronous action (a search or a page fetch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub trace_id: Uuid,
    pub channel_type: String,
    pub user_id: UserId,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Platform-specific message ID, used to spot webhook redeliveries in logs
    #[serde(default)]
    pub message_id: Option<String>,
}

impl InboundMessage {
    pub fn whatsapp(sender_jid: &str, text: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            channel_type: "whatsapp".to_string(),
            user_id: UserId::from_whatsapp_jid(sender_jid),
            text: text.into(),
            at: Utc::now(),
            message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub id: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

/// One page of search results for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub query: String,
    pub offset: u32,
    pub total: u32,
    pub listings: Vec<JobListing>,
}

impl JobPage {
    pub fn empty(query: impl Into<String>, offset: u32) -> Self {
        Self {
            query: query.into(),
            offset,
            total: 0,
            listings: vec![],
        }
    }

    pub fn has_more(&self) -> bool {
        (self.offset as usize + self.listings.len()) < self.total as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    NewQuery,
    NextPage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusMessage {
    MessageAccepted {
        trace_id: Uuid,
        user_id: UserId,
    },
    WelcomeSent {
        user_id: UserId,
        session_id: String,
    },
    SearchDispatched {
        user_id: UserId,
        request_id: RequestId,
        kind: SearchKind,
        query: String,
        offset: u32,
    },
    ResultsDelivered {
        user_id: UserId,
        request_id: RequestId,
        count: usize,
    },
    StaleResultDiscarded {
        user_id: UserId,
        request_id: RequestId,
    },
    TaskFailed {
        user_id: UserId,
        error: String,
    },
}

impl BusMessage {
    pub fn user_id(&self) -> &UserId {
        match self {
            BusMessage::MessageAccepted { user_id, .. }
            | BusMessage::WelcomeSent { user_id, .. }
            | BusMessage::SearchDispatched { user_id, .. }
            | BusMessage::ResultsDelivered { user_id, .. }
            | BusMessage::StaleResultDiscarded { user_id, .. }
            | BusMessage::TaskFailed { user_id, .. } => user_id,
        }
    }
}
