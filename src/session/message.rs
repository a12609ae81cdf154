//! Message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    User,
    Assistant,
}

/// Delivery status of an outgoing user message
///
/// Kept beside the message rather than inside it, so messages never change
/// after they are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One entry in a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Message {
    id: String,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    reply_to: Option<String>,
    #[serde(default)]
    is_error: bool,
}

impl Message {
    /// User message; `id` doubles as the turn's correlation id
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            reply_to: None,
            is_error: false,
        }
    }

    /// Assistant reply answering the user message `reply_to`
    pub fn assistant(content: impl Into<String>, reply_to: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            reply_to,
            is_error: false,
        }
    }

    /// Assistant message explaining why a turn failed
    pub fn failure(content: impl Into<String>, reply_to: Option<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content, reply_to)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}
