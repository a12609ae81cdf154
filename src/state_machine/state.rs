//! Chat state types

use crate::identity::ConversationIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Dispatcher state of one session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ChatState {
    /// Ready for input, no turn in flight
    #[default]
    Idle,

    /// User message appended, conversation identity being resolved
    Sending { turn_id: String, text: String },

    /// Completion requested, waiting for the first reply on either channel
    AwaitingReply {
        turn_id: String,
        conversation_id: ConversationIdentity,
    },

    /// Turn failed and the explanation was appended; returns to Idle
    Failed { turn_id: String, reason: String },
}

impl ChatState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ChatState::Idle)
    }

    /// Correlation id of the turn in flight
    pub fn turn_id(&self) -> Option<&str> {
        match self {
            ChatState::Idle => None,
            ChatState::Sending { turn_id, .. }
            | ChatState::AwaitingReply { turn_id, .. }
            | ChatState::Failed { turn_id, .. } => Some(turn_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatState::Idle => "idle",
            ChatState::Sending { .. } => "sending",
            ChatState::AwaitingReply { .. } => "awaiting_reply",
            ChatState::Failed { .. } => "failed",
        }
    }
}

/// Which channel is expected to carry the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyChannel {
    /// The completion call returns the reply; push events are a backstop
    #[default]
    Direct,
    /// The completion call only acknowledges; the reply arrives by push
    Push,
}

impl FromStr for ReplyChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ReplyChannel::Direct),
            "push" => Ok(ReplyChannel::Push),
            other => Err(format!("unknown reply channel '{other}' (expected direct or push)")),
        }
    }
}

impl fmt::Display for ReplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyChannel::Direct => f.write_str("direct"),
            ReplyChannel::Push => f.write_str("push"),
        }
    }
}

/// Context for a session (immutable configuration)
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub session_id: String,
    pub primary_channel: ReplyChannel,
}

impl ChatContext {
    pub fn new(session_id: impl Into<String>, primary_channel: ReplyChannel) -> Self {
        Self {
            session_id: session_id.into(),
            primary_channel,
        }
    }
}
