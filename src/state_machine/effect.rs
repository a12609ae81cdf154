//! Effects produced by state transitions

use crate::identity::ConversationIdentity;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the user's message (optimistic echo)
    AppendUser { message_id: String, text: String },

    /// Append an assistant reply for a turn
    AppendReply { reply_to: String, text: String },

    /// Append an assistant message explaining a failed turn
    AppendFailure { reply_to: String, text: String },

    /// Set the session's "awaiting reply" flag
    SetWaiting(bool),

    /// Resolve the conversation identity for a turn
    ResolveIdentity { turn_id: String },

    /// Bind a freshly created identity to the session
    BindIdentity { conversation_id: ConversationIdentity },

    /// Attach the push listener for a conversation
    Subscribe { conversation_id: ConversationIdentity },

    /// Release the push listener
    Unsubscribe,

    /// Invoke the completion provider (spawns as background task)
    RequestCompletion {
        turn_id: String,
        conversation_id: ConversationIdentity,
        text: String,
    },

    /// Feed `Recovered` back once the failure has been reported
    ScheduleRecovery { turn_id: String },

    /// Clear messages and identity together
    ClearSession,

    /// Notify connected views that a turn finished
    NotifyTurnComplete { turn_id: String },
}

impl Effect {
    pub fn append_user(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::AppendUser {
            message_id: message_id.into(),
            text: text.into(),
        }
    }

    pub fn append_reply(reply_to: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::AppendReply {
            reply_to: reply_to.into(),
            text: text.into(),
        }
    }

    pub fn append_failure(reply_to: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::AppendFailure {
            reply_to: reply_to.into(),
            text: text.into(),
        }
    }

    pub fn turn_complete(turn_id: impl Into<String>) -> Self {
        Effect::NotifyTurnComplete {
            turn_id: turn_id.into(),
        }
    }
}
