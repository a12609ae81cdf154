//! Events that can occur in a session

use crate::backend::{BackendError, CompletionResponse, PushEvent};
use crate::identity::ConversationIdentity;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // View events
    /// Signed-in user submits text; `message_id` becomes the turn id
    UserSend { message_id: String, text: String },
    /// Visitor without a session submits text
    GuestSend { message_id: String, text: String },
    /// User starts a new conversation
    Reset,

    // Identity events
    IdentityResolved {
        turn_id: String,
        conversation_id: ConversationIdentity,
        /// True when the identity was just created and is not yet bound
        fresh: bool,
    },
    IdentityFailed {
        turn_id: String,
        error: BackendError,
    },

    // Completion events
    CompletionReceived {
        turn_id: String,
        response: CompletionResponse,
    },
    CompletionFailed {
        turn_id: String,
        error: BackendError,
    },

    // Push channel events
    PushReply { event: PushEvent },
    /// A push listener ended; `listener` tells it apart from its successors
    PushFailed {
        conversation_id: ConversationIdentity,
        listener: u64,
    },

    /// Failed turn has been reported; return to Idle
    Recovered { turn_id: String },
}

impl Event {
    pub fn guest_send(text: impl Into<String>) -> Self {
        Event::GuestSend {
            message_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::UserSend { .. } => "user_send",
            Event::GuestSend { .. } => "guest_send",
            Event::Reset => "reset",
            Event::IdentityResolved { .. } => "identity_resolved",
            Event::IdentityFailed { .. } => "identity_failed",
            Event::CompletionReceived { .. } => "completion_received",
            Event::CompletionFailed { .. } => "completion_failed",
            Event::PushReply { .. } => "push_reply",
            Event::PushFailed { .. } => "push_failed",
            Event::Recovered { .. } => "recovered",
        }
    }
}
