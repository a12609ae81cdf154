//! Session store

use super::{DeliveryStatus, Message, Role};
use crate::backend::HistoryEntry;
use crate::identity::ConversationIdentity;
use serde::Serialize;
use std::collections::HashMap;
use ts_rs::TS;

/// Ordered messages of one visible conversation thread
#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<Message>,
    /// Delivery status of user messages, keyed by message id
    deliveries: HashMap<String, DeliveryStatus>,
    waiting: bool,
    identity: Option<ConversationIdentity>,
}

/// A message together with its delivery status, as rendered by views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub status: Option<DeliveryStatus>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end of the log
    ///
    /// An assistant message answering a user message settles that message's
    /// delivery status.
    pub fn append(&mut self, message: Message) {
        match message.role() {
            Role::User => {
                self.deliveries
                    .insert(message.id().to_string(), DeliveryStatus::Pending);
            }
            Role::Assistant => {
                if let Some(reply_to) = message.reply_to() {
                    let status = if message.is_error() {
                        DeliveryStatus::Failed
                    } else {
                        DeliveryStatus::Confirmed
                    };
                    if let Some(entry) = self.deliveries.get_mut(reply_to) {
                        *entry = status;
                    }
                }
            }
        }
        self.messages.push(message);
    }

    /// Clear messages, waiting flag and identity in one step
    pub fn reset(&mut self) {
        self.messages.clear();
        self.deliveries.clear();
        self.waiting = false;
        self.identity = None;
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn delivery(&self, message_id: &str) -> Option<DeliveryStatus> {
        self.deliveries.get(message_id).copied()
    }

    pub fn identity(&self) -> Option<&ConversationIdentity> {
        self.identity.as_ref()
    }

    /// Bind the conversation identity. Returns false if one is already bound.
    pub fn bind_identity(&mut self, identity: ConversationIdentity) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity);
        true
    }

    /// Exchanges that precede `message_id`, without failure notices
    pub fn history_before(&self, message_id: &str) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .take_while(|m| m.id() != message_id)
            .filter(|m| !m.is_error())
            .map(|m| HistoryEntry {
                role: m.role(),
                content: m.content().to_string(),
            })
            .collect()
    }

    pub fn views(&self) -> Vec<MessageView> {
        self.messages.iter().map(|m| self.view_of(m)).collect()
    }

    pub fn view_of(&self, message: &Message) -> MessageView {
        MessageView {
            message: message.clone(),
            status: self.delivery(message.id()),
        }
    }
}
