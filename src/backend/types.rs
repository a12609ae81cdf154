//! Wire-level types shared by the collaborator interfaces

use crate::identity::ConversationIdentity;
use crate::session::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Content block sent to or received from the conversation route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            text: Some(s.into()),
        }
    }
}

/// A prior exchange included with a completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Completion request for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub conversation_id: ConversationIdentity,
    /// Content of the message being sent this turn
    pub content: Vec<ContentBlock>,
    /// Earlier exchanges of the session, oldest first
    pub history: Vec<HistoryEntry>,
}

impl CompletionRequest {
    /// Text of the outgoing message
    pub fn prompt(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Completion response: zero or more text blocks
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl CompletionResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Concatenated text of all text blocks, trimmed
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string()
    }
}

/// Push event carrying an assistant reply generated out of band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub conversation_id: String,
    /// Id of the user message this reply answers
    #[serde(default, alias = "associatedUserMessageId")]
    pub correlation_id: Option<String>,
    pub text: String,
}

/// Profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub attributes: HashMap<String, String>,
}

impl UserProfile {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn display_name(&self) -> &str {
        self.attribute("given_name")
            .or_else(|| self.attribute("email"))
            .unwrap_or(&self.username)
    }
}
