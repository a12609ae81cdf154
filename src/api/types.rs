//! API request and response types

use crate::prompts::QuickMessage;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub text: String,
}

/// Response for a send; guests get no message id back
#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuickMessagesResponse {
    pub messages: Vec<QuickMessage>,
}

/// Response for a recipe listing
#[derive(Debug, Serialize)]
pub struct RecipeListResponse {
    pub recipes: Vec<crate::recipe::Recipe>,
}

/// Signed-in profile plus the name the chat greets the user with
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: crate::backend::UserProfile,
    pub display_name: String,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
