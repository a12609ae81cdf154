//! User-facing copy produced by the session core

use crate::backend::BackendErrorKind;
use serde::Serialize;

/// Suggested starter prompt
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuickMessage {
    pub title: &'static str,
    pub description: &'static str,
}

pub const QUICK_MESSAGES: [QuickMessage; 6] = [
    QuickMessage {
        title: "Grandmother's Bread",
        description: "How do I make traditional sourdough bread?",
    },
    QuickMessage {
        title: "Hearty Stews",
        description: "What's a good recipe for winter stew?",
    },
    QuickMessage {
        title: "Preserving Harvest",
        description: "How to preserve vegetables for winter?",
    },
    QuickMessage {
        title: "Comfort Foods",
        description: "What are some warming comfort food recipes?",
    },
    QuickMessage {
        title: "Garden to Table",
        description: "How to cook with fresh garden vegetables?",
    },
    QuickMessage {
        title: "Family Traditions",
        description: "Help me recreate my family's traditional recipes",
    },
];

/// Reply shown to visitors who ask something before signing in
pub fn guest_welcome(question: &str) -> String {
    format!(
        "👋 **Welcome to Arcane Kitchen!**\n\n\
         You asked: \"{question}\"\n\n\
         To get personalized AI cooking assistance, please **sign up or log in**. \n\n\
         Once authenticated, you'll have access to:\n\
         • Real-time AI cooking advice from our mystical sous chef\n\
         • Personalized recipe suggestions based on your preferences\n\
         • Custom meal planning and ingredient substitutions\n\
         • Step-by-step cooking guidance\n\n\
         **Sign up now** to unlock the full magical kitchen experience! 🔮✨"
    )
}

/// Assistant-role explanation for a failed turn. Never includes raw error text.
pub fn failure_message(kind: BackendErrorKind) -> &'static str {
    match kind {
        BackendErrorKind::AccessDenied => {
            "I'm having trouble accessing my magical powers. The kitchen administrator \
             needs to grant me permission to use the mystical arts."
        }
        BackendErrorKind::Validation => {
            "There seems to be an issue with how I'm trying to cast this culinary spell. \
             Let me try a different approach."
        }
        BackendErrorKind::Unauthorized => {
            "Your session in the kitchen has faded. Please sign in again and resend your \
             question."
        }
        BackendErrorKind::EmptyResponse | BackendErrorKind::Malformed => {
            "I couldn't find the words in my cookbook just now. Please ask me again."
        }
        BackendErrorKind::Network | BackendErrorKind::Server | BackendErrorKind::Unknown => {
            "I apologize, but I'm having trouble connecting to my magical cookbook at the \
             moment. Please try again later."
        }
    }
}
