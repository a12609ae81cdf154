//! Pure state transition function
//!
//! Turn lifecycle: Idle -> Sending -> AwaitingReply -> Idle, with failures
//! routed through Failed. Every reply-carrying event names its turn; events
//! for any turn other than the one in flight are stale and dropped.

use super::{ChatContext, ChatState, Effect, Event, ReplyChannel};
use crate::backend::BackendError;
use crate::prompts::{failure_message, guest_welcome};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("A reply is still on its way (wait for it before sending again)")]
    Busy,
    #[error("Stale event: {0}")]
    Stale(String),
}

/// Pure transition function
///
/// Given the same inputs, always produces the same outputs, with no I/O.
pub fn transition(
    state: &ChatState,
    context: &ChatContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Session reset
        // ============================================================

        // Any state + Reset -> Idle; late replies for the old turn become stale
        (_, Event::Reset) => Ok(TransitionResult::new(ChatState::Idle)
            .with_effect(Effect::Unsubscribe)
            .with_effect(Effect::ClearSession)),

        // ============================================================
        // User input
        // ============================================================

        // Validation comes before the busy check
        (_, Event::UserSend { text, .. } | Event::GuestSend { text, .. })
            if text.trim().is_empty() =>
        {
            Err(TransitionError::EmptyInput)
        }

        // Idle + UserSend -> Sending
        (ChatState::Idle, Event::UserSend { message_id, text }) => {
            let text = text.trim().to_string();
            Ok(TransitionResult::new(ChatState::Sending {
                turn_id: message_id.clone(),
                text: text.clone(),
            })
            .with_effect(Effect::append_user(&message_id, text))
            .with_effect(Effect::SetWaiting(true))
            .with_effect(Effect::ResolveIdentity {
                turn_id: message_id,
            }))
        }

        // Idle + GuestSend -> Idle with the sign-up invitation, no remote call
        (ChatState::Idle, Event::GuestSend { message_id, text }) => {
            let text = text.trim();
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::append_user(&message_id, text))
                .with_effect(Effect::append_reply(&message_id, guest_welcome(text))))
        }

        // Turn in flight + any send -> reject
        (_, Event::UserSend { .. } | Event::GuestSend { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Identity resolution
        // ============================================================

        // Sending + IdentityResolved -> AwaitingReply
        (
            ChatState::Sending { turn_id, text },
            Event::IdentityResolved {
                turn_id: resolved,
                conversation_id,
                fresh,
            },
        ) if *turn_id == resolved => {
            let mut result = TransitionResult::new(ChatState::AwaitingReply {
                turn_id: turn_id.clone(),
                conversation_id: conversation_id.clone(),
            });
            if fresh {
                result = result.with_effect(Effect::BindIdentity {
                    conversation_id: conversation_id.clone(),
                });
            }
            // The runtime keeps a live listener and replaces a dead one
            Ok(result
                .with_effect(Effect::Subscribe {
                    conversation_id: conversation_id.clone(),
                })
                .with_effect(Effect::RequestCompletion {
                    turn_id: turn_id.clone(),
                    conversation_id,
                    text: text.clone(),
                }))
        }

        // Sending + IdentityFailed -> Failed
        (ChatState::Sending { turn_id, .. }, Event::IdentityFailed { turn_id: failed, error })
            if *turn_id == failed =>
        {
            Ok(fail_turn(turn_id, &error))
        }

        // ============================================================
        // Direct replies
        // ============================================================

        (
            ChatState::AwaitingReply { turn_id, .. },
            Event::CompletionReceived {
                turn_id: answered,
                response,
            },
        ) if *turn_id == answered => {
            let text = response.text();
            if !text.is_empty() {
                return Ok(complete_turn(turn_id, text));
            }
            match context.primary_channel {
                // Acknowledgement only; the reply arrives by push
                ReplyChannel::Push => Ok(TransitionResult::new(state.clone())),
                ReplyChannel::Direct => Ok(fail_turn(
                    turn_id,
                    &BackendError::empty_response("Completion contained no text"),
                )),
            }
        }

        (
            ChatState::AwaitingReply { turn_id, .. },
            Event::CompletionFailed {
                turn_id: failed,
                error,
            },
        ) if *turn_id == failed => Ok(fail_turn(turn_id, &error)),

        // ============================================================
        // Push replies
        // ============================================================

        (
            ChatState::AwaitingReply {
                turn_id,
                conversation_id,
            },
            Event::PushReply { event },
        ) => {
            if event.conversation_id != conversation_id.as_str() {
                return Err(TransitionError::Stale(format!(
                    "push reply for foreign conversation {}",
                    event.conversation_id
                )));
            }
            if let Some(correlation_id) = &event.correlation_id {
                if correlation_id != turn_id {
                    return Err(TransitionError::Stale(format!(
                        "push reply for settled turn {correlation_id}"
                    )));
                }
            }
            let text = event.text.trim();
            if text.is_empty() {
                return Err(TransitionError::Stale("push reply without text".to_string()));
            }
            Ok(complete_turn(turn_id, text.to_string()))
        }

        // Push transport failure while the push channel owns the reply -> Idle
        (
            ChatState::AwaitingReply {
                turn_id,
                conversation_id,
            },
            Event::PushFailed {
                conversation_id: failed,
                ..
            },
        ) if context.primary_channel == ReplyChannel::Push && *conversation_id == failed => {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::Unsubscribe)
                .with_effect(Effect::SetWaiting(false))
                .with_effect(Effect::turn_complete(turn_id)))
        }

        // Otherwise only the dead listener goes; the next turn subscribes again
        (_, Event::PushFailed { .. }) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::Unsubscribe))
        }

        // ============================================================
        // Recovery
        // ============================================================

        (ChatState::Failed { turn_id, .. }, Event::Recovered { turn_id: recovered })
            if *turn_id == recovered =>
        {
            Ok(TransitionResult::new(ChatState::Idle)
                .with_effect(Effect::SetWaiting(false))
                .with_effect(Effect::turn_complete(turn_id)))
        }

        // ============================================================
        // Stale deliveries
        // ============================================================
        (state, event) => Err(TransitionError::Stale(format!(
            "{} has no effect in {} state",
            event.name(),
            state.name()
        ))),
    }
}

/// Append the reply and return to Idle
fn complete_turn(turn_id: &str, text: String) -> TransitionResult {
    TransitionResult::new(ChatState::Idle)
        .with_effect(Effect::append_reply(turn_id, text))
        .with_effect(Effect::SetWaiting(false))
        .with_effect(Effect::turn_complete(turn_id))
}

/// Append one explanatory message and pass through Failed
fn fail_turn(turn_id: &str, error: &BackendError) -> TransitionResult {
    TransitionResult::new(ChatState::Failed {
        turn_id: turn_id.to_string(),
        reason: error.message.clone(),
    })
    .with_effects([
        Effect::append_failure(turn_id, failure_message(error.kind)),
        Effect::ScheduleRecovery {
            turn_id: turn_id.to_string(),
        },
    ])
}
