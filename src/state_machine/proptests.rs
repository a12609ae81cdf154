//! Property-based tests for the state machine
//!
//! Random event sequences are driven through the transition function and
//! the effects are applied to a real `Session`, so the invariants are checked
//! against the same store the runtime uses.

use super::*;
use crate::backend::{BackendError, CompletionResponse, PushEvent};
use crate::identity::ConversationIdentity;
use crate::session::{Message, Role, Session};
use proptest::prelude::*;
use std::collections::HashMap;

// ============================================================================
// Test Helpers
// ============================================================================

fn arb_channel() -> impl Strategy<Value = ReplyChannel> {
    prop_oneof![Just(ReplyChannel::Direct), Just(ReplyChannel::Push)]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[a-zA-Z ]{1,30}",
        1 => "[ \t\n]{0,4}",
    ]
}

fn arb_error() -> impl Strategy<Value = BackendError> {
    prop_oneof![
        Just(BackendError::network("offline")),
        Just(BackendError::access_denied("denied")),
        Just(BackendError::validation("bad input")),
        Just(BackendError::server("500")),
    ]
}

/// Abstract step; turn ids are filled in from the current state so that
/// both matching and stale deliveries are generated.
#[derive(Debug, Clone)]
enum Step {
    Send(String),
    Guest(String),
    Reset,
    Resolve { stale: bool },
    ResolveFail { stale: bool, error: BackendError },
    Complete { stale: bool, text: String },
    CompleteFail { stale: bool, error: BackendError },
    Push { stale: bool, correlated: bool, text: String },
    PushFail,
    Recover { stale: bool },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => arb_text().prop_map(Step::Send),
        1 => arb_text().prop_map(Step::Guest),
        1 => Just(Step::Reset),
        3 => any::<bool>().prop_map(|stale| Step::Resolve { stale }),
        1 => (any::<bool>(), arb_error())
            .prop_map(|(stale, error)| Step::ResolveFail { stale, error }),
        3 => (any::<bool>(), "[a-z ]{0,20}")
            .prop_map(|(stale, text)| Step::Complete { stale, text }),
        1 => (any::<bool>(), arb_error())
            .prop_map(|(stale, error)| Step::CompleteFail { stale, error }),
        2 => (any::<bool>(), any::<bool>(), "[a-z ]{0,20}")
            .prop_map(|(stale, correlated, text)| Step::Push { stale, correlated, text }),
        1 => Just(Step::PushFail),
        2 => any::<bool>().prop_map(|stale| Step::Recover { stale }),
    ]
}

fn send(text: impl Into<String>) -> Event {
    Event::UserSend {
        message_id: uuid::Uuid::new_v4().to_string(),
        text: text.into(),
    }
}

fn turn_for(state: &ChatState, stale: bool) -> String {
    match state.turn_id() {
        Some(turn_id) if !stale => turn_id.to_string(),
        _ => "old-turn".to_string(),
    }
}

fn to_event(state: &ChatState, step: Step, counter: &mut u32) -> Event {
    *counter += 1;
    match step {
        Step::Send(text) => Event::UserSend {
            message_id: format!("m{counter}"),
            text,
        },
        Step::Guest(text) => Event::GuestSend {
            message_id: format!("g{counter}"),
            text,
        },
        Step::Reset => Event::Reset,
        Step::Resolve { stale } => Event::IdentityResolved {
            turn_id: turn_for(state, stale),
            conversation_id: ConversationIdentity::new("conv-1"),
            fresh: true,
        },
        Step::ResolveFail { stale, error } => Event::IdentityFailed {
            turn_id: turn_for(state, stale),
            error,
        },
        Step::Complete { stale, text } => Event::CompletionReceived {
            turn_id: turn_for(state, stale),
            response: CompletionResponse::from_text(text),
        },
        Step::CompleteFail { stale, error } => Event::CompletionFailed {
            turn_id: turn_for(state, stale),
            error,
        },
        Step::Push {
            stale,
            correlated,
            text,
        } => Event::PushReply {
            event: PushEvent {
                conversation_id: "conv-1".to_string(),
                correlation_id: correlated.then(|| turn_for(state, stale)),
                text,
            },
        },
        Step::PushFail => Event::PushFailed {
            conversation_id: ConversationIdentity::new("conv-1"),
            listener: u64::from(*counter),
        },
        Step::Recover { stale } => Event::Recovered {
            turn_id: turn_for(state, stale),
        },
    }
}

/// Apply the session-facing effects the way the runtime does
fn apply(session: &mut Session, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::AppendUser { message_id, text } => {
                session.append(Message::user(message_id.clone(), text.clone()));
            }
            Effect::AppendReply { reply_to, text } => {
                session.append(Message::assistant(text.clone(), Some(reply_to.clone())));
            }
            Effect::AppendFailure { reply_to, text } => {
                session.append(Message::failure(text.clone(), Some(reply_to.clone())));
            }
            Effect::SetWaiting(waiting) => session.set_waiting(*waiting),
            Effect::BindIdentity { conversation_id } => {
                session.bind_identity(conversation_id.clone());
            }
            Effect::ClearSession => session.reset(),
            _ => {}
        }
    }
}

/// Recovery is chained immediately by the runtime
fn drive(
    state: ChatState,
    context: &ChatContext,
    session: &mut Session,
    event: Event,
) -> Result<ChatState, TransitionError> {
    let result = transition(&state, context, event)?;
    apply(session, &result.effects);
    let mut new_state = result.new_state;
    for effect in &result.effects {
        if let Effect::ScheduleRecovery { turn_id } = effect {
            let recovered = transition(
                &new_state,
                context,
                Event::Recovered {
                    turn_id: turn_id.clone(),
                },
            )?;
            apply(session, &recovered.effects);
            new_state = recovered.new_state;
        }
    }
    Ok(new_state)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Invariant 1: the waiting flag is set exactly while a turn is in flight
    #[test]
    fn prop_waiting_tracks_turn(
        channel in arb_channel(),
        steps in proptest::collection::vec(arb_step(), 0..30)
    ) {
        let context = ChatContext::new("s", channel);
        let mut session = Session::new();
        let mut state = ChatState::Idle;
        let mut counter = 0;

        for step in steps {
            let event = to_event(&state, step, &mut counter);
            if let Ok(next) = drive(state.clone(), &context, &mut session, event) {
                state = next;
            }
            prop_assert_eq!(session.is_waiting(), !state.is_idle(), "state {:?}", state);
        }
    }

    // Invariant 2: every user turn receives at most one assistant message
    #[test]
    fn prop_at_most_one_reply_per_turn(
        channel in arb_channel(),
        steps in proptest::collection::vec(arb_step(), 0..30)
    ) {
        let context = ChatContext::new("s", channel);
        let mut session = Session::new();
        let mut state = ChatState::Idle;
        let mut counter = 0;

        for step in steps {
            let event = to_event(&state, step, &mut counter);
            if let Ok(next) = drive(state.clone(), &context, &mut session, event) {
                state = next;
            }
        }

        let mut replies: HashMap<&str, usize> = HashMap::new();
        for message in session.messages() {
            if let Some(reply_to) = message.reply_to() {
                *replies.entry(reply_to).or_default() += 1;
            }
        }
        for (turn, count) in replies {
            prop_assert!(count <= 1, "turn {} answered {} times", turn, count);
        }
    }

    // Invariant 3: replies always follow the message they answer
    #[test]
    fn prop_reply_follows_its_turn(
        channel in arb_channel(),
        steps in proptest::collection::vec(arb_step(), 0..30)
    ) {
        let context = ChatContext::new("s", channel);
        let mut session = Session::new();
        let mut state = ChatState::Idle;
        let mut counter = 0;

        for step in steps {
            let event = to_event(&state, step, &mut counter);
            if let Ok(next) = drive(state.clone(), &context, &mut session, event) {
                state = next;
            }
        }

        let messages = session.messages();
        for (index, message) in messages.iter().enumerate() {
            if let Some(reply_to) = message.reply_to() {
                let position = messages.iter().position(|m| m.id() == reply_to);
                prop_assert!(matches!(position, Some(p) if p < index));
            }
        }
    }

    // Invariant 4: whitespace-only input never changes anything
    #[test]
    fn prop_blank_input_is_noop(text in "[ \t\n]{0,6}", channel in arb_channel()) {
        let context = ChatContext::new("s", channel);
        let result = transition(&ChatState::Idle, &context, send(text));
        prop_assert_eq!(result.unwrap_err(), TransitionError::EmptyInput);
    }

    // Invariant 5: accepted sends append exactly one user message
    #[test]
    fn prop_send_appends_one_user_message(text in "[a-zA-Z]{1,20}") {
        let context = ChatContext::new("s", ReplyChannel::Direct);
        let mut session = Session::new();
        drive(ChatState::Idle, &context, &mut session, send(text.clone())).unwrap();

        prop_assert_eq!(session.messages().len(), 1);
        prop_assert_eq!(session.messages()[0].role(), Role::User);
        prop_assert_eq!(session.messages()[0].content(), text.as_str());
    }

    // Invariant 6: reset from any state lands in Idle
    #[test]
    fn prop_reset_always_idle(
        steps in proptest::collection::vec(arb_step(), 0..15)
    ) {
        let context = ChatContext::new("s", ReplyChannel::Direct);
        let mut session = Session::new();
        let mut state = ChatState::Idle;
        let mut counter = 0;
        for step in steps {
            let event = to_event(&state, step, &mut counter);
            if let Ok(next) = drive(state.clone(), &context, &mut session, event) {
                state = next;
            }
        }

        let state = drive(state, &context, &mut session, Event::Reset).unwrap();
        prop_assert!(state.is_idle());
        prop_assert!(session.messages().is_empty());
        prop_assert!(session.identity().is_none());
        prop_assert!(!session.is_waiting());
    }
}
