//! Session runtime executor

use super::subscription::{self, SubscriptionGuard};
use super::traits::{CompletionProvider, ConversationCreator, PushChannel};
use super::{Command, SessionHandle, SessionUpdate, SessionView};

use crate::backend::{CompletionRequest, ContentBlock};
use crate::identity::{IdentityResolver, Resolution};
use crate::session::{Message, Session};
use crate::state_machine::{transition, ChatContext, ChatState, Effect, Event, TransitionError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Quiet period after which a session nobody watches is stopped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Generic session runtime that can work with any creator, completion and push implementations
pub struct SessionRuntime<C, P, S>
where
    C: ConversationCreator + 'static,
    P: CompletionProvider + 'static,
    S: PushChannel + 'static,
{
    context: ChatContext,
    state: ChatState,
    session: Session,
    resolver: IdentityResolver<C>,
    completions: Arc<P>,
    push: Arc<S>,
    /// Push listener for the bound conversation, until it reports failure
    subscription: Option<SubscriptionGuard>,
    next_listener: u64,
    /// Bearer token of the latest send
    access_token: Option<String>,
    idle_timeout: Duration,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    view_tx: watch::Sender<SessionView>,
    shutdown: CancellationToken,
}

impl<C, P, S> SessionRuntime<C, P, S>
where
    C: ConversationCreator + 'static,
    P: CompletionProvider + 'static,
    S: PushChannel + 'static,
{
    /// Build a runtime and the handle that drives it; call `run` to start it
    pub fn new(context: ChatContext, creator: C, completions: P, push: S) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let session = Session::new();
        let initial_view = SessionView::capture(&context.session_id, &ChatState::Idle, &session);
        let (view_tx, view_rx) = watch::channel(initial_view);
        let shutdown = CancellationToken::new();

        let handle = SessionHandle {
            session_id: context.session_id.clone(),
            command_tx,
            broadcast_tx: broadcast_tx.clone(),
            view_rx,
            shutdown: shutdown.clone(),
        };

        let runtime = Self {
            context,
            state: ChatState::Idle,
            session,
            resolver: IdentityResolver::new(creator),
            completions: Arc::new(completions),
            push: Arc::new(push),
            subscription: None,
            next_listener: 0,
            access_token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            command_rx,
            event_rx,
            event_tx,
            broadcast_tx,
            view_tx,
            shutdown,
        };
        (runtime, handle)
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.context.session_id,
            primary_channel = %self.context.primary_channel,
            "Starting session runtime"
        );

        // Process events in a loop - no recursion
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                command = self.command_rx.recv() => {
                    let Some(Command { event, access_token, ack }) = command else {
                        break;
                    };
                    // A send brings its own token; a rejected one leaves the turn in flight alone
                    let previous = if matches!(event, Event::UserSend { .. }) {
                        Some(std::mem::replace(&mut self.access_token, access_token))
                    } else {
                        None
                    };
                    let result = self.process_event(event);
                    if let (Err(_), Some(previous)) = (&result, previous) {
                        self.access_token = previous;
                    }
                    let _ = ack.send(result);
                }

                Some(event) = self.event_rx.recv() => {
                    if !self.is_current(&event) {
                        continue;
                    }
                    // Stale deliveries are expected and already logged
                    let _ = self.process_event(event);
                }

                // Restarted by every command and event
                () = tokio::time::sleep(self.idle_timeout) => {
                    if self.is_evictable() {
                        tracing::info!(
                            session_id = %self.context.session_id,
                            idle_secs = self.idle_timeout.as_secs(),
                            "Evicting idle session"
                        );
                        break;
                    }
                }
            }
        }

        // Release the push listener before the runtime goes away
        self.subscription = None;
        self.shutdown.cancel();
        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    /// No view is connected and no turn is in flight
    fn is_evictable(&self) -> bool {
        self.broadcast_tx.receiver_count() == 0 && self.state.is_idle()
    }

    /// Failures of listeners that were already replaced or released are dropped
    fn is_current(&self, event: &Event) -> bool {
        let Event::PushFailed { listener, .. } = event else {
            return true;
        };
        let current = self.subscription.as_ref().map(SubscriptionGuard::id);
        if current != Some(*listener) {
            tracing::debug!(
                session_id = %self.context.session_id,
                listener,
                "Ignoring failure of a released push listener"
            );
            return false;
        }
        true
    }

    /// Run one event and every event its effects generate
    ///
    /// Only the outcome of the triggering event is returned; rejections of
    /// chained events are logged.
    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let mut events_to_process = vec![event];
        let mut triggering = true;

        while let Some(current_event) = events_to_process.pop() {
            let event_name = current_event.name();

            // Pure state transition
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(
                        session_id = %self.context.session_id,
                        event = event_name,
                        state = self.state.name(),
                        turn_id = ?self.state.turn_id(),
                        error = %e,
                        "Event rejected"
                    );
                    if triggering {
                        return Err(e);
                    }
                    continue;
                }
            };
            triggering = false;

            let old_state = std::mem::replace(&mut self.state, result.new_state);

            // Execute effects and collect generated events
            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect) {
                    events_to_process.push(generated_event);
                }
            }

            if old_state != self.state {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    from = old_state.name(),
                    to = self.state.name(),
                    event = event_name,
                    "State changed"
                );
                let _ = self.broadcast_tx.send(SessionUpdate::StateChange {
                    state: self.state.clone(),
                    waiting: self.session.is_waiting(),
                });
            }
            self.publish_view();
        }

        Ok(())
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(SessionView::capture(
            &self.context.session_id,
            &self.state,
            &self.session,
        ));
    }

    fn append(&mut self, message: Message) {
        let view = self.session.view_of(&message);
        self.session.append(message);
        // Delivery status of the answered message changes with this append
        let answered = view
            .message
            .reply_to()
            .and_then(|id| self.session.messages().iter().find(|m| m.id() == id))
            .map(|m| self.session.view_of(m));

        let _ = self.broadcast_tx.send(SessionUpdate::Message { message: view });
        if let Some(answered) = answered {
            let _ = self.broadcast_tx.send(SessionUpdate::Message { message: answered });
        }
    }

    /// Execute an effect and optionally return a generated event
    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AppendUser { message_id, text } => {
                self.append(Message::user(message_id, text));
                None
            }

            Effect::AppendReply { reply_to, text } => {
                self.append(Message::assistant(text, Some(reply_to)));
                None
            }

            Effect::AppendFailure { reply_to, text } => {
                self.append(Message::failure(text, Some(reply_to)));
                None
            }

            Effect::SetWaiting(waiting) => {
                self.session.set_waiting(waiting);
                None
            }

            Effect::ResolveIdentity { turn_id } => match self
                .resolver
                .prepare(&self.session, self.access_token.as_deref())
            {
                Resolution::Ready(conversation_id) => Some(Event::IdentityResolved {
                    turn_id,
                    conversation_id,
                    fresh: false,
                }),
                Resolution::Pending(creation) => {
                    let event_tx = self.event_tx.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        tracing::debug!(turn_id = %turn_id, "Creating conversation (background)");
                        let event = tokio::select! {
                            biased;
                            () = shutdown.cancelled() => return,
                            result = creation => match result {
                                Ok(conversation_id) => Event::IdentityResolved {
                                    turn_id,
                                    conversation_id,
                                    fresh: true,
                                },
                                Err(error) => Event::IdentityFailed { turn_id, error },
                            },
                        };
                        let _ = event_tx.send(event).await;
                    });
                    None
                }
            },

            Effect::BindIdentity { conversation_id } => {
                if !self.session.bind_identity(conversation_id.clone()) {
                    tracing::warn!(
                        session_id = %self.context.session_id,
                        conversation_id = %conversation_id,
                        "Session already has a conversation identity"
                    );
                }
                None
            }

            Effect::Subscribe { conversation_id } => {
                let access_token = self.access_token.as_deref();
                let reusable = self.subscription.as_ref().is_some_and(|guard| {
                    guard.is_live()
                        && *guard.conversation_id() == conversation_id
                        && guard.access_token() == access_token
                });
                if reusable {
                    return None;
                }

                self.next_listener += 1;
                tracing::debug!(
                    conversation_id = %conversation_id,
                    listener = self.next_listener,
                    replaces = ?self.subscription.as_ref().map(SubscriptionGuard::id),
                    "Subscribing to push replies"
                );
                // Replacing the guard releases any previous listener
                self.subscription = Some(subscription::listen(
                    Arc::clone(&self.push),
                    conversation_id,
                    self.access_token.clone(),
                    self.next_listener,
                    self.event_tx.clone(),
                ));
                None
            }

            Effect::Unsubscribe => {
                if let Some(guard) = self.subscription.take() {
                    tracing::debug!(
                        conversation_id = %guard.conversation_id(),
                        listener = guard.id(),
                        "Releasing push subscription"
                    );
                }
                None
            }

            Effect::RequestCompletion {
                turn_id,
                conversation_id,
                text,
            } => {
                let request = CompletionRequest {
                    conversation_id,
                    content: vec![ContentBlock::text(text)],
                    history: self.session.history_before(&turn_id),
                };
                let completions = Arc::clone(&self.completions);
                let access_token = self.access_token.clone();
                let event_tx = self.event_tx.clone();
                let shutdown = self.shutdown.clone();

                tokio::spawn(async move {
                    tracing::info!(turn_id = %turn_id, "Requesting completion (background)");
                    let completion = completions.complete(&request, access_token.as_deref());
                    let event = tokio::select! {
                        biased;
                        () = shutdown.cancelled() => return,
                        result = completion => match result {
                            Ok(response) => Event::CompletionReceived { turn_id, response },
                            Err(error) => Event::CompletionFailed { turn_id, error },
                        },
                    };
                    let _ = event_tx.send(event).await;
                });

                // The event will come from the spawned task
                None
            }

            // Recovery is immediate once the failure message is in the log
            Effect::ScheduleRecovery { turn_id } => Some(Event::Recovered { turn_id }),

            Effect::ClearSession => {
                self.session.reset();
                let _ = self.broadcast_tx.send(SessionUpdate::Cleared);
                None
            }

            Effect::NotifyTurnComplete { turn_id } => {
                let _ = self.broadcast_tx.send(SessionUpdate::TurnComplete { turn_id });
                None
            }
        }
    }
}
