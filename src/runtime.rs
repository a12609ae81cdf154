//! Runtime for executing chat sessions
//!
//! Each session gets one runtime task that owns the state, the message log
//! and the push listener. Views talk to it through a `SessionHandle`.

mod executor;
mod subscription;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{SessionRuntime, DEFAULT_IDLE_TIMEOUT};
pub use subscription::DisabledPush;
pub use traits::*;

use crate::identity::ConversationIdentity;
use crate::session::{MessageView, Session};
use crate::state_machine::{ChatContext, ChatState, Event, ReplyChannel, TransitionError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime =
    SessionRuntime<Arc<dyn ConversationCreator>, Arc<dyn CompletionProvider>, Arc<dyn PushChannel>>;

/// View-originated event awaiting its verdict
pub(crate) struct Command {
    pub event: Event,
    /// Caller's bearer token; a send rebinds the session to it
    pub access_token: Option<String>,
    pub ack: oneshot::Sender<Result<(), TransitionError>>,
}

/// Updates sent to connected views
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A message was appended, or its delivery status changed
    Message { message: MessageView },
    StateChange { state: ChatState, waiting: bool },
    TurnComplete { turn_id: String },
    Cleared,
}

impl SessionUpdate {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionUpdate::Message { .. } => "message",
            SessionUpdate::StateChange { .. } => "state_change",
            SessionUpdate::TurnComplete { .. } => "turn_complete",
            SessionUpdate::Cleared => "cleared",
        }
    }
}

/// Snapshot of a session as rendered by views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct SessionView {
    pub session_id: String,
    pub state: ChatState,
    pub waiting: bool,
    #[ts(optional)]
    pub conversation_id: Option<ConversationIdentity>,
    pub messages: Vec<MessageView>,
}

impl SessionView {
    pub fn capture(session_id: &str, state: &ChatState, session: &Session) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: state.clone(),
            waiting: session.is_waiting(),
            conversation_id: session.identity().cloned(),
            messages: session.views(),
        }
    }
}

/// Errors returned to views dispatching into a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Session has been closed")]
    Closed,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    view_rx: watch::Receiver<SessionView>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Submit a signed-in user's message; returns its id
    ///
    /// `access_token` is the bearer of this request. Remote calls for the
    /// turn, and the push listener it opens, use it.
    pub async fn send(
        &self,
        text: impl Into<String>,
        access_token: Option<&str>,
    ) -> Result<String, DispatchError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let event = Event::UserSend {
            message_id: message_id.clone(),
            text: text.into(),
        };
        self.submit(event, access_token.map(str::to_string)).await?;
        Ok(message_id)
    }

    /// Submit a message from a visitor without a session
    pub async fn send_as_guest(&self, text: impl Into<String>) -> Result<(), DispatchError> {
        self.submit(Event::guest_send(text), None).await
    }

    /// Start a new conversation
    pub async fn reset(&self) -> Result<(), DispatchError> {
        self.submit(Event::Reset, None).await
    }

    /// Deliver a view event and wait until the runtime has applied it
    async fn submit(
        &self,
        event: Event,
        access_token: Option<String>,
    ) -> Result<(), DispatchError> {
        let (ack, verdict) = oneshot::channel();
        self.command_tx
            .send(Command {
                event,
                access_token,
                ack,
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        verdict.await.map_err(|_| DispatchError::Closed)??;
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.broadcast_tx.subscribe()
    }

    /// Stop the runtime and release its push listener
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// True once the runtime stopped, whether closed or evicted as idle
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Collaborators shared by every session
///
/// They hold no credentials; each call carries the caller's token.
#[derive(Clone)]
pub struct Collaborators {
    pub creator: Arc<dyn ConversationCreator>,
    pub completions: Arc<dyn CompletionProvider>,
    pub push: Arc<dyn PushChannel>,
}

/// Manager for all session runtimes
pub struct RuntimeManager {
    collaborators: Collaborators,
    primary_channel: ReplyChannel,
    idle_timeout: Duration,
    runtimes: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl RuntimeManager {
    pub fn new(
        collaborators: Collaborators,
        primary_channel: ReplyChannel,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            primary_channel,
            idle_timeout,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a new session runtime
    ///
    /// The entry is forgotten once the runtime stops, so sessions evicted
    /// for idleness disappear from the map on their own.
    pub async fn create(&self) -> SessionHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        let context = ChatContext::new(&session_id, self.primary_channel);
        let Collaborators {
            creator,
            completions,
            push,
        } = self.collaborators.clone();

        let (runtime, handle): (ProductionRuntime, _) =
            SessionRuntime::new(context, creator, completions, push);
        let runtime = runtime.with_idle_timeout(self.idle_timeout);

        // Hold the lock across the spawn so the cleanup below runs after the insert
        let mut runtimes = self.runtimes.write().await;
        let registry = Arc::clone(&self.runtimes);
        let id = session_id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            registry.write().await.remove(&id);
            tracing::info!(session_id = %id, "Session runtime finished");
        });
        runtimes.insert(session_id, handle.clone());
        handle
    }

    /// Handle of a running session; stopped ones are not returned
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.runtimes
            .read()
            .await
            .get(session_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Stop and forget a session. Returns false if it was unknown.
    pub async fn remove(&self, session_id: &str) -> bool {
        match self.runtimes.write().await.remove(session_id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Number of sessions with a running runtime
    pub async fn len(&self) -> usize {
        self.runtimes.read().await.len()
    }
}
