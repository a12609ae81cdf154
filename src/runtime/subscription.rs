//! Push listener lifetime
//!
//! A listener lives exactly as long as its guard. Dropping the guard aborts
//! the task, which drops the underlying stream and releases the remote
//! subscription.

use super::traits::{PushChannel, PushStream};
use crate::backend::BackendError;
use crate::identity::ConversationIdentity;
use crate::state_machine::Event;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scoped ownership of one push listener
pub struct SubscriptionGuard {
    id: u64,
    conversation_id: ConversationIdentity,
    access_token: Option<String>,
    task: JoinHandle<()>,
}

impl SubscriptionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationIdentity {
        &self.conversation_id
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// False once the listener has ended, even if its failure is still queued
    pub fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start listener `id` for replies on `conversation_id`
///
/// Matching replies are fed back as `PushReply`; a failed subscribe, a
/// transport error or the end of the stream is reported once as `PushFailed`.
pub fn listen<S>(
    channel: Arc<S>,
    conversation_id: ConversationIdentity,
    access_token: Option<String>,
    id: u64,
    event_tx: mpsc::Sender<Event>,
) -> SubscriptionGuard
where
    S: PushChannel + ?Sized + 'static,
{
    let listener_conversation = conversation_id.clone();
    let token = access_token.clone();
    let task = tokio::spawn(async move {
        let message = match channel.subscribe(&listener_conversation, token.as_deref()).await {
            Ok(stream) => forward(stream, &listener_conversation, &event_tx).await,
            Err(e) => e.message,
        };
        tracing::warn!(
            conversation_id = %listener_conversation,
            listener = id,
            error = %message,
            "Push subscription ended"
        );
        let _ = event_tx
            .send(Event::PushFailed {
                conversation_id: listener_conversation,
                listener: id,
            })
            .await;
    });

    SubscriptionGuard {
        id,
        conversation_id,
        access_token,
        task,
    }
}

/// Forward matching events until the stream fails or ends
async fn forward(
    mut stream: PushStream,
    conversation_id: &ConversationIdentity,
    event_tx: &mpsc::Sender<Event>,
) -> String {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) if event.conversation_id == conversation_id.as_str() => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    correlation_id = ?event.correlation_id,
                    "Push reply received"
                );
                if event_tx.send(Event::PushReply { event }).await.is_err() {
                    return "session runtime stopped".to_string();
                }
            }
            Ok(event) => {
                tracing::trace!(
                    other = %event.conversation_id,
                    "Ignoring push event for another conversation"
                );
            }
            Err(e) => return e.message,
        }
    }
    "push stream closed".to_string()
}

/// Push channel for deployments without a push endpoint
///
/// Subscriptions never yield and never fail.
pub struct DisabledPush;

#[async_trait]
impl PushChannel for DisabledPush {
    async fn subscribe(
        &self,
        _conversation_id: &ConversationIdentity,
        _access_token: Option<&str>,
    ) -> Result<PushStream, BackendError> {
        Ok(futures::stream::pending().boxed())
    }
}
