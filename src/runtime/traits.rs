//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::backend::{BackendError, CompletionRequest, CompletionResponse, PushEvent};
use crate::identity::ConversationIdentity;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of push events for one conversation
pub type PushStream = BoxStream<'static, Result<PushEvent, BackendError>>;

// Every call carries the bearer token of the request that caused it, so a
// session follows sign-in and token refresh. `None` means the api key.

/// Creates remote conversations
#[async_trait]
pub trait ConversationCreator: Send + Sync {
    /// Create a conversation and return its identity
    async fn create(
        &self,
        access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError>;
}

/// Produces the assistant reply for one turn
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError>;
}

/// Out-of-band reply delivery
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a subscription for replies addressed to `conversation_id`
    ///
    /// The stream may also carry events for other conversations; callers
    /// filter. Dropping the stream releases the subscription.
    async fn subscribe(
        &self,
        conversation_id: &ConversationIdentity,
        access_token: Option<&str>,
    ) -> Result<PushStream, BackendError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationCreator + ?Sized> ConversationCreator for Arc<T> {
    async fn create(
        &self,
        access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError> {
        (**self).create(access_token).await
    }
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        (**self).complete(request, access_token).await
    }
}

#[async_trait]
impl<T: PushChannel + ?Sized> PushChannel for Arc<T> {
    async fn subscribe(
        &self,
        conversation_id: &ConversationIdentity,
        access_token: Option<&str>,
    ) -> Result<PushStream, BackendError> {
        (**self).subscribe(conversation_id, access_token).await
    }
}

// ============================================================================
// Logging wrappers
// ============================================================================

/// Logging wrapper for completion providers
pub struct LoggingCompletions {
    inner: Arc<dyn CompletionProvider>,
    route: &'static str,
}

impl LoggingCompletions {
    pub fn new(inner: Arc<dyn CompletionProvider>, route: &'static str) -> Self {
        Self { inner, route }
    }
}

#[async_trait]
impl CompletionProvider for LoggingCompletions {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request, access_token).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    route = self.route,
                    conversation_id = %request.conversation_id,
                    signed_in = access_token.is_some(),
                    duration_ms = %duration.as_millis(),
                    history_len = request.history.len(),
                    reply_len = response.text().len(),
                    "Completion request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    route = self.route,
                    conversation_id = %request.conversation_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "Completion request failed"
                );
            }
        }

        result
    }
}

/// Logging wrapper for conversation creation
pub struct LoggingCreator {
    inner: Arc<dyn ConversationCreator>,
}

impl LoggingCreator {
    pub fn new(inner: Arc<dyn ConversationCreator>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ConversationCreator for LoggingCreator {
    async fn create(
        &self,
        access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError> {
        let result = self.inner.create(access_token).await;
        match &result {
            Ok(identity) => tracing::info!(
                conversation_id = %identity,
                signed_in = access_token.is_some(),
                "Conversation created"
            ),
            Err(e) => tracing::error!(
                error = %e.message,
                kind = ?e.kind,
                "Conversation creation failed"
            ),
        }
        result
    }
}
