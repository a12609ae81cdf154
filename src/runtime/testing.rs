//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::backend::{BackendError, CompletionRequest, CompletionResponse, PushEvent};
use crate::identity::ConversationIdentity;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Mock Conversation Creator
// ============================================================================

/// Mock creator that returns queued identities, then numbered ones
pub struct MockConversationCreator {
    results: Mutex<VecDeque<Result<ConversationIdentity, BackendError>>>,
    calls: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl MockConversationCreator {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_identity(&self, id: &str) {
        self.results
            .lock()
            .unwrap()
            .push_back(Ok(ConversationIdentity::new(id)));
    }

    pub fn queue_error(&self, error: BackendError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn create_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Token passed to each `create` call, in order
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

impl Default for MockConversationCreator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationCreator for MockConversationCreator {
    async fn create(
        &self,
        access_token: Option<&str>,
    ) -> Result<ConversationIdentity, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.tokens.lock().unwrap().push(access_token.map(str::to_string));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ConversationIdentity::new(format!("conv-{call}"))))
    }
}

// ============================================================================
// Mock Completion Provider
// ============================================================================

/// Mock completion provider that returns queued responses
pub struct MockCompletionProvider {
    responses: Mutex<VecDeque<Result<CompletionResponse, BackendError>>>,
    /// Record of all requests made, with the token each carried
    pub requests: Mutex<Vec<(CompletionRequest, Option<String>)>>,
}

impl MockCompletionProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful text reply
    pub fn queue_reply(&self, text: &str) {
        self.queue_response(CompletionResponse::from_text(text));
    }

    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: BackendError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        let requests = self.requests.lock().unwrap();
        requests.iter().map(|(request, _)| request.clone()).collect()
    }

    pub fn recorded_tokens(&self) -> Vec<Option<String>> {
        let requests = self.requests.lock().unwrap();
        requests.iter().map(|(_, token)| token.clone()).collect()
    }

    fn next(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), access_token.map(str::to_string)));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::network("No mock response queued")))
    }
}

impl Default for MockCompletionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        self.next(request, access_token)
    }
}

/// Mock completion provider with configurable delay
pub struct DelayedMockCompletionProvider {
    inner: MockCompletionProvider,
    delay: Duration,
    /// Notified when a request starts
    pub request_started: Arc<Notify>,
}

impl DelayedMockCompletionProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockCompletionProvider::new(),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_reply(&self, text: &str) {
        self.inner.queue_reply(text);
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl CompletionProvider for DelayedMockCompletionProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
        access_token: Option<&str>,
    ) -> Result<CompletionResponse, BackendError> {
        self.request_started.notify_waiters();
        tokio::time::sleep(self.delay).await;
        self.inner.next(request, access_token)
    }
}

// ============================================================================
// Mock Push Channel
// ============================================================================

type PushSender = mpsc::UnboundedSender<Result<PushEvent, BackendError>>;

/// Push channel driven by the test; every subscription receives every event
pub struct MockPushChannel {
    senders: Mutex<Vec<PushSender>>,
    subscribe_calls: AtomicUsize,
    subscribe_errors: Mutex<VecDeque<BackendError>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl MockPushChannel {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
            subscribe_errors: Mutex::new(VecDeque::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `subscribe` call fail with `error`
    pub fn queue_subscribe_error(&self, error: BackendError) {
        self.subscribe_errors.lock().unwrap().push_back(error);
    }

    /// Token passed to each `subscribe` call, in order
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn push(&self, event: PushEvent) {
        for sender in self.senders.lock().unwrap().iter() {
            let _ = sender.send(Ok(event.clone()));
        }
    }

    pub fn fail(&self, error: BackendError) {
        for sender in self.senders.lock().unwrap().iter() {
            let _ = sender.send(Err(error.clone()));
        }
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Subscriptions whose stream is still held by a listener
    pub fn active(&self) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|s| !s.is_closed());
        senders.len()
    }

    pub async fn wait_for_subscribe_calls(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.subscribe_calls() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub async fn wait_for_active(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.active() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Default for MockPushChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn subscribe(
        &self,
        _conversation_id: &ConversationIdentity,
        access_token: Option<&str>,
    ) -> Result<PushStream, BackendError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(access_token.map(str::to_string));
        if let Some(error) = self.subscribe_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

use crate::runtime::{SessionHandle, SessionRuntime, SessionView};
use crate::state_machine::{ChatContext, ReplyChannel};

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime<P: CompletionProvider + 'static> {
    pub handle: SessionHandle,
    pub creator: Arc<MockConversationCreator>,
    pub completions: Arc<P>,
    pub push: Arc<MockPushChannel>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime<MockCompletionProvider> {
    /// Create a simple test runtime with instant mocks
    pub fn new() -> TestRuntimeBuilder<MockCompletionProvider> {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder<P> {
    session_id: String,
    primary_channel: ReplyChannel,
    idle_timeout: Option<Duration>,
    creator: Option<MockConversationCreator>,
    completions: Option<P>,
    push: Option<MockPushChannel>,
}

impl<P: CompletionProvider + 'static> TestRuntimeBuilder<P> {
    pub fn channel(mut self, channel: ReplyChannel) -> Self {
        self.primary_channel = channel;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn creator(mut self, creator: MockConversationCreator) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn push(mut self, push: MockPushChannel) -> Self {
        self.push = Some(push);
        self
    }

    pub fn completions<Q: CompletionProvider + 'static>(
        self,
        completions: Q,
    ) -> TestRuntimeBuilder<Q> {
        TestRuntimeBuilder {
            session_id: self.session_id,
            primary_channel: self.primary_channel,
            idle_timeout: self.idle_timeout,
            creator: self.creator,
            completions: Some(completions),
            push: self.push,
        }
    }

    pub fn build_with(self, default: impl FnOnce() -> P) -> TestRuntime<P> {
        let creator = Arc::new(self.creator.unwrap_or_default());
        let completions = Arc::new(self.completions.unwrap_or_else(default));
        let push = Arc::new(self.push.unwrap_or_default());

        let context = ChatContext::new(&self.session_id, self.primary_channel);
        let (mut runtime, handle) = SessionRuntime::new(
            context,
            Arc::clone(&creator),
            Arc::clone(&completions),
            Arc::clone(&push),
        );
        if let Some(idle_timeout) = self.idle_timeout {
            runtime = runtime.with_idle_timeout(idle_timeout);
        }

        let runtime_handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            handle,
            creator,
            completions,
            push,
            _runtime_handle: runtime_handle,
        }
    }
}

impl TestRuntimeBuilder<MockCompletionProvider> {
    pub fn new() -> Self {
        Self {
            session_id: "test-session".to_string(),
            primary_channel: ReplyChannel::Direct,
            idle_timeout: None,
            creator: None,
            completions: None,
            push: None,
        }
    }

    pub fn build(self) -> TestRuntime<MockCompletionProvider> {
        self.build_with(MockCompletionProvider::new)
    }
}

impl TestRuntimeBuilder<DelayedMockCompletionProvider> {
    pub fn build(self) -> TestRuntime<DelayedMockCompletionProvider> {
        self.build_with(|| DelayedMockCompletionProvider::new(Duration::from_millis(100)))
    }
}

impl Default for TestRuntimeBuilder<MockCompletionProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CompletionProvider + 'static> TestRuntime<P> {
    /// Wait until the published view satisfies `predicate`
    pub async fn wait_for_view(
        &self,
        timeout: Duration,
        predicate: impl Fn(&SessionView) -> bool,
    ) -> Option<SessionView> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let view = self.handle.view();
            if predicate(&view) {
                return Some(view);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    /// Wait until no turn is in flight
    pub async fn wait_for_idle(&self, timeout: Duration) -> Option<SessionView> {
        self.wait_for_view(timeout, |view| view.state.is_idle() && !view.waiting)
            .await
    }

    /// Wait for a specific state type
    pub async fn wait_for_state(&self, expected: &str, timeout: Duration) -> bool {
        self.wait_for_view(timeout, |view| view.state.name() == expected)
            .await
            .is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;
    use crate::prompts::failure_message;
    use crate::runtime::{Collaborators, DispatchError, RuntimeManager, SessionUpdate};
    use crate::session::{DeliveryStatus, Role};
    use crate::state_machine::TransitionError;

    const WAIT: Duration = Duration::from_secs(2);

    fn push_reply(conversation_id: &str, turn_id: &str, text: &str) -> PushEvent {
        PushEvent {
            conversation_id: conversation_id.to_string(),
            correlation_id: Some(turn_id.to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_completion_provider() {
        let mock = MockCompletionProvider::new();
        mock.queue_reply("Hello");

        let request = CompletionRequest {
            conversation_id: ConversationIdentity::new("conv-1"),
            content: vec![],
            history: vec![],
        };

        let response = mock.complete(&request, None).await.unwrap();
        assert_eq!(response.text(), "Hello");

        // Second call should fail (no more responses)
        assert!(mock.complete(&request, None).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    /// First message creates the conversation, subscribes and shows the reply
    #[tokio::test]
    async fn test_first_message_round_trip() {
        let rt = TestRuntime::new().build();
        rt.creator.queue_identity("conv-abc");
        rt.completions.queue_reply("Here's a sourdough recipe...");

        let message_id = rt.handle.send("How do I make bread?", None).await.unwrap();
        let view = rt.wait_for_idle(WAIT).await.unwrap();

        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].message.role(), Role::User);
        assert_eq!(view.messages[0].message.content(), "How do I make bread?");
        assert_eq!(view.messages[0].status, Some(DeliveryStatus::Confirmed));
        assert_eq!(view.messages[1].message.role(), Role::Assistant);
        assert_eq!(view.messages[1].message.content(), "Here's a sourdough recipe...");
        assert_eq!(view.messages[1].message.reply_to(), Some(message_id.as_str()));
        assert_eq!(view.conversation_id, Some(ConversationIdentity::new("conv-abc")));

        assert_eq!(rt.creator.create_calls(), 1);
        assert!(rt.push.wait_for_active(1, WAIT).await);

        let requests = rt.completions.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt(), "How do I make bread?");
        assert!(requests[0].history.is_empty());
    }

    /// Second message reuses the identity and carries prior history
    #[tokio::test]
    async fn test_follow_up_reuses_identity() {
        let rt = TestRuntime::new().build();
        rt.completions.queue_reply("Here's a sourdough recipe...");
        rt.completions.queue_reply("Use rye flour.");

        rt.handle.send("How do I make bread?", None).await.unwrap();
        rt.wait_for_idle(WAIT).await.unwrap();
        rt.handle.send("And a darker loaf?", None).await.unwrap();
        let view = rt.wait_for_idle(WAIT).await.unwrap();

        assert_eq!(view.messages.len(), 4);
        assert_eq!(view.messages[3].message.content(), "Use rye flour.");
        assert_eq!(rt.creator.create_calls(), 1);
        assert_eq!(rt.push.subscribe_calls(), 1);

        let requests = rt.completions.recorded_requests();
        assert_eq!(requests[0].conversation_id, requests[1].conversation_id);
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].history[0].content, "How do I make bread?");
        assert_eq!(requests[1].history[1].role, Role::Assistant);
    }

    /// Access denial surfaces as one assistant message and clears waiting
    #[tokio::test]
    async fn test_access_denied_is_reported() {
        let rt = TestRuntime::new().build();
        rt.completions
            .queue_error(BackendError::access_denied("Not authorized to access sousChef"));

        rt.handle.send("How do I make bread?", None).await.unwrap();
        let view = rt
            .wait_for_view(WAIT, |v| v.messages.len() == 2 && !v.waiting)
            .await
            .unwrap();

        assert!(view.state.is_idle());
        assert_eq!(
            view.messages[1].message.content(),
            failure_message(BackendErrorKind::AccessDenied)
        );
        assert!(view.messages[1].message.is_error());
        assert_eq!(view.messages[0].status, Some(DeliveryStatus::Failed));
    }

    /// Failed creation stores no identity and the next send retries
    #[tokio::test]
    async fn test_identity_failure_retries_next_turn() {
        let creator = MockConversationCreator::new();
        creator.queue_error(BackendError::network("offline"));
        let rt = TestRuntime::new().creator(creator).build();
        rt.completions.queue_reply("Welcome back");

        rt.handle.send("hello", None).await.unwrap();
        let view = rt
            .wait_for_view(WAIT, |v| v.messages.len() == 2 && !v.waiting)
            .await
            .unwrap();
        assert!(view.conversation_id.is_none());
        assert!(view.messages[1].message.is_error());
        assert!(rt.completions.recorded_requests().is_empty());

        rt.handle.send("hello again", None).await.unwrap();
        let view = rt
            .wait_for_view(WAIT, |v| v.messages.len() == 4 && !v.waiting)
            .await
            .unwrap();
        assert_eq!(view.messages[3].message.content(), "Welcome back");
        assert_eq!(rt.creator.create_calls(), 2);
    }

    /// Reset while awaiting: everything clears and the late reply is dropped
    #[tokio::test]
    async fn test_reset_discards_late_reply() {
        let rt = TestRuntime::new()
            .completions(DelayedMockCompletionProvider::new(Duration::from_millis(150)))
            .build();
        rt.completions.queue_reply("too late");

        rt.handle.send("How do I make bread?", None).await.unwrap();
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);
        assert!(rt.push.wait_for_active(1, WAIT).await);

        rt.handle.reset().await.unwrap();
        let view = rt.handle.view();
        assert!(view.messages.is_empty());
        assert!(!view.waiting);
        assert!(view.conversation_id.is_none());
        assert!(rt.push.wait_for_active(0, WAIT).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rt.handle.view().messages.is_empty());
    }

    /// Two sends racing: exactly one is accepted and one conversation is created
    #[tokio::test]
    async fn test_concurrent_sends_single_turn() {
        let rt = TestRuntime::new()
            .completions(DelayedMockCompletionProvider::new(Duration::from_millis(100)))
            .build();
        rt.completions.queue_reply("reply");

        let (first, second) =
            tokio::join!(rt.handle.send("one", None), rt.handle.send("two", None));
        let accepted = [first.is_ok(), second.is_ok()];
        assert_eq!(accepted.iter().filter(|ok| **ok).count(), 1);
        let rejection = first.err().or(second.err()).unwrap();
        assert_eq!(rejection, DispatchError::Rejected(TransitionError::Busy));

        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(rt.creator.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let rt = TestRuntime::new().build();
        let result = rt.handle.send("   ", None).await;
        assert_eq!(result, Err(DispatchError::Rejected(TransitionError::EmptyInput)));
        assert!(rt.handle.view().messages.is_empty());
        assert_eq!(rt.creator.create_calls(), 0);
    }

    /// Push as primary channel: the completion only acknowledges
    #[tokio::test]
    async fn test_push_reply_completes_turn() {
        let rt = TestRuntime::new().channel(ReplyChannel::Push).build();
        rt.creator.queue_identity("conv-1");
        rt.completions.queue_response(CompletionResponse::default());

        let message_id = rt.handle.send("What's a good stew?", None).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);

        rt.push.push(push_reply("conv-1", &message_id, "Try a beef stew."));
        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].message.content(), "Try a beef stew.");

        // Duplicate delivery of the same turn is ignored
        rt.push.push(push_reply("conv-1", &message_id, "Try a beef stew."));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rt.handle.view().messages.len(), 2);
    }

    /// Direct reply first, push echo second: one assistant message
    #[tokio::test]
    async fn test_push_echo_after_direct_reply_is_dropped() {
        let rt = TestRuntime::new().build();
        rt.creator.queue_identity("conv-1");
        rt.completions.queue_reply("Here's a sourdough recipe...");

        let message_id = rt.handle.send("How do I make bread?", None).await.unwrap();
        rt.wait_for_idle(WAIT).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);

        rt.push
            .push(push_reply("conv-1", &message_id, "Here's a sourdough recipe..."));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let view = rt.handle.view();
        let replies = view
            .messages
            .iter()
            .filter(|m| m.message.reply_to() == Some(message_id.as_str()))
            .count();
        assert_eq!(replies, 1);
    }

    /// Push transport failure clears waiting when push owns the reply
    #[tokio::test]
    async fn test_push_failure_clears_waiting() {
        let rt = TestRuntime::new().channel(ReplyChannel::Push).build();
        rt.completions.queue_response(CompletionResponse::default());

        rt.handle.send("What's a good stew?", None).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);

        rt.push.fail(BackendError::network("socket closed"));
        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 1);
    }

    /// Visitors get the sign-up invitation without any remote call
    #[tokio::test]
    async fn test_guest_send_answers_locally() {
        let rt = TestRuntime::new().build();
        rt.handle.send_as_guest("What's a good stew?").await.unwrap();

        let view = rt.handle.view();
        assert_eq!(view.messages.len(), 2);
        assert!(view.messages[1].message.content().contains("sign up or log in"));
        assert!(!view.waiting);
        assert_eq!(rt.creator.create_calls(), 0);
        assert!(rt.completions.recorded_requests().is_empty());
    }

    /// Views receive messages, state changes and turn completion in order
    #[tokio::test]
    async fn test_updates_broadcast() {
        let rt = TestRuntime::new().build();
        rt.completions.queue_reply("Hello!");
        let mut updates = rt.handle.subscribe();

        let message_id = rt.handle.send("Hi", None).await.unwrap();

        let mut seen = Vec::new();
        loop {
            let update = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
            let done = matches!(
                &update,
                SessionUpdate::TurnComplete { turn_id } if *turn_id == message_id
            );
            seen.push(update.event_type());
            if done {
                break;
            }
        }
        assert_eq!(seen.first(), Some(&"message"));
        assert!(seen.contains(&"state_change"));
    }

    #[tokio::test]
    async fn test_close_stops_runtime() {
        let rt = TestRuntime::new().build();
        rt.handle.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rt.handle.send("hello", None).await, Err(DispatchError::Closed));
    }

    /// A dead push listener is replaced on the next turn
    #[tokio::test]
    async fn test_push_mode_resubscribes_after_listener_failure() {
        let rt = TestRuntime::new().channel(ReplyChannel::Push).build();
        rt.creator.queue_identity("conv-1");
        rt.completions.queue_response(CompletionResponse::default());
        rt.completions.queue_response(CompletionResponse::default());

        let first = rt.handle.send("What's a good stew?", None).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);
        rt.push.push(push_reply("conv-1", &first, "Try a beef stew."));
        rt.wait_for_idle(WAIT).await.unwrap();

        // Listener dies between turns
        rt.push.fail(BackendError::network("stream timed out"));
        assert!(rt.push.wait_for_active(0, WAIT).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = rt.handle.send("And a dumpling recipe?", None).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert_eq!(rt.push.subscribe_calls(), 2);
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);

        rt.push.push(push_reply("conv-1", &second, "Fold them like this."));
        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 4);
        assert_eq!(view.messages[3].message.content(), "Fold them like this.");

        // The session keeps accepting turns
        rt.completions.queue_reply("Add thyme.");
        assert!(rt.handle.send("Any herbs?", None).await.is_ok());
    }

    /// A subscribe error ends the turn and the next turn subscribes again
    #[tokio::test]
    async fn test_subscribe_error_recovers_next_turn() {
        let push = MockPushChannel::new();
        push.queue_subscribe_error(BackendError::network("connection refused"));
        let rt = TestRuntime::new()
            .channel(ReplyChannel::Push)
            .push(push)
            .build();
        rt.creator.queue_identity("conv-1");
        rt.completions.queue_response(CompletionResponse::default());
        rt.completions.queue_response(CompletionResponse::default());

        rt.handle.send("What's a good stew?", None).await.unwrap();
        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(rt.push.active(), 0);

        let second = rt.handle.send("Still there?", None).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert_eq!(rt.push.subscribe_calls(), 2);
        assert!(rt.wait_for_state("awaiting_reply", WAIT).await);

        rt.push.push(push_reply("conv-1", &second, "Always."));
        let view = rt.wait_for_idle(WAIT).await.unwrap();
        assert_eq!(view.messages.len(), 3);
        assert_eq!(view.messages[2].message.content(), "Always.");
    }

    /// Each send's bearer token reaches the collaborators for its turn
    #[tokio::test]
    async fn test_send_uses_token_of_each_request() {
        let rt = TestRuntime::new().build();
        rt.completions.queue_reply("Hello stranger");
        rt.completions.queue_reply("Welcome back");

        rt.handle.send("hi", None).await.unwrap();
        rt.wait_for_idle(WAIT).await.unwrap();
        assert!(rt.push.wait_for_active(1, WAIT).await);

        // Signed in after the session was opened
        rt.handle.send("it's me", Some("jwt-2")).await.unwrap();
        rt.wait_for_idle(WAIT).await.unwrap();

        assert_eq!(rt.creator.tokens(), vec![None]);
        assert_eq!(
            rt.completions.recorded_tokens(),
            vec![None, Some("jwt-2".to_string())]
        );

        // The listener is rebound to the new token
        assert!(rt.push.wait_for_subscribe_calls(2, WAIT).await);
        assert!(rt.push.wait_for_active(1, WAIT).await);
        assert_eq!(rt.push.tokens(), vec![None, Some("jwt-2".to_string())]);
    }

    /// A session with no connected view stops after its idle timeout
    #[tokio::test]
    async fn test_idle_session_is_evicted() {
        let rt = TestRuntime::new()
            .idle_timeout(Duration::from_millis(50))
            .build();
        rt.completions.queue_reply("Hello!");
        rt.handle.send("Hi", None).await.unwrap();
        rt.wait_for_idle(WAIT).await.unwrap();

        let deadline = tokio::time::Instant::now() + WAIT;
        while !rt.handle.is_closed() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rt.handle.is_closed());
        assert!(rt.push.wait_for_active(0, WAIT).await);
        assert_eq!(rt.handle.send("hello", None).await, Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_watched_session_is_kept() {
        let rt = TestRuntime::new()
            .idle_timeout(Duration::from_millis(50))
            .build();
        let _updates = rt.handle.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!rt.handle.is_closed());
    }

    #[tokio::test]
    async fn test_manager_forgets_evicted_session() {
        let collaborators = Collaborators {
            creator: Arc::new(MockConversationCreator::new()),
            completions: Arc::new(MockCompletionProvider::new()),
            push: Arc::new(MockPushChannel::new()),
        };
        let manager = RuntimeManager::new(
            collaborators,
            ReplyChannel::Direct,
            Duration::from_millis(50),
        );

        let handle = manager.create().await;
        assert!(manager.get(handle.id()).await.is_some());

        let deadline = tokio::time::Instant::now() + WAIT;
        while manager.len().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.get(handle.id()).await.is_none());
        assert!(handle.is_closed());
    }
}
