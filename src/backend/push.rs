//! Server-sent event push channel

use super::{BackendError, PushEvent};
use crate::identity::ConversationIdentity;
use crate::runtime::{PushChannel, PushStream};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

/// Push channel reading reply events from an SSE endpoint
#[derive(Debug, Clone)]
pub struct SsePushChannel {
    client: Client,
    url: String,
}

impl SsePushChannel {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Channel with a client of its own
    ///
    /// Subscriptions stay open for the life of a session, so only
    /// connecting is bounded. A whole-request timeout would cut every
    /// stream after that long.
    pub fn connect(
        url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self::new(client, url))
    }
}

/// Decode one SSE payload; keep-alives and other event names are skipped
fn decode(event_name: &str, data: &str) -> Option<Result<PushEvent, BackendError>> {
    if data.trim().is_empty() || !matches!(event_name, "" | "message" | "reply") {
        return None;
    }
    Some(
        serde_json::from_str(data)
            .map_err(|e| BackendError::malformed(format!("Invalid push event: {e}"))),
    )
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn subscribe(
        &self,
        conversation_id: &ConversationIdentity,
        access_token: Option<&str>,
    ) -> Result<PushStream, BackendError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("conversationId", conversation_id.as_str())])
            .header("Accept", "text/event-stream");
        if let Some(token) = access_token {
            request = request.header("Authorization", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => decode(&event.event, &event.data),
                    Err(e) => Some(Err(BackendError::network(format!(
                        "Push stream error: {e}"
                    )))),
                }
            });
        Ok(stream.boxed())
    }
}
