//! Server-Sent Events support

use crate::runtime::{SessionUpdate, SessionView};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert a session's broadcast stream to SSE, starting with an `init` snapshot
pub fn sse_stream(
    init: SessionView,
    broadcast_rx: tokio::sync::broadcast::Receiver<SessionUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move { Ok(init_event(&init)) });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(update) => Some(Ok(update_event(&update))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(init.chain(broadcasts)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn init_event(view: &SessionView) -> Event {
    let mut data = serde_json::to_value(view).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut data {
        map.insert("type".to_string(), json!("init"));
    }
    Event::default().event("init").data(data.to_string())
}

fn update_event(update: &SessionUpdate) -> Event {
    let data = serde_json::to_value(update).unwrap_or(Value::Null);
    Event::default()
        .event(update.event_type())
        .data(data.to_string())
}
