//! Server-Sent Events bridge for streamed operations
//!
//! Each event of an apply or generate stream becomes one SSE message named
//! after the operation. The stream closes after the terminal event; a client
//! that disconnects drops the stream and cancels the operation.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;

/// Convert one event into an SSE message
pub fn to_sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Failed to serialize {} event: {}", name, e);
            Event::default()
                .event(name)
                .data(r#"{"type":"error","message":"event serialization failed"}"#)
        }
    }
}

/// Wrap an operation's event stream in an SSE response
pub fn sse_response<S, T>(
    name: &'static str,
    events: S,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize,
{
    let stream = events.map(move |event| Ok(to_sse_event(name, &event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
