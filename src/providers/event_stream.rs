// Token streams over provider Server-Sent Events, driven by reqwest-eventsource

use super::{status_error, ProviderError, TokenStream};
use futures_util::StreamExt;
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};

/// What a provider makes of one SSE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseAction {
    Token(String),
    Skip,
    Done,
}

/// Open an event source and wait until the provider accepted the request.
///
/// A non-success status is read and mapped like any other provider error,
/// so callers can retry before the first token.
pub async fn connect(request: reqwest::RequestBuilder) -> Result<EventSource, ProviderError> {
    let mut source =
        EventSource::new(request).map_err(|e| ProviderError::Connection(e.to_string()))?;
    // Reconnecting would replay the generation; RetryPolicy handles retries
    source.set_retry_policy(Box::new(retry::Never));

    match source.next().await {
        Some(Ok(Event::Open)) => Ok(source),
        Some(Ok(Event::Message(_))) => {
            source.close();
            Err(ProviderError::Stream("Message received before the stream opened".to_string()))
        }
        Some(Err(e)) => {
            source.close();
            Err(map_error(e).await)
        }
        None => Err(ProviderError::Connection("Stream closed before it opened".to_string())),
    }
}

async fn map_error(error: EventSourceError) -> ProviderError {
    match error {
        EventSourceError::InvalidStatusCode(status, response) => {
            let text = response.text().await.unwrap_or_default();
            status_error(status.as_u16(), &text)
        }
        EventSourceError::Transport(e) => ProviderError::Connection(e.to_string()),
        other => ProviderError::Stream(other.to_string()),
    }
}

/// Turn an open event source into a token stream using a provider-specific
/// `extract(event_name, data)`. The stream ends on `Done`, on the end of
/// input, or after the first error.
pub fn token_stream<F>(source: EventSource, extract: F) -> TokenStream
where
    F: FnMut(&str, &str) -> Result<SseAction, ProviderError> + Send + 'static,
{
    Box::pin(futures_util::stream::unfold(
        Some((source, extract)),
        |state| async move {
            let (mut source, mut extract) = state?;
            loop {
                match source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        match extract(&message.event, &message.data) {
                            Ok(SseAction::Token(token)) => {
                                return Some((Ok(token), Some((source, extract))))
                            }
                            Ok(SseAction::Skip) => continue,
                            Ok(SseAction::Done) => {
                                source.close();
                                return None;
                            }
                            Err(e) => {
                                source.close();
                                return Some((Err(e), None));
                            }
                        }
                    }
                    Some(Err(EventSourceError::StreamEnded)) | None => {
                        source.close();
                        return None;
                    }
                    Some(Err(e)) => {
                        source.close();
                        return Some((Err(map_error(e).await), None));
                    }
                }
            }
        },
    ))
}
