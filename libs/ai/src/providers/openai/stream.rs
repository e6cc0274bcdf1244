//! SSE streaming for Chat Completions
//!
//! Each `data:` event is converted on its own; reassembling tool calls from
//! their fragments is left to the core's accumulator. The stream ends on
//! `[DONE]`, on a clean end of stream or after the first error.

use super::convert::chunk_to_delta;
use futures::StreamExt;
use gitsage_agent_core::{DeltaStream, ModelError};
use reqwest_eventsource::{Event, EventSource};

pub fn create_completions_stream(event_source: EventSource) -> DeltaStream {
    let stream = async_stream::stream! {
        let mut event_stream = event_source;

        while let Some(event) = event_stream.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data == "[DONE]" {
                        break;
                    }

                    match chunk_to_delta(&message.data) {
                        Ok(Some(delta)) => yield Ok(delta),
                        Ok(None) => {}
                        Err(error) => {
                            yield Err(error);
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(error) => {
                    yield Err(map_event_source_error(error).await);
                    break;
                }
            }
        }

        event_stream.close();
    };

    Box::pin(stream)
}

async fn map_event_source_error(error: reqwest_eventsource::Error) -> ModelError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            ModelError::Status {
                status: status.as_u16(),
                message: body,
            }
        }
        reqwest_eventsource::Error::Transport(error) => map_reqwest_error(error),
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => {
            ModelError::InvalidResponse(format!(
                "expected an event stream, got content type {content_type:?}"
            ))
        }
        other => ModelError::InvalidResponse(format!("stream error: {other}")),
    }
}

pub(crate) fn map_reqwest_error(error: reqwest::Error) -> ModelError {
    if error.is_timeout() {
        ModelError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        ModelError::Status {
            status: status.as_u16(),
            message: error.to_string(),
        }
    } else if error.is_connect() || error.is_request() || error.is_body() {
        ModelError::Network(error.to_string())
    } else {
        ModelError::Other(error.to_string())
    }
}
