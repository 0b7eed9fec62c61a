//! Re-framing of normalized relay events into the outbound SSE stream.
//!
//! Deltas become `data: {"content":"..."}` frames; the terminal Done
//! becomes the `data: [DONE]` sentinel. Ordering is preserved exactly,
//! and nothing follows a terminal frame.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::Stream;
use serde::Serialize;
use tokio_stream::StreamExt;

use crate::upstream::protocol::RelayEvent;

/// One streamed content fragment, as the browser widget expects it.
#[derive(Debug, Serialize)]
struct DeltaFrame<'a> {
    content: &'a str,
}

/// Mid-stream failure frame; closes the stream.
#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    error: &'static str,
    message: &'a str,
}

/// Map a relay event sequence onto outbound SSE events.
pub fn relay_to_sse_stream(
    events: impl Stream<Item = RelayEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(|event| {
        let event = match event {
            RelayEvent::Delta(content) => {
                let data = serde_json::to_string(&DeltaFrame { content: &content })
                    .unwrap_or_default();
                Event::default().data(data)
            }
            RelayEvent::Done => Event::default().data("[DONE]"),
            RelayEvent::Error { kind, message } => {
                let data = serde_json::to_string(&ErrorFrame { error: kind, message: &message })
                    .unwrap_or_default();
                Event::default().data(data)
            }
        };
        Ok(event)
    })
}
