//! HTTP client for the upstream completions endpoint.
//!
//! One POST per inbound chat request, under an absolute wall-clock
//! budget. Timeouts cancel the in-flight call; they are the only
//! failures that trigger the (bounded, sequential) retry loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{Stream, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::upstream::decode::SseLineDecoder;
use crate::upstream::protocol::{
    cap_chars, ChatMessage, Completion, CompletionPayload, RelayEvent,
};

/// Client for the configured upstream completions API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<Config>,
}

impl UpstreamClient {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self { http, config })
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(self.config.relay.timeout_secs)
    }

    fn post(&self, payload: &CompletionPayload) -> reqwest::RequestBuilder {
        self.http
            .post(&self.config.upstream.api_url)
            .bearer_auth(&self.config.upstream.api_key)
            .json(payload)
    }

    /// Buffered completion: send the truncated history upstream and
    /// return the assistant's full reply.
    pub async fn complete(&self, history: &[ChatMessage]) -> Result<String, RelayError> {
        let payload = CompletionPayload::build(&self.config, history, false);
        let attempts = self.config.relay.max_retries + 1;

        for attempt in 1..=attempts {
            // Each attempt gets a fresh window covering both the
            // request and the body read; dropping the future on expiry
            // cancels the in-flight call.
            match timeout(self.budget(), self.try_complete(&payload)).await {
                Ok(result) => return result,
                Err(_) => warn!(attempt, attempts, "upstream call timed out"),
            }
        }

        Err(RelayError::Timeout)
    }

    async fn try_complete(&self, payload: &CompletionPayload) -> Result<String, RelayError> {
        let response = self
            .post(payload)
            .send()
            .await
            .map_err(|e| RelayError::Internal(anyhow::Error::new(e).context("upstream request failed")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Internal(anyhow::Error::new(e).context("failed to read upstream body")))?;

        if !status.is_success() {
            return Err(RelayError::UpstreamHttp { status: status.as_u16(), body });
        }

        match serde_json::from_str::<Completion>(&body) {
            Ok(completion) => completion
                .content()
                .map(str::to_string)
                .ok_or_else(|| {
                    RelayError::InvalidUpstreamResponse(
                        "completion is missing choices[0].message.content".to_string(),
                    )
                }),
            Err(e) => {
                // Non-JSON success body: wrap the raw text (capped for
                // display) instead of failing.
                debug!(error = %e, "upstream success body was not JSON, wrapping raw text");
                Ok(cap_chars(&body, self.config.relay.display_cap).to_string())
            }
        }
    }

    /// Streaming completion: a lazy sequence of [`RelayEvent`]s the
    /// consumer drives. The sequence always ends with exactly one
    /// terminal event (Done or Error); nothing follows it.
    pub async fn stream(
        &self,
        history: &[ChatMessage],
    ) -> Result<impl Stream<Item = RelayEvent> + Send + 'static, RelayError> {
        let payload = CompletionPayload::build(&self.config, history, true);
        let attempts = self.config.relay.max_retries + 1;

        let mut opened = None;
        for attempt in 1..=attempts {
            let deadline = Instant::now() + self.budget();
            match timeout_at(deadline, self.post(&payload).send()).await {
                Ok(Ok(response)) => {
                    opened = Some((response, deadline));
                    break;
                }
                Ok(Err(e)) => {
                    return Err(RelayError::Internal(
                        anyhow::Error::new(e).context("upstream request failed"),
                    ))
                }
                Err(_) => warn!(attempt, attempts, "upstream call timed out"),
            }
        }
        let Some((response, deadline)) = opened else {
            return Err(RelayError::Timeout);
        };

        let status = response.status();
        if !status.is_success() {
            let body = timeout_at(deadline, response.text())
                .await
                .map_err(|_| RelayError::Timeout)?
                .unwrap_or_default();
            return Err(RelayError::UpstreamHttp { status: status.as_u16(), body });
        }

        let mut bytes = response.bytes_stream();

        // Once frames are flowing, partial output has already been
        // delivered; budget exhaustion or a transport failure becomes
        // a terminal Error event rather than a retried request.
        Ok(async_stream::stream! {
            let mut decoder = SseLineDecoder::new();
            let mut pending: Vec<RelayEvent> = Vec::new();

            loop {
                let next = match timeout_at(deadline, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield RelayEvent::Error {
                            kind: "timeout",
                            message: "upstream stream exceeded the time budget".to_string(),
                        };
                        return;
                    }
                };

                match next {
                    Some(Ok(chunk)) => decoder.feed(&chunk, &mut pending),
                    Some(Err(e)) => {
                        yield RelayEvent::Error {
                            kind: "upstream_error",
                            message: format!("upstream stream failed: {e}"),
                        };
                        return;
                    }
                    None => {
                        decoder.finish(&mut pending);
                        for event in pending.drain(..) {
                            let terminal = !matches!(event, RelayEvent::Delta(_));
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                        // Upstream closed without [DONE]; terminate the
                        // output so the caller always sees a sentinel.
                        yield RelayEvent::Done;
                        return;
                    }
                }

                for event in pending.drain(..) {
                    let terminal = !matches!(event, RelayEvent::Delta(_));
                    yield event;
                    if terminal {
                        return;
                    }
                }
            }
        })
    }
}
