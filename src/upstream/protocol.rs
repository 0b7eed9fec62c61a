//! Wire types shared between the relay and the upstream completions
//! API, plus the truncation policy applied before forwarding.

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation. Ordering is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Request body sent to the upstream completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
}

impl CompletionPayload {
    /// Assemble the upstream payload: configured system message first,
    /// then the truncated history window, then sampling parameters.
    pub fn build(config: &Config, history: &[ChatMessage], stream: bool) -> Self {
        let window = truncate_history(
            history,
            config.relay.history_window,
            config.relay.content_cap,
        );

        let mut messages = Vec::with_capacity(1 + window.len());
        messages.push(ChatMessage::new(Role::System, config.upstream.system_prompt.clone()));
        messages.extend(window);

        Self {
            model: config.upstream.model.clone(),
            messages,
            stream,
            temperature: config.sampling.temperature,
            top_p: config.sampling.top_p,
            presence_penalty: config.sampling.presence_penalty,
            frequency_penalty: config.sampling.frequency_penalty,
            max_tokens: config.sampling.max_tokens,
        }
    }
}

/// Keep the most recent `window` messages in their original order,
/// each content hard-capped at `cap` characters.
pub fn truncate_history(history: &[ChatMessage], window: usize, cap: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|msg| ChatMessage {
            role: msg.role,
            content: cap_chars(&msg.content, cap).to_string(),
        })
        .collect()
}

/// Truncate to at most `cap` characters, respecting char boundaries.
/// A no-op for content that already fits.
pub fn cap_chars(content: &str, cap: usize) -> &str {
    match content.char_indices().nth(cap) {
        Some((byte_idx, _)) => &content[..byte_idx],
        None => content,
    }
}

// ─── Upstream response envelopes ───────────────────────────────────────────

/// Buffered (non-streaming) completion response.
#[derive(Debug, Serialize, Deserialize)]
pub struct Completion {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub message: Option<AssistantMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: Option<String>,
}

impl Completion {
    /// Wrap plain assistant text in the completion envelope. Used both
    /// for the relay's own buffered responses and for synthesizing an
    /// envelope around a non-JSON upstream success body.
    pub fn from_content(content: String) -> Self {
        Self {
            choices: vec![CompletionChoice {
                message: Some(AssistantMessage {
                    role: Some("assistant".to_string()),
                    content: Some(content),
                }),
            }],
        }
    }

    /// The completion text, if the envelope carries one.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

/// One frame of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// The content delta carried by this frame, if any.
    pub fn delta_content(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.delta.content)
    }
}

// ─── Normalized relay events ───────────────────────────────────────────────

/// The normalized unit emitted toward the client when streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// An incremental content fragment.
    Delta(String),
    /// Terminal: upstream signalled completion.
    Done,
    /// Terminal: the stream failed after it had started.
    Error { kind: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    #[test]
    fn test_window_keeps_most_recent_in_order() {
        let history = vec![
            msg(Role::User, "one"),
            msg(Role::Assistant, "two"),
            msg(Role::User, "three"),
        ];
        let kept = truncate_history(&history, 2, 500);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "two");
        assert_eq!(kept[1].content, "three");
    }

    #[test]
    fn test_window_larger_than_history() {
        let history = vec![msg(Role::User, "hello")];
        let kept = truncate_history(&history, 2, 500);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_content_cap_is_hard_and_idempotent() {
        let history = vec![msg(Role::User, "abcdef")];
        let once = truncate_history(&history, 2, 3);
        assert_eq!(once[0].content, "abc");
        let twice = truncate_history(&once, 2, 3);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        assert_eq!(cap_chars("héllo", 2), "hé");
        assert_eq!(cap_chars("日本語テキスト", 3), "日本語");
        assert_eq!(cap_chars("short", 500), "short");
    }

    #[test]
    fn test_payload_prepends_system_message() {
        let config = Config::default();
        let history = vec![
            msg(Role::User, "a"),
            msg(Role::Assistant, "b"),
            msg(Role::User, "c"),
        ];
        let payload = CompletionPayload::build(&config, &history, true);

        assert_eq!(payload.messages.len(), 3); // system + window of 2
        assert_eq!(payload.messages[0].role, Role::System);
        assert_eq!(payload.messages[0].content, config.upstream.system_prompt);
        assert_eq!(payload.messages[2].content, "c");
        assert!(payload.stream);
        assert_eq!(payload.max_tokens, 1000);
    }

    #[test]
    fn test_completion_content_round_trip() {
        let completion = Completion::from_content("hi there".to_string());
        assert_eq!(completion.content(), Some("hi there"));

        let missing: Completion = serde_json::from_str(r#"{"choices":[{"message":{}}]}"#).unwrap();
        assert_eq!(missing.content(), None);
    }

    #[test]
    fn test_stream_chunk_delta() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(chunk.delta_content(), Some("Hi".to_string()));

        let finish: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(finish.delta_content(), None);
    }
}
