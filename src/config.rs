//! Runtime configuration for chat-relay.
//!
//! Every knob is environment-supplied (a `.env` file is honored) with
//! documented defaults. The upstream API key is the one required value:
//! without it the process refuses to start.

use std::str::FromStr;

use anyhow::{bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-relay", about = "Relay between a chat widget and an LLM completions API")]
pub struct Cli {
    /// HTTP listen address (overrides RELAY_LISTEN).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream endpoint configuration.
    pub upstream: UpstreamConfig,

    /// Relay policy: truncation window, timeout, retries, streaming.
    pub relay: RelayConfig,

    /// Sampling parameters forwarded upstream verbatim.
    pub sampling: SamplingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:3000").
    pub listen: String,

    /// Attach error detail (debug representation) to error responses.
    /// Never enable in production.
    pub debug_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            debug_errors: false,
        }
    }
}

/// Upstream completions endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Bearer token for the upstream API.
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Completions endpoint URL.
    pub api_url: String,

    /// Model identifier sent in the payload.
    pub model: String,

    /// Persona string prepended as a system message to every request.
    pub system_prompt: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://api.deepseek.com/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
        }
    }
}

/// Relay policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Number of most-recent history messages forwarded upstream.
    pub history_window: usize,

    /// Per-message content cap in characters (hard truncation).
    pub content_cap: usize,

    /// Absolute wall-clock budget per upstream attempt, in seconds.
    pub timeout_secs: u64,

    /// Sequential retries on timeout only (0 = no retries).
    pub max_retries: u32,

    /// Stream deltas to the caller instead of buffering the completion.
    pub stream: bool,

    /// Character cap applied when wrapping a non-JSON success body.
    pub display_cap: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_window: 2,
            content_cap: 500,
            timeout_secs: 30,
            max_retries: 0,
            stream: true,
            display_cap: 500,
        }
    }
}

/// Sampling parameters attached to every upstream payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            presence_penalty: 0.6,
            frequency_penalty: 0.6,
            max_tokens: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            relay: RelayConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// Fails if `UPSTREAM_API_KEY` is absent or any override fails to
    /// parse; every other knob falls back to its default.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        config.upstream.api_key = match std::env::var("UPSTREAM_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("UPSTREAM_API_KEY must be set (refusing to start without credentials)"),
        };

        if let Ok(url) = std::env::var("UPSTREAM_API_URL") {
            if url.trim().is_empty() {
                bail!("UPSTREAM_API_URL is set but empty");
            }
            config.upstream.api_url = url;
        }
        if let Ok(model) = std::env::var("UPSTREAM_MODEL") {
            config.upstream.model = model;
        }
        if let Ok(prompt) = std::env::var("RELAY_SYSTEM_PROMPT") {
            config.upstream.system_prompt = prompt;
        }
        if let Ok(listen) = std::env::var("RELAY_LISTEN") {
            config.server.listen = listen;
        }

        config.server.debug_errors = env_parse("RELAY_DEBUG_ERRORS", config.server.debug_errors)?;
        config.relay.history_window = env_parse("RELAY_HISTORY_WINDOW", config.relay.history_window)?;
        config.relay.content_cap = env_parse("RELAY_CONTENT_CAP", config.relay.content_cap)?;
        config.relay.timeout_secs = env_parse("RELAY_TIMEOUT_SECS", config.relay.timeout_secs)?;
        config.relay.max_retries = env_parse("RELAY_MAX_RETRIES", config.relay.max_retries)?;
        config.relay.stream = env_parse("RELAY_STREAM", config.relay.stream)?;

        if config.relay.timeout_secs == 0 {
            bail!("RELAY_TIMEOUT_SECS must be at least 1");
        }

        Ok(config)
    }
}

/// Parse an environment variable, keeping `default` when unset.
fn env_parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.relay.history_window, 2);
        assert_eq!(cfg.relay.content_cap, 500);
        assert_eq!(cfg.relay.timeout_secs, 30);
        assert_eq!(cfg.relay.max_retries, 0);
        assert!(cfg.relay.stream);
        assert_eq!(cfg.sampling.max_tokens, 1000);
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut cfg = Config::default();
        cfg.upstream.api_key = "sk-secret".to_string();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
