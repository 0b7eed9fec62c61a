//! chat-relay: a thin relay between a browser chat widget and an
//! upstream LLM completions API.
//!
//! The relay validates inbound chat requests, forwards a bounded,
//! truncated message history upstream under a wall-clock budget, and
//! returns either a buffered JSON completion or a re-framed
//! `text/event-stream` of content deltas.

pub mod config;
pub mod error;
pub mod server;
pub mod upstream;
