//! Upstream side of the relay: payload assembly, the completions
//! client, and incremental decoding of the upstream event stream.

pub mod client;
pub mod decode;
pub mod protocol;
