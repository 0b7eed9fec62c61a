//! Incremental decoder for the upstream `data: <json>` event stream.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers partial lines
//! across chunks and turns each complete `data:` line into a normalized
//! [`RelayEvent`]. A malformed frame is logged and skipped, never
//! fatal. Once the `[DONE]` sentinel is seen, all further input is
//! ignored.

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::upstream::protocol::{RelayEvent, StreamChunk};

/// Sentinel terminating an upstream stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Stateful line decoder for one upstream response body.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buf: BytesMut,
    done: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of upstream bytes, appending any completed
    /// events to `out`. Partial trailing lines stay buffered.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<RelayEvent>) {
        if self.done {
            return;
        }
        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            if let Some(event) = self.decode_line(&line[..pos]) {
                out.push(event);
                if self.done {
                    return;
                }
            }
        }
    }

    /// Flush the buffer at end of stream, in case the final frame
    /// lacked a trailing newline.
    pub fn finish(&mut self, out: &mut Vec<RelayEvent>) {
        if self.done || self.buf.is_empty() {
            return;
        }
        let line = self.buf.split();
        if let Some(event) = self.decode_line(&line) {
            out.push(event);
        }
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<RelayEvent> {
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s.trim_end_matches('\r'),
            Err(e) => {
                warn!(error = %e, "skipping non-UTF-8 stream line");
                return None;
            }
        };

        if line.is_empty() {
            return None;
        }

        // SSE comments and non-data fields are not ours to interpret.
        let Some(data) = line.strip_prefix("data:") else {
            debug!(line, "ignoring non-data stream line");
            return None;
        };
        let data = data.trim_start();

        if data == DONE_SENTINEL {
            self.done = true;
            return Some(RelayEvent::Done);
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk.delta_content().map(RelayEvent::Delta),
            Err(e) => {
                warn!(error = %e, "skipping malformed stream frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut SseLineDecoder, input: &[u8]) -> Vec<RelayEvent> {
        let mut out = Vec::new();
        decoder.feed(input, &mut out);
        out
    }

    #[test]
    fn test_single_frame_then_done() {
        let mut decoder = SseLineDecoder::new();
        let events = feed_all(
            &mut decoder,
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        );
        assert_eq!(
            events,
            vec![RelayEvent::Delta("Hi".to_string()), RelayEvent::Done]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn test_partial_lines_buffer_across_chunks() {
        let mut decoder = SseLineDecoder::new();
        let mut out = Vec::new();

        decoder.feed(b"data: {\"choices\":[{\"delta\":{\"con", &mut out);
        assert!(out.is_empty());

        decoder.feed(b"tent\":\"Hel\"}}]}\ndata: {\"choices\":[{\"delta\":", &mut out);
        assert_eq!(out, vec![RelayEvent::Delta("Hel".to_string())]);

        decoder.feed(b"{\"content\":\"lo\"}}]}\n", &mut out);
        assert_eq!(
            out,
            vec![
                RelayEvent::Delta("Hel".to_string()),
                RelayEvent::Delta("lo".to_string())
            ]
        );
    }

    #[test]
    fn test_multibyte_content_split_mid_char() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"日本\"}}]}\n".as_bytes();
        let mut decoder = SseLineDecoder::new();
        let mut out = Vec::new();
        // Split inside a UTF-8 sequence; the decoder buffers raw bytes
        // so the reassembled line still parses.
        decoder.feed(&frame[..40], &mut out);
        decoder.feed(&frame[40..], &mut out);
        assert_eq!(out, vec![RelayEvent::Delta("日本".to_string())]);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut decoder = SseLineDecoder::new();
        let events = feed_all(
            &mut decoder,
            b"data: {not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(events, vec![RelayEvent::Delta("ok".to_string())]);
    }

    #[test]
    fn test_input_after_done_is_ignored() {
        let mut decoder = SseLineDecoder::new();
        let mut out = Vec::new();
        decoder.feed(b"data: [DONE]\n", &mut out);
        decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            &mut out,
        );
        decoder.finish(&mut out);
        assert_eq!(out, vec![RelayEvent::Done]);
    }

    #[test]
    fn test_done_mid_chunk_stops_processing() {
        let mut decoder = SseLineDecoder::new();
        let events = feed_all(
            &mut decoder,
            b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert_eq!(events, vec![RelayEvent::Done]);
    }

    #[test]
    fn test_finish_flushes_trailing_fragment() {
        let mut decoder = SseLineDecoder::new();
        let mut out = Vec::new();
        decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}", &mut out);
        assert!(out.is_empty());
        decoder.finish(&mut out);
        assert_eq!(out, vec![RelayEvent::Delta("tail".to_string())]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut decoder = SseLineDecoder::new();
        let events = feed_all(
            &mut decoder,
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n: keep-alive\r\ndata: [DONE]\r\n",
        );
        assert_eq!(
            events,
            vec![RelayEvent::Delta("a".to_string()), RelayEvent::Done]
        );
    }

    #[test]
    fn test_frame_without_content_emits_nothing() {
        let mut decoder = SseLineDecoder::new();
        let events = feed_all(
            &mut decoder,
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        );
        assert!(events.is_empty());
    }
}
