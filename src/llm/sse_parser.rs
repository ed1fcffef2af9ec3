// ABOUTME: Line-buffering SSE parser shared by streaming LLM responses
// ABOUTME: Handles partial lines across TCP boundaries and batched events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # SSE Stream Parser
//!
//! Server-sent events are newline-delimited, but TCP does not align network
//! chunks with event boundaries. Two failure modes must be handled:
//!
//! 1. Several `data:` events arriving in a single chunk: all must be
//!    emitted, not just the first.
//! 2. A JSON payload split across two chunks: the partial line must be
//!    buffered until its terminating newline arrives.
//!
//! Providers supply a `parse_data` closure converting raw JSON payloads into
//! [`StreamChunk`] values; the framing (buffering, `data:` prefix stripping,
//! `[DONE]` detection) lives here once.

use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::{CompletionStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination sentinel
    Done,
}

/// Line buffer accumulating bytes until complete SSE lines are available
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete event they unlock
    ///
    /// Trailing partial lines stay buffered for the next `feed` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);
            if let Some(event) = Self::parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing partial line when the byte stream ends
    pub fn flush(&mut self) -> Option<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        Self::parse_line(&remaining)
    }

    fn parse_line(line: &str) -> Option<SseEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "data: [DONE]" {
            return Some(SseEvent::Done);
        }
        // Non-data SSE fields (event:, id:, retry:, comments) are ignored
        let data = trimmed.strip_prefix("data: ")?;
        if data.trim().is_empty() {
            None
        } else {
            Some(SseEvent::Data(data.to_owned()))
        }
    }
}

/// Wrap a raw byte stream with SSE framing and provider-specific parsing
///
/// `parse_data` returns `None` to skip events carrying no output (empty
/// deltas, metadata-only chunks). Empty deltas are filtered unless final.
pub fn frame_sse_stream<S, F>(
    byte_stream: S,
    parse_data: F,
    provider_name: &'static str,
) -> CompletionStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = Box::pin(byte_stream);
        let mut parser = SseLineBuffer::new();
        let mut done = false;

        while let Some(item) = bytes.next().await {
            match item {
                Ok(chunk) => {
                    for event in parser.feed(&chunk) {
                        match event {
                            SseEvent::Data(json) => {
                                if let Some(result) = parse_data(&json) {
                                    yield result;
                                }
                            }
                            SseEvent::Done => {
                                done = true;
                                yield Ok(final_chunk());
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(AppError::provider(format!(
                        "{provider_name} stream read error: {e}"
                    )));
                    return;
                }
            }
        }

        match parser.flush() {
            Some(SseEvent::Data(json)) => {
                if let Some(result) = parse_data(&json) {
                    yield result;
                }
            }
            Some(SseEvent::Done) => {
                done = true;
                yield Ok(final_chunk());
            }
            None => {}
        }

        // Upstreams that close without [DONE] still terminate the chunk
        // sequence so consumers observe a final marker.
        if !done {
            yield Ok(final_chunk());
        }
    };

    let filtered = stream.filter(|result: &Result<StreamChunk, AppError>| {
        futures_util::future::ready(
            result
                .as_ref()
                .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final),
        )
    });

    Box::pin(filtered)
}

fn final_chunk() -> StreamChunk {
    StreamChunk {
        delta: String::new(),
        is_final: true,
        finish_reason: Some("stop".to_owned()),
    }
}

/// Retry configuration for provider HTTP requests
///
/// Streaming retries only cover the initial request; once bytes flow, the
/// stream is not retried (the client may have consumed partial output).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Delay cap for exponential backoff (milliseconds)
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Default: 3 retries, 500ms initial, 5s cap
    #[must_use]
    pub const fn default_config() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }

    /// Retry budget bounded by the dispatcher's retry count
    #[must_use]
    pub const fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }

    /// Exponential backoff with sub-second jitter:
    /// `min(initial * 2^attempt, max) + jitter(0..100ms)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms.saturating_mul(1_u64 << attempt.min(16));
        let capped = base.min(self.max_delay_ms);
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_millis()))
            % 100;
        Duration::from_millis(capped + jitter)
    }
}

/// Transient HTTP statuses worth retrying
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Connection and timeout errors are retryable
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_owned()),
                SseEvent::Data("{\"b\":2}".to_owned()),
            ]
        );
    }

    #[test]
    fn partial_line_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"delta\":\"he").is_empty());
        let events = buffer.feed(b"llo\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"delta\":\"hello\"}".to_owned())]);
    }

    #[test]
    fn done_sentinel_detected() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: [DONE]\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn flush_recovers_unterminated_event() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"x\":1}").is_empty());
        assert_eq!(buffer.flush(), Some(SseEvent::Data("{\"x\":1}".to_owned())));
    }

    #[test]
    fn non_data_fields_ignored() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"event: ping\nid: 7\n: comment\nretry: 100\n");
        assert!(events.is_empty());
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::default_config();
        let delay = config.delay_for_attempt(20);
        assert!(delay < Duration::from_millis(config.max_delay_ms + 100));
    }
}
