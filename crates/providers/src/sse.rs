//! Shared SSE plumbing for the provider adapters.
//!
//! Both wire formats stream completions as `text/event-stream` bodies. The
//! adapters differ only in how a `data:` payload maps to [`StreamEvent`]s,
//! so this module owns the buffering and hands each payload to a
//! provider-specific parser closure.

use nova_domain::error::Result;
use nova_domain::stream::{BoxStream, StreamEvent};

use crate::util::from_reqwest;

/// Incremental SSE event buffer.
///
/// Chunks are appended as they arrive; [`SseBuffer::take_payloads`] returns
/// the `data:` payloads of every complete event (events end at a blank
/// line), leaving any trailing partial event buffered for the next chunk.
#[derive(Default)]
pub(crate) struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub(crate) fn push(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
    }

    pub(crate) fn take_payloads(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(end) = self.pending.find("\n\n") {
            let event: String = self.pending.drain(..end + 2).collect();
            for line in event.lines() {
                if let Some(data) = line.trim_start().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }
        payloads
    }

    /// Treat whatever is left as one final event (body closed mid-event).
    pub(crate) fn flush(&mut self) -> Vec<String> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        self.pending.push_str("\n\n");
        self.take_payloads()
    }
}

/// Build a [`BoxStream`] of [`StreamEvent`]s from an SSE response and a
/// provider-specific payload parser.
///
/// The parser is `FnMut` because the Anthropic adapter keeps tool-call
/// assembly state across payloads. A terminal `Done` event is synthesized
/// if the parser never produced one.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::default();
        let mut done_seen = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push(&String::from_utf8_lossy(&bytes));
                    for payload in buffer.take_payloads() {
                        for event in parse_payload(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    for payload in buffer.flush() {
                        for event in parse_payload(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    })
}
