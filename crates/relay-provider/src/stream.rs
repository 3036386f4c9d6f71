// SPDX-License-Identifier: MIT OR Apache-2.0
//! The filtered event stream.

use crate::auth::BearerToken;
use crate::stop::StopHandle;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use relay_core::{Decoded, decode_payload};
use relay_error::{Classify, ErrorCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Items buffered between the stream reader and its consumer.
pub const STREAM_BUFFER: usize = 1024;

/// Longest stream line accepted before it is dropped as malformed.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a stream source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// `start` was called on a source that has already been started.
    #[error("stream source already started")]
    AlreadyStarted,

    /// The provider refused to open the stream.
    #[error("stream rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The connection failed while reading.
    #[error("stream transport error: {reason}")]
    Transport {
        /// Transport diagnostic.
        reason: String,
    },

    /// The provider closed the stream without being asked to.
    #[error("stream disconnected by remote")]
    Disconnected,
}

impl Classify for StreamError {
    fn code(&self) -> ErrorCode {
        ErrorCode::StreamFailed
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Query parameters sent when opening the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamQuery {
    params: Vec<(String, String)>,
}

impl StreamQuery {
    /// No parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// The relay's fixed enrichment: author expansion and creation time.
    pub fn enriched() -> Self {
        Self::new()
            .param("expansions", "author_id")
            .param("tweet.fields", "created_at")
    }

    /// Append a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// The parameters, in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }
}

impl std::fmt::Display for StreamQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Sending half of an [`EventStream`].
pub type EventSender = mpsc::Sender<Result<Decoded, StreamError>>;

/// Lazy sequence of decoded payloads from a started source.
///
/// Ends after the source stops or after the first `Err`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Result<Decoded, StreamError>>,
}

impl EventStream {
    /// Wrap a receiver.
    pub fn new(rx: mpsc::Receiver<Result<Decoded, StreamError>>) -> Self {
        Self { rx }
    }

    /// A bounded channel whose receiving half is an `EventStream`.
    pub fn channel(capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// The next item, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<Decoded, StreamError>> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A push-based provider of matching events.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Open the stream. Sources are single-use: a second call returns
    /// [`StreamError::AlreadyStarted`].
    async fn start(&self, query: &StreamQuery) -> Result<EventStream, StreamError>;

    /// Handle that stops this source when triggered.
    fn stop_handle(&self) -> StopHandle;

    /// Ask the source to stop producing. Idempotent.
    fn stop(&self) {
        self.stop_handle().stop();
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`StreamSource`] reading the provider's newline-delimited JSON stream.
#[derive(Debug)]
pub struct HttpStreamSource {
    client: reqwest::Client,
    stream_url: String,
    token: BearerToken,
    started: AtomicBool,
    stop: StopHandle,
}

impl HttpStreamSource {
    /// Create a source rooted at `api_url`.
    pub fn new(client: reqwest::Client, api_url: &str, token: BearerToken) -> Self {
        Self {
            client,
            stream_url: format!("{}/2/tweets/search/stream", api_url.trim_end_matches('/')),
            token,
            started: AtomicBool::new(false),
            stop: StopHandle::new(),
        }
    }
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    async fn start(&self, query: &StreamQuery) -> Result<EventStream, StreamError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStarted);
        }

        info!(target: "relay.stream", url = %self.stream_url, query = %query, "opening stream");
        let response = self
            .client
            .get(&self.stream_url)
            .bearer_auth(self.token.as_str())
            .query(query.pairs())
            .send()
            .await
            .map_err(|e| StreamError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, events) = EventStream::channel(STREAM_BUFFER);
        tokio::spawn(pump_lines(
            response.bytes_stream(),
            tx,
            self.stop.clone(),
            MAX_LINE_BYTES,
        ));
        Ok(events)
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

/// Split a chunked body into lines, skip keep-alives, and decode the rest.
///
/// A line longer than `max_line` bytes is yielded as [`Decoded::Malformed`]
/// and skipped up to its terminating newline.
///
/// Ends silently on stop, with [`StreamError::Transport`] on a read error,
/// and with [`StreamError::Disconnected`] when the body ends on its own.
pub(crate) async fn pump_lines<S, B, E>(
    body: S,
    tx: EventSender,
    stop: StopHandle,
    max_line: usize,
) where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::new(max_line);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = stop.stopped() => {
                debug!(target: "relay.stream", "stop requested, closing stream");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                lines.push(bytes.as_ref());
                while let Some(line) = lines.next_line() {
                    if !emit_line(line, max_line, &tx, &stop).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(target: "relay.stream", error = %e, "stream read failed");
                let _ = tx
                    .send(Err(StreamError::Transport {
                        reason: e.to_string(),
                    }))
                    .await;
                return;
            }
            None => {
                if stop.is_stopped() {
                    return;
                }
                if let Some(line) = lines.finish() {
                    if !emit_line(line, max_line, &tx, &stop).await {
                        return;
                    }
                }
                warn!(target: "relay.stream", "stream ended by remote");
                let _ = tx.send(Err(StreamError::Disconnected)).await;
                return;
            }
        }
    }
}

/// Bytes of an oversize line kept for diagnostics.
const OVERSIZE_PREFIX: usize = 256;

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete(Vec<u8>),
    /// Leading bytes of a line that exceeded the cap.
    Oversize(Vec<u8>),
}

/// Accumulates body chunks and hands out newline-terminated lines.
///
/// Bytes before `scanned` are known to hold no newline, so each byte is
/// searched once. Pending bytes never exceed the cap: an overlong line is
/// reported once and then dropped until its newline arrives.
#[derive(Debug)]
struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
    discarding: bool,
    max: usize,
}

impl LineBuffer {
    fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            discarding: false,
            max,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<Line> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                return self.compact();
            };
            let begin = self.start;
            let end = self.scanned + offset + 1;
            self.start = end;
            self.scanned = end;
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = &self.buf[begin..end];
            return Some(if line.len() > self.max {
                Line::Oversize(oversize_prefix(line))
            } else {
                Line::Complete(line.to_vec())
            });
        }
    }

    /// Drop consumed bytes once no full line is left. Reports a pending
    /// partial line that has already outgrown the cap.
    fn compact(&mut self) -> Option<Line> {
        let pending = &self.buf[self.start..];
        let oversize = (!self.discarding && pending.len() > self.max)
            .then(|| Line::Oversize(oversize_prefix(pending)));
        if oversize.is_some() {
            self.discarding = true;
        }
        if self.discarding {
            self.buf.clear();
        } else {
            self.buf.drain(..self.start);
        }
        self.start = 0;
        self.scanned = self.buf.len();
        oversize
    }

    /// The unterminated tail left when the body ends.
    fn finish(&mut self) -> Option<Line> {
        if self.discarding {
            return None;
        }
        let rest = std::mem::take(&mut self.buf).split_off(self.start);
        self.start = 0;
        self.scanned = 0;
        if rest.is_empty() {
            None
        } else if rest.len() > self.max {
            Some(Line::Oversize(oversize_prefix(&rest)))
        } else {
            Some(Line::Complete(rest))
        }
    }
}

fn oversize_prefix(line: &[u8]) -> Vec<u8> {
    line[..line.len().min(OVERSIZE_PREFIX)].to_vec()
}

/// Decode and forward one line. Returns `false` once the consumer is gone
/// or a stop was requested.
async fn emit_line(line: Line, max_line: usize, tx: &EventSender, stop: &StopHandle) -> bool {
    let decoded = match line {
        Line::Complete(bytes) => {
            let bytes = trim_ascii(&bytes);
            if bytes.is_empty() {
                trace!(target: "relay.stream", "keep-alive");
                return true;
            }
            decode_payload(bytes)
        }
        Line::Oversize(raw) => {
            warn!(target: "relay.stream", limit = max_line, "dropping oversize line");
            Decoded::Malformed {
                raw,
                reason: format!("line exceeds {max_line} bytes"),
            }
        }
    };
    tokio::select! {
        biased;
        _ = stop.stopped() => false,
        sent = tx.send(Ok(decoded)) => sent.is_ok(),
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
