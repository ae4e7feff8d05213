//! Uplink event bridge.
//!
//! The ns-relay republishes uplinks as server-sent events whose `data` field
//! is a JSON object `{"data": "<hex>", ...metadata}`. This module turns that
//! stream into [`UplinkEvent`]s handed to a caller callback:
//!
//! - [`SseDecoder`] reassembles SSE frames from arbitrary network chunks
//! - [`decode_uplink`] is the pure JSON/hex transform
//! - [`Subscription`] owns the background task pumping one stream

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback invoked for every decoded uplink.
pub type UplinkCallback = Arc<dyn Fn(UplinkEvent) + Send + Sync>;

/// SSE event type delivered to `onmessage`-style listeners.
const MESSAGE_EVENT: &str = "message";

/// Errors decoding a single relay event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Event is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Event is not a JSON object")]
    NotAnObject,

    #[error("Payload field is not a string")]
    PayloadNotString,

    #[error("Payload is not valid hex: {0}")]
    InvalidHex(String),
}

/// Normalized uplink event.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkEvent {
    /// Decoded payload bytes; `None` when the event carried no payload
    pub data: Option<Vec<u8>>,
    /// Every other field of the relay event, untouched
    pub metadata: Map<String, Value>,
}

impl UplinkEvent {
    /// Look up a metadata field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Decode one relay event body.
///
/// A missing or `null` `data` field stays `None`; an empty string decodes to
/// an empty payload.
pub fn decode_uplink(raw: &str) -> Result<UplinkEvent, BridgeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| BridgeError::InvalidJson(e.to_string()))?;
    let Value::Object(mut metadata) = value else {
        return Err(BridgeError::NotAnObject);
    };

    let data = match metadata.remove("data") {
        None | Some(Value::Null) => None,
        Some(Value::String(hex_payload)) => Some(
            hex::decode(hex_payload.trim())
                .map_err(|e| BridgeError::InvalidHex(e.to_string()))?,
        ),
        Some(_) => return Err(BridgeError::PayloadNotString),
    };

    Ok(UplinkEvent { data, metadata })
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
    has_data: bool,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = text.strip_suffix('\r').unwrap_or(&text[..]);

            if let Some(message) = self.process_line(line) {
                messages.push(message);
            }
        }
        messages
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            // id/retry only matter for reconnection, which the bridge never does
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;

        Some(SseMessage {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| MESSAGE_EVENT.to_string()),
            data: std::mem::take(&mut self.data),
        })
    }
}

/// Handle for one live uplink subscription.
///
/// Every `message` event is decoded and handed to the callback. An event
/// that fails [`decode_uplink`], such as one whose `data` is not valid hex,
/// is logged at `warn` and skipped. Named events other than `message` are
/// ignored.
///
/// Closing or dropping the handle aborts the reader task, which drops the
/// underlying HTTP stream. There is no reconnection.
#[derive(Debug)]
pub struct Subscription {
    label: String,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Spawn a task pumping `stream` into `callback`.
    pub fn spawn<S, B, E>(label: impl Into<String>, stream: S, callback: UplinkCallback) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let task = tokio::spawn(pump_events(label.clone(), stream, callback));
        Self { label, task }
    }

    /// Relay stream this subscription reads.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the stream has ended or the subscription was closed.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the subscription down.
    pub fn close(&self) {
        if !self.task.is_finished() {
            debug!(subscription = %self.label, "Closing uplink subscription");
        }
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump_events<S, B, E>(label: String, stream: S, callback: UplinkCallback)
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(subscription = %label, error = %e, "Uplink stream failed");
                break;
            }
        };

        for message in decoder.push(chunk.as_ref()) {
            if message.event != MESSAGE_EVENT {
                debug!(subscription = %label, event = %message.event, "Ignoring relay event");
                continue;
            }
            match decode_uplink(&message.data) {
                Ok(event) => callback(event),
                Err(e) => warn!(subscription = %label, error = %e, "Dropping undecodable uplink"),
            }
        }
    }

    debug!(subscription = %label, "Uplink stream ended");
}
