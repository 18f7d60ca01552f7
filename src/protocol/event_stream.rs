//! Event-stream line decoding and event validation.
//!
//! The stream is read as newline-delimited text. [`LineDecoder`] reassembles
//! lines across reads; [`classify_line`] decides what each line is worth.

use serde_json::{Map, Value};

use crate::constants::{HTTP_VERSION, KEY_APP_ID, KEY_TYPE, MAX_LINE_BYTES, SSE_DATA_PREFIX};
use crate::error::HubError;

/// A pushed event: routed by `app-id` + `type`, carrying the full payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    app_id: String,
    event_type: String,
    payload: Map<String, Value>,
}

impl Event {
    /// Create an event with just its routing fields.
    pub fn new(app_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        let app_id = app_id.into();
        let event_type = event_type.into();
        let mut payload = Map::new();
        payload.insert(KEY_APP_ID.to_string(), Value::String(app_id.clone()));
        payload.insert(KEY_TYPE.to_string(), Value::String(event_type.clone()));
        Self {
            app_id,
            event_type,
            payload,
        }
    }

    /// Add or replace a payload field. Routing fields cannot be overwritten.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != KEY_APP_ID && key != KEY_TYPE {
            self.payload.insert(key, value);
        }
        self
    }

    /// Validate a decoded payload into an event.
    ///
    /// # Errors
    ///
    /// `HubError::InvalidEvent` if the value is not an object or lacks a
    /// string `app-id` or `type`.
    pub fn from_value(value: Value) -> Result<Self, HubError> {
        let payload = match value {
            Value::Object(payload) => payload,
            other => {
                return Err(HubError::InvalidEvent(format!(
                    "payload is not a JSON object: {other}"
                )))
            }
        };
        let app_id = string_field(&payload, KEY_APP_ID)?;
        let event_type = string_field(&payload, KEY_TYPE)?;
        Ok(Self {
            app_id,
            event_type,
            payload,
        })
    }

    /// Application the event belongs to.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Event type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The hub-provided `data` field, if any.
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Look up any payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// The full parsed payload, routing fields included.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Consume the event and return its payload.
    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Result<String, HubError> {
    match payload.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(HubError::InvalidEvent(format!(
            "`{key}` must be a string, got {other}"
        ))),
        None => Err(HubError::InvalidEvent(format!("missing `{key}`"))),
    }
}

/// What a single event-stream line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// A `data:` line carrying a valid event.
    Event(Event),
    /// Status line, header, comment, or blank line.
    Ignored,
    /// A `data:` line whose payload was not JSON.
    Malformed(HubError),
    /// A `data:` line whose JSON lacked valid routing fields.
    Invalid(HubError),
}

/// Classify one event-stream line (without its line terminator).
pub fn classify_line(line: &str) -> LineOutcome {
    let Some(rest) = line.strip_prefix(SSE_DATA_PREFIX) else {
        return LineOutcome::Ignored;
    };
    let value = match serde_json::from_str::<Value>(rest.trim()) {
        Ok(value) => value,
        Err(e) => return LineOutcome::Malformed(HubError::Decode(e.to_string())),
    };
    match Event::from_value(value) {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => LineOutcome::Invalid(e),
    }
}

/// Incremental line decoder.
///
/// Splits on `\n`, strips a trailing `\r`, and buffers the partial tail.
/// The tail is only scanned once, so a long line arriving in many small
/// reads stays linear.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    // Prefix of `buf` already known to hold no '\n'
    scanned: usize,
}

impl LineDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete lines.
    ///
    /// # Errors
    ///
    /// `HubError::Decode` if a single line grows past its size limit; the
    /// buffered partial line is discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, HubError> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let line = &self.buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            self.scanned = 0;
            return Err(HubError::Decode(format!(
                "event-stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }

        Ok(lines)
    }

    /// Take the unterminated tail left when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&tail).trim_end_matches('\r').to_string())
    }
}

/// Encode the hub's reply head for a subscription.
pub fn encode_stream_head() -> Vec<u8> {
    format!(
        "{HTTP_VERSION} 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n"
    )
    .into_bytes()
}

/// Encode one pushed event as a `data:` record followed by a blank line.
pub fn encode_event(payload: &Value) -> Vec<u8> {
    let json = serde_json::to_string(payload).expect("JSON value serialization cannot fail");
    format!("{SSE_DATA_PREFIX} {json}\n\n").into_bytes()
}
