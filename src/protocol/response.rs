//! Response mapping and the incremental response decoder.
//!
//! A [`Response`] is what every request/response operation hands back to the
//! application: a JSON object that always has a boolean `sended` flag, the
//! hub's reply fields merged in on success, and `success=false` plus an
//! `error` string on failure.

use serde::Serialize;
use serde_json::{Map, Value};

use super::{find_header_end, leading_line_breaks, Head};
use crate::constants::{HTTP_VERSION, MAX_BODY_BYTES, MAX_HEADER_BYTES};
use crate::error::HubError;

/// Result of a request/response call, as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Response(Map<String, Value>);

impl Response {
    /// Create a response holding only the `sended` flag.
    pub fn new(sended: bool) -> Self {
        let mut map = Map::new();
        map.insert("sended".to_string(), Value::Bool(sended));
        Self(map)
    }

    /// Build a successful response from the hub's decoded reply body.
    ///
    /// Object fields are merged over `sended=true`. A non-object body is kept
    /// whole under `response`.
    pub fn from_reply(reply: Value) -> Self {
        let mut response = Self::new(true);
        match reply {
            Value::Object(fields) => response.0.extend(fields),
            other => {
                response.0.insert("response".to_string(), other);
            }
        }
        response
    }

    /// Build a failed response.
    pub fn failure(sended: bool, error: &HubError) -> Self {
        let mut response = Self::new(sended);
        response.0.insert("success".to_string(), Value::Bool(false));
        response
            .0
            .insert("error".to_string(), Value::String(error.to_string()));
        response
    }

    /// Attach the raw reply text that could not be decoded.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.0.insert("response".to_string(), Value::String(raw.into()));
        self
    }

    /// Whether the request bytes were fully written to the hub.
    pub fn sended(&self) -> bool {
        self.0.get("sended").and_then(Value::as_bool).unwrap_or(false)
    }

    /// The `success` field, if the hub or the client set one.
    pub fn success(&self) -> Option<bool> {
        self.0.get("success").and_then(Value::as_bool)
    }

    /// True when the call was sent and nothing reported `success=false`.
    pub fn is_success(&self) -> bool {
        self.sended() && self.success() != Some(false)
    }

    /// Human-readable error, if any.
    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Encode a hub reply: status line, JSON headers, and the body.
///
/// This is the hub side of the exchange, used by the in-memory transport and
/// by test hubs.
pub fn encode_response(status: u16, body: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(body).expect("JSON value serialization cannot fail");
    let reason = if (200..300).contains(&status) { "OK" } else { "Error" };
    let head = format!(
        "{HTTP_VERSION} {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut buf = Vec::with_capacity(head.len() + body.len());
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Header block of a response being decoded.
#[derive(Debug, Clone)]
struct PendingHead {
    status: Option<u16>,
    content_length: Option<usize>,
    body_start: usize,
}

/// Incremental response decoder.
///
/// Feed bytes via [`ResponseDecoder::feed`] until it yields a body. The body
/// boundary is `Content-Length` when the hub sends one; otherwise the body is
/// complete once the bytes after the separator form one JSON value.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buf: Vec<u8>,
    head: Option<PendingHead>,
}

impl ResponseDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and try to complete one response.
    ///
    /// Returns `Ok(None)` while more data is needed. Bytes past the end of
    /// the completed body stay buffered.
    ///
    /// # Errors
    ///
    /// `HubError::ProtocolFormat` if the header block grows past its limit
    /// without a separator, `HubError::Decode` if the body is not JSON.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Value>, HubError> {
        self.buf.extend_from_slice(bytes);

        if self.head.is_none() {
            let skip = leading_line_breaks(&self.buf);
            self.buf.drain(..skip);

            let Some((head_len, sep_len)) = find_header_end(&self.buf) else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    return Err(HubError::ProtocolFormat);
                }
                return Ok(None);
            };

            let head = Head::parse(&self.buf[..head_len]);
            let status = parse_status(&head.start_line);
            if status.is_none() {
                log::debug!("[Codec] Unrecognized status line: {:?}", head.start_line);
            }
            let content_length = head.content_length();
            if let Some(length) = content_length {
                if length > MAX_BODY_BYTES {
                    return Err(HubError::Decode(format!(
                        "response body too large: {length} bytes (max {MAX_BODY_BYTES})"
                    )));
                }
            }
            self.head = Some(PendingHead {
                status,
                content_length,
                body_start: head_len + sep_len,
            });
        }

        let Some(head) = self.head.clone() else {
            return Ok(None);
        };

        let body = &self.buf[head.body_start..];
        let (value, consumed) = match head.content_length {
            Some(length) => {
                if body.len() < length {
                    return Ok(None); // Incomplete body, wait for more data
                }
                let value = serde_json::from_slice::<Value>(&body[..length])
                    .map_err(|e| HubError::Decode(e.to_string()))?;
                (value, length)
            }
            None => {
                let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
                match values.next() {
                    None => return Ok(None),
                    // A number running to the end of the buffer may continue in the next read
                    Some(Ok(Value::Number(_))) if values.byte_offset() == body.len() => {
                        return Ok(None);
                    }
                    Some(Ok(value)) => (value, values.byte_offset()),
                    Some(Err(e)) if e.is_eof() => {
                        if body.len() > MAX_BODY_BYTES {
                            return Err(HubError::Decode(format!(
                                "response body exceeds {MAX_BODY_BYTES} bytes"
                            )));
                        }
                        return Ok(None);
                    }
                    Some(Err(e)) => return Err(HubError::Decode(e.to_string())),
                }
            }
        };

        if let Some(status) = head.status {
            log::trace!("[Codec] Decoded response with status {status}");
        }
        self.buf.drain(..head.body_start + consumed);
        let skip = leading_line_breaks(&self.buf);
        self.buf.drain(..skip);
        self.head = None;
        Ok(Some(value))
    }

    /// Complete the response when the stream has ended.
    ///
    /// A body without `Content-Length` may end exactly at end of stream (a
    /// bare number, for instance); that body is decoded here.
    ///
    /// # Errors
    ///
    /// The error describing what was missing when no response can be built.
    pub fn finish(&mut self) -> Result<Value, HubError> {
        let Some(head) = self.head.clone() else {
            if self.buf.is_empty() {
                return Err(HubError::Transport("hub closed the connection".to_string()));
            }
            return Err(HubError::ProtocolFormat);
        };

        let body = &self.buf[head.body_start..];
        if head.content_length.is_none() {
            if let Ok(value) = serde_json::from_slice::<Value>(body) {
                self.reset();
                return Ok(value);
            }
        }

        let body = String::from_utf8_lossy(body);
        if body.trim().is_empty() {
            Err(HubError::Decode("empty response body".to_string()))
        } else {
            Err(HubError::Decode(format!("truncated response body: {}", body.trim())))
        }
    }

    /// Buffered bytes as text, for error reporting.
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    /// Drop all buffered state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.head = None;
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Parse the status code out of `HTTP/1.1 200 OK`.
fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
