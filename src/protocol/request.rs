//! Outbound call encoding and the hub-side request decoder.
//!
//! [`Call::encode`] produces the exact bytes written to the hub.
//! [`RequestDecoder`] is the inverse, used by the in-memory transport and by
//! test hubs to reconstruct calls from a captured byte stream.

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

use super::{find_header_end, leading_line_breaks, Head};
use crate::constants::{HTTP_VERSION, MAX_BODY_BYTES, MAX_HEADER_BYTES, PATH_SSE};

/// Request method. The hub only understands these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// A request/response call carrying a JSON body.
    Post,
    /// The event-stream subscription.
    Get,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Get => "GET",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "POST" => Some(Self::Post),
            "GET" => Some(Self::Get),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound call: method, target path, and JSON object payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    method: Method,
    path: String,
    payload: Map<String, Value>,
}

impl Call {
    /// Build a POST call for a hub method (`send`, `set-state`, `state`, ...).
    ///
    /// A leading `/` is added to `method_path` if missing.
    pub fn post(method_path: &str, payload: Map<String, Value>) -> Self {
        Self {
            method: Method::Post,
            path: normalize_path(method_path),
            payload,
        }
    }

    /// Build the event-stream subscription request.
    pub fn subscribe() -> Self {
        Self {
            method: Method::Get,
            path: PATH_SSE.to_string(),
            payload: Map::new(),
        }
    }

    /// Request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Target path including the leading `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hub method name: the path without its leading `/`.
    pub fn method_name(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// JSON payload (empty for GET).
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Consume the call and return its payload.
    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }

    /// Encode into wire bytes addressed to `host`.
    ///
    /// POST carries `Content-Type` and a `Content-Length` equal to the byte
    /// length of the serialized payload. GET carries only `Accept`.
    pub fn encode(&self, host: &str) -> Vec<u8> {
        match self.method {
            Method::Post => {
                let body = serde_json::to_vec(&self.payload)
                    .expect("JSON object serialization cannot fail");
                let head = format!(
                    "POST {} {}\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                    self.path,
                    HTTP_VERSION,
                    host,
                    body.len()
                );
                let mut buf = Vec::with_capacity(head.len() + body.len());
                buf.extend_from_slice(head.as_bytes());
                buf.extend_from_slice(&body);
                buf
            }
            Method::Get => format!(
                "GET {} {}\r\nHost: {}\r\nAccept: text/event-stream\r\n\r\n",
                self.path, HTTP_VERSION, host
            )
            .into_bytes(),
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Incremental request decoder (hub side).
///
/// Feed bytes via [`RequestDecoder::feed`] and extract complete calls.
/// POST bodies are bounded by `Content-Length`, which every request produced
/// by [`Call::encode`] carries.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    buf: Vec<u8>,
}

impl RequestDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete calls.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown method, a POST without
    /// `Content-Length`, an oversized message, or a body that is not a JSON
    /// object.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Call>> {
        self.buf.extend_from_slice(bytes);
        let mut calls = Vec::new();

        loop {
            let skip = leading_line_breaks(&self.buf);
            self.buf.drain(..skip);

            let Some((head_len, sep_len)) = find_header_end(&self.buf) else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    bail!("request header block exceeds {MAX_HEADER_BYTES} bytes");
                }
                break;
            };

            let head = Head::parse(&self.buf[..head_len]);
            let mut parts = head.start_line.split_whitespace();
            let method_str = parts.next().unwrap_or_default();
            let method = Method::parse(method_str)
                .ok_or_else(|| anyhow!("unsupported request method: {method_str:?}"))?;
            let path = parts
                .next()
                .ok_or_else(|| anyhow!("request line has no path: {:?}", head.start_line))?
                .to_string();

            let body_start = head_len + sep_len;
            let payload = match method {
                Method::Get => {
                    self.buf.drain(..body_start);
                    Map::new()
                }
                Method::Post => {
                    let length = head
                        .content_length()
                        .ok_or_else(|| anyhow!("POST {path} without Content-Length"))?;
                    if length > MAX_BODY_BYTES {
                        bail!("request body too large: {length} bytes (max {MAX_BODY_BYTES})");
                    }
                    if self.buf.len() < body_start + length {
                        break; // Incomplete body, wait for more data
                    }
                    let body: Value = serde_json::from_slice(&self.buf[body_start..body_start + length])
                        .map_err(|e| anyhow!("invalid JSON body for {path}: {e}"))?;
                    self.buf.drain(..body_start + length);
                    match body {
                        Value::Object(map) => map,
                        other => bail!("body for {path} is not a JSON object: {other}"),
                    }
                }
            };

            calls.push(Call {
                method,
                path,
                payload,
            });
        }

        Ok(calls)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
