//! HTTP-like wire protocol spoken with the hub.
//!
//! The hub understands a small, fixed subset of HTTP/1.1 over a raw stream
//! socket. Nothing beyond what is listed here is emitted or expected.
//!
//! # Request/response
//!
//! ```text
//! POST /<method> HTTP/1.1\r\n
//! Host: <host>\r\n
//! Content-Type: application/json\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <json-body>
//! ```
//!
//! The reply is a header block terminated by a blank line, followed by one
//! JSON object. `Content-Length` bounds the body when present; otherwise the
//! body ends where the first complete JSON value ends.
//!
//! # Event stream
//!
//! ```text
//! GET /sse HTTP/1.1\r\n
//! Host: <host>\r\n
//! Accept: text/event-stream\r\n
//! \r\n
//! ```
//!
//! The hub then pushes newline-delimited text. Only lines beginning with
//! `data:` carry a payload: a JSON object with at least string `app-id` and
//! `type` fields. Everything else (status line, headers, `: keep-alive`
//! comments, blank lines) is ignored.
//!
//! # Modules
//!
//! - [`request`] - [`Call`] encoding and the hub-side request decoder
//! - [`response`] - [`Response`] mapping and the incremental response decoder
//! - [`event_stream`] - line decoder and [`Event`] validation

// Rust guideline compliant 2026-02

pub mod event_stream;
pub mod request;
pub mod response;

pub use event_stream::{classify_line, encode_event, encode_stream_head, Event, LineDecoder, LineOutcome};
pub use request::{Call, Method, RequestDecoder};
pub use response::{encode_response, Response, ResponseDecoder};

/// Locate the header/body separator in `buf`.
///
/// Accepts the conventional `\r\n\r\n` and, as a lenient fallback, a bare
/// `\n\n`; whichever appears first wins. Returns `(head_len, separator_len)`.
pub(crate) fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find_subslice(buf, b"\r\n\r\n").map(|pos| (pos, 4));
    let lf = find_subslice(buf, b"\n\n").map(|pos| (pos, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parsed start line and headers of a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Head {
    /// First line, e.g. `HTTP/1.1 200 OK` or `POST /send HTTP/1.1`.
    pub start_line: String,
    /// Header name/value pairs in wire order.
    pub headers: Vec<(String, String)>,
}

impl Head {
    /// Parse a header block (without the trailing separator).
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));

        let start_line = lines.next().unwrap_or_default().trim().to_string();
        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            start_line,
            headers,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.parse().ok()
    }
}

/// Number of leading `\r`/`\n` bytes, skipped between consecutive messages.
pub(crate) fn leading_line_breaks(buf: &[u8]) -> usize {
    buf.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count()
}
