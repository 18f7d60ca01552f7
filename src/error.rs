//! Error taxonomy for hub communication.
//!
//! Request/response failures never escape as `Err` from the facade; they are
//! folded into the returned [`Response`](crate::protocol::Response) as
//! `success=false` plus an `error` string. Event-stream failures are counted
//! and logged by the stream loop. This enum is the shared vocabulary for both.

/// Errors that can occur while talking to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Connect, write, or read failed on the underlying socket.
    Transport(String),
    /// The response ended before the header/body separator was seen.
    ProtocolFormat,
    /// A body or event payload was not valid JSON.
    Decode(String),
    /// A pushed event was missing `app-id`/`type` or had the wrong type.
    InvalidEvent(String),
    /// The connection was closed explicitly.
    Closed,
    /// The hub address or configuration is invalid.
    Config(String),
}

impl HubError {
    /// Wrap an I/O error with a short description of what was being done.
    pub(crate) fn transport(action: &str, err: &std::io::Error) -> Self {
        Self::Transport(format!("{action}: {err}"))
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::ProtocolFormat => write!(f, "Error in the response HTTP format."),
            Self::Decode(msg) => write!(f, "Couldn't parse the response as a JSON: {msg}"),
            Self::InvalidEvent(msg) => write!(f, "Invalid event: {msg}"),
            Self::Closed => write!(f, "Connection closed"),
            Self::Config(msg) => write!(f, "Invalid hub configuration: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}
