//! Protocol and client constants for fxhub.
//!
//! Centralizes the hub address defaults, wire-protocol literals, and buffer
//! sizes so the codec, transport, and facade agree on them.
//!
//! # Categories
//!
//! - **Address**: default hub location
//! - **Paths**: method paths understood by the hub
//! - **Wire**: literal strings of the HTTP-like framing
//! - **Buffers**: read buffer sizes and limits

// ============================================================================
// Address
// ============================================================================

/// Default hub host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default hub port.
pub const DEFAULT_PORT: u16 = 10001;

// ============================================================================
// Paths
// ============================================================================

/// Method path for emitting an application event.
pub const PATH_SEND: &str = "send";

/// Method path for storing an application's state.
pub const PATH_SET_STATE: &str = "set-state";

/// Method path for fetching an application's state.
pub const PATH_STATE: &str = "state";

/// Path of the event-stream subscription.
pub const PATH_SSE: &str = "/sse";

// ============================================================================
// Wire
// ============================================================================

/// Protocol version written on every request line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Prefix of event-stream lines that carry a JSON payload.
pub const SSE_DATA_PREFIX: &str = "data:";

/// Payload key naming the application an event or state belongs to.
pub const KEY_APP_ID: &str = "app-id";

/// Payload key naming the event type.
pub const KEY_TYPE: &str = "type";

// ============================================================================
// Buffers
// ============================================================================

/// Read buffer size for request/response sockets.
pub const RESPONSE_READ_BUFFER: usize = 4096;

/// Read buffer size for the event-stream socket.
pub const STREAM_READ_BUFFER: usize = 8192;

/// Maximum bytes buffered while waiting for a response header block.
///
/// A hub that never sends a blank line would otherwise grow the buffer
/// without bound.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Maximum response body size (16 MB).
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Maximum length of a single event-stream line (16 MB).
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
