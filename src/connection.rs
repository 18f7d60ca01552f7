//! Request/response connection to the hub.
//!
//! One long-lived stream carries every request/response call. The stream is
//! opened lazily on first use and guarded by a single mutex that is held for
//! the whole exchange: request write, then response read. Concurrent callers
//! therefore never interleave bytes on the wire, and each caller reads the
//! response to its own request.
//!
//! # Failure handling
//!
//! ```text
//! call() ──connect?──► write request ──► read response ──► Ok(body)
//!             │              │                 │
//!             ▼              ▼                 ▼
//!       sended=false    sended=false      sended=true
//!                            └──── stream discarded ────┘
//! ```
//!
//! After any failed exchange the stream is dropped, since leftover bytes
//! would desynchronize the next caller. The next call opens a fresh stream.
//! A failed call is never retried.

// Rust guideline compliant 2026-02

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::constants::RESPONSE_READ_BUFFER;
use crate::error::HubError;
use crate::protocol::{Call, Response, ResponseDecoder};
use crate::transport::{Connector, HubStream};

/// A failed request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    /// Whether the request bytes were fully written before the failure.
    pub sended: bool,
    /// What went wrong.
    pub error: HubError,
    /// Reply text that could not be decoded, if any arrived.
    pub raw: Option<String>,
}

impl CallError {
    fn unsent(error: HubError) -> Self {
        Self {
            sended: false,
            error,
            raw: None,
        }
    }

    /// Convert into the application-facing response map.
    pub fn into_response(self) -> Response {
        let response = Response::failure(self.sended, &self.error);
        match self.raw {
            Some(raw) => response.with_raw(raw),
            None => response,
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (sended={})", self.error, self.sended)
    }
}

impl std::error::Error for CallError {}

#[derive(Default)]
struct ConnectionState {
    stream: Option<Box<dyn HubStream>>,
    decoder: ResponseDecoder,
    closed: bool,
}

impl ConnectionState {
    fn discard(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                log::debug!("[Connection] Shutdown of discarded stream failed: {e}");
            }
        }
        self.decoder.reset();
    }
}

/// Serialized request/response connection.
pub struct Connection {
    connector: Arc<dyn Connector>,
    io_timeout: Option<Duration>,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("hub", &self.connector.describe())
            .field("io_timeout", &self.io_timeout)
            .field(
                "connected",
                &self.state.try_lock().ok().map(|s| s.stream.is_some()),
            )
            .finish()
    }
}

impl Connection {
    /// Create an unconnected connection. Nothing is dialed until first use.
    pub fn new(connector: Arc<dyn Connector>, io_timeout: Option<Duration>) -> Self {
        Self {
            connector,
            io_timeout,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Open the stream now if it is not already open.
    ///
    /// # Errors
    ///
    /// `HubError::Transport` if the hub cannot be reached, `HubError::Closed`
    /// after [`Connection::close`].
    pub fn connect(&self) -> Result<(), HubError> {
        let mut state = self.state.lock().expect("connection mutex poisoned");
        self.ensure_connected(&mut state)
    }

    /// Whether a stream is currently open.
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .expect("connection mutex poisoned")
            .stream
            .is_some()
    }

    /// Whether [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("connection mutex poisoned").closed
    }

    /// Perform one exchange: write `call`, then read and decode its reply.
    ///
    /// The connection lock is held from before the write until the reply is
    /// fully read.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] carrying whether the request was sent.
    pub fn call(&self, call: &Call) -> Result<Value, CallError> {
        let mut state = self.state.lock().expect("connection mutex poisoned");
        self.ensure_connected(&mut state).map_err(CallError::unsent)?;

        let bytes = call.encode(self.connector.host());
        let ConnectionState {
            stream, decoder, ..
        } = &mut *state;
        let Some(stream) = stream.as_mut() else {
            return Err(CallError::unsent(HubError::Transport(
                "no open stream".to_string(),
            )));
        };

        if let Err(e) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
            let error = HubError::transport("write request", &e);
            log::warn!("[Connection] {} {} not sent: {error}", call.method(), call.path());
            state.discard();
            return Err(CallError::unsent(error));
        }
        log::debug!(
            "[Connection] Sent {} {} ({} bytes)",
            call.method(),
            call.path(),
            bytes.len()
        );

        match read_response(&mut **stream, decoder) {
            Ok(value) => Ok(value),
            Err(error) => {
                let raw = match error {
                    HubError::Decode(_) | HubError::ProtocolFormat => {
                        Some(decoder.raw_text()).filter(|raw| !raw.trim().is_empty())
                    }
                    _ => None,
                };
                log::warn!("[Connection] {} {} failed: {error}", call.method(), call.path());
                state.discard();
                Err(CallError {
                    sended: true,
                    error,
                    raw,
                })
            }
        }
    }

    /// Shut the stream down. Later calls fail with `HubError::Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("connection mutex poisoned");
        if !state.closed {
            state.discard();
            state.closed = true;
            log::info!("[Connection] Closed connection to {}", self.connector.describe());
        }
    }

    fn ensure_connected(&self, state: &mut ConnectionState) -> Result<(), HubError> {
        if state.closed {
            return Err(HubError::Closed);
        }
        if state.stream.is_some() {
            return Ok(());
        }

        let hub = self.connector.describe();
        let stream = self
            .connector
            .connect()
            .map_err(|e| HubError::transport(&format!("connect to {hub}"), &e))?;
        stream
            .set_io_timeout(self.io_timeout)
            .map_err(|e| HubError::transport("configure timeout", &e))?;
        state.decoder.reset();
        state.stream = Some(stream);
        log::info!("[Connection] Connected to {hub}");
        Ok(())
    }
}

/// Read until the decoder completes one response.
fn read_response(
    stream: &mut dyn HubStream,
    decoder: &mut ResponseDecoder,
) -> Result<Value, HubError> {
    let mut buf = [0u8; RESPONSE_READ_BUFFER];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HubError::transport("read response", &e)),
        };
        if n == 0 {
            return decoder.finish();
        }
        if let Some(value) = decoder.feed(&buf[..n])? {
            return Ok(value);
        }
    }
}
