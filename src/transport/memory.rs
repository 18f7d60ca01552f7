//! Scripted in-process hub.
//!
//! Every stream opened by a [`MemoryConnector`] decodes the bytes written to
//! it with [`RequestDecoder`], hands each complete [`Call`] to the handler,
//! and queues whatever bytes the handler returns for the client to read.
//! All written bytes are also appended to a shared transcript so tests can
//! check that concurrent callers never interleave on the wire.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{Connector, HubStream};
use crate::protocol::{encode_response, Call, RequestDecoder};

type Handler = dyn Fn(&Call) -> Vec<u8> + Send + Sync;

/// Connector backed by an in-process scripted hub.
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
}

struct MemoryHub {
    host: String,
    handler: Box<Handler>,
    refusing: AtomicBool,
    failing_writes: AtomicBool,
    hold_open: AtomicBool,
    connections: AtomicUsize,
    transcript: Mutex<Vec<u8>>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("host", &self.hub.host)
            .field("refusing", &self.hub.refusing.load(Ordering::Relaxed))
            .field("connections", &self.hub.connections.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryConnector {
    /// Hub that answers each call with the raw bytes `handler` returns.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            hub: Arc::new(MemoryHub {
                host: "memory".to_string(),
                handler: Box::new(handler),
                refusing: AtomicBool::new(false),
                failing_writes: AtomicBool::new(false),
                hold_open: AtomicBool::new(false),
                connections: AtomicUsize::new(0),
                transcript: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Hub that answers each call with a `200` JSON reply built by `handler`.
    pub fn json<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> Value + Send + Sync + 'static,
    {
        Self::new(move |call| encode_response(200, &handler(call)))
    }

    /// Hub that refuses every connection attempt.
    pub fn refusing() -> Self {
        let connector = Self::new(|_| Vec::new());
        connector.set_refusing(true);
        connector
    }

    /// Toggle whether new connections are refused.
    pub fn set_refusing(&self, refusing: bool) {
        self.hub.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Toggle whether writes on open streams fail with `BrokenPipe`.
    ///
    /// Connecting still succeeds, so this reaches the write path.
    pub fn set_failing_writes(&self, failing: bool) {
        self.hub.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Keep drained streams open until shut down instead of reporting EOF.
    ///
    /// Mirrors a long-lived event stream that goes quiet.
    pub fn hold_streams_open(self) -> Self {
        self.hub.hold_open.store(true, Ordering::SeqCst);
        self
    }

    /// All bytes written by clients, across every stream, in write order.
    pub fn transcript(&self) -> Vec<u8> {
        self.hub
            .transcript
            .lock()
            .expect("transcript mutex poisoned")
            .clone()
    }

    /// Number of streams opened so far.
    pub fn connection_count(&self) -> usize {
        self.hub.connections.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> io::Result<Box<dyn HubStream>> {
        if self.hub.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory hub refused the connection",
            ));
        }
        self.hub.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStream {
            hub: Arc::clone(&self.hub),
            shared: Arc::new(Shared::default()),
        }))
    }

    fn host(&self) -> &str {
        &self.hub.host
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<StreamState>,
    readable: Condvar,
}

#[derive(Default)]
struct StreamState {
    decoder: RequestDecoder,
    inbound: VecDeque<u8>,
    closed: bool,
}

/// One client stream to the memory hub. Clones share the same state.
struct MemoryStream {
    hub: Arc<MemoryHub>,
    shared: Arc<Shared>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock().expect("stream mutex poisoned");
        loop {
            if !state.inbound.is_empty() {
                let n = buf.len().min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed || !self.hub.hold_open.load(Ordering::SeqCst) {
                return Ok(0);
            }
            state = self
                .shared
                .readable
                .wait(state)
                .expect("stream mutex poisoned");
        }
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock().expect("stream mutex poisoned");
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream shut down"));
        }
        if self.hub.failing_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory hub dropped the write"));
        }
        self.hub
            .transcript
            .lock()
            .expect("transcript mutex poisoned")
            .extend_from_slice(buf);

        let calls = state
            .decoder
            .feed(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        for call in &calls {
            let reply = (self.hub.handler)(call);
            state.inbound.extend(reply);
        }
        self.shared.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HubStream for MemoryStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn HubStream>> {
        Ok(Box::new(MemoryStream {
            hub: Arc::clone(&self.hub),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn shutdown(&self) -> io::Result<()> {
        let mut state = self.shared.state.lock().expect("stream mutex poisoned");
        state.closed = true;
        state.inbound.clear();
        self.shared.readable.notify_all();
        Ok(())
    }

    fn set_io_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}
