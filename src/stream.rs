//! Event-stream subscription and dispatch loop.
//!
//! The subscription runs on its own stream, separate from the
//! request/response connection, so a long-lived listen never blocks calls.
//!
//! ```text
//! subscribe() ──GET /sse──► hub
//!                            │  data: {...}\n\n
//!                            ▼
//! run() ── LineDecoder ── classify_line ──► ListenerRegistry::dispatch
//! ```
//!
//! The loop ends when the hub closes the stream, a read fails, or
//! [`ListenHandle::shutdown`] is called. Bad lines are counted and skipped;
//! they never end the loop.

// Rust guideline compliant 2026-02

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::constants::STREAM_READ_BUFFER;
use crate::error::HubError;
use crate::protocol::{classify_line, Call, LineDecoder, LineOutcome};
use crate::registry::ListenerRegistry;
use crate::transport::{Connector, HubStream};

/// Per-run counts of what the stream carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines read, of any kind.
    pub lines: u64,
    /// Events handed to a listener.
    pub delivered: u64,
    /// Status, header, comment and blank lines.
    pub ignored: u64,
    /// `data:` lines that were not JSON, or oversized lines.
    pub decode_errors: u64,
    /// `data:` lines without valid `app-id`/`type`.
    pub invalid_events: u64,
    /// Valid events with no registered listener.
    pub routing_misses: u64,
}

/// Cumulative counters shared across every listen on one client.
#[derive(Debug, Default)]
pub struct StreamStats {
    lines: AtomicU64,
    delivered: AtomicU64,
    ignored: AtomicU64,
    decode_errors: AtomicU64,
    invalid_events: AtomicU64,
    routing_misses: AtomicU64,
}

impl StreamStats {
    /// Read all counters.
    pub fn snapshot(&self) -> StreamSummary {
        StreamSummary {
            lines: self.lines.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            routing_misses: self.routing_misses.load(Ordering::Relaxed),
        }
    }

    fn add(&self, counter: &AtomicU64, local: &mut u64) {
        counter.fetch_add(1, Ordering::Relaxed);
        *local += 1;
    }
}

/// Lets another thread end a running stream loop.
#[derive(Default)]
pub(crate) struct StreamCloser {
    requested: AtomicBool,
    finished: AtomicBool,
    stream: Mutex<Option<Box<dyn HubStream>>>,
}

impl StreamCloser {
    /// Ask the loop to stop and unblock its pending read.
    pub(crate) fn close(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let stream = self.stream.lock().expect("stream closer mutex poisoned").take();
        if let Some(stream) = stream {
            if let Err(e) = stream.shutdown() {
                log::debug!("[EventStream] Shutdown failed: {e}");
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.stream.lock().expect("stream closer mutex poisoned").take();
    }
}

/// An open subscription whose request has been written.
pub(crate) struct Subscription {
    stream: Box<dyn HubStream>,
    closer: Arc<StreamCloser>,
    hub: String,
}

impl Subscription {
    pub(crate) fn closer(&self) -> Arc<StreamCloser> {
        Arc::clone(&self.closer)
    }
}

/// Open a dedicated stream and send the subscription request.
///
/// # Errors
///
/// `HubError::Transport` if the hub cannot be reached or the request cannot
/// be written.
pub(crate) fn subscribe(connector: &dyn Connector) -> Result<Subscription, HubError> {
    let hub = connector.describe();
    let mut stream = connector
        .connect()
        .map_err(|e| HubError::transport(&format!("connect to {hub}"), &e))?;
    // Quiet periods are normal on the event stream
    stream
        .set_io_timeout(None)
        .map_err(|e| HubError::transport("configure timeout", &e))?;
    stream
        .write_all(&Call::subscribe().encode(connector.host()))
        .and_then(|()| stream.flush())
        .map_err(|e| HubError::transport("write subscription", &e))?;

    let closer = Arc::new(StreamCloser::default());
    let handle = stream
        .try_clone_stream()
        .map_err(|e| HubError::transport("clone event stream", &e))?;
    *closer.stream.lock().expect("stream closer mutex poisoned") = Some(handle);

    log::info!("[EventStream] Subscribed to {hub}");
    Ok(Subscription {
        stream,
        closer,
        hub,
    })
}

/// Read and dispatch until the stream ends. Blocks the calling thread.
pub(crate) fn run(
    subscription: Subscription,
    registry: &ListenerRegistry,
    stats: &StreamStats,
) -> StreamSummary {
    let Subscription {
        mut stream,
        closer,
        hub,
    } = subscription;
    let mut summary = StreamSummary::default();
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; STREAM_READ_BUFFER];

    while !closer.is_requested() {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                if !closer.is_requested() {
                    log::info!("[EventStream] {hub} closed the event stream");
                }
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if closer.is_requested() {
                    log::debug!("[EventStream] Read ended after shutdown: {e}");
                } else {
                    log::warn!("[EventStream] Read error from {hub}: {e}");
                }
                break;
            }
        };

        match decoder.feed(&buf[..n]) {
            Ok(lines) => {
                for line in lines {
                    handle_line(&line, registry, stats, &mut summary);
                }
            }
            Err(e) => {
                log::warn!("[EventStream] Dropping oversized line: {e}");
                stats.add(&stats.decode_errors, &mut summary.decode_errors);
            }
        }
    }

    if !closer.is_requested() {
        if let Some(tail) = decoder.finish() {
            handle_line(&tail, registry, stats, &mut summary);
        }
    }
    closer.mark_finished();

    log::info!(
        "[EventStream] Stream ended: {} delivered, {} unrouted, {} malformed, {} invalid",
        summary.delivered,
        summary.routing_misses,
        summary.decode_errors,
        summary.invalid_events
    );
    summary
}

fn handle_line(
    line: &str,
    registry: &ListenerRegistry,
    stats: &StreamStats,
    summary: &mut StreamSummary,
) {
    stats.add(&stats.lines, &mut summary.lines);
    match classify_line(line) {
        LineOutcome::Event(event) => {
            let key = format!("{}/{}", event.app_id(), event.event_type());
            if registry.dispatch(event) {
                log::trace!("[EventStream] Delivered {key}");
                stats.add(&stats.delivered, &mut summary.delivered);
            } else {
                log::debug!("[EventStream] No listener for {key}");
                stats.add(&stats.routing_misses, &mut summary.routing_misses);
            }
        }
        LineOutcome::Ignored => {
            stats.add(&stats.ignored, &mut summary.ignored);
        }
        LineOutcome::Malformed(e) => {
            log::warn!("[EventStream] Dropping malformed event: {e}");
            stats.add(&stats.decode_errors, &mut summary.decode_errors);
        }
        LineOutcome::Invalid(e) => {
            log::warn!("[EventStream] Dropping event: {e}");
            stats.add(&stats.invalid_events, &mut summary.invalid_events);
        }
    }
}

/// Handle to a stream loop running on a background thread.
pub struct ListenHandle {
    closer: Arc<StreamCloser>,
    thread: JoinHandle<StreamSummary>,
}

impl std::fmt::Debug for ListenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenHandle")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl ListenHandle {
    /// Stop the loop. Returns immediately; use [`ListenHandle::join`] to wait.
    pub fn shutdown(&self) {
        self.closer.close();
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.closer.is_finished() || self.thread.is_finished()
    }

    /// Wait for the loop to exit and return its summary.
    ///
    /// Returns `None` if a listener panicked and took the thread down.
    pub fn join(self) -> Option<StreamSummary> {
        self.thread.join().ok()
    }
}

/// Run the loop for `subscription` on a named background thread.
///
/// # Errors
///
/// `HubError::Transport` if the thread cannot be spawned; the subscription
/// is shut down in that case.
pub(crate) fn spawn(
    subscription: Subscription,
    registry: Arc<ListenerRegistry>,
    stats: Arc<StreamStats>,
) -> Result<ListenHandle, HubError> {
    let closer = subscription.closer();
    let thread = std::thread::Builder::new()
        .name("fxhub-events".to_owned())
        .spawn(move || run(subscription, &registry, &stats));
    match thread {
        Ok(thread) => Ok(ListenHandle { closer, thread }),
        Err(e) => {
            closer.close();
            Err(HubError::transport("spawn event stream thread", &e))
        }
    }
}
