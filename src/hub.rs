//! The application-facing hub client.
//!
//! [`HubClient`] owns one request/response [`Connection`], the listener
//! registry, and the event-stream counters. It is cheap to clone; clones
//! share everything.
//!
//! # Calls
//!
//! | Operation | Path | Payload | Default mode |
//! |-----------|------|---------|--------------|
//! | [`HubClient::send_event`] | `send` | `{app-id, type[, data]}` | background |
//! | [`HubClient::set_state`] | `set-state` | `{app-id, state}` | background |
//! | [`HubClient::get_state`] | `state` | `{app-id}` | sync |
//!
//! Every call yields a [`Response`]; failures are reported inside it
//! (`success=false`, `error`), never as a panic or an `Err`.
//!
//! # Events
//!
//! Register listeners with [`HubClient::add_listener`], then run the stream
//! with [`HubClient::listen`] (blocking) or [`HubClient::listen_async`].

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::{Map, Value};

use crate::config::HubConfig;
use crate::connection::Connection;
use crate::constants::{KEY_APP_ID, KEY_TYPE, PATH_SEND, PATH_SET_STATE, PATH_STATE};
use crate::error::HubError;
use crate::protocol::{Call, Event, Response};
use crate::registry::ListenerRegistry;
use crate::stream::{self, ListenHandle, StreamCloser, StreamStats, StreamSummary};
use crate::transport::{Connector, TcpConnector};

/// Completion callback for a call. Invoked exactly once with the final
/// response.
pub type Completion = Box<dyn FnOnce(&Response) + Send + 'static>;

/// The three request/response operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `send`: emit an event through the hub.
    SendEvent,
    /// `set-state`: store an application's state.
    SetState,
    /// `state`: fetch an application's state.
    GetState,
}

impl CallKind {
    /// Hub method path for this operation.
    pub fn path(self) -> &'static str {
        match self {
            Self::SendEvent => PATH_SEND,
            Self::SetState => PATH_SET_STATE,
            Self::GetState => PATH_STATE,
        }
    }
}

/// How a call runs and what to do when it completes.
#[derive(Default)]
pub struct CallOptions {
    background: bool,
    on_complete: Option<Completion>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("background", &self.background)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl CallOptions {
    /// Block the caller until the response is available.
    pub fn sync() -> Self {
        Self::default()
    }

    /// Run the call on its own thread and return immediately.
    pub fn background() -> Self {
        Self {
            background: true,
            on_complete: None,
        }
    }

    /// Conventional mode for `kind`: sends and state writes run in the
    /// background, state reads block.
    pub fn default_for(kind: CallKind) -> Self {
        match kind {
            CallKind::SendEvent | CallKind::SetState => Self::background(),
            CallKind::GetState => Self::sync(),
        }
    }

    /// Invoke `callback` with the final response.
    ///
    /// Sync calls run it on the calling thread before returning; background
    /// calls run it on the call's thread.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Whether the call runs in the background.
    pub fn is_background(&self) -> bool {
        self.background
    }
}

/// Outcome of starting a call.
#[derive(Debug)]
pub enum Reply {
    /// A sync call's response.
    Ready(Response),
    /// A background call still running (or finished but not yet joined).
    Pending(CallHandle),
}

impl Reply {
    /// Get the response, waiting for a background call if needed.
    ///
    /// Returns `None` if a background call's completion callback panicked.
    pub fn wait(self) -> Option<Response> {
        match self {
            Self::Ready(response) => Some(response),
            Self::Pending(handle) => handle.join(),
        }
    }

    /// Whether this is a background call.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Handle to a call running on a background thread.
#[derive(Debug)]
pub struct CallHandle {
    thread: JoinHandle<Response>,
}

impl CallHandle {
    /// Whether the call and its completion callback have finished.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the call to finish and return its response.
    ///
    /// Returns `None` if the completion callback panicked.
    pub fn join(self) -> Option<Response> {
        self.thread.join().ok()
    }
}

struct ClientInner {
    config: HubConfig,
    connector: Arc<dyn Connector>,
    connection: Connection,
    registry: Arc<ListenerRegistry>,
    stats: Arc<StreamStats>,
    streams: Mutex<Vec<Arc<StreamCloser>>>,
}

/// Client for one hub.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("hub", &self.inner.connector.describe())
            .field("connection", &self.inner.connection)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Client for the hub at `config`'s address, over TCP.
    ///
    /// Nothing is dialed until the first call.
    pub fn new(config: HubConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.host.clone(), config.port));
        Self::with_connector(config, connector)
    }

    /// Client for the hub at `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// `HubError::Config` if the address is invalid.
    pub fn connect_to(addr: &str) -> Result<Self, HubError> {
        Ok(Self::new(HubConfig::from_addr(addr)?))
    }

    /// Client over a custom transport. Only the timeout is taken from
    /// `config`; the connector decides where streams go.
    pub fn with_connector(config: HubConfig, connector: Arc<dyn Connector>) -> Self {
        let connection = Connection::new(Arc::clone(&connector), config.io_timeout());
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                connection,
                registry: Arc::new(ListenerRegistry::new()),
                stats: Arc::new(StreamStats::default()),
                streams: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Open the request/response connection now rather than on first use.
    ///
    /// # Errors
    ///
    /// `HubError::Transport` if the hub cannot be reached.
    pub fn connect(&self) -> Result<(), HubError> {
        self.inner.connection.connect()
    }

    /// Send one call and wait for its response.
    ///
    /// `method` is the hub method path (`send`, `set-state`, `state`, ...).
    pub fn send_http(&self, method: &str, payload: Map<String, Value>) -> Response {
        let call = Call::post(method, payload);
        match self.inner.connection.call(&call) {
            Ok(reply) => {
                log::debug!("[FxHub] {} succeeded", call.path());
                Response::from_reply(reply)
            }
            Err(e) => e.into_response(),
        }
    }

    /// Emit an event `(app_id, event_type)` through the hub.
    pub fn send_event(&self, app_id: &str, event_type: &str, options: CallOptions) -> Reply {
        self.start(CallKind::SendEvent, event_payload(app_id, event_type), options)
    }

    /// Emit an event carrying `data`; the hub forwards it to listeners.
    pub fn send_event_with_data(
        &self,
        app_id: &str,
        event_type: &str,
        data: Value,
        options: CallOptions,
    ) -> Reply {
        let mut payload = event_payload(app_id, event_type);
        payload.insert("data".to_string(), data);
        self.start(CallKind::SendEvent, payload, options)
    }

    /// Store `state` for `app_id`.
    pub fn set_state(&self, app_id: &str, state: Value, options: CallOptions) -> Reply {
        let mut payload = app_payload(app_id);
        payload.insert("state".to_string(), state);
        self.start(CallKind::SetState, payload, options)
    }

    /// Fetch the stored state for `app_id`.
    pub fn get_state(&self, app_id: &str, options: CallOptions) -> Reply {
        self.start(CallKind::GetState, app_payload(app_id), options)
    }

    /// [`HubClient::send_event`] in its default (background) mode.
    pub fn emit(&self, app_id: &str, event_type: &str) -> Reply {
        self.send_event(app_id, event_type, CallOptions::default_for(CallKind::SendEvent))
    }

    /// [`HubClient::set_state`] in its default (background) mode.
    pub fn store_state(&self, app_id: &str, state: Value) -> Reply {
        self.set_state(app_id, state, CallOptions::default_for(CallKind::SetState))
    }

    /// [`HubClient::get_state`] in its default (sync) mode.
    pub fn fetch_state(&self, app_id: &str) -> Response {
        self.send_http(PATH_STATE, app_payload(app_id))
    }

    fn start(&self, kind: CallKind, payload: Map<String, Value>, options: CallOptions) -> Reply {
        let CallOptions {
            background,
            on_complete,
        } = options;

        if !background {
            let response = self.send_http(kind.path(), payload);
            if let Some(callback) = on_complete {
                callback(&response);
            }
            return Reply::Ready(response);
        }

        // Shared so the callback can still run if the thread never starts
        let completion = Arc::new(Mutex::new(on_complete));
        let thread_completion = Arc::clone(&completion);
        let client = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("fxhub-{}", kind.path()))
            .spawn(move || {
                let response = client.send_http(kind.path(), payload);
                if let Some(callback) = take_completion(&thread_completion) {
                    callback(&response);
                }
                response
            });

        match spawned {
            Ok(thread) => Reply::Pending(CallHandle { thread }),
            Err(e) => {
                log::warn!("[FxHub] Could not start background {}: {e}", kind.path());
                let response =
                    Response::failure(false, &HubError::transport("spawn call thread", &e));
                if let Some(callback) = take_completion(&completion) {
                    callback(&response);
                }
                Reply::Ready(response)
            }
        }
    }

    /// Register `listener` for events `(app_id, event_type)`.
    ///
    /// Replaces any existing listener for the same pair; returns true if one
    /// was replaced.
    pub fn add_listener<F>(&self, app_id: &str, event_type: &str, listener: F) -> bool
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner.registry.register(app_id, event_type, listener)
    }

    /// Remove the listener for `(app_id, event_type)`. Returns true if one
    /// was registered.
    pub fn remove_listener(&self, app_id: &str, event_type: &str) -> bool {
        self.inner.registry.remove(app_id, event_type)
    }

    /// The listener registry shared with the event stream.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    /// Subscribe and dispatch events on the calling thread until the stream
    /// ends or [`HubClient::close`] is called.
    ///
    /// # Errors
    ///
    /// `HubError::Transport` if the subscription cannot be opened,
    /// `HubError::Closed` after [`HubClient::close`].
    pub fn listen(&self) -> Result<StreamSummary, HubError> {
        let subscription = self.open_subscription()?;
        Ok(stream::run(
            subscription,
            &self.inner.registry,
            &self.inner.stats,
        ))
    }

    /// Subscribe and dispatch events on a background thread.
    ///
    /// The subscription request has been written when this returns.
    ///
    /// # Errors
    ///
    /// `HubError::Transport` if the subscription cannot be opened or the
    /// thread cannot be started, `HubError::Closed` after
    /// [`HubClient::close`].
    pub fn listen_async(&self) -> Result<ListenHandle, HubError> {
        let subscription = self.open_subscription()?;
        stream::spawn(
            subscription,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.stats),
        )
    }

    fn open_subscription(&self) -> Result<stream::Subscription, HubError> {
        if self.inner.connection.is_closed() {
            return Err(HubError::Closed);
        }
        let subscription = stream::subscribe(self.inner.connector.as_ref())?;

        let closer = subscription.closer();
        {
            let mut streams = self.inner.streams.lock().expect("streams mutex poisoned");
            streams.retain(|c| !c.is_finished());
            streams.push(Arc::clone(&closer));
        }
        // close() may have run while the subscription was opening
        if self.inner.connection.is_closed() {
            closer.close();
            return Err(HubError::Closed);
        }
        Ok(subscription)
    }

    /// Cumulative event-stream counters across every listen on this client.
    pub fn stream_stats(&self) -> StreamSummary {
        self.inner.stats.snapshot()
    }

    /// Close the request/response connection and stop every running listen.
    ///
    /// Later calls report `HubError::Closed`.
    pub fn close(&self) {
        self.inner.connection.close();
        let streams: Vec<Arc<StreamCloser>> = self
            .inner
            .streams
            .lock()
            .expect("streams mutex poisoned")
            .drain(..)
            .collect();
        for closer in &streams {
            closer.close();
        }
        log::info!(
            "[FxHub] Client closed ({} event stream(s) stopped)",
            streams.len()
        );
    }
}

fn take_completion(slot: &Mutex<Option<Completion>>) -> Option<Completion> {
    slot.lock().expect("completion mutex poisoned").take()
}

fn app_payload(app_id: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(KEY_APP_ID.to_string(), Value::String(app_id.to_string()));
    payload
}

fn event_payload(app_id: &str, event_type: &str) -> Map<String, Value> {
    let mut payload = app_payload(app_id);
    payload.insert(KEY_TYPE.to_string(), Value::String(event_type.to_string()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn client_for(connector: &MemoryConnector) -> HubClient {
        HubClient::with_connector(HubConfig::default(), Arc::new(connector.clone()))
    }

    fn echo_hub() -> MemoryConnector {
        MemoryConnector::json(|call| {
            json!({"success": true, "path": call.path(), "payload": call.payload()})
        })
    }

    #[test]
    fn test_default_modes() {
        assert!(CallOptions::default_for(CallKind::SendEvent).is_background());
        assert!(CallOptions::default_for(CallKind::SetState).is_background());
        assert!(!CallOptions::default_for(CallKind::GetState).is_background());
    }

    #[test]
    fn test_sync_call_merges_reply() {
        let hub = echo_hub();
        let client = client_for(&hub);

        let reply = client.get_state("app1", CallOptions::sync());
        assert!(!reply.is_pending());
        let response = reply.wait().unwrap();
        assert!(response.sended());
        assert!(response.is_success());
        assert_eq!(response.get("path"), Some(&json!("/state")));
        assert_eq!(response.get("payload"), Some(&json!({"app-id": "app1"})));
    }

    #[test]
    fn test_payload_shapes() {
        let hub = echo_hub();
        let client = client_for(&hub);

        let sent = client
            .send_event_with_data("a", "t", json!([1, 2]), CallOptions::sync())
            .wait()
            .unwrap();
        assert_eq!(
            sent.get("payload"),
            Some(&json!({"app-id": "a", "type": "t", "data": [1, 2]}))
        );

        let stored = client
            .set_state("a", json!({"on": true}), CallOptions::sync())
            .wait()
            .unwrap();
        assert_eq!(stored.get("path"), Some(&json!("/set-state")));
        assert_eq!(
            stored.get("payload"),
            Some(&json!({"app-id": "a", "state": {"on": true}}))
        );
    }

    #[test]
    fn test_sync_completion_runs_before_return() {
        let client = client_for(&echo_hub());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let reply = client.send_event(
            "a",
            "t",
            CallOptions::sync().on_complete(move |response| {
                assert!(response.sended());
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reply.wait().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_background_completion_runs_once() {
        let client = client_for(&echo_hub());
        let (tx, rx) = mpsc::channel();
        let reply = client.set_state(
            "a",
            json!(1),
            CallOptions::background().on_complete(move |response| {
                tx.send(response.clone()).unwrap();
            }),
        );
        assert!(reply.is_pending());

        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let joined = reply.wait().unwrap();
        assert_eq!(delivered, joined);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_unreachable_hub_reports_unsent() {
        let client = client_for(&MemoryConnector::refusing());
        let (tx, rx) = mpsc::channel();
        client.emit("a", "t");
        let reply = client.send_event(
            "a",
            "t",
            CallOptions::background().on_complete(move |response| {
                tx.send(response.clone()).unwrap();
            }),
        );
        let response = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!response.sended());
        assert_eq!(response.success(), Some(false));
        assert!(response.error().unwrap().contains("refused"));
        assert_eq!(reply.wait(), Some(response));
    }

    #[test]
    fn test_hub_failure_body_is_passed_through() {
        let hub = MemoryConnector::json(|_| json!({"success": false, "error": "no such app"}));
        let response = client_for(&hub).fetch_state("ghost");
        assert!(response.sended());
        assert!(!response.is_success());
        assert_eq!(response.error(), Some("no such app"));
    }

    #[test]
    fn test_close_rejects_calls_and_listens() {
        let client = client_for(&echo_hub());
        assert!(client.fetch_state("a").is_success());
        client.close();

        let response = client.fetch_state("a");
        assert!(!response.sended());
        assert_eq!(response.error(), Some(HubError::Closed.to_string().as_str()));
        assert_eq!(client.listen().err(), Some(HubError::Closed));
    }

    #[test]
    fn test_listeners_round_trip() {
        let client = client_for(&echo_hub());
        assert!(!client.add_listener("a", "t", |_| {}));
        assert!(client.add_listener("a", "t", |_| {}));
        assert_eq!(client.registry().len(), 1);
        assert!(client.remove_listener("a", "t"));
        assert!(client.registry().is_empty());
    }
}
