//! FxHub client - exchange state and events with an always-on hub process.
//!
//! The hub speaks a small HTTP-like protocol over plain TCP: request/response
//! calls carry JSON bodies, and a long-lived `GET /sse` subscription pushes
//! `data:` lines that are routed to listeners by application id and event
//! type.
//!
//! # Architecture
//!
//! - **Protocol** - wire encoding and incremental decoders, no I/O
//! - **Transport** - opens byte streams to the hub (TCP or in-memory)
//! - **Connection** - one serialized request/response stream
//! - **Stream** - the subscription read/dispatch loop on its own stream
//! - **Registry** - `(app-id, type)` to listener map
//! - **HubClient** - the facade tying it together
//!
//! # Example
//!
//! ```no_run
//! use fxhub::{CallOptions, HubClient, HubConfig};
//! use serde_json::json;
//!
//! let client = HubClient::new(HubConfig::default());
//! client.add_listener("app1", "start", |event| {
//!     println!("started: {:?}", event.data());
//! });
//! let handle = client.listen_async().expect("subscribe");
//!
//! client.store_state("app1", json!({"volume": 7}));
//! let state = client.fetch_state("app1");
//! println!("{}", state.into_value());
//!
//! client.send_event("app1", "start", CallOptions::sync());
//! handle.shutdown();
//! ```
//!
//! # Modules
//!
//! - [`protocol`] - request, response and event-stream codecs
//! - [`transport`] - [`Connector`] implementations
//! - [`connection`] - serialized request/response exchanges
//! - [`stream`] - event-stream subscription and dispatch
//! - [`registry`] - listener registry
//! - [`hub`] - [`HubClient`] facade
//! - [`config`] - hub address and timeouts

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use config::HubConfig;
pub use connection::{CallError, Connection};
pub use error::HubError;
pub use hub::{CallHandle, CallKind, CallOptions, Completion, HubClient, Reply};
pub use protocol::{Call, Event, Response};
pub use registry::{Listener, ListenerKey, ListenerRegistry};
pub use stream::{ListenHandle, StreamStats, StreamSummary};
pub use transport::{Connector, HubStream, MemoryConnector, TcpConnector};
