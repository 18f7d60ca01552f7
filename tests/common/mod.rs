//! In-test hub over real TCP.
//!
//! Implements just enough of the hub for end-to-end tests: `/send`,
//! `/set-state`, `/state`, and `GET /sse` subscriptions that receive every
//! sent event as a `data:` line.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fxhub::protocol::{encode_event, encode_response, encode_stream_head, Call, Method, RequestDecoder};
use fxhub::{HubClient, HubConfig};
use serde_json::{json, Map, Value};

#[derive(Default)]
struct HubState {
    states: Mutex<HashMap<String, Value>>,
    subscribers: Mutex<Vec<TcpStream>>,
    requests: AtomicUsize,
}

/// A hub listening on an ephemeral localhost port.
pub struct TestHub {
    port: u16,
    state: Arc<HubState>,
}

impl TestHub {
    /// Bind and start accepting connections.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(HubState::default());

        let accept_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("test-hub-accept".to_owned())
            .spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let conn_state = Arc::clone(&accept_state);
                    std::thread::spawn(move || serve(stream, &conn_state));
                }
            })
            .unwrap();

        Self { port, state }
    }

    /// Address as `host:port`.
    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Client config pointing at this hub, with a generous timeout.
    pub fn config(&self) -> HubConfig {
        let mut config = HubConfig::from_addr(&self.addr()).unwrap();
        config.io_timeout_secs = Some(10);
        config
    }

    /// A fresh TCP client for this hub.
    pub fn client(&self) -> HubClient {
        HubClient::new(self.config())
    }

    /// Number of POST requests served.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Number of open `/sse` subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().unwrap().len()
    }

    /// Poll until at least `n` subscribers are connected.
    pub fn wait_for_subscribers(&self, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.subscriber_count() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Push raw bytes to every subscriber.
    pub fn push_raw(&self, bytes: &[u8]) {
        broadcast(&self.state, bytes);
    }

    /// Push one event to every subscriber.
    pub fn push(&self, payload: &Value) {
        broadcast(&self.state, &encode_event(payload));
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn broadcast(state: &HubState, bytes: &[u8]) {
    let mut subscribers = state.subscribers.lock().unwrap();
    subscribers.retain_mut(|s| s.write_all(bytes).and_then(|()| s.flush()).is_ok());
}

fn serve(mut stream: TcpStream, state: &HubState) {
    let mut decoder = RequestDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(calls) = decoder.feed(&buf[..n]) else {
            return;
        };
        for call in calls {
            if call.method() == Method::Get {
                if stream.write_all(&encode_stream_head()).is_err() {
                    return;
                }
                if let Ok(clone) = stream.try_clone() {
                    state.subscribers.lock().unwrap().push(clone);
                }
                continue;
            }
            state.requests.fetch_add(1, Ordering::SeqCst);
            let reply = handle(&call, state);
            if stream.write_all(&encode_response(200, &reply)).is_err() {
                return;
            }
        }
    }
}

fn handle(call: &Call, state: &HubState) -> Value {
    let payload = call.payload();
    let Some(app_id) = payload.get("app-id").and_then(Value::as_str) else {
        return json!({"success": false, "message": "missing app-id"});
    };

    match call.method_name() {
        "send" => {
            let Some(event_type) = payload.get("type").and_then(Value::as_str) else {
                return json!({"success": false, "message": "missing type"});
            };
            let mut event = Map::new();
            event.insert("app-id".to_string(), json!(app_id));
            event.insert("type".to_string(), json!(event_type));
            if let Some(data) = payload.get("data") {
                event.insert("data".to_string(), data.clone());
            }
            event.insert("time-emitted".to_string(), json!(now_millis()));
            event.insert("time-sended".to_string(), json!(now_millis()));
            broadcast(state, &encode_event(&Value::Object(event)));
            json!({"success": true})
        }
        "set-state" => {
            let Some(new_state) = payload.get("state") else {
                return json!({"success": false, "message": "missing state"});
            };
            state
                .states
                .lock()
                .unwrap()
                .insert(app_id.to_string(), new_state.clone());
            json!({"success": true})
        }
        "state" => {
            let current = state
                .states
                .lock()
                .unwrap()
                .get(app_id)
                .cloned()
                .unwrap_or(Value::Null);
            json!({"success": true, "state": current})
        }
        other => json!({"success": false, "message": format!("unknown command /{other}")}),
    }
}
