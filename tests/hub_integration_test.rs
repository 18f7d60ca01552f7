//! End-to-end tests for the hub client.
//!
//! Scripted scenarios run against the in-memory transport; the rest talk to
//! a real TCP hub from `common`.

mod common;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use common::TestHub;
use fxhub::protocol::{encode_event, encode_stream_head, RequestDecoder};
use fxhub::{CallOptions, Event, HubClient, HubConfig, MemoryConnector};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

fn memory_client(connector: &MemoryConnector) -> HubClient {
    HubClient::with_connector(HubConfig::default(), Arc::new(connector.clone()))
}

/// Hub that replays `body` to every subscription and echoes calls.
fn stream_hub(body: Vec<u8>) -> MemoryConnector {
    MemoryConnector::new(move |call| {
        if call.path() == "/sse" {
            body.clone()
        } else {
            fxhub::protocol::encode_response(200, &json!({"success": true}))
        }
    })
}

// =============================================================================
// In-memory transport
// =============================================================================

#[test]
fn test_concurrent_calls_never_interleave() {
    let hub = MemoryConnector::json(|call| json!({"echo": call.payload().get("app-id")}));
    let client = memory_client(&hub);

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let client = client.clone();
            std::thread::spawn(move || {
                let app_id = format!("app-{i}");
                let response = client.fetch_state(&app_id);
                (app_id, response)
            })
        })
        .collect();

    for thread in threads {
        let (app_id, response) = thread.join().unwrap();
        assert!(response.sended());
        assert_eq!(response.get("echo"), Some(&json!(app_id)));
    }

    // The wire transcript decodes cleanly into exactly one request per caller
    let calls = RequestDecoder::new().feed(&hub.transcript()).unwrap();
    assert_eq!(calls.len(), 16);
    let mut seen: Vec<String> = calls
        .iter()
        .map(|c| c.payload()["app-id"].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    let mut expected: Vec<String> = (0..16).map(|i| format!("app-{i}")).collect();
    expected.sort();
    assert_eq!(seen, expected);
    assert_eq!(hub.connection_count(), 1);
}

#[test]
fn test_dispatch_ignores_keep_alive() {
    let mut body = encode_stream_head();
    body.extend_from_slice(b"data: {\"app-id\":\"a1\",\"type\":\"ping\"}\n");
    body.extend_from_slice(b": keep-alive\n");
    let client = memory_client(&stream_hub(body));

    let pings = Arc::new(Mutex::new(Vec::<Event>::new()));
    let p = Arc::clone(&pings);
    client.add_listener("a1", "ping", move |event| p.lock().unwrap().push(event));
    let pongs = Arc::new(AtomicUsize::new(0));
    let q = Arc::clone(&pongs);
    client.add_listener("a1", "pong", move |_| {
        q.fetch_add(1, Ordering::SeqCst);
    });

    let summary = client.listen().unwrap();

    let pings = pings.lock().unwrap();
    assert_eq!(pings.len(), 1);
    assert_eq!(
        Value::Object(pings[0].payload().clone()),
        json!({"app-id": "a1", "type": "ping"})
    );
    assert_eq!(pongs.load(Ordering::SeqCst), 0);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.routing_misses, 0);
}

#[test]
fn test_unregistered_event_is_counted_not_delivered() {
    let mut body = encode_stream_head();
    body.extend(encode_event(&json!({"app-id": "app1", "type": "start"})));
    body.extend(encode_event(&json!({"app-id": "app1", "type": "stop"})));
    let client = memory_client(&stream_hub(body));

    let starts = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&starts);
    client.add_listener("app1", "start", move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    let summary = client.listen().unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.routing_misses, 1);
    assert_eq!(client.stream_stats(), summary);
}

#[test]
fn test_bad_events_do_not_stop_the_stream() {
    let mut body = encode_stream_head();
    body.extend_from_slice(b"data: not json\n\n");
    body.extend_from_slice(b"data: {\"app-id\":1,\"type\":\"t\"}\n\n");
    body.extend(encode_event(&json!({"app-id": "a", "type": "t"})));
    let client = memory_client(&stream_hub(body));

    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    client.add_listener("a", "t", move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let summary = client.listen().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(summary.decode_errors, 1);
    assert_eq!(summary.invalid_events, 1);
}

#[test]
fn test_listen_and_calls_use_separate_streams() {
    let hub = stream_hub(encode_stream_head()).hold_streams_open();
    let client = memory_client(&hub);

    let handle = client.listen_async().unwrap();
    // A quiet subscription does not block request/response calls
    assert!(client.fetch_state("a").is_success());
    assert_eq!(hub.connection_count(), 2);

    handle.shutdown();
    assert!(handle.join().is_some());
}

// =============================================================================
// Real TCP hub
// =============================================================================

#[test]
fn test_tcp_state_round_trip() {
    let hub = TestHub::start();
    let client = hub.client();

    let stored = client
        .set_state("app1", json!({"volume": 7}), CallOptions::sync())
        .wait()
        .unwrap();
    assert!(stored.sended());
    assert!(stored.is_success());

    let fetched = client.fetch_state("app1");
    assert!(fetched.is_success());
    assert_eq!(fetched.get("state"), Some(&json!({"volume": 7})));

    let missing = client.fetch_state("nobody");
    assert_eq!(missing.get("state"), Some(&Value::Null));
    client.close();
}

#[test]
fn test_tcp_background_store_then_fetch() {
    let hub = TestHub::start();
    let client = hub.client();

    let (tx, rx) = mpsc::channel();
    let reply = client.set_state(
        "app2",
        json!([1, 2, 3]),
        CallOptions::background().on_complete(move |r| {
            tx.send(r.is_success()).unwrap();
        }),
    );
    assert!(reply.is_pending());
    assert!(rx.recv_timeout(WAIT).unwrap());
    assert!(reply.wait().unwrap().is_success());

    assert_eq!(client.fetch_state("app2").get("state"), Some(&json!([1, 2, 3])));
}

#[test]
fn test_tcp_concurrent_clients_get_their_own_state() {
    let hub = TestHub::start();
    let client = hub.client();

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            std::thread::spawn(move || {
                let app_id = format!("app-{i}");
                let stored = client
                    .set_state(&app_id, json!(i), CallOptions::sync())
                    .wait()
                    .unwrap();
                assert!(stored.is_success());
                client.fetch_state(&app_id).get("state").cloned()
            })
        })
        .collect();

    for (i, thread) in threads.into_iter().enumerate() {
        assert_eq!(thread.join().unwrap(), Some(json!(i)));
    }
    assert_eq!(hub.request_count(), 16);
}

#[test]
fn test_tcp_sent_event_reaches_listener() {
    let hub = TestHub::start();
    let listener_client = hub.client();
    let sender = hub.client();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    listener_client.add_listener("app1", "start", move |event| {
        tx.lock().unwrap().send(event).unwrap();
    });
    let handle = listener_client.listen_async().unwrap();
    assert!(hub.wait_for_subscribers(1));

    let sent = sender
        .send_event_with_data("app1", "start", json!({"level": 3}), CallOptions::sync())
        .wait()
        .unwrap();
    assert!(sent.is_success());

    let event = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(event.app_id(), "app1");
    assert_eq!(event.event_type(), "start");
    assert_eq!(event.data(), Some(&json!({"level": 3})));
    assert!(event.get("time-emitted").is_some());

    // Unregistered events are dropped
    sender.emit("app1", "stop").wait();
    hub.push(&json!({"app-id": "app1", "type": "start", "n": 2}));
    let second = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(second.get("n"), Some(&json!(2)));

    handle.shutdown();
    let summary = handle.join().unwrap();
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.routing_misses, 1);
}

#[test]
fn test_tcp_close_stops_listen() {
    let hub = TestHub::start();
    let client = hub.client();

    let handle = client.listen_async().unwrap();
    assert!(hub.wait_for_subscribers(1));

    client.close();
    assert!(handle.join().is_some());
    assert!(!client.fetch_state("a").sended());
}

#[test]
fn test_tcp_unreachable_hub_is_unsent() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = HubClient::connect_to(&format!("127.0.0.1:{port}")).unwrap();

    let response = client.fetch_state("app1");
    assert!(!response.sended());
    assert_eq!(response.success(), Some(false));
    assert!(response.error().unwrap().starts_with("Transport error"));
    assert!(client.listen_async().is_err());
}
