//! Tests for the transport adapters
//!
//! # Test Coverage
//!
//! - Gateway adapter: environment map in, `Status:` header block out
//! - Malformed or oversized gateway input answered with `400 Bad Request`
//! - `http` adapter round trip and failsafe status mapping
//! - `tiny_http` server end to end over a real socket

mod common;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use common::*;
use http::StatusCode;
use railyard::collaborators::{Controller, Route, RouteTable};
use railyard::dispatcher::DispatcherPool;
use railyard::failsafe::CapturedSink;
use railyard::server::{GatewayAdapter, GatewayEnv, HttpAdapter, HttpServer};
use railyard::static_files::{StaticFiles, StaticFilesController};

fn env(pairs: &[(&str, &str)]) -> GatewayEnv {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn pool(log: &EventLog, controller: Arc<dyn Controller>) -> Arc<DispatcherPool> {
    DispatcherPool::builder(Arc::new(RecordingRouter {
        log: log.clone(),
        controller: Some(controller),
    }))
    .persistence(Arc::new(RecordingPersistence { log: log.clone() }))
    .diagnostics(Arc::new(CapturedSink::new()))
    .build()
}

#[test]
fn test_gateway_serves_request() {
    let log = EventLog::new();
    let adapter = GatewayAdapter::new(pool(
        &log,
        Arc::new(OkController {
            log: log.clone(),
            body: "hi",
        }),
    ));
    let out = adapter.serve(
        &env(&[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/hi")]),
        &mut io::empty(),
        Vec::new(),
    );
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("Status: 200 OK\r\n"));
    assert!(out.contains("Content-Type: text/plain\r\n"));
    assert!(out.ends_with("\r\n\r\nhi"));
    assert_eq!(log.count("clear_active_connections"), 1);
}

#[test]
fn test_gateway_test_requests_skip_checkin() {
    let log = EventLog::new();
    let adapter = GatewayAdapter::new(pool(
        &log,
        Arc::new(OkController {
            log: log.clone(),
            body: "hi",
        }),
    ))
    .test_requests(true);
    adapter.serve(&env(&[("REQUEST_METHOD", "GET")]), &mut io::empty(), Vec::new());
    assert_eq!(log.count("process"), 1);
    assert_eq!(log.count("clear_active_connections"), 0);
}

#[test]
fn test_gateway_rejects_malformed_environment() {
    let log = EventLog::new();
    let adapter = GatewayAdapter::new(pool(
        &log,
        Arc::new(OkController {
            log: log.clone(),
            body: "hi",
        }),
    ));
    let out = adapter.serve(
        &env(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "50")]),
        &mut &b"short"[..],
        Vec::new(),
    );
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("Status: 400 Bad Request\r\n"));
    assert!(out.ends_with("<html><body><h1>400 Bad Request</h1></body></html>"));
    assert!(log.events().is_empty());
}

#[test]
fn test_gateway_rejects_oversized_content_length() {
    let log = EventLog::new();
    let adapter = GatewayAdapter::new(pool(
        &log,
        Arc::new(OkController {
            log: log.clone(),
            body: "hi",
        }),
    ));
    let out = adapter.serve(
        &env(&[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", "100000000000000"),
        ]),
        &mut &b"{}"[..],
        Vec::new(),
    );
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("Status: 400 Bad Request\r\n"));
    assert!(log.events().is_empty());
}

#[test]
fn test_gateway_json_request_failure_answers_in_json() {
    let log = EventLog::new();
    let adapter = GatewayAdapter::new(pool(
        &log,
        Arc::new(FailingController {
            log: log.clone(),
            rescue: false,
        }),
    ));
    let out = adapter.serve(
        &env(&[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", "2"),
        ]),
        &mut &b"{}"[..],
        Vec::new(),
    );
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("Status: 400 Bad Request\r\n"));
    assert!(out.contains("Content-Type: application/json\r\n"));
    let body = out.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(
        json["error"],
        "Bad Request.  Could not parse request body sent as application/json"
    );
}

#[test]
fn test_http_adapter_round_trip() {
    let log = EventLog::new();
    let adapter = HttpAdapter::new(pool(
        &log,
        Arc::new(OkController {
            log: log.clone(),
            body: "pong",
        }),
    ));
    let req = http::Request::builder()
        .uri("/ping")
        .body(Vec::new())
        .unwrap();
    let res = adapter.call(req);
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body(), b"pong");
    assert_eq!(res.headers()["content-type"], "text/plain");
    assert!(res.headers().get("status").is_none());
}

#[test]
fn test_http_adapter_failsafe_status() {
    let log = EventLog::new();
    let adapter = HttpAdapter::new(pool(
        &log,
        Arc::new(FailingController {
            log: log.clone(),
            rescue: false,
        }),
    ));
    let res = adapter.call(http::Request::builder().uri("/").body(Vec::new()).unwrap());
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers()["content-type"], "text/html");

    let rejected = adapter.reject_malformed("truncated request line");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_http_server_serves_static_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>Welcome</h1>").unwrap();
    let files = StaticFilesController::new(StaticFiles::new(dir.path()));
    let routes = RouteTable::new(vec![Route::prefix(None, "/", Arc::new(files))]);
    let pool = DispatcherPool::builder(Arc::new(routes)).build();

    let handle = HttpServer::new(pool).workers(2).start("127.0.0.1:0").unwrap();
    handle.wait_ready().unwrap();

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains("<h1>Welcome</h1>"));

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .write_all(b"GET /nope.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    assert!(raw.starts_with("HTTP/1.1 404"));

    handle.stop();
}
