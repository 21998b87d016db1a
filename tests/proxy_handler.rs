//! Proxy handler pipeline tests against in-process transports.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use dynamic_proxy::http::headers::HeaderConfig;
use dynamic_proxy::http::{ProxyHandler, RequestContext, Transport};
use dynamic_proxy::lifecycle::ShutdownCoordinator;

mod common;
use common::{route, shared_table, CannedTransport, FailingTransport, RecordingSink};

fn ctx() -> RequestContext {
    RequestContext::new("192.0.2.7:51000", false)
}

fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

fn handler_with(transport: Arc<dyn Transport>, shutdown: ShutdownCoordinator) -> (ProxyHandler, Arc<RecordingSink>) {
    let table = shared_table(vec![
        route("api", Some("api.example.com"), "/", &[("http://10.0.0.1:8080/base", 1)]),
        route("web", None, "/web", &[("http://10.0.0.2:80", 1)]),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let handler = ProxyHandler::new(table, shutdown, transport).with_metrics(sink.clone());
    (handler, sink)
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_forwards_and_streams_backend_response() {
    let transport = CannedTransport::new(StatusCode::CREATED, "made it");
    let seen = transport.seen();
    let (handler, sink) = handler_with(Arc::new(transport), ShutdownCoordinator::default());

    let response = handler
        .handle(ctx(), get("/users?page=2", "api.example.com"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "made it");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].uri.to_string(), "http://10.0.0.1:8080/base/users?page=2");
    assert_eq!(seen[0].headers["host"], "10.0.0.1:8080");
    assert_eq!(seen[0].headers["forwarded"], "for=192.0.2.7; proto=http");

    assert_eq!(sink.targets.lock().unwrap().len(), 1);
    assert_eq!(sink.requests.lock().unwrap().len(), 1);
    assert_eq!(handler.requests().count(), 1);
}

#[tokio::test]
async fn test_enrichment_settings_applied() {
    let transport = CannedTransport::new(StatusCode::OK, "");
    let seen = transport.seen();
    let (handler, _) = handler_with(Arc::new(transport), ShutdownCoordinator::default());
    let handler = handler.with_headers(HeaderConfig::new("10.9.9.9", "X-Real-IP", "X-Tls", "on").unwrap());

    let request = Request::builder()
        .uri("/web/index.html")
        .header("host", "anything.test")
        .header("x-forwarded-for", "203.0.113.1")
        .header("connection", "keep-alive")
        .body(Body::empty())
        .unwrap();
    let response = handler.handle(RequestContext::new("192.0.2.7:51000", true), request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    let headers = &seen[0].headers;
    assert_eq!(headers["x-real-ip"], "192.0.2.7");
    assert_eq!(headers["x-forwarded-for"], "203.0.113.1, 10.9.9.9");
    assert_eq!(headers["forwarded"], "for=192.0.2.7; proto=https; by=10.9.9.9");
    assert_eq!(headers["x-tls"], "on");
    assert!(headers.get("connection").is_none());
}

#[tokio::test]
async fn test_draining_rejects_without_lookup_or_metrics() {
    let transport = CannedTransport::new(StatusCode::OK, "unused");
    let seen = transport.seen();
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(5));
    let (handler, sink) = handler_with(Arc::new(transport), shutdown.clone());

    assert!(shutdown.trigger_shutdown());
    let response = handler.handle(ctx(), get("/", "api.example.com")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "shutting down");
    assert!(seen.lock().unwrap().is_empty());
    assert!(sink.targets.lock().unwrap().is_empty());
    assert_eq!(handler.requests().count(), 0);
}

#[tokio::test]
async fn test_no_route_is_404_with_empty_body() {
    let transport = CannedTransport::new(StatusCode::OK, "unused");
    let seen = transport.seen();
    let (handler, sink) = handler_with(Arc::new(transport), ShutdownCoordinator::default());

    let response = handler.handle(ctx(), get("/other", "unknown.test")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "");
    assert!(seen.lock().unwrap().is_empty());
    assert!(sink.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_remote_address_is_500() {
    let transport = CannedTransport::new(StatusCode::OK, "unused");
    let seen = transport.seen();
    let (handler, _) = handler_with(Arc::new(transport), ShutdownCoordinator::default());

    let response = handler
        .handle(RequestContext::new("garbage", false), get("/", "api.example.com"))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "cannot parse garbage");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_transport_failure_is_502_and_timed() {
    let (handler, sink) = handler_with(Arc::new(FailingTransport), ShutdownCoordinator::default());

    let response = handler.handle(ctx(), get("/", "api.example.com")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_string(response).await, "Bad Gateway");

    let targets = sink.targets.lock().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].0, "http://10.0.0.1:8080/base");
    assert_eq!(handler.requests().count(), 1);
}

#[tokio::test]
async fn test_latency_covers_backend_delay() {
    let transport = CannedTransport::new(StatusCode::OK, "slow").delayed(Duration::from_millis(50));
    let (handler, sink) = handler_with(Arc::new(transport), ShutdownCoordinator::default());

    let response = handler.handle(ctx(), get("/", "api.example.com")).await;
    assert_eq!(body_string(response).await, "slow");

    let requests = sink.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0] >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_dropped_response_still_timed() {
    let (handler, sink) = handler_with(
        Arc::new(CannedTransport::new(StatusCode::OK, "never read")),
        ShutdownCoordinator::default(),
    );

    let response = handler.handle(ctx(), get("/", "api.example.com")).await;
    assert!(sink.requests.lock().unwrap().is_empty());
    drop(response);
    assert_eq!(sink.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_forward_still_timed() {
    let transport = CannedTransport::new(StatusCode::OK, "").delayed(Duration::from_secs(1));
    let (handler, sink) = handler_with(Arc::new(transport), ShutdownCoordinator::default());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        handler.handle(ctx(), get("/", "api.example.com")),
    )
    .await;
    assert!(abandoned.is_err());

    let requests = sink.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0] >= Duration::from_millis(20));
    assert_eq!(sink.targets.lock().unwrap()[0].0, "http://10.0.0.1:8080/base");
}

#[tokio::test]
async fn test_trace_token_pins_target() {
    let transport = CannedTransport::new(StatusCode::OK, "");
    let seen = transport.seen();
    let table = shared_table(vec![route(
        "api",
        None,
        "/",
        &[("http://10.0.0.1:1", 1), ("http://10.0.0.2:1", 1), ("http://10.0.0.3:1", 1)],
    )]);
    let handler = ProxyHandler::new(table, ShutdownCoordinator::default(), Arc::new(transport));

    for _ in 0..20 {
        let request = Request::builder()
            .uri("/")
            .header("host", "x.test")
            .header("trace", "session-42")
            .body(Body::empty())
            .unwrap();
        handler.handle(ctx(), request).await;
    }

    let seen = seen.lock().unwrap();
    let first = seen[0].uri.authority().cloned();
    assert!(seen.iter().all(|r| r.uri.authority().cloned() == first));
}
