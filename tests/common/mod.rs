//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode, Uri};
use dynamic_proxy::http::transport::{ResponseFuture, Transport, TransportError};
use dynamic_proxy::observability::MetricsSink;
use dynamic_proxy::routing::{RouteDef, RoutingTable, SharedTable, Target, TargetDef};
use dynamic_proxy::observability::TimerRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a backend on an ephemeral port that answers every request with `f(raw_request_head)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let (status, body) = f(head).await;
                let status_text = match status {
                    200 => "200 OK",
                    201 => "201 Created",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// What a test transport saw.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Transport answering every request with a fixed status and body after `delay`.
pub struct CannedTransport {
    status: StatusCode,
    body: &'static str,
    delay: Duration,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl CannedTransport {
    pub fn new(status: StatusCode, body: &'static str) -> Self {
        Self {
            status,
            body,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<SeenRequest>>> {
        Arc::clone(&self.seen)
    }
}

impl Transport for CannedTransport {
    fn send(&self, request: Request<Body>) -> ResponseFuture {
        self.seen.lock().unwrap().push(SeenRequest {
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });
        let (status, body, delay) = (self.status, self.body, self.delay);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap())
        })
    }
}

/// Transport that fails every request.
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn send(&self, _request: Request<Body>) -> ResponseFuture {
        Box::pin(async { Err(TransportError::other("connection refused")) })
    }
}

/// Sink keeping every sample it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub targets: Mutex<Vec<(String, Duration)>>,
    pub requests: Mutex<Vec<Duration>>,
}

impl MetricsSink for RecordingSink {
    fn record_target(&self, target: &Target, elapsed: Duration) {
        self.targets
            .lock()
            .unwrap()
            .push((target.url().to_string(), elapsed));
    }

    fn record_request(&self, elapsed: Duration) {
        self.requests.lock().unwrap().push(elapsed);
    }
}

/// Route definition helper: `host` of `None` matches any host.
pub fn route(service: &str, host: Option<&str>, path: &str, targets: &[(&str, u32)]) -> RouteDef {
    RouteDef {
        service: service.to_string(),
        host: host.map(str::to_string),
        path: path.to_string(),
        targets: targets
            .iter()
            .map(|(url, weight)| TargetDef {
                url: url.to_string(),
                weight: *weight,
            })
            .collect(),
    }
}

/// Shared table built from `defs`.
pub fn shared_table(defs: Vec<RouteDef>) -> Arc<SharedTable> {
    let table = RoutingTable::build(defs, &TimerRegistry::new()).unwrap();
    Arc::new(SharedTable::new(table))
}
