// Request handlers
// The server only needs something that turns a request into a response

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::time::Instant;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>>;
}

/// Answers `GET /health` and 404s everything else
pub struct HealthHandler {
    started_at: Instant,
}

impl HealthHandler {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    fn health_body(&self) -> String {
        serde_json::json!({
            "status": "healthy",
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
        })
        .to_string()
    }
}

impl Default for HealthHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for HealthHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/health") => json_response(StatusCode::OK, self.health_body()),
            _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
        }
    }
}

pub fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

pub fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}
