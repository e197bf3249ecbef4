use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

/// Seconds spent handling the request, set on every response.
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Records one activity line per request and stamps the processing time.
pub async fn activity_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    let elapsed_ms = elapsed.as_millis() as u64;
    if response.status().is_server_error() {
        warn!(target: "activity", %method, %path, status, elapsed_ms, "request failed");
    } else {
        info!(target: "activity", %method, %path, status, elapsed_ms, "request handled");
    }

    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", elapsed.as_secs_f64())) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    response
}
