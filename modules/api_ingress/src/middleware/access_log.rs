use std::time::Instant;

use apikit::Identity;
use axum::{extract::Request, http::header, middleware::Next, response::Response};

use super::request_id::request_id_of;
use super::trace::{real_ip, user_agent};

macro_rules! access_event {
    ($level:expr, $e:expr, $status:expr, $latency:expr, $user_id:expr) => {
        tracing::event!(
            $level,
            request_id = %$e.request_id,
            user_id = %$user_id,
            latency = ?$latency,
            latency_ms = $latency.as_millis() as u64,
            status = $status,
            method = %$e.method,
            uri = %$e.uri,
            host = %$e.host,
            ip = %$e.ip,
            user_agent = %$e.user_agent,
            "API"
        )
    };
}

struct Entry {
    request_id: String,
    method: String,
    uri: String,
    host: String,
    ip: String,
    user_agent: String,
}

/// One "API" line per request; level follows the response status.
pub async fn access_log(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let entry = Entry {
        request_id: request_id_of(&req),
        method: req.method().to_string(),
        uri: req.uri().to_string(),
        host: req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned(),
        ip: real_ip(&req),
        user_agent: user_agent(&req),
    };

    let response = next.run(req).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    let user_id = response
        .extensions()
        .get::<Identity>()
        .map(|i| i.subject.as_str())
        .unwrap_or_default();

    let span = tracing::Span::current();
    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    if status >= 500 {
        access_event!(tracing::Level::ERROR, entry, status, latency, user_id);
    } else if status >= 400 {
        access_event!(tracing::Level::WARN, entry, status, latency, user_id);
    } else {
        access_event!(tracing::Level::INFO, entry, status, latency, user_id);
    }
    response
}
