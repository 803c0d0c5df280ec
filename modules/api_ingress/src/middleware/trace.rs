//! Request span and per-request trace transaction.

use std::net::SocketAddr;

use apikit::Transaction;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tracing::field::Empty;

use super::request_id::request_id_of;

/// Client address as resolved by [`real_ip`], stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// First `X-Forwarded-For` entry, else `X-Real-IP`, else the socket address.
pub fn real_ip<B>(req: &Request<B>) -> String {
    if let Some(ip) = req.extensions().get::<ClientIp>() {
        return ip.0.clone();
    }
    let headers = req.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }
    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real {
        return ip.to_owned();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn user_agent<B>(req: &Request<B>) -> String {
    req.headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// Create trace layer with proper typing
#[allow(clippy::type_complexity)]
pub fn create_trace_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    impl Fn(&Request<Body>) -> tracing::Span + Clone,
    DefaultOnRequest,
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    (),
> {
    TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                request_id = %request_id_of(req),
                method = %req.method(),
                path = %req.uri().path(),
                ip = %real_ip(req),
                user_id = Empty,
                user_role = Empty,
                status = Empty,
                latency_ms = Empty
            )
        })
        // failures are logged by the error boundary and the access log
        .on_failure(())
}

/// Context enhancer: resolves the client IP once and, when tracing is
/// enabled, starts the request's [`Transaction`].
pub async fn enhance_context(
    State(tracing_enabled): State<bool>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = real_ip(&req);
    req.extensions_mut().insert(ClientIp(ip.clone()));

    let txn = tracing_enabled.then(|| {
        let txn = Transaction::start(format!("{} {}", req.method(), req.uri().path()));
        txn.add_attribute("http.method", req.method().as_str());
        txn.add_attribute("http.route", req.uri().path());
        txn.add_attribute("http.real_ip", ip.as_str());
        txn.add_attribute("http.user_agent", user_agent(&req));
        txn.add_attribute("request.id", request_id_of(&req));
        txn
    });
    if let Some(txn) = &txn {
        req.extensions_mut().insert(txn.clone());
    }

    let response = next.run(req).await;

    if let Some(txn) = txn {
        txn.add_attribute("http.status_code", response.status().as_u16());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().uri("/");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn forwarded_for_wins() {
        let r = req(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(real_ip(&r), "203.0.113.7");
    }

    #[test]
    fn real_ip_header_is_second_choice() {
        let r = req(&[("x-real-ip", " 198.51.100.2 ")]);
        assert_eq!(real_ip(&r), "198.51.100.2");
    }

    #[test]
    fn falls_back_to_socket_address() {
        let mut r = req(&[]);
        assert_eq!(real_ip(&r), "unknown");
        r.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 5555))));
        assert_eq!(real_ip(&r), "192.0.2.10");
    }
}
