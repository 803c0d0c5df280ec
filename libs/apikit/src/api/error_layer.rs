//! Centralized error mapping for Axum
//!
//! Responses produced by the error boundary already have the JSON error
//! shape, and handlers may mark a custom error body as final with
//! [`apikit_errors::mark_rendered`]. Everything else that fails (unknown route, wrong method, body too
//! large, timeout) is produced by the framework or tower layers with a
//! plain-text body; this middleware rewrites those so clients see a single
//! error format.

use apikit_errors::{is_rendered, AppError};
use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Middleware function that provides centralized error mapping
pub async fn error_mapping_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    map_response(response)
}

fn map_response(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_rendered(&response) {
        return response;
    }

    tracing::debug!(status = status.as_u16(), "rewriting framework error response");

    let (parts, _body) = response.into_parts();
    let mut rendered = framework_error(status).into_response();

    // keep headers like Allow / Retry-After / X-Request-ID from the original
    let headers = rendered.headers_mut();
    for (name, value) in parts.headers.iter() {
        if name == header::CONTENT_TYPE || name == header::CONTENT_LENGTH {
            continue;
        }
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    rendered
}

/// Error for a status produced outside the pipeline.
pub fn framework_error(status: StatusCode) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::not_found("Route not found"),
        StatusCode::REQUEST_TIMEOUT => AppError::new(status, "Request timed out"),
        StatusCode::PAYLOAD_TOO_LARGE => AppError::new(status, "Request body too large"),
        // the reason phrase only; the original body may carry internals
        s => AppError::from_status(s),
    }
}
