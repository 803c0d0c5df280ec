//! Outermost error boundary.
//!
//! Everything a handler returns as an error passes through
//! [`error_response`] exactly once: it is classified into an [`AppError`],
//! logged with its original cause, and rendered. Panics take the same exit
//! through [`panic_response`].

use std::any::Any;

use apikit_errors::AppError;
use axum::response::{IntoResponse, Response};

use crate::telemetry::Transaction;

/// Classify an error that escaped a handler. Already-classified errors pass
/// through untouched.
pub fn classify(err: &anyhow::Error) -> AppError {
    apikit_db::sqlerr::handle_error(err)
}

/// Log `cause` against the classified error: `error` for 5xx, `warn` for 4xx.
pub fn log_error(app: &AppError, cause: &anyhow::Error) {
    let status = app.status().as_u16();
    if app.is_server_error() {
        let detail = format!("{cause:#}");
        tracing::error!(
            status,
            error_code = %app.code(),
            error = %detail,
            "request failed"
        );
    } else {
        tracing::warn!(
            status,
            error_code = %app.code(),
            error = %app.message(),
            "request failed"
        );
    }
}

/// Classify, log and render. The transaction, when present, gets the raw
/// cause; the client only ever sees the classified message.
pub fn error_response(err: anyhow::Error, txn: Option<&Transaction>) -> Response {
    let app = classify(&err);
    log_error(&app, &err);
    if let Some(txn) = txn {
        txn.add_attribute("http.status_code", app.status().as_u16());
    }
    app.into_response()
}

/// Handler for `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "handler panicked");
    AppError::internal().into_response()
}
