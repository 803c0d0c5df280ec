//! Generic request pipeline.
//!
//! An [`Endpoint`] wraps a business handler of the shape
//! `async fn(state, RequestContext, Req) -> anyhow::Result<Res>` together with
//! a [`ResponseWriter`] for `Res`, and implements axum's `Handler`, so it is
//! registered like any other handler:
//!
//! ```ignore
//! Router::new()
//!     .route("/users", post(Endpoint::json(StatusCode::CREATED, create_user)))
//!     .route("/users/{id}", delete(Endpoint::no_content(delete_user)))
//!     .route("/users/export", get(Endpoint::file("users.csv", "text/csv", export_users)))
//!     .with_state(deps);
//! ```
//!
//! Per request the steps run strictly in order: bind and validate `Req`,
//! call the handler, let the writer build the response. A failed step ends
//! the request through the error boundary; the handler never runs on
//! invalid input and the writer never runs after a handler error.
//!
//! Binding: `GET`, `DELETE` and `HEAD` read query and path parameters;
//! other methods read a JSON body, with path parameters filling keys the
//! body does not set (as JSON strings).

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::time::{Duration, Instant};

use apikit_errors::AppError;
use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, RawPathParams, Request},
    handler::Handler,
    http::{header, request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{field::Empty, Instrument};
use validator::{Validate, ValidationErrors};

use crate::api::boundary;
use crate::api::response::{FileWriter, JsonWriter, NoContentWriter, ResponseWriter};
use crate::api::validation::{bind_error, validate_payload, Validatable};
use crate::context::RequestContext;

/// Request type for routes that take no input.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NoPayload {}

impl Validate for NoPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

impl Validatable for NoPayload {}

/// Marker for the axum `Handler` implementation of [`Endpoint`].
#[doc(hidden)]
pub struct PipelineMarker;

/// A business handler plus the writer for its result.
pub struct Endpoint<F, W, Req> {
    handler: F,
    writer: W,
    _req: PhantomData<fn() -> Req>,
}

impl<F: Clone, W: Clone, Req> Clone for Endpoint<F, W, Req> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            writer: self.writer.clone(),
            _req: PhantomData,
        }
    }
}

impl<F, W, Req> Endpoint<F, W, Req> {
    pub fn with_writer(writer: W, handler: F) -> Self {
        Self {
            handler,
            writer,
            _req: PhantomData,
        }
    }
}

impl<F, Req> Endpoint<F, JsonWriter, Req> {
    /// JSON body with `status` on success.
    pub fn json(status: StatusCode, handler: F) -> Self {
        Self::with_writer(JsonWriter::new(status), handler)
    }
}

impl<F, Req> Endpoint<F, NoContentWriter, Req> {
    /// 204 without a body; the handler returns `()`.
    pub fn no_content(handler: F) -> Self {
        Self::with_writer(NoContentWriter::default(), handler)
    }
}

impl<F, Req> Endpoint<F, FileWriter, Req> {
    /// Download of the bytes the handler returns.
    pub fn file(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        handler: F,
    ) -> Self {
        Self::with_writer(FileWriter::new(filename, content_type), handler)
    }
}

impl<F, Fut, W, Req, Res, S> Handler<PipelineMarker, S> for Endpoint<F, W, Req>
where
    F: Fn(S, RequestContext, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    W: ResponseWriter<Res> + Clone,
    Req: DeserializeOwned + Validatable + Send + 'static,
    Res: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

    fn call(self, req: Request, state: S) -> Self::Future {
        Box::pin(run(self, req, state))
    }
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn run<F, Fut, W, Req, Res, S>(
    endpoint: Endpoint<F, W, Req>,
    req: Request,
    state: S,
) -> Response
where
    F: Fn(S, RequestContext, Req) -> Fut,
    Fut: Future<Output = anyhow::Result<Res>>,
    W: ResponseWriter<Res>,
    Req: DeserializeOwned + Validatable,
{
    let Endpoint { handler, writer, .. } = endpoint;
    let start = Instant::now();
    let (mut parts, body) = req.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    let txn = ctx.transaction.clone();

    let span = tracing::info_span!(
        "handler",
        operation = writer.operation(),
        method = %ctx.method,
        path = %ctx.path,
        route = %ctx.route,
        filename = Empty,
        content_type = Empty,
    );
    if let Some((filename, content_type)) = writer.attachment() {
        span.record("filename", filename);
        span.record("content_type", content_type);
    }

    async move {
        if let Some(txn) = &txn {
            txn.add_attribute("handler.name", ctx.route.as_str());
        }
        tracing::info!("handling request");

        // ---- bind + validate ----
        let validation_start = Instant::now();
        let input = match bind_and_validate::<Req>(&mut parts, body).await {
            Ok(input) => input,
            Err(err) => {
                let validation_ms = ms(validation_start.elapsed());
                tracing::warn!(
                    error = %err,
                    validation_duration_ms = validation_ms,
                    "request validation failed"
                );
                if let Some(txn) = &txn {
                    txn.notice_error(&err);
                    txn.add_attribute("validation.status", "failed");
                    txn.add_attribute("validation.duration_ms", validation_ms);
                }
                return boundary::error_response(anyhow::Error::new(err), txn.as_ref());
            }
        };
        let validation_ms = ms(validation_start.elapsed());
        if let Some(txn) = &txn {
            txn.add_attribute("validation.status", "success");
            txn.add_attribute("validation.duration_ms", validation_ms);
        }
        tracing::debug!(validation_duration_ms = validation_ms, "request validation successful");

        // ---- business handler ----
        let handler_start = Instant::now();
        let outcome = (handler)(state, ctx, input).await;
        let handler_ms = ms(handler_start.elapsed());

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let total_ms = ms(start.elapsed());
                tracing::error!(
                    error = %err,
                    handler_duration_ms = handler_ms,
                    total_duration_ms = total_ms,
                    "handler execution failed"
                );
                if let Some(txn) = &txn {
                    txn.notice_error(&err);
                    txn.add_attribute("handler.status", "error");
                    txn.add_attribute("handler.duration_ms", handler_ms);
                    txn.add_attribute("total.duration_ms", total_ms);
                }
                return boundary::error_response(err, txn.as_ref());
            }
        };

        // ---- response ----
        let total_ms = ms(start.elapsed());
        if let Some(txn) = &txn {
            txn.add_attribute("handler.status", "success");
            txn.add_attribute("handler.duration_ms", handler_ms);
            txn.add_attribute("total.duration_ms", total_ms);
            writer.record_attributes(txn, &result);
        }
        tracing::info!(
            validation_duration_ms = validation_ms,
            handler_duration_ms = handler_ms,
            total_duration_ms = total_ms,
            "request completed successfully"
        );

        match writer.write(result) {
            Ok(resp) => resp,
            Err(app) => app.into_response(),
        }
    }
    .instrument(span)
    .await
}

/// Populate `Req` from the request, then run its validation.
pub async fn bind_and_validate<Req>(parts: &mut Parts, body: Body) -> Result<Req, AppError>
where
    Req: DeserializeOwned + Validatable,
{
    let payload: Req = bind(parts, body).await?;
    validate_payload(&payload)?;
    Ok(payload)
}

async fn bind<Req: DeserializeOwned>(parts: &mut Parts, body: Body) -> Result<Req, AppError> {
    let path_params: Vec<(String, String)> = match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
        Err(_) => Vec::new(),
    };

    if matches!(parts.method, Method::GET | Method::DELETE | Method::HEAD) {
        return bind_query(parts.uri.query().unwrap_or(""), path_params);
    }

    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| bind_error(&e.to_string()))?;

    if !bytes.is_empty() && !is_json(parts) {
        return Err(AppError::from_status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    let mut value: Value = if bytes.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&bytes).map_err(|e| bind_error(&e.to_string()))?
    };

    if !path_params.is_empty() {
        let Value::Object(map) = &mut value else {
            return Err(bind_error("request body must be a JSON object"));
        };
        for (k, v) in path_params {
            map.entry(k).or_insert(Value::String(v));
        }
    }

    serde_json::from_value(value).map_err(|e| bind_error(&e.to_string()))
}

/// Query pairs plus path parameters; path parameters win on conflict.
fn bind_query<Req: DeserializeOwned>(
    query: &str,
    path_params: Vec<(String, String)>,
) -> Result<Req, AppError> {
    let mut pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query).map_err(|e| bind_error(&e.to_string()))?;
    pairs.retain(|(k, _)| !path_params.iter().any(|(pk, _)| pk == k));
    pairs.extend(path_params);

    let encoded = serde_urlencoded::to_string(&pairs).map_err(|e| bind_error(&e.to_string()))?;
    serde_urlencoded::from_str(&encoded).map_err(|e| bind_error(&e.to_string()))
}

fn is_json(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        })
        .unwrap_or(true)
}
