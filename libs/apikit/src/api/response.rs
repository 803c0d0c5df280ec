//! Response writers used by the request pipeline.
//!
//! The writer decides how a successful handler result becomes an HTTP
//! response. The result type is fixed per writer, so a file route can only
//! be wired to a handler that returns bytes.

use apikit_errors::AppError;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::telemetry::Transaction;

pub trait ResponseWriter<R>: Send + Sync + 'static {
    /// Turn the handler result into the response.
    fn write(&self, result: R) -> Result<Response, AppError>;

    /// Operation name used in logs and traces.
    fn operation(&self) -> &'static str;

    /// Attach result-specific attributes before the response is written.
    fn record_attributes(&self, _txn: &Transaction, _result: &R) {}

    /// `(filename, content_type)` for download responses.
    fn attachment(&self) -> Option<(&str, &str)> {
        None
    }
}

/// Serialize the result as a JSON body with a fixed status.
#[derive(Debug, Clone, Copy)]
pub struct JsonWriter {
    status: StatusCode,
}

impl JsonWriter {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn created() -> Self {
        Self::new(StatusCode::CREATED)
    }
}

impl<R: Serialize> ResponseWriter<R> for JsonWriter {
    fn write(&self, result: R) -> Result<Response, AppError> {
        let body = serde_json::to_vec(&result).map_err(|e| {
            tracing::error!(error = %e, "failed to serialize response body");
            AppError::internal()
        })?;
        Ok((
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            body,
        )
            .into_response())
    }

    fn operation(&self) -> &'static str {
        "handler"
    }
}

/// Status only, the handler returns `()`.
#[derive(Debug, Clone, Copy)]
pub struct NoContentWriter {
    status: StatusCode,
}

impl NoContentWriter {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl Default for NoContentWriter {
    fn default() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }
}

impl ResponseWriter<()> for NoContentWriter {
    fn write(&self, _result: ()) -> Result<Response, AppError> {
        Ok(self.status.into_response())
    }

    fn operation(&self) -> &'static str {
        "handler_no_content"
    }
}

/// Download response: raw bytes with `Content-Disposition: attachment`.
#[derive(Debug, Clone)]
pub struct FileWriter {
    status: StatusCode,
    filename: String,
    content_type: String,
}

impl FileWriter {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl ResponseWriter<Vec<u8>> for FileWriter {
    fn write(&self, result: Vec<u8>) -> Result<Response, AppError> {
        let disposition =
            HeaderValue::from_str(&format!("attachment; filename={}", self.filename));
        let content_type = HeaderValue::from_str(&self.content_type);
        let (Ok(disposition), Ok(content_type)) = (disposition, content_type) else {
            tracing::error!(
                filename = %self.filename,
                content_type = %self.content_type,
                "file response headers are not valid header values"
            );
            return Err(AppError::internal());
        };

        Response::builder()
            .status(self.status)
            .header(header::CONTENT_DISPOSITION, disposition)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(result))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build file response");
                AppError::internal()
            })
    }

    fn operation(&self) -> &'static str {
        "handler_file"
    }

    fn record_attributes(&self, txn: &Transaction, result: &Vec<u8>) {
        txn.add_attribute("file.name", self.filename.as_str());
        txn.add_attribute("file.content_type", self.content_type.as_str());
        txn.add_attribute("file.size_bytes", result.len());
    }

    fn attachment(&self) -> Option<(&str, &str)> {
        Some((&self.filename, &self.content_type))
    }
}
