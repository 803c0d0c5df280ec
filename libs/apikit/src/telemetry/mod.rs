//! Per-request trace transaction.
//!
//! A [`Transaction`] is created by the HTTP layer when tracing is enabled and
//! handed to the pipeline through request extensions. Code that receives one
//! can always record on it; when tracing is disabled there is simply no
//! transaction, so nothing has to probe for optional capabilities.
//!
//! Attributes are mirrored onto a `tracing` span (for exporters and JSON
//! logs) and kept in memory so tests and middleware can read them back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::Empty;

/// Attribute value stored on a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => f.write_str(v),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<u16> for AttrValue {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<usize> for AttrValue {
    fn from(v: usize) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<u128> for AttrValue {
    fn from(v: u128) -> Self {
        Self::UInt(u64::try_from(v).unwrap_or(u64::MAX))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

struct Inner {
    name: String,
    span: tracing::Span,
    attributes: Mutex<BTreeMap<String, AttrValue>>,
    errors: Mutex<Vec<String>>,
}

/// Handle to the trace transaction of one request. Cheap to clone.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.inner.name)
            .field("attributes", &*self.inner.attributes.lock())
            .finish()
    }
}

impl Transaction {
    /// Start a transaction named after the request (`GET /api/v1/users`).
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = tracing::info_span!(
            "transaction",
            otel.name = %name,
            http.method = Empty,
            http.route = Empty,
            http.real_ip = Empty,
            http.user_agent = Empty,
            http.status_code = Empty,
            request.id = Empty,
            user.id = Empty,
            handler.name = Empty,
            validation.status = Empty,
            validation.duration_ms = Empty,
            handler.status = Empty,
            handler.duration_ms = Empty,
            total.duration_ms = Empty,
            file.name = Empty,
            file.content_type = Empty,
            file.size_bytes = Empty,
            rate_limit.hit = Empty,
            error.message = Empty,
        );
        Self {
            inner: Arc::new(Inner {
                name,
                span,
                attributes: Mutex::new(BTreeMap::new()),
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Span that request processing should run inside.
    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }

    /// Set (or replace) an attribute.
    pub fn add_attribute(&self, key: &str, value: impl Into<AttrValue>) {
        let value = value.into();
        let span = &self.inner.span;
        if span.has_field(key) {
            match &value {
                AttrValue::Str(v) => span.record(key, v.as_str()),
                AttrValue::Int(v) => span.record(key, *v),
                AttrValue::UInt(v) => span.record(key, *v),
                AttrValue::Float(v) => span.record(key, *v),
                AttrValue::Bool(v) => span.record(key, *v),
            };
        }
        self.inner.attributes.lock().insert(key.to_owned(), value);
    }

    /// Record a failure against the transaction. The text stays in telemetry,
    /// it is never sent to the client.
    pub fn notice_error(&self, err: &dyn fmt::Display) {
        let message = err.to_string();
        self.inner.span.record("error.message", message.as_str());
        self.inner.errors.lock().push(message);
    }

    pub fn attribute(&self, key: &str) -> Option<AttrValue> {
        self.inner.attributes.lock().get(key).cloned()
    }

    /// Snapshot of all attributes recorded so far.
    pub fn attributes(&self) -> BTreeMap<String, AttrValue> {
        self.inner.attributes.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.lock().clone()
    }
}
