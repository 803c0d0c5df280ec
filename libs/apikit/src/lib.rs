//! Building blocks for JSON HTTP APIs on axum.
//!
//! - [`api::Endpoint`] runs bind → validate → handler → response writer for a
//!   business handler and records timings on the request's [`Transaction`].
//! - [`api::boundary`] turns any handler error into exactly one
//!   [`AppError`] response; database errors are classified on the way.
//! - [`api::error_layer`] gives framework-generated errors the same shape.

pub mod api;
pub mod context;
pub mod telemetry;

pub use apikit_errors::{AppError, FieldError};
pub use context::{Identity, RequestContext, RequestId};
pub use telemetry::{AttrValue, Transaction};
