//! Client-facing application error.
//!
//! Every failure that reaches an HTTP client is expressed as an [`AppError`]:
//! a stable upper-snake machine code, a human message, the HTTP status, an
//! override flag telling the client the message is safe to show verbatim,
//! optional field errors and an optional action hint.
//!
//! The JSON shape is fixed:
//!
//! ```json
//! {"code":"USER_ALREADY_EXISTS","message":"A User with this Email already exists",
//!  "status":400,"override":true,"errors":[]}
//! ```
//!
//! `action` is only present when set.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Machine code used for payload validation failures.
pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";

/// Message used for every internal error, whatever the cause.
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// One invalid input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Lower-case field name, as the client spelled it.
    pub field: String,
    pub error: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            field: field.into().to_lowercase(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Redirect,
}

/// Machine-readable instruction for the client (e.g. redirect to a page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub message: String,
    pub value: String,
}

impl Action {
    pub fn redirect(message: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ActionType::Redirect,
            message: message.into(),
            value: value.into(),
        }
    }
}

/// Normalized application error.
///
/// Fields are private: an error is built once at the point of failure and
/// only copied afterwards (see [`AppError::with_message`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: String,
    message: String,
    status: StatusCode,
    override_message: bool,
    errors: Vec<FieldError>,
    action: Option<Action>,
}

impl AppError {
    /// Generic constructor; the code is derived from the status reason phrase.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: code_for_status(status),
            message: message.into(),
            status,
            override_message: false,
            errors: Vec::new(),
            action: None,
        }
    }

    /// Error carrying only the canonical reason phrase for `status`.
    pub fn from_status(status: StatusCode) -> Self {
        let message = status.canonical_reason().unwrap_or("Unknown Error");
        Self::new(status, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// Detail-free 500.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    /// 400 listing every invalid field; the message is always shown verbatim.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::bad_request("Validation failed")
            .with_code(VALIDATION_FAILED)
            .with_override(true)
            .with_errors(errors)
    }

    /// Replace the machine code. Input is normalized to upper-snake case;
    /// a blank code keeps the status-derived one.
    pub fn with_code(mut self, code: impl AsRef<str>) -> Self {
        let code = to_upper_snake(code.as_ref());
        if !code.is_empty() {
            self.code = code;
        }
        self
    }

    pub fn with_override(mut self, override_message: bool) -> Self {
        self.override_message = override_message;
        self
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Returns a copy of this error with a different message.
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..self.clone()
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_override(&self) -> bool {
        self.override_message
    }

    pub fn field_errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Wire representation.
    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            code: &self.code,
            message: &self.message,
            status: self.status.as_u16(),
            override_message: self.override_message,
            errors: &self.errors,
            action: self.action.as_ref(),
        }
    }
}

/// Serialized form of [`AppError`].
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'a str,
    pub message: &'a str,
    pub status: u16,
    #[serde(rename = "override")]
    pub override_message: bool,
    pub errors: &'a [FieldError],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'a Action>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut resp = (self.status, Json(self.body())).into_response();
        // Later layers use this to tell an already rendered error apart from
        // a bare framework status.
        resp.extensions_mut().insert(Rendered);
        resp.extensions_mut().insert(self);
        resp
    }
}

/// Response extension marking a 4xx/5xx body as final.
///
/// [`AppError`] sets it on its own. Handlers that deliberately answer an
/// error status with a different JSON body (the `/status` health report)
/// call [`mark_rendered`] so the error mapping layer leaves the body alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rendered;

/// Tag `resp` with [`Rendered`] and hand it back.
pub fn mark_rendered(mut resp: Response) -> Response {
    resp.extensions_mut().insert(Rendered);
    resp
}

/// True when the response body is final: produced by
/// [`AppError::into_response`] or passed through [`mark_rendered`].
pub fn is_rendered(resp: &Response) -> bool {
    resp.extensions().get::<Rendered>().is_some()
}

/// `BAD_REQUEST`, `NOT_FOUND`, `TOO_MANY_REQUESTS`, ...
pub fn code_for_status(status: StatusCode) -> String {
    let code = to_upper_snake(status.canonical_reason().unwrap_or(""));
    if code.is_empty() {
        format!("HTTP_{}", status.as_u16())
    } else {
        code
    }
}

/// Uppercase, with every run of non-alphanumeric characters collapsed to `_`.
pub fn to_upper_snake(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
