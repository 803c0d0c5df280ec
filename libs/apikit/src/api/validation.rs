//! Request payload validation.
//!
//! Payloads derive [`validator::Validate`] and opt in with an empty
//! `impl Validatable for CreateUser {}`. Rules that cannot be written as
//! attributes override [`Validatable::validate_payload`] and return
//! [`CustomValidationErrors`] instead.
//!
//! Either way the failure ends up as a 400 `VALIDATION_FAILED` error with
//! one [`FieldError`] per offending field.

use std::borrow::Cow;
use std::fmt;

use apikit_errors::{AppError, FieldError};
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// A request payload that knows how to validate itself.
pub trait Validatable: Validate {
    fn validate_payload(&self) -> Result<(), ValidationFailure> {
        self.validate().map_err(ValidationFailure::Tagged)
    }
}

/// `(field, message)` pairs for checks attributes can't express.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomValidationErrors(Vec<FieldError>);

impl CustomValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(())` when nothing was pushed.
    pub fn into_result(self) -> Result<(), ValidationFailure> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure::Custom(self))
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValidationFailure {
    /// Attribute-based violations reported by `validator`.
    Tagged(ValidationErrors),
    Custom(CustomValidationErrors),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validation failed")
    }
}

impl std::error::Error for ValidationFailure {}

impl ValidationFailure {
    /// Flatten into client-facing field errors.
    ///
    /// Tagged failures are sorted alphabetically by field name, not by
    /// struct declaration order: `validator` keeps them in a map, so the
    /// declaration order is not recoverable. Custom failures keep their
    /// insertion order.
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            Self::Custom(custom) => custom.0.clone(),
            Self::Tagged(errors) => tagged_field_errors(errors),
        }
    }
}

impl From<ValidationFailure> for AppError {
    fn from(failure: ValidationFailure) -> Self {
        AppError::validation(failure.field_errors())
    }
}

/// Run the payload's own validation and map a failure to a 400 error.
pub fn validate_payload<T: Validatable + ?Sized>(payload: &T) -> Result<(), AppError> {
    payload.validate_payload().map_err(AppError::from)
}

/// 400 for input that could not be bound into the payload type.
///
/// The message comes from the deserializer with its position suffix removed,
/// so it is only as helpful as serde's own wording.
pub fn bind_error(message: &str) -> AppError {
    let message = match message.rfind(" at line ") {
        Some(idx) if message[idx..].contains(" column ") => &message[..idx],
        _ => message,
    };
    let message = message.trim();
    if message.is_empty() {
        AppError::bad_request("Invalid request body")
    } else {
        AppError::bad_request(message)
    }
}

fn tagged_field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(field, _)| field.to_string());

    let mut out = Vec::new();
    for (field, kind) in fields {
        let field = field.to_string();
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = tag_message(&field, err);
                    out.push(FieldError::new(field.as_str(), message));
                }
            }
            ValidationErrorsKind::Struct(_) | ValidationErrorsKind::List(_) => {
                out.push(FieldError::new(field.as_str(), "some items are invalid"));
            }
        }
    }
    out
}

fn tag_message(field: &str, err: &ValidationError) -> String {
    match err.code.as_ref() {
        "required" => "is required".to_owned(),
        "length" => length_message(err),
        "range" => range_message(err),
        "one_of" => format!(
            "must be one of: {}",
            param(err, "values").unwrap_or_default()
        ),
        "email" => "must be a valid email address".to_owned(),
        "e164" => "must be a valid phone number with country code".to_owned(),
        "uuid" => "must be a valid UUID".to_owned(),
        "uuid_list" => "must be a comma-separated list of valid UUIDs".to_owned(),
        code => {
            let field = field.to_lowercase();
            match first_param(err) {
                Some(p) => format!("{field}: {code}:{p}"),
                None => format!("{field}: {code}"),
            }
        }
    }
}

fn length_message(err: &ValidationError) -> String {
    if let Some(equal) = param(err, "equal") {
        return format!("must be exactly {equal} characters");
    }
    let actual = err.params.get("value").and_then(|v| match v {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(a) => Some(a.len() as f64),
        _ => None,
    });
    bound_message(err, actual, " characters", "has an invalid length")
}

fn range_message(err: &ValidationError) -> String {
    let actual = err.params.get("value").and_then(Value::as_f64);
    bound_message(err, actual, "", "is out of range")
}

/// Pick the lower or upper bound message depending on which side was crossed.
fn bound_message(err: &ValidationError, actual: Option<f64>, unit: &str, fallback: &str) -> String {
    let min = err.params.get("min").and_then(Value::as_f64);
    let below_min = match (actual, min) {
        (Some(a), Some(m)) => a < m,
        (None, Some(_)) => true,
        _ => false,
    };

    match (param(err, "min"), param(err, "max")) {
        (Some(lo), None) => format!("must be at least {lo}{unit}"),
        (Some(lo), Some(_)) if below_min => format!("must be at least {lo}{unit}"),
        (_, Some(hi)) => format!("must not exceed {hi}{unit}"),
        (None, None) => fallback.to_owned(),
    }
}

fn param(err: &ValidationError, name: &str) -> Option<String> {
    err.params.get(name).map(param_text)
}

/// First parameter other than the offending value, by name.
fn first_param(err: &ValidationError) -> Option<String> {
    let mut names: Vec<&Cow<'static, str>> =
        err.params.keys().filter(|k| **k != "value").collect();
    names.sort();
    names.first().and_then(|k| err.params.get(*k)).map(param_text)
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        Value::Array(items) => items.iter().map(param_text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

// -------- reusable rules for `#[validate(custom(function = ...))]` --------

/// E.164 phone number: `+` followed by 8 to 15 digits, no leading zero.
pub fn validate_e164(value: &str) -> Result<(), ValidationError> {
    let digits = value.strip_prefix('+').unwrap_or("");
    let ok = (8..=15).contains(&digits.len())
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new("e164"))
    }
}

/// Canonical hyphenated UUID.
pub fn validate_uuid(value: &str) -> Result<(), ValidationError> {
    if is_hyphenated_uuid(value) {
        Ok(())
    } else {
        Err(ValidationError::new("uuid"))
    }
}

/// Comma-separated UUIDs (`a,b,c`), surrounding spaces allowed.
pub fn validate_uuid_list(value: &str) -> Result<(), ValidationError> {
    if !value.trim().is_empty() && value.split(',').all(|part| is_hyphenated_uuid(part.trim())) {
        Ok(())
    } else {
        Err(ValidationError::new("uuid_list"))
    }
}

/// Membership check; wrap it in a one-argument function for the derive.
pub fn one_of(value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    let mut err = ValidationError::new("one_of");
    err.add_param(Cow::Borrowed("values"), &allowed.join(" "));
    Err(err)
}

fn is_hyphenated_uuid(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::try_parse(value).is_ok()
}
