//! Database error classification.
//!
//! [`handle_error`] maps anything a repository can return into an
//! [`AppError`]:
//!
//! | input | output |
//! |-------|--------|
//! | an `AppError` anywhere in the chain | returned unchanged |
//! | driver constraint violation, bare or inside [`DbError::Sqlx`] | 400 with `<DOMAIN>_<ACTION>` code, or 500 for non-constraint codes |
//! | `sqlx::Error::RowNotFound` / [`NoRows`] | 404 "{Entity} not found" or "Resource not found" |
//! | anything else | detail-free 500 |
//!
//! Raw driver text never reaches the client message.

pub mod codes;
pub mod naming;

use std::error::Error as StdError;

use apikit_errors::{AppError, FieldError};
use sqlx::error::DatabaseError;
use sqlx::postgres::PgDatabaseError;

use crate::no_rows::{table_from_message, NoRows};
use crate::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    ForeignKey,
    Unique,
    NotNull,
    Check,
    Other,
}

impl ViolationKind {
    /// Suffix of the generated machine code.
    pub fn action(self) -> &'static str {
        match self {
            Self::ForeignKey => "NOT_FOUND",
            Self::Unique => "ALREADY_EXISTS",
            Self::NotNull => "REQUIRED",
            Self::Check => "INVALID",
            Self::Other => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
    Unknown,
}

/// Driver error reduced to what the classifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedDbError {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Raw driver code (SQLSTATE for PostgreSQL).
    pub code: String,
    pub message: String,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
}

impl ClassifiedDbError {
    /// Read every detail the driver exposes. PostgreSQL errors carry
    /// schema/column/data type; other drivers only table and constraint.
    pub fn from_database_error(err: &dyn DatabaseError) -> Self {
        if let Some(pg) = err.try_downcast_ref::<PgDatabaseError>() {
            return Self::from(pg);
        }
        let code = err.code().map(|c| c.into_owned()).unwrap_or_default();
        Self {
            kind: codes::map_code(&code).unwrap_or_else(|| codes::kind_from_sqlx(err.kind())),
            severity: Severity::Error,
            code,
            message: err.message().to_string(),
            schema: None,
            table: err.table().map(str::to_owned),
            column: None,
            data_type: None,
            constraint: err.constraint().map(str::to_owned),
        }
    }

    pub fn error_code(&self) -> String {
        naming::error_code(self.table.as_deref(), self.kind)
    }

    fn entity(&self) -> String {
        naming::entity_name(self.table.as_deref(), self.column.as_deref())
    }

    fn humanized_column(&self) -> Option<String> {
        self.column
            .as_deref()
            .map(naming::humanize)
            .filter(|c| !c.is_empty())
    }

    /// Client-facing form of this error.
    pub fn to_app_error(&self) -> AppError {
        let code = self.error_code();
        match self.kind {
            ViolationKind::ForeignKey => {
                AppError::bad_request(format!("The referenced {} does not exist", self.entity()))
                    .with_code(code)
            }
            ViolationKind::Unique => {
                let mut message = format!("A {} with this identifier already exists", self.entity());
                if let Some(col) = self
                    .constraint
                    .as_deref()
                    .and_then(naming::unique_constraint_column)
                {
                    message = message.replace("identifier", &naming::humanize(col));
                }
                AppError::bad_request(message)
                    .with_code(code)
                    .with_override(true)
            }
            ViolationKind::NotNull => {
                let field = self.humanized_column().unwrap_or_else(|| "field".to_string());
                let column = self.column.as_deref().unwrap_or("").to_lowercase();
                AppError::bad_request(format!("The {field} is required"))
                    .with_code(code)
                    .with_override(true)
                    .with_errors(vec![FieldError::new(column, "is required")])
            }
            ViolationKind::Check => {
                let message = match self.humanized_column() {
                    Some(field) => format!("The {field} value does not meet required conditions"),
                    None => "One or more values do not meet required conditions".to_string(),
                };
                AppError::bad_request(message)
                    .with_code(code)
                    .with_override(true)
            }
            ViolationKind::Other => AppError::internal(),
        }
    }
}

impl From<&PgDatabaseError> for ClassifiedDbError {
    fn from(pg: &PgDatabaseError) -> Self {
        let code = pg.code().to_string();
        Self {
            kind: codes::map_code(&code).unwrap_or(ViolationKind::Other),
            severity: codes::map_pg_severity(pg.severity()),
            code,
            message: pg.message().to_string(),
            schema: pg.schema().map(str::to_owned),
            table: pg.table().map(str::to_owned),
            column: pg.column().map(str::to_owned),
            data_type: pg.data_type().map(str::to_owned),
            constraint: pg.constraint().map(str::to_owned),
        }
    }
}

/// Classify an error returned by a repository or handler.
pub fn handle_error(err: &anyhow::Error) -> AppError {
    classify_chain(err.chain())
}

/// Same as [`handle_error`] for a plain error value and its sources.
pub fn classify(err: &(dyn StdError + 'static)) -> AppError {
    classify_chain(std::iter::successors(Some(err), |&e| e.source()))
}

/// Convenience for `map_err` in repositories: classify and hand back an
/// `anyhow::Error` wrapping the resulting `AppError`.
pub fn into_app_error(err: impl Into<anyhow::Error>) -> anyhow::Error {
    let err = err.into();
    anyhow::Error::new(handle_error(&err))
}

fn classify_chain<'a, I>(chain: I) -> AppError
where
    I: Iterator<Item = &'a (dyn StdError + 'static)> + Clone,
{
    // Already classified somewhere down the chain.
    if let Some(app) = chain.clone().find_map(|e| e.downcast_ref::<AppError>()) {
        return app.clone();
    }

    for e in chain.clone() {
        if let Some(sqlx_err) = as_sqlx(e) {
            match sqlx_err {
                sqlx::Error::Database(db) => {
                    return ClassifiedDbError::from_database_error(db.as_ref()).to_app_error();
                }
                sqlx::Error::RowNotFound => return not_found(chain),
                _ => {}
            }
        }
        if let Some(pg) = e.downcast_ref::<PgDatabaseError>() {
            return ClassifiedDbError::from(pg).to_app_error();
        }
        if e.downcast_ref::<NoRows>().is_some() {
            return not_found(chain);
        }
    }

    AppError::internal()
}

/// `DbError::Sqlx` is transparent, so the wrapped driver error never shows
/// up as its own link in the chain.
fn as_sqlx<'a>(e: &'a (dyn StdError + 'static)) -> Option<&'a sqlx::Error> {
    e.downcast_ref::<sqlx::Error>().or_else(|| match e.downcast_ref::<DbError>() {
        Some(DbError::Sqlx(inner)) => Some(inner),
        _ => None,
    })
}

fn not_found<'a, I>(chain: I) -> AppError
where
    I: Iterator<Item = &'a (dyn StdError + 'static)>,
{
    let text = chain.map(ToString::to_string).collect::<Vec<_>>().join(": ");
    match table_from_message(&text) {
        Some(table) => {
            let entity = naming::entity_name(Some(table), None);
            AppError::not_found(format!("{entity} not found")).with_override(true)
        }
        None => AppError::not_found("Resource not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn violation(kind: ViolationKind) -> ClassifiedDbError {
        ClassifiedDbError {
            kind,
            severity: Severity::Error,
            code: String::new(),
            message: "duplicate key value violates unique constraint".into(),
            schema: Some("public".into()),
            table: Some("users".into()),
            column: None,
            data_type: None,
            constraint: None,
        }
    }

    #[test]
    fn unique_with_known_constraint_names_column() {
        let err = ClassifiedDbError {
            constraint: Some("unique_users_email".into()),
            ..violation(ViolationKind::Unique)
        }
        .to_app_error();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "USER_ALREADY_EXISTS");
        assert_eq!(err.message(), "A User with this Email already exists");
        assert!(err.is_override());
    }

    #[test]
    fn unique_with_key_suffix_constraint() {
        let err = ClassifiedDbError {
            constraint: Some("users_phone_number_key".into()),
            ..violation(ViolationKind::Unique)
        }
        .to_app_error();
        assert_eq!(err.message(), "A User with this Number already exists");
    }

    #[test]
    fn unique_without_convention_keeps_placeholder() {
        let err = ClassifiedDbError {
            constraint: Some("users_pkey".into()),
            ..violation(ViolationKind::Unique)
        }
        .to_app_error();
        assert_eq!(err.message(), "A User with this identifier already exists");
    }

    #[test]
    fn foreign_key_names_referenced_entity() {
        let err = ClassifiedDbError {
            table: Some("orders".into()),
            column: Some("customer_id".into()),
            ..violation(ViolationKind::ForeignKey)
        }
        .to_app_error();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "ORDER_NOT_FOUND");
        assert_eq!(err.message(), "The referenced Customer does not exist");
        assert!(!err.is_override());
    }

    #[test]
    fn not_null_yields_single_lowercase_field_error() {
        let err = ClassifiedDbError {
            column: Some("First_Name".into()),
            ..violation(ViolationKind::NotNull)
        }
        .to_app_error();
        assert_eq!(err.code(), "USER_REQUIRED");
        assert_eq!(err.message(), "The First Name is required");
        assert_eq!(err.field_errors(), &[FieldError::new("first_name", "is required")]);
        assert!(err.is_override());
    }

    #[test]
    fn check_with_and_without_column() {
        let with_col = ClassifiedDbError {
            column: Some("age".into()),
            ..violation(ViolationKind::Check)
        }
        .to_app_error();
        assert_eq!(with_col.code(), "USER_INVALID");
        assert_eq!(
            with_col.message(),
            "The Age value does not meet required conditions"
        );

        let without = violation(ViolationKind::Check).to_app_error();
        assert_eq!(
            without.message(),
            "One or more values do not meet required conditions"
        );
    }

    #[test]
    fn other_kind_is_generic_internal() {
        let err = ClassifiedDbError {
            message: "relation \"secret_table\" does not exist".into(),
            ..violation(ViolationKind::Other)
        }
        .to_app_error();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("secret_table"));
    }

    #[test]
    fn classified_app_error_is_returned_unchanged() {
        let original = AppError::not_found("Invoice not found")
            .with_code("INVOICE_MISSING")
            .with_override(true);
        let err = anyhow::Error::new(original.clone());
        assert_eq!(handle_error(&err), original);

        let wrapped = anyhow::Error::new(original.clone()).context("loading invoice");
        assert_eq!(handle_error(&wrapped), original);
    }

    #[test]
    fn no_rows_with_table_marker() {
        let err = anyhow::Error::new(NoRows::in_table("users"));
        let app = handle_error(&err);
        assert_eq!(app.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.message(), "User not found");
        assert!(app.is_override());
    }

    #[test]
    fn sqlx_row_not_found_with_context_marker() {
        let err = anyhow::Error::new(sqlx::Error::RowNotFound).context("table:orders:");
        let app = handle_error(&err);
        assert_eq!(app.message(), "Order not found");
    }

    #[test]
    fn row_not_found_without_marker_is_generic() {
        let err = anyhow::Error::new(sqlx::Error::RowNotFound);
        let app = handle_error(&err);
        assert_eq!(app.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.message(), "Resource not found");
        assert!(!app.is_override());
    }

    #[test]
    fn unknown_errors_become_internal() {
        let err = anyhow::anyhow!("connection reset by peer at 10.0.0.5");
        let app = handle_error(&err);
        assert_eq!(app.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!app.message().contains("10.0.0.5"));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(classify(&io).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn into_app_error_wraps_classification() {
        let err = into_app_error(NoRows::in_table("users"));
        let app = err.downcast_ref::<AppError>().unwrap();
        assert_eq!(app.message(), "User not found");
    }
}
