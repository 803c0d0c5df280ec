//! Driver error codes -> violation kinds.

use sqlx::error::ErrorKind;
use sqlx::postgres::PgSeverity;

use super::{Severity, ViolationKind};

/// Map a driver code to a violation kind.
///
/// Covers PostgreSQL SQLSTATE, SQLite extended result codes and MySQL error
/// numbers; `None` when the code is not a recognized constraint violation.
pub fn map_code(code: &str) -> Option<ViolationKind> {
    match code {
        // postgres | sqlite | mysql
        "23503" | "787" | "1451" | "1452" => Some(ViolationKind::ForeignKey),
        "23505" | "2067" | "1555" | "1062" => Some(ViolationKind::Unique),
        "23502" | "1299" | "1048" => Some(ViolationKind::NotNull),
        "23514" | "275" | "3819" => Some(ViolationKind::Check),
        _ => None,
    }
}

pub fn kind_from_sqlx(kind: ErrorKind) -> ViolationKind {
    match kind {
        ErrorKind::ForeignKeyViolation => ViolationKind::ForeignKey,
        ErrorKind::UniqueViolation => ViolationKind::Unique,
        ErrorKind::NotNullViolation => ViolationKind::NotNull,
        ErrorKind::CheckViolation => ViolationKind::Check,
        _ => ViolationKind::Other,
    }
}

pub fn map_pg_severity(severity: PgSeverity) -> Severity {
    match severity {
        PgSeverity::Panic => Severity::Panic,
        PgSeverity::Fatal => Severity::Fatal,
        PgSeverity::Error => Severity::Error,
        PgSeverity::Warning => Severity::Warning,
        PgSeverity::Notice => Severity::Notice,
        PgSeverity::Debug => Severity::Debug,
        PgSeverity::Info => Severity::Info,
        PgSeverity::Log => Severity::Log,
        #[allow(unreachable_patterns)]
        _ => Severity::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_postgres_sqlstate() {
        assert_eq!(map_code("23503"), Some(ViolationKind::ForeignKey));
        assert_eq!(map_code("23505"), Some(ViolationKind::Unique));
        assert_eq!(map_code("23502"), Some(ViolationKind::NotNull));
        assert_eq!(map_code("23514"), Some(ViolationKind::Check));
        assert_eq!(map_code("42P01"), None);
    }

    #[test]
    fn maps_other_backends() {
        assert_eq!(map_code("2067"), Some(ViolationKind::Unique));
        assert_eq!(map_code("1062"), Some(ViolationKind::Unique));
        assert_eq!(map_code("1452"), Some(ViolationKind::ForeignKey));
        assert_eq!(map_code("1299"), Some(ViolationKind::NotNull));
    }

    #[test]
    fn sqlx_kind_fallback() {
        assert_eq!(kind_from_sqlx(ErrorKind::UniqueViolation), ViolationKind::Unique);
        assert_eq!(kind_from_sqlx(ErrorKind::Other), ViolationKind::Other);
    }
}
