use std::fmt;

/// Marker recognized in "no rows" messages; the text up to the next `:` names the table.
pub const TABLE_MARKER: &str = "table:";

/// Repository-level "no rows" sentinel.
///
/// Rendered as `table:<name>: no rows in result set` when the table is known,
/// which lets the classifier name the missing entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoRows {
    table: Option<String>,
}

impl NoRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
        }
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

impl fmt::Display for NoRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{TABLE_MARKER}{t}: no rows in result set"),
            None => f.write_str("no rows in result set"),
        }
    }
}

impl std::error::Error for NoRows {}

/// Table token following [`TABLE_MARKER`] in `message`, if any.
pub(crate) fn table_from_message(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once(TABLE_MARKER)?;
    let table = rest.split(':').next().unwrap_or("").trim();
    (!table.is_empty()).then_some(table)
}
