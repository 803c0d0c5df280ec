//! Naming-convention heuristics used to phrase database errors for humans.

use std::sync::OnceLock;

use regex::Regex;

use super::ViolationKind;

/// `first_name` -> `First Name`.
pub fn humanize(text: &str) -> String {
    text.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip one trailing `s`. Irregular plurals are not handled.
pub fn singularize(word: &str) -> &str {
    if word.len() > 1 && (word.ends_with('s') || word.ends_with('S')) {
        &word[..word.len() - 1]
    } else {
        word
    }
}

/// Entity the error talks about: a `*_id` column first, then the table, then "record".
pub fn entity_name(table: Option<&str>, column: Option<&str>) -> String {
    if let Some(col) = column.map(str::to_lowercase) {
        if let Some(base) = col.strip_suffix("_id") {
            if !base.is_empty() {
                return humanize(base);
            }
        }
    }
    match table.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => humanize(singularize(t)),
        None => "record".to_string(),
    }
}

/// `<DOMAIN>_<ACTION>`, e.g. `users` + unique -> `USER_ALREADY_EXISTS`.
pub fn error_code(table: Option<&str>, kind: ViolationKind) -> String {
    let domain = apikit_errors::to_upper_snake(table.unwrap_or(""));
    let domain = if domain.is_empty() {
        "RECORD".to_string()
    } else {
        singularize(&domain).to_string()
    };
    format!("{domain}_{}", kind.action())
}

/// Column named by a unique constraint, for `unique_<table>_<column>` and
/// `<table>_<column>_key` / `_ukey`.
pub fn unique_constraint_column(constraint: &str) -> Option<&str> {
    if constraint.starts_with("unique_") {
        let parts: Vec<&str> = constraint.split('_').collect();
        if parts.len() >= 3 {
            return parts.last().copied().filter(|p| !p.is_empty());
        }
    }

    static KEY_SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let re = KEY_SUFFIX
        .get_or_init(|| Regex::new(r"_([^_]+)_(?:key|ukey)$").ok())
        .as_ref()?;
    re.captures(constraint)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_title_cases_words() {
        assert_eq!(humanize("first_name"), "First Name");
        assert_eq!(humanize("EMAIL"), "Email");
        assert_eq!(humanize(""), "");
    }

    #[test]
    fn singularize_is_naive() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("USERS"), "USER");
        assert_eq!(singularize("s"), "s");
        assert_eq!(singularize("companies"), "companie");
    }

    #[test]
    fn entity_prefers_id_column() {
        assert_eq!(entity_name(Some("orders"), Some("customer_id")), "Customer");
        assert_eq!(entity_name(Some("orders"), Some("Customer_ID")), "Customer");
        assert_eq!(entity_name(Some("user_profiles"), Some("bio")), "User Profile");
        assert_eq!(entity_name(None, None), "record");
        assert_eq!(entity_name(Some(""), Some("_id")), "record");
    }

    #[test]
    fn codes_are_domain_plus_action() {
        assert_eq!(
            error_code(Some("users"), ViolationKind::Unique),
            "USER_ALREADY_EXISTS"
        );
        assert_eq!(
            error_code(Some("orders"), ViolationKind::ForeignKey),
            "ORDER_NOT_FOUND"
        );
        assert_eq!(error_code(None, ViolationKind::NotNull), "RECORD_REQUIRED");
        assert_eq!(error_code(Some("s"), ViolationKind::Check), "S_INVALID");
        assert_eq!(error_code(Some("users"), ViolationKind::Other), "USER_ERROR");
    }

    #[test]
    fn unique_column_conventions() {
        assert_eq!(unique_constraint_column("unique_users_email"), Some("email"));
        assert_eq!(unique_constraint_column("users_email_key"), Some("email"));
        assert_eq!(unique_constraint_column("users_handle_ukey"), Some("handle"));
        assert_eq!(unique_constraint_column("unique_email"), None);
        assert_eq!(unique_constraint_column("users_pkey"), None);
        assert_eq!(unique_constraint_column(""), None);
    }
}
