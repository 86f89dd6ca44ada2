//! Identifier validation for app-scoped tables and their columns
//!
//! Identifiers are the only tokens ever interpolated into SQL text, so every
//! table and column name passes through here first.

use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Postgres truncates identifiers beyond this length
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Columns managed by the platform itself
pub const RESERVED_COLUMNS: &[&str] = &["id", "created_at", "updated_at", "app_id"];

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "truncate", "union",
    "exec", "grant", "revoke",
];

const SYSTEM_PREFIXES: &[&str] = &["pg_", "information_schema", "sys", "mysql_", "sqlite_"];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("identifier regex"));

static APP_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("app id regex"));

/// Validate a table name against the identifier rules and the app prefix
///
/// The name must start with `app_{app_id}_` followed by a non-empty suffix.
pub fn validate_table_name<'a>(name: &'a str, app_id: &str) -> Result<&'a str, ValidationError> {
    check_identifier("Table", name)?;

    if !APP_ID.is_match(app_id) {
        return Err(ValidationError::InvalidAppId(app_id.to_string()));
    }

    let prefix = table_prefix(app_id);
    match name.strip_prefix(&prefix) {
        Some(suffix) if !suffix.is_empty() => {}
        _ => {
            tracing::warn!("🚫 Rejected table '{}' outside app '{}'", name, app_id);
            return Err(ValidationError::WrongAppPrefix {
                name: name.to_string(),
                app_id: app_id.to_string(),
            });
        }
    }

    screen_keywords("Table", name)?;
    Ok(name)
}

/// Validate a column name
///
/// Reserved columns are rejected for write targets; WHERE clauses pass
/// `allow_reserved = true` so the primary key can be referenced.
pub fn validate_column_name(name: &str, allow_reserved: bool) -> Result<&str, ValidationError> {
    check_identifier("Column", name)?;

    let lowered = name.to_ascii_lowercase();
    if RESERVED_COLUMNS.contains(&lowered.as_str()) {
        return if allow_reserved {
            Ok(name)
        } else {
            Err(ValidationError::ReservedColumn(name.to_string()))
        };
    }

    screen_keywords("Column", name)?;
    Ok(name)
}

/// Validate a catalog type name used as a parameter cast
///
/// Only the identifier grammar applies; the name comes from the catalog, not
/// from workflow authors.
pub fn validate_type_name(name: &str) -> Result<&str, ValidationError> {
    check_identifier("Type", name)?;
    Ok(name)
}

/// Prefix every table of `app_id` must carry
pub fn table_prefix(app_id: &str) -> String {
    format!("app_{}_", app_id)
}

/// Double-quote an identifier that already passed validation
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn check_identifier(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty { kind });
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            kind,
            name: name.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    if !IDENTIFIER.is_match(name) {
        return Err(ValidationError::InvalidFormat {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn screen_keywords(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    let lowered = name.to_ascii_lowercase();

    if let Some(prefix) = SYSTEM_PREFIXES.iter().find(|p| lowered.contains(*p)) {
        return Err(ValidationError::SystemPrefix {
            kind,
            name: name.to_string(),
            prefix: *prefix,
        });
    }

    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| lowered.contains(*k)) {
        return Err(ValidationError::ForbiddenKeyword {
            kind,
            name: name.to_string(),
            keyword: *keyword,
        });
    }

    Ok(())
}
