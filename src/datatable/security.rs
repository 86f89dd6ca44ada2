//! Value, condition and ownership screening for the dynamic-table layer

use crate::datatable::identifier::validate_column_name;
use crate::datatable::query_builder::{Condition, Operator};
use crate::error::{DataError, SecurityError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub const MAX_STRING_LEN: usize = 10_000;
pub const MAX_ARRAY_LEN: usize = 1_000;
pub const MAX_OBJECT_KEYS: usize = 100;
pub const MAX_CONDITIONS: usize = 50;
pub const MAX_IN_VALUES: usize = 100;

static SQL_INJECTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(select|insert|update|delete|drop|union|exec|alter|create|truncate)\b.*(--|;|/\*)",
        r"(?i)(;|--|/\*)\s*(select|insert|update|delete|drop|union|exec|alter|create|truncate)\b",
        r"(?i)\bunion\b\s+(all\s+)?select\b",
        r"(?i)\b(or|and)\b\s+('[^']*'|\d+)\s*=\s*('[^']*'|\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("sql injection regex"))
    .collect()
});

static SCRIPT_INJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*script|<[^>]*\bon[a-z]+\s*=|javascript\s*:").expect("script injection regex")
});

/// Shape a value is expected to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ExpectedType {
    fn name(&self) -> &'static str {
        match self {
            ExpectedType::Any => "any",
            ExpectedType::String => "string",
            ExpectedType::Number => "number",
            ExpectedType::Boolean => "boolean",
            ExpectedType::Array => "array",
            ExpectedType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ExpectedType::Any => true,
            ExpectedType::String => value.is_string(),
            ExpectedType::Number => value.is_number(),
            ExpectedType::Boolean => value.is_boolean(),
            ExpectedType::Array => value.is_array(),
            ExpectedType::Object => value.is_object(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Screen a user-supplied value, recursing into arrays and objects
///
/// Returns the value unchanged when it passes.
pub fn validate_value(value: &Value, expected: ExpectedType) -> Result<Value, SecurityError> {
    if !value.is_null() && !expected.accepts(value) {
        return Err(SecurityError::TypeMismatch {
            expected: expected.name(),
            found: type_name(value),
        });
    }
    screen(value)?;
    Ok(value.clone())
}

fn screen(value: &Value) -> Result<(), SecurityError> {
    match value {
        Value::String(s) => screen_string(s),
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_LEN {
                return Err(SecurityError::ArrayTooLarge { max: MAX_ARRAY_LEN });
            }
            items.iter().try_for_each(screen)
        }
        Value::Object(map) => screen_object(map),
        _ => Ok(()),
    }
}

fn screen_object(map: &Map<String, Value>) -> Result<(), SecurityError> {
    if map.len() > MAX_OBJECT_KEYS {
        return Err(SecurityError::ObjectTooLarge { max: MAX_OBJECT_KEYS });
    }
    for (key, nested) in map {
        validate_column_name(key, true)?;
        screen(nested)?;
    }
    Ok(())
}

fn screen_string(s: &str) -> Result<(), SecurityError> {
    if s.chars().count() > MAX_STRING_LEN {
        return Err(SecurityError::StringTooLong { max: MAX_STRING_LEN });
    }
    if SQL_INJECTION.iter().any(|re| re.is_match(s)) {
        tracing::warn!("🛡️ Rejected value matching SQL injection pattern");
        return Err(SecurityError::SqlInjection);
    }
    if SCRIPT_INJECTION.is_match(s) {
        tracing::warn!("🛡️ Rejected value matching script injection pattern");
        return Err(SecurityError::ScriptInjection);
    }
    Ok(())
}

/// Screen a list of WHERE conditions before they reach the query builder
pub fn validate_conditions(conditions: &[Condition]) -> Result<(), SecurityError> {
    if conditions.len() > MAX_CONDITIONS {
        return Err(SecurityError::TooManyConditions {
            count: conditions.len(),
            max: MAX_CONDITIONS,
        });
    }

    for condition in conditions {
        validate_column_name(&condition.field, true)?;

        let operator = Operator::parse(&condition.operator)
            .ok_or_else(|| SecurityError::OperatorNotAllowed(condition.operator.clone()))?;

        if operator.is_list() {
            match &condition.value {
                Value::Array(items) if items.is_empty() => {
                    return Err(SecurityError::InOperandNotArray { operator: operator.as_sql() })
                }
                Value::Array(items) if items.len() > MAX_IN_VALUES => {
                    return Err(SecurityError::InOperandTooLarge {
                        operator: operator.as_sql(),
                        max: MAX_IN_VALUES,
                    })
                }
                Value::Array(_) => {}
                _ => return Err(SecurityError::InOperandNotArray { operator: operator.as_sql() }),
            }
        }

        if condition.value.is_null() && !operator.is_unary() && !operator.accepts_null() {
            return Err(SecurityError::NullOperand { operator: operator.as_sql() });
        }

        if !operator.is_unary() {
            screen(&condition.value)?;
        }
    }
    Ok(())
}

/// Answers whether a user owns an app
#[async_trait]
pub trait OwnershipLookup: Send + Sync {
    async fn owns_app(&self, app_id: &str, user_id: &str) -> Result<bool, DataError>;
}

/// Fail with `AccessDenied` unless `user_id` owns `app_id`
pub async fn ensure_app_access(
    ownership: &dyn OwnershipLookup,
    app_id: &str,
    user_id: &str,
) -> Result<(), DataError> {
    if ownership.owns_app(app_id, user_id).await? {
        Ok(())
    } else {
        tracing::warn!("🚫 User '{}' denied access to app '{}'", user_id, app_id);
        Err(DataError::AccessDenied {
            app_id: app_id.to_string(),
        })
    }
}
