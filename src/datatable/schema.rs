//! Table metadata, type coercion and payload validation
//!
//! Column metadata always comes from the database catalog, never from the
//! client. Raw JSON input is coerced to the declared column type before it is
//! bound, and payload validation reports every problem at once.

use crate::datatable::identifier::{validate_column_name, validate_type_name, RESERVED_COLUMNS};
use crate::datatable::store::TableStore;
use crate::error::{DataError, SchemaError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Column type families the coercion rules distinguish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    Json,
    Text,
}

impl ColumnType {
    /// Map a Postgres `data_type` (as reported by information_schema) to a family
    pub fn from_sql(data_type: &str) -> Self {
        let lowered = data_type.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "smallint" | "serial"
            | "bigserial" => ColumnType::Integer,
            "numeric" | "decimal" | "real" | "double precision" | "float4" | "float8" => {
                ColumnType::Float
            }
            "boolean" | "bool" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "json" | "jsonb" => ColumnType::Json,
            t if t.starts_with("timestamp") => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ColumnType::Integer => "an integer",
            ColumnType::Float => "a number",
            ColumnType::Boolean => "a boolean",
            ColumnType::Timestamp => "a timestamp",
            ColumnType::Date => "a date",
            ColumnType::Json => "JSON",
            ColumnType::Text => "text",
        }
    }
}

/// Catalog types that accept a plain text parameter without a cast
const STRING_TYPES: &[&str] = &["text", "character varying", "varchar", "character", "char", "bpchar", "name"];

/// One column as discovered from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    /// Raw SQL type name
    pub data_type: String,
    /// Underlying catalog type (`uuid`, `inet`, an enum's own name)
    #[serde(default)]
    pub udt_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_sql(&data_type),
            udt_name: data_type.clone(),
            data_type,
            nullable,
            default: None,
            max_length: None,
            precision: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_udt_name(mut self, udt_name: impl Into<String>) -> Self {
        self.udt_name = udt_name.into();
        self
    }

    /// Type a text-bound parameter must be cast to for this column
    ///
    /// Set for text-family columns whose catalog type is not a string type,
    /// such as `uuid`, `inet`, `interval`, `time` or an enum.
    pub fn cast_type(&self) -> Option<&str> {
        if self.column_type != ColumnType::Text || self.data_type.eq_ignore_ascii_case("ARRAY") {
            return None;
        }
        let lowered = self.data_type.to_ascii_lowercase();
        if STRING_TYPES.contains(&lowered.as_str()) {
            return None;
        }
        validate_type_name(&self.udt_name).ok()
    }

    /// A value must be supplied on insert
    pub fn required(&self) -> bool {
        !self.nullable
            && self.default.is_none()
            && !RESERVED_COLUMNS.contains(&self.name.to_ascii_lowercase().as_str())
    }
}

/// Metadata for one app-scoped table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub app_id: String,
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A value ready to be bound as a query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
    Text(String),
}

impl SqlValue {
    /// Infer a parameter from JSON when no column type is known
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// Coerce a raw JSON value to the representation of `column_type`
///
/// Unparseable numbers and dates become NULL; booleans default to false.
pub fn convert_value(raw: &Value, column_type: &ColumnType) -> SqlValue {
    if raw.is_null() {
        return SqlValue::Null;
    }

    match column_type {
        ColumnType::Integer => parse_integer(raw).map(SqlValue::Int).unwrap_or(SqlValue::Null),
        ColumnType::Float => parse_float(raw).map(SqlValue::Float).unwrap_or(SqlValue::Null),
        ColumnType::Boolean => SqlValue::Bool(match raw {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true" || s == "1",
            _ => false,
        }),
        ColumnType::Timestamp => parse_timestamp(raw)
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        ColumnType::Date => parse_timestamp(raw)
            .map(|ts| SqlValue::Date(ts.date_naive()))
            .unwrap_or(SqlValue::Null),
        ColumnType::Json => match raw {
            Value::String(s) => serde_json::from_str(s)
                .map(SqlValue::Json)
                .unwrap_or_else(|_| SqlValue::Json(Value::String(s.clone()))),
            other => SqlValue::Json(other.clone()),
        },
        ColumnType::Text => match raw {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        },
    }
}

fn parse_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_to_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_to_i64))
        }
        _ => None,
    }
}

/// Truncate toward zero; values outside the `i64` range do not convert
fn truncate_to_i64(f: f64) -> Option<i64> {
    // 2^63, the first float past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let f = f.trunc();
    (f.is_finite() && f >= -LIMIT && f < LIMIT).then_some(f as i64)
}

fn parse_float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Whether a payload is for a new row or a partial update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Validate a payload against the table metadata and coerce every value
///
/// Returns the typed columns in payload order, or every error found.
pub fn validate_and_convert(
    data: &Map<String, Value>,
    metadata: &TableMetadata,
    mode: WriteMode,
) -> Result<Vec<(String, SqlValue)>, SchemaError> {
    let mut errors = Vec::new();
    let mut typed = Vec::with_capacity(data.len());

    for (name, raw) in data {
        if let Err(e) = validate_column_name(name, false) {
            errors.push(e.to_string());
            continue;
        }

        let Some(column) = metadata.column(name) else {
            errors.push(format!("Unknown column '{}'", name));
            continue;
        };

        if is_blank(raw) {
            if column.nullable {
                typed.push((name.clone(), SqlValue::Null));
            } else if mode == WriteMode::Update || column.required() {
                errors.push(format!("Column '{}' is required", name));
            }
            // otherwise omitted so the column default applies
            continue;
        }

        let value = convert_value(raw, &column.column_type);
        if value.is_null() {
            errors.push(format!(
                "Invalid value for column '{}': expected {}",
                name,
                column.column_type.describe()
            ));
            continue;
        }
        typed.push((name.clone(), value));
    }

    if mode == WriteMode::Create {
        for column in metadata.columns.iter().filter(|c| c.required()) {
            if !data.contains_key(&column.name) {
                errors.push(format!("Column '{}' is required", column.name));
            }
        }
    }

    if errors.is_empty() {
        Ok(typed)
    } else {
        Err(SchemaError(errors))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Cached catalog lookups per table
///
/// Tables are schema-on-write, so entries expire after `ttl` and writers can
/// invalidate eagerly.
pub struct SchemaRegistry {
    store: Arc<dyn TableStore>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, Arc<TableMetadata>)>>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn TableStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get table metadata, discovering it from the catalog when not cached
    pub async fn discover_schema(
        &self,
        app_id: &str,
        table_name: &str,
    ) -> Result<Arc<TableMetadata>, DataError> {
        {
            let cache = self.cache.read().await;
            if let Some((loaded_at, metadata)) = cache.get(table_name) {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(metadata));
                }
            }
        }

        tracing::debug!("🔎 Discovering schema for table '{}'", table_name);
        let columns = self.store.discover_columns(table_name).await?;
        if columns.is_empty() {
            return Err(DataError::TableNotFound(table_name.to_string()));
        }

        let metadata = Arc::new(TableMetadata {
            app_id: app_id.to_string(),
            table_name: table_name.to_string(),
            columns,
        });

        let mut cache = self.cache.write().await;
        cache.insert(table_name.to_string(), (Instant::now(), Arc::clone(&metadata)));
        Ok(metadata)
    }

    pub async fn invalidate(&self, table_name: &str) {
        self.cache.write().await.remove(table_name);
    }
}
