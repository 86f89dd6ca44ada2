//! Postgres access for app-scoped tables
//!
//! Only `BuiltQuery` values produced by the safe query builder are executed
//! here. Rows come back as JSON objects so callers never deal with driver
//! types.

use crate::datatable::query_builder::BuiltQuery;
use crate::datatable::schema::{ColumnMetadata, ColumnType, SqlValue};
use crate::datatable::security::OwnershipLookup;
use crate::error::DataError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

/// Storage operations the table service needs
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Catalog columns of `table` in the current schema, in ordinal order
    async fn discover_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>, DataError>;

    /// Execute a built statement and return every produced row
    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Map<String, Value>>, DataError>;
}

/// `TableStore` backed by a shared Postgres pool
#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CatalogColumn {
    column_name: String,
    data_type: String,
    udt_name: String,
    is_nullable: String,
    column_default: Option<String>,
    character_maximum_length: Option<i32>,
    numeric_precision: Option<i32>,
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn discover_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>, DataError> {
        // information_schema uses domain types, cast them to plain ones
        let rows: Vec<CatalogColumn> = sqlx::query_as(
            r#"
            SELECT column_name::text AS column_name,
                   data_type::text AS data_type,
                   udt_name::text AS udt_name,
                   is_nullable::text AS is_nullable,
                   column_default::text AS column_default,
                   character_maximum_length::int4 AS character_maximum_length,
                   numeric_precision::int4 AS numeric_precision
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(log_db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnMetadata {
                column_type: ColumnType::from_sql(&row.data_type),
                name: row.column_name,
                data_type: row.data_type,
                udt_name: row.udt_name,
                nullable: row.is_nullable.eq_ignore_ascii_case("YES"),
                default: row.column_default,
                max_length: row.character_maximum_length,
                precision: row.numeric_precision,
            })
            .collect())
    }

    async fn fetch_rows(&self, built: &BuiltQuery) -> Result<Vec<Map<String, Value>>, DataError> {
        // Postgres renders each row to JSON itself, which works for SELECT and
        // for data-modifying statements with RETURNING alike.
        let sql = format!(
            "WITH result AS ({}) SELECT to_jsonb(result) AS row FROM result",
            built.query
        );
        tracing::debug!("🗄️ Executing: {} ({} params)", built.query, built.params.len());

        let mut query = sqlx::query(&sql);
        for value in &built.params {
            query = bind_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(log_db_error)?;
        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("row").map_err(log_db_error)?;
                Ok(match value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                })
            })
            .collect()
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Timestamp(ts) => query.bind(*ts),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Json(v) => query.bind(v.clone()),
        SqlValue::Text(s) => query.bind(s.clone()),
    }
}

fn log_db_error(e: sqlx::Error) -> DataError {
    tracing::error!("❌ Database error: {}", e);
    DataError::Database(e)
}

/// Ownership answered from the platform `apps` table
#[derive(Debug, Clone)]
pub struct PgOwnershipLookup {
    pool: PgPool,
}

impl PgOwnershipLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnershipLookup for PgOwnershipLookup {
    async fn owns_app(&self, app_id: &str, user_id: &str) -> Result<bool, DataError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM apps WHERE id::text = $1 AND owner_id::text = $2)",
        )
        .bind(app_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(log_db_error)
    }
}
