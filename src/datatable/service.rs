//! Entry point of the dynamic-table layer used by the database blocks
//!
//! Every operation runs the same gates in order: rate limit, table name,
//! ownership, condition and value screening, schema discovery and coercion,
//! query building. The store is only reached after all of them pass.

use crate::datatable::identifier::validate_table_name;
use crate::datatable::query_builder::{
    Condition, Operand, Operator, SafeQueryBuilder, SortDirection,
};
use crate::datatable::rate_limit::{Operation, RateLimiter};
use crate::datatable::schema::{
    convert_value, validate_and_convert, SchemaRegistry, SqlValue, TableMetadata, WriteMode,
};
use crate::datatable::security::{
    ensure_app_access, validate_conditions, validate_value, ExpectedType, OwnershipLookup,
};
use crate::datatable::store::TableStore;
use crate::error::{DataError, SchemaError};
use crate::services::publish::{app_channel, Publisher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Sort key for `find`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Parameters of a `find` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub table_name: String,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub columns: Vec<String>,
}

/// Who is asking, normalized to strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller<'a> {
    pub app_id: &'a str,
    pub user_id: &'a str,
}

pub type Row = Map<String, Value>;

pub struct TableService {
    store: Arc<dyn TableStore>,
    schemas: SchemaRegistry,
    limiter: Arc<dyn RateLimiter>,
    ownership: Arc<dyn OwnershipLookup>,
    publisher: Arc<dyn Publisher>,
}

impl TableService {
    pub fn new(
        store: Arc<dyn TableStore>,
        limiter: Arc<dyn RateLimiter>,
        ownership: Arc<dyn OwnershipLookup>,
        publisher: Arc<dyn Publisher>,
        schema_ttl: Duration,
    ) -> Self {
        Self {
            schemas: SchemaRegistry::new(Arc::clone(&store), schema_ttl),
            store,
            limiter,
            ownership,
            publisher,
        }
    }

    pub async fn find(&self, caller: &Caller<'_>, request: &FindRequest) -> Result<Vec<Row>, DataError> {
        self.admit(caller, Operation::Read, &request.table_name).await?;
        validate_conditions(&request.conditions)?;

        let metadata = self.schemas.discover_schema(caller.app_id, &request.table_name).await?;

        let mut builder = builder_for(caller.app_id, &metadata);
        apply_conditions(&mut builder, &request.conditions, &metadata)?;
        for order in &request.order_by {
            builder.add_order_by(&order.field, order.direction)?;
        }
        if let Some(limit) = request.limit {
            builder.set_limit(limit)?;
        }
        if let Some(offset) = request.offset {
            builder.set_offset(offset)?;
        }

        let built = builder.build_select_query(&request.table_name, &request.columns)?;
        let rows = self.store.fetch_rows(&built).await?;
        tracing::debug!("🔎 {} rows from '{}'", rows.len(), request.table_name);
        Ok(rows)
    }

    /// Insert one row and return it as stored
    pub async fn create(&self, caller: &Caller<'_>, table_name: &str, data: &Row) -> Result<Row, DataError> {
        self.admit(caller, Operation::Create, table_name).await?;
        validate_value(&Value::Object(data.clone()), ExpectedType::Object)?;

        let metadata = self.schemas.discover_schema(caller.app_id, table_name).await?;
        let typed = validate_and_convert(data, &metadata, WriteMode::Create)?;

        let built = builder_for(caller.app_id, &metadata).build_insert_query(table_name, &typed)?;
        let row = self.store.fetch_rows(&built).await?.into_iter().next().unwrap_or_default();

        self.announce(caller.app_id, table_name, "create", 1).await;
        Ok(row)
    }

    /// Update matching rows and return them; zero matches is not an error
    pub async fn update(
        &self,
        caller: &Caller<'_>,
        table_name: &str,
        conditions: &[Condition],
        data: &Row,
    ) -> Result<Vec<Row>, DataError> {
        self.admit(caller, Operation::Update, table_name).await?;
        validate_conditions(conditions)?;
        if conditions.is_empty() {
            return Err(crate::error::QueryError::MissingWhere.into());
        }
        validate_value(&Value::Object(data.clone()), ExpectedType::Object)?;

        let metadata = self.schemas.discover_schema(caller.app_id, table_name).await?;
        let typed = validate_and_convert(data, &metadata, WriteMode::Update)?;

        let mut builder = builder_for(caller.app_id, &metadata);
        apply_conditions(&mut builder, conditions, &metadata)?;
        let built = builder.build_update_query(table_name, &typed)?;
        let rows = self.store.fetch_rows(&built).await?;

        if !rows.is_empty() {
            self.announce(caller.app_id, table_name, "update", rows.len()).await;
        }
        Ok(rows)
    }

    /// Rate limit, table name and ownership gates shared by every operation
    async fn admit(&self, caller: &Caller<'_>, operation: Operation, table_name: &str) -> Result<(), DataError> {
        if !self.limiter.check(caller.user_id, operation).await {
            return Err(DataError::RateLimited {
                operation: operation.as_str(),
            });
        }
        validate_table_name(table_name, caller.app_id)?;
        ensure_app_access(self.ownership.as_ref(), caller.app_id, caller.user_id).await
    }

    async fn announce(&self, app_id: &str, table_name: &str, operation: &str, row_count: usize) {
        self.publisher
            .publish(
                &app_channel(app_id),
                "table:changed",
                json!({ "tableName": table_name, "operation": operation, "rowCount": row_count }),
            )
            .await;
    }
}

/// Builder for one table with casts for its text-bound non-string columns
fn builder_for(app_id: &str, metadata: &TableMetadata) -> SafeQueryBuilder {
    let mut builder = SafeQueryBuilder::new(app_id);
    for column in &metadata.columns {
        let Some(pg_type) = column.cast_type() else { continue };
        // a column failing identifier rules can never be referenced anyway
        if let Err(e) = builder.cast_column(&column.name, pg_type) {
            tracing::debug!("🔎 No cast for column '{}': {}", column.name, e);
        }
    }
    builder
}

/// Convert screened conditions to typed builder clauses using column metadata
fn apply_conditions(
    builder: &mut SafeQueryBuilder,
    conditions: &[Condition],
    metadata: &TableMetadata,
) -> Result<(), DataError> {
    let mut errors = Vec::new();

    for condition in conditions {
        let Some(operator) = Operator::parse(&condition.operator) else {
            errors.push(format!("Operator '{}' is not allowed", condition.operator));
            continue;
        };
        let Some(column) = metadata.column(&condition.field) else {
            errors.push(format!("Unknown column '{}'", condition.field));
            continue;
        };

        let convert = |raw: &Value| -> Option<SqlValue> {
            let value = match operator {
                Operator::Like | Operator::ILike => match raw {
                    Value::String(s) => SqlValue::Text(s.clone()),
                    other => SqlValue::Text(other.to_string()),
                },
                _ => convert_value(raw, &column.column_type),
            };
            (raw.is_null() || !value.is_null()).then_some(value)
        };

        let operand = if operator.is_unary() {
            Operand::None
        } else if operator.is_list() {
            let items = condition.value.as_array().map(Vec::as_slice).unwrap_or_default();
            match items.iter().map(convert).collect::<Option<Vec<_>>>() {
                Some(values) => Operand::List(values),
                None => {
                    errors.push(format!("Invalid value for column '{}'", condition.field));
                    continue;
                }
            }
        } else {
            match convert(&condition.value) {
                Some(value) => Operand::Single(value),
                None => {
                    errors.push(format!("Invalid value for column '{}'", condition.field));
                    continue;
                }
            }
        };

        builder.add_where(&condition.field, operator, operand, condition.logic)?;
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError(errors).into())
    }
}
