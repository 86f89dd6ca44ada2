//! Parameterized query construction for app-scoped tables
//!
//! Values are always bound as positional parameters (`$1`, `$2`, ...). The only
//! text interpolated into SQL are identifiers, which are re-validated and
//! quoted at build time.

use crate::datatable::identifier::{
    quote, validate_column_name, validate_table_name, validate_type_name,
};
use crate::datatable::schema::SqlValue;
use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Upper bound accepted by `set_limit`
pub const MAX_LIMIT: u64 = 1000;

/// Whitelisted comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    NotEqAlt,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parse an operator as written by workflow authors (case-insensitive)
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" => Operator::Eq,
            "!=" => Operator::NotEq,
            "<>" => Operator::NotEqAlt,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Gte,
            "<=" => Operator::Lte,
            "LIKE" => Operator::Like,
            "ILIKE" => Operator::ILike,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "IS NULL" => Operator::IsNull,
            "IS NOT NULL" => Operator::IsNotNull,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::NotEqAlt => "<>",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// Operators that accept a JSON null, rewritten to `IS [NOT] NULL`
    pub fn accepts_null(&self) -> bool {
        matches!(self, Operator::Eq | Operator::NotEq | Operator::NotEqAlt)
    }

    fn is_pattern(&self) -> bool {
        matches!(self, Operator::Like | Operator::ILike)
    }
}

/// How a condition joins the ones before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl Logic {
    fn as_sql(&self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

/// Sort direction for ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Asc,
    #[serde(alias = "desc")]
    Desc,
}

/// A WHERE condition as authored in block configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub logic: Logic,
}

fn default_operator() -> String {
    "=".to_string()
}

/// Right-hand side of a WHERE condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Single(SqlValue),
    List(Vec<SqlValue>),
}

#[derive(Debug, Clone)]
struct WhereClause {
    field: String,
    operator: Operator,
    operand: Operand,
    logic: Logic,
}

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub query: String,
    pub params: Vec<SqlValue>,
}

/// Stateful, resettable builder for one app's tables
#[derive(Debug, Clone)]
pub struct SafeQueryBuilder {
    app_id: String,
    conditions: Vec<WhereClause>,
    order_by: Vec<(String, SortDirection)>,
    casts: HashMap<String, String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SafeQueryBuilder {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            casts: HashMap::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add a WHERE condition; `logic` is ignored for the first one
    pub fn add_where(
        &mut self,
        field: &str,
        operator: Operator,
        operand: Operand,
        logic: Logic,
    ) -> Result<&mut Self, QueryError> {
        validate_column_name(field, true)?;

        match (&operand, operator) {
            (Operand::List(values), op) if op.is_list() && !values.is_empty() => {}
            (_, op) if op.is_list() => {
                return Err(QueryError::InvalidOperand {
                    operator: op.as_sql(),
                    expected: "a non-empty list",
                })
            }
            (_, op) if op.is_unary() => {}
            (Operand::Single(value), op) if value.is_null() && !op.accepts_null() => {
                return Err(QueryError::InvalidOperand {
                    operator: op.as_sql(),
                    expected: "a non-null value",
                })
            }
            (Operand::Single(_), _) => {}
            (_, op) => {
                return Err(QueryError::InvalidOperand {
                    operator: op.as_sql(),
                    expected: "a single value",
                })
            }
        }

        self.conditions.push(WhereClause {
            field: field.to_string(),
            operator,
            operand,
            logic,
        });
        Ok(self)
    }

    pub fn add_order_by(&mut self, field: &str, direction: SortDirection) -> Result<&mut Self, QueryError> {
        validate_column_name(field, true)?;
        self.order_by.push((field.to_string(), direction));
        Ok(self)
    }

    /// Cast every bound value of `column` to the catalog type `pg_type`
    ///
    /// Needed for columns such as `uuid` or enums whose values travel as text.
    pub fn cast_column(&mut self, column: &str, pg_type: &str) -> Result<&mut Self, QueryError> {
        validate_column_name(column, true)?;
        validate_type_name(pg_type)?;
        self.casts.insert(column.to_string(), pg_type.to_string());
        Ok(self)
    }

    pub fn set_limit(&mut self, limit: u64) -> Result<&mut Self, QueryError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(QueryError::LimitOutOfRange { max: MAX_LIMIT });
        }
        let limit = i64::try_from(limit).map_err(|_| QueryError::LimitOutOfRange { max: MAX_LIMIT })?;
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn set_offset(&mut self, offset: u64) -> Result<&mut Self, QueryError> {
        let offset = i64::try_from(offset).map_err(|_| QueryError::OffsetOutOfRange { max: i64::MAX })?;
        self.offset = Some(offset);
        Ok(self)
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Clear conditions, ordering, casts and paging so the builder can be reused
    pub fn reset(&mut self) -> &mut Self {
        self.conditions.clear();
        self.order_by.clear();
        self.casts.clear();
        self.limit = None;
        self.offset = None;
        self
    }

    /// `SELECT` with optional column list (`*` when empty)
    pub fn build_select_query(&self, table: &str, columns: &[String]) -> Result<BuiltQuery, QueryError> {
        validate_table_name(table, &self.app_id)?;

        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| validate_column_name(c, true).map(quote))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };

        let mut params = Vec::new();
        let mut query = format!("SELECT {} FROM {}", projection, quote(table));
        self.push_where(&mut query, &mut params)?;

        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(field, dir)| {
                    validate_column_name(field, true)?;
                    let dir = match dir {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    Ok(format!("{} {}", quote(field), dir))
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            query.push_str(" ORDER BY ");
            query.push_str(&order.join(", "));
        }

        if let Some(limit) = self.limit {
            params.push(SqlValue::Int(limit));
            query.push_str(&format!(" LIMIT ${}", params.len()));
        }
        if let Some(offset) = self.offset {
            params.push(SqlValue::Int(offset));
            query.push_str(&format!(" OFFSET ${}", params.len()));
        }

        Ok(BuiltQuery { query, params })
    }

    /// `UPDATE ... SET ... WHERE ... RETURNING *`
    ///
    /// Fails without at least one WHERE condition, so table-wide updates are
    /// impossible through this path.
    pub fn build_update_query(
        &self,
        table: &str,
        data: &[(String, SqlValue)],
    ) -> Result<BuiltQuery, QueryError> {
        validate_table_name(table, &self.app_id)?;
        if self.conditions.is_empty() {
            return Err(QueryError::MissingWhere);
        }
        if data.is_empty() {
            return Err(QueryError::EmptyData("UPDATE"));
        }

        let mut params = Vec::with_capacity(data.len() + self.conditions.len());
        let mut assignments = Vec::with_capacity(data.len());
        for (column, value) in data {
            validate_column_name(column, false)?;
            let slot = placeholder(&mut params, value, self.cast_for(column));
            assignments.push(format!("{} = {}", quote(column), slot));
        }

        let mut query = format!("UPDATE {} SET {}", quote(table), assignments.join(", "));
        self.push_where(&mut query, &mut params)?;
        query.push_str(" RETURNING *");

        Ok(BuiltQuery { query, params })
    }

    /// `INSERT ... RETURNING *`
    pub fn build_insert_query(
        &self,
        table: &str,
        data: &[(String, SqlValue)],
    ) -> Result<BuiltQuery, QueryError> {
        validate_table_name(table, &self.app_id)?;

        if data.is_empty() {
            return Ok(BuiltQuery {
                query: format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quote(table)),
                params: Vec::new(),
            });
        }

        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len());
        for (column, value) in data {
            validate_column_name(column, false)?;
            columns.push(quote(column));
            placeholders.push(placeholder(&mut params, value, self.cast_for(column)));
        }

        Ok(BuiltQuery {
            query: format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                quote(table),
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        })
    }

    fn push_where(&self, query: &mut String, params: &mut Vec<SqlValue>) -> Result<(), QueryError> {
        for (i, clause) in self.conditions.iter().enumerate() {
            validate_column_name(&clause.field, true)?;

            query.push_str(if i == 0 { " WHERE " } else { " " });
            if i > 0 {
                query.push_str(clause.logic.as_sql());
                query.push(' ');
            }

            let field = quote(&clause.field);
            // pattern operands are always text, whatever the column type
            let cast = if clause.operator.is_pattern() {
                None
            } else {
                self.cast_for(&clause.field)
            };
            match &clause.operand {
                _ if clause.operator.is_unary() => {
                    query.push_str(&format!("{} {}", field, clause.operator.as_sql()));
                }
                Operand::Single(SqlValue::Null) => {
                    let test = match clause.operator {
                        Operator::Eq => "IS NULL",
                        Operator::NotEq | Operator::NotEqAlt => "IS NOT NULL",
                        op => {
                            return Err(QueryError::InvalidOperand {
                                operator: op.as_sql(),
                                expected: "a non-null value",
                            })
                        }
                    };
                    query.push_str(&format!("{} {}", field, test));
                }
                Operand::List(values) => {
                    let mut placeholders = Vec::with_capacity(values.len());
                    for value in values {
                        placeholders.push(placeholder(params, value, cast));
                    }
                    query.push_str(&format!(
                        "{} {} ({})",
                        field,
                        clause.operator.as_sql(),
                        placeholders.join(", ")
                    ));
                }
                Operand::Single(value) => {
                    let slot = placeholder(params, value, cast);
                    query.push_str(&format!("{} {} {}", field, clause.operator.as_sql(), slot));
                }
                Operand::None => {
                    return Err(QueryError::InvalidOperand {
                        operator: clause.operator.as_sql(),
                        expected: "a single value",
                    })
                }
            }
        }
        Ok(())
    }

    fn cast_for(&self, column: &str) -> Option<&str> {
        self.casts.get(column).map(String::as_str)
    }
}

/// Bind `value` and return its placeholder, cast when the column needs it
///
/// NULL is written as a literal: an untyped parameter would be declared as
/// text and clash with non-text columns.
fn placeholder(params: &mut Vec<SqlValue>, value: &SqlValue, cast: Option<&str>) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }
    params.push(value.clone());
    match cast {
        Some(pg_type) => format!("${}::{}", params.len(), quote(pg_type)),
        None => format!("${}", params.len()),
    }
}
