//! `db.find`, `db.create` and `db.update` on app-scoped tables

use super::{Block, BlockEnv, BlockOutcome};
use crate::datatable::{Caller, Condition, FindRequest, OrderBy};
use crate::error::BlockError;
use serde_json::{json, Map, Value};

fn caller<'a>(env: &'a BlockEnv<'_>) -> Caller<'a> {
    Caller {
        app_id: env.app_id,
        user_id: env.user_id,
    }
}

fn conditions(env: &BlockEnv<'_>) -> Result<Vec<Condition>, String> {
    match env.config.get("conditions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|_| "conditions must be a list of {field, operator, value}".to_string()),
    }
}

fn order_by(env: &BlockEnv<'_>) -> Result<Vec<OrderBy>, String> {
    let invalid = |_| "orderBy must be {field, direction} or a list of them".to_string();
    match env.config.get("orderBy") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(field)) if !field.trim().is_empty() => Ok(vec![OrderBy {
            field: field.trim().to_string(),
            direction: Default::default(),
        }]),
        Some(Value::Array(items)) => serde_json::from_value(Value::Array(items.clone())).map_err(invalid),
        Some(single) => serde_json::from_value(single.clone())
            .map(|order| vec![order])
            .map_err(invalid),
    }
}

fn data<'a>(env: &'a BlockEnv<'_>) -> Option<&'a Map<String, Value>> {
    env.config.get("data").and_then(Value::as_object)
}

pub(super) async fn execute_find(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::DbFind;
    let Some(table_name) = env.str("tableName") else {
        return Ok(BlockOutcome::missing(block, "tableName"));
    };
    let conditions = match conditions(env) {
        Ok(c) => c,
        Err(message) => return Ok(BlockOutcome::failure(block, message)),
    };
    let order_by = match order_by(env) {
        Ok(o) => o,
        Err(message) => return Ok(BlockOutcome::failure(block, message)),
    };

    let request = FindRequest {
        table_name: table_name.to_string(),
        conditions,
        order_by,
        limit: env.u64("limit"),
        offset: env.u64("offset"),
        columns: super::string_list(env.config.get("columns")),
    };
    let rows = env.services.tables.find(&caller(env), &request).await?;

    let rows = Value::Array(rows.into_iter().map(Value::Object).collect());
    let mut payload = Map::new();
    payload.insert("count".into(), json!(rows.as_array().map_or(0, Vec::len)));
    payload.insert("rows".into(), rows.clone());
    Ok(BlockOutcome::success(block, payload).with_output(rows))
}

pub(super) async fn execute_create(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::DbCreate;
    let Some(table_name) = env.str("tableName") else {
        return Ok(BlockOutcome::missing(block, "tableName"));
    };
    let Some(data) = data(env) else {
        return Ok(BlockOutcome::missing(block, "data"));
    };

    let row = Value::Object(env.services.tables.create(&caller(env), table_name, data).await?);
    tracing::info!("➕ Inserted row into '{}'", table_name);

    let mut payload = Map::new();
    if let Some(id) = row.get("id") {
        payload.insert("id".into(), id.clone());
    }
    payload.insert("row".into(), row.clone());
    Ok(BlockOutcome::success(block, payload).with_output(row))
}

pub(super) async fn execute_update(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::DbUpdate;
    let Some(table_name) = env.str("tableName") else {
        return Ok(BlockOutcome::missing(block, "tableName"));
    };
    let conditions = match conditions(env) {
        Ok(c) => c,
        Err(message) => return Ok(BlockOutcome::failure(block, message)),
    };
    let Some(data) = data(env) else {
        return Ok(BlockOutcome::missing(block, "data"));
    };

    let rows = env
        .services
        .tables
        .update(&caller(env), table_name, &conditions, data)
        .await?;
    let row_count = rows.len();
    tracing::info!("✏️ Updated {} rows in '{}'", row_count, table_name);

    let rows = Value::Array(rows.into_iter().map(Value::Object).collect());
    let mut payload = Map::new();
    payload.insert("rowCount".into(), json!(row_count));
    payload.insert("rows".into(), rows.clone());
    Ok(BlockOutcome::success(block, payload).with_output(rows))
}
