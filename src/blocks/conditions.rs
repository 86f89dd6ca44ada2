//! `match` and `isFilled` conditions

use super::{string_list, Block, BlockEnv, BlockOutcome};
use regex::Regex;
use serde_json::{json, Map, Value};

pub(super) fn execute_match(env: &BlockEnv<'_>) -> BlockOutcome {
    let Some(variable) = env.str("variable") else {
        return BlockOutcome::missing(Block::Match, "variable");
    };
    let operator = env.str("operator").unwrap_or("equals");
    let actual = env.context.lookup(variable).cloned().unwrap_or(Value::Null);
    let expected = env.config.get("value").cloned().unwrap_or(Value::Null);

    let outcome = match operator {
        "equals" => Ok(loose_eq(&actual, &expected)),
        "notEquals" => Ok(!loose_eq(&actual, &expected)),
        "contains" => Ok(match &actual {
            Value::Array(items) => items.iter().any(|item| loose_eq(item, &expected)),
            Value::String(s) => s.contains(text(&expected).as_str()),
            _ => false,
        }),
        "startsWith" => Ok(actual.as_str().is_some_and(|s| s.starts_with(text(&expected).as_str()))),
        "endsWith" => Ok(actual.as_str().is_some_and(|s| s.ends_with(text(&expected).as_str()))),
        "greaterThan" => Ok(matches!((number(&actual), number(&expected)), (Some(a), Some(b)) if a > b)),
        "lessThan" => Ok(matches!((number(&actual), number(&expected)), (Some(a), Some(b)) if a < b)),
        "matches" => Regex::new(&text(&expected))
            .map(|re| re.is_match(&text(&actual)))
            .map_err(|_| format!("Invalid pattern '{}'", text(&expected))),
        other => Err(format!("Unsupported operator '{}'", other)),
    };

    match outcome {
        Ok(result) => {
            let mut payload = Map::new();
            payload.insert("result".into(), Value::Bool(result));
            payload.insert("variable".into(), json!(variable));
            payload.insert("operator".into(), json!(operator));
            BlockOutcome::success(Block::Match, payload).with_output(Value::Bool(result))
        }
        Err(message) => BlockOutcome::failure(Block::Match, message).with_payload("result", Value::Bool(false)),
    }
}

pub(super) fn execute_is_filled(env: &BlockEnv<'_>) -> BlockOutcome {
    let mut variables = string_list(env.config.get("variables"));
    if let Some(single) = env.str("variable") {
        variables.push(single.to_string());
    }
    if variables.is_empty() {
        return BlockOutcome::missing(Block::IsFilled, "variables");
    }

    let missing: Vec<String> = variables
        .into_iter()
        .filter(|v| !env.context.lookup(v).is_some_and(is_filled))
        .collect();
    let result = missing.is_empty();

    let mut payload = Map::new();
    payload.insert("result".into(), Value::Bool(result));
    payload.insert("missing".into(), json!(missing));
    BlockOutcome::success(Block::IsFilled, payload).with_output(Value::Bool(result))
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Equality that tolerates `"5"` vs `5` from form inputs
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => text(a) == text(b),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
