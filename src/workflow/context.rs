//! Copy-on-write execution context
//!
//! Blocks read an immutable snapshot and return updates; only the engine
//! applies them. Keys are added or overwritten, never removed, and every
//! applied batch bumps the version.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;

static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template regex"));

/// Writes a block asks the engine to make
pub type ContextUpdates = Vec<(String, Value)>;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Arc<Map<String, Value>>,
    version: u64,
}

impl ExecutionContext {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(initial),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Look up a dotted path such as `formData.email` or `items.0.name`
    ///
    /// An exact top-level key wins over path splitting.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Apply a batch of writes; the snapshot is cloned only if still shared
    pub fn apply(&mut self, updates: ContextUpdates) {
        if updates.is_empty() {
            return;
        }
        let values = Arc::make_mut(&mut self.values);
        for (key, value) in updates {
            values.insert(key, value);
        }
        self.version += 1;
    }

    /// Resolve `{{path}}` templates inside `value`
    ///
    /// A string that is exactly one template keeps the referenced JSON type;
    /// templates embedded in longer text are interpolated as text. Missing
    /// paths resolve to null or the empty string respectively.
    pub fn resolve_templates(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_templates(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_templates(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_string(&self, s: &str) -> Value {
        if !s.contains("{{") {
            return Value::String(s.to_string());
        }

        if let Some(caps) = TEMPLATE.captures(s) {
            if caps.get(0).map(|m| m.as_str().len()) == Some(s.trim().len()) {
                return self.lookup(&caps[1]).cloned().unwrap_or(Value::Null);
            }
        }

        let rendered = TEMPLATE.replace_all(s, |caps: &regex::Captures<'_>| {
            match self.lookup(&caps[1]) {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        });
        Value::String(rendered.into_owned())
    }

    pub fn into_map(self) -> Map<String, Value> {
        Arc::try_unwrap(self.values).unwrap_or_else(|shared| (*shared).clone())
    }
}
