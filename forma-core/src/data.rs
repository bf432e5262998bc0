//! External data resolution for component data bindings.
//!
//! Bound values are looked up by dotted path inside named JSON blobs and may
//! be passed through a transform picked from a fixed registry by name.
//! Transforms are plain Rust closures; nothing is evaluated from text.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::StoreError;

/// Named external data blobs (`dataStore[source]`).
pub type DataStore = HashMap<String, Value>;

/// Walk a dot-separated `path` inside `root`.
///
/// Object nodes are indexed by key and array nodes by numeric segment.
/// Any missing segment, or a segment applied to a scalar, yields `None`.
/// An empty path returns `root` itself.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

type Transform = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Registry of named value transforms used by data bindings.
pub struct TransformRegistry {
    transforms: HashMap<String, Transform>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry").field("transforms", &names).finish()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry preloaded with `upper`, `lower`, `trim`, `string`, `number`,
    /// `length`, `not` and `json`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |v| map_str(v, str::to_uppercase));
        registry.register("lower", |v| map_str(v, str::to_lowercase));
        registry.register("trim", |v| map_str(v, |s| s.trim().to_string()));
        registry.register("string", |v| match v {
            Value::String(s) => Value::String(s.clone()),
            Value::Null => Value::String(String::new()),
            other => Value::String(other.to_string()),
        });
        registry.register("number", |v| match v {
            Value::Number(_) => v.clone(),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Value::Bool(b) => Value::from(u8::from(*b)),
            _ => Value::Null,
        });
        registry.register("length", |v| match v {
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
            _ => Value::from(0),
        });
        registry.register("not", |v| Value::Bool(!truthy(v)));
        registry.register("json", |v| Value::String(v.to_string()));
        registry
    }

    /// Register (or replace) a transform under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, transform: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Box::new(transform));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Apply the transform registered under `name`.
    pub fn apply(&self, name: &str, value: &Value) -> Result<Value, StoreError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| StoreError::UnknownTransform(name.to_string()))?;
        Ok(transform(value))
    }
}

fn map_str(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

/// JavaScript-style truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
