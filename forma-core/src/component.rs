//! Design-domain component model.
//!
//! A [`Component`] is one widget node on the canvas. Components live in an
//! ordered sequence; position in the sequence is the stacking order (the
//! last element is drawn on top).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Horizontal/vertical offset applied to a pasted component.
pub const PASTE_OFFSET_PX: f64 = 20.0;

/// A configurable widget node placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Unique, stable identifier within a design.
    pub id: String,
    /// Widget kind (`"button"`, `"text"`, `"chart"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub icon: String,
    /// Visual properties (`left`, `top`, `width`, `color`, ...).
    #[serde(default)]
    pub style: Map<String, Value>,
    /// Widget-specific configuration.
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<EventBinding>,
    #[serde(default)]
    pub animations: Vec<Animation>,
    #[serde(default)]
    pub data_bindings: Vec<DataBinding>,
}

impl Component {
    /// Create an empty component of the given kind.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            title: String::new(),
            icon: String::new(),
            style: Map::new(),
            props: Map::new(),
            events: Vec::new(),
            animations: Vec::new(),
            data_bindings: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.style.insert(key.into(), value.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_event(mut self, binding: EventBinding) -> Self {
        self.events.push(binding);
        self
    }

    pub fn with_binding(mut self, binding: DataBinding) -> Self {
        self.data_bindings.push(binding);
        self
    }

    /// Shift a length-valued style entry (e.g. `left: "100px"`) by `delta`.
    ///
    /// String values keep their unit suffix (`px` when none is present);
    /// numeric values stay numeric. A missing or unparseable entry is
    /// treated as zero.
    pub fn offset_style(&mut self, key: &str, delta: f64) {
        let shifted = shift_length(self.style.get(key), delta);
        self.style.insert(key.to_string(), shifted);
    }
}

fn shift_length(value: Option<&Value>, delta: f64) -> Value {
    match value {
        Some(Value::Number(n)) => {
            let base = n.as_f64().unwrap_or(0.0);
            number_value(base + delta)
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            let split = trimmed
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
                .unwrap_or(trimmed.len());
            let (number, unit) = trimmed.split_at(split);
            let base = number.parse::<f64>().unwrap_or(0.0);
            let unit = if unit.is_empty() { "px" } else { unit };
            Value::String(format!("{}{unit}", format_length(base + delta)))
        }
        _ => Value::String(format!("{}px", format_length(delta))),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn format_length(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Declarative event binding: `event` fires the handler registered under
/// `handler` in a [`HandlerRegistry`](crate::HandlerRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBinding {
    /// Event name (`"click"`, `"change"`, ...).
    pub event: String,
    /// Registry key of the handler to run.
    pub handler: String,
    /// Static arguments passed to the handler.
    #[serde(default)]
    pub args: Value,
}

impl EventBinding {
    pub fn new(event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            handler: handler.into(),
            args: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub delay_ms: u64,
    /// `None` repeats forever.
    #[serde(default)]
    pub iterations: Option<u32>,
}

/// Resolves `dataStore[source]` at `path` into `prop`, optionally passing the
/// value through a named transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBinding {
    pub prop: String,
    pub source: String,
    pub path: String,
    #[serde(default)]
    pub transform: Option<String>,
}

impl DataBinding {
    pub fn new(
        prop: impl Into<String>,
        source: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            prop: prop.into(),
            source: source.into(),
            path: path.into(),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }
}

/// Stacking-order move. `Up` moves toward the end of the sequence (top of
/// the visual stack), `Down` toward the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}
