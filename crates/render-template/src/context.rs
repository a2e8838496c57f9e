/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template value and context types.
//!
//! [`Value`] is the tagged-variant data tree templates are evaluated against.
//! [`SafeValue`] carries a string that has already been vetted for one output
//! context; only this crate can construct one (via the data sanitizer or the
//! `safeURL`/`safeHTML`/`safeCSS` helpers), so arbitrary caller input can never
//! claim to be safe.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

/// The output context a [`SafeValue`] has been vetted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafeKind {
    /// Markup that may be emitted verbatim into HTML body text.
    Html,
    /// A URL that may be emitted verbatim into a URL-valued attribute.
    Url,
    /// A CSS value that may be emitted verbatim into a style context.
    Css,
}

impl fmt::Display for SafeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SafeKind::Html => "HTML",
            SafeKind::Url => "URL",
            SafeKind::Css => "CSS",
        };
        f.write_str(name)
    }
}

/// A string tagged with the context it is exempt from escaping in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeValue {
    kind: SafeKind,
    content: String,
}

impl SafeValue {
    pub(crate) fn new(kind: SafeKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn kind(&self) -> SafeKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }
}

/// A value that can be used in template evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A null/missing value.
    #[default]
    Null,

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value (JSON numbers that are not integers).
    Float(f64),

    /// A plain, untrusted string.
    String(String),

    /// A string vetted for a specific output context.
    Safe(SafeValue),

    /// An ordered list of values.
    List(Vec<Value>),

    /// A map of string keys to values, iterated in key order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is "truthy" for `if`, `with` and the logic helpers.
    ///
    /// False, zero, null and empty strings/lists/maps are falsy; everything
    /// else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Safe(s) => !s.as_str().is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Short type name used in execution error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Safe(_) => "safe string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Look up a key of a map value. Non-map values have no fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(name),
            _ => None,
        }
    }

    /// The string content of string-like values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Safe(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to JSON, dropping safety tags (safe strings become strings).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Safe(s) => JsonValue::String(s.as_str().to_string()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => JsonValue::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for Value {
    /// JSON parsing already bounds nesting depth, so plain recursion is fine here.
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Printing rules for interpolation: null prints nothing, lists print as
/// `[a b]` and maps as `map[k:v]` in key order.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::Safe(s) => f.write_str(s.as_str()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(m) => {
                f.write_str("map[")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The data a template is rendered against: a string-keyed mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    root: Value,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            root: Value::Map(BTreeMap::new()),
        }
    }
}

impl RenderContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a decoded JSON object.
    pub fn from_json_object(map: serde_json::Map<String, JsonValue>) -> Self {
        Self {
            root: Value::from(JsonValue::Object(map)),
        }
    }

    /// Insert a top-level key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Value::Map(m) = &mut self.root {
            m.insert(key.into(), value.into());
        }
    }

    /// Get a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.field(key)
    }

    /// The whole context as a map value (the template's initial dot).
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Return a new context with URL-like strings tagged as safe URLs.
    ///
    /// The receiver is left untouched.
    pub fn sanitized(&self) -> RenderContext {
        RenderContext {
            root: crate::sanitize::sanitize(self.root.clone()),
        }
    }
}
