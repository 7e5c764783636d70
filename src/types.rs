use serde::{Deserialize, Serialize};

/// Represents a value carried through event templates, the results scratch
/// map, and lookup payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point number
    Number(f64),
    /// Boolean value
    Boolean(bool),
    /// Array of values
    Array(Vec<Value>),
    /// Null value
    Null,
}

impl Value {
    /// Render the value for message substitution.
    ///
    /// `Null` renders as the literal string `null`; formatting is
    /// locale-independent.
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Null => "null".to_string(),
        }
    }

    /// Get string value if this is a string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get integer value if this is an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to a number if this is numeric
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get boolean value if this is a boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Severity of a [`RuleEvent`](crate::engine::results::RuleEvent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Violation event; counted toward the session violation budget
    Violation,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Info => write!(f, "Info"),
            EventCategory::Warning => write!(f, "Warning"),
            EventCategory::Violation => write!(f, "Violation"),
        }
    }
}

/// Key type for context lookup tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// String key
    Str(String),
    /// Integer key
    Int(i64),
    /// Boolean key
    Bool(bool),
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKey::Str(s) => write!(f, "'{}'", s),
            LookupKey::Int(i) => write!(f, "{}", i),
            LookupKey::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<String> for LookupKey {
    fn from(s: String) -> Self {
        LookupKey::Str(s)
    }
}

impl From<&str> for LookupKey {
    fn from(s: &str) -> Self {
        LookupKey::Str(s.to_string())
    }
}

impl From<i64> for LookupKey {
    fn from(i: i64) -> Self {
        LookupKey::Int(i)
    }
}

impl From<bool> for LookupKey {
    fn from(b: bool) -> Self {
        LookupKey::Bool(b)
    }
}

/// The concise (unqualified, ungeneric) name of a Rust type.
///
/// Used as the default lookup table name for typed lookups.
pub fn concise_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}
