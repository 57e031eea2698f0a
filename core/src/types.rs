use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl ContextId {
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Identifier of a compiled function, only meaningful inside the context that compiled it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/* ===================== Values ===================== */

/// A value moving across the boundary between the host and a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptValue {
    Object(Document),
    Array(Vec<ScriptValue>),
    Double(f64),
    Int(i32),
    Long(i64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
    Date(DateTime<Utc>),
    Code(String),
    ObjectId(String),
    Regex { pattern: String, flags: String },
    Binary(Vec<u8>),
}

/// Runtime type of a field held by a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Object,
    Array,
    Double,
    Int,
    Long,
    String,
    Bool,
    Null,
    Undefined,
    Date,
    Code,
    ObjectId,
    Regex,
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Double => "double",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Null => "null",
            ValueType::Undefined => "undefined",
            ValueType::Date => "date",
            ValueType::Code => "code",
            ValueType::ObjectId => "objectid",
            ValueType::Regex => "regex",
            ValueType::Binary => "binary",
        };
        f.write_str(name)
    }
}

impl ScriptValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ScriptValue::Object(_) => ValueType::Object,
            ScriptValue::Array(_) => ValueType::Array,
            ScriptValue::Double(_) => ValueType::Double,
            ScriptValue::Int(_) => ValueType::Int,
            ScriptValue::Long(_) => ValueType::Long,
            ScriptValue::String(_) => ValueType::String,
            ScriptValue::Bool(_) => ValueType::Bool,
            ScriptValue::Null => ValueType::Null,
            ScriptValue::Undefined => ValueType::Undefined,
            ScriptValue::Date(_) => ValueType::Date,
            ScriptValue::Code(_) => ValueType::Code,
            ScriptValue::ObjectId(_) => ValueType::ObjectId,
            ScriptValue::Regex { .. } => ValueType::Regex,
            ScriptValue::Binary(_) => ValueType::Binary,
        }
    }

    /// Numeric view used by the typed number getters
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Double(v) => Some(*v),
            ScriptValue::Int(v) => Some(*v as f64),
            ScriptValue::Long(v) => Some(*v as f64),
            ScriptValue::Date(d) => Some(d.timestamp_millis() as f64),
            _ => None,
        }
    }

    /// Rough heap footprint, used for memory accounting by interpreters
    pub fn approx_size(&self) -> usize {
        match self {
            ScriptValue::Object(doc) => doc.approx_size(),
            ScriptValue::Array(items) => items.iter().map(|v| v.approx_size()).sum::<usize>() + 8,
            ScriptValue::String(s) | ScriptValue::Code(s) | ScriptValue::ObjectId(s) => s.len(),
            ScriptValue::Regex { pattern, flags } => pattern.len() + flags.len(),
            ScriptValue::Binary(b) => b.len(),
            _ => 8,
        }
    }

    /// Convert a plain JSON value. Integers that fit in 32 bits become `Int`.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ScriptValue::Null,
            JsonValue::Bool(b) => ScriptValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => ScriptValue::Int(small),
                        Err(_) => ScriptValue::Long(i),
                    }
                } else {
                    ScriptValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => ScriptValue::String(s.clone()),
            JsonValue::Array(items) => {
                ScriptValue::Array(items.iter().map(ScriptValue::from_json).collect())
            }
            JsonValue::Object(map) => {
                let mut doc = Document::new();
                for (k, v) in map {
                    doc.append(k.clone(), ScriptValue::from_json(v));
                }
                ScriptValue::Object(doc)
            }
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Object(doc) => write!(f, "{}", doc),
            ScriptValue::Array(items) => {
                f.write_str("[ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(" ]")
            }
            ScriptValue::Double(v) => write!(f, "{}", v),
            ScriptValue::Int(v) => write!(f, "{}", v),
            ScriptValue::Long(v) => write!(f, "NumberLong({})", v),
            ScriptValue::String(s) => write!(f, "\"{}\"", s),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Date(d) => write!(f, "ISODate(\"{}\")", d.to_rfc3339()),
            ScriptValue::Code(c) => write!(f, "{}", c),
            ScriptValue::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            ScriptValue::Regex { pattern, flags } => write!(f, "/{}/{}", pattern, flags),
            ScriptValue::Binary(b) => write!(f, "BinData({} bytes)", b.len()),
        }
    }
}

/* ===================== Document ===================== */

/// Ordered set of named values, the structured form handed to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, ScriptValue)>,
}

impl Document {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn append(&mut self, name: impl Into<String>, value: ScriptValue) -> &mut Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn approx_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.approx_size())
            .sum::<usize>()
            + 8
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{ ")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        f.write_str(" }")
    }
}

/* ===================== Call options ===================== */

/// Flags passed through to the interpreter on invoke
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeFlags {
    pub ignore_return: bool,
    pub read_only_args: bool,
    pub read_only_recv: bool,
}

/// How `exec` reports its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub print_result: bool,
    pub report_error: bool,
    pub assert_on_error: bool,
    /// 0 means no timeout
    pub timeout_ms: u64,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            print_result: false,
            report_error: true,
            assert_on_error: false,
            timeout_ms: 0,
        }
    }
}

impl ExecOptions {
    /// Options used for setup code: errors are reported and raised
    pub fn setup() -> Self {
        Self {
            print_result: false,
            report_error: true,
            assert_on_error: true,
            timeout_ms: 0,
        }
    }
}
