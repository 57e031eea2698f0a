//! Error types for script contexts

use thiserror::Error;

use crate::types::ValueType;

/// Errors raised by contexts, the stored-function synchronizer and the engine
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("can't append type from: {0}")]
    UnsupportedAppendType(ValueType),

    #[error("compile failed: {0}")]
    CompileFailed(String),

    #[error("need to have locally connected database already")]
    NotConnected,

    #[error("name has to be a string: {0}")]
    StoredNameNotString(String),

    #[error("value has to be set for stored function '{0}'")]
    StoredValueMissing(String),

    #[error("invalid object id: length")]
    ObjectIdLength,

    #[error("invalid object id: not hex")]
    ObjectIdNotHex,

    #[error("field '{name}' is {actual}, expected {expected}")]
    FieldType {
        name: String,
        expected: &'static str,
        actual: ValueType,
    },

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("script error: {0}")]
    Execution(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("failed to create execution context: {0}")]
    ContextCreation(String),

    #[error("stored function fetch failed: {0}")]
    Fetch(String),
}

/// Result type for script operations
pub type Result<T> = std::result::Result<T, ScriptError>;

impl ScriptError {
    /// Stable numeric code for precondition failures
    pub fn code(&self) -> Option<u32> {
        match self {
            ScriptError::UnsupportedAppendType(_) => Some(10206),
            ScriptError::CompileFailed(_) => Some(10207),
            ScriptError::NotConnected => Some(10208),
            ScriptError::StoredNameNotString(_) => Some(10209),
            ScriptError::StoredValueMissing(_) => Some(10210),
            ScriptError::ObjectIdLength => Some(10448),
            ScriptError::ObjectIdNotHex => Some(10430),
            _ => None,
        }
    }

    /// Precondition violations are always surfaced to the caller
    pub fn is_precondition(&self) -> bool {
        self.code().is_some()
    }
}
