//! Structured-value append boundary
//!
//! Converts one global of a context into a field of a caller-owned
//! [`Document`], switching on the runtime type the context reports. Only the
//! types below cross this boundary; anything else is a precondition failure.

use super::Scope;
use crate::error::{Result, ScriptError};
use crate::types::{Document, ScriptValue, ValueType};

pub fn append_field<S: Scope + ?Sized>(
    scope: &S,
    builder: &mut Document,
    field_name: &str,
    scope_name: &str,
) -> Result<()> {
    let value = match scope.field_type(scope_name) {
        ValueType::Object => ScriptValue::Object(scope.get_object(scope_name)?),
        ValueType::Array => ScriptValue::Array(scope.get_array(scope_name)?),
        ValueType::Double => ScriptValue::Double(scope.get_number(scope_name)?),
        ValueType::Int => ScriptValue::Int(scope.get_number_int(scope_name)?),
        ValueType::Long => ScriptValue::Long(scope.get_number_long(scope_name)?),
        ValueType::String => ScriptValue::String(scope.get_string(scope_name)?),
        ValueType::Bool => ScriptValue::Bool(scope.get_boolean(scope_name)?),
        ValueType::Null | ValueType::Undefined => ScriptValue::Null,
        ValueType::Date => ScriptValue::Date(scope.get_date(scope_name)?),
        ValueType::Code => ScriptValue::Code(scope.get_string(scope_name)?),
        other => return Err(ScriptError::UnsupportedAppendType(other)),
    };
    builder.append(field_name, value);
    Ok(())
}
