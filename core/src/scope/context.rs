use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use super::append::append_field;
use super::function_cache::FunctionCache;
use super::Scope;
use crate::error::{Result, ScriptError};
use crate::interpreter::{Interpreter, NativeFunction};
use crate::stored::{LibraryVersion, LoadReport, StoredFunctionSource, StoredFunctionState};
use crate::types::{
    ContextId, Document, ExecOptions, FunctionId, InvokeFlags, ScriptValue, ValueType,
};

/// One interpreter instance plus the host state bound to it.
///
/// Not shareable: a context is used by one caller at a time, which the pool's
/// checkout protocol enforces. Dropping it destroys the interpreter.
pub struct ExecutionContext {
    id: ContextId,
    interpreter: Box<dyn Interpreter>,
    store: Arc<dyn StoredFunctionSource>,
    version: Arc<LibraryVersion>,
    local_db: String,
    time_used: u32,
    last_error: String,
    functions: FunctionCache,
    stored: StoredFunctionState,
}

impl ExecutionContext {
    pub fn new(
        interpreter: Box<dyn Interpreter>,
        store: Arc<dyn StoredFunctionSource>,
        version: Arc<LibraryVersion>,
    ) -> Self {
        Self {
            id: ContextId::next(),
            interpreter,
            store,
            version,
            local_db: String::new(),
            time_used: 0,
            last_error: String::new(),
            functions: FunctionCache::new(),
            stored: StoredFunctionState::new(),
        }
    }

    pub(crate) fn inc_time_used(&mut self) {
        self.time_used += 1;
    }

    #[cfg(test)]
    pub(crate) fn set_id(&mut self, id: ContextId) {
        self.id = id;
    }

    /// Stored-function names currently bound in this context
    pub fn stored_names(&self) -> &BTreeSet<String> {
        self.stored.names()
    }

    fn value(&self, field: &str) -> ScriptValue {
        self.interpreter
            .get_field(field)
            .unwrap_or(ScriptValue::Undefined)
    }

    fn record(&mut self, err: ScriptError) -> ScriptError {
        self.last_error = err.to_string();
        err
    }
}

fn type_error(field: &str, expected: &'static str, actual: &ScriptValue) -> ScriptError {
    ScriptError::FieldType {
        name: field.to_string(),
        expected,
        actual: actual.value_type(),
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("local_db", &self.local_db)
            .field("time_used", &self.time_used)
            .field("loaded_version", &self.stored.loaded_version())
            .field("cached_functions", &self.functions.len())
            .finish()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        debug!(
            context = %self.id,
            db = %self.local_db,
            uses = self.time_used,
            "Destroying execution context"
        );
    }
}

impl Scope for ExecutionContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn local_db(&self) -> &str {
        &self.local_db
    }

    fn set_local_db(&mut self, db_name: &str) {
        self.local_db = db_name.to_string();
    }

    fn reset(&mut self) {
        self.last_error.clear();
        self.interpreter.reset();
    }

    fn load_stored(&mut self, ignore_not_connected: bool) -> Result<LoadReport> {
        let Self {
            stored,
            local_db,
            version,
            store,
            interpreter,
            ..
        } = self;
        stored.load(
            local_db,
            version,
            store.as_ref(),
            interpreter.as_mut(),
            ignore_not_connected,
        )
    }

    fn gc(&mut self) {
        self.interpreter.gc();
    }

    fn is_kill_pending(&self) -> bool {
        self.interpreter.is_kill_pending()
    }

    fn time_used(&self) -> u32 {
        self.time_used
    }

    fn loaded_version(&self) -> i64 {
        self.stored.loaded_version()
    }

    fn error(&self) -> String {
        if self.last_error.is_empty() {
            self.interpreter.last_error()
        } else {
            self.last_error.clone()
        }
    }

    fn has_out_of_memory(&self) -> bool {
        self.interpreter.has_out_of_memory()
    }

    fn function_cache_len(&self) -> usize {
        self.functions.len()
    }

    fn field_type(&self, field: &str) -> ValueType {
        self.interpreter.field_type(field)
    }

    fn get_number(&self, field: &str) -> Result<f64> {
        let value = self.value(field);
        value
            .as_f64()
            .ok_or_else(|| type_error(field, "number", &value))
    }

    fn get_number_int(&self, field: &str) -> Result<i32> {
        match self.value(field) {
            ScriptValue::Int(v) => Ok(v),
            ScriptValue::Long(v) => Ok(v as i32),
            ScriptValue::Double(v) => Ok(v as i32),
            other => Err(type_error(field, "int", &other)),
        }
    }

    fn get_number_long(&self, field: &str) -> Result<i64> {
        match self.value(field) {
            ScriptValue::Long(v) => Ok(v),
            ScriptValue::Int(v) => Ok(v as i64),
            ScriptValue::Double(v) => Ok(v as i64),
            other => Err(type_error(field, "long", &other)),
        }
    }

    fn get_string(&self, field: &str) -> Result<String> {
        match self.value(field) {
            ScriptValue::String(s) | ScriptValue::Code(s) | ScriptValue::ObjectId(s) => Ok(s),
            other => Err(type_error(field, "string", &other)),
        }
    }

    fn get_boolean(&self, field: &str) -> Result<bool> {
        match self.value(field) {
            ScriptValue::Bool(b) => Ok(b),
            other => Err(type_error(field, "bool", &other)),
        }
    }

    fn get_object(&self, field: &str) -> Result<Document> {
        match self.value(field) {
            ScriptValue::Object(doc) => Ok(doc),
            other => Err(type_error(field, "object", &other)),
        }
    }

    fn get_array(&self, field: &str) -> Result<Vec<ScriptValue>> {
        match self.value(field) {
            ScriptValue::Array(items) => Ok(items),
            other => Err(type_error(field, "array", &other)),
        }
    }

    fn get_date(&self, field: &str) -> Result<DateTime<Utc>> {
        let value = self.value(field);
        match &value {
            ScriptValue::Date(d) => Ok(*d),
            ScriptValue::Double(_) | ScriptValue::Long(_) | ScriptValue::Int(_) => value
                .as_f64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis as i64).single())
                .ok_or_else(|| type_error(field, "date", &value)),
            _ => Err(type_error(field, "date", &value)),
        }
    }

    fn set_number(&mut self, field: &str, value: f64) -> Result<()> {
        self.interpreter
            .set_field(field, ScriptValue::Double(value), false)
    }

    fn set_string(&mut self, field: &str, value: &str) -> Result<()> {
        self.interpreter
            .set_field(field, ScriptValue::String(value.to_string()), false)
    }

    fn set_boolean(&mut self, field: &str, value: bool) -> Result<()> {
        self.interpreter
            .set_field(field, ScriptValue::Bool(value), false)
    }

    fn set_object(&mut self, field: &str, value: Document, read_only: bool) -> Result<()> {
        self.interpreter
            .set_field(field, ScriptValue::Object(value), read_only)
    }

    fn set_element(&mut self, field: &str, value: &ScriptValue) -> Result<()> {
        self.interpreter.set_field(field, value.clone(), false)
    }

    fn set_function(&mut self, field: &str, code: &str) -> Result<()> {
        self.interpreter
            .set_field(field, ScriptValue::Code(code.to_string()), false)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.interpreter.rename(from, to)
    }

    fn append(&self, builder: &mut Document, field_name: &str, scope_name: &str) -> Result<()> {
        append_field(self, builder, field_name, scope_name)
    }

    fn compile(&mut self, code: &str) -> Result<FunctionId> {
        let Self {
            functions,
            interpreter,
            ..
        } = self;
        let compiled = functions.get_or_compile(code, |source, id| interpreter.compile(source, id));
        compiled.map_err(|e| self.record(e))
    }

    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32> {
        self.interpreter
            .invoke(func, args, recv, timeout_ms, flags)
            .map_err(|e| self.record(e))
    }

    fn invoke_code(
        &mut self,
        code: &str,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
    ) -> Result<i32> {
        let func = self.compile(code).map_err(|e| match e {
            ScriptError::CompileFailed(_) => e,
            other => ScriptError::CompileFailed(other.to_string()),
        })?;
        self.invoke(func, args, recv, timeout_ms, InvokeFlags::default())
    }

    fn exec(&mut self, code: &str, name: &str, options: ExecOptions) -> Result<bool> {
        match self.interpreter.exec(code, name, options.timeout_ms) {
            Ok(result) => {
                if options.print_result {
                    if let Some(value) = result.filter(|v| *v != ScriptValue::Undefined) {
                        info!(script = name, "{}", value);
                    }
                }
                Ok(true)
            }
            Err(e) => {
                let e = self.record(e);
                if options.report_error {
                    info!(script = name, "{}", e);
                }
                if options.assert_on_error {
                    return Err(e);
                }
                Ok(false)
            }
        }
    }

    fn exec_setup(&mut self, code: &str, name: &str) -> Result<()> {
        self.exec(code, name, ExecOptions::setup()).map(|_| ())
    }

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()> {
        self.interpreter.inject_native(name, func)
    }
}
