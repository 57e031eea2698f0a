//! Execution contexts
//!
//! [`Scope`] is the full surface callers use to drive a context. It has two
//! implementations:
//!
//! - [`ExecutionContext`] owns an interpreter, its compiled-function cache and
//!   its stored-function state
//! - [`crate::pool::PooledScope`] borrows an `ExecutionContext` from a pool and
//!   forwards every call to it
//!
//! Code written against `Scope` does not care which one it holds.

pub mod append;
pub mod context;
pub mod function_cache;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::interpreter::NativeFunction;
use crate::stored::LoadReport;
use crate::types::{
    ContextId, Document, ExecOptions, FunctionId, InvokeFlags, ScriptValue, ValueType,
};

pub use context::ExecutionContext;
pub use function_cache::{strip_leading_comment, FunctionCache};

pub trait Scope {
    /* ===================== Identity and lifecycle ===================== */

    fn id(&self) -> ContextId;

    /// Database this context is bound to, empty if unbound
    fn local_db(&self) -> &str;

    fn set_local_db(&mut self, db_name: &str);

    /// Drop per-call bindings and the error state
    fn reset(&mut self);

    /// Bring stored functions up to date, see [`crate::stored`]
    fn load_stored(&mut self, ignore_not_connected: bool) -> Result<LoadReport>;

    fn gc(&mut self);

    fn is_kill_pending(&self) -> bool;

    /// Number of times this context was handed out again by a pool
    fn time_used(&self) -> u32;

    fn loaded_version(&self) -> i64;

    /// Last error message, empty if none
    fn error(&self) -> String;

    fn has_out_of_memory(&self) -> bool;

    fn function_cache_len(&self) -> usize;

    /* ===================== Fields ===================== */

    fn field_type(&self, field: &str) -> ValueType;

    fn get_number(&self, field: &str) -> Result<f64>;

    fn get_number_int(&self, field: &str) -> Result<i32>;

    fn get_number_long(&self, field: &str) -> Result<i64>;

    fn get_string(&self, field: &str) -> Result<String>;

    fn get_boolean(&self, field: &str) -> Result<bool>;

    fn get_object(&self, field: &str) -> Result<Document>;

    fn get_array(&self, field: &str) -> Result<Vec<ScriptValue>>;

    fn get_date(&self, field: &str) -> Result<DateTime<Utc>>;

    fn set_number(&mut self, field: &str, value: f64) -> Result<()>;

    fn set_string(&mut self, field: &str, value: &str) -> Result<()>;

    fn set_boolean(&mut self, field: &str, value: bool) -> Result<()>;

    fn set_object(&mut self, field: &str, value: Document, read_only: bool) -> Result<()>;

    fn set_element(&mut self, field: &str, value: &ScriptValue) -> Result<()>;

    fn set_function(&mut self, field: &str, code: &str) -> Result<()>;

    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Copy `scope_name` into `builder` as `field_name`, see [`append`]
    fn append(&self, builder: &mut Document, field_name: &str, scope_name: &str) -> Result<()>;

    /* ===================== Code ===================== */

    /// Compile through the function cache
    fn compile(&mut self, code: &str) -> Result<FunctionId>;

    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32>;

    /// Compile then invoke; a compile failure is `CompileFailed`
    fn invoke_code(
        &mut self,
        code: &str,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
    ) -> Result<i32>;

    /// Run a script. Returns `Ok(false)` on script failure unless
    /// `assert_on_error` is set.
    fn exec(&mut self, code: &str, name: &str, options: ExecOptions) -> Result<bool>;

    fn exec_setup(&mut self, code: &str, name: &str) -> Result<()>;

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()>;
}
