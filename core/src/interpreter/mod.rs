//! Embedded interpreter capability surface
//!
//! The host never looks inside the interpreter. Everything the pool, the
//! function cache and the stored-function synchronizer need is reached through
//! the [`Interpreter`] trait, and new interpreters are produced by an
//! [`InterpreterFactory`] owned by the engine.
//!
//! [`memory::MemoryInterpreter`] is a deterministic implementation with no
//! language behind it. It backs the tests and the `stored verify` command.

pub mod memory;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Document, FunctionId, InvokeFlags, ScriptValue, ValueType};

pub use memory::{MemoryInterpreter, MemoryInterpreterFactory};

/// Host function callable from script code
pub type NativeFunction = Arc<dyn Fn(&Document) -> Result<ScriptValue> + Send + Sync>;

/// One live interpreter instance.
///
/// Implementations are not expected to be thread-safe for concurrent use, but
/// must be movable between threads so a context can be released from a thread
/// other than the one that acquired it.
pub trait Interpreter: Send {
    /// Compile `source` as a function and register it under `id`
    fn compile(&mut self, source: &str, id: FunctionId) -> Result<()>;

    /// Call a compiled function. Returns the interpreter's result code.
    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32>;

    /// Run a script; returns the value of the last expression, if any
    fn exec(&mut self, code: &str, name: &str, timeout_ms: u64) -> Result<Option<ScriptValue>>;

    /// Runtime type of a global field. Missing fields are `Undefined`.
    fn field_type(&self, name: &str) -> ValueType;

    fn get_field(&self, name: &str) -> Option<ScriptValue>;

    fn set_field(&mut self, name: &str, value: ScriptValue, read_only: bool) -> Result<()>;

    /// Remove a global binding. Removing a missing name is not an error.
    fn delete_field(&mut self, name: &str) -> Result<()>;

    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()>;

    /// Last error message, empty if none
    fn last_error(&self) -> String;

    fn has_out_of_memory(&self) -> bool;

    fn is_kill_pending(&self) -> bool {
        false
    }

    /// Garbage collection hint
    fn gc(&mut self);

    /// Drop per-call state (error, temporary bindings). Compiled functions survive.
    fn reset(&mut self);
}

/// Builds interpreter instances for a particular implementation
pub trait InterpreterFactory: Send + Sync {
    /// Short implementation name used in logs
    fn name(&self) -> &'static str;

    fn create(&self) -> Result<Box<dyn Interpreter>>;
}
