//! Pooled context handle
//!
//! [`PooledScope`] owns one borrowed [`ExecutionContext`] and forwards every
//! [`Scope`] call to it. Releasing the handle, explicitly or by dropping it,
//! gives the context back to the pool it came from. The handle only holds a
//! weak reference to that pool: if the pool has been torn down in the
//! meantime, the context is destroyed directly.

use std::sync::Weak;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{ContextPool, DoneOutcome, PoolKey};
use crate::error::Result;
use crate::interpreter::NativeFunction;
use crate::scope::{ExecutionContext, Scope};
use crate::stored::LoadReport;
use crate::types::{
    ContextId, Document, ExecOptions, FunctionId, InvokeFlags, ScriptValue, ValueType,
};

pub struct PooledScope {
    // Only `None` once released, which consumes the handle.
    ctx: Option<ExecutionContext>,
    key: PoolKey,
    pool: Weak<ContextPool>,
}

impl PooledScope {
    pub fn new(ctx: ExecutionContext, key: PoolKey, pool: Weak<ContextPool>) -> Self {
        Self {
            ctx: Some(ctx),
            key,
            pool,
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Give the context back now. Returns `None` if the owning pool is gone
    /// and the context was destroyed directly.
    pub fn release(mut self) -> Option<DoneOutcome> {
        self.give_back()
    }

    /// Destroy the context instead of giving it back
    pub fn discard(mut self) {
        if let Some(ctx) = self.ctx.take() {
            match self.pool.upgrade() {
                Some(pool) => pool.discard(ctx),
                None => drop(ctx),
            }
        }
    }

    fn give_back(&mut self) -> Option<DoneOutcome> {
        let ctx = self.ctx.take()?;
        match self.pool.upgrade() {
            Some(pool) => Some(pool.done(&self.key, ctx)),
            None => {
                warn!(
                    pool = %self.key,
                    context = %ctx.id(),
                    "Owning context pool is gone, destroying context"
                );
                drop(ctx);
                None
            }
        }
    }

    fn real(&self) -> &ExecutionContext {
        self.ctx.as_ref().expect("pooled context used after release")
    }

    fn real_mut(&mut self) -> &mut ExecutionContext {
        self.ctx.as_mut().expect("pooled context used after release")
    }
}

impl Drop for PooledScope {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for PooledScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledScope")
            .field("key", &self.key)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl Scope for PooledScope {
    fn id(&self) -> ContextId {
        self.real().id()
    }

    fn local_db(&self) -> &str {
        self.real().local_db()
    }

    fn set_local_db(&mut self, db_name: &str) {
        self.real_mut().set_local_db(db_name)
    }

    fn reset(&mut self) {
        self.real_mut().reset()
    }

    fn load_stored(&mut self, ignore_not_connected: bool) -> Result<LoadReport> {
        self.real_mut().load_stored(ignore_not_connected)
    }

    fn gc(&mut self) {
        self.real_mut().gc()
    }

    fn is_kill_pending(&self) -> bool {
        self.real().is_kill_pending()
    }

    fn time_used(&self) -> u32 {
        self.real().time_used()
    }

    fn loaded_version(&self) -> i64 {
        self.real().loaded_version()
    }

    fn error(&self) -> String {
        self.real().error()
    }

    fn has_out_of_memory(&self) -> bool {
        self.real().has_out_of_memory()
    }

    fn function_cache_len(&self) -> usize {
        self.real().function_cache_len()
    }

    fn field_type(&self, field: &str) -> ValueType {
        self.real().field_type(field)
    }

    fn get_number(&self, field: &str) -> Result<f64> {
        self.real().get_number(field)
    }

    fn get_number_int(&self, field: &str) -> Result<i32> {
        self.real().get_number_int(field)
    }

    fn get_number_long(&self, field: &str) -> Result<i64> {
        self.real().get_number_long(field)
    }

    fn get_string(&self, field: &str) -> Result<String> {
        self.real().get_string(field)
    }

    fn get_boolean(&self, field: &str) -> Result<bool> {
        self.real().get_boolean(field)
    }

    fn get_object(&self, field: &str) -> Result<Document> {
        self.real().get_object(field)
    }

    fn get_array(&self, field: &str) -> Result<Vec<ScriptValue>> {
        self.real().get_array(field)
    }

    fn get_date(&self, field: &str) -> Result<DateTime<Utc>> {
        self.real().get_date(field)
    }

    fn set_number(&mut self, field: &str, value: f64) -> Result<()> {
        self.real_mut().set_number(field, value)
    }

    fn set_string(&mut self, field: &str, value: &str) -> Result<()> {
        self.real_mut().set_string(field, value)
    }

    fn set_boolean(&mut self, field: &str, value: bool) -> Result<()> {
        self.real_mut().set_boolean(field, value)
    }

    fn set_object(&mut self, field: &str, value: Document, read_only: bool) -> Result<()> {
        self.real_mut().set_object(field, value, read_only)
    }

    fn set_element(&mut self, field: &str, value: &ScriptValue) -> Result<()> {
        self.real_mut().set_element(field, value)
    }

    fn set_function(&mut self, field: &str, code: &str) -> Result<()> {
        self.real_mut().set_function(field, code)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.real_mut().rename(from, to)
    }

    fn append(&self, builder: &mut Document, field_name: &str, scope_name: &str) -> Result<()> {
        self.real().append(builder, field_name, scope_name)
    }

    fn compile(&mut self, code: &str) -> Result<FunctionId> {
        self.real_mut().compile(code)
    }

    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32> {
        self.real_mut().invoke(func, args, recv, timeout_ms, flags)
    }

    fn invoke_code(
        &mut self,
        code: &str,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
    ) -> Result<i32> {
        self.real_mut().invoke_code(code, args, recv, timeout_ms)
    }

    fn exec(&mut self, code: &str, name: &str, options: ExecOptions) -> Result<bool> {
        self.real_mut().exec(code, name, options)
    }

    fn exec_setup(&mut self, code: &str, name: &str) -> Result<()> {
        self.real_mut().exec_setup(code, name)
    }

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()> {
        self.real_mut().inject_native(name, func)
    }
}
