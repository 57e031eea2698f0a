//! Execution engine
//!
//! [`ScriptEngine`] is shared by every worker. It builds new contexts from an
//! [`InterpreterFactory`] and hands out [`PooledScope`]s. Idle contexts live
//! in a [`ContextPool`] owned by each worker through its [`WorkerScopes`];
//! pools are never shared between workers. A worker calls
//! [`ScriptEngine::thread_done`] when it shuts down.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PoolSettings;
use crate::error::{Result, ScriptError};
use crate::interpreter::InterpreterFactory;
use crate::pool::{ContextPool, EvictionPolicy, PoolKey, PoolRegistry, PooledScope};
use crate::scope::{ExecutionContext, Scope};
use crate::stored::{LibraryVersion, StoredFunctionSource};

/// Hook run on every newly constructed context
pub type ScopeInit = Arc<dyn Fn(&mut ExecutionContext) -> Result<()> + Send + Sync>;

/// Per-worker owner of a context pool, created lazily on first checkout
#[derive(Debug, Default)]
pub struct WorkerScopes {
    pool: Option<Arc<ContextPool>>,
}

impl WorkerScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> Option<&Arc<ContextPool>> {
        self.pool.as_ref()
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }
}

pub struct ScriptEngine {
    factory: Arc<dyn InterpreterFactory>,
    store: Arc<dyn StoredFunctionSource>,
    version: Arc<LibraryVersion>,
    settings: PoolSettings,
    registry: Arc<PoolRegistry>,
    scope_init: Option<ScopeInit>,
}

impl ScriptEngine {
    /// Engine using the process-wide library version
    pub fn new(
        factory: Arc<dyn InterpreterFactory>,
        store: Arc<dyn StoredFunctionSource>,
    ) -> Self {
        Self {
            factory,
            store,
            version: LibraryVersion::global(),
            settings: PoolSettings::default(),
            registry: Arc::new(PoolRegistry::new()),
            scope_init: None,
        }
    }

    pub fn with_version(mut self, version: Arc<LibraryVersion>) -> Self {
        self.version = version;
        self
    }

    pub fn with_pool_settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_scope_init(mut self, init: ScopeInit) -> Self {
        self.scope_init = Some(init);
        self
    }

    pub fn version(&self) -> &Arc<LibraryVersion> {
        &self.version
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Construct a fresh, unbound context
    pub fn new_context(&self) -> Result<ExecutionContext> {
        let interpreter = self.factory.create().map_err(|e| match e {
            ScriptError::ContextCreation(_) => e,
            other => ScriptError::ContextCreation(other.to_string()),
        })?;

        let mut ctx = ExecutionContext::new(interpreter, self.store.clone(), self.version.clone());
        if let Some(init) = &self.scope_init {
            init(&mut ctx)?;
        }

        debug!(context = %ctx.id(), interpreter = self.factory.name(), "Created execution context");
        Ok(ctx)
    }

    /// Check out a context for `pool_name` from the worker's pool, creating
    /// one on a miss, and bring its stored functions up to date.
    ///
    /// A failing fetch is logged and the context is still handed out.
    /// Malformed stored records are returned as errors and the context is
    /// destroyed.
    pub fn get_pooled_context(
        &self,
        worker: &mut WorkerScopes,
        pool_name: &str,
        kind: &str,
    ) -> Result<PooledScope> {
        let pool = self.worker_pool(worker);
        let key = PoolKey::new(pool_name, kind);

        let ctx = match pool.get(&key) {
            Some(ctx) => ctx,
            None => {
                let ctx = self.new_context()?;
                pool.add_active(ctx.id());
                debug!(pool = %key, context = %ctx.id(), "No idle context, created one");
                ctx
            }
        };

        let mut scope = PooledScope::new(ctx, key, Arc::downgrade(&pool));
        scope.set_local_db(pool_name);

        match scope.load_stored(true) {
            Ok(_) => {}
            Err(e) if e.is_precondition() => {
                // Possibly half reloaded, so it must not be pooled again.
                scope.discard();
                return Err(e);
            }
            Err(e) => warn!(db = pool_name, "Failed to load stored functions: {}", e),
        }

        Ok(scope)
    }

    /// Destroy every idle context held by this worker and drop its pool.
    ///
    /// Handles still checked out destroy their context when released.
    pub fn thread_done(&self, worker: &mut WorkerScopes) {
        if let Some(pool) = worker.pool.take() {
            let destroyed = pool.clear();
            debug!(destroyed, "Worker context pool torn down");
        }
    }

    /// Mark the stored-function library as changed
    pub fn stored_func_mod(&self) -> i64 {
        self.version.stored_func_mod()
    }

    /// Empty every pool created by this engine
    pub fn clear_all_pools(&self) -> usize {
        self.registry.clear_all()
    }

    fn worker_pool(&self, worker: &mut WorkerScopes) -> Arc<ContextPool> {
        if let Some(pool) = &worker.pool {
            return pool.clone();
        }
        let pool = Arc::new(ContextPool::new(
            EvictionPolicy::new(self.settings.max_idle_per_pool, self.settings.max_reuse),
            Some(self.registry.clone()),
        ));
        self.registry.register(&pool);
        worker.pool = Some(pool.clone());
        pool
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("interpreter", &self.factory.name())
            .field("version", &self.version.current())
            .field("settings", &self.settings)
            .field("pools", &self.registry.len())
            .finish()
    }
}
