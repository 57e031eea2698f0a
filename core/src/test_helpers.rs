//! Shared fixtures for unit tests

use std::sync::Arc;

use crate::config::PoolSettings;
use crate::engine::ScriptEngine;
use crate::interpreter::{Interpreter, MemoryInterpreter, MemoryInterpreterFactory};
use crate::pool::{ContextPool, EvictionPolicy, PoolRegistry};
use crate::scope::ExecutionContext;
use crate::stored::{LibraryVersion, MemoryStoredFunctions};

/// A private library version and the in-memory collection that bumps it
pub struct TestStore {
    pub version: Arc<LibraryVersion>,
    pub store: Arc<MemoryStoredFunctions>,
}

pub fn test_store() -> TestStore {
    let version = Arc::new(LibraryVersion::new());
    let store = Arc::new(MemoryStoredFunctions::new(version.clone()));
    TestStore { version, store }
}

pub fn new_context(fixture: &TestStore) -> ExecutionContext {
    new_context_with(fixture, MemoryInterpreter::new())
}

pub fn new_context_with(fixture: &TestStore, interpreter: MemoryInterpreter) -> ExecutionContext {
    let interpreter: Box<dyn Interpreter> = Box::new(interpreter);
    ExecutionContext::new(interpreter, fixture.store.clone(), fixture.version.clone())
}

/// Pool with the default thresholds and no registry
pub fn test_pool() -> ContextPool {
    let settings = PoolSettings::default();
    ContextPool::new(
        EvictionPolicy::new(settings.max_idle_per_pool, settings.max_reuse),
        None,
    )
}

pub fn test_pool_with_registry(registry: &Arc<PoolRegistry>) -> Arc<ContextPool> {
    let settings = PoolSettings::default();
    let pool = Arc::new(ContextPool::new(
        EvictionPolicy::new(settings.max_idle_per_pool, settings.max_reuse),
        Some(registry.clone()),
    ));
    registry.register(&pool);
    pool
}

pub fn test_engine(fixture: &TestStore) -> ScriptEngine {
    test_engine_with(fixture, MemoryInterpreterFactory::new(), PoolSettings::default())
}

pub fn test_engine_with(
    fixture: &TestStore,
    factory: MemoryInterpreterFactory,
    settings: PoolSettings,
) -> ScriptEngine {
    ScriptEngine::new(Arc::new(factory), fixture.store.clone())
        .with_version(fixture.version.clone())
        .with_pool_settings(settings)
}
