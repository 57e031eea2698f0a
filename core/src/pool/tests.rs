//! Tests for ContextPool and PooledScope

use std::sync::Arc;

use maplit::hashset;

use super::*;
use crate::interpreter::MemoryInterpreter;
use crate::test_helpers::*;
use crate::types::ExecOptions;

fn key() -> PoolKey {
    PoolKey::new("app", "query")
}

/// Create a context the way the engine does on a pool miss
fn checked_out(pool: &ContextPool, fixture: &TestStore) -> ExecutionContext {
    let ctx = new_context(fixture);
    pool.add_active(ctx.id());
    ctx
}

fn out_of_memory_context(pool: &ContextPool, fixture: &TestStore) -> ExecutionContext {
    let mut ctx = new_context_with(fixture, MemoryInterpreter::new().with_memory_limit(16));
    pool.add_active(ctx.id());
    assert!(ctx.set_string("big", &"x".repeat(64)).is_err());
    assert!(ctx.has_out_of_memory());
    ctx
}

// ============================================================================
// Checkout and return
// ============================================================================

#[test]
fn test_get_on_empty_pool() {
    let pool = test_pool();
    assert!(pool.get(&key()).is_none());
}

#[test]
fn test_reuse_is_lifo() {
    let fixture = test_store();
    let pool = test_pool();
    let first = checked_out(&pool, &fixture);
    let second = checked_out(&pool, &fixture);
    let (first_id, second_id) = (first.id(), second.id());

    assert_eq!(pool.done(&key(), first), DoneOutcome::Pooled);
    assert_eq!(pool.done(&key(), second), DoneOutcome::Pooled);

    assert_eq!(pool.get(&key()).unwrap().id(), second_id);
    assert_eq!(pool.get(&key()).unwrap().id(), first_id);
}

#[test]
fn test_keys_do_not_share_contexts() {
    let fixture = test_store();
    let pool = test_pool();
    let ctx = checked_out(&pool, &fixture);
    pool.done(&PoolKey::new("app", "query"), ctx);

    assert!(pool.get(&PoolKey::new("app", "mapreduce")).is_none());
    assert!(pool.get(&PoolKey::new("other", "query")).is_none());
    assert!(pool.get(&PoolKey::new("app", "query")).is_some());
}

#[test]
fn test_get_marks_active_and_counts_reuse() {
    let fixture = test_store();
    let pool = test_pool();
    let ctx = checked_out(&pool, &fixture);
    pool.done(&key(), ctx);

    let ctx = pool.get(&key()).unwrap();

    assert!(pool.is_active(ctx.id()));
    assert_eq!(pool.idle_count(&key()), 0);
    assert_eq!(ctx.time_used(), 1);
}

#[test]
fn test_round_trip_keeps_compiled_functions() {
    let fixture = test_store();
    let pool = test_pool();
    let mut ctx = checked_out(&pool, &fixture);
    let func = ctx.compile("function() { return 1; }").unwrap();
    pool.done(&key(), ctx);

    let mut ctx = pool.get(&key()).unwrap();

    assert_eq!(ctx.function_cache_len(), 1);
    assert_eq!(ctx.compile("function() { return 1; }").unwrap(), func);
}

#[test]
fn test_no_double_checkout() {
    let fixture = test_store();
    let pool = test_pool();
    let mut out: Vec<ExecutionContext> = Vec::new();

    for step in 0..60 {
        if step % 3 == 2 {
            if let Some(ctx) = out.pop() {
                pool.done(&key(), ctx);
            }
            continue;
        }
        let ctx = match pool.get(&key()) {
            Some(ctx) => ctx,
            None => checked_out(&pool, &fixture),
        };
        assert!(
            out.iter().all(|held| held.id() != ctx.id()),
            "context {} handed out twice",
            ctx.id()
        );
        out.push(ctx);
        assert_eq!(pool.active_count(), out.len());
    }
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn test_idle_list_capacity() {
    let fixture = test_store();
    let pool = test_pool();
    let contexts: Vec<_> = (0..11).map(|_| checked_out(&pool, &fixture)).collect();

    let outcomes: Vec<_> = contexts.into_iter().map(|c| pool.done(&key(), c)).collect();

    assert!(outcomes[..10].iter().all(|o| *o == DoneOutcome::Pooled));
    assert_eq!(
        outcomes[10],
        DoneOutcome::Destroyed(EvictionReason::IdleListFull)
    );
    assert_eq!(pool.idle_count(&key()), 10);
}

#[test]
fn test_reuse_limit() {
    let fixture = test_store();
    let pool = test_pool();
    let ctx = checked_out(&pool, &fixture);
    let id = ctx.id();
    pool.done(&key(), ctx);

    for _ in 0..9 {
        let ctx = pool.get(&key()).unwrap();
        assert_eq!(pool.done(&key(), ctx), DoneOutcome::Pooled);
    }
    let ctx = pool.get(&key()).unwrap();
    assert_eq!(ctx.time_used(), 10);
    assert_eq!(pool.done(&key(), ctx), DoneOutcome::Pooled);

    let ctx = pool.get(&key()).unwrap();
    assert_eq!(ctx.id(), id);
    assert_eq!(ctx.time_used(), 11);
    assert_eq!(
        pool.done(&key(), ctx),
        DoneOutcome::Destroyed(EvictionReason::ReuseExhausted)
    );
    assert!(pool.get(&key()).is_none());
}

#[test]
fn test_error_state_is_destroyed() {
    let fixture = test_store();
    let pool = test_pool();
    let mut ctx = checked_out(&pool, &fixture);
    assert!(!ctx.exec("throw 'bad'", "test", ExecOptions::default()).unwrap());

    assert_eq!(
        pool.done(&key(), ctx),
        DoneOutcome::Destroyed(EvictionReason::ErrorState)
    );
    assert_eq!(pool.idle_count(&key()), 0);
}

#[test]
fn test_out_of_memory_is_destroyed_and_clears_pool() {
    let fixture = test_store();
    let pool = test_pool();
    let idle = checked_out(&pool, &fixture);
    pool.done(&PoolKey::new("other", "query"), idle);
    let busy = checked_out(&pool, &fixture);
    let oom = out_of_memory_context(&pool, &fixture);

    assert_eq!(
        pool.done(&key(), oom),
        DoneOutcome::Destroyed(EvictionReason::OutOfMemory)
    );
    assert_eq!(pool.total_idle(), 0);
    assert_eq!(
        pool.done(&key(), busy),
        DoneOutcome::Destroyed(EvictionReason::Orphaned)
    );
}

#[test]
fn test_out_of_memory_clears_every_registered_pool() {
    let fixture = test_store();
    let registry = Arc::new(PoolRegistry::new());
    let mine = test_pool_with_registry(&registry);
    let theirs = test_pool_with_registry(&registry);

    let idle = checked_out(&theirs, &fixture);
    theirs.done(&PoolKey::new("unrelated", "query"), idle);
    let busy = checked_out(&theirs, &fixture);
    let oom = out_of_memory_context(&mine, &fixture);

    mine.done(&key(), oom);

    assert_eq!(theirs.total_idle(), 0);
    assert!(!theirs.is_active(busy.id()));
    assert_eq!(
        theirs.done(&PoolKey::new("unrelated", "query"), busy),
        DoneOutcome::Destroyed(EvictionReason::Orphaned)
    );
}

#[test]
fn test_combined_conditions_destroy() {
    let fixture = test_store();
    let pool = test_pool();

    let idle = checked_out(&pool, &fixture);
    assert_eq!(pool.done(&key(), idle), DoneOutcome::Pooled);
    let busy = checked_out(&pool, &fixture);

    let mut failing = new_context_with(&fixture, MemoryInterpreter::new().with_memory_limit(16));
    pool.add_active(failing.id());
    let _ = failing.exec("throw 'bad'", "test", ExecOptions::default());
    let _ = failing.set_string("big", &"x".repeat(64));

    match pool.done(&key(), failing) {
        DoneOutcome::Destroyed(reason) => assert_eq!(reason, EvictionReason::ErrorState),
        DoneOutcome::Pooled => panic!("failing context was pooled"),
    }

    // The low-memory clear still runs when another rule named the reason
    assert_eq!(pool.total_idle(), 0);
    assert!(!pool.is_active(busy.id()));
    assert_eq!(
        pool.done(&key(), busy),
        DoneOutcome::Destroyed(EvictionReason::Orphaned)
    );

    let mut orphan = checked_out(&pool, &fixture);
    let _ = orphan.exec("throw 'bad'", "test", ExecOptions::default());
    pool.clear();
    assert_eq!(
        pool.done(&key(), orphan),
        DoneOutcome::Destroyed(EvictionReason::Orphaned)
    );
}

// ============================================================================
// Clear and orphaning
// ============================================================================

#[test]
fn test_orphaned_context_is_never_reused() {
    let fixture = test_store();
    let pool = test_pool();
    let ctx = checked_out(&pool, &fixture);

    pool.clear();

    assert_eq!(
        pool.done(&key(), ctx),
        DoneOutcome::Destroyed(EvictionReason::Orphaned)
    );
    assert!(pool.get(&key()).is_none());
}

#[test]
fn test_clear_counts_idle_contexts() {
    let fixture = test_store();
    let pool = test_pool();
    let keys = hashset! {
        PoolKey::new("a", "query"),
        PoolKey::new("b", "query"),
        PoolKey::new("b", "mapreduce"),
    };
    for k in &keys {
        let ctx = checked_out(&pool, &fixture);
        pool.done(k, ctx);
    }
    let _busy = checked_out(&pool, &fixture);

    assert_eq!(pool.clear(), 3);
    assert_eq!(pool.total_idle(), 0);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.clear(), 0);
}

#[test]
#[should_panic(expected = "destroyed twice")]
fn test_duplicate_destroy_panics() {
    let fixture = test_store();
    let pool = test_pool();
    let first = new_context(&fixture);
    let mut second = new_context(&fixture);
    second.set_id(first.id());
    {
        let mut state = pool.state.lock();
        state.pools.entry(key()).or_default().push(first);
        state.pools.entry(key()).or_default().push(second);
    }

    pool.clear();
}

// ============================================================================
// Pooled handle
// ============================================================================

#[test]
fn test_handle_forwards_and_releases() {
    let fixture = test_store();
    let pool = Arc::new(test_pool());
    let ctx = checked_out(&pool, &fixture);
    let id = ctx.id();
    let mut scope = PooledScope::new(ctx, key(), Arc::downgrade(&pool));

    scope.set_number("n", 4.0).unwrap();
    let func = scope.compile("function() { return 2; }").unwrap();
    scope
        .invoke(func, None, None, 0, Default::default())
        .unwrap();

    assert_eq!(scope.id(), id);
    assert_eq!(scope.get_number("n").unwrap(), 4.0);
    assert_eq!(scope.release(), Some(DoneOutcome::Pooled));
    assert_eq!(pool.idle_count(&key()), 1);
    assert!(!pool.is_active(id));
}

#[test]
fn test_handle_drop_returns_context() {
    let fixture = test_store();
    let pool = Arc::new(test_pool());
    let ctx = checked_out(&pool, &fixture);

    {
        let _scope = PooledScope::new(ctx, key(), Arc::downgrade(&pool));
    }

    assert_eq!(pool.idle_count(&key()), 1);
    assert_eq!(pool.active_count(), 0);
}

#[test]
fn test_handle_outliving_pool_destroys_context() {
    let fixture = test_store();
    let pool = Arc::new(test_pool());
    let ctx = checked_out(&pool, &fixture);
    let scope = PooledScope::new(ctx, key(), Arc::downgrade(&pool));

    drop(pool);

    assert_eq!(scope.release(), None);
}
