//! Context pool
//!
//! Idle contexts are kept per [`PoolKey`] in LIFO order so the most recently
//! returned context, with the warmest function cache, is reused first. The
//! pool also tracks which contexts are checked out. A context that is not in
//! the active set when it comes back was checked out across a [`ContextPool::clear`]
//! and is destroyed, whatever its state.
//!
//! The lock is only held for bookkeeping. Resetting and destroying contexts
//! happens outside it.

pub mod eviction;
pub mod handle;
pub mod registry;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::scope::{ExecutionContext, Scope};
use crate::types::ContextId;

pub use eviction::{EvictionCandidate, EvictionPolicy, EvictionReason, EvictionRule};
pub use handle::PooledScope;
pub use registry::PoolRegistry;

/// Identity under which idle contexts are kept: the logical pool name
/// (usually a database) plus the kind of work the context serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub name: String,
    pub kind: String,
}

impl PoolKey {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.kind)
    }
}

/// What happened to a context handed back with [`ContextPool::done`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneOutcome {
    Pooled,
    Destroyed(EvictionReason),
}

#[derive(Default)]
struct PoolState {
    pools: HashMap<PoolKey, Vec<ExecutionContext>>,
    active: HashSet<ContextId>,
}

pub struct ContextPool {
    state: Mutex<PoolState>,
    policy: EvictionPolicy,
    registry: Option<Arc<PoolRegistry>>,
}

impl ContextPool {
    pub fn new(policy: EvictionPolicy, registry: Option<Arc<PoolRegistry>>) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            policy,
            registry,
        }
    }

    /// Take the most recently returned idle context for `key`, if any.
    ///
    /// The context is marked active, its reuse count is bumped and its
    /// per-call state is reset. Compiled functions are kept.
    pub fn get(&self, key: &PoolKey) -> Option<ExecutionContext> {
        let mut ctx = {
            let mut state = self.state.lock();
            let ctx = state.pools.get_mut(key)?.pop()?;
            state.active.insert(ctx.id());
            ctx
        };

        ctx.inc_time_used();
        ctx.reset();
        debug!(pool = %key, context = %ctx.id(), uses = ctx.time_used(), "Reusing pooled context");
        Some(ctx)
    }

    /// Track a freshly created context as checked out
    pub fn add_active(&self, id: ContextId) {
        self.state.lock().active.insert(id);
    }

    /// Hand a context back. Pools it unless an eviction rule applies.
    pub fn done(&self, key: &PoolKey, mut ctx: ExecutionContext) -> DoneOutcome {
        let has_error = !ctx.error().is_empty();
        let out_of_memory = ctx.has_out_of_memory();
        let time_used = ctx.time_used();
        ctx.reset();

        let evicted = {
            let mut state = self.state.lock();
            let orphaned = !state.active.remove(&ctx.id());
            let candidate = EvictionCandidate {
                orphaned,
                idle_count: state.pools.get(key).map_or(0, Vec::len),
                time_used,
                has_error,
                out_of_memory,
            };

            match self.policy.evaluate(&candidate) {
                Some(reason) => Some((reason, ctx)),
                None => {
                    state.pools.entry(key.clone()).or_default().push(ctx);
                    None
                }
            }
        };

        let outcome = match evicted {
            Some((reason, ctx)) => {
                debug!(pool = %key, context = %ctx.id(), %reason, "Evicting context");
                drop(ctx);
                DoneOutcome::Destroyed(reason)
            }
            None => DoneOutcome::Pooled,
        };

        if out_of_memory {
            self.clear();
            warn!("Clearing all idle script contexts due to out of memory");
            if let Some(registry) = &self.registry {
                registry.clear_all();
            }
        }

        outcome
    }

    /// Destroy a checked-out context without pooling it
    pub fn discard(&self, ctx: ExecutionContext) {
        self.state.lock().active.remove(&ctx.id());
        debug!(context = %ctx.id(), "Discarding context");
        drop(ctx);
    }

    /// Destroy every idle context and forget every active one.
    ///
    /// Contexts checked out right now become orphaned. Returns the number of
    /// idle contexts destroyed.
    ///
    /// # Panics
    ///
    /// If the same context is found twice among the idle lists.
    pub fn clear(&self) -> usize {
        let doomed: Vec<ExecutionContext> = {
            let mut state = self.state.lock();
            state.active.clear();
            state.pools.drain().flat_map(|(_, list)| list).collect()
        };

        let mut seen = HashSet::with_capacity(doomed.len());
        for ctx in &doomed {
            if !seen.insert(ctx.id()) {
                panic!("context {} destroyed twice while clearing pool", ctx.id());
            }
        }

        let count = doomed.len();
        drop(doomed);
        count
    }

    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.state.lock().pools.get(key).map_or(0, Vec::len)
    }

    pub fn total_idle(&self) -> usize {
        self.state.lock().pools.values().map(Vec::len).sum()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_active(&self, id: ContextId) -> bool {
        self.state.lock().active.contains(&id)
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ContextPool")
            .field("keys", &state.pools.len())
            .field("active", &state.active.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Drop for ContextPool {
    fn drop(&mut self) {
        let destroyed = self.clear();
        if destroyed > 0 {
            debug!(destroyed, "Context pool dropped");
        }
    }
}

#[cfg(test)]
mod tests;
