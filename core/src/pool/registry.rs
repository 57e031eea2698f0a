use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::ContextPool;

/// Every live pool created by one engine.
///
/// A low-memory condition in any context empties all of them.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: Mutex<Vec<Weak<ContextPool>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pool: &Arc<ContextPool>) {
        let mut pools = self.pools.lock();
        pools.retain(|p| p.strong_count() > 0);
        pools.push(Arc::downgrade(pool));
    }

    /// Number of pools still alive
    pub fn len(&self) -> usize {
        self.pools.lock().iter().filter(|p| p.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear every live pool. Returns the number of idle contexts destroyed.
    pub fn clear_all(&self) -> usize {
        let live: Vec<Arc<ContextPool>> = {
            let mut pools = self.pools.lock();
            pools.retain(|p| p.strong_count() > 0);
            pools.iter().filter_map(Weak::upgrade).collect()
        };

        let destroyed: usize = live.iter().map(|pool| pool.clear()).sum();
        debug!(pools = live.len(), destroyed, "Cleared all context pools");
        destroyed
    }
}
