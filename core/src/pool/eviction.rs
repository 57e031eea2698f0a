//! Eviction policy for contexts returned to a pool
//!
//! A returned context is either pushed back onto its idle list or destroyed.
//! The decision is made by an ordered list of rules; the first rule that
//! applies names the reason the context is destroyed.

use std::fmt;

/// Snapshot of a returned context taken under the pool lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// The pool no longer tracked this context as checked out
    pub orphaned: bool,
    /// Idle contexts already held for the same key
    pub idle_count: usize,
    pub time_used: u32,
    pub has_error: bool,
    pub out_of_memory: bool,
}

/// Why a returned context was destroyed instead of pooled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    Orphaned,
    IdleListFull,
    ReuseExhausted,
    ErrorState,
    OutOfMemory,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EvictionReason::Orphaned => "orphaned",
            EvictionReason::IdleListFull => "idle list full",
            EvictionReason::ReuseExhausted => "reuse limit reached",
            EvictionReason::ErrorState => "error state",
            EvictionReason::OutOfMemory => "out of memory",
        };
        f.write_str(text)
    }
}

// ============================================================================
// EvictionRule Trait
// ============================================================================

/// One reason a returned context may not go back on its idle list.
pub trait EvictionRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "idle-list-full")
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn applies(&self, candidate: &EvictionCandidate) -> bool;

    fn reason(&self) -> EvictionReason;
}

pub struct OrphanedRule;

impl EvictionRule for OrphanedRule {
    fn id(&self) -> &'static str {
        "orphaned"
    }

    fn description(&self) -> &'static str {
        "Context was checked out before the pool was cleared"
    }

    fn applies(&self, candidate: &EvictionCandidate) -> bool {
        candidate.orphaned
    }

    fn reason(&self) -> EvictionReason {
        EvictionReason::Orphaned
    }
}

pub struct IdleListFullRule {
    pub max_idle: usize,
}

impl EvictionRule for IdleListFullRule {
    fn id(&self) -> &'static str {
        "idle-list-full"
    }

    fn description(&self) -> &'static str {
        "The idle list for this key already holds the maximum number of contexts"
    }

    fn applies(&self, candidate: &EvictionCandidate) -> bool {
        candidate.idle_count >= self.max_idle
    }

    fn reason(&self) -> EvictionReason {
        EvictionReason::IdleListFull
    }
}

pub struct ReuseExhaustedRule {
    pub max_reuse: u32,
}

impl EvictionRule for ReuseExhaustedRule {
    fn id(&self) -> &'static str {
        "reuse-exhausted"
    }

    fn description(&self) -> &'static str {
        "Context has been handed out more times than allowed"
    }

    fn applies(&self, candidate: &EvictionCandidate) -> bool {
        candidate.time_used > self.max_reuse
    }

    fn reason(&self) -> EvictionReason {
        EvictionReason::ReuseExhausted
    }
}

pub struct ErrorStateRule;

impl EvictionRule for ErrorStateRule {
    fn id(&self) -> &'static str {
        "error-state"
    }

    fn description(&self) -> &'static str {
        "Context still carried an error when it was returned"
    }

    fn applies(&self, candidate: &EvictionCandidate) -> bool {
        candidate.has_error
    }

    fn reason(&self) -> EvictionReason {
        EvictionReason::ErrorState
    }
}

pub struct OutOfMemoryRule;

impl EvictionRule for OutOfMemoryRule {
    fn id(&self) -> &'static str {
        "out-of-memory"
    }

    fn description(&self) -> &'static str {
        "Interpreter reported an out-of-memory condition"
    }

    fn applies(&self, candidate: &EvictionCandidate) -> bool {
        candidate.out_of_memory
    }

    fn reason(&self) -> EvictionReason {
        EvictionReason::OutOfMemory
    }
}

// ============================================================================
// EvictionPolicy - Runs Rules In Order
// ============================================================================

pub struct EvictionPolicy {
    rules: Vec<Box<dyn EvictionRule>>,
}

impl EvictionPolicy {
    pub fn new(max_idle: usize, max_reuse: u32) -> Self {
        Self {
            rules: vec![
                Box::new(OrphanedRule),
                Box::new(IdleListFullRule { max_idle }),
                Box::new(ReuseExhaustedRule { max_reuse }),
                Box::new(ErrorStateRule),
                Box::new(OutOfMemoryRule),
            ],
        }
    }

    /// First applicable reason, or `None` if the context may be pooled
    pub fn evaluate(&self, candidate: &EvictionCandidate) -> Option<EvictionReason> {
        self.rules
            .iter()
            .find(|rule| rule.applies(candidate))
            .map(|rule| rule.reason())
    }

    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl fmt::Debug for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.id()))
            .finish()
    }
}
