pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod pool;
pub mod scope;
pub mod stored;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export main types
pub use types::*;

pub use crate::config::{Config, PoolSettings};
pub use engine::{ScriptEngine, WorkerScopes};
pub use error::{Result, ScriptError};
pub use interpreter::{Interpreter, InterpreterFactory};
pub use pool::{ContextPool, DoneOutcome, PoolKey, PooledScope};
pub use scope::{ExecutionContext, Scope};
pub use stored::{LibraryVersion, LoadReport, StoredFunctionSource};
