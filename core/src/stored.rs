//! Stored-function synchronization
//!
//! Each database has a library of named script definitions kept in a backing
//! collection. Contexts pull that library in lazily: the collection owner
//! bumps a shared [`LibraryVersion`] on every change, and a context only
//! re-fetches when the version it last loaded is behind.
//!
//! Names that vanished from the collection since the previous reload are
//! deleted from the context, so removals propagate as well as additions.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, ScriptError};
use crate::interpreter::Interpreter;
use crate::types::ScriptValue;

/* ===================== Version counter ===================== */

static GLOBAL_VERSION: OnceLock<Arc<LibraryVersion>> = OnceLock::new();

/// Monotonic version of the stored-function library.
///
/// Contexts start at version 0 and the counter starts at 1, so a fresh
/// context always loads once.
#[derive(Debug)]
pub struct LibraryVersion {
    current: AtomicI64,
}

impl LibraryVersion {
    pub fn new() -> Self {
        Self {
            current: AtomicI64::new(1),
        }
    }

    /// The process-wide counter used by engines that are not given their own
    pub fn global() -> Arc<LibraryVersion> {
        GLOBAL_VERSION
            .get_or_init(|| Arc::new(LibraryVersion::new()))
            .clone()
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Record that the backing collection changed. Returns the new version.
    pub fn stored_func_mod(&self) -> i64 {
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for LibraryVersion {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Backing collection ===================== */

/// One raw `{name, value}` record as read from the backing collection.
///
/// Records are validated during the reload: the name must be a string and
/// the value must be present.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFunctionRecord {
    pub name: ScriptValue,
    pub value: Option<ScriptValue>,
}

impl StoredFunctionRecord {
    pub fn new(name: impl Into<String>, value: ScriptValue) -> Self {
        Self {
            name: ScriptValue::String(name.into()),
            value: Some(value),
        }
    }

    /// Convenience for the common case of a stored function body
    pub fn code(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, ScriptValue::Code(source.into()))
    }
}

/// Read access to the stored-function collection of each database
pub trait StoredFunctionSource: Send + Sync {
    /// Fetch every stored definition for `db_name`, in collection order
    fn fetch_stored(&self, db_name: &str) -> Result<Vec<StoredFunctionRecord>>;
}

/// Collection kept in memory, counting fetches.
#[derive(Debug)]
pub struct MemoryStoredFunctions {
    records: RwLock<HashMap<String, Vec<StoredFunctionRecord>>>,
    version: Arc<LibraryVersion>,
    fetches: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStoredFunctions {
    /// Writes through this collection bump `version`
    pub fn new(version: Arc<LibraryVersion>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            version,
            fetches: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or replace a definition
    pub fn save(&self, db_name: &str, name: &str, value: ScriptValue) {
        {
            let mut records = self.records.write();
            let list = records.entry(db_name.to_string()).or_default();
            let record = StoredFunctionRecord::new(name, value);
            match list
                .iter_mut()
                .find(|r| r.name == ScriptValue::String(name.to_string()))
            {
                Some(existing) => *existing = record,
                None => list.push(record),
            }
        }
        self.version.stored_func_mod();
    }

    /// Append a record without validation, e.g. a malformed one
    pub fn push_raw(&self, db_name: &str, record: StoredFunctionRecord) {
        self.records
            .write()
            .entry(db_name.to_string())
            .or_default()
            .push(record);
        self.version.stored_func_mod();
    }

    pub fn remove(&self, db_name: &str, name: &str) -> bool {
        let removed = {
            let mut records = self.records.write();
            match records.get_mut(db_name) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|r| r.name != ScriptValue::String(name.to_string()));
                    list.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.version.stored_func_mod();
        }
        removed
    }

    /// Make subsequent fetches fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl StoredFunctionSource for MemoryStoredFunctions {
    fn fetch_stored(&self, db_name: &str) -> Result<Vec<StoredFunctionRecord>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(ScriptError::Fetch(format!(
                "collection for '{}' is unavailable",
                db_name
            )));
        }
        Ok(self
            .records
            .read()
            .get(db_name)
            .cloned()
            .unwrap_or_default())
    }
}

/* ===================== Synchronizer ===================== */

/// What a call to `load_stored` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadReport {
    /// The context is not bound to a database and unbound contexts were allowed
    NotConnected,
    /// Loaded version already matched; nothing fetched
    UpToDate,
    Reloaded {
        version: i64,
        bound: Vec<String>,
        failed: Vec<String>,
        removed: Vec<String>,
    },
}

/// Per-context synchronization state
#[derive(Debug, Default)]
pub struct StoredFunctionState {
    loaded_version: i64,
    names: BTreeSet<String>,
}

impl StoredFunctionState {
    pub fn new() -> Self {
        Self {
            loaded_version: 0,
            names: BTreeSet::new(),
        }
    }

    pub fn loaded_version(&self) -> i64 {
        self.loaded_version
    }

    /// Names currently bound from the collection
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Bring `interpreter` up to date with the library of `db_name`.
    ///
    /// The loaded version is recorded before fetching, so a failing fetch is
    /// not retried until the library changes again. A definition that cannot
    /// be bound is logged and skipped; a malformed record aborts the reload.
    pub fn load(
        &mut self,
        db_name: &str,
        version: &LibraryVersion,
        source: &dyn StoredFunctionSource,
        interpreter: &mut dyn Interpreter,
        ignore_not_connected: bool,
    ) -> Result<LoadReport> {
        if db_name.is_empty() {
            if ignore_not_connected {
                return Ok(LoadReport::NotConnected);
            }
            return Err(ScriptError::NotConnected);
        }

        let current = version.current();
        if self.loaded_version == current {
            return Ok(LoadReport::UpToDate);
        }
        self.loaded_version = current;

        let records = source.fetch_stored(db_name)?;
        debug!(
            db = db_name,
            version = current,
            count = records.len(),
            "Reloading stored functions"
        );

        let mut this_time = BTreeSet::new();
        let mut bound = Vec::new();
        let mut failed = Vec::new();

        for record in records {
            let name = match record.name {
                ScriptValue::String(name) => name,
                other => return Err(ScriptError::StoredNameNotString(other.to_string())),
            };
            let Some(value) = record.value else {
                return Err(ScriptError::StoredValueMissing(name));
            };

            match interpreter.set_field(&name, value, false) {
                Ok(()) => {
                    this_time.insert(name.clone());
                    self.names.insert(name.clone());
                    bound.push(name);
                }
                Err(e) => {
                    warn!(db = db_name, "unable to load stored function {}(): {}", name, e);
                    failed.push(name);
                }
            }
        }

        let stale: Vec<String> = self
            .names
            .iter()
            .filter(|name| !this_time.contains(*name))
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for name in stale {
            // Still tracked on failure so the next reload tries again
            match interpreter.delete_field(&name) {
                Ok(()) => {
                    self.names.remove(&name);
                    removed.push(name);
                }
                Err(e) => warn!(db = db_name, "unable to unload stored function {}(): {}", name, e),
            }
        }

        Ok(LoadReport::Reloaded {
            version: current,
            bound,
            failed,
            removed,
        })
    }
}

#[cfg(test)]
mod tests;
