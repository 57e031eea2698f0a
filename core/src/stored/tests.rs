use super::*;
use crate::interpreter::{MemoryInterpreter, NativeFunction};
use crate::types::{Document, FunctionId, InvokeFlags, ValueType};
use maplit::btreeset;

fn setup() -> (Arc<LibraryVersion>, MemoryStoredFunctions, MemoryInterpreter, StoredFunctionState) {
    let version = Arc::new(LibraryVersion::new());
    let store = MemoryStoredFunctions::new(version.clone());
    (version, store, MemoryInterpreter::new(), StoredFunctionState::new())
}

#[test]
fn test_unbound_context_is_ignored_when_allowed() {
    let (version, store, mut interp, mut state) = setup();
    let report = state.load("", &version, &store, &mut interp, true).unwrap();
    assert_eq!(report, LoadReport::NotConnected);
    assert_eq!(store.fetch_count(), 0);
}

#[test]
fn test_unbound_context_is_a_precondition_failure() {
    let (version, store, mut interp, mut state) = setup();
    let err = state.load("", &version, &store, &mut interp, false).unwrap_err();
    assert!(matches!(err, ScriptError::NotConnected));
    assert_eq!(err.code(), Some(10208));
}

#[test]
fn test_first_load_binds_every_definition() {
    let (version, store, mut interp, mut state) = setup();
    store.save("app", "double", ScriptValue::Code("function(x) { return x * 2; }".into()));
    store.save("app", "limit", ScriptValue::Int(10));

    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { bound, failed, removed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(bound, vec!["double".to_string(), "limit".to_string()]);
    assert!(failed.is_empty());
    assert!(removed.is_empty());
    assert_eq!(interp.get_field("limit"), Some(ScriptValue::Int(10)));
    assert_eq!(state.names(), &btreeset! {"double".to_string(), "limit".to_string()});
    assert_eq!(state.loaded_version(), version.current());
}

#[test]
fn test_no_fetch_when_version_matches() {
    let (version, store, mut interp, mut state) = setup();
    store.save("app", "f", ScriptValue::Code("function() {}".into()));

    state.load("app", &version, &store, &mut interp, false).unwrap();
    assert_eq!(store.fetch_count(), 1);

    for _ in 0..5 {
        let report = state.load("app", &version, &store, &mut interp, false).unwrap();
        assert_eq!(report, LoadReport::UpToDate);
    }
    assert_eq!(store.fetch_count(), 1);
}

#[test]
fn test_stored_func_mod_triggers_exactly_one_fetch() {
    let (version, store, mut interp, mut state) = setup();
    state.load("app", &version, &store, &mut interp, false).unwrap();
    assert_eq!(store.fetch_count(), 1);

    let bumped = version.stored_func_mod();
    state.load("app", &version, &store, &mut interp, false).unwrap();
    state.load("app", &version, &store, &mut interp, false).unwrap();

    assert_eq!(store.fetch_count(), 2);
    assert_eq!(state.loaded_version(), bumped);
}

#[test]
fn test_deleted_definitions_are_unbound() {
    let (version, store, mut interp, mut state) = setup();
    store.save("app", "a", ScriptValue::Int(1));
    store.save("app", "b", ScriptValue::Int(2));
    state.load("app", &version, &store, &mut interp, false).unwrap();
    assert_eq!(interp.get_field("b"), Some(ScriptValue::Int(2)));

    assert!(store.remove("app", "b"));
    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { removed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(removed, vec!["b".to_string()]);
    assert_eq!(interp.get_field("b"), None);
    assert_eq!(interp.get_field("a"), Some(ScriptValue::Int(1)));
    assert_eq!(state.names(), &btreeset! {"a".to_string()});
}

#[test]
fn test_unbindable_definition_is_skipped() {
    let (version, store, mut interp, mut state) = setup();
    store.save("app", "broken", ScriptValue::Code("function( {".into()));
    store.save("app", "ok", ScriptValue::Int(3));

    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { bound, failed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(bound, vec!["ok".to_string()]);
    assert_eq!(failed, vec!["broken".to_string()]);
    assert!(!state.names().contains("broken"));
}

#[test]
fn test_previously_bound_name_that_now_fails_is_removed() {
    let (version, store, mut interp, mut state) = setup();
    store.save("app", "f", ScriptValue::Code("function() {}".into()));
    state.load("app", &version, &store, &mut interp, false).unwrap();

    store.save("app", "f", ScriptValue::Code("function() {".into()));
    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { removed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(removed, vec!["f".to_string()]);
    assert_eq!(interp.get_field("f"), None);
}

#[test]
fn test_non_string_name_aborts_reload() {
    let (version, store, mut interp, mut state) = setup();
    store.push_raw(
        "app",
        StoredFunctionRecord {
            name: ScriptValue::Int(5),
            value: Some(ScriptValue::Int(1)),
        },
    );

    let err = state.load("app", &version, &store, &mut interp, false).unwrap_err();
    assert!(matches!(err, ScriptError::StoredNameNotString(_)));
    assert_eq!(err.code(), Some(10209));
}

#[test]
fn test_missing_value_aborts_reload() {
    let (version, store, mut interp, mut state) = setup();
    store.push_raw(
        "app",
        StoredFunctionRecord {
            name: ScriptValue::String("empty".into()),
            value: None,
        },
    );

    let err = state.load("app", &version, &store, &mut interp, false).unwrap_err();
    assert!(matches!(err, ScriptError::StoredValueMissing(ref n) if n == "empty"));
    assert_eq!(err.code(), Some(10210));
}

#[test]
fn test_version_recorded_before_fetch() {
    let (version, store, mut interp, mut state) = setup();
    store.set_unavailable(true);

    let err = state.load("app", &version, &store, &mut interp, false).unwrap_err();
    assert!(matches!(err, ScriptError::Fetch(_)));

    // Same epoch: no second attempt
    store.set_unavailable(false);
    let report = state.load("app", &version, &store, &mut interp, false).unwrap();
    assert_eq!(report, LoadReport::UpToDate);
    assert_eq!(store.fetch_count(), 1);
}

#[test]
fn test_databases_are_isolated() {
    let (version, store, mut interp, mut state) = setup();
    store.save("other", "secret", ScriptValue::Int(1));
    store.save("app", "mine", ScriptValue::Int(2));

    state.load("app", &version, &store, &mut interp, false).unwrap();
    assert_eq!(interp.get_field("secret"), None);
    assert_eq!(interp.get_field("mine"), Some(ScriptValue::Int(2)));
}

/// Delegates to a memory interpreter but refuses to delete pinned names
struct PinnedFields {
    inner: MemoryInterpreter,
    pinned: BTreeSet<String>,
}

impl Interpreter for PinnedFields {
    fn compile(&mut self, source: &str, id: FunctionId) -> Result<()> {
        self.inner.compile(source, id)
    }

    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        recv: Option<&Document>,
        timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32> {
        self.inner.invoke(func, args, recv, timeout_ms, flags)
    }

    fn exec(&mut self, code: &str, name: &str, timeout_ms: u64) -> Result<Option<ScriptValue>> {
        self.inner.exec(code, name, timeout_ms)
    }

    fn field_type(&self, name: &str) -> ValueType {
        self.inner.field_type(name)
    }

    fn get_field(&self, name: &str) -> Option<ScriptValue> {
        self.inner.get_field(name)
    }

    fn set_field(&mut self, name: &str, value: ScriptValue, read_only: bool) -> Result<()> {
        self.inner.set_field(name, value, read_only)
    }

    fn delete_field(&mut self, name: &str) -> Result<()> {
        if self.pinned.contains(name) {
            return Err(ScriptError::Execution(format!("{} is pinned", name)));
        }
        self.inner.delete_field(name)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()> {
        self.inner.inject_native(name, func)
    }

    fn last_error(&self) -> String {
        self.inner.last_error()
    }

    fn has_out_of_memory(&self) -> bool {
        self.inner.has_out_of_memory()
    }

    fn gc(&mut self) {
        self.inner.gc()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }
}

#[test]
fn test_failed_unbind_stays_tracked_and_is_retried() {
    let (version, store, inner, mut state) = setup();
    let mut interp = PinnedFields {
        inner,
        pinned: btreeset! {"a".to_string()},
    };
    store.save("app", "a", ScriptValue::Int(1));
    store.save("app", "b", ScriptValue::Int(2));
    state.load("app", &version, &store, &mut interp, false).unwrap();

    assert!(store.remove("app", "a"));
    assert!(store.remove("app", "b"));
    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { removed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(removed, vec!["b".to_string()]);
    assert_eq!(interp.get_field("b"), None);
    assert_eq!(state.names(), &btreeset! {"a".to_string()});

    interp.pinned.clear();
    version.stored_func_mod();
    let report = state.load("app", &version, &store, &mut interp, false).unwrap();

    let LoadReport::Reloaded { removed, .. } = report else {
        panic!("expected a reload");
    };
    assert_eq!(removed, vec!["a".to_string()]);
    assert_eq!(interp.get_field("a"), None);
    assert!(state.names().is_empty());
}
