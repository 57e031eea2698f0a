//! Compiled-function cache
//!
//! Maps source text to the function id it was compiled under. Lookups are by
//! exact text after one leading block comment is stripped; no whitespace
//! normalization is done, so two spellings of the same function get two
//! entries.

use std::collections::HashMap;

use crate::error::Result;
use crate::types::FunctionId;

#[derive(Debug, Default)]
pub struct FunctionCache {
    entries: HashMap<String, FunctionId>,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up already stripped source text
    pub fn get(&self, source: &str) -> Option<FunctionId> {
        self.entries.get(source).copied()
    }

    /// Return the cached id for `code`, compiling it on a miss.
    ///
    /// `compile` receives the stripped text and the id to register it under.
    /// Ids are assigned sequentially starting at 1. A failed compile leaves
    /// the cache unchanged.
    pub fn get_or_compile<F>(&mut self, code: &str, compile: F) -> Result<FunctionId>
    where
        F: FnOnce(&str, FunctionId) -> Result<()>,
    {
        let source = strip_leading_comment(code);
        if let Some(id) = self.entries.get(source) {
            return Ok(*id);
        }

        let id = FunctionId(self.entries.len() as u64 + 1);
        compile(source, id)?;
        self.entries.insert(source.to_string(), id);
        Ok(id)
    }
}

/// Strip a single leading `/* ... */` comment.
///
/// The first `*/` after the opening ends the comment; nesting is not
/// recognized. When the comment is never closed the scan stops on the final
/// character, which is kept.
pub fn strip_leading_comment(code: &str) -> &str {
    let Some(rest) = code.strip_prefix("/*") else {
        return code;
    };

    if let Some(end) = rest.find("*/") {
        return &rest[end + 2..];
    }

    match rest.char_indices().last() {
        Some((pos, _)) => &rest[pos..],
        None => rest,
    }
}
