//! In-memory interpreter
//!
//! A deterministic stand-in for a real engine. It keeps globals in a map,
//! checks delimiter balance instead of parsing, and understands a handful of
//! statement shapes:
//!
//! - `name = <literal>` assigns a global (JSON literals, `'single'` strings,
//!   `undefined`, or a `function ...` which is stored as code)
//! - `delete name` removes a global
//! - `throw <message>` fails with that message
//! - `name()` calls an injected native with an empty argument document
//! - a bare global name or literal evaluates to its value
//!
//! Functions return the literal following their first `return`, if any.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use super::{Interpreter, InterpreterFactory, NativeFunction};
use crate::error::{Result, ScriptError};
use crate::types::{Document, FunctionId, InvokeFlags, ScriptValue, ValueType};
use crate::util::{has_js_return, js_skip_white_space, validate_object_id_string};

/// Global written by `invoke` unless the caller ignores the return value
pub const RETURN_VALUE_FIELD: &str = "__returnValue";

/// Global holding the argument document of the current call
pub const ARGS_FIELD: &str = "__args";

pub struct MemoryInterpreter {
    fields: HashMap<String, ScriptValue>,
    functions: HashMap<FunctionId, String>,
    natives: HashMap<String, NativeFunction>,
    last_error: String,
    out_of_memory: bool,
    memory_limit: Option<usize>,
    memory_used: usize,
}

impl MemoryInterpreter {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            functions: HashMap::new(),
            natives: HashMap::new(),
            last_error: String::new(),
            out_of_memory: false,
            memory_limit: None,
            memory_used: 0,
        }
    }

    /// Cap the bytes held by globals. Exceeding it flags out-of-memory.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn compiled_count(&self) -> usize {
        self.functions.len()
    }

    fn fail(&mut self, err: ScriptError) -> ScriptError {
        self.last_error = err.to_string();
        err
    }

    fn run_statement(&mut self, stmt: &str) -> Result<Option<ScriptValue>> {
        if let Some(message) = stmt.strip_prefix("throw ") {
            let message = unquote(message.trim()).to_string();
            return Err(self.fail(ScriptError::Execution(message)));
        }

        if let Some(name) = stmt.strip_prefix("delete ") {
            self.delete_field(name.trim())?;
            return Ok(None);
        }

        if let Some((name, literal)) = split_assignment(stmt) {
            let value = parse_literal(literal).ok_or_else(|| {
                self.fail(ScriptError::Execution(format!(
                    "cannot evaluate '{}'",
                    literal
                )))
            })?;
            self.set_field(name, value.clone(), false)?;
            return Ok(Some(value));
        }

        if let Some(name) = stmt.strip_suffix("()") {
            if let Some(native) = self.natives.get(name.trim()).cloned() {
                let result = native(&Document::new()).map_err(|e| self.fail(e))?;
                return Ok(Some(result));
            }
        }

        if let Some(value) = self.fields.get(stmt) {
            return Ok(Some(value.clone()));
        }

        Ok(parse_literal(stmt))
    }
}

impl Default for MemoryInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for MemoryInterpreter {
    fn compile(&mut self, source: &str, id: FunctionId) -> Result<()> {
        if let Err(msg) = check_balanced(source) {
            return Err(self.fail(ScriptError::CompileFailed(format!("SyntaxError: {}", msg))));
        }
        self.functions.insert(id, source.to_string());
        Ok(())
    }

    fn invoke(
        &mut self,
        func: FunctionId,
        args: Option<&Document>,
        _recv: Option<&Document>,
        _timeout_ms: u64,
        flags: InvokeFlags,
    ) -> Result<i32> {
        let Some(source) = self.functions.get(&func).cloned() else {
            return Err(self.fail(ScriptError::UnknownFunction(func.to_string())));
        };

        if let Some(args) = args {
            self.set_field(ARGS_FIELD, ScriptValue::Object(args.clone()), flags.read_only_args)?;
        }

        if let Some(pos) = source.find("throw ") {
            let message = statement_at(&source[pos + 6..]);
            let message = unquote(message).to_string();
            return Err(self.fail(ScriptError::Execution(message)));
        }

        let returned = if has_js_return(&source) {
            source
                .find("return")
                .and_then(|pos| parse_literal(statement_at(&source[pos + 6..])))
                .unwrap_or(ScriptValue::Undefined)
        } else {
            ScriptValue::Undefined
        };

        if !flags.ignore_return {
            self.set_field(RETURN_VALUE_FIELD, returned, false)?;
        }
        Ok(0)
    }

    fn exec(&mut self, code: &str, _name: &str, _timeout_ms: u64) -> Result<Option<ScriptValue>> {
        if let Err(msg) = check_balanced(code) {
            return Err(self.fail(ScriptError::Execution(format!("SyntaxError: {}", msg))));
        }

        let mut last = None;
        let statements = code
            .split([';', '\n'])
            .map(|s| js_skip_white_space(s).trim_end())
            .filter(|s| !s.is_empty());
        for stmt in statements {
            last = self.run_statement(stmt)?;
        }
        Ok(last)
    }

    fn field_type(&self, name: &str) -> ValueType {
        self.fields
            .get(name)
            .map(ScriptValue::value_type)
            .unwrap_or(ValueType::Undefined)
    }

    fn get_field(&self, name: &str) -> Option<ScriptValue> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: ScriptValue, _read_only: bool) -> Result<()> {
        match &value {
            ScriptValue::Code(code) => {
                if let Err(msg) = check_balanced(code) {
                    return Err(ScriptError::Execution(format!("SyntaxError: {}", msg)));
                }
            }
            ScriptValue::ObjectId(id) => validate_object_id_string(id)?,
            _ => {}
        }

        let old = self
            .fields
            .get(name)
            .map(|v| name.len() + v.approx_size())
            .unwrap_or(0);
        let used = self.memory_used.saturating_sub(old) + name.len() + value.approx_size();
        if let Some(limit) = self.memory_limit {
            if used > limit {
                self.out_of_memory = true;
                return Err(ScriptError::OutOfMemory(format!(
                    "setting '{}' needs {} bytes, limit is {}",
                    name, used, limit
                )));
            }
        }

        self.memory_used = used;
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    fn delete_field(&mut self, name: &str) -> Result<()> {
        if let Some(old) = self.fields.remove(name) {
            self.memory_used = self
                .memory_used
                .saturating_sub(name.len() + old.approx_size());
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if let Some(value) = self.fields.remove(from) {
            self.fields.insert(to.to_string(), value);
        }
        Ok(())
    }

    fn inject_native(&mut self, name: &str, func: NativeFunction) -> Result<()> {
        self.natives.insert(name.to_string(), func);
        Ok(())
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn has_out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    fn gc(&mut self) {}

    fn reset(&mut self) {
        self.last_error.clear();
        let transient: Vec<String> = self
            .fields
            .keys()
            .filter(|k| k.starts_with("__"))
            .cloned()
            .collect();
        for name in transient {
            let _ = self.delete_field(&name);
        }
    }
}

/// Factory for [`MemoryInterpreter`]
#[derive(Debug, Clone, Default)]
pub struct MemoryInterpreterFactory {
    memory_limit: Option<usize>,
}

impl MemoryInterpreterFactory {
    pub fn new() -> Self {
        Self { memory_limit: None }
    }

    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
        }
    }
}

impl InterpreterFactory for MemoryInterpreterFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self) -> Result<Box<dyn Interpreter>> {
        let interpreter = match self.memory_limit {
            Some(limit) => MemoryInterpreter::new().with_memory_limit(limit),
            None => MemoryInterpreter::new(),
        };
        Ok(Box::new(interpreter))
    }
}

/* ===================== Scanning helpers ===================== */

fn check_balanced(source: &str) -> std::result::Result<(), String> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;

    for c in source.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '{' | '[' => stack.push(c),
            ')' | '}' | ']' => {
                let open = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("unexpected '{}'", c));
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if let Some(open) = stack.pop() {
        return Err(format!("unclosed '{}'", open));
    }
    Ok(())
}

/// Text up to the end of the current statement or block
fn statement_at(text: &str) -> &str {
    let end = text.find([';', '}', '\n']).unwrap_or(text.len());
    text[..end].trim()
}

fn split_assignment(stmt: &str) -> Option<(&str, &str)> {
    let (name, literal) = stmt.split_once('=')?;
    if literal.starts_with('=') {
        return None;
    }
    let name = name.trim();
    let is_ident = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    is_ident.then(|| (name, literal.trim()))
}

fn unquote(text: &str) -> &str {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

fn parse_literal(text: &str) -> Option<ScriptValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text == "undefined" {
        return Some(ScriptValue::Undefined);
    }
    if text.starts_with("function") {
        return Some(ScriptValue::Code(text.to_string()));
    }
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Some(ScriptValue::String(text[1..text.len() - 1].to_string()));
    }
    serde_json::from_str::<JsonValue>(text)
        .ok()
        .map(|json| ScriptValue::from_json(&json))
}
