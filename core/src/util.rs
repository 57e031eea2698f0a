//! Script text helpers
//!
//! Small scanners over raw script source that the host needs before handing
//! code to an interpreter. None of these parse the language; they only look at
//! characters.

use crate::error::{Result, ScriptError};

/// Check whether `code` contains a top-level looking `return` keyword.
///
/// Only the first occurrence is inspected. It counts if it is not inside an
/// open single or double quote, starts the text or follows whitespace, and is
/// not followed by a letter or digit.
pub fn has_js_return(code: &str) -> bool {
    let Some(x) = code.find("return") else {
        return false;
    };

    let bytes = code.as_bytes();
    let mut quotes = 0;
    let mut single_quotes = 0;
    for &b in &bytes[..x] {
        match b {
            b'"' => quotes += 1,
            b'\'' => single_quotes += 1,
            _ => {}
        }
    }
    if quotes % 2 != 0 || single_quotes % 2 != 0 {
        return false;
    }

    let preceded_ok = x == 0 || bytes[x - 1].is_ascii_whitespace();
    let followed_ok = match bytes.get(x + 6) {
        Some(b) => !b.is_ascii_alphanumeric(),
        None => true,
    };
    preceded_ok && followed_ok
}

/// Skip leading whitespace and `//` line comments
pub fn js_skip_white_space(raw: &str) -> &str {
    let mut rest = raw;
    loop {
        rest = rest.trim_start();
        if !rest.starts_with("//") {
            return rest;
        }
        rest = match rest.find('\n') {
            Some(pos) => &rest[pos..],
            None => "",
        };
    }
}

/// Validate the textual form of an object id: 24 hex digits
pub fn validate_object_id_string(s: &str) -> Result<()> {
    if s.len() != 24 {
        return Err(ScriptError::ObjectIdLength);
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ScriptError::ObjectIdNotHex);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_js_return_simple() {
        assert!(has_js_return("return 1"));
        assert!(has_js_return("function() { return this.a; }"));
        assert!(has_js_return("x; return"));
    }

    #[test]
    fn test_has_js_return_rejects_identifiers() {
        assert!(!has_js_return("returned = 1"));
        assert!(!has_js_return("var areturn = 2; "));
        assert!(!has_js_return("x = return1"));
    }

    #[test]
    fn test_has_js_return_inside_quotes() {
        assert!(!has_js_return("x = \"the return value\""));
        assert!(!has_js_return("x = 'return'"));
        assert!(has_js_return("x = 'a'; return x"));
    }

    #[test]
    fn test_has_js_return_absent() {
        assert!(!has_js_return("this.a > 3"));
    }

    #[test]
    fn test_skip_white_space_and_line_comments() {
        assert_eq!(js_skip_white_space("   x"), "x");
        assert_eq!(js_skip_white_space("// one\n  // two\n\tcode()"), "code()");
        assert_eq!(js_skip_white_space("// only a comment"), "");
        assert_eq!(js_skip_white_space("/* block */ x"), "/* block */ x");
    }

    #[test]
    fn test_validate_object_id() {
        assert!(validate_object_id_string("507f1f77bcf86cd799439011").is_ok());
        assert!(matches!(
            validate_object_id_string("507f1f77"),
            Err(ScriptError::ObjectIdLength)
        ));
        assert!(matches!(
            validate_object_id_string("507f1f77bcf86cd79943901z"),
            Err(ScriptError::ObjectIdNotHex)
        ));
    }
}
