//! Default literal type checks and macros.
//!
//! Checks run in registration order and the first to accept a token wins:
//! Number, String, Null, Name.  Extensions append theirs after these.

use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ScriptResult;
use crate::script::exec::ExecState;
use crate::script::interp::{Interpreter, Tables};
use crate::script::lexer::Token;
use crate::script::value::Value;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("number pattern is valid")
    })
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern is valid"))
}

/// `true` if `s` is a valid Name literal.
pub fn is_identifier(s: &str) -> bool {
    name_re().is_match(s)
}

fn push(
    t: &mut Tables,
    f: impl Fn(&Token, &mut Interpreter, &mut ExecState) -> ScriptResult<Option<Value>> + 'static,
) {
    t.type_checks.push(Rc::new(f));
}

pub fn register(t: &mut Tables) {
    push(t, |tok, _, _| {
        if tok.is_string || !number_re().is_match(&tok.text) {
            return Ok(None);
        }
        Ok(tok.text.parse::<f64>().ok().filter(|n| n.is_finite()).map(Value::Number))
    });
    push(t, |tok, _, _| Ok(tok.is_string.then(|| Value::String(tok.text.clone()))));
    push(t, |tok, _, _| Ok(tok.is("null").then_some(Value::Null)));
    push(t, |tok, _, _| {
        Ok((!tok.is_string && is_identifier(&tok.text)).then(|| Value::Name(tok.text.clone())))
    });

    for (name, value) in default_macros() {
        t.macros.insert(name.to_owned(), value.to_owned());
    }
}

/// Platform macros.
pub fn default_macros() -> [(&'static str, &'static str); 4] {
    if cfg!(target_os = "windows") {
        [("WINDOWS", "1"), ("LINUX", "0"), ("UNKNOWN", "0"), ("OSNAME", "\"WINDOWS\"")]
    } else if cfg!(target_os = "linux") {
        [("WINDOWS", "0"), ("LINUX", "1"), ("UNKNOWN", "0"), ("OSNAME", "\"LINUX\"")]
    } else {
        [("WINDOWS", "0"), ("LINUX", "0"), ("UNKNOWN", "1"), ("OSNAME", "\"UNKNOWN\"")]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
