//! Expression evaluation.
//!
//! Source text is lexed with [`expression_lexer`], operator-character runs
//! are split against the live operator table, and the resulting items are
//! reduced by precedence climbing.  Groups and calls are evaluated only when
//! the climb reaches them.
//!
//! Priorities follow the usual table convention: a *lower* value binds
//! tighter, and binary operators of equal priority associate to the left.

use crate::error::{ScriptError, ScriptResult};
use crate::script::exec::{call_builtin, ExecState};
use crate::script::interp::{Interpreter, Operator, OperatorKind};
use crate::script::lexer::{argument_lexer, expression_lexer, Token};
use crate::script::value::Value;

/// Characters that form operator runs, e.g. `$x` or `2*-3`.
pub const OPERATOR_CHARS: &str = "+-*/^%$=<>!&|~";

/// Nesting limit for evaluations that started from macro text.
pub const MAX_MACRO_DEPTH: usize = 32;

fn is_operator_char(c: char) -> bool {
    OPERATOR_CHARS.contains(c)
}

/// `true` for a word like `12e` or `1.5E`, i.e. a mantissa awaiting its
/// exponent.
fn is_mantissa(word: &str) -> bool {
    let Some(digits) = word.strip_suffix(['e', 'E']) else {
        return false;
    };
    let mut dots = 0;
    let mut seen_digit = false;
    for c in digits.chars() {
        match c {
            '.' => dots += 1,
            c if c.is_ascii_digit() => seen_digit = true,
            _ => return false,
        }
    }
    seen_digit && dots <= 1
}

#[derive(Debug)]
enum Item {
    Op(String),
    Group(String),
    Call(String, String),
    Literal(Token),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Evaluate `source` to a single value.
pub fn evaluate(source: &str, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
    let tokens = split_operators(expression_lexer().lex(source)?, interp);
    let (tokens, expanded) = expand_macros(tokens, interp)?;
    if !expanded {
        return reduce(source, tokens, interp, state);
    }
    // Groups and calls inside a replacement are expanded again when they
    // are evaluated, so a self-referencing macro would never terminate.
    if state.macro_depth >= MAX_MACRO_DEPTH {
        return Err(ScriptError::value(format!("macro expansion nested too deeply: {source}")));
    }
    state.macro_depth += 1;
    let result = reduce(source, tokens, interp, state);
    state.macro_depth -= 1;
    result
}

fn reduce(source: &str, tokens: Vec<Token>, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
    let items = classify(tokens, interp);
    if items.is_empty() {
        return Err(ScriptError::Expression(source.to_owned()));
    }
    let mut climb = Climb { items, pos: 0, source };
    let value = climb.expression(i32::MAX, interp, state)?;
    if climb.pos != climb.items.len() {
        return Err(ScriptError::Expression(source.to_owned()));
    }
    Ok(value)
}

/// Split an argument list on top-level commas.  Returns the source text of
/// each segment; an empty or all-whitespace list yields no segments.
pub fn split_arguments(args: &str) -> ScriptResult<Vec<&str>> {
    let tokens = argument_lexer().lex(args)?;
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let mut start = 0;
    for tok in tokens.iter().filter(|t| t.is(",")) {
        segments.push(args[start..tok.span.start].trim());
        start = tok.span.end;
    }
    segments.push(args[start..].trim());
    Ok(segments)
}

/// Evaluate every comma-separated segment of `args`.
pub fn evaluate_arguments(
    args: &str,
    interp: &mut Interpreter,
    state: &mut ExecState,
) -> ScriptResult<Vec<Value>> {
    split_arguments(args)?
        .into_iter()
        .map(|segment| evaluate(segment, interp, state))
        .collect()
}

/// Try each type check in registration order.
pub fn literal(token: &Token, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
    let checks = interp.tables.type_checks.clone();
    for check in checks {
        if let Some(v) = check(token, interp, state)? {
            return Ok(v);
        }
    }
    Err(ScriptError::value(format!("invalid literal: {}", token.text)))
}

// ── Token preparation ─────────────────────────────────────────────────────────

/// Replace unquoted tokens that name a macro with the macro's tokens.
/// Replacements are not expanded again within this pass.  The flag is
/// `true` if anything was replaced.
fn expand_macros(tokens: Vec<Token>, interp: &Interpreter) -> ScriptResult<(Vec<Token>, bool)> {
    let macros = &interp.tables.macros;
    if macros.is_empty() {
        return Ok((tokens, false));
    }
    let mut expanded = false;
    let mut out = Vec::with_capacity(tokens.len());
    for tok in tokens {
        match macros.get(&tok.text) {
            Some(replacement) if !tok.is_string => {
                expanded = true;
                for mut t in split_operators(expression_lexer().lex(replacement)?, interp) {
                    t.line = tok.line;
                    t.span = tok.span.clone();
                    out.push(t);
                }
            }
            _ => out.push(tok),
        }
    }
    Ok((out, expanded))
}

/// Break unquoted tokens into word and operator-run pieces, then split each
/// run by longest match against the registered symbols.
fn split_operators(tokens: Vec<Token>, interp: &Interpreter) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    for tok in tokens {
        if tok.is_string || tok.text.starts_with(['(', '[', '{']) || interp.tables.is_operator(&tok.text) {
            out.push(tok);
            continue;
        }
        let mut word = String::new();
        let mut run = String::new();
        let mut chars = tok.text.chars().peekable();
        while let Some(c) = chars.next() {
            if is_operator_char(c) {
                // `1e-3`: the sign belongs to the number.
                let in_exponent = (c == '-' || c == '+')
                    && is_mantissa(&word)
                    && chars.peek().is_some_and(char::is_ascii_digit);
                if in_exponent {
                    word.push(c);
                    continue;
                }
                if !word.is_empty() {
                    out.push(piece(&tok, std::mem::take(&mut word)));
                }
                run.push(c);
            } else {
                if !run.is_empty() {
                    munch(&tok, std::mem::take(&mut run), interp, &mut out);
                }
                word.push(c);
            }
        }
        if !word.is_empty() {
            out.push(piece(&tok, word));
        }
        if !run.is_empty() {
            munch(&tok, run, interp, &mut out);
        }
    }
    out
}

fn piece(tok: &Token, text: String) -> Token {
    Token { text, is_string: false, line: tok.line, span: tok.span.clone() }
}

fn munch(tok: &Token, run: String, interp: &Interpreter, out: &mut Vec<Token>) {
    let mut rest = run.as_str();
    while !rest.is_empty() {
        let len = (1..=rest.len())
            .rev()
            .filter(|&n| rest.is_char_boundary(n))
            .find(|&n| interp.tables.is_operator(&rest[..n]))
            .unwrap_or(rest.len());
        out.push(piece(tok, rest[..len].to_owned()));
        rest = &rest[len..];
    }
}

fn classify(tokens: Vec<Token>, interp: &Interpreter) -> Vec<Item> {
    let mut items: Vec<Item> = Vec::with_capacity(tokens.len());
    for tok in tokens {
        if tok.is_string {
            items.push(Item::Literal(tok));
        } else if interp.tables.is_operator(&tok.text) {
            items.push(Item::Op(tok.text));
        } else if tok.is_capsule('(', ')') {
            let body = tok.capsule_body().to_owned();
            match items.last() {
                Some(Item::Literal(prev)) if !prev.is_string && interp.tables.is_callable(&prev.text) => {
                    let name = prev.text.clone();
                    items.pop();
                    items.push(Item::Call(name, body));
                }
                _ => items.push(Item::Group(body)),
            }
        } else {
            items.push(Item::Literal(tok));
        }
    }
    items
}

// ── Precedence climbing ───────────────────────────────────────────────────────

struct Climb<'s> {
    items: Vec<Item>,
    pos: usize,
    source: &'s str,
}

impl Climb<'_> {
    fn invalid(&self) -> ScriptError {
        ScriptError::Expression(self.source.to_owned())
    }

    /// Parse an operand followed by binary operators whose priority is below
    /// `limit`.
    fn expression(&mut self, limit: i32, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
        let mut left = self.operand(interp, state)?;
        while let Some(item) = self.items.get(self.pos) {
            let Item::Op(symbol) = item else {
                return Err(self.invalid());
            };
            let symbol = symbol.clone();
            let overloads = overloads(interp, &symbol, false);
            let Some(priority) = overloads.first().map(|o| o.priority) else {
                return Err(self.invalid());
            };
            if priority >= limit {
                break;
            }
            self.pos += 1;
            let right = self.expression(priority, interp, state)?;
            left = apply(&overloads, &left, Some(&right), state)?;
        }
        Ok(left)
    }

    fn operand(&mut self, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
        let Some(item) = self.items.get(self.pos) else {
            return Err(self.invalid());
        };
        self.pos += 1;
        match item {
            Item::Op(symbol) => {
                let symbol = symbol.clone();
                let overloads = overloads(interp, &symbol, true);
                let Some(priority) = overloads.first().map(|o| o.priority) else {
                    return Err(self.invalid());
                };
                let operand = self.expression(priority, interp, state)?;
                apply(&overloads, &operand, None, state)
            }
            Item::Group(body) => {
                let body = body.clone();
                evaluate(&body, interp, state)
            }
            Item::Call(name, args) => {
                let (name, args) = (name.clone(), args.clone());
                call(&name, &args, interp, state)
            }
            Item::Literal(tok) => {
                let tok = tok.clone();
                literal(&tok, interp, state)
            }
        }
    }
}

fn overloads(interp: &Interpreter, symbol: &str, unary: bool) -> Vec<Operator> {
    interp
        .tables
        .operators
        .get(symbol)
        .map(|ops| ops.iter().filter(|o| o.is_unary() == unary).cloned().collect())
        .unwrap_or_default()
}

/// Try each overload in order.  A lone candidate's error is reported as is;
/// with several, every failure is listed.
fn apply(overloads: &[Operator], left: &Value, right: Option<&Value>, state: &mut ExecState) -> ScriptResult<Value> {
    let mut failures = Vec::new();
    for op in overloads {
        let result = match (&op.kind, right) {
            (OperatorKind::Unary(f), _) => f(left, state),
            (OperatorKind::Binary(f), Some(r)) => f(left, r, state),
            (OperatorKind::Binary(_), None) => continue,
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) => failures.push(e),
        }
    }
    if failures.len() == 1 {
        return Err(failures.remove(0));
    }
    Err(ScriptError::Operator {
        left: left.type_name().to_owned(),
        right: right.map(|r| r.type_name().to_owned()),
        failures: failures.iter().map(ToString::to_string).collect(),
    })
}

/// Invoke a builtin or raw builtin from inside an expression.
fn call(name: &str, args: &str, interp: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
    if let Some(raw) = interp.tables.raw_builtins.get(name).cloned() {
        return raw(args, interp, state);
    }
    let builtin = interp
        .tables
        .builtins
        .get(name)
        .cloned()
        .ok_or_else(|| ScriptError::value(format!("unknown function: {name}")))?;
    let values = evaluate_arguments(args, interp, state)?;
    call_builtin(&builtin, &values, interp, state).map_err(|e| match e {
        e if e.is_formatted() => e,
        e => ScriptError::value(format!("{name}: {e}")),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
