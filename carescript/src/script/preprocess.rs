//! Preprocessor: splits a source file into labels and resolves directives.
//!
//! Source is lexed once with [`source_lexer`] and grouped into lines.  A
//! line starting with a bare `@` is a directive:
//!
//! ```text
//! @ const [ NAME = expression ... ]     preprocessing-time constants
//! @ bake [ "ext" ... ]                  load extensions (or @ bake "ext")
//! @ pragma hook tokens...               run a registered pragma hook
//! @ label [ param, ... ]                open a label
//! ```
//!
//! Every other line must be a single `name(args)` instruction and is added
//! to the open label, or to an implicit `main` if no label is open yet.

use std::collections::HashMap;

use crate::error::{ScriptError, ScriptResult};
use crate::script::exec::{ExecState, Instruction, Label};
use crate::script::expr;
use crate::script::interp::{Interpreter, PragmaFn, Program, Tables};
use crate::script::lexer::{source_lexer, Lexer, Token};
use crate::script::types::is_identifier;
use crate::script::value::Value;

/// Group tokens by the line they start on.  Line numbers are kept on the
/// tokens; empty lines produce no group.
pub fn group_lines(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut lines: Vec<Vec<Token>> = Vec::new();
    for tok in tokens {
        match lines.last_mut() {
            Some(line) if line[0].line == tok.line => line.push(tok),
            _ => lines.push(vec![tok]),
        }
    }
    lines
}

/// Preprocess `source` and install the resulting program on `interp`.
pub fn preprocess(source: &str, interp: &mut Interpreter) -> ScriptResult<()> {
    interp.install_program(Program::default());
    let mut lines = group_lines(source_lexer().lex(source)?);
    let mut pass = Pass { labels: HashMap::new(), constants: HashMap::new(), current: "main".into() };

    let mut i = 0;
    while i < lines.len() {
        if lines[i][0].is("@") {
            let line = lines[i].clone();
            pass.directive(&line, &mut lines, i, interp)?;
        } else {
            pass.instruction(&lines[i])?;
        }
        i += 1;
    }

    tracing::debug!(labels = pass.labels.len(), constants = pass.constants.len(), "preprocessed");
    interp.install_program(Program { labels: pass.labels, constants: pass.constants });
    Ok(())
}

struct Pass {
    labels: HashMap<String, Label>,
    constants: HashMap<String, Value>,
    current: String,
}

impl Pass {
    fn directive(
        &mut self,
        line: &[Token],
        lines: &mut Vec<Vec<Token>>,
        index: usize,
        interp: &mut Interpreter,
    ) -> ScriptResult<()> {
        let at = line[0].line;
        let err = |msg: String| ScriptError::preprocess(at, msg);

        if line.len() >= 2 && line[1].is("pragma") {
            return self.pragma(&line[2..], lines, index, interp).map_err(|e| match e {
                ScriptError::Preprocess { .. } => e,
                other => err(format!("pragma: {other}")),
            });
        }
        if line.len() != 3 {
            return Err(err(format!(
                "invalid pre processor instruction: must have 2 arguments (got: {})",
                line.len() - 1
            )));
        }
        let (name, arg) = (&line[1], &line[2]);
        if name.is_string || !is_identifier(&name.text) {
            return Err(err("invalid pre processor instruction: expected instruction".into()));
        }

        match name.text.as_str() {
            "const" => self.constants(arg, interp).map_err(|e| err(format!("const: {e}"))),
            "bake" => bake(arg, interp).map_err(|e| err(format!("bake: {e}"))),
            label => {
                let params = match arg.is_capsule('[', ']').then(|| parse_params(arg.capsule_body())) {
                    Some(Some(params)) => params,
                    _ => {
                        return Err(err(format!(
                            "invalid pre processor instruction: no match for: {label}"
                        )))
                    }
                };
                if self.labels.contains_key(label) {
                    return Err(err(format!("can't open label twice: {label}")));
                }
                tracing::trace!(label, line = at, "open label");
                self.labels.insert(
                    label.to_owned(),
                    Label { name: label.to_owned(), params, body: Vec::new(), line: at },
                );
                self.current = label.to_owned();
                Ok(())
            }
        }
    }

    fn instruction(&mut self, line: &[Token]) -> ScriptResult<()> {
        let current = self.current.clone();
        let label = self.labels.entry(current.clone()).or_insert_with(|| Label {
            name: current.clone(),
            params: Vec::new(),
            body: Vec::new(),
            line: 0,
        });
        match line {
            [name, args] if !name.is_string && is_identifier(&name.text) && args.is_capsule('(', ')') => {
                label.body.push(Instruction {
                    name: name.text.clone(),
                    args: args.capsule_body().to_owned(),
                    line: name.line,
                });
                Ok(())
            }
            _ => {
                let text: Vec<String> = line.iter().map(Token::to_source).collect();
                Err(ScriptError::preprocess(
                    line[0].line,
                    format!("invalid instruction: {} (in label {current})", text.join(" ")),
                ))
            }
        }
    }

    /// `[ NAME = expr ... ]`, one definition per line or separated by `;`.
    fn constants(&mut self, arg: &Token, interp: &mut Interpreter) -> ScriptResult<()> {
        if arg.is_string {
            return Err(ScriptError::value("unexpected string"));
        }
        if !arg.is_capsule('[', ']') {
            return Err(ScriptError::value("expected body"));
        }
        let body = arg.capsule_body();
        let tokens = const_lexer().lex(body)?;
        let mut definitions: Vec<Vec<Token>> = Vec::new();
        for line in group_lines(tokens) {
            for part in line.split(|t| t.is(";")) {
                if !part.is_empty() {
                    definitions.push(part.to_vec());
                }
            }
        }

        for def in definitions {
            let sub_line = def[0].line;
            let fail = |msg: String| ScriptError::value(format!("line {sub_line}: {msg}"));
            match def.as_slice() {
                [name, eq, rest @ ..]
                    if !rest.is_empty() && !name.is_string && is_identifier(&name.text) && eq.is("=") =>
                {
                    let source = &body[rest[0].span.start..rest[rest.len() - 1].span.end];
                    let mut state = ExecState { constants: self.constants.clone(), ..ExecState::default() };
                    let value = expr::evaluate(source, interp, &mut state).map_err(|e| fail(e.to_string()))?;
                    tracing::trace!(constant = %name.text, value = %value, "const");
                    self.constants.insert(name.text.clone(), value);
                }
                _ => return Err(fail("invalid syntax. <name> = <expression...>".into())),
            }
        }
        Ok(())
    }

    fn pragma(
        &mut self,
        rest: &[Token],
        lines: &mut Vec<Vec<Token>>,
        index: usize,
        interp: &mut Interpreter,
    ) -> ScriptResult<()> {
        let Some(hook) = rest.first().filter(|t| !t.is_string) else {
            return Err(ScriptError::value("expected hook name"));
        };
        let f: PragmaFn = interp
            .tables
            .pragmas
            .get(&hook.text)
            .cloned()
            .ok_or_else(|| ScriptError::value(format!("no such hook: {}", hook.text)))?;
        tracing::trace!(hook = %hook.text, "pragma");
        f(&rest[1..], lines, index, interp).map_err(|e| ScriptError::value(format!("{}: {e}", hook.text)))
    }
}

fn const_lexer() -> Lexer {
    Lexer::new()
        .add_quote('"')
        .add_capsule('(', ')')
        .add_capsule('[', ']')
        .add_capsule('{', '}')
        .add_ignore(' ')
        .add_ignore('\t')
        .add_ignore('\r')
        .add_linebreak('\n')
        .add_lineskip('#')
        .add_extract('=')
        .add_extract(';')
        .verbatim_backslash()
        .erase_empty()
}

/// `"ext"` or `[ "a" "b" ... ]`.
fn bake(arg: &Token, interp: &mut Interpreter) -> ScriptResult<()> {
    let names: Vec<String> = if arg.is_string {
        vec![arg.text.clone()]
    } else if arg.is_capsule('[', ']') {
        let list = Lexer::new()
            .add_quote('"')
            .add_ignore_if(|c| c.is_whitespace() || c == ',')
            .erase_empty()
            .lex(arg.capsule_body())?;
        list.into_iter()
            .map(|t| {
                if t.is_string {
                    Ok(t.text)
                } else {
                    Err(ScriptError::value(format!("expected value: {}", t.text)))
                }
            })
            .collect::<ScriptResult<_>>()?
    } else {
        return Err(ScriptError::value("expected body"));
    };
    for name in names {
        interp
            .bake(&name)
            .map_err(|e| ScriptError::value(format!("error baking extension: {name}: {e}")))?;
    }
    Ok(())
}

/// Parameter names of a label directive, or `None` if the list is malformed.
fn parse_params(body: &str) -> Option<Vec<String>> {
    if body.trim().is_empty() {
        return Some(Vec::new());
    }
    body.split(',')
        .map(str::trim)
        .map(|p| is_identifier(p).then(|| p.to_owned()))
        .collect()
}

// ── Default pragma hooks ──────────────────────────────────────────────────────

fn add_pragma(
    t: &mut Tables,
    name: &str,
    f: impl Fn(&[Token], &mut Vec<Vec<Token>>, usize, &mut Interpreter) -> ScriptResult<()> + 'static,
) {
    t.pragmas.insert(name.to_owned(), std::rc::Rc::new(f));
}

pub fn register_pragmas(t: &mut Tables) {
    // @ pragma include "file"
    add_pragma(t, "include", |rest, lines, index, interp| {
        let [file] = rest else {
            return Err(ScriptError::arity("expected one file name"));
        };
        if !file.is_string {
            return Err(ScriptError::type_error(format!("expected String, got {}", file.text)));
        }
        let path = interp.resolve_path(&file.text);
        if !interp.mark_included(&path) {
            tracing::debug!(path = %path.display(), "already included");
            return Ok(());
        }
        let source = std::fs::read_to_string(&path)
            .map_err(|e| ScriptError::value(format!("cannot read {}: {e}", path.display())))?;
        let included = group_lines(source_lexer().lex(&source)?);
        tracing::debug!(path = %path.display(), lines = included.len(), "include");
        let at = index + 1;
        lines.splice(at..at, included);
        Ok(())
    });

    // @ pragma macro NAME replacement...
    add_pragma(t, "macro", |rest, _, _, interp| {
        let [name, replacement @ ..] = rest else {
            return Err(ScriptError::arity("expected a name"));
        };
        if name.is_string || !is_identifier(&name.text) {
            return Err(ScriptError::value(format!("invalid macro name: {}", name.text)));
        }
        if replacement.is_empty() {
            return Err(ScriptError::arity("expected replacement"));
        }
        let text: Vec<String> = replacement.iter().map(Token::to_source).collect();
        interp.add_macro(&name.text, &text.join(" "));
        Ok(())
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
