//! Execution state and the per-label instruction loop.
//!
//! A label body is a flat list of [`Instruction`]s.  The loop reads the
//! program counter afresh on every iteration, so a builtin that rewrites
//! [`ExecState::pc`] causes an immediate jump.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use crate::error::{ScriptError, ScriptResult};
use crate::script::expr;
use crate::script::interp::{Builtin, Interpreter};
use crate::script::value::Value;

// ── Program ───────────────────────────────────────────────────────────────────

/// One `name(args)` line of a label body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub name: String,
    /// Argument text with the surrounding parentheses removed.
    pub args: String,
    /// Physical source line.
    pub line: usize,
}

/// A named, callable script body.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Instruction>,
    /// Line of the label directive; 0 for the implicit `main`.
    pub line: usize,
}

// ── Variables ─────────────────────────────────────────────────────────────────

/// A variable scope.  Shared ownership lets references hold a weak handle
/// that fails cleanly once the scope is gone.
#[derive(Debug, Clone, Default)]
pub struct Scope(Rc<RefCell<HashMap<String, Value>>>);

/// Non-owning handle to a [`Scope`].
#[derive(Debug, Clone)]
pub struct WeakScope(Weak<RefCell<HashMap<String, Value>>>);

impl Scope {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.borrow_mut().insert(name.to_owned(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.0))
    }
}

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(Scope)
    }

    pub fn ptr_eq(&self, other: &WeakScope) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Everything a running label reads and mutates.
#[derive(Debug, Default)]
pub struct ExecState {
    /// Labels currently executing, innermost last.
    pub label_stack: Vec<String>,
    /// 1-based index of the current instruction in the current label.
    pub pc: usize,
    pub variables: Scope,
    pub constants: HashMap<String, Value>,
    pub labels: Rc<HashMap<String, Label>>,
    /// One entry per open `if`; `true` while its branch is live.
    pub should_run: Vec<bool>,
    /// `if`s opened inside a dead branch, whose `endif`s must be skipped.
    pub ignore_endifs: usize,
    pub return_value: Value,
    pub exit: bool,
    pub base_dir: Option<PathBuf>,
    /// Evaluations currently running on macro-expanded text.
    pub macro_depth: usize,
}

impl ExecState {
    /// A state for a nested label call: same constants, labels and base
    /// directory, nothing else.
    pub fn child(&self) -> ExecState {
        ExecState {
            constants: self.constants.clone(),
            labels: Rc::clone(&self.labels),
            base_dir: self.base_dir.clone(),
            ..ExecState::default()
        }
    }

    /// `false` while inside the dead side of a conditional.
    pub fn is_live(&self) -> bool {
        self.ignore_endifs == 0 && self.should_run.last().copied().unwrap_or(true)
    }

    pub fn current_label(&self) -> Option<&Label> {
        self.label_stack.last().and_then(|name| self.labels.get(name))
    }

    /// Continue execution at local line `target` (1-based).
    pub fn jump(&mut self, target: usize) -> ScriptResult<()> {
        let len = self.current_label().map_or(0, |l| l.body.len());
        if target == 0 || target > len + 1 {
            return Err(ScriptError::value(format!("line {target} is outside the label (1..={len})")));
        }
        // The loop advances the counter after the current instruction.
        self.pc = target - 1;
        Ok(())
    }

    /// Variable first, then constant.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.variables.get(name).or_else(|| self.constants.get(name).cloned())
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Run `name` in `state`, binding `args` to its parameters, and yield the
/// label's return value.
pub fn run_label(
    interp: &mut Interpreter,
    state: &mut ExecState,
    name: &str,
    args: Vec<Value>,
) -> ScriptResult<Value> {
    let labels = Rc::clone(&state.labels);
    let label = labels
        .get(name)
        .ok_or_else(|| ScriptError::value(format!("no such label {name}")))?;
    if args.len() < label.params.len() {
        return Err(ScriptError::arity("too few arguments"));
    }
    if args.len() > label.params.len() {
        return Err(ScriptError::arity("too many arguments"));
    }
    for (param, value) in label.params.iter().zip(args) {
        state.variables.set(param, value);
    }

    tracing::debug!(label = name, depth = state.label_stack.len(), "enter label");
    state.label_stack.push(name.to_owned());
    let saved_pc = std::mem::replace(&mut state.pc, 1);
    let result = execute_body(interp, state, label);
    state.pc = saved_pc;
    state.label_stack.pop();
    result?;
    Ok(state.return_value.clone())
}

fn execute_body(interp: &mut Interpreter, state: &mut ExecState, label: &Label) -> ScriptResult<()> {
    while !state.exit {
        let Some(instr) = state.pc.checked_sub(1).and_then(|i| label.body.get(i)) else {
            break;
        };
        let line = instr.line;
        tracing::trace!(label = %label.name, line, instruction = %instr.name, "step");
        if !interp.tables.is_callable(&instr.name) {
            let err = ScriptError::value(format!("unknown function: {}", instr.name));
            return Err(err.at(line, None, &label.name));
        }
        execute_instruction(interp, state, &instr.name, &instr.args)
            .map_err(|e| e.at(line, Some(&instr.name), &label.name))?;
        state.pc += 1;
    }
    Ok(())
}

fn execute_instruction(
    interp: &mut Interpreter,
    state: &mut ExecState,
    name: &str,
    args: &str,
) -> ScriptResult<Value> {
    if let Some(raw) = interp.tables.raw_builtins.get(name).cloned() {
        return raw(args, interp, state);
    }
    let Some(builtin) = interp.tables.builtins.get(name).cloned() else {
        return Err(ScriptError::value(format!("unknown function: {name}")));
    };
    if !state.is_live() {
        // Dead branch: only control builtins run, and without evaluating
        // their arguments.
        return if builtin.control { (builtin.exec)(&[], interp, state) } else { Ok(Value::Null) };
    }
    let values = expr::evaluate_arguments(args, interp, state)?;
    call_builtin(&builtin, &values, interp, state)
}

/// Check the argument count and invoke `builtin`.
pub fn call_builtin(
    builtin: &Builtin,
    args: &[Value],
    interp: &mut Interpreter,
    state: &mut ExecState,
) -> ScriptResult<Value> {
    if let Some(n) = builtin.arg_count {
        if args.len() != n {
            return Err(ScriptError::arity(format!(
                "expected {n} argument{}, got {}",
                if n == 1 { "" } else { "s" },
                args.len()
            )));
        }
    }
    (builtin.exec)(args, interp, state)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str, params: &[&str], body: &[(&str, &str)], line: usize) -> Label {
        Label {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            body: body
                .iter()
                .enumerate()
                .map(|(i, (n, a))| Instruction { name: n.to_string(), args: a.to_string(), line: line + i + 1 })
                .collect(),
            line,
        }
    }

    fn state_with(labels: Vec<Label>) -> ExecState {
        ExecState {
            labels: Rc::new(labels.into_iter().map(|l| (l.name.clone(), l)).collect()),
            ..ExecState::default()
        }
    }

    #[test]
    fn runs_instructions_in_order() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label(
            "main",
            &[],
            &[("set", "x, 5"), ("echoln", "$x")],
            0,
        )]);
        let ret = run_label(&mut interp, &mut state, "main", vec![]).unwrap();
        assert_eq!(ret, Value::Null);
        assert_eq!(interp.output(), "5\n");
    }

    #[test]
    fn binds_parameters() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label("greet", &["who"], &[("echoln", "\"hi \" + $who")], 3)]);
        run_label(&mut interp, &mut state, "greet", vec![Value::String("bob".into())]).unwrap();
        assert_eq!(interp.output(), "hi bob\n");
    }

    #[test]
    fn arity_errors_are_distinct() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label("f", &["a"], &[], 0)]);
        let few = run_label(&mut interp, &mut state, "f", vec![]).unwrap_err();
        let many = run_label(&mut interp, &mut state, "f", vec![Value::Null, Value::Null]).unwrap_err();
        assert_eq!(few.to_string(), "too few arguments");
        assert_eq!(many.to_string(), "too many arguments");
    }

    #[test]
    fn unknown_function_uses_global_line() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label("main", &[], &[("echo", "1"), ("frob", "")], 4)]);
        let err = run_label(&mut interp, &mut state, "main", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "line 6: unknown function: frob (in label main)");
    }

    #[test]
    fn builtin_errors_carry_name_and_label() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label("main", &[], &[("set", "1, 2")], 0)]);
        let err = run_label(&mut interp, &mut state, "main", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "line 1: set: expected Name, got Number (in label main)");
    }

    #[test]
    fn arity_checked_before_invocation() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label("main", &[], &[("set", "x")], 0)]);
        let err = run_label(&mut interp, &mut state, "main", vec![]).unwrap_err();
        assert!(err.to_string().contains("expected 2 arguments, got 1"));
    }

    #[test]
    fn return_stops_the_label() {
        let mut interp = Interpreter::new();
        let mut state = state_with(vec![label(
            "main",
            &[],
            &[("return", "7"), ("echoln", "\"unreachable\"")],
            0,
        )]);
        let ret = run_label(&mut interp, &mut state, "main", vec![]).unwrap();
        assert_eq!(ret, Value::Number(7.0));
        assert_eq!(interp.output(), "");
    }

    #[test]
    fn builtin_can_move_the_counter() {
        let mut interp = Interpreter::new();
        interp.add_builtin("skip_next", Some(0), |_, _, state| {
            state.pc += 1;
            Ok(Value::Null)
        });
        let mut state = state_with(vec![label(
            "main",
            &[],
            &[("skip_next", ""), ("echo", "\"a\""), ("echo", "\"b\"")],
            0,
        )]);
        run_label(&mut interp, &mut state, "main", vec![]).unwrap();
        assert_eq!(interp.output(), "b");
    }

    #[test]
    fn jump_stays_inside_the_label() {
        let mut state = state_with(vec![label("f", &[], &[("echo", "1")], 10)]);
        state.label_stack.push("f".into());
        assert!(state.jump(5).is_err());
        state.jump(1).unwrap();
        assert_eq!(state.pc, 0);
    }

    #[test]
    fn child_state_inherits_constants_only() {
        let mut state = ExecState::default();
        state.constants.insert("C".into(), Value::Number(1.0));
        state.variables.set("v", Value::Number(2.0));
        let child = state.child();
        assert_eq!(child.lookup("C"), Some(Value::Number(1.0)));
        assert_eq!(child.lookup("v"), None);
    }

    #[test]
    fn weak_scope_goes_stale() {
        let scope = Scope::default();
        scope.set("x", Value::Null);
        let weak = scope.downgrade();
        assert!(weak.upgrade().is_some());
        drop(scope);
        assert!(weak.upgrade().is_none());
    }
}
