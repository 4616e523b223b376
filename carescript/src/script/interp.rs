//! The interpreter façade.
//!
//! [`Interpreter`] owns every mutable table (builtins, raw builtins,
//! operators, type checks, macros, pragma hooks), the preprocessed program,
//! the loaded extensions and the output channel.  Each public entry point
//! (`preprocess`, `run`, `eval`, `evaluate`) reports failure through its
//! `Result` and, once per call, through the registered error callback.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{ScriptError, ScriptResult};
use crate::ext::{Extension, ExtensionHost};
use crate::script::exec::{self, ExecState, Label};
use crate::script::lexer::Token;
use crate::script::value::Value;
use crate::script::{builtins, expr, operators, preprocess, types};

// ── Table entries ─────────────────────────────────────────────────────────────

pub type BuiltinFn = Rc<dyn Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value>>;
pub type RawBuiltinFn = Rc<dyn Fn(&str, &mut Interpreter, &mut ExecState) -> ScriptResult<Value>>;
pub type UnaryFn = Rc<dyn Fn(&Value, &mut ExecState) -> ScriptResult<Value>>;
pub type BinaryFn = Rc<dyn Fn(&Value, &Value, &mut ExecState) -> ScriptResult<Value>>;
pub type TypeCheckFn =
    Rc<dyn Fn(&Token, &mut Interpreter, &mut ExecState) -> ScriptResult<Option<Value>>>;
/// `(rest_of_directive, lines, index, interp)`.  The hook may rewrite or
/// insert entries of `lines`; lines after `index` are processed next.
pub type PragmaFn =
    Rc<dyn Fn(&[Token], &mut Vec<Vec<Token>>, usize, &mut Interpreter) -> ScriptResult<()>>;

/// Box a raw builtin.  Going through this function lets the closure's
/// argument types be inferred.
pub fn raw_builtin(
    f: impl Fn(&str, &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
) -> RawBuiltinFn {
    Rc::new(f)
}

pub fn type_check(
    f: impl Fn(&Token, &mut Interpreter, &mut ExecState) -> ScriptResult<Option<Value>> + 'static,
) -> TypeCheckFn {
    Rc::new(f)
}

pub fn pragma(
    f: impl Fn(&[Token], &mut Vec<Vec<Token>>, usize, &mut Interpreter) -> ScriptResult<()> + 'static,
) -> PragmaFn {
    Rc::new(f)
}

/// A builtin taking evaluated arguments.
#[derive(Clone)]
pub struct Builtin {
    /// `None` leaves the argument count unchecked.
    pub arg_count: Option<usize>,
    /// Control-flow builtins still run inside a dead branch (with no
    /// arguments) so they can track nesting.  Everything else is skipped.
    pub control: bool,
    pub exec: BuiltinFn,
}

impl Builtin {
    pub fn new(
        arg_count: Option<usize>,
        f: impl Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> Self {
        Builtin { arg_count, control: false, exec: Rc::new(f) }
    }

    pub fn control(
        arg_count: Option<usize>,
        f: impl Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> Self {
        Builtin { arg_count, control: true, exec: Rc::new(f) }
    }
}

#[derive(Clone)]
pub enum OperatorKind {
    Unary(UnaryFn),
    Binary(BinaryFn),
}

/// One overload of an operator symbol.  Lower priority binds tighter.
#[derive(Clone)]
pub struct Operator {
    pub priority: i32,
    pub kind: OperatorKind,
}

impl Operator {
    pub fn unary(
        priority: i32,
        f: impl Fn(&Value, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> Self {
        Operator { priority, kind: OperatorKind::Unary(Rc::new(f)) }
    }

    pub fn binary(
        priority: i32,
        f: impl Fn(&Value, &Value, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> Self {
        Operator { priority, kind: OperatorKind::Binary(Rc::new(f)) }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self.kind, OperatorKind::Unary(_))
    }
}

/// All registration tables.  Cloning is a full copy of the collections;
/// the callbacks themselves are immutable and shared.
#[derive(Clone, Default)]
pub struct Tables {
    pub builtins: HashMap<String, Builtin>,
    pub raw_builtins: HashMap<String, RawBuiltinFn>,
    pub operators: HashMap<String, Vec<Operator>>,
    pub type_checks: Vec<TypeCheckFn>,
    pub macros: HashMap<String, String>,
    pub pragmas: HashMap<String, PragmaFn>,
}

impl Tables {
    /// The compiled-in defaults every interpreter starts from.
    pub fn defaults() -> Self {
        let mut t = Tables::default();
        builtins::register(&mut t);
        operators::register(&mut t);
        types::register(&mut t);
        preprocess::register_pragmas(&mut t);
        t
    }

    pub fn is_operator(&self, symbol: &str) -> bool {
        self.operators.contains_key(symbol)
    }

    pub fn is_callable(&self, name: &str) -> bool {
        self.builtins.contains_key(name) || self.raw_builtins.contains_key(name)
    }
}

/// Output of a preprocessing pass.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub labels: HashMap<String, Label>,
    pub constants: HashMap<String, Value>,
}

struct Snapshot {
    tables: Tables,
    baked: Vec<String>,
}

/// Where `echo` and friends write.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSink {
    Capture(String),
    Stdout,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

/// One CareScript engine instance.  Not shareable across threads.
pub struct Interpreter {
    pub tables: Tables,
    labels: Rc<HashMap<String, Label>>,
    constants: HashMap<String, Value>,
    snapshots: HashMap<String, Snapshot>,
    on_error: Option<Box<dyn FnMut(&ScriptError)>>,
    last_error: String,
    output: OutputSink,
    base_dir: Option<PathBuf>,
    /// Files spliced in by `include` during the current preprocess.
    pub(crate) included: HashSet<PathBuf>,
    // Declared last: extension objects drop after the tables that reference
    // their callbacks.
    pub(crate) extensions: ExtensionHost,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Default tables plus the statically linked `list` and `ref` extensions.
    pub fn new() -> Self {
        let mut interp = Self::with_tables(Tables::defaults());
        interp.extensions.register_defaults();
        for name in ["list", "ref"] {
            if let Err(e) = interp.bake(name) {
                tracing::warn!(error = %e, "default extension failed to bake");
            }
        }
        interp
    }

    /// An interpreter over exactly `tables`, with no extensions baked.
    pub fn with_tables(tables: Tables) -> Self {
        Interpreter {
            tables,
            labels: Rc::new(HashMap::new()),
            constants: HashMap::new(),
            snapshots: HashMap::new(),
            on_error: None,
            last_error: String::new(),
            output: OutputSink::Capture(String::new()),
            base_dir: None,
            included: HashSet::new(),
            extensions: ExtensionHost::default(),
        }
    }

    /// A fresh interpreter with copies of this one's tables, extension
    /// registry and output mode, and its own program, scopes and errors.
    pub fn spawn_child(&self) -> Interpreter {
        let mut child = Interpreter::with_tables(self.tables.clone());
        child.extensions = self.extensions.fork();
        child.output = match self.output {
            OutputSink::Stdout => OutputSink::Stdout,
            OutputSink::Capture(_) => OutputSink::Capture(String::new()),
        };
        child.base_dir = self.base_dir.clone();
        child
    }

    // ── Registration ──────────────────────────────────────────────────────────

    pub fn add_builtin(
        &mut self,
        name: &str,
        arg_count: Option<usize>,
        f: impl Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> &mut Self {
        self.tables.builtins.insert(name.to_owned(), Builtin::new(arg_count, f));
        self
    }

    pub fn add_raw_builtin(
        &mut self,
        name: &str,
        f: impl Fn(&str, &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
    ) -> &mut Self {
        self.tables.raw_builtins.insert(name.to_owned(), Rc::new(f));
        self
    }

    /// Append an overload; existing overloads for `symbol` are kept.
    pub fn add_operator(&mut self, symbol: &str, op: Operator) -> &mut Self {
        self.tables.operators.entry(symbol.to_owned()).or_default().push(op);
        self
    }

    pub fn add_type_check(
        &mut self,
        f: impl Fn(&Token, &mut Interpreter, &mut ExecState) -> ScriptResult<Option<Value>> + 'static,
    ) -> &mut Self {
        self.tables.type_checks.push(Rc::new(f));
        self
    }

    pub fn add_macro(&mut self, name: &str, replacement: &str) -> &mut Self {
        self.tables.macros.insert(name.to_owned(), replacement.to_owned());
        self
    }

    pub fn add_pragma(
        &mut self,
        name: &str,
        f: impl Fn(&[Token], &mut Vec<Vec<Token>>, usize, &mut Interpreter) -> ScriptResult<()> + 'static,
    ) -> &mut Self {
        self.tables.pragmas.insert(name.to_owned(), Rc::new(f));
        self
    }

    /// Make `factory` available to `bake(name)` without a dynamic library.
    pub fn register_extension(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Extension> + 'static,
    ) -> &mut Self {
        self.extensions.registry.register(name, factory);
        self
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.extensions.native.add_search_path(dir.into());
        self
    }

    /// Directory relative paths in scripts resolve against.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        }
    }

    /// Record `path` as part of the program being preprocessed.  `false` if
    /// it was already there.
    pub(crate) fn mark_included(&mut self, path: &Path) -> bool {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.included.insert(key)
    }

    // ── Extensions ────────────────────────────────────────────────────────────

    /// Load the extension `name` from the static registry or a dynamic
    /// library and merge its tables.  Baking an id twice is a no-op.
    pub fn bake(&mut self, name: &str) -> ScriptResult<()> {
        if self.extensions.is_baked(name) {
            tracing::debug!(extension = name, "already baked");
            return Ok(());
        }
        let ext = self.extensions.locate(name, self.base_dir.as_deref())?;
        self.install(name, ext)
    }

    /// Bake an extension object constructed by the host.
    pub fn bake_extension(&mut self, ext: Box<dyn Extension>) -> ScriptResult<()> {
        let id = ext.name().to_owned();
        if self.extensions.is_baked(&id) {
            return Ok(());
        }
        self.install(&id, ext)
    }

    /// Collect everything the extension contributes, then merge.  If the
    /// extension's `poke` fails the tables are restored.
    fn install(&mut self, id: &str, ext: Box<dyn Extension>) -> ScriptResult<()> {
        let builtins = ext.builtins();
        let raw_builtins = ext.raw_builtins();
        let ops = ext.operators();
        let checks = ext.type_checks();
        let macros = ext.macros();
        let pragmas = ext.pragmas();

        tracing::debug!(
            extension = id,
            builtins = builtins.len(),
            raw_builtins = raw_builtins.len(),
            operators = ops.len(),
            type_checks = checks.len(),
            macros = macros.len(),
            pragmas = pragmas.len(),
            "baking extension"
        );

        let before = self.tables.clone();
        self.tables.builtins.extend(builtins);
        self.tables.raw_builtins.extend(raw_builtins);
        for (sym, op) in ops {
            self.tables.operators.entry(sym).or_default().push(op);
        }
        self.tables.type_checks.extend(checks);
        self.tables.macros.extend(macros);
        self.tables.pragmas.extend(pragmas);

        if let Err(e) = ext.poke(self) {
            self.tables = before;
            return Err(ScriptError::bake(id, e.to_string()));
        }
        self.extensions.mark_baked(id, ext);
        Ok(())
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    /// Store a copy of the current tables under `id`.
    pub fn save(&mut self, id: &str) -> &mut Self {
        tracing::debug!(snapshot = id, "save");
        self.snapshots.insert(
            id.to_owned(),
            Snapshot { tables: self.tables.clone(), baked: self.extensions.baked_ids() },
        );
        self
    }

    /// Restore the tables saved under `id`.
    pub fn load(&mut self, id: &str) -> ScriptResult<&mut Self> {
        let snap = self
            .snapshots
            .get(id)
            .ok_or_else(|| ScriptError::value(format!("no such snapshot: {id}")))?;
        tracing::debug!(snapshot = id, "load");
        self.tables = snap.tables.clone();
        self.extensions.set_baked_ids(snap.baked.clone());
        Ok(self)
    }

    pub fn clear_saves(&mut self) {
        self.snapshots.clear();
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Split `source` into labels, resolving directives.
    pub fn preprocess(&mut self, source: &str) -> ScriptResult<&HashMap<String, Label>> {
        self.included.clear();
        self.preprocess_source(source)
    }

    fn preprocess_source(&mut self, source: &str) -> ScriptResult<&HashMap<String, Label>> {
        let result = preprocess::preprocess(source, self);
        self.finish(result)?;
        Ok(self.labels.as_ref())
    }

    /// Preprocess a file, using its directory as the base directory.
    pub fn preprocess_file(&mut self, path: &Path) -> ScriptResult<&HashMap<String, Label>> {
        self.install_program(Program::default());
        let read = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::value(format!("cannot read {}: {e}", path.display())));
        let source = self.finish(read)?;
        if let Some(dir) = path.parent() {
            self.base_dir = Some(dir.to_path_buf());
        }
        self.included.clear();
        self.mark_included(path);
        self.preprocess_source(&source)
    }

    pub(crate) fn install_program(&mut self, program: Program) {
        self.labels = Rc::new(program.labels);
        self.constants = program.constants;
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        &self.labels
    }

    pub fn constants(&self) -> &HashMap<String, Value> {
        &self.constants
    }

    /// A new execution state over the current program.
    pub fn fresh_state(&self) -> ExecState {
        ExecState {
            labels: Rc::clone(&self.labels),
            constants: self.constants.clone(),
            base_dir: self.base_dir.clone(),
            ..ExecState::default()
        }
    }

    /// Run `label` with `args` bound to its parameters.
    pub fn run(&mut self, label: &str, args: Vec<Value>) -> ScriptResult<Value> {
        let mut state = self.fresh_state();
        let result = exec::run_label(self, &mut state, label, args);
        self.finish(result)
    }

    pub fn run_main(&mut self) -> ScriptResult<Value> {
        self.run("main", Vec::new())
    }

    /// Preprocess `source` and run its `main` label.
    pub fn eval(&mut self, source: &str) -> ScriptResult<Value> {
        self.included.clear();
        let result = preprocess::preprocess(source, self).and_then(|()| {
            let mut state = self.fresh_state();
            exec::run_label(self, &mut state, "main", Vec::new())
        });
        self.finish(result)
    }

    /// Evaluate one expression against the current constants.
    pub fn evaluate(&mut self, expression: &str) -> ScriptResult<Value> {
        let mut state = self.fresh_state();
        let result = expr::evaluate(expression, self, &mut state);
        self.finish(result)
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    /// Register the callback invoked once per failed top-level call.
    pub fn on_error(&mut self, f: impl FnMut(&ScriptError) + 'static) -> &mut Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Message of the most recent top-level failure, or `""`.
    pub fn error(&self) -> &str {
        &self.last_error
    }

    fn finish<T>(&mut self, result: ScriptResult<T>) -> ScriptResult<T> {
        match &result {
            Ok(_) => self.last_error.clear(),
            Err(e) => {
                self.last_error = e.to_string();
                if let Some(cb) = self.on_error.as_mut() {
                    cb(e);
                }
            }
        }
        result
    }

    // ── Output ────────────────────────────────────────────────────────────────

    pub fn set_output(&mut self, sink: OutputSink) -> &mut Self {
        self.output = sink;
        self
    }

    pub fn write_output(&mut self, text: &str) -> ScriptResult<()> {
        match &mut self.output {
            OutputSink::Capture(buf) => {
                buf.push_str(text);
                Ok(())
            }
            OutputSink::Stdout => write_flushed(&mut std::io::stdout().lock(), text),
        }
    }

    /// Captured output so far (empty when writing to stdout).
    pub fn output(&self) -> &str {
        match &self.output {
            OutputSink::Capture(buf) => buf,
            OutputSink::Stdout => "",
        }
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputSink::Capture(buf) => std::mem::take(buf),
            OutputSink::Stdout => String::new(),
        }
    }

    /// Write any captured output to stdout.  Used before the process exits.
    pub fn flush_output(&mut self) -> ScriptResult<()> {
        let captured = self.take_output();
        if captured.is_empty() {
            return Ok(());
        }
        write_flushed(&mut std::io::stdout().lock(), &captured)
    }
}

fn write_flushed(out: &mut impl Write, text: &str) -> ScriptResult<()> {
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| ScriptError::value(format!("cannot write output: {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_are_errors() {
        let err = write_flushed(&mut Closed, "lost").unwrap_err().to_string();
        assert!(err.starts_with("cannot write output: "), "{err}");
        let mut buf = Vec::new();
        write_flushed(&mut buf, "kept").unwrap();
        assert_eq!(buf, b"kept");
    }

    #[test]
    fn defaults_are_registered() {
        let interp = Interpreter::new();
        for name in ["set", "if", "else", "endif", "echoln", "call", "return", "push", "ref"] {
            assert!(interp.tables.builtins.contains_key(name), "missing builtin {name}");
        }
        assert!(interp.tables.is_operator("+"));
        assert_eq!(interp.tables.operators["-"].len(), 2);
        assert!(interp.tables.macros.contains_key("OSNAME"));
    }

    #[test]
    fn add_builtin_is_callable() {
        let mut interp = Interpreter::new();
        interp.add_builtin("double", Some(1), |args, _, _| {
            Ok(Value::Number(args[0].as_number()? * 2.0))
        });
        assert_eq!(interp.evaluate("double(21)").unwrap(), Value::Number(42.0));
    }

    #[test]
    fn add_operator_appends_overload() {
        let mut interp = Interpreter::new();
        let before = interp.tables.operators["+"].len();
        interp.add_operator("+", Operator::binary(0, |l, r, _| match (l, r) {
            (Value::Name(a), Value::Name(b)) => Ok(Value::Name(format!("{a}{b}"))),
            _ => Err(ScriptError::type_error("names only")),
        }));
        assert_eq!(interp.tables.operators["+"].len(), before + 1);
        assert_eq!(interp.evaluate("1 + 2").unwrap(), Value::Number(3.0));
        assert_eq!(interp.evaluate("ab + cd").unwrap(), Value::Name("abcd".into()));
    }

    #[test]
    fn save_and_load_restore_tables() {
        let mut interp = Interpreter::new();
        interp.save("clean");
        interp.add_macro("ANSWER", "42");
        assert_eq!(interp.evaluate("ANSWER").unwrap(), Value::Number(42.0));
        interp.load("clean").unwrap();
        assert!(!interp.tables.macros.contains_key("ANSWER"));
        assert!(interp.load("missing").is_err());
    }

    #[test]
    fn error_callback_fires_once_per_call() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        let mut interp = Interpreter::new();
        interp.on_error(move |e| sink.borrow_mut().push(e.to_string()));
        assert!(interp.eval("echoln(1 / 0)").is_err());
        assert_eq!(hits.borrow().len(), 1);
        assert!(interp.error().contains("division"));
        interp.eval("echoln(1)").unwrap();
        assert_eq!(hits.borrow().len(), 1);
        assert_eq!(interp.error(), "");
    }

    #[test]
    fn captured_output_can_be_taken() {
        let mut interp = Interpreter::new();
        interp.eval("echo(\"a\")\necholn(\"b\")").unwrap();
        assert_eq!(interp.take_output(), "ab\n");
        assert_eq!(interp.output(), "");
    }

    #[test]
    fn spawn_child_copies_tables_not_program() {
        let mut interp = Interpreter::new();
        interp.add_macro("X", "1");
        interp.preprocess("@ main []\necholn(1)").unwrap();
        let child = interp.spawn_child();
        assert!(child.tables.macros.contains_key("X"));
        assert!(child.labels().is_empty());
    }
}
