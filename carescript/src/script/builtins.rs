//! Default builtins.
//!
//! Every builtin receives its evaluated arguments plus mutable access to the
//! interpreter and the running [`ExecState`].  Arity is checked by the engine
//! for builtins registered with a fixed count; variadic ones check here.
//!
//! Inside a dead conditional branch the engine only invokes builtins marked
//! as control flow (`if`, `else`, `endif`), so the rest need no liveness
//! checks of their own.  Raw builtins always run and check for themselves.

use std::io::BufRead;
use std::path::Path;
use std::rc::Rc;

use crate::error::{ScriptError, ScriptResult};
use crate::script::exec::{self, ExecState};
use crate::script::expr;
use crate::script::interp::{Builtin, Interpreter, Tables};
use crate::script::value::Value;

fn add(
    t: &mut Tables,
    name: &str,
    arg_count: Option<usize>,
    f: impl Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
) {
    t.builtins.insert(name.to_owned(), Builtin::new(arg_count, f));
}

fn add_control(
    t: &mut Tables,
    name: &str,
    arg_count: Option<usize>,
    f: impl Fn(&[Value], &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
) {
    t.builtins.insert(name.to_owned(), Builtin::control(arg_count, f));
}

fn add_raw(
    t: &mut Tables,
    name: &str,
    f: impl Fn(&str, &mut Interpreter, &mut ExecState) -> ScriptResult<Value> + 'static,
) {
    t.raw_builtins.insert(name.to_owned(), Rc::new(f));
}

fn min_args(args: &[Value], n: usize) -> ScriptResult<()> {
    if args.len() < n {
        let plural = if n == 1 { "" } else { "s" };
        return Err(ScriptError::arity(format!("requires at least {n} argument{plural}")));
    }
    Ok(())
}

fn exact_args(args: &[Value], n: usize) -> ScriptResult<()> {
    if args.len() != n {
        return Err(ScriptError::arity(format!("requires {n} arguments")));
    }
    Ok(())
}

/// A non-negative whole number usable as an index or count.
pub fn index(v: &Value) -> ScriptResult<usize> {
    let n = v.as_number()?;
    if n < 0.0 {
        return Err(ScriptError::value("index underflow"));
    }
    if n.fract() != 0.0 || n >= usize::MAX as f64 {
        return Err(ScriptError::value(format!("index must be a whole number, got {}", v.printable())));
    }
    Ok(n as usize)
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> ScriptError {
    ScriptError::value(format!("cannot {what} {}: {e}", path.display()))
}

pub fn register(t: &mut Tables) {
    // ── Variables ─────────────────────────────────────────────────────────────
    add(t, "set", Some(2), |args, _, state| {
        let name = args[0].as_name()?;
        if matches!(args[1], Value::Name(_)) {
            return Err(ScriptError::type_error("value must not be a Name (did you mean $name?)"));
        }
        state.variables.set(name, args[1].clone());
        Ok(Value::Null)
    });
    add(t, "unset", Some(1), |args, _, state| {
        let name = args[0].as_name()?;
        state
            .variables
            .remove(name)
            .map(|_| Value::Null)
            .ok_or_else(|| ScriptError::value(format!("no such variable: {name}")))
    });

    // ── Control flow ──────────────────────────────────────────────────────────
    add_control(t, "if", Some(1), |args, _, state| {
        if !state.is_live() {
            state.ignore_endifs += 1;
            return Ok(Value::Null);
        }
        let cond = args.first().map(Value::is_truthy).transpose()?.unwrap_or(false);
        state.should_run.push(cond);
        Ok(Value::Null)
    });
    add_control(t, "else", Some(0), |_, _, state| {
        if state.ignore_endifs > 0 {
            return Ok(Value::Null);
        }
        let top = state.should_run.last_mut().ok_or_else(|| ScriptError::value("no if"))?;
        *top = !*top;
        Ok(Value::Null)
    });
    add_control(t, "endif", Some(0), |_, _, state| {
        if state.ignore_endifs > 0 {
            state.ignore_endifs -= 1;
            return Ok(Value::Null);
        }
        state.should_run.pop().ok_or_else(|| ScriptError::value("no if"))?;
        Ok(Value::Null)
    });
    add(t, "goto", Some(1), |args, _, state| {
        state.jump(index(&args[0])?)?;
        Ok(Value::Null)
    });
    add(t, "call", None, |args, interp, state| {
        min_args(args, 1)?;
        let name = args[0].as_ident()?;
        let mut callee = state.child();
        exec::run_label(interp, &mut callee, name, args[1..].to_vec())
    });
    add(t, "return", Some(1), |args, _, state| {
        state.return_value = args[0].clone();
        state.exit = true;
        Ok(Value::Null)
    });
    add(t, "exec", None, |args, interp, _| {
        min_args(args, 2)?;
        let path = interp.resolve_path(args[0].as_str()?);
        let label = args[1].as_ident()?.to_owned();
        let source = std::fs::read_to_string(&path).map_err(|e| io_error("read", &path, e))?;
        let mut child = interp.spawn_child();
        if let Some(dir) = path.parent() {
            child.set_base_dir(dir);
        }
        let result = child
            .preprocess(&source)
            .map(|_| ())
            .and_then(|()| child.run(&label, args[2..].to_vec()));
        let out = child.take_output();
        interp.write_output(&out)?;
        result.map_err(|e| ScriptError::Nested(e.to_string()))
    });
    add(t, "exit", Some(1), |args, interp, _| {
        let code = args[0].as_number()? as i32;
        if let Err(e) = interp.flush_output() {
            tracing::warn!(error = %e, "output lost on exit");
        }
        std::process::exit(code)
    });

    // ── I/O ───────────────────────────────────────────────────────────────────
    add(t, "echo", None, |args, interp, _| {
        let text: String = args.iter().map(Value::printable).collect();
        interp.write_output(&text)?;
        Ok(Value::Null)
    });
    add(t, "echoln", None, |args, interp, _| {
        let mut text: String = args.iter().map(Value::printable).collect();
        text.push('\n');
        interp.write_output(&text)?;
        Ok(Value::Null)
    });
    add(t, "input", Some(1), |args, interp, _| {
        let prompt = args[0].as_str()?.to_owned();
        interp.flush_output()?;
        interp.write_output(&prompt)?;
        interp.flush_output()?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ScriptError::value(format!("cannot read input: {e}")))?;
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Value::String(line))
    });
    add(t, "read", Some(1), |args, interp, _| {
        let path = interp.resolve_path(args[0].as_str()?);
        std::fs::read_to_string(&path)
            .map(Value::String)
            .map_err(|e| io_error("read", &path, e))
    });
    add(t, "write", Some(2), |args, interp, _| {
        let path = interp.resolve_path(args[0].as_str()?);
        std::fs::write(&path, args[1].as_str()?).map_err(|e| io_error("write", &path, e))?;
        Ok(Value::Null)
    });
    add(t, "exists", Some(2), |args, interp, state| {
        let kind = args[0].as_name()?;
        let what = args[1].as_str()?;
        let found = match kind {
            "FILE" => interp.resolve_path(what).is_file(),
            "DIRECTORY" => interp.resolve_path(what).is_dir(),
            "VARIABLE" => state.variables.contains(what),
            other => return Err(ScriptError::value(format!("unknown enum: {other}"))),
        };
        Ok(Value::truth(found))
    });
    add(t, "system", Some(1), |args, interp, _| {
        let cmd = args[0].as_str()?;
        interp.flush_output()?;
        let status = shell(cmd).map_err(|e| ScriptError::value(format!("cannot run {cmd:?}: {e}")))?;
        Ok(Value::Number(status.code().map_or(-1.0, f64::from)))
    });
    add(t, "beep", Some(2), |args, _, _| {
        args[0].as_number()?;
        args[1].as_number()?;
        eprint!("\x07");
        Ok(Value::Null)
    });

    // ── Conversions ───────────────────────────────────────────────────────────
    add(t, "to_number", Some(1), |args, _, _| match &args[0] {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(|| ScriptError::value(format!("invalid input: \"{s}\""))),
        other => Err(ScriptError::type_error(format!("expected Number or String, got {}", other.type_name()))),
    });
    add(t, "to_string", Some(1), |args, _, _| match &args[0] {
        Value::String(s) => Ok(Value::String(s.clone())),
        other => Ok(Value::String(other.printable())),
    });
    add(t, "typeof", Some(1), |args, _, _| Ok(Value::String(args[0].type_name().to_owned())));

    // ── Strings ───────────────────────────────────────────────────────────────
    add(t, "strmod", None, strmod);

    // ── Extensions ────────────────────────────────────────────────────────────
    add(t, "bake", Some(1), |args, interp, _| {
        interp.bake(args[0].as_str()?)?;
        Ok(Value::truth(true))
    });

    // ── Raw builtins ──────────────────────────────────────────────────────────
    add_raw(t, "assert", |text, interp, state| {
        if !state.is_live() {
            return Ok(Value::Null);
        }
        let v = expr::evaluate(text, interp, state)?;
        if v == Value::truth(true) {
            Ok(Value::Null)
        } else {
            Err(ScriptError::value(format!("assertion failed: {}", text.trim())))
        }
    });
    add_raw(t, "ifdef", |text, interp, state| {
        if !state.is_live() {
            state.ignore_endifs += 1;
            return Ok(Value::Null);
        }
        let name = text.trim();
        let defined = interp.tables.macros.contains_key(name) || state.lookup(name).is_some();
        state.should_run.push(defined);
        Ok(Value::Null)
    });
}

#[cfg(unix)]
fn shell(cmd: &str) -> std::io::Result<std::process::ExitStatus> {
    std::process::Command::new("sh").arg("-c").arg(cmd).status()
}

#[cfg(not(unix))]
fn shell(cmd: &str) -> std::io::Result<std::process::ExitStatus> {
    std::process::Command::new("cmd").arg("/C").arg(cmd).status()
}

/// `strmod(OP, var, ...)`: inspect or edit the String held by variable `var`.
fn strmod(args: &[Value], _: &mut Interpreter, state: &mut ExecState) -> ScriptResult<Value> {
    min_args(args, 2)?;
    let op = args[0].as_name()?;
    let var = args[1].as_name()?;
    let current = state
        .variables
        .get(var)
        .ok_or_else(|| ScriptError::value(format!("no such variable: {var}")))?;
    let Value::String(text) = current else {
        return Err(ScriptError::type_error("requires string variable"));
    };
    let mut chars: Vec<char> = text.chars().collect();

    let bounded = |v: &Value, len: usize, inclusive: bool| -> ScriptResult<usize> {
        let i = index(v)?;
        if i > len || (!inclusive && i == len) {
            return Err(ScriptError::value("index overflow"));
        }
        Ok(i)
    };
    let non_empty = |chars: &[char]| {
        if chars.is_empty() {
            Err(ScriptError::value("string empty"))
        } else {
            Ok(())
        }
    };

    match op {
        "ERASE" => {
            exact_args(args, 3)?;
            non_empty(&chars)?;
            let i = bounded(&args[2], chars.len(), false)?;
            chars.remove(i);
        }
        "INSERT" => {
            exact_args(args, 4)?;
            let i = bounded(&args[2], chars.len(), true)?;
            let insert = args[3].as_str()?;
            chars.splice(i..i, insert.chars());
        }
        "PUT" => {
            exact_args(args, 4)?;
            non_empty(&chars)?;
            let i = bounded(&args[2], chars.len(), false)?;
            let put = args[3].as_str()?;
            chars.splice(i..=i, put.chars());
        }
        "BACK" => {
            exact_args(args, 2)?;
            non_empty(&chars)?;
            return Ok(Value::String(chars[chars.len() - 1].to_string()));
        }
        "SIZE" => {
            exact_args(args, 2)?;
            return Ok(Value::Number(chars.len() as f64));
        }
        "AT" => {
            exact_args(args, 3)?;
            non_empty(&chars)?;
            let i = bounded(&args[2], chars.len(), false)?;
            return Ok(Value::String(chars[i].to_string()));
        }
        "SUBSTR" => {
            exact_args(args, 4)?;
            let a = bounded(&args[2], chars.len(), true)?;
            let b = bounded(&args[3], chars.len(), true)?;
            let (from, to) = if a <= b { (a, b) } else { (b, a) };
            return Ok(Value::String(chars[from..to].iter().collect()));
        }
        other => return Err(ScriptError::value(format!("unknown enum: {other}"))),
    }

    state.variables.set(var, Value::String(chars.into_iter().collect()));
    Ok(Value::Null)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> (ScriptResult<Value>, String) {
        let mut interp = Interpreter::new();
        let r = interp.eval(src);
        (r, interp.take_output())
    }

    fn output(src: &str) -> String {
        let (r, out) = run(src);
        r.unwrap_or_else(|e| panic!("{src}: {e}"));
        out
    }

    fn error(src: &str) -> String {
        run(src).0.unwrap_err().to_string()
    }

    #[test]
    fn set_and_echo() {
        assert_eq!(output("set(x, 5)\necholn($x)"), "5\n");
        assert_eq!(output("echo(1, \"a\", null)"), "1anull");
    }

    #[test]
    fn indices_are_whole_numbers() {
        assert_eq!(index(&Value::Number(3.0)).unwrap(), 3);
        assert!(index(&Value::Number(-1.0)).unwrap_err().to_string().contains("underflow"));
        let err = index(&Value::Number(1.5)).unwrap_err().to_string();
        assert_eq!(err, "index must be a whole number, got 1.5");
        assert!(index(&Value::Number(1e300)).is_err());
        assert!(error("goto(2.5)").contains("index must be a whole number"));
    }

    #[test]
    fn set_rejects_names() {
        assert!(error("set(x, y)").contains("must not be a Name"));
    }

    #[test]
    fn unset_removes() {
        assert!(error("set(x, 1)\nunset(x)\necholn($x)").contains("not a registered variable"));
        assert!(error("unset(x)").contains("no such variable: x"));
    }

    #[test]
    fn if_else_endif() {
        let src = "if(0)\necholn(\"no\")\nelse()\necholn(\"yes\")\nendif()";
        assert_eq!(output(src), "yes\n");
    }

    #[test]
    fn nested_dead_branch_skips_inner_if() {
        let src = "if(0)\nif(1)\necholn(\"a\")\nelse()\necholn(\"b\")\nendif()\nendif()\necholn(\"c\")";
        assert_eq!(output(src), "c\n");
    }

    #[test]
    fn dead_branch_does_not_evaluate_arguments() {
        assert_eq!(output("if(0)\necholn($undefined)\nendif()"), "");
    }

    #[test]
    fn stray_else_and_endif() {
        assert_eq!(error("else()"), "line 1: else: no if (in label main)");
        assert_eq!(error("endif()"), "line 1: endif: no if (in label main)");
    }

    #[test]
    fn goto_jumps() {
        let src = "set(i, 0)\nset(i, $i + 1)\nif($i less 3)\ngoto(2)\nendif()\necholn($i)";
        // Each jump leaves one `if` open; the final pass closes only its own.
        let (r, out) = run(src);
        r.unwrap();
        assert_eq!(out, "3\n");
    }

    #[test]
    fn conversions() {
        assert_eq!(output("echoln(to_number(\" 2.5 \") * 2)"), "5\n");
        assert!(error("to_number(\"abc\")").contains("invalid input: \"abc\""));
        assert!(error("to_number(\"nan\")").contains("invalid input: \"nan\""));
        assert!(error("to_number(\"inf\")").contains("invalid input"));
        assert!(error("to_number(\"1e999\")").contains("invalid input"));
        assert_eq!(output("echoln(to_string(3) + \"!\")"), "3!\n");
        assert_eq!(output("echoln(typeof(null), typeof(x))"), "NullName\n");
    }

    #[test]
    fn strmod_operations() {
        let src = "set(s, \"hello\")
strmod(ERASE, s, 0)
echoln($s)
strmod(INSERT, s, 0, \"j\")
echoln($s)
strmod(PUT, s, 4, \"y\")
echoln($s)
echoln(strmod(SIZE, s), strmod(AT, s, 1), strmod(BACK, s))
echoln(strmod(SUBSTR, s, 3, 1))";
        assert_eq!(output(src), "ello\njello\njelly\n5ey\nel\n");
    }

    #[test]
    fn strmod_errors() {
        assert!(error("set(s, \"ab\")\nstrmod(AT, s, 2)").contains("index overflow"));
        assert!(error("set(s, \"ab\")\nstrmod(AT, s, -1)").contains("index underflow"));
        assert!(error("set(s, 1)\nstrmod(SIZE, s)").contains("requires string variable"));
        assert!(error("set(s, \"\")\nstrmod(BACK, s)").contains("string empty"));
        assert!(error("set(s, \"a\")\nstrmod(FOO, s)").contains("unknown enum: FOO"));
    }

    #[test]
    fn exists_kinds() {
        assert_eq!(output("set(v, 1)\necholn(exists(VARIABLE, \"v\"), exists(VARIABLE, \"w\"))"), "10\n");
        assert!(error("exists(SOCKET, \"x\")").contains("unknown enum"));
    }

    #[test]
    fn files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let p = path.display().to_string().replace('\\', "\\\\");
        let src = format!("write(\"{p}\", \"data\")\necholn(read(\"{p}\"), exists(FILE, \"{p}\"))");
        assert_eq!(output(&src), "data1\n");
    }

    #[test]
    fn assert_reports_source() {
        assert_eq!(output("assert(1 + 1 is 2)"), "");
        assert_eq!(error("assert(1 is 2)"), "line 1: assert: assertion failed: 1 is 2 (in label main)");
    }

    #[test]
    fn ifdef_checks_macros_and_variables() {
        assert_eq!(output("ifdef(OSNAME)\necholn(\"os\")\nendif()"), "os\n");
        assert_eq!(output("ifdef(nothing)\necholn(\"x\")\nelse()\necholn(\"y\")\nendif()"), "y\n");
    }

    #[test]
    #[cfg(unix)]
    fn system_returns_status() {
        assert_eq!(output("echoln(system(\"exit 3\"))"), "3\n");
    }
}
