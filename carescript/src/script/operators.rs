//! Default operator table.
//!
//! | symbol        | priority | arity  |
//! |---------------|----------|--------|
//! | `$`           | -5       | unary  |
//! | `not`         | -4       | unary  |
//! | `-`           | -3       | unary  |
//! | `^`           | -2       | binary |
//! | `*` `/` `%`   | -1       | binary |
//! | `+` `-`       | 0        | binary |
//! | `more` `less` | 1        | binary |
//! | `is` `isnt`   | 2        | binary |
//! | `and`         | 3        | binary |
//! | `or`          | 4        | binary |

use crate::error::{ScriptError, ScriptResult};
use crate::script::interp::{Operator, Tables};
use crate::script::value::Value;

/// Both operands must have the same type.
pub fn same_type(symbol: &str, left: &Value, right: &Value) -> ScriptResult<()> {
    if left.same_type(right) {
        Ok(())
    } else {
        Err(ScriptError::type_error(format!(
            "{symbol}: type mismatch: {} and {}",
            left.type_name(),
            right.type_name()
        )))
    }
}

fn numbers(symbol: &str, left: &Value, right: &Value) -> ScriptResult<(f64, f64)> {
    same_type(symbol, left, right)?;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(ScriptError::type_error(format!("{symbol}: expected Number, got {}", left.type_name()))),
    }
}

fn unary_number(symbol: &str, v: &Value) -> ScriptResult<f64> {
    v.as_number().map_err(|e| ScriptError::type_error(format!("{symbol}: {e}")))
}

fn arith(
    t: &mut Tables,
    symbol: &'static str,
    priority: i32,
    f: fn(f64, f64) -> ScriptResult<f64>,
) {
    push(t, symbol, Operator::binary(priority, move |l, r, _| {
        let (a, b) = numbers(symbol, l, r)?;
        let n = f(a, b)?;
        if !n.is_finite() {
            return Err(ScriptError::value(format!("{symbol}: result is not a finite number")));
        }
        Ok(Value::Number(n))
    }));
}

fn compare(t: &mut Tables, symbol: &'static str, priority: i32, f: fn(f64, f64) -> bool) {
    push(t, symbol, Operator::binary(priority, move |l, r, _| {
        let (a, b) = numbers(symbol, l, r)?;
        Ok(Value::truth(f(a, b)))
    }));
}

fn push(t: &mut Tables, symbol: &str, op: Operator) {
    t.operators.entry(symbol.to_owned()).or_default().push(op);
}

pub fn register(t: &mut Tables) {
    push(t, "+", Operator::binary(0, |l, r, _| {
        same_type("+", l, r)?;
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => Err(ScriptError::type_error(format!(
                "+: expected Number or String, got {}",
                l.type_name()
            ))),
        }
    }));
    arith(t, "-", 0, |a, b| Ok(a - b));
    push(t, "-", Operator::unary(-3, |v, _| Ok(Value::Number(-unary_number("-", v)?))));
    arith(t, "*", -1, |a, b| Ok(a * b));
    arith(t, "/", -1, |a, b| {
        if b == 0.0 {
            return Err(ScriptError::value("/: division through 0 is not allowed"));
        }
        Ok(a / b)
    });
    arith(t, "%", -1, |a, b| {
        if b == 0.0 {
            return Err(ScriptError::value("%: division through 0 is not allowed"));
        }
        Ok(a % b)
    });
    arith(t, "^", -2, |a, b| Ok(a.powf(b)));

    push(t, "is", Operator::binary(2, |l, r, _| {
        same_type("is", l, r)?;
        Ok(Value::truth(l == r))
    }));
    push(t, "isnt", Operator::binary(2, |l, r, _| {
        same_type("isnt", l, r)?;
        Ok(Value::truth(l != r))
    }));
    compare(t, "and", 3, |a, b| a != 0.0 && b != 0.0);
    compare(t, "or", 4, |a, b| a != 0.0 || b != 0.0);
    compare(t, "more", 1, |a, b| a > b);
    compare(t, "less", 1, |a, b| a < b);

    push(t, "not", Operator::unary(-4, |v, _| Ok(Value::truth(unary_number("not", v)? == 0.0))));
    push(t, "$", Operator::unary(-5, |v, state| {
        let name = v.as_name().map_err(|e| ScriptError::type_error(format!("$: {e}")))?;
        state
            .lookup(name)
            .ok_or_else(|| ScriptError::value("$: left is not a registered variable or constant!"))
    }));
}

// ── Tests ─────────────────────────────────────────────────────────────────────
