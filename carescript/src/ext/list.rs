//! The `List` value type and its builtins.
//!
//! Lists are values like any other: `push` and `pop` return a new list
//! rather than editing a variable in place.

use std::any::Any;

use crate::error::{ScriptError, ScriptResult};
use crate::ext::Extension;
use crate::script::builtins::index;
use crate::script::expr;
use crate::script::interp::{type_check, Builtin, Operator, TypeCheckFn};
use crate::script::operators::same_type;
use crate::script::value::{CustomValue, Value};

pub const TYPE_NAME: &str = "List";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct List(pub Vec<Value>);

impl CustomValue for List {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn equals(&self, other: &dyn CustomValue) -> bool {
        other.as_any().downcast_ref::<List>().is_some_and(|o| o == self)
    }

    fn printable(&self) -> String {
        self.string()
    }

    fn string(&self) -> String {
        let items: Vec<String> = self.0.iter().map(Value::string).collect();
        format!("[{}]", items.join(","))
    }

    fn clone_value(&self) -> Box<dyn CustomValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn list_arg(v: &Value) -> ScriptResult<&List> {
    v.as_ext::<List>(TYPE_NAME)
}

pub struct ListExtension;

impl Extension for ListExtension {
    fn name(&self) -> &str {
        "list"
    }

    fn builtins(&self) -> Vec<(String, Builtin)> {
        vec![
            // push(list, v...)
            (
                "push".into(),
                Builtin::new(None, |args, _, _| {
                    if args.len() < 2 {
                        return Err(ScriptError::arity("requires at least 2 arguments"));
                    }
                    let mut list = list_arg(&args[0])?.clone();
                    list.0.extend(args[1..].iter().cloned());
                    Ok(Value::ext(list))
                }),
            ),
            // pop(list[, n])
            (
                "pop".into(),
                Builtin::new(None, |args, _, _| {
                    if !(1..=2).contains(&args.len()) {
                        return Err(ScriptError::arity("requires 1 or 2 arguments"));
                    }
                    let mut list = list_arg(&args[0])?.clone();
                    let count = match args.get(1) {
                        Some(n) => index(n)?,
                        None => 1,
                    };
                    if count > list.0.len() {
                        return Err(ScriptError::value("popped not existing element (size below 0)"));
                    }
                    list.0.truncate(list.0.len() - count);
                    Ok(Value::ext(list))
                }),
            ),
            (
                "list_size".into(),
                Builtin::new(Some(1), |args, _, _| Ok(Value::Number(list_arg(&args[0])?.0.len() as f64))),
            ),
        ]
    }

    fn operators(&self) -> Vec<(String, Operator)> {
        vec![(
            "+".into(),
            Operator::binary(0, |l, r, _| {
                same_type("+", l, r)?;
                let mut joined = list_arg(l)?.clone();
                joined.0.extend(list_arg(r)?.0.iter().cloned());
                Ok(Value::ext(joined))
            }),
        )]
    }

    fn type_checks(&self) -> Vec<TypeCheckFn> {
        vec![type_check(|tok, interp, state| {
            if !tok.is_capsule('[', ']') {
                return Ok(None);
            }
            let items = expr::split_arguments(tok.capsule_body())?
                .into_iter()
                .map(|item| expr::evaluate(item, interp, state))
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Some(Value::ext(List(items))))
        })]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::Interpreter;

    fn eval(expr: &str) -> ScriptResult<Value> {
        Interpreter::new().evaluate(expr)
    }

    fn list(items: &[f64]) -> Value {
        Value::ext(List(items.iter().map(|n| Value::Number(*n)).collect()))
    }

    #[test]
    fn literal_and_printing() {
        let v = eval("[1, 1 + 1, \"a\"]").unwrap();
        assert_eq!(v.type_name(), "List");
        assert_eq!(v.printable(), "[1,2,\"a\"]");
        assert_eq!(eval("[]").unwrap(), list(&[]));
    }

    #[test]
    fn push_pop_size() {
        assert_eq!(eval("push([1], 2, 3)").unwrap(), list(&[1.0, 2.0, 3.0]));
        assert_eq!(eval("pop([1, 2, 3])").unwrap(), list(&[1.0, 2.0]));
        assert_eq!(eval("pop([1, 2, 3], 3)").unwrap(), list(&[]));
        assert_eq!(eval("list_size([4, 5])").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn pop_past_the_end() {
        let err = eval("pop([1], 2)").unwrap_err();
        assert_eq!(err.to_string(), "pop: popped not existing element (size below 0)");
    }

    #[test]
    fn plus_concatenates_and_keeps_number_overload() {
        assert_eq!(eval("[1] + [2]").unwrap(), list(&[1.0, 2.0]));
        assert_eq!(eval("1 + 2").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn plus_failure_lists_every_overload() {
        let err = eval("[1] + 2").unwrap_err().to_string();
        assert!(err.starts_with("undefined operator for List and Number"), "{err}");
        assert!(err.contains("Overload 1:"));
        assert!(err.contains("Overload 2:"));
    }

    #[test]
    fn lists_compare_structurally() {
        assert_eq!(eval("[1, \"x\"] is [1, \"x\"]").unwrap(), Value::truth(true));
        assert_eq!(eval("[1] is [2]").unwrap(), Value::truth(false));
    }

    #[test]
    fn push_requires_a_list() {
        let err = eval("push(1, 2)").unwrap_err().to_string();
        assert_eq!(err, "push: expected List, got Number");
    }
}
