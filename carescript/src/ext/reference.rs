//! The `Reference` value type.
//!
//! A reference names a variable in a particular scope.  It holds the scope
//! weakly, so once the scope is gone (or the variable is unset) reading or
//! writing through it fails instead of reaching a dead variable.

use std::any::Any;
use std::fmt;

use crate::error::{ScriptError, ScriptResult};
use crate::ext::Extension;
use crate::script::exec::{Scope, WeakScope};
use crate::script::interp::Builtin;
use crate::script::value::{CustomValue, Value};

pub const TYPE_NAME: &str = "Reference";

#[derive(Clone)]
pub struct Reference {
    scope: WeakScope,
    name: String,
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("name", &self.name)
            .field("live", &self.scope.upgrade().is_some())
            .finish()
    }
}

impl Reference {
    pub fn new(scope: &Scope, name: &str) -> Self {
        Reference { scope: scope.downgrade(), name: name.to_owned() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope, if it still exists and still holds the variable.
    fn target(&self) -> ScriptResult<Scope> {
        self.scope
            .upgrade()
            .filter(|scope| scope.contains(&self.name))
            .ok_or_else(|| ScriptError::value(format!("stale reference to {}", self.name)))
    }

    pub fn get(&self) -> ScriptResult<Value> {
        let scope = self.target()?;
        scope
            .get(&self.name)
            .ok_or_else(|| ScriptError::value(format!("stale reference to {}", self.name)))
    }

    pub fn set(&self, value: Value) -> ScriptResult<()> {
        self.target()?.set(&self.name, value);
        Ok(())
    }
}

impl CustomValue for Reference {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn equals(&self, other: &dyn CustomValue) -> bool {
        other
            .as_any()
            .downcast_ref::<Reference>()
            .is_some_and(|o| o.name == self.name && o.scope.ptr_eq(&self.scope))
    }

    fn printable(&self) -> String {
        format!("&{}", self.name)
    }

    fn string(&self) -> String {
        self.printable()
    }

    fn clone_value(&self) -> Box<dyn CustomValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn reference_arg(v: &Value) -> ScriptResult<&Reference> {
    v.as_ext::<Reference>(TYPE_NAME)
}

pub struct ReferenceExtension;

impl Extension for ReferenceExtension {
    fn name(&self) -> &str {
        "ref"
    }

    fn builtins(&self) -> Vec<(String, Builtin)> {
        vec![
            // ref(name): a missing variable is created as null.
            (
                "ref".into(),
                Builtin::new(Some(1), |args, _, state| {
                    let name = args[0].as_name()?;
                    if !state.variables.contains(name) {
                        state.variables.set(name, Value::Null);
                    }
                    Ok(Value::ext(Reference::new(&state.variables, name)))
                }),
            ),
            (
                "deref".into(),
                Builtin::new(Some(1), |args, _, _| reference_arg(&args[0])?.get()),
            ),
            (
                "setref".into(),
                Builtin::new(Some(2), |args, _, _| {
                    reference_arg(&args[0])?.set(args[1].clone())?;
                    Ok(Value::Null)
                }),
            ),
        ]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::Interpreter;

    fn run(src: &str) -> (ScriptResult<Value>, String) {
        let mut interp = Interpreter::new();
        let r = interp.eval(src);
        (r, interp.take_output())
    }

    #[test]
    fn read_and_write_through_reference() {
        let (r, out) = run("set(x, 1)\nset(r, ref(x))\nsetref($r, 5)\necholn($x, \" \", deref($r))");
        r.unwrap();
        assert_eq!(out, "5 5\n");
    }

    #[test]
    fn reference_into_caller_scope() {
        let src = "@ main []
set(total, 0)
call(bump, ref(total))
call(bump, ref(total))
echoln($total)
@ bump [r]
setref($r, deref($r) + 1)";
        let (r, out) = run(src);
        r.unwrap();
        assert_eq!(out, "2\n");
    }

    #[test]
    fn unset_makes_reference_stale() {
        let (r, _) = run("set(x, 1)\nset(r, ref(x))\nunset(x)\necholn(deref($r))");
        assert!(r.unwrap_err().to_string().contains("stale reference to x"));
    }

    #[test]
    fn dropped_scope_makes_reference_stale() {
        let scope = Scope::default();
        scope.set("v", Value::Number(1.0));
        let r = Reference::new(&scope, "v");
        assert_eq!(r.get().unwrap(), Value::Number(1.0));
        drop(scope);
        assert!(r.get().is_err());
        assert!(r.set(Value::Null).is_err());
    }

    #[test]
    fn ref_creates_missing_variable() {
        let (r, out) = run("set(r, ref(fresh))\necholn(typeof(deref($r)))");
        r.unwrap();
        assert_eq!(out, "Null\n");
    }
}
