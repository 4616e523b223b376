//! Optional Lua 5.4 extension via the `mlua` crate.
//!
//! Enabled with the `lua` Cargo feature:
//! ```text
//! cargo build --features lua
//! cargo test  --features lua
//! ```
//!
//! The host owns the Lua state and bakes the extension explicitly:
//!
//! ```ignore
//! let mut interp = Interpreter::new();
//! interp.bake_extension(Box::new(LuaExtension::new(mlua::Lua::new())))?;
//! ```
//!
//! # Builtins
//!
//! | Builtin                      | Effect                                         |
//! |------------------------------|------------------------------------------------|
//! | `call_lua_script(path)`      | Run a Lua file, yield its first result         |
//! | `call_lua(function, args…)`  | Call a global Lua function, yield first result |
//!
//! Results convert as: string → String, number → Number, boolean → 1/0,
//! nil or nothing → null.  Other Lua types are an error.

#[cfg(feature = "lua")]
pub use lua_impl::LuaExtension;

#[cfg(feature = "lua")]
mod lua_impl {
    use std::rc::Rc;

    use mlua::prelude::*;

    use crate::error::{ScriptError, ScriptResult};
    use crate::ext::Extension;
    use crate::script::interp::Builtin;
    use crate::script::value::Value;

    // ── Conversions ───────────────────────────────────────────────────────

    fn lua_error(context: &str, e: LuaError) -> ScriptError {
        ScriptError::value(format!("{context}: {e}"))
    }

    pub(super) fn from_lua(value: LuaValue) -> ScriptResult<Value> {
        match value {
            LuaValue::Nil => Ok(Value::Null),
            LuaValue::Boolean(b) => Ok(Value::truth(b)),
            LuaValue::Integer(i) => Ok(Value::Number(i as f64)),
            LuaValue::Number(f) if f.is_finite() => Ok(Value::Number(f)),
            LuaValue::Number(_) => Err(ScriptError::value("Lua returned a non-finite number")),
            LuaValue::String(s) => Ok(Value::String(s.to_string_lossy().to_string())),
            other => Err(ScriptError::type_error(format!(
                "unsupported Lua result type: {}",
                other.type_name()
            ))),
        }
    }

    pub(super) fn to_lua(lua: &Lua, value: &Value) -> ScriptResult<LuaValue> {
        Ok(match value {
            Value::Null => LuaValue::Nil,
            Value::Number(n) => LuaValue::Number(*n),
            Value::String(s) | Value::Name(s) => LuaValue::String(
                lua.create_string(s).map_err(|e| lua_error("call_lua", e))?,
            ),
            other => {
                return Err(ScriptError::type_error(format!(
                    "cannot pass {} to Lua",
                    other.type_name()
                )))
            }
        })
    }

    fn first_result(values: LuaMultiValue) -> ScriptResult<Value> {
        values.into_iter().next().map_or(Ok(Value::Null), from_lua)
    }

    // ── LuaExtension ──────────────────────────────────────────────────────

    /// Lua builtins over one shared Lua state.
    pub struct LuaExtension {
        lua: Rc<Lua>,
    }

    impl LuaExtension {
        pub fn new(lua: Lua) -> Self {
            Self { lua: Rc::new(lua) }
        }

        pub fn lua(&self) -> &Lua {
            &self.lua
        }
    }

    impl Extension for LuaExtension {
        fn name(&self) -> &str {
            "lua"
        }

        fn builtins(&self) -> Vec<(String, Builtin)> {
            let script_lua = Rc::clone(&self.lua);
            let call_lua = Rc::clone(&self.lua);
            vec![
                (
                    "call_lua_script".into(),
                    Builtin::new(Some(1), move |args, interp, _| {
                        let path = interp.resolve_path(args[0].as_str()?);
                        tracing::debug!(path = %path.display(), "running Lua script");
                        let values: LuaMultiValue = script_lua
                            .load(path.as_path())
                            .eval()
                            .map_err(|e| lua_error("error running script", e))?;
                        first_result(values)
                    }),
                ),
                (
                    "call_lua".into(),
                    Builtin::new(None, move |args, _, _| {
                        let Some(name) = args.first() else {
                            return Err(ScriptError::arity("requires at least one argument"));
                        };
                        let name = name.as_ident()?;
                        let func: LuaFunction = call_lua
                            .globals()
                            .get(name)
                            .map_err(|e| lua_error(name, e))?;
                        let lua_args = args[1..]
                            .iter()
                            .map(|v| to_lua(&call_lua, v))
                            .collect::<ScriptResult<Vec<_>>>()?;
                        let values: LuaMultiValue = func
                            .call(LuaMultiValue::from_iter(lua_args))
                            .map_err(|e| lua_error(name, e))?;
                        first_result(values)
                    }),
                ),
            ]
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "lua"))]
mod tests {
    use super::lua_impl::*;
    use crate::script::interp::Interpreter;
    use crate::script::value::Value;

    fn interp() -> Interpreter {
        let mut interp = Interpreter::new();
        interp.bake_extension(Box::new(LuaExtension::new(mlua::Lua::new()))).unwrap();
        interp
    }

    #[test]
    fn script_result_is_returned() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "return 'from lua'").unwrap();
        let path = f.path().display().to_string();
        let mut interp = interp();
        let v = interp.evaluate(&format!("call_lua_script(\"{path}\")")).unwrap();
        assert_eq!(v, Value::String("from lua".into()));
    }

    #[test]
    fn script_without_result_is_null() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "x = 1").unwrap();
        let path = f.path().display().to_string();
        let v = interp().evaluate(&format!("call_lua_script(\"{path}\")")).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn missing_script_is_an_error() {
        let err = interp().evaluate("call_lua_script(\"/no/such/file.lua\")").unwrap_err();
        assert!(err.to_string().contains("error running script"));
    }

    #[test]
    fn call_global_function() {
        let lua = mlua::Lua::new();
        lua.load("function add(a, b) return a + b end").exec().unwrap();
        let mut interp = Interpreter::new();
        interp.bake_extension(Box::new(LuaExtension::new(lua))).unwrap();
        assert_eq!(interp.evaluate("call_lua(add, 2, 40)").unwrap(), Value::Number(42.0));
    }

    #[test]
    fn conversions() {
        assert_eq!(from_lua(mlua::Value::Boolean(true)).unwrap(), Value::truth(true));
        assert_eq!(from_lua(mlua::Value::Integer(7)).unwrap(), Value::Number(7.0));
        assert!(from_lua(mlua::Value::LightUserData(mlua::LightUserData(std::ptr::null_mut()))).is_err());
    }
}
